//! Principal names: the join key between directory, mirror and access records

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest principal name accepted (RFC 5321 path limit).
pub const MAX_PRINCIPAL_LEN: usize = 320;

/// A validated user principal name such as `alice@example.com`.
///
/// Equality and ordering are exact on the stored string; the identity
/// provider is the authority on casing. Matching against gateway
/// usernames goes through [`PrincipalName::session_key`], which is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalName(String);

impl PrincipalName {
    /// Validate and wrap a principal name.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.len() != raw.len() {
            return Err(CommonError::Validation(format!(
                "Principal name '{}' has surrounding whitespace",
                raw
            )));
        }
        if raw.is_empty() {
            return Err(CommonError::Validation(
                "Principal name cannot be empty".to_string(),
            ));
        }
        if raw.len() > MAX_PRINCIPAL_LEN {
            return Err(CommonError::Validation(format!(
                "Principal name is longer than {} characters",
                MAX_PRINCIPAL_LEN
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || *c == '"')
        {
            return Err(CommonError::Validation(format!(
                "Principal name '{}' contains invalid character {:?}",
                raw, bad
            )));
        }

        let mut parts = raw.split('@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next();
        match (local.is_empty(), domain, parts.next()) {
            (false, Some(domain), None) if !domain.is_empty() => Ok(Self(raw)),
            _ => Err(CommonError::Validation(format!(
                "Principal name '{}' must have the form user@domain",
                raw
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `@`.
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    /// The part after `@`, without the separator.
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, d)| d).unwrap_or_default()
    }

    /// Key used to match this principal against VPN gateway sessions.
    ///
    /// The gateway reports bare usernames, so the domain is stripped and the
    /// remainder lowercased.
    pub fn session_key(&self) -> String {
        self.local_part().to_lowercase()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PrincipalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PrincipalName {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PrincipalName {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<PrincipalName> for String {
    fn from(value: PrincipalName) -> Self {
        value.0
    }
}
