//! Input validation utilities

use crate::error::{CommonError, Result};
use crate::principal::PrincipalName;
use serde::{Deserialize, Serialize};

/// Domains admitted when no filter is configured.
pub const DEFAULT_ALLOWED_DOMAINS: &str = "@globalhitss.com,@hitss.com";

/// Allowed principal-name domain suffixes.
///
/// Entries are suffixes such as `@example.com`; a principal is admitted when
/// its name ends with any entry, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    suffixes: Vec<String>,
}

impl DomainFilter {
    /// Parse a comma-separated suffix list. Blank entries are dropped and a
    /// bare domain gains its leading `@`.
    pub fn parse(list: &str) -> Result<Self> {
        let suffixes: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                let s = s.to_lowercase();
                if s.starts_with('@') {
                    s
                } else {
                    format!("@{}", s)
                }
            })
            .collect();

        if suffixes.is_empty() {
            return Err(CommonError::Configuration(
                "Allowed domain list is empty".to_string(),
            ));
        }
        if let Some(bad) = suffixes.iter().find(|s| s.len() < 2 || s.contains(char::is_whitespace)) {
            return Err(CommonError::Configuration(format!(
                "Invalid allowed domain '{}'",
                bad
            )));
        }

        Ok(Self { suffixes })
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn matches(&self, principal: &PrincipalName) -> bool {
        self.matched_suffix(principal).is_some()
    }

    /// The suffix that admits `principal`, if any.
    pub fn matched_suffix(&self, principal: &PrincipalName) -> Option<&str> {
        let name = principal.as_str().to_lowercase();
        self.suffixes
            .iter()
            .find(|suffix| name.ends_with(suffix.as_str()))
            .map(String::as_str)
    }
}

impl Default for DomainFilter {
    fn default() -> Self {
        Self {
            suffixes: DEFAULT_ALLOWED_DOMAINS
                .split(',')
                .map(str::to_string)
                .collect(),
        }
    }
}

/// RADIUS server name validation
pub struct RadiusServerNameValidator;

impl RadiusServerNameValidator {
    pub const MAX_LEN: usize = 100;

    /// Validate and normalize a server name.
    pub fn validate(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommonError::Validation(
                "Server name is required".to_string(),
            ));
        }
        if name.chars().count() > Self::MAX_LEN {
            return Err(CommonError::Validation(format!(
                "Server name must be at most {} characters long",
                Self::MAX_LEN
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(CommonError::Validation(
                "Server name contains control characters".to_string(),
            ));
        }
        Ok(name.to_string())
    }
}

/// Validation of values interpolated into gateway CLI scripts
pub struct CliArgumentValidator;

impl CliArgumentValidator {
    /// Reject values that could break out of a quoted CLI argument.
    pub fn validate(field: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(CommonError::Validation(format!("{} cannot be empty", field)));
        }
        for ch in ['"', '\\', '\n', '\r', '\0'] {
            if value.contains(ch) {
                return Err(CommonError::Validation(format!(
                    "{} contains forbidden character {:?}",
                    field, ch
                )));
            }
        }
        if value.chars().any(char::is_control) {
            return Err(CommonError::Validation(format!(
                "{} contains control characters",
                field
            )));
        }
        Ok(())
    }
}
