//! FortiOS CLI scripts and output parsing

use crate::error::{ControllerError, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use vpn_types::{CliArgumentValidator, VpnSession};

pub const LIST_SESSIONS: &str = "execute vpn sslvpn list";

const ERROR_MARKERS: [&str; 3] = ["Command fail", "Unknown action", "command parse error"];
const NO_SESSIONS_MARKER: &str = "No active sessions";

/// Parse `execute vpn sslvpn list` output.
///
/// Only rows starting with a numeric index followed by the username are
/// read, so section titles and column headers fall away. The login and
/// tunnel sections number rows independently; a row repeated with the same
/// index and user is reported once.
pub fn parse_sslvpn_list(output: &str) -> Vec<VpnSession> {
    let mut seen = HashSet::new();
    let mut sessions = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 || !parts[0].chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !seen.insert((parts[0].to_string(), parts[1].to_string())) {
            continue;
        }

        let mut session = VpnSession::new(parts[0], parts[1]);
        session.group = parts
            .get(2)
            .filter(|g| g.parse::<IpAddr>().is_err())
            .map(|g| g.to_string());
        session.from_ip = parts
            .iter()
            .skip(2)
            .find(|p| p.parse::<IpAddr>().is_ok())
            .map(|p| p.to_string());
        sessions.push(session);
    }
    sessions
}

/// Fail when the CLI reported an error. "No active sessions" is not one.
pub fn check_cli_output(output: &str) -> Result<()> {
    for line in output.lines() {
        if line.contains(NO_SESSIONS_MARKER) {
            continue;
        }
        if ERROR_MARKERS.iter().any(|m| line.contains(m)) {
            return Err(ControllerError::Protocol(line.trim().to_string()));
        }
    }
    Ok(())
}

pub fn del_tunnel_command(index: &str) -> Result<String> {
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return Err(ControllerError::Protocol(format!(
            "session index '{}' is not numeric",
            index
        )));
    }
    Ok(format!("execute vpn sslvpn del-tunnel {}", index))
}

/// Script printing a user group's configuration.
pub fn show_group_script(group: &str) -> Result<String> {
    CliArgumentValidator::validate("group", group)?;
    Ok(format!("config user group\nedit \"{}\"\nshow\nend\n", group))
}

/// Script replacing a user group's member list.
pub fn set_members_script(group: &str, members: &[String]) -> Result<String> {
    CliArgumentValidator::validate("group", group)?;
    for member in members {
        CliArgumentValidator::validate("member", member)?;
    }

    let mut script = format!("config user group\nedit \"{}\"\nunset member\n", group);
    if !members.is_empty() {
        let quoted: Vec<String> = members.iter().map(|m| format!("\"{}\"", m)).collect();
        script.push_str(&format!("set member {}\n", quoted.join(" ")));
    }
    script.push_str("next\nend\n");
    Ok(script)
}

/// Members listed on the `set member` line of a group's `show` output.
pub fn parse_group_members(output: &str) -> Vec<String> {
    let Some(rest) = output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("set member "))
    else {
        return Vec::new();
    };

    if rest.contains('"') {
        rest.split('"')
            .skip(1)
            .step_by(2)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        rest.split_whitespace().map(str::to_string).collect()
    }
}
