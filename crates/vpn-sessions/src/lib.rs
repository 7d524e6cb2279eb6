//! VPN gateway session control
//!
//! [`VpnSessionController`] is the narrow interface the sync core depends on:
//! list live sessions and terminate them by bare username. Two FortiGate
//! adapters implement it, one driving the FortiOS CLI over SSH and one using
//! the REST monitor API. The SSH adapter also manages portal group
//! membership through [`PortalGroups`].

pub mod controller;
pub mod error;
pub mod fortios;
pub mod rest;
pub mod ssh;

pub use controller::{PortalGroups, VpnSessionController};
pub use error::{ControllerError, Result};
pub use rest::{FortiGateRestController, RestConfig};
pub use ssh::{CliTransport, SshCliController, SshConfig, SshTransport};
pub use vpn_types::VpnSession;
