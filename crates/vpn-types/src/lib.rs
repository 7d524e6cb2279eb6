//! Common types shared across VPN access crates
//!
//! This crate holds the value objects that flow between the directory
//! adapters, the stores, the session controllers and the reconciler, so
//! that none of those crates has to depend on another for a type.

pub mod access;
pub mod audit;
pub mod directory;
pub mod error;
pub mod principal;
pub mod session;
pub mod sync;
pub mod validation;

pub use access::*;
pub use audit::*;
pub use directory::*;
pub use error::*;
pub use principal::*;
pub use session::*;
pub use sync::*;
pub use validation::*;
