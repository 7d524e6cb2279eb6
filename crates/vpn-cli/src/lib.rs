pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod utils;

pub use cli::*;
pub use commands::CommandHandler;
pub use config::{AppConfig, ConfigManager};
pub use context::{AppContext, StorageHandles};
pub use error::{CliError, Result};
pub use logging::setup_logging;
