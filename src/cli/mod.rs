//! CLI command implementations

pub mod error;
pub mod export;
pub mod status;
pub mod verify;

pub use error::CliError;
pub use export::{Cli, Commands, ExportArgs, OutputFormat};
pub use status::StatusCommand;
pub use verify::VerifyCommand;
