//! Operator console for master key recovery.
//!
//! Unlocks the master key, loads the key custodian certificates it trusts,
//! and runs the batch recovery driver against an exported key dump.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod config;
mod error;
pub mod file_store;
pub mod system_env;

pub use commands::{MasterKeyFile, check_recipients, load_master_key, load_recipients, recover, run};
pub use config::{Cli, Command};
pub use error::ConsoleError;
pub use file_store::{FileKeyStore, KeyExport, SubmittedBatch};
pub use system_env::SystemEnv;
