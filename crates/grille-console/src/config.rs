//! Command line configuration.

use std::{fmt, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use grille_core::RecoveryConfig;
use zeroize::Zeroizing;

/// Environment variable holding the master key password.
pub const PASSWORD_ENV: &str = "GRILLE_MASTER_PASSWORD";

/// Master key recovery console
#[derive(Parser, Debug)]
#[command(name = "grille-console")]
#[command(about = "Recover and re-encrypt domain keys with the master key")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// What to do
    #[command(subcommand)]
    pub command: Command,
}

/// Console subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Re-encrypt every undecryptable key of an export for the custodians
    Recover(RecoverArgs),

    /// Verify a custodian certificate bundle against the master key
    CheckRecipients(CheckRecipientsArgs),
}

/// Master key file and the password that unlocks it.
#[derive(Args, Clone)]
pub struct MasterKeyArgs {
    /// Path to the master key file (JSON)
    #[arg(long)]
    pub master_key: PathBuf,

    /// Password of the master key
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    pub password: Zeroizing<String>,
}

impl fmt::Debug for MasterKeyArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyArgs")
            .field("master_key", &self.master_key)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Arguments of `recover`.
#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    /// Master key
    #[command(flatten)]
    pub master: MasterKeyArgs,

    /// Key export to recover from (JSON)
    #[arg(long)]
    pub export: PathBuf,

    /// Custodian certificate bundle (JSON array of chains)
    #[arg(long)]
    pub recipients: PathBuf,

    /// Where re-encrypted batches are written (JSON lines)
    #[arg(long)]
    pub out: PathBuf,

    /// Keys per batch
    #[arg(long, default_value_t = RecoveryConfig::default().batch_size)]
    pub batch_size: usize,

    /// Every Nth batch is flushed to disk before continuing
    #[arg(long, default_value_t = RecoveryConfig::default().ack_every)]
    pub ack_every: u64,
}

impl RecoverArgs {
    /// Recovery tuning from the flags.
    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig { batch_size: self.batch_size, ack_every: self.ack_every }
    }
}

/// Arguments of `check-recipients`.
#[derive(Args, Debug, Clone)]
pub struct CheckRecipientsArgs {
    /// Master key
    #[command(flatten)]
    pub master: MasterKeyArgs,

    /// Custodian certificate bundle (JSON array of chains)
    #[arg(long)]
    pub recipients: PathBuf,
}
