//! Grille console binary.
//!
//! # Usage
//!
//! ```bash
//! # Re-encrypt every undecryptable key of an export for the custodians
//! GRILLE_MASTER_PASSWORD=... grille-console recover \
//!     --master-key master.json --export keys.json \
//!     --recipients custodians.json --out reencrypted.jsonl
//!
//! # Check which custodian certificates the master key trusts
//! grille-console check-recipients --master-key master.json --recipients custodians.json
//! ```

use clap::Parser;
use grille_console::Cli;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    grille_console::run(cli).await?;

    Ok(())
}
