//! Console commands.

use std::path::Path;

use grille_core::{BatchRecoveryDriver, CancelToken, RecipientSet, RecoveryReport};
use grille_crypto::{CertificateChain, EncryptedKeyMaterial, RootSecret, load_root_secret};
use serde::{Deserialize, Serialize};

use crate::{
    config::{CheckRecipientsArgs, Cli, Command, MasterKeyArgs, RecoverArgs},
    error::ConsoleError,
    file_store::FileKeyStore,
    system_env::SystemEnv,
};

/// Master key file: the root secret sealed under the operator's password.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    /// Password-sealed root secret
    pub encrypted_root_key: EncryptedKeyMaterial,
}

/// Run the selected subcommand.
pub async fn run(cli: Cli) -> Result<(), ConsoleError> {
    match cli.command {
        Command::Recover(args) => {
            let report = recover(&args).await?;
            if report.cancelled {
                tracing::warn!(
                    current = report.progress.current,
                    total = report.progress.total,
                    "recovery interrupted; run again to continue"
                );
            }
        },
        Command::CheckRecipients(args) => {
            check_recipients(&args)?;
        },
    }
    Ok(())
}

/// Unlock the root secret.
pub fn load_master_key(args: &MasterKeyArgs) -> Result<RootSecret, ConsoleError> {
    let text =
        std::fs::read_to_string(&args.master_key).map_err(|e| ConsoleError::io(&args.master_key, e))?;
    let file: MasterKeyFile =
        serde_json::from_str(&text).map_err(|e| ConsoleError::json(&args.master_key, e))?;

    let root = load_root_secret(&file.encrypted_root_key, args.password.as_bytes())?;
    tracing::info!(path = %args.master_key.display(), "master key unlocked");
    Ok(root)
}

/// Load custodian chains trusted by `root`.
pub fn load_recipients(path: &Path, root: &RootSecret) -> Result<RecipientSet, ConsoleError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConsoleError::io(path, e))?;
    let encoded: Vec<Vec<String>> =
        serde_json::from_str(&text).map_err(|e| ConsoleError::json(path, e))?;

    let mut chains = Vec::with_capacity(encoded.len());
    for chain in &encoded {
        match CertificateChain::decode(chain) {
            Ok(chain) => chains.push(chain),
            Err(err) => tracing::warn!(error = %err, "skipping undecodable certificate chain"),
        }
    }

    let recipients = RecipientSet::new();
    if recipients.load(chains, &root.public_key()) == 0 {
        return Err(ConsoleError::NoRecipients(path.to_path_buf()));
    }
    Ok(recipients)
}

/// Recover every undecryptable key of an export.
///
/// Ctrl-C stops the run at the next batch boundary.
pub async fn recover(args: &RecoverArgs) -> Result<RecoveryReport, ConsoleError> {
    let root = load_master_key(&args.master)?;
    let recipients = load_recipients(&args.recipients, &root)?;
    let store = FileKeyStore::open(&args.export, &args.out)?;
    let mut driver = BatchRecoveryDriver::new(store, SystemEnv::new(), args.recovery_config())?;

    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing current batch");
            interrupt.cancel();
        }
    });

    let result = driver
        .run(&root, &recipients, &cancel, |progress| {
            tracing::info!(
                current = progress.current,
                total = progress.total,
                done = progress.done,
                "recovery progress"
            );
        })
        .await;
    watcher.abort();
    root.dispose();

    let report = result?;
    driver.store().flush()?;
    tracing::info!(
        batches = report.batches_submitted,
        rejected = report.keys_rejected,
        out = %driver.store().out_path().display(),
        "re-encrypted keys written"
    );
    Ok(report)
}

/// Verify a certificate bundle against the master key.
pub fn check_recipients(args: &CheckRecipientsArgs) -> Result<usize, ConsoleError> {
    let root = load_master_key(&args.master)?;
    let recipients = load_recipients(&args.recipients, &root)?;
    root.dispose();

    for recipient in recipients.snapshot().iter() {
        tracing::info!(
            subject = recipient.subject(),
            fingerprint = %recipient.fingerprint(),
            "trusted key custodian"
        );
    }
    Ok(recipients.len())
}
