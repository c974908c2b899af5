use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use grille_crypto::{
    CertificateChain, DomainKeySignature, Fingerprint, KeyId, RootSecret, SecretKey,
    wrap::agreement_public_key,
};
use serde::Serialize;
use zeroize::Zeroizing;

use super::{INITIAL_DOMAINS, KEY_MASTER_DOMAIN, RebuildChannel, SealedCommand};
use crate::{
    decrypt::decrypt_batch,
    env::Environment,
    error::RestoreError,
    recipients::{RecipientCertificate, RecipientSet, encrypt_for_recipients},
    record::{Delivery, ReEncryptedBatch, ReEncryptedKey},
    store::KeyStore,
};

/// Outcome of restoring one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildResult {
    /// Domain the command was sent to
    pub domain: String,
    /// Domain accepted the rebuild command
    pub ok: bool,
    /// Rejection or delivery failure
    pub err: Option<String>,
    /// Keys recovered from backups and included in the command
    pub keys: usize,
}

/// Keys recovered from every backup host of one domain.
struct RecoveredBackup {
    originals: BTreeMap<KeyId, DomainKeySignature>,
    secrets: BTreeMap<KeyId, SecretKey>,
}

/// Rebuilds domains from backup key material.
pub struct RestoreCoordinator<S, C, E> {
    store: S,
    channel: C,
    env: E,
    anchor: VerifyingKey,
    recipients: RecipientSet,
}

impl<S: KeyStore, C: RebuildChannel, E: Environment> RestoreCoordinator<S, C, E> {
    /// Coordinator for the CA identified by `anchor`.
    pub fn new(store: S, channel: C, env: E, anchor: VerifyingKey, recipients: RecipientSet) -> Self {
        Self { store, channel, env, anchor, recipients }
    }

    /// Restore the certificate domain, then the key custodian domain.
    ///
    /// A rejected or undelivered command does not stop the next domain;
    /// any other error does.
    pub async fn restore_initial_domains(
        &self,
        root: &RootSecret,
        resubmit_keys: bool,
    ) -> Result<Vec<RebuildResult>, RestoreError> {
        let mut results = Vec::with_capacity(INITIAL_DOMAINS.len());
        for domain in INITIAL_DOMAINS {
            results.push(self.restore_initial_domain(domain, root, resubmit_keys).await?);
        }
        Ok(results)
    }

    /// Rebuild `domain` from its backups.
    ///
    /// # Errors
    ///
    /// Errors fetching backups, resubmitting keys, probing the domain or
    /// sealing the command are returned. Failure to deliver the command is
    /// reported as `ok: false` in the result instead.
    pub async fn restore_initial_domain(
        &self,
        domain: &str,
        root: &RootSecret,
        resubmit_keys: bool,
    ) -> Result<RebuildResult, RestoreError> {
        let recovered = self.recover_backup(domain, root).await?;
        tracing::info!(domain, keys = recovered.secrets.len(), "recovered backup keys");

        if resubmit_keys {
            self.resubmit(&recovered).await?;
        }

        let target =
            if domain == KEY_MASTER_DOMAIN { None } else { Some(self.probe(domain).await?) };

        let plaintext = rebuild_command(&recovered.secrets)?;
        let mut sealed = SealedCommand::seal(&plaintext, &self.env)?;

        sealed.wrap_for(Fingerprint::of(&self.anchor), &agreement_public_key(&self.anchor), &self.env)?;
        for recipient in self.recipients.snapshot().iter() {
            sealed.wrap_for(recipient.fingerprint().clone(), recipient.encryption_key(), &self.env)?;
        }
        if let Some(target) = target {
            sealed.wrap_for(target.fingerprint().clone(), target.encryption_key(), &self.env)?;
        }

        let keys = recovered.secrets.len();
        let result = match self.channel.send_rebuild_command(domain, sealed.into_envelope()).await {
            Ok(ack) => RebuildResult { domain: domain.to_string(), ok: ack.ok, err: ack.err, keys },
            Err(err) => {
                RebuildResult { domain: domain.to_string(), ok: false, err: Some(err.to_string()), keys }
            },
        };

        if result.ok {
            tracing::info!(domain, keys, "rebuild command accepted");
        } else {
            tracing::warn!(domain, err = ?result.err, "rebuild command failed");
        }
        Ok(result)
    }

    async fn recover_backup(
        &self,
        domain: &str,
        root: &RootSecret,
    ) -> Result<RecoveredBackup, RestoreError> {
        let backups = self.store.fetch_backup_keys(domain, false, true).await?;

        let mut recovered = RecoveredBackup { originals: BTreeMap::new(), secrets: BTreeMap::new() };
        for host in backups.per_host.iter().filter(|host| host.domain == domain) {
            let outcome = decrypt_batch(root, &host.keys, Some(domain));
            if !outcome.rejected.is_empty() {
                tracing::warn!(
                    host = %host.host,
                    domain,
                    rejected = outcome.rejected.len(),
                    "backup keys rejected"
                );
            }

            for (key_id, secret) in outcome.recovered {
                if let Some(signature) = host.keys.get(&key_id) {
                    recovered.originals.insert(key_id.clone(), signature.clone());
                }
                recovered.secrets.insert(key_id, secret);
            }
        }

        Ok(recovered)
    }

    /// Push every recovered key back to the key custodians, one at a time.
    async fn resubmit(&self, recovered: &RecoveredBackup) -> Result<(), RestoreError> {
        let recipients = self.recipients.snapshot();
        if recipients.is_empty() {
            return Err(RestoreError::NoRecipients);
        }

        for (key_id, secret) in &recovered.secrets {
            let Some(signature) = recovered.originals.get(key_id) else {
                continue;
            };
            let ciphertexts = encrypt_for_recipients(secret.as_bytes(), &recipients, &self.env)?;

            let mut batch = ReEncryptedBatch::default();
            batch
                .keys
                .insert(key_id.clone(), ReEncryptedKey { signature: signature.clone(), ciphertexts });
            self.store.submit_reencrypted_batch(batch, Delivery::Acknowledged).await?;
        }

        tracing::debug!(keys = recovered.secrets.len(), "resubmitted backup keys");
        Ok(())
    }

    /// Certificate of a running instance of `domain`, verified against the CA.
    async fn probe(&self, domain: &str) -> Result<RecipientCertificate, RestoreError> {
        let encoded = self.channel.probe_domain(domain).await?;
        let chain = CertificateChain::decode(&encoded).map_err(RestoreError::UntrustedDomain)?;
        let target =
            RecipientCertificate::verify(chain, &self.anchor).map_err(RestoreError::UntrustedDomain)?;

        tracing::debug!(domain, fingerprint = %target.fingerprint(), "probed domain certificate");
        Ok(target)
    }
}

#[derive(Serialize)]
struct RebuildCommand<'a> {
    keys: BTreeMap<&'a KeyId, &'a str>,
}

/// `{"keys": {key_id: base64_secret}}`, held in a zeroizing buffer.
fn rebuild_command(secrets: &BTreeMap<KeyId, SecretKey>) -> Result<Zeroizing<Vec<u8>>, RestoreError> {
    let encoded: Vec<(&KeyId, Zeroizing<String>)> =
        secrets.iter().map(|(key_id, secret)| (key_id, secret.to_base64())).collect();
    let command = RebuildCommand {
        keys: encoded.iter().map(|(key_id, secret)| (*key_id, secret.as_str())).collect(),
    };

    serde_json::to_vec(&command)
        .map(Zeroizing::new)
        .map_err(|e| RestoreError::Serialization(e.to_string()))
}
