//! Peer recovery request matcher.
//!
//! Key custodian instances that lost access to their local keys broadcast a
//! recovery request carrying their secret wrapped for the CA and their
//! certificate chain. The matcher keeps the latest request per instance and,
//! when the operator acts on one, answers that instance point-to-point with
//! the secret re-encrypted for its own certificate.

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use ed25519_dalek::VerifyingKey;
use grille_crypto::{
    CertificateChain, CryptoError, RootSecret, decrypt_with_root,
    encoding::{decode_multibase, encode_multibase},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    bus::{BusError, BusEvent, MessageBus, RECOVERY_REQUEST_EVENT, RecoveryResponse},
    env::Environment,
    error::PeerError,
    recipients::{KEY_MASTER_ROLE, RecipientCertificate, encrypt_for_recipient},
};

/// Body of a recovery request event.
///
/// Fields other than `instance_id` may be absent; absent fields keep the
/// value from an earlier announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAnnouncement {
    /// Announcing instance
    pub instance_id: String,
    /// Instance secret wrapped for the CA, multibase encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<String>,
    /// Instance certificate chain, leaf first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Vec<String>>,
}

/// Latest known request from one custodian instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecoveryRequest {
    /// Requesting instance
    pub instance_id: String,
    /// Wrapped secret copy, multibase encoded
    pub encrypted_secret: Option<String>,
    /// Custodian certificate chain
    pub certificate_chain: Option<Vec<String>>,
}

impl PeerRecoveryRequest {
    fn from_announcement(announcement: RecoveryAnnouncement) -> Self {
        Self {
            instance_id: announcement.instance_id,
            encrypted_secret: announcement.encrypted_secret,
            certificate_chain: announcement.certificate,
        }
    }

    /// Shallow merge: present fields overwrite, absent ones are kept.
    fn merge(&mut self, announcement: RecoveryAnnouncement) {
        if let Some(secret) = announcement.encrypted_secret {
            self.encrypted_secret = Some(secret);
        }
        if let Some(chain) = announcement.certificate {
            self.certificate_chain = Some(chain);
        }
    }
}

/// Tracks pending peer requests and answers them.
pub struct PeerRecoveryMatcher<B, E> {
    bus: B,
    env: E,
    anchor: VerifyingKey,
    pending: Mutex<BTreeMap<String, PeerRecoveryRequest>>,
}

impl<B: MessageBus, E: Environment> PeerRecoveryMatcher<B, E> {
    /// Matcher trusting custodian certificates issued under `anchor`.
    pub fn new(bus: B, env: E, anchor: VerifyingKey) -> Self {
        Self { bus, env, anchor, pending: Mutex::new(BTreeMap::new()) }
    }

    /// Upsert a request by instance id.
    pub fn upsert(&self, announcement: RecoveryAnnouncement) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(&announcement.instance_id) {
            Some(existing) => existing.merge(announcement),
            None => {
                let request = PeerRecoveryRequest::from_announcement(announcement);
                pending.insert(request.instance_id.clone(), request);
            },
        }
    }

    /// Pending request for an instance.
    pub fn pending_request(&self, instance_id: &str) -> Option<PeerRecoveryRequest> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).get(instance_id).cloned()
    }

    /// All pending requests, ordered by instance id.
    pub fn pending(&self) -> Vec<PeerRecoveryRequest> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Apply one bus event. Events for other routing keys are ignored.
    pub fn handle_event(&self, event: &BusEvent) -> Result<(), PeerError> {
        if event.routing_key != RECOVERY_REQUEST_EVENT {
            tracing::debug!(routing_key = %event.routing_key, "ignoring unrelated event");
            return Ok(());
        }

        let announcement: RecoveryAnnouncement = serde_json::from_value(event.message.clone())
            .map_err(|e| PeerError::Malformed(e.to_string()))?;
        if announcement.instance_id.is_empty() {
            return Err(PeerError::Malformed("empty instanceId".to_string()));
        }

        tracing::debug!(instance_id = %announcement.instance_id, "recovery request received");
        self.upsert(announcement);
        Ok(())
    }

    /// Subscribe to recovery request events.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<BusEvent>, BusError> {
        self.bus.subscribe(RECOVERY_REQUEST_EVENT).await
    }

    /// Consume a subscription until it closes.
    ///
    /// A failing event is logged and skipped; it never ends the feed.
    /// Returns the number of events applied.
    pub async fn listen(&self, mut events: mpsc::Receiver<BusEvent>) -> usize {
        let mut applied = 0;
        while let Some(event) = events.recv().await {
            match self.handle_event(&event) {
                Ok(()) => applied += 1,
                Err(err) => tracing::warn!(error = %err, "dropping recovery event"),
            }
        }
        applied
    }

    /// End the session: forget pending requests and unsubscribe.
    pub async fn close(&self) -> Result<(), BusError> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.bus.unsubscribe(RECOVERY_REQUEST_EVENT).await
    }

    /// Ask every custodian to re-broadcast its pending request.
    pub async fn trigger_recovery_broadcast(&self) -> Result<(), PeerError> {
        self.bus.broadcast_recovery_trigger().await?;
        tracing::info!("recovery broadcast triggered");
        Ok(())
    }

    /// Answer the pending request of `instance_id`.
    ///
    /// # Errors
    ///
    /// - `UnknownInstance` if no request is pending (nothing is sent)
    /// - `RootSecretMismatch` if `root` is not the CA's secret
    /// - `IncompleteRequest` if the request lacks its secret or chain
    /// - `DecryptionFailure` if the wrapped secret cannot be opened
    /// - `InvalidCertificate` if the chain is untrusted or is not a key
    ///   custodian certificate for this instance
    /// - `Submission` if the response cannot be sent
    pub async fn recover(&self, instance_id: &str, root: &RootSecret) -> Result<(), PeerError> {
        let request = self
            .pending_request(instance_id)
            .ok_or_else(|| PeerError::UnknownInstance(instance_id.to_string()))?;

        if root.public_key() != self.anchor {
            return Err(PeerError::RootSecretMismatch);
        }

        let encrypted = request.encrypted_secret.as_deref().ok_or_else(|| {
            PeerError::IncompleteRequest {
                instance_id: instance_id.to_string(),
                field: "encryptedSecret",
            }
        })?;
        let chain = request.certificate_chain.as_deref().ok_or_else(|| {
            PeerError::IncompleteRequest { instance_id: instance_id.to_string(), field: "certificate" }
        })?;

        let wrapped = decode_multibase(encrypted).map_err(PeerError::DecryptionFailure)?;
        let secret = decrypt_with_root(root, &wrapped).map_err(PeerError::DecryptionFailure)?;

        let recipient = self.custodian(instance_id, chain)?;
        let ciphertext = encrypt_for_recipient(&secret, recipient.encryption_key(), &self.env)
            .map_err(PeerError::InvalidCertificate)?;

        let response = RecoveryResponse {
            instance_id: instance_id.to_string(),
            encrypted_secret: encode_multibase(&ciphertext.0),
        };
        self.bus.send_point_to_point(recipient.fingerprint(), response).await?;

        tracing::info!(
            instance_id,
            fingerprint = %recipient.fingerprint(),
            "recovery response sent"
        );
        Ok(())
    }

    fn custodian(
        &self,
        instance_id: &str,
        encoded: &[String],
    ) -> Result<RecipientCertificate, PeerError> {
        let chain = CertificateChain::decode(encoded).map_err(PeerError::InvalidCertificate)?;
        let recipient =
            RecipientCertificate::verify(chain, &self.anchor).map_err(PeerError::InvalidCertificate)?;

        if recipient.subject() != instance_id {
            return Err(PeerError::InvalidCertificate(CryptoError::InvalidCertificate {
                reason: format!("certificate subject {} is not {instance_id}", recipient.subject()),
            }));
        }
        let is_custodian =
            recipient.chain().leaf().is_some_and(|leaf| leaf.has_role(KEY_MASTER_ROLE));
        if !is_custodian {
            return Err(PeerError::InvalidCertificate(CryptoError::InvalidCertificate {
                reason: format!("{instance_id} is not a key custodian"),
            }));
        }

        Ok(recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_absent_fields() {
        let mut request = PeerRecoveryRequest::from_announcement(RecoveryAnnouncement {
            instance_id: "a".to_string(),
            encrypted_secret: Some("mAAAA".to_string()),
            certificate: Some(vec!["mBBBB".to_string()]),
        });

        request.merge(RecoveryAnnouncement {
            instance_id: "a".to_string(),
            encrypted_secret: Some("mCCCC".to_string()),
            certificate: None,
        });

        assert_eq!(request.encrypted_secret.as_deref(), Some("mCCCC"));
        assert_eq!(request.certificate_chain, Some(vec!["mBBBB".to_string()]));
    }

    #[test]
    fn announcement_uses_camel_case() {
        let json = serde_json::json!({
            "instanceId": "a",
            "encryptedSecret": "mAAAA",
        });
        let announcement: RecoveryAnnouncement = serde_json::from_value(json).unwrap();

        assert_eq!(announcement.instance_id, "a");
        assert_eq!(announcement.encrypted_secret.as_deref(), Some("mAAAA"));
        assert!(announcement.certificate.is_none());
    }
}
