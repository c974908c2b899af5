//! Pub/sub message bus abstraction.
//!
//! The bus is the authenticated connection to the platform. The recovery
//! pipeline uses it for three things: subscribing to recovery requests
//! broadcast by key custodian instances, broadcasting a trigger asking them
//! to re-announce, and sending a point-to-point response to one instance.

mod memory;

use async_trait::async_trait;
use grille_crypto::Fingerprint;
pub use memory::MemoryBus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Routing key of recovery requests broadcast by custodian instances.
pub const RECOVERY_REQUEST_EVENT: &str = "evenement.MaitreDesCles.demandeRecuperation";

/// Routing key of the trigger asking custodians to re-announce.
pub const RECOVERY_TRIGGER_COMMAND: &str = "commande.MaitreDesCles.emettreDemandesRecuperation";

/// Errors from the message bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Transport failure
    #[error("bus transport error: {0}")]
    Transport(String),

    /// Connection closed
    #[error("bus connection closed")]
    Closed,

    /// No subscription exists for the topic
    #[error("not subscribed to {0}")]
    NotSubscribed(String),
}

/// An event delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    /// Routing key the event was published under
    pub routing_key: String,
    /// Decoded message body
    pub message: serde_json::Value,
}

/// Point-to-point reply carrying a secret re-encrypted for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResponse {
    /// Instance the response is for
    pub instance_id: String,
    /// Multibase ciphertext encrypted for the instance's certificate
    pub encrypted_secret: String,
}

/// Authenticated pub/sub connection.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to a routing key; events arrive on the returned receiver.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusEvent>, BusError>;

    /// Drop the subscription for a routing key.
    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Ask every eligible custodian to broadcast its pending request.
    ///
    /// Fire and forget: replies arrive through the subscription.
    async fn broadcast_recovery_trigger(&self) -> Result<(), BusError>;

    /// Send a response addressed to one certificate fingerprint.
    async fn send_point_to_point(
        &self,
        target: &Fingerprint,
        response: RecoveryResponse,
    ) -> Result<(), BusError>;
}
