//! Domain restore from backup material.
//!
//! The two foundational domains are rebuilt from backups decrypted with the
//! root secret: the certificate domain first, then the key custodian domain.
//! The rebuild command is sent over a [`RebuildChannel`].

mod channel;
mod command;
mod coordinator;

use async_trait::async_trait;
pub use channel::MemoryRebuildChannel;
pub use command::{RebuildEnvelope, SealedCommand};
pub use coordinator::{RebuildResult, RestoreCoordinator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key custodian domain.
pub const KEY_MASTER_DOMAIN: &str = "MaitreDesCles";

/// Certificate authority domain.
pub const CERTIFICATE_DOMAIN: &str = "CorePki";

/// Restore order for a fresh installation.
pub const INITIAL_DOMAINS: [&str; 2] = [CERTIFICATE_DOMAIN, KEY_MASTER_DOMAIN];

/// Errors from the rebuild command channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebuildError {
    /// Transport failure
    #[error("rebuild channel transport error: {0}")]
    Transport(String),

    /// No reply in time
    #[error("rebuild channel timed out")]
    Timeout,

    /// Probe reply carried no certificate
    #[error("domain {0} returned no certificate")]
    NoCertificate(String),
}

/// Reply of a domain to a rebuild command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildAck {
    /// Command accepted
    pub ok: bool,
    /// Reason, when rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Request/response channel to domains being rebuilt.
#[async_trait]
pub trait RebuildChannel: Send + Sync {
    /// No-op request to `domain`; returns the certificate chain (leaf
    /// first, multibase encoded) of the instance that answered.
    async fn probe_domain(&self, domain: &str) -> Result<Vec<String>, RebuildError>;

    /// Deliver a rebuild command to `domain`.
    async fn send_rebuild_command(
        &self,
        domain: &str,
        envelope: RebuildEnvelope,
    ) -> Result<RebuildAck, RebuildError>;
}
