use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{RebuildAck, RebuildChannel, RebuildEnvelope, RebuildError};

/// In-memory rebuild channel for testing and simulation.
///
/// Probes answer with the chain registered for the domain. Commands are
/// recorded and acknowledged unless a rejection or transport failure is
/// configured. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRebuildChannel {
    inner: Arc<Mutex<MemoryRebuildChannelInner>>,
}

#[derive(Default)]
struct MemoryRebuildChannelInner {
    certificates: HashMap<String, Vec<String>>,
    probes: Vec<String>,
    commands: Vec<(String, RebuildEnvelope)>,
    rejection: Option<String>,
    transport_failure: bool,
}

impl MemoryRebuildChannel {
    /// Channel with no registered domains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the chain a domain answers probes with.
    #[allow(clippy::expect_used)]
    pub fn set_certificate(&self, domain: &str, chain: Vec<String>) {
        self.inner.lock().expect("Mutex poisoned").certificates.insert(domain.to_string(), chain);
    }

    /// Acknowledge commands with `ok: false` and this reason.
    #[allow(clippy::expect_used)]
    pub fn reject_commands(&self, reason: &str) {
        self.inner.lock().expect("Mutex poisoned").rejection = Some(reason.to_string());
    }

    /// Fail command delivery at the transport level.
    #[allow(clippy::expect_used)]
    pub fn fail_transport(&self, fail: bool) {
        self.inner.lock().expect("Mutex poisoned").transport_failure = fail;
    }

    /// Domains probed so far, in order.
    #[allow(clippy::expect_used)]
    pub fn probes(&self) -> Vec<String> {
        self.inner.lock().expect("Mutex poisoned").probes.clone()
    }

    /// Commands delivered so far, with their target domain.
    #[allow(clippy::expect_used)]
    pub fn commands(&self) -> Vec<(String, RebuildEnvelope)> {
        self.inner.lock().expect("Mutex poisoned").commands.clone()
    }
}

#[async_trait]
impl RebuildChannel for MemoryRebuildChannel {
    #[allow(clippy::expect_used)]
    async fn probe_domain(&self, domain: &str) -> Result<Vec<String>, RebuildError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.probes.push(domain.to_string());
        inner
            .certificates
            .get(domain)
            .cloned()
            .ok_or_else(|| RebuildError::NoCertificate(domain.to_string()))
    }

    #[allow(clippy::expect_used)]
    async fn send_rebuild_command(
        &self,
        domain: &str,
        envelope: RebuildEnvelope,
    ) -> Result<RebuildAck, RebuildError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.transport_failure {
            return Err(RebuildError::Transport("injected command failure".to_string()));
        }

        inner.commands.push((domain.to_string(), envelope));
        Ok(match &inner.rejection {
            Some(reason) => RebuildAck { ok: false, err: Some(reason.clone()) },
            None => RebuildAck { ok: true, err: None },
        })
    }
}
