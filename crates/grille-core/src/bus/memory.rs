use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use grille_crypto::Fingerprint;
use tokio::sync::mpsc;

use super::{BusError, BusEvent, MessageBus, RecoveryResponse};

/// Buffered events per subscription.
const SUBSCRIPTION_CAPACITY: usize = 64;

/// In-memory bus for testing and simulation.
///
/// Events injected with [`MemoryBus::publish`] are routed to the matching
/// subscription. Point-to-point sends and triggers are recorded for
/// assertions. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<MemoryBusInner>>,
}

#[derive(Default)]
struct MemoryBusInner {
    subscriptions: HashMap<String, mpsc::Sender<BusEvent>>,
    triggers: usize,
    sent: Vec<(Fingerprint, RecoveryResponse)>,
    fail_sends: bool,
}

impl MemoryBus {
    /// Create a bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the subscriber of its routing key.
    ///
    /// Returns false if nobody is subscribed or the buffer is full.
    #[allow(clippy::expect_used)]
    pub fn publish(&self, event: BusEvent) -> bool {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner
            .subscriptions
            .get(&event.routing_key)
            .is_some_and(|sender| sender.try_send(event).is_ok())
    }

    /// Make every point-to-point send fail with a transport error.
    #[allow(clippy::expect_used)]
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().expect("Mutex poisoned").fail_sends = fail;
    }

    /// Number of recovery triggers broadcast.
    #[allow(clippy::expect_used)]
    pub fn trigger_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").triggers
    }

    /// Point-to-point responses sent so far.
    #[allow(clippy::expect_used)]
    pub fn sent(&self) -> Vec<(Fingerprint, RecoveryResponse)> {
        self.inner.lock().expect("Mutex poisoned").sent.clone()
    }

    /// Whether a subscription exists for `topic`.
    #[allow(clippy::expect_used)]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.lock().expect("Mutex poisoned").subscriptions.contains_key(topic)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    #[allow(clippy::expect_used)]
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusEvent>, BusError> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.inner.lock().expect("Mutex poisoned").subscriptions.insert(topic.to_string(), sender);
        Ok(receiver)
    }

    #[allow(clippy::expect_used)]
    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .subscriptions
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| BusError::NotSubscribed(topic.to_string()))
    }

    #[allow(clippy::expect_used)]
    async fn broadcast_recovery_trigger(&self) -> Result<(), BusError> {
        self.inner.lock().expect("Mutex poisoned").triggers += 1;
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn send_point_to_point(
        &self,
        target: &Fingerprint,
        response: RecoveryResponse,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.fail_sends {
            return Err(BusError::Transport("injected send failure".to_string()));
        }
        inner.sent.push((target.clone(), response));
        Ok(())
    }
}
