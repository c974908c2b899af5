//! Environment abstraction for deterministic testing.
//!
//! Decouples pipeline logic from system resources (time, randomness). Tests
//! use a seeded RNG; production uses the OS RNG.

use std::time::Duration;

use grille_crypto::WrapEntropy;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fresh ephemeral key and nonce for one wrap operation.
    fn wrap_entropy(&self) -> WrapEntropy {
        WrapEntropy::from_fill(|buf| self.random_bytes(buf))
    }

    /// Fresh 24-byte nonce.
    fn nonce(&self) -> [u8; 24] {
        let mut nonce = [0u8; 24];
        self.random_bytes(&mut nonce);
        nonce
    }
}
