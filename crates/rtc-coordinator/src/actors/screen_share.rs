//! Screen-share arbiter: an exclusive per-room token for screen-tagged producers.
//!
//! The arbiter only decides. The owning room broadcasts `screen-share-started`
//! and `screen-share-stopped` and keeps the holder consistent with its producers.

use crate::errors::{CoordinatorError, SCREEN_SHARE_BUSY};
use common::types::PeerId;

/// Result of a successful acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// The token was free and now belongs to the caller.
    Acquired,
    /// The caller already held it.
    AlreadyHeld,
}

#[derive(Debug, Default)]
pub struct ScreenShareArbiter {
    holder: Option<PeerId>,
}

impl ScreenShareArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn holder(&self) -> Option<PeerId> {
        self.holder
    }

    #[must_use]
    pub fn is_held_by(&self, peer_id: PeerId) -> bool {
        self.holder == Some(peer_id)
    }

    /// Grant the token to `peer_id` unless another peer holds it.
    pub fn acquire(&mut self, peer_id: PeerId) -> Result<Grant, CoordinatorError> {
        match self.holder {
            None => {
                self.holder = Some(peer_id);
                Ok(Grant::Acquired)
            }
            Some(holder) if holder == peer_id => Ok(Grant::AlreadyHeld),
            Some(_) => Err(CoordinatorError::Conflict(SCREEN_SHARE_BUSY.to_string())),
        }
    }

    /// Release the token if `peer_id` holds it. Returns whether it was released.
    pub fn release(&mut self, peer_id: PeerId) -> bool {
        if self.is_held_by(peer_id) {
            self.holder = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_when_free() {
        let mut arbiter = ScreenShareArbiter::new();
        let a = PeerId::new();

        assert_eq!(arbiter.acquire(a).unwrap(), Grant::Acquired);
        assert_eq!(arbiter.holder(), Some(a));
    }

    #[test]
    fn test_reacquire_by_holder_is_ok() {
        let mut arbiter = ScreenShareArbiter::new();
        let a = PeerId::new();

        arbiter.acquire(a).unwrap();
        assert_eq!(arbiter.acquire(a).unwrap(), Grant::AlreadyHeld);
    }

    #[test]
    fn test_second_peer_conflicts() {
        let mut arbiter = ScreenShareArbiter::new();
        let a = PeerId::new();
        let b = PeerId::new();

        arbiter.acquire(a).unwrap();
        let err = arbiter.acquire(b).unwrap_err();
        assert_eq!(err.client_message(), "another user is already sharing");
        assert_eq!(err.error_code(), 5);
        assert_eq!(arbiter.holder(), Some(a));
    }

    #[test]
    fn test_release_only_by_holder() {
        let mut arbiter = ScreenShareArbiter::new();
        let a = PeerId::new();
        let b = PeerId::new();

        arbiter.acquire(a).unwrap();
        assert!(!arbiter.release(b));
        assert_eq!(arbiter.holder(), Some(a));

        assert!(arbiter.release(a));
        assert_eq!(arbiter.holder(), None);
        assert!(!arbiter.release(a));

        assert_eq!(arbiter.acquire(b).unwrap(), Grant::Acquired);
    }
}
