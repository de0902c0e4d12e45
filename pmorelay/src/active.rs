//! Single active session slot ("last writer wins").

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Cancellation handle of one relay session.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    token: CancellationToken,
}

impl SessionHandle {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            token: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Holds the handle of the session currently relaying.
///
/// The lock only guards the slot and is never held across I/O. Handles are
/// cancelled after the lock is released.
#[derive(Debug, Default)]
pub struct ActiveSlot {
    current: Mutex<Option<Arc<SessionHandle>>>,
}

impl ActiveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `handle` the active session and cancels the one it replaces.
    ///
    /// Returns the displaced handle, if any.
    pub fn install(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let previous = self.current.lock().replace(handle);
        if let Some(previous) = &previous {
            previous.cancel();
        }
        previous
    }

    /// Clears the slot if `handle` still owns it.
    ///
    /// A displaced session must not clear the handle of its successor.
    pub fn release(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(active) if Arc::ptr_eq(active, handle) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    /// Empties the slot and cancels the session it held.
    pub fn cancel_active(&self) -> Option<u64> {
        let previous = self.current.lock().take();
        previous.map(|handle| {
            handle.cancel();
            handle.id()
        })
    }

    pub fn active_id(&self) -> Option<u64> {
        self.current.lock().as_ref().map(|h| h.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_cancels_previous() {
        let slot = ActiveSlot::new();
        let first = SessionHandle::new(1);
        let second = SessionHandle::new(2);

        assert!(slot.install(first.clone()).is_none());
        let displaced = slot.install(second.clone()).unwrap();

        assert!(Arc::ptr_eq(&displaced, &first));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(slot.active_id(), Some(2));
    }

    #[test]
    fn test_displaced_release_keeps_successor() {
        let slot = ActiveSlot::new();
        let first = SessionHandle::new(1);
        let second = SessionHandle::new(2);
        slot.install(first.clone());
        slot.install(second.clone());

        assert!(!slot.release(&first));
        assert_eq!(slot.active_id(), Some(2));

        assert!(slot.release(&second));
        assert_eq!(slot.active_id(), None);
        assert!(!slot.release(&second));
    }

    #[test]
    fn test_release_compares_identity() {
        let slot = ActiveSlot::new();
        slot.install(SessionHandle::new(7));

        // same id, different handle
        assert!(!slot.release(&SessionHandle::new(7)));
        assert_eq!(slot.active_id(), Some(7));
    }

    #[test]
    fn test_cancel_active() {
        let slot = ActiveSlot::new();
        assert_eq!(slot.cancel_active(), None);

        let handle = SessionHandle::new(3);
        slot.install(handle.clone());
        assert_eq!(slot.cancel_active(), Some(3));
        assert!(handle.is_cancelled());
        assert_eq!(slot.active_id(), None);
    }
}
