//! Single-flight admission for pairing sessions.
//!
//! ```text
//! request arrives  --> try_acquire()  (false => Busy, nothing touched)
//! session created  --> attach(&handle)
//! terminal stage   --> release()      (idempotent)
//! shutdown         --> active_session() for out-of-band cleanup
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::pairing::session::SessionHandle;

/// Process-wide latch allowing at most one pairing attempt in flight.
///
/// Holds only a weak reference to the active session; ownership stays with
/// the orchestrator.
#[derive(Debug, Default)]
pub struct AdmissionGate {
    busy: AtomicBool,
    active: Mutex<Weak<SessionHandle>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the gate. Returns `false` without mutation if busy.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the gate and drop the session reference. Safe to call repeatedly.
    pub fn release(&self) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Weak::new();
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Record the session admitted by the last successful `try_acquire`.
    pub fn attach(&self, session: &Arc<SessionHandle>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(session);
    }

    /// The active session, if it is still alive.
    pub fn active_session(&self) -> Option<Arc<SessionHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::pairing::credentials::{FsCredentialStore, StagedCredentials};

    #[test]
    fn second_acquire_is_rejected() {
        let gate = AdmissionGate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert!(gate.is_busy());
    }

    #[test]
    fn release_is_idempotent() {
        let gate = AdmissionGate::new();
        assert!(gate.try_acquire());
        gate.release();
        gate.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire());
    }

    #[test]
    fn concurrent_acquires_admit_exactly_one() {
        let gate = Arc::new(AdmissionGate::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.try_acquire())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn weak_reference_does_not_own_session() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsCredentialStore::new(dir.path()));
        let staged = StagedCredentials::acquire(store, "session").await;
        let session = Arc::new(SessionHandle::new(Uuid::new_v4(), staged));

        let gate = AdmissionGate::new();
        assert!(gate.try_acquire());
        gate.attach(&session);
        assert_eq!(
            gate.active_session().map(|s| s.request_id()),
            Some(session.request_id())
        );

        drop(session);
        assert!(gate.active_session().is_none());
        // Still busy until explicitly released.
        assert!(gate.is_busy());
    }

    #[tokio::test]
    async fn release_drops_session_reference() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsCredentialStore::new(dir.path()));
        let staged = StagedCredentials::acquire(store, "session").await;
        let session = Arc::new(SessionHandle::new(Uuid::new_v4(), staged));

        let gate = AdmissionGate::new();
        assert!(gate.try_acquire());
        gate.attach(&session);
        gate.release();
        assert!(gate.active_session().is_none());
    }
}
