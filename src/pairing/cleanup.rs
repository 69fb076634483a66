//! Session teardown.

use std::sync::Arc;
use std::time::Duration;

use crate::pairing::gate::AdmissionGate;
use crate::pairing::session::SessionHandle;

/// Releases everything a session holds, exactly once.
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    gate: Arc<AdmissionGate>,
    grace: Duration,
}

impl CleanupCoordinator {
    /// `grace` is waited before wiping credentials when observers were
    /// attached, so a credential write racing the terminal event lands first.
    pub fn new(gate: Arc<AdmissionGate>, grace: Duration) -> Self {
        Self { gate, grace }
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Close the transport, clear the gate, and wipe staged credentials.
    ///
    /// Returns `true` only for the call that performed the release. Never
    /// fails: a closed or never-opened transport is fine, and credential
    /// wipe failures are logged by [`StagedCredentials::release`].
    ///
    /// [`StagedCredentials::release`]: crate::pairing::credentials::StagedCredentials::release
    pub async fn release(&self, session: &SessionHandle) -> bool {
        if !session.claim_release() {
            tracing::debug!(request_id = %session.request_id(), "Session already released");
            return false;
        }

        if let Some(transport) = session.transport() {
            transport.close().await;
        }

        self.gate.release();
        tracing::info!(
            request_id = %session.request_id(),
            stage = %session.stage(),
            "Pairing session released"
        );

        if session.observers_attached() && !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        // The gate dropped this session's reference above; any attached
        // session now is a newer one that already wiped the namespace.
        if let Some(newer) = self.gate.active_session() {
            tracing::info!(
                request_id = %session.request_id(),
                newer = %newer.request_id(),
                "Namespace taken over by a newer session, skipping wipe"
            );
            return true;
        }
        session.credentials().release().await;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::error::TransportError;
    use crate::pairing::credentials::{CredentialStore, FsCredentialStore, StagedCredentials};
    use crate::pairing::transport::{CredentialSnapshot, SessionTransport};

    #[derive(Default)]
    struct CountingTransport {
        closes: AtomicU32,
    }

    #[async_trait]
    impl SessionTransport for CountingTransport {
        fn registered_identity(&self) -> Option<String> {
            None
        }

        fn linked_identity(&self) -> Option<String> {
            None
        }

        async fn request_pairing_code(&self, _: &str) -> Result<String, TransportError> {
            Ok("ABCD-1234".to_string())
        }

        async fn send_message(&self, _: &str, _: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn session_in(dir: &TempDir) -> (Arc<SessionHandle>, Arc<FsCredentialStore>) {
        let store = Arc::new(FsCredentialStore::new(dir.path()));
        let staged = StagedCredentials::acquire(store.clone(), "session").await;
        (Arc::new(SessionHandle::new(Uuid::new_v4(), staged)), store)
    }

    #[tokio::test]
    async fn release_runs_once() {
        let dir = TempDir::new().unwrap();
        let (session, store) = session_in(&dir).await;
        let transport = Arc::new(CountingTransport::default());
        session.attach_transport(transport.clone());
        store
            .persist("session", &CredentialSnapshot(serde_json::json!({"k": 1})))
            .await
            .unwrap();

        let gate = Arc::new(AdmissionGate::new());
        assert!(gate.try_acquire());
        gate.attach(&session);
        let cleanup = CleanupCoordinator::new(gate.clone(), Duration::ZERO);

        assert!(cleanup.release(&session).await);
        assert!(!cleanup.release(&session).await);

        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
        assert!(!gate.is_busy());
        assert!(gate.active_session().is_none());
        assert!(store.read_artifact("session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_without_transport_still_clears_gate() {
        let dir = TempDir::new().unwrap();
        let (session, _store) = session_in(&dir).await;
        let gate = Arc::new(AdmissionGate::new());
        assert!(gate.try_acquire());
        let cleanup = CleanupCoordinator::new(gate.clone(), Duration::from_secs(3));

        assert!(cleanup.release(&session).await);
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn grace_applies_only_with_observers() {
        let dir = TempDir::new().unwrap();
        let (session, _store) = session_in(&dir).await;
        session.mark_observers_attached();
        let gate = Arc::new(AdmissionGate::new());
        assert!(gate.try_acquire());
        let cleanup = CleanupCoordinator::new(gate.clone(), Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        assert!(cleanup.release(&session).await);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn newer_session_keeps_its_namespace() {
        let dir = TempDir::new().unwrap();
        let (old, store) = session_in(&dir).await;
        old.mark_observers_attached();
        let gate = Arc::new(AdmissionGate::new());
        assert!(gate.try_acquire());
        gate.attach(&old);
        let cleanup = CleanupCoordinator::new(gate.clone(), Duration::from_millis(300));

        let releasing = {
            let cleanup = cleanup.clone();
            let old = old.clone();
            tokio::spawn(async move { cleanup.release(&old).await })
        };
        tokio::task::yield_now().await;
        assert!(!gate.is_busy());

        // A new session is admitted and persists during the grace window.
        assert!(gate.try_acquire());
        let (newer, _) = session_in(&dir).await;
        gate.attach(&newer);
        store
            .persist("session", &CredentialSnapshot(serde_json::json!({"me": "new"})))
            .await
            .unwrap();

        assert!(releasing.await.unwrap());
        assert!(store.read_artifact("session").await.unwrap().is_some());
    }
}
