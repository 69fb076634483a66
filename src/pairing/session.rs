//! The live pairing session handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use uuid::Uuid;

use crate::pairing::credentials::StagedCredentials;
use crate::pairing::stage::{InvalidTransition, LifecycleStage};
use crate::pairing::transport::SessionTransport;

#[derive(Default)]
struct SessionState {
    stage: LifecycleStage,
    transport: Option<Arc<dyn SessionTransport>>,
    code: Option<String>,
    linked_identity: Option<String>,
}

/// Everything one in-flight pairing attempt owns.
///
/// The orchestrator is the only writer. The admission gate may hold a weak
/// reference for out-of-band cleanup.
pub struct SessionHandle {
    request_id: Uuid,
    credentials: StagedCredentials,
    state: Mutex<SessionState>,
    observers_attached: AtomicBool,
    released: AtomicBool,
    release_signal: Notify,
}

impl SessionHandle {
    pub fn new(request_id: Uuid, credentials: StagedCredentials) -> Self {
        Self {
            request_id,
            credentials,
            state: Mutex::new(SessionState::default()),
            observers_attached: AtomicBool::new(false),
            released: AtomicBool::new(false),
            release_signal: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        // State stays consistent across a poisoning panic: every write is a
        // single field assignment.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn credentials(&self) -> &StagedCredentials {
        &self.credentials
    }

    pub fn stage(&self) -> LifecycleStage {
        self.state().stage
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&self, next: LifecycleStage) -> Result<LifecycleStage, InvalidTransition> {
        let mut state = self.state();
        let from = state.stage;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        state.stage = next;
        tracing::debug!(request_id = %self.request_id, %from, to = %next, "Stage transition");
        Ok(from)
    }

    pub fn attach_transport(&self, transport: Arc<dyn SessionTransport>) {
        self.state().transport = Some(transport);
    }

    pub fn transport(&self) -> Option<Arc<dyn SessionTransport>> {
        self.state().transport.clone()
    }

    pub fn set_code(&self, code: impl Into<String>) {
        self.state().code = Some(code.into());
    }

    pub fn code(&self) -> Option<String> {
        self.state().code.clone()
    }

    pub fn set_linked_identity(&self, identity: impl Into<String>) {
        self.state().linked_identity = Some(identity.into());
    }

    pub fn linked_identity(&self) -> Option<String> {
        self.state().linked_identity.clone()
    }

    /// Record that event observers are consuming the transport.
    pub fn mark_observers_attached(&self) {
        self.observers_attached.store(true, Ordering::SeqCst);
    }

    pub fn observers_attached(&self) -> bool {
        self.observers_attached.load(Ordering::SeqCst)
    }

    /// Claim the right to release. Only the first caller gets `true`.
    pub(crate) fn claim_release(&self) -> bool {
        let claimed = !self.released.swap(true, Ordering::SeqCst);
        if claimed {
            self.release_signal.notify_waiters();
        }
        claimed
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Resolves once the session has been released, by any path.
    pub async fn released(&self) {
        loop {
            // Registered before the check so a release in between is not lost.
            let notified = self.release_signal.notified();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("request_id", &self.request_id)
            .field("stage", &self.stage())
            .field("namespace", &self.credentials.namespace())
            .field("released", &self.is_released())
            .finish()
    }
}
