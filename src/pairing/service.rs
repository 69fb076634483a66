//! Entry-point facade: validation, admission, then orchestration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientVersion, PairingConfig};
use crate::error::PairingError;
use crate::pairing::credentials::CredentialStore;
use crate::pairing::gate::AdmissionGate;
use crate::pairing::orchestrator::{
    OrchestratorSettings, Outcome, PairingOrchestrator, SessionCompletion,
};
use crate::pairing::request::{PairingRequest, TargetId};
use crate::pairing::transport::TransportConnector;

/// Accepts raw pairing requests and admits at most one at a time.
pub struct PairingService {
    gate: Arc<AdmissionGate>,
    orchestrator: PairingOrchestrator,
    deadline: Duration,
    retry_after: Duration,
    client_version: ClientVersion,
}

impl PairingService {
    pub fn new(
        config: &PairingConfig,
        connector: Arc<dyn TransportConnector>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let gate = Arc::new(AdmissionGate::new());
        let orchestrator = PairingOrchestrator::new(
            connector,
            store,
            Arc::clone(&gate),
            OrchestratorSettings::from_config(config),
        );
        Self {
            gate,
            orchestrator,
            deadline: config.timings.deadline,
            retry_after: config.retry_after,
            client_version: config.client_version,
        }
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    pub fn client_version(&self) -> ClientVersion {
        self.client_version
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Validate, admit, and run one pairing attempt.
    pub async fn pair(&self, raw_target: &str) -> Result<Outcome, PairingError> {
        self.pair_with_completion(raw_target)
            .await
            .map(|(outcome, _)| outcome)
    }

    /// Like [`pair`](Self::pair), also returning the background completion.
    pub async fn pair_with_completion(
        &self,
        raw_target: &str,
    ) -> Result<(Outcome, Option<SessionCompletion>), PairingError> {
        let target = TargetId::parse(raw_target)?;

        if !self.gate.try_acquire() {
            tracing::info!(target = %target, "Pairing rejected: another session is in flight");
            return Err(PairingError::Busy {
                retry_after: self.retry_after,
            });
        }

        let request = PairingRequest::new(target);
        Ok(self.orchestrator.start(request, self.deadline).await)
    }

    /// Release the active session, if any. Used on shutdown.
    pub async fn shutdown(&self) -> bool {
        match self.gate.active_session() {
            Some(session) => {
                tracing::info!(request_id = %session.request_id(), "Releasing active session on shutdown");
                self.orchestrator.cleanup().release(&session).await
            }
            None => false,
        }
    }
}
