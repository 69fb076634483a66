//! Drives one pairing session from request to terminal outcome.
//!
//! ```text
//!  caller ──run()──► wipe stale creds ─► open transport ─► registered? ──yes──► Rejected
//!                                                              │no
//!                                                     request pairing code ──err──► Failed(kind)
//!                                                              │
//!  caller ◄──────────── CodeIssued(code) ◄─────────────────────┘
//!                                                              │ (background task)
//!                            events: creds.update ─► persist   ▼
//!                                    open ─► Linking ─► Linked ─► deliver artifact + notice
//!                                    closed ─► Closed | Failed(Unauthorized)
//!                                    deadline ─► TimedOut
//!                                                              │
//!                                               CleanupCoordinator::release (exactly once)
//! ```
//!
//! Everything before the code is issued happens on the caller's task and is
//! reported synchronously. Everything after runs on a spawned task; its
//! result is only visible through logs, the linked identity's inbox, and the
//! optional [`SessionCompletion`] handle.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{ClientVersion, PairingConfig, SessionTimings};
use crate::error::{CredentialStoreError, TransportError};
use crate::pairing::classify::{ErrorKind, classify, classify_close};
use crate::pairing::cleanup::CleanupCoordinator;
use crate::pairing::credentials::{CredentialStore, StagedCredentials};
use crate::pairing::gate::AdmissionGate;
use crate::pairing::notice::completion_notice;
use crate::pairing::request::{PairingRequest, TargetFormat};
use crate::pairing::session::SessionHandle;
use crate::pairing::stage::LifecycleStage;
use crate::pairing::transport::{
    ClientDescriptor, ConnectionState, SessionTransport, TransportConnector, TransportEvent,
};

/// Reason reported when the session already holds valid credentials.
pub const ALREADY_AUTHENTICATED: &str = "already-authenticated";

/// Result of a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// A pairing code was issued; linking continues in the background.
    CodeIssued(String),
    /// The remote side confirmed the link, for this identity when the
    /// transport reported one.
    LinkConfirmed(Option<String>),
    /// The attempt was refused without contacting the pairing flow.
    Rejected(String),
    /// `stage` is where the session was when the failure happened.
    Failed {
        kind: ErrorKind,
        stage: LifecycleStage,
        detail: String,
    },
    /// The orchestrator deadline elapsed before a terminal stage.
    TimedOut,
}

/// Per-session settings derived from the service configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub namespace: String,
    pub timings: SessionTimings,
    pub target_format: TargetFormat,
    pub client: ClientDescriptor,
    pub client_version: ClientVersion,
}

impl OrchestratorSettings {
    pub fn from_config(config: &PairingConfig) -> Self {
        Self {
            namespace: config.session_namespace.clone(),
            timings: config.timings.clone(),
            target_format: config.target_format,
            client: ClientDescriptor {
                browser: config.browser.clone(),
                version: config.client_version.0,
            },
            client_version: config.client_version,
        }
    }
}

/// Handle to the background half of a session.
#[derive(Debug)]
pub struct SessionCompletion {
    handle: JoinHandle<Outcome>,
}

impl SessionCompletion {
    /// Wait for the session's terminal outcome.
    pub async fn wait(self) -> Outcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Pairing session task did not complete: {}", e);
                Outcome::Failed {
                    kind: ErrorKind::Unknown,
                    stage: LifecycleStage::Linking,
                    detail: e.to_string(),
                }
            }
        }
    }
}

/// Owns the pairing state machine.
pub struct PairingOrchestrator {
    connector: Arc<dyn TransportConnector>,
    store: Arc<dyn CredentialStore>,
    cleanup: CleanupCoordinator,
    settings: OrchestratorSettings,
}

impl PairingOrchestrator {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        store: Arc<dyn CredentialStore>,
        gate: Arc<AdmissionGate>,
        settings: OrchestratorSettings,
    ) -> Self {
        let cleanup = CleanupCoordinator::new(gate, settings.timings.cleanup_grace);
        Self {
            connector,
            store,
            cleanup,
            settings,
        }
    }

    pub fn cleanup(&self) -> &CleanupCoordinator {
        &self.cleanup
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run a pairing attempt and return the synchronous outcome.
    ///
    /// The caller must already hold the admission gate. Background linking
    /// continues after `CodeIssued` is returned.
    pub async fn run(&self, request: PairingRequest, deadline: Duration) -> Outcome {
        self.start(request, deadline).await.0
    }

    /// Like [`run`](Self::run), also returning a handle to the background
    /// half when a code was issued.
    pub async fn start(
        &self,
        request: PairingRequest,
        deadline: Duration,
    ) -> (Outcome, Option<SessionCompletion>) {
        let span = tracing::info_span!(
            "pairing",
            request_id = %request.id,
            target = %request.target,
        );
        self.start_inner(request, deadline)
            .instrument(span)
            .await
    }

    async fn start_inner(
        &self,
        request: PairingRequest,
        deadline: Duration,
    ) -> (Outcome, Option<SessionCompletion>) {
        tracing::info!("Starting pairing process");
        let credentials =
            StagedCredentials::acquire(Arc::clone(&self.store), self.settings.namespace.clone())
                .await;
        let session = Arc::new(SessionHandle::new(request.id, credentials));
        self.cleanup.gate().attach(&session);

        let deadline_at = Instant::now() + deadline;
        let established =
            tokio::time::timeout_at(deadline_at, self.establish(&session, &request)).await;

        match established {
            Ok(Ok((code, events))) => {
                tracing::info!(stage = %session.stage(), "Pairing code generated");
                let driver = SessionDriver {
                    session,
                    cleanup: self.cleanup.clone(),
                    timings: self.settings.timings.clone(),
                    notice_target: request.target.normalized(self.settings.target_format),
                    client_version: self.settings.client_version,
                };
                let handle = tokio::spawn(
                    driver
                        .run(events, deadline_at)
                        .instrument(tracing::Span::current()),
                );
                (Outcome::CodeIssued(code), Some(SessionCompletion { handle }))
            }
            Ok(Err(outcome)) => {
                self.cleanup.release(&session).await;
                (outcome, None)
            }
            Err(_) => {
                advance(&session, LifecycleStage::TimedOut);
                tracing::warn!(?deadline, "Deadline elapsed before a pairing code was issued");
                self.cleanup.release(&session).await;
                (Outcome::TimedOut, None)
            }
        }
    }

    /// Open the transport and obtain a pairing code.
    ///
    /// `Err` carries the synchronous outcome for every early exit.
    async fn establish(
        &self,
        session: &SessionHandle,
        request: &PairingRequest,
    ) -> Result<(String, mpsc::Receiver<TransportEvent>), Outcome> {
        advance(session, LifecycleStage::Connecting);

        let state = session
            .credentials()
            .load()
            .await
            .map_err(|e| fail_store(session, &e))?;
        let opened = self
            .connector
            .open(state, &self.settings.client)
            .await
            .map_err(|e| fail_transport(session, &e))?;
        session.attach_transport(Arc::clone(&opened.transport));
        tracing::debug!("Transport opened");

        if !self.settings.timings.connect_settle.is_zero() {
            tokio::time::sleep(self.settings.timings.connect_settle).await;
        }

        if let Some(identity) = opened.transport.registered_identity() {
            tracing::warn!(%identity, "Session already authenticated");
            advance(session, LifecycleStage::Closed);
            return Err(Outcome::Rejected(ALREADY_AUTHENTICATED.to_string()));
        }

        advance(session, LifecycleStage::AwaitingCode);
        let target = request.target.normalized(self.settings.target_format);
        tracing::info!(%target, "Requesting pairing code");

        let code = opened
            .transport
            .request_pairing_code(&target)
            .await
            .map_err(|e| fail_transport(session, &e))?;
        session.set_code(code.clone());
        advance(session, LifecycleStage::CodeIssued);

        Ok((code, opened.events))
    }
}

/// Background half of a session: consumes transport events until terminal.
struct SessionDriver {
    session: Arc<SessionHandle>,
    cleanup: CleanupCoordinator,
    timings: SessionTimings,
    notice_target: String,
    client_version: ClientVersion,
}

impl SessionDriver {
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>, deadline_at: Instant) -> Outcome {
        self.session.mark_observers_attached();
        tracing::info!("Waiting for user to complete pairing");

        let outcome = match AssertUnwindSafe(self.drive(&mut events, deadline_at))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!("Pairing session panicked");
                let stage = self.session.stage();
                advance(&self.session, LifecycleStage::Failed);
                Outcome::Failed {
                    kind: ErrorKind::Unknown,
                    stage,
                    detail: "pairing session panicked".to_string(),
                }
            }
        };

        events.close();
        self.cleanup.release(&self.session).await;
        outcome
    }

    async fn drive(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        deadline_at: Instant,
    ) -> Outcome {
        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.session.released() => return self.on_released(),
                _ = &mut deadline => {
                    advance(&self.session, LifecycleStage::TimedOut);
                    tracing::warn!(stage = %self.session.stage(), "Pairing deadline elapsed");
                    return Outcome::TimedOut;
                }
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::CredentialsUpdated(snapshot)) => {
                    // The namespace may already belong to a newer session.
                    if self.session.is_released() {
                        return self.on_released();
                    }
                    if let Err(e) = self.session.credentials().persist(&snapshot).await {
                        tracing::warn!("Failed to persist rotated credentials: {}", e);
                    }
                }
                Some(TransportEvent::Connection { state, reason }) => {
                    tracing::info!(state = connection_name(state), "Connection update");
                    match state {
                        ConnectionState::Connecting => {}
                        ConnectionState::Open => return self.on_linked(deadline_at).await,
                        ConnectionState::Closed => return self.on_closed(reason),
                    }
                }
                None => {
                    if self.session.is_released() {
                        return self.on_released();
                    }
                    let stage = self.session.stage();
                    advance(&self.session, LifecycleStage::Closed);
                    tracing::warn!("Transport event stream ended");
                    return Outcome::Failed {
                        kind: ErrorKind::Transient,
                        stage,
                        detail: "transport event stream ended".to_string(),
                    };
                }
            }
        }
    }

    /// Released from outside the driver, e.g. on shutdown. Cleanup already
    /// ran; nothing may touch the transport or the namespace any more.
    fn on_released(&self) -> Outcome {
        let stage = self.session.stage();
        advance(&self.session, LifecycleStage::Closed);
        tracing::info!(%stage, "Session released before completion, stopping");
        Outcome::Failed {
            kind: ErrorKind::Transient,
            stage,
            detail: "session released before completion".to_string(),
        }
    }

    fn on_closed(&self, reason: Option<TransportError>) -> Outcome {
        let kind = classify_close(reason.as_ref());
        let stage = self.session.stage();
        let detail = reason
            .map(|r| r.message)
            .unwrap_or_else(|| "connection closed".to_string());

        if kind == ErrorKind::Unauthorized {
            advance(&self.session, LifecycleStage::Failed);
            tracing::warn!(%kind, %detail, "Authentication failed, cleaning up");
        } else {
            advance(&self.session, LifecycleStage::Closed);
            tracing::info!(%kind, %detail, "Connection closed");
        }
        Outcome::Failed {
            kind,
            stage,
            detail,
        }
    }

    async fn on_linked(&self, deadline_at: Instant) -> Outcome {
        advance(&self.session, LifecycleStage::Linking);
        let transport = self.session.transport();
        let identity = transport.as_ref().and_then(|t| t.linked_identity());
        if let Some(identity) = &identity {
            self.session.set_linked_identity(identity.clone());
        }
        advance(&self.session, LifecycleStage::Linked);
        match &identity {
            Some(identity) => tracing::info!(%identity, "Device successfully paired"),
            None => tracing::warn!("Device paired but the transport reported no identity"),
        }

        // Delivery is best-effort: nothing below may change the outcome.
        let delivery = AssertUnwindSafe(self.deliver(transport, identity.as_deref())).catch_unwind();
        tokio::select! {
            biased;
            _ = self.session.released() => {
                tracing::info!("Session released during delivery, abandoning it");
                return Outcome::LinkConfirmed(identity.clone());
            }
            delivered = tokio::time::timeout_at(deadline_at, delivery) => match delivered {
                Ok(Ok(Ok(delivered))) => tracing::info!(?delivered, "Post-link delivery finished"),
                Ok(Ok(Err(e))) => tracing::warn!("Error sending messages: {}", e),
                Ok(Err(_)) => tracing::warn!("Post-link delivery panicked"),
                Err(_) => tracing::warn!("Post-link delivery did not finish before the deadline"),
            },
        }

        if !self.timings.linger.is_zero() {
            tokio::select! {
                _ = self.session.released() => {}
                _ = tokio::time::sleep(self.timings.linger) => {}
            }
        }
        Outcome::LinkConfirmed(identity)
    }

    /// Send the credential artifact and a completion notice to the new identity.
    async fn deliver(
        &self,
        transport: Option<Arc<dyn SessionTransport>>,
        identity: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        if !self.timings.stabilization.is_zero() {
            tokio::time::sleep(self.timings.stabilization).await;
        }

        if self.session.is_released() {
            return Ok(Delivery::Released);
        }
        let Some(artifact) = self.session.credentials().read_artifact().await? else {
            return Ok(Delivery::NoArtifact);
        };
        let (Some(transport), Some(identity)) = (transport, identity) else {
            return Ok(Delivery::NoIdentity);
        };

        let text = String::from_utf8_lossy(&artifact);
        transport.send_message(identity, &text).await?;
        let notice = completion_notice(&self.notice_target, identity, self.client_version);
        transport.send_message(identity, &notice).await?;
        Ok(Delivery::Sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    NoArtifact,
    NoIdentity,
    Released,
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error("reading credential artifact: {0}")]
    Artifact(#[from] CredentialStoreError),

    #[error("sending message: {0}")]
    Send(#[from] TransportError),
}

fn connection_name(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open => "open",
        ConnectionState::Closed => "closed",
    }
}

/// Apply a stage transition, logging instead of failing on an illegal one.
fn advance(session: &SessionHandle, next: LifecycleStage) {
    if let Err(e) = session.transition(next) {
        tracing::warn!("{}", e);
    }
}

fn fail_transport(session: &SessionHandle, err: &TransportError) -> Outcome {
    let kind = classify(err);
    let stage = session.stage();
    advance(session, LifecycleStage::Failed);
    tracing::error!(%kind, %stage, status = ?err.status_code, "Pairing failed: {}", err);
    Outcome::Failed {
        kind,
        stage,
        detail: err.message.clone(),
    }
}

fn fail_store(session: &SessionHandle, err: &CredentialStoreError) -> Outcome {
    let stage = session.stage();
    advance(session, LifecycleStage::Failed);
    tracing::error!(%stage, "Failed to load credential state: {}", err);
    Outcome::Failed {
        kind: ErrorKind::Unknown,
        stage,
        detail: err.to_string(),
    }
}
