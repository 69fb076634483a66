//! Single-flight device pairing.
//!
//! One pairing attempt runs at a time. A request is validated, admitted by
//! the [`AdmissionGate`], and driven by the [`PairingOrchestrator`] through
//! connect, code issuance, and linking. The [`CleanupCoordinator`] closes the
//! transport, clears the gate, and wipes staged credentials on every exit.

mod classify;
mod cleanup;
pub mod credentials;
mod gate;
pub mod loopback;
mod notice;
mod orchestrator;
mod request;
mod service;
mod session;
mod stage;
pub mod transport;

pub use classify::{ErrorKind, classify, classify_close};
pub use cleanup::CleanupCoordinator;
pub use credentials::{CredentialStore, FsCredentialStore, StagedCredentials};
pub use gate::AdmissionGate;
pub use loopback::{LoopbackConnector, LoopbackControl, LoopbackScript};
pub use notice::completion_notice;
pub use orchestrator::{
    ALREADY_AUTHENTICATED, OrchestratorSettings, Outcome, PairingOrchestrator, SessionCompletion,
};
pub use request::{PairingRequest, TargetFormat, TargetId};
pub use service::PairingService;
pub use session::SessionHandle;
pub use stage::{InvalidTransition, LifecycleStage};
pub use transport::{
    ClientDescriptor, ConnectionState, CredentialSnapshot, CredentialState, OpenedTransport,
    SessionTransport, TransportConnector, TransportEvent,
};
