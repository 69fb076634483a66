//! The session transport seam.
//!
//! A transport speaks the remote linking protocol. The coordinator never
//! touches the wire; it opens a transport through a [`TransportConnector`],
//! calls the handful of operations below, and consumes [`TransportEvent`]s
//! from the channel returned by `open`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Buffer size for transport event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Connection lifecycle signal reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Rotated key material emitted by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSnapshot(pub serde_json::Value);

/// Credential material handed to the transport on open.
#[derive(Debug, Clone, Default)]
pub struct CredentialState {
    pub namespace: String,
    /// Previously persisted artifact, if any.
    pub artifact: Option<Vec<u8>>,
}

/// Client identity advertised to the remote service.
#[derive(Debug, Clone)]
pub struct ClientDescriptor {
    pub browser: [String; 3],
    pub version: [u32; 3],
}

/// Asynchronous notifications from an open transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    CredentialsUpdated(CredentialSnapshot),
    Connection {
        state: ConnectionState,
        /// Present on `Closed` when the transport knows why.
        reason: Option<TransportError>,
    },
}

impl TransportEvent {
    pub fn connection(state: ConnectionState) -> Self {
        TransportEvent::Connection { state, reason: None }
    }

    pub fn closed_with(reason: TransportError) -> Self {
        TransportEvent::Connection {
            state: ConnectionState::Closed,
            reason: Some(reason),
        }
    }
}

/// An open transport plus its event stream.
pub struct OpenedTransport {
    pub transport: Arc<dyn SessionTransport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transports. `open` resolves once the connection is ready.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(
        &self,
        credentials: CredentialState,
        client: &ClientDescriptor,
    ) -> Result<OpenedTransport, TransportError>;
}

/// Operations on one open transport.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Identity of pre-existing valid credentials, if the session is already registered.
    fn registered_identity(&self) -> Option<String>;

    /// Identity confirmed by the remote side once linked.
    fn linked_identity(&self) -> Option<String>;

    /// Ask the remote service for a pairing code for `target`.
    async fn request_pairing_code(&self, target: &str) -> Result<String, TransportError>;

    /// Send a text message to `identity`. Only valid after `Open`.
    async fn send_message(&self, identity: &str, text: &str) -> Result<(), TransportError>;

    /// Close the connection. Must be idempotent.
    async fn close(&self);
}
