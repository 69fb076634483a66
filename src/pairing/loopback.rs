//! In-process loopback transport.
//!
//! Stands in for a real linking protocol during local runs and tests. The
//! behavior is driven by a [`LoopbackScript`]; a [`LoopbackControl`] handle
//! injects connection events and records what the coordinator did.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::pairing::transport::{
    ClientDescriptor, ConnectionState, CredentialSnapshot, CredentialState, EVENT_CHANNEL_CAPACITY,
    OpenedTransport, SessionTransport, TransportConnector, TransportEvent,
};

/// Characters used for generated pairing codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTVWXYZ0123456789";

/// Scripted behavior for loopback transports.
#[derive(Debug, Clone, Default)]
pub struct LoopbackScript {
    /// Fixed pairing code; a random `XXXX-XXXX` code when unset.
    pub code: Option<String>,
    /// Fail `open` with this error.
    pub open_error: Option<TransportError>,
    /// Fail `request_pairing_code` with this error.
    pub code_error: Option<TransportError>,
    /// Report pre-existing valid credentials for this identity.
    pub registered_identity: Option<String>,
    /// Fail every `send_message` with this error.
    pub send_error: Option<TransportError>,
    /// Confirm the link by itself this long after a code is issued.
    pub auto_link_after: Option<Duration>,
}

/// Generate a random `XXXX-XXXX` pairing code.
pub fn generate_pairing_code() -> String {
    let mut rng = rand::thread_rng();
    let chars: String = (0..8)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

struct LoopbackInner {
    script: LoopbackScript,
    /// Dropped on close so the coordinator's event stream ends.
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    credentials: CredentialState,
    linked: Mutex<Option<String>>,
    requested_targets: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String)>>,
    closes: AtomicU32,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Test and demo handle for one opened loopback transport.
#[derive(Clone)]
pub struct LoopbackControl {
    inner: Arc<LoopbackInner>,
}

impl LoopbackControl {
    /// Deliver an arbitrary event to the coordinator.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = locked(&self.inner.events).clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the remote side confirming the link as `identity`.
    pub async fn link(&self, identity: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        let identity = identity.into();
        *locked(&self.inner.linked) = Some(identity.clone());
        let snapshot = CredentialSnapshot(serde_json::json!({
            "me": { "id": identity },
            "registered": true,
        }));
        self.emit(TransportEvent::connection(ConnectionState::Connecting))
            .await
            && self.emit(TransportEvent::CredentialsUpdated(snapshot)).await
            && self.emit(TransportEvent::connection(ConnectionState::Open)).await
    }

    /// Simulate the remote side closing the connection.
    pub async fn close_with(&self, reason: TransportError) -> bool {
        self.emit(TransportEvent::closed_with(reason)).await
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        locked(&self.inner.sent).clone()
    }

    pub fn requested_targets(&self) -> Vec<String> {
        locked(&self.inner.requested_targets).clone()
    }

    pub fn close_count(&self) -> u32 {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Credential state the transport was opened with.
    pub fn opened_with(&self) -> CredentialState {
        self.inner.credentials.clone()
    }
}

struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

#[async_trait]
impl SessionTransport for LoopbackTransport {
    fn registered_identity(&self) -> Option<String> {
        self.inner.script.registered_identity.clone()
    }

    fn linked_identity(&self) -> Option<String> {
        locked(&self.inner.linked).clone()
    }

    async fn request_pairing_code(&self, target: &str) -> Result<String, TransportError> {
        locked(&self.inner.requested_targets).push(target.to_string());
        if let Some(err) = &self.inner.script.code_error {
            return Err(err.clone());
        }
        let code = self
            .inner
            .script
            .code
            .clone()
            .unwrap_or_else(generate_pairing_code);

        if let Some(delay) = self.inner.script.auto_link_after {
            let control = LoopbackControl {
                inner: Arc::clone(&self.inner),
            };
            let identity = format!(
                "{}@s.whatsapp.net",
                target.trim_start_matches('+')
            );
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                control.link(identity).await;
            });
        }
        Ok(code)
    }

    async fn send_message(&self, identity: &str, text: &str) -> Result<(), TransportError> {
        if let Some(err) = &self.inner.script.send_error {
            return Err(err.clone());
        }
        if self.inner.closes.load(Ordering::SeqCst) > 0 {
            return Err(TransportError::new("connection closed"));
        }
        locked(&self.inner.sent).push((identity.to_string(), text.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        locked(&self.inner.events).take();
    }
}

/// Connector producing loopback transports.
#[derive(Default)]
pub struct LoopbackConnector {
    script: LoopbackScript,
    opens: AtomicU32,
    last: Mutex<Option<LoopbackControl>>,
}

impl LoopbackConnector {
    pub fn new(script: LoopbackScript) -> Self {
        Self {
            script,
            opens: AtomicU32::new(0),
            last: Mutex::new(None),
        }
    }

    /// Number of `open` calls, including failed ones.
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Control handle for the most recently opened transport.
    pub fn control(&self) -> Option<LoopbackControl> {
        locked(&self.last).clone()
    }
}

#[async_trait]
impl TransportConnector for LoopbackConnector {
    async fn open(
        &self,
        credentials: CredentialState,
        client: &ClientDescriptor,
    ) -> Result<OpenedTransport, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            namespace = %credentials.namespace,
            browser = ?client.browser,
            version = ?client.version,
            "Opening loopback transport"
        );
        if let Some(err) = &self.script.open_error {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(LoopbackInner {
            script: self.script.clone(),
            events: Mutex::new(Some(tx)),
            credentials,
            linked: Mutex::new(None),
            requested_targets: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closes: AtomicU32::new(0),
        });
        *locked(&self.last) = Some(LoopbackControl {
            inner: Arc::clone(&inner),
        });

        Ok(OpenedTransport {
            transport: Arc::new(LoopbackTransport { inner }),
            events: rx,
        })
    }
}
