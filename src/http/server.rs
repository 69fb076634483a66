//! Listener lifecycle for the pairing router.

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ServerError;

/// Binds a listener and serves one router until told to stop.
pub struct PairingServer {
    addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PairingServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Address actually bound, once started. Differs from the configured
    /// address when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the server task.
    pub async fn start(&mut self, app: Router) -> Result<SocketAddr, ServerError> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                addr: self.addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::BindFailed {
            addr: self.addr.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Pairing server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Pairing server shutting down");
                })
                .await
            {
                tracing::error!("Pairing server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn start_and_shutdown_lifecycle() {
        let mut server = PairingServer::new(any_port());
        let bound = server
            .start(Router::new())
            .await
            .expect("server should start on port 0");
        assert_ne!(bound.port(), 0);
        assert_eq!(server.local_addr(), Some(bound));
        assert!(server.handle.is_some());

        server.shutdown().await;
        assert!(server.handle.is_none());
        assert!(server.shutdown_tx.is_none());
    }

    #[tokio::test]
    async fn start_on_occupied_port_returns_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let occupied = listener.local_addr().unwrap();

        let mut server = PairingServer::new(occupied);
        match server.start(Router::new()).await {
            Err(ServerError::BindFailed { addr, .. }) => assert_eq!(addr, occupied.to_string()),
            other => panic!("expected BindFailed, got {:?}", other),
        }
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn shutdown_when_not_started_is_noop() {
        let mut server = PairingServer::new(any_port());
        server.shutdown().await;
    }
}
