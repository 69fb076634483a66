//! Credential storage for pairing sessions.
//!
//! Key material is staged under a namespace for the lifetime of one session
//! and wiped when the session ends. Storage is best-effort cleanup, not a
//! durability guarantee: wipe failures are retried and then logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CredentialStoreError;
use crate::pairing::transport::{CredentialSnapshot, CredentialState};

/// File name of the persisted credential artifact within a namespace.
pub const ARTIFACT_FILE: &str = "creds.json";

/// Wipe attempts made when releasing a namespace.
const WIPE_ATTEMPTS: u32 = 3;

/// Delay between wipe attempts.
const WIPE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Namespaced key-material persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Remove everything stored under `namespace`. Succeeds if nothing exists.
    async fn wipe(&self, namespace: &str) -> Result<(), CredentialStoreError>;

    /// Read the credential artifact, or `None` if it was never written.
    async fn read_artifact(&self, namespace: &str) -> Result<Option<Vec<u8>>, CredentialStoreError>;

    /// Persist rotated credentials as the namespace's artifact.
    async fn persist(
        &self,
        namespace: &str,
        snapshot: &CredentialSnapshot,
    ) -> Result<(), CredentialStoreError>;

    /// Credential state to hand to a transport on open.
    async fn load(&self, namespace: &str) -> Result<CredentialState, CredentialStoreError> {
        Ok(CredentialState {
            namespace: namespace.to_string(),
            artifact: self.read_artifact(namespace).await?,
        })
    }
}

/// Filesystem store: `<root>/<namespace>/creds.json`.
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    root: PathBuf,
}

impl FsCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn artifact_path(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join(ARTIFACT_FILE)
    }
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    async fn wipe(&self, namespace: &str) -> Result<(), CredentialStoreError> {
        let dir = self.namespace_dir(namespace);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialStoreError::WipeFailed {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn read_artifact(&self, namespace: &str) -> Result<Option<Vec<u8>>, CredentialStoreError> {
        match tokio::fs::read(self.artifact_path(namespace)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CredentialStoreError::ReadFailed {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn persist(
        &self,
        namespace: &str,
        snapshot: &CredentialSnapshot,
    ) -> Result<(), CredentialStoreError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let persist_failed = |e: std::io::Error| CredentialStoreError::PersistFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(self.namespace_dir(namespace))
            .await
            .map_err(persist_failed)?;

        // Write then rename so a concurrent reader never sees a torn file.
        let path = self.artifact_path(namespace);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(persist_failed)?;
        tokio::fs::rename(&tmp, &path).await.map_err(persist_failed)?;
        Ok(())
    }
}

/// A namespace owned by one session.
///
/// Acquired at session start (wiping anything stale) and released at the
/// terminal transition with retry-then-log semantics.
#[derive(Clone)]
pub struct StagedCredentials {
    store: Arc<dyn CredentialStore>,
    namespace: String,
}

impl StagedCredentials {
    /// Take ownership of `namespace`, wiping any stale content first.
    ///
    /// A failed stale wipe is logged; the session proceeds.
    pub async fn acquire(store: Arc<dyn CredentialStore>, namespace: impl Into<String>) -> Self {
        let staged = Self {
            store,
            namespace: namespace.into(),
        };
        if let Err(e) = staged.store.wipe(&staged.namespace).await {
            tracing::warn!(namespace = %staged.namespace, "Failed to wipe stale credentials: {}", e);
        }
        staged
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn load(&self) -> Result<CredentialState, CredentialStoreError> {
        self.store.load(&self.namespace).await
    }

    pub async fn persist(&self, snapshot: &CredentialSnapshot) -> Result<(), CredentialStoreError> {
        self.store.persist(&self.namespace, snapshot).await
    }

    pub async fn read_artifact(&self) -> Result<Option<Vec<u8>>, CredentialStoreError> {
        self.store.read_artifact(&self.namespace).await
    }

    /// Wipe the namespace, retrying a few times. Returns whether it succeeded.
    pub async fn release(&self) -> bool {
        for attempt in 1..=WIPE_ATTEMPTS {
            match self.store.wipe(&self.namespace).await {
                Ok(()) => {
                    tracing::debug!(namespace = %self.namespace, "Credential namespace wiped");
                    return true;
                }
                Err(e) if attempt < WIPE_ATTEMPTS => {
                    tracing::debug!(
                        namespace = %self.namespace,
                        attempt,
                        "Credential wipe failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(WIPE_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::warn!(
                        namespace = %self.namespace,
                        attempts = WIPE_ATTEMPTS,
                        "Giving up on credential wipe: {}",
                        e
                    );
                }
            }
        }
        false
    }
}

impl std::fmt::Debug for StagedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedCredentials")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
