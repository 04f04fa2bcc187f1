//! Secondary tier: the replicated document store.
//!
//! The replica holds JSON documents keyed by the same namespaced keys the
//! cache uses. Reads go through a short bounded retry (the replica is not
//! rate-limited); a missing document is a tier miss, not an outage. The
//! single conversion at this boundary is the serde decode into the
//! engine's normalized type.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::retry::{retry, RetryConfig};

use super::traits::{DataTier, TierError, TierName};

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("replica unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Boundary to the replicated store. Documents are opaque JSON; the tier
/// decodes them into typed payloads.
#[async_trait]
pub trait ReplicaClient: Send + Sync {
    /// One-shot read. `Ok(None)` means the document does not exist.
    async fn get_by_key(&self, key: &str) -> Result<Option<Value>, ReplicaError>;

    /// Write-back target: upsert a document. Called only from the sync
    /// queue, never on the read path.
    async fn put(&self, key: &str, value: Value) -> Result<(), ReplicaError>;
}

/// The secondary tier adapter, generic over the decoded payload type.
pub struct ReplicaTier<T> {
    client: Arc<dyn ReplicaClient>,
    /// Document namespace, e.g. "realtime" or "station"
    namespace: &'static str,
    retry: RetryConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ReplicaTier<T> {
    #[must_use]
    pub fn new(client: Arc<dyn ReplicaClient>, namespace: &'static str) -> Self {
        Self {
            client,
            namespace,
            retry: RetryConfig::query(),
            _marker: PhantomData,
        }
    }

    fn document_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl<T> DataTier<T> for ReplicaTier<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> TierName {
        TierName::Secondary
    }

    async fn fetch(&self, key: &str) -> Result<T, TierError> {
        let doc_key = self.document_key(key);

        let doc = retry("replica_get", &self.retry, || {
            self.client.get_by_key(&doc_key)
        })
        .await
        .map_err(|e| TierError::Unavailable(e.to_string()))?;

        let value = doc.ok_or(TierError::NotFound)?;
        serde_json::from_value(value).map_err(|e| TierError::Malformed(e.to_string()))
    }
}
