//! Last-resort tier: the local cache.
//!
//! Reads through [`CacheStore::peek`]: expiry is respected (an expired
//! entry is a tier miss here) but nothing is removed, so the entry stays
//! available for the coordinator's stale-if-error read after the whole
//! chain is exhausted.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::cache::CacheStore;

use super::traits::{DataTier, TierError, TierName};

pub struct CacheTier<T> {
    store: Arc<CacheStore>,
    /// Cache namespace, e.g. "realtime" or "station"
    namespace: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CacheTier<T> {
    #[must_use]
    pub fn new(store: Arc<CacheStore>, namespace: &'static str) -> Self {
        Self {
            store,
            namespace,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> DataTier<T> for CacheTier<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> TierName {
        TierName::Cache
    }

    async fn fetch(&self, key: &str) -> Result<T, TierError> {
        self.store
            .peek::<T>(&format!("{}:{}", self.namespace, key))
            .await
            .ok_or(TierError::NotFound)
    }
}
