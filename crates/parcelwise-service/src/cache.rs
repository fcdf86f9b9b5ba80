//! Layer handle cache keyed by canonical service URL.
//!
//! Handles are shared as `Arc`s so invalidation never pulls a handle out from
//! under a call that is still using it; the call finishes (or fails with
//! [`ServiceError::Closed`]) and the last reference drops the handle.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{FeatureLayer, LayerConnector, ServiceError};

pub struct QueryCache<L> {
    handles: RwLock<HashMap<String, Arc<L>>>,
}

impl<L> Default for QueryCache<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> QueryCache<L> {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: FeatureLayer + 'static> QueryCache<L> {
    /// Return the cached handle for `url`, connecting and caching one if absent.
    ///
    /// The lock is not held across the connect, so two concurrent callers may
    /// both connect; the later insert wins and the earlier handle is simply
    /// dropped once its caller is done with it.
    pub async fn get_or_create<C>(
        &self,
        connector: &C,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<L>, ServiceError>
    where
        C: LayerConnector<Layer = L> + ?Sized,
    {
        let key = canonical_url(url);
        let cached = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }

        debug!(url = %key, "connecting layer");
        let handle = Arc::new(connector.connect(&key, cancel).await?);
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Close every cached handle and empty the cache. Returns how many were dropped.
    pub fn invalidate_all(&self) -> usize {
        let drained: Vec<Arc<L>> = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &drained {
            handle.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "invalidated layer handles");
        }
        drained.len()
    }
}

/// Cache key for a service URL: surrounding whitespace and trailing slashes removed.
pub fn canonical_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
