//! Scripted in-memory feature service with call-count spies.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parcelwise_core::{
    Geometry, GeometryKind, MapPoint, OwnerRecord, ParcelAttributes, ParcelId, ParcelRecord,
    RowRef, normalize_parcel_key,
};
use parcelwise_service::{FeatureLayer, LayerConnector, ServiceError, with_cancel};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Object ids handed out by the mock start here, in parcel order.
pub const FIRST_OBJECT_ID: i64 = 1000;

pub fn parcel(id: ParcelId) -> ParcelRecord {
    ParcelRecord {
        id: Some(id),
        attributes: ParcelAttributes::default(),
        geometry: Some(Geometry {
            kind: GeometryKind::Polygon,
            payload: json!({ "rings": [] }),
        }),
    }
}

pub fn owner(name: &str) -> OwnerRecord {
    OwnerRecord {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[derive(Clone, Default)]
struct Script {
    parcels: Vec<ParcelRecord>,
    owners: HashMap<String, Vec<OwnerRecord>>,
    point_failure: Option<String>,
    owner_failures: HashSet<String>,
    row_id_failures: HashSet<String>,
    related_failure: Option<String>,
    cancel_on_owner_query: Option<CancellationToken>,
    cancel_on_related_query: Option<CancellationToken>,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct CallLog {
    pub connects: AtomicUsize,
    pub point_queries: AtomicUsize,
    pub owner_queries: AtomicUsize,
    pub row_id_queries: AtomicUsize,
    pub related_queries: AtomicUsize,
    pub row_id_batch_sizes: Mutex<Vec<usize>>,
    pub related_object_ids: Mutex<Vec<usize>>,
}

impl CallLog {
    pub fn owner_lookups(&self) -> usize {
        self.owner_queries.load(Ordering::SeqCst)
            + self.row_id_queries.load(Ordering::SeqCst)
            + self.related_queries.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Script>,
    pub calls: Arc<CallLog>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }

    pub fn with_parcels(mut self, parcels: Vec<ParcelRecord>) -> Self {
        self.script().parcels = parcels;
        self
    }

    pub fn with_owners(mut self, parcel_key: &str, owners: Vec<OwnerRecord>) -> Self {
        self.script().owners.insert(parcel_key.to_string(), owners);
        self
    }

    pub fn fail_point_query(mut self, message: &str) -> Self {
        self.script().point_failure = Some(message.to_string());
        self
    }

    pub fn fail_owners_for(mut self, parcel_key: &str) -> Self {
        self.script().owner_failures.insert(parcel_key.to_string());
        self
    }

    pub fn fail_row_ids_for(mut self, parcel_key: &str) -> Self {
        self.script().row_id_failures.insert(parcel_key.to_string());
        self
    }

    pub fn fail_related_query(mut self, message: &str) -> Self {
        self.script().related_failure = Some(message.to_string());
        self
    }

    pub fn cancel_on_owner_query(mut self, token: CancellationToken) -> Self {
        self.script().cancel_on_owner_query = Some(token);
        self
    }

    pub fn cancel_on_related_query(mut self, token: CancellationToken) -> Self {
        self.script().cancel_on_related_query = Some(token);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script().delay = Some(delay);
        self
    }
}

#[async_trait]
impl LayerConnector for MockConnector {
    type Layer = MockLayer;

    async fn connect(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<MockLayer, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockLayer {
            url: url.to_string(),
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
        })
    }
}

pub struct MockLayer {
    url: String,
    script: Arc<Script>,
    calls: Arc<CallLog>,
}

impl MockLayer {
    async fn pause(&self) {
        match self.script.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn object_id_of(&self, key: &str) -> Option<i64> {
        self.script
            .parcels
            .iter()
            .position(|p| normalize_parcel_key(p.id.as_ref()) == key)
            .map(|i| FIRST_OBJECT_ID + i as i64)
    }

    fn key_of(&self, object_id: i64) -> Option<String> {
        let index = usize::try_from(object_id - FIRST_OBJECT_ID).ok()?;
        let parcel = self.script.parcels.get(index)?;
        Some(normalize_parcel_key(parcel.id.as_ref()))
    }
}

#[async_trait]
impl FeatureLayer for MockLayer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query_parcels_at_point(
        &self,
        _point: &MapPoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParcelRecord>, ServiceError> {
        self.calls.point_queries.fetch_add(1, Ordering::SeqCst);
        with_cancel(cancel, async {
            self.pause().await;
            if let Some(message) = &self.script.point_failure {
                return Err(ServiceError::Server {
                    code: 500,
                    message: message.clone(),
                });
            }
            Ok(self.script.parcels.clone())
        })
        .await
    }

    async fn query_owners_for_parcel(
        &self,
        parcel_id: &ParcelId,
        cancel: &CancellationToken,
    ) -> Result<Vec<OwnerRecord>, ServiceError> {
        self.calls.owner_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.script.cancel_on_owner_query {
            token.cancel();
        }
        let key = parcel_id.to_string();
        with_cancel(cancel, async {
            self.pause().await;
            if self.script.owner_failures.contains(&key) {
                return Err(ServiceError::Server {
                    code: 500,
                    message: format!("owner lookup failed for {key}"),
                });
            }
            Ok(self.script.owners.get(&key).cloned().unwrap_or_default())
        })
        .await
    }

    async fn query_row_ids(
        &self,
        parcel_ids: &[ParcelId],
        cancel: &CancellationToken,
    ) -> Result<Vec<RowRef>, ServiceError> {
        self.calls.row_id_queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.calls.row_id_batch_sizes.lock() {
            sizes.push(parcel_ids.len());
        }
        with_cancel(cancel, async {
            self.pause().await;
            let mut refs = Vec::new();
            for id in parcel_ids {
                let key = id.to_string();
                if self.script.row_id_failures.contains(&key) {
                    return Err(ServiceError::Server {
                        code: 500,
                        message: format!("row id lookup failed for {key}"),
                    });
                }
                if let Some(object_id) = self.object_id_of(&key) {
                    refs.push(RowRef {
                        object_id,
                        parcel_id: id.clone(),
                    });
                }
            }
            Ok(refs)
        })
        .await
    }

    async fn query_related_owners(
        &self,
        object_ids: &[i64],
        _relationship_id: i64,
        cancel: &CancellationToken,
    ) -> Result<HashMap<i64, Vec<OwnerRecord>>, ServiceError> {
        self.calls.related_queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut counts) = self.calls.related_object_ids.lock() {
            counts.push(object_ids.len());
        }
        if let Some(token) = &self.script.cancel_on_related_query {
            token.cancel();
        }
        with_cancel(cancel, async {
            self.pause().await;
            if let Some(message) = &self.script.related_failure {
                return Err(ServiceError::Server {
                    code: 500,
                    message: message.clone(),
                });
            }
            let mut related = HashMap::new();
            for &object_id in object_ids {
                if let Some(key) = self.key_of(object_id) {
                    let owners = self.script.owners.get(&key).cloned().unwrap_or_default();
                    related.insert(object_id, owners);
                }
            }
            Ok(related)
        })
        .await
    }
}
