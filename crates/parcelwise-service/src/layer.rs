//! The feature-service contract the resolution pipeline consumes.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use parcelwise_core::{MapPoint, OwnerRecord, ParcelId, ParcelRecord, RowRef};
use tokio_util::sync::CancellationToken;

use crate::ServiceError;

/// Builds layer handles. Connecting is the expensive step the
/// [`QueryCache`](crate::QueryCache) exists to avoid repeating.
#[async_trait]
pub trait LayerConnector: Send + Sync {
    type Layer: FeatureLayer + 'static;

    async fn connect(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Layer, ServiceError>;
}

/// One connected feature layer. Every call observes `cancel` and returns
/// [`ServiceError::Cancelled`] when it fires.
#[async_trait]
pub trait FeatureLayer: Send + Sync {
    fn url(&self) -> &str;

    /// Parcels intersecting `point`, with attributes and geometry, in service order.
    async fn query_parcels_at_point(
        &self,
        point: &MapPoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParcelRecord>, ServiceError>;

    /// Owner records stored for one parcel.
    async fn query_owners_for_parcel(
        &self,
        parcel_id: &ParcelId,
        cancel: &CancellationToken,
    ) -> Result<Vec<OwnerRecord>, ServiceError>;

    /// Attribute-only lookup of the internal row ids for `parcel_ids`.
    async fn query_row_ids(
        &self,
        parcel_ids: &[ParcelId],
        cancel: &CancellationToken,
    ) -> Result<Vec<RowRef>, ServiceError>;

    /// Related owner records for each row id, through `relationship_id`.
    async fn query_related_owners(
        &self,
        object_ids: &[i64],
        relationship_id: i64,
        cancel: &CancellationToken,
    ) -> Result<HashMap<i64, Vec<OwnerRecord>>, ServiceError>;

    /// Release the handle. Best effort: in-flight calls may still complete.
    fn close(&self) {}
}

/// Race `fut` against `cancel`, resolving to [`ServiceError::Cancelled`] if the
/// token fires first.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    if cancel.is_cancelled() {
        return Err(ServiceError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ServiceError::Cancelled),
        result = fut => result,
    }
}
