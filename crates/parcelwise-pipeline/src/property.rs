//! Property resolution: the spatial point query and parcel dedup.

use std::collections::HashSet;

use parcelwise_core::{MapPoint, ParcelId, ParcelRecord, normalize_parcel_key};
use parcelwise_service::FeatureLayer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::PipelineError;

/// A deduplicated parcel with its canonical key. The key is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParcel {
    pub key: String,
    pub id: ParcelId,
    pub record: ParcelRecord,
}

/// Query the parcels at `point`, dedup them by key and keep at most `max_results`.
///
/// Cancellation comes back as [`PipelineError::Cancelled`]; any other service
/// failure as [`PipelineError::QueryFailed`].
pub async fn resolve_parcels<L>(
    layer: &L,
    point: &MapPoint,
    max_results: usize,
    cancel: &CancellationToken,
) -> Result<Vec<ResolvedParcel>, PipelineError>
where
    L: FeatureLayer + ?Sized,
{
    let records = layer.query_parcels_at_point(point, cancel).await?;
    let returned = records.len();
    let parcels = dedup_parcels(records, max_results);
    info!(
        returned,
        kept = parcels.len(),
        x = point.x,
        y = point.y,
        "resolved parcels at point"
    );
    Ok(parcels)
}

/// Keep the first occurrence of each parcel key, in response order, stopping
/// once `max_results` parcels are kept. Records without an id are dropped.
pub fn dedup_parcels(records: Vec<ParcelRecord>, max_results: usize) -> Vec<ResolvedParcel> {
    let mut seen = HashSet::new();
    let mut parcels = Vec::new();

    for record in records {
        if parcels.len() >= max_results {
            break;
        }
        let key = normalize_parcel_key(record.id.as_ref());
        let Some(id) = record.id.clone() else {
            debug!("skipping parcel without identifier");
            continue;
        };
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }
        parcels.push(ResolvedParcel { key, id, record });
    }
    parcels
}
