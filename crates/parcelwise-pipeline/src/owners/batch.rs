//! Relationship-based owner fetch: row-id lookups in batches, then a single
//! relationship query for every parcel at once.

use std::collections::{HashMap, HashSet};

use parcelwise_core::{OwnerRecord, ParcelId, RowRef, normalize_parcel_key};
use parcelwise_service::FeatureLayer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{OwnerFetch, OwnerResolution, RowBuilder};
use crate::concurrency::BoundedExecutor;
use crate::property::ResolvedParcel;
use crate::PipelineError;

/// Parcels turned into rows between cooperative yields.
const ROW_BUILD_CHUNK: usize = 25;

/// Fetch owners for all `parcels` through `relationship_id` on the parcel layer.
///
/// Row ids are looked up in batches of `batch_size` parcel ids to keep each
/// request under the service's size limit. A failed lookup batch degrades just
/// its parcels; a failed relationship query degrades every parcel. Only
/// cancellation aborts.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_batch<L>(
    parcel_layer: &L,
    parcels: &[ResolvedParcel],
    relationship_id: i64,
    batch_size: usize,
    executor: BoundedExecutor,
    max_rows: usize,
    mask_pii: bool,
    cancel: &CancellationToken,
) -> Result<OwnerResolution, PipelineError>
where
    L: FeatureLayer + ?Sized,
{
    let (row_refs, mut failed) =
        resolve_row_ids(parcel_layer, parcels, batch_size, executor, cancel).await?;
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let mut owners = if row_refs.is_empty() {
        HashMap::new()
    } else {
        let object_ids = unique_object_ids(&row_refs);
        match parcel_layer
            .query_related_owners(&object_ids, relationship_id, cancel)
            .await
        {
            Ok(related) => rekey_by_parcel(related, &row_refs),
            Err(err) if err.is_cancellation() => return Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(error = %err, parcels = parcels.len(), "relationship query failed");
                failed.extend(parcels.iter().map(|p| p.key.clone()));
                HashMap::new()
            }
        }
    };

    let mut builder = RowBuilder::new(max_rows, mask_pii);
    for chunk in parcels.chunks(ROW_BUILD_CHUNK) {
        if builder.is_full() {
            break;
        }
        for parcel in chunk {
            let fetch = if failed.contains(&parcel.key) {
                OwnerFetch::Failed
            } else {
                OwnerFetch::Fetched(owners.remove(&parcel.key).unwrap_or_default())
            };
            builder.push_parcel(parcel, fetch);
        }
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
    }

    Ok(builder.finish())
}

/// Look up row ids in batches through the executor, collecting every batch
/// before returning. Parcels in failed batches come back in the failed set.
async fn resolve_row_ids<L>(
    parcel_layer: &L,
    parcels: &[ResolvedParcel],
    batch_size: usize,
    executor: BoundedExecutor,
    cancel: &CancellationToken,
) -> Result<(Vec<RowRef>, HashSet<String>), PipelineError>
where
    L: FeatureLayer + ?Sized,
{
    let ids: Vec<ParcelId> = parcels.iter().map(|p| p.id.clone()).collect();
    let batches: Vec<&[ParcelId]> = ids.chunks(batch_size.max(1)).collect();
    debug!(
        parcels = ids.len(),
        batches = batches.len(),
        "resolving row ids"
    );

    let outcomes = executor
        .run(batches.clone(), cancel, |batch| {
            parcel_layer.query_row_ids(batch, cancel)
        })
        .await?;

    let mut row_refs = Vec::new();
    let mut failed = HashSet::new();
    for (batch, outcome) in batches.iter().zip(outcomes) {
        match outcome {
            Ok(refs) => row_refs.extend(refs),
            Err(err) => {
                warn!(error = %err, size = batch.len(), "row id batch failed");
                failed.extend(batch.iter().map(|id| normalize_parcel_key(Some(id))));
            }
        }
    }
    info!(rows = row_refs.len(), failed = failed.len(), "resolved row ids");
    Ok((row_refs, failed))
}

fn unique_object_ids(row_refs: &[RowRef]) -> Vec<i64> {
    let mut seen = HashSet::new();
    row_refs
        .iter()
        .map(|r| r.object_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Re-key relationship results from row id to parcel key. A parcel backed by
/// several rows gets their owners concatenated in row order.
fn rekey_by_parcel(
    mut related: HashMap<i64, Vec<OwnerRecord>>,
    row_refs: &[RowRef],
) -> HashMap<String, Vec<OwnerRecord>> {
    let mut by_parcel: HashMap<String, Vec<OwnerRecord>> = HashMap::new();
    for row in row_refs {
        if let Some(owners) = related.remove(&row.object_id) {
            by_parcel
                .entry(normalize_parcel_key(Some(&row.parcel_id)))
                .or_default()
                .extend(owners);
        }
    }
    by_parcel
}
