//! One owner query per parcel, fanned out through the bounded executor.

use parcelwise_service::FeatureLayer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{OwnerFetch, OwnerResolution, RowBuilder};
use crate::concurrency::BoundedExecutor;
use crate::property::ResolvedParcel;
use crate::PipelineError;

/// Fetch owners parcel by parcel and build rows, issuing no more queries than
/// the row cap can still use.
///
/// Each chunk is at most the executor limit, and never more parcels than rows
/// left under `max_rows` (every parcel yields at least one row). A failed
/// fetch degrades that parcel only.
pub async fn resolve_individual<L>(
    owner_layer: &L,
    parcels: &[ResolvedParcel],
    executor: BoundedExecutor,
    max_rows: usize,
    mask_pii: bool,
    cancel: &CancellationToken,
) -> Result<OwnerResolution, PipelineError>
where
    L: FeatureLayer + ?Sized,
{
    let mut builder = RowBuilder::new(max_rows, mask_pii);
    let mut next = 0;

    while next < parcels.len() && !builder.is_full() {
        let take = executor
            .limit()
            .min(builder.remaining())
            .min(parcels.len() - next);
        let chunk = &parcels[next..next + take];
        next += take;

        let batch: Vec<&ResolvedParcel> = chunk.iter().collect();
        let outcomes = executor
            .run(batch, cancel, |parcel| {
                owner_layer.query_owners_for_parcel(&parcel.id, cancel)
            })
            .await?;

        for (parcel, outcome) in chunk.iter().zip(outcomes) {
            let fetch = match outcome {
                Ok(owners) => {
                    debug!(parcel = %parcel.key, count = owners.len(), "fetched owners");
                    OwnerFetch::Fetched(owners)
                }
                Err(err) => {
                    warn!(parcel = %parcel.key, error = %err, "owner query failed");
                    OwnerFetch::Failed
                }
            };
            builder.push_parcel(parcel, fetch);
        }
    }

    Ok(builder.finish())
}
