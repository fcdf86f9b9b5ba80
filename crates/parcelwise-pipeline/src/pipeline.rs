//! The orchestrator: point → parcels → owners → reconciled selection.

use parcelwise_core::{DisplayRow, MapPoint, OwnerStrategy, ResolverConfig, validate_point};
use parcelwise_service::{LayerConnector, QueryCache};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::PipelineError;
use crate::concurrency::BoundedExecutor;
use crate::owners::{OwnerResolution, all_failed, resolve_batch, resolve_individual};
use crate::property::{ResolvedParcel, resolve_parcels};
use crate::reconcile::{GraphicLink, Reconciliation, reconcile, split_toggled};
use crate::request::{PendingRequest, RequestTracker};

/// Terminal outcome of a resolution that was neither aborted nor failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// No parcel at the point.
    Empty,
    Success(SelectionUpdate),
}

/// What the caller adopts on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionUpdate {
    #[serde(flatten)]
    pub strategy: OwnerStrategy,
    /// Rows this resolution added.
    pub rows: Vec<DisplayRow>,
    pub to_remove: Vec<String>,
    /// The full selection to adopt.
    pub selection: Vec<DisplayRow>,
    pub graphics: Vec<GraphicLink>,
    pub dropped_highlights: Vec<String>,
    /// Parcels shown with a degraded "owner query failed" row.
    pub failed_parcels: Vec<String>,
    /// Every parcel was toggle-removed, so no owner query ran.
    pub owner_lookup_skipped: bool,
}

impl SelectionUpdate {
    fn new(
        strategy: OwnerStrategy,
        reconciliation: Reconciliation,
        failed_parcels: Vec<String>,
        owner_lookup_skipped: bool,
    ) -> Self {
        Self {
            strategy,
            rows: reconciliation.added,
            to_remove: reconciliation.to_remove,
            selection: reconciliation.selection,
            graphics: reconciliation.graphics,
            dropped_highlights: reconciliation.dropped_highlights,
            failed_parcels,
            owner_lookup_skipped,
        }
    }
}

/// Owns the layer handle cache and request sequencing for one session.
pub struct Pipeline<C: LayerConnector> {
    connector: C,
    cache: QueryCache<C::Layer>,
    requests: RequestTracker,
}

impl<C: LayerConnector> Pipeline<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            cache: QueryCache::new(),
            requests: RequestTracker::new(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Start a resolution, superseding any still in flight.
    pub fn begin_request(&self) -> PendingRequest {
        self.requests.begin()
    }

    pub fn finish_request(&self, request: PendingRequest) {
        self.requests.finish(request);
    }

    /// Cancel every in-flight resolution.
    pub fn cancel_all(&self) {
        self.requests.cancel_all();
    }

    /// Drop every cached layer handle. Returns how many were closed.
    pub fn clear_cache(&self) -> usize {
        self.cache.invalidate_all()
    }

    pub fn cached_layers(&self) -> usize {
        self.cache.len()
    }

    /// Resolve the selection change for a click at `point`.
    ///
    /// `previous` is the caller's current selection; it is only read. An
    /// aborted resolution returns an error for which
    /// [`PipelineError::is_cancelled`] holds and must not be adopted.
    pub async fn resolve_selection(
        &self,
        point: &MapPoint,
        config: &ResolverConfig,
        previous: &[DisplayRow],
        request: &PendingRequest,
    ) -> Result<Resolution, PipelineError> {
        match self.resolve(point, config, previous, request).await {
            Err(err) if err.is_cancelled() => {
                // A stage cut short by a newer request reports staleness, not a bare cancel.
                let err = match self.requests.check(request) {
                    Err(stale @ PipelineError::Superseded { .. }) => stale,
                    _ => err,
                };
                debug!(seq = request.seq(), reason = %err, "resolution aborted");
                Err(err)
            }
            Err(err) => {
                warn!(seq = request.seq(), error = %err, "resolution failed");
                Err(err)
            }
            ok => ok,
        }
    }

    async fn resolve(
        &self,
        point: &MapPoint,
        config: &ResolverConfig,
        previous: &[DisplayRow],
        request: &PendingRequest,
    ) -> Result<Resolution, PipelineError> {
        config.validate()?;
        validate_point(point)?;
        let strategy = OwnerStrategy::select(config);
        let cancel = request.token();
        self.requests.check(request)?;

        let parcel_layer = self
            .cache
            .get_or_create(&self.connector, &config.property_service_url, cancel)
            .await?;
        let parcels =
            resolve_parcels(parcel_layer.as_ref(), point, config.max_results, cancel).await?;
        self.requests.check(request)?;

        if parcels.is_empty() {
            info!(seq = request.seq(), "no parcel at point");
            return Ok(Resolution::Empty);
        }

        let (to_remove, pending) = split_toggled(parcels, previous, config.toggle_enabled);
        if pending.is_empty() {
            info!(removed = to_remove.len(), "all parcels toggled off");
            let reconciliation = reconcile(Vec::new(), &[], previous, &to_remove, config.max_results);
            return Ok(Resolution::Success(SelectionUpdate::new(
                strategy,
                reconciliation,
                Vec::new(),
                true,
            )));
        }

        let executor = BoundedExecutor::new(config.concurrency_limit);
        let owners = match strategy {
            OwnerStrategy::Individual => {
                self.individual_owners(config, &pending, executor, cancel)
                    .await?
            }
            OwnerStrategy::Batch {
                relationship_id,
                batch_size,
            } => {
                resolve_batch(
                    parcel_layer.as_ref(),
                    &pending,
                    relationship_id,
                    batch_size,
                    executor,
                    config.max_results,
                    config.mask_pii,
                    cancel,
                )
                .await?
            }
        };
        self.requests.check(request)?;

        let reconciliation = reconcile(
            owners.rows,
            &pending,
            previous,
            &to_remove,
            config.max_results,
        );
        info!(
            seq = request.seq(),
            added = reconciliation.added.len(),
            removed = to_remove.len(),
            selected = reconciliation.selection.len(),
            failed = owners.failed.len(),
            "resolved selection"
        );
        Ok(Resolution::Success(SelectionUpdate::new(
            strategy,
            reconciliation,
            owners.failed,
            false,
        )))
    }

    /// An unreachable owner service degrades every parcel rather than failing.
    async fn individual_owners(
        &self,
        config: &ResolverConfig,
        parcels: &[ResolvedParcel],
        executor: BoundedExecutor,
        cancel: &CancellationToken,
    ) -> Result<OwnerResolution, PipelineError> {
        match self
            .cache
            .get_or_create(&self.connector, &config.owner_service_url, cancel)
            .await
        {
            Ok(layer) => {
                resolve_individual(
                    layer.as_ref(),
                    parcels,
                    executor,
                    config.max_results,
                    config.mask_pii,
                    cancel,
                )
                .await
            }
            Err(err) if err.is_cancellation() => Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(error = %err, url = %config.owner_service_url, "owner layer unavailable");
                Ok(all_failed(parcels, config.max_results, config.mask_pii))
            }
        }
    }
}
