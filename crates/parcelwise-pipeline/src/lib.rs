//! Parcel and owner resolution for map selections.
//!
//! A click resolves to the parcels at that point, their owners become display
//! rows, and the rows are reconciled against the caller's current selection.
//! [`Pipeline`] sequences the stages and owns the layer handle cache.

pub mod concurrency;
mod error;
pub mod owners;
mod pipeline;
pub mod property;
pub mod reconcile;
mod request;

#[cfg(test)]
mod testing;

pub use concurrency::{BoundedExecutor, PooledToken, TokenPool};
pub use error::PipelineError;
pub use owners::{OwnerResolution, dedup_owners};
pub use pipeline::{Pipeline, Resolution, SelectionUpdate};
pub use property::{ResolvedParcel, dedup_parcels, resolve_parcels};
pub use reconcile::{GraphicLink, Reconciliation, reconcile, split_toggled};
pub use request::{PendingRequest, RequestTracker};
