//! Owner resolution: turning parcels into display rows, one row per owner.
//!
//! Two strategies fetch the owners ([`individual`] and [`batch`]); both feed
//! the same [`RowBuilder`], which dedups owners per parcel and enforces the
//! row cap.

mod batch;
mod individual;

pub use batch::resolve_batch;
pub use individual::resolve_individual;

use std::collections::HashSet;

use parcelwise_core::{
    DisplayRow, OWNER_QUERY_FAILED, OwnerKeyContext, OwnerRecord, OwnerStatus, UNKNOWN_OWNER,
    build_owner_identity_key, format_owner, owner_discriminator, row_id,
};

use crate::property::ResolvedParcel;

/// Row discriminators for placeholder rows. They differ, so a later lookup
/// for a degraded parcel is never deduped against its failure row.
const UNKNOWN_PLACEHOLDER: &str = "unknown";
const FAILED_PLACEHOLDER: &str = "failed";

/// Rows built for one resolution, plus the parcels whose owner fetch failed.
#[derive(Debug, Default)]
pub struct OwnerResolution {
    pub rows: Vec<DisplayRow>,
    /// Keys of parcels shown with a degraded "owner query failed" row.
    pub failed: Vec<String>,
}

/// What an owner fetch produced for one parcel.
pub(crate) enum OwnerFetch {
    Fetched(Vec<OwnerRecord>),
    Failed,
}

/// Keep the first record of each owner identity, in arrival order.
///
/// The sequence fallback is counted per parcel, so empty records on different
/// parcels never collide.
pub fn dedup_owners(owners: Vec<OwnerRecord>, parcel_key: &str) -> Vec<(String, OwnerRecord)> {
    let context = OwnerKeyContext { parcel_key };
    let mut seen = HashSet::new();
    owners
        .into_iter()
        .enumerate()
        .filter_map(|(sequence, owner)| {
            let key = build_owner_identity_key(&owner, context, sequence);
            seen.insert(key.clone()).then_some((key, owner))
        })
        .collect()
}

/// Accumulates display rows up to a cap.
pub(crate) struct RowBuilder {
    max_rows: usize,
    mask_pii: bool,
    rows: Vec<DisplayRow>,
    failed: Vec<String>,
}

impl RowBuilder {
    pub(crate) fn new(max_rows: usize, mask_pii: bool) -> Self {
        Self {
            max_rows,
            mask_pii,
            rows: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.rows.len() >= self.max_rows
    }

    /// Rows that can still be emitted.
    pub(crate) fn remaining(&self) -> usize {
        self.max_rows.saturating_sub(self.rows.len())
    }

    /// Emit the rows for one parcel, stopping the moment the cap is reached.
    pub(crate) fn push_parcel(&mut self, parcel: &ResolvedParcel, fetch: OwnerFetch) {
        if self.is_full() {
            return;
        }
        match fetch {
            OwnerFetch::Failed => {
                self.failed.push(parcel.key.clone());
                self.push_placeholder(parcel, OwnerStatus::QueryFailed);
            }
            OwnerFetch::Fetched(owners) if owners.is_empty() => {
                self.push_placeholder(parcel, OwnerStatus::Unknown);
            }
            OwnerFetch::Fetched(owners) => {
                for (identity, owner) in dedup_owners(owners, &parcel.key) {
                    if self.is_full() {
                        break;
                    }
                    let text = format_owner(&owner, self.mask_pii);
                    let discriminator = owner_discriminator(&identity);
                    self.push_row(parcel, &discriminator, text, OwnerStatus::Known);
                }
            }
        }
    }

    fn push_placeholder(&mut self, parcel: &ResolvedParcel, status: OwnerStatus) {
        let (discriminator, text) = match status {
            OwnerStatus::QueryFailed => (FAILED_PLACEHOLDER, OWNER_QUERY_FAILED),
            _ => (UNKNOWN_PLACEHOLDER, UNKNOWN_OWNER),
        };
        self.push_row(parcel, discriminator, text.to_string(), status);
    }

    fn push_row(
        &mut self,
        parcel: &ResolvedParcel,
        discriminator: &str,
        owner_text: String,
        owner_status: OwnerStatus,
    ) {
        self.rows.push(DisplayRow {
            id: row_id(&parcel.key, discriminator),
            parcel_id: parcel.id.clone(),
            parcel_key: parcel.key.clone(),
            attributes: parcel.record.attributes.clone(),
            owner_text,
            owner_status,
            geometry_kind: parcel.record.geometry_kind(),
        });
    }

    pub(crate) fn finish(self) -> OwnerResolution {
        OwnerResolution {
            rows: self.rows,
            failed: self.failed,
        }
    }
}

/// Degraded rows for every parcel, used when no owner fetch could be made at all.
pub fn all_failed(parcels: &[ResolvedParcel], max_rows: usize, mask_pii: bool) -> OwnerResolution {
    let mut builder = RowBuilder::new(max_rows, mask_pii);
    for parcel in parcels {
        if builder.is_full() {
            break;
        }
        builder.push_parcel(parcel, OwnerFetch::Failed);
    }
    builder.finish()
}
