//! Selection reconciliation: toggle-remove, append-if-new, and the result cap.

use std::collections::HashSet;

use parcelwise_core::{DisplayRow, Geometry};
use serde::Serialize;
use tracing::debug;

use crate::property::ResolvedParcel;

/// Rows the caller must draw for one newly added parcel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphicLink {
    pub parcel_key: String,
    pub row_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

/// The diff between the previous selection and the one to adopt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Parcel keys deselected by toggle-remove.
    pub to_remove: Vec<String>,
    /// Rows appended by this resolution that survived the cap.
    pub added: Vec<DisplayRow>,
    /// The full ordered selection after merging.
    pub selection: Vec<DisplayRow>,
    pub graphics: Vec<GraphicLink>,
    /// Parcels that fell off the cap and lost every row; their highlight goes.
    pub dropped_highlights: Vec<String>,
}

/// Split resolved parcels into toggle-removals and parcels still to resolve.
///
/// With toggling disabled nothing is removed and every parcel proceeds.
pub fn split_toggled(
    parcels: Vec<ResolvedParcel>,
    previous: &[DisplayRow],
    toggle_enabled: bool,
) -> (Vec<String>, Vec<ResolvedParcel>) {
    if !toggle_enabled {
        return (Vec::new(), parcels);
    }
    let selected: HashSet<&str> = previous.iter().map(|r| r.parcel_key.as_str()).collect();
    let (toggled, pending): (Vec<_>, Vec<_>) = parcels
        .into_iter()
        .partition(|p| selected.contains(p.key.as_str()));
    let to_remove = toggled.into_iter().map(|p| p.key).collect();
    (to_remove, pending)
}

/// Merge `new_rows` into `previous`, honouring toggle-removals and the cap.
///
/// Rows already present by id are not duplicated. When the merged selection
/// exceeds `max_results` the oldest rows are kept.
pub fn reconcile(
    new_rows: Vec<DisplayRow>,
    parcels: &[ResolvedParcel],
    previous: &[DisplayRow],
    to_remove: &[String],
    max_results: usize,
) -> Reconciliation {
    let removing: HashSet<&str> = to_remove.iter().map(String::as_str).collect();

    let mut selection: Vec<DisplayRow> = previous
        .iter()
        .filter(|r| !removing.contains(r.parcel_key.as_str()))
        .cloned()
        .collect();
    let mut present: HashSet<String> = selection.iter().map(|r| r.id.clone()).collect();

    let mut added_ids = HashSet::new();
    for row in new_rows {
        if removing.contains(row.parcel_key.as_str()) || !present.insert(row.id.clone()) {
            continue;
        }
        added_ids.insert(row.id.clone());
        selection.push(row);
    }

    let overflow = if selection.len() > max_results {
        selection.split_off(max_results)
    } else {
        Vec::new()
    };
    let kept_parcels: HashSet<&str> = selection.iter().map(|r| r.parcel_key.as_str()).collect();
    let mut dropped_highlights: Vec<String> = Vec::new();
    for row in &overflow {
        if !kept_parcels.contains(row.parcel_key.as_str())
            && !dropped_highlights.contains(&row.parcel_key)
        {
            dropped_highlights.push(row.parcel_key.clone());
        }
    }
    if !overflow.is_empty() {
        debug!(
            dropped = overflow.len(),
            parcels = dropped_highlights.len(),
            "selection truncated to cap"
        );
    }

    let added: Vec<DisplayRow> = selection
        .iter()
        .filter(|r| added_ids.contains(&r.id))
        .cloned()
        .collect();
    let graphics = link_graphics(&added, parcels);

    Reconciliation {
        to_remove: to_remove.to_vec(),
        added,
        selection,
        graphics,
        dropped_highlights,
    }
}

/// One link per parcel, in first-row order, carrying every row id of that parcel.
fn link_graphics(added: &[DisplayRow], parcels: &[ResolvedParcel]) -> Vec<GraphicLink> {
    let mut links: Vec<GraphicLink> = Vec::new();
    for row in added {
        if let Some(link) = links.iter_mut().find(|l| l.parcel_key == row.parcel_key) {
            link.row_ids.push(row.id.clone());
            continue;
        }
        let geometry = parcels
            .iter()
            .find(|p| p.key == row.parcel_key)
            .and_then(|p| p.record.geometry.clone());
        links.push(GraphicLink {
            parcel_key: row.parcel_key.clone(),
            row_ids: vec![row.id.clone()],
            geometry,
        });
    }
    links
}
