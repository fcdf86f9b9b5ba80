//! Identity keys for deduplication.
//!
//! Parcels and owners arrive from the service with no guarantee of
//! uniqueness: point queries can return the same parcel twice (split
//! geometries), and owner tables can list the same owner twice. Every dedup
//! step in the pipeline goes through the keys built here.
//!
//! # Owner identity priority
//!
//! 1. Pre-aggregated owner list, when present
//! 2. Composite of name, address, postal code, city, organisation number, share
//! 3. Composite of object id, parcel reference, uuid
//! 4. Parcel-scoped arrival sequence
//!
//! Every part is lower-cased and tagged with its field name, so a name that
//! happens to equal an address never yields the same key.

use xxhash_rust::xxh3::xxh3_64;

use crate::model::{OwnerRecord, ParcelId};

/// Canonical string key for a parcel identifier.
///
/// Total: `None` maps to the empty string, which callers must never accept as
/// a valid parcel key. Numeric `5` and text `"5"` intentionally share a key;
/// surrounding whitespace is dropped.
pub fn normalize_parcel_key(id: Option<&ParcelId>) -> String {
    match id {
        Some(id) => id.to_string().trim().to_string(),
        None => String::new(),
    }
}

/// Context an owner record was fetched in.
#[derive(Debug, Clone, Copy)]
pub struct OwnerKeyContext<'a> {
    /// Normalized key of the parcel the owner was fetched for.
    pub parcel_key: &'a str,
}

/// Build the identity key used to deduplicate `owner` within one parcel.
///
/// `sequence` is the owner's arrival index within its parcel. It only
/// contributes when nothing else distinguishes the record.
pub fn build_owner_identity_key(
    owner: &OwnerRecord,
    context: OwnerKeyContext<'_>,
    sequence: usize,
) -> String {
    if let Some(list) = owner.owner_list.as_deref() {
        return format!("list:{}", normalize_part(list));
    }

    let composite = [
        ("name", owner.name.as_deref()),
        ("addr", owner.address.as_deref()),
        ("zip", owner.postal_code.as_deref()),
        ("city", owner.city.as_deref()),
        ("org", owner.org_number.as_deref()),
        ("share", owner.share.as_deref()),
    ];
    if composite.iter().any(|(_, v)| v.is_some()) {
        return tagged(&composite);
    }

    let object_id = owner.object_id.map(|v| v.to_string());
    let parcel_ref = owner.parcel_ref.as_ref().map(|v| v.to_string());
    let fallback = [
        ("oid", object_id.as_deref()),
        ("pid", parcel_ref.as_deref()),
        ("uuid", owner.uuid.as_deref()),
    ];
    if fallback.iter().any(|(_, v)| v.is_some()) {
        return tagged(&fallback);
    }

    format!("seq:{}:{sequence}", normalize_part(context.parcel_key))
}

/// Stable display-row id for a parcel and an owner discriminator.
pub fn row_id(parcel_key: &str, discriminator: &str) -> String {
    format!("{parcel_key}::{discriminator}")
}

/// Row discriminator for an owner identity key.
///
/// Composite and list keys carry owner names and addresses, so they are
/// digested to a fixed-width hex hash before they reach a row id. Sequence
/// keys hold nothing but the parcel key and pass through.
pub fn owner_discriminator(identity_key: &str) -> String {
    if identity_key.starts_with("seq:") {
        return identity_key.to_string();
    }
    format!("{:016x}", xxh3_64(identity_key.as_bytes()))
}

fn tagged(parts: &[(&str, Option<&str>)]) -> String {
    parts
        .iter()
        .map(|(tag, value)| format!("{tag}={}", value.map(normalize_part).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("|")
}

fn normalize_part(s: &str) -> String {
    // `|` and `=` are the key delimiters; escape them so values cannot forge a tag.
    s.trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace('=', "\\=")
}
