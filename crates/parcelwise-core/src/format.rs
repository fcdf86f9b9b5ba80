//! Owner text formatting and PII masking for display rows.

use crate::model::OwnerRecord;

/// Shown when the service returned no owner for a parcel.
pub const UNKNOWN_OWNER: &str = "Unknown owner";

/// Shown when the owner fetch for a parcel failed.
pub const OWNER_QUERY_FAILED: &str = "Unknown owner (owner query failed)";

/// Render one owner as a single display line.
///
/// A pre-aggregated owner list is used as-is. Otherwise the line is
/// `name, address, postal city (share)`, skipping absent parts. With `mask`
/// set, private individuals get their name and street address masked;
/// organisations are public record and shown verbatim.
pub fn format_owner(owner: &OwnerRecord, mask: bool) -> String {
    let mask = mask && !owner.is_organisation();

    if let Some(list) = owner.owner_list.as_deref() {
        return if mask {
            list.split(';')
                .map(|entry| mask_words(entry.trim()))
                .collect::<Vec<_>>()
                .join("; ")
        } else {
            list.to_string()
        };
    }

    let mut parts: Vec<String> = Vec::with_capacity(3);
    if let Some(name) = owner.name.as_deref() {
        parts.push(if mask { mask_words(name) } else { name.to_string() });
    }
    if let Some(address) = owner.address.as_deref() {
        parts.push(if mask {
            mask_words(address)
        } else {
            address.to_string()
        });
    }
    let locality = [owner.postal_code.as_deref(), owner.city.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !locality.is_empty() {
        parts.push(locality);
    }

    let mut line = parts.join(", ");
    if let Some(share) = owner.share.as_deref() {
        if line.is_empty() {
            line = UNKNOWN_OWNER.to_string();
        }
        line.push_str(&format!(" ({share})"));
    }
    if line.is_empty() {
        return UNKNOWN_OWNER.to_string();
    }
    line
}

/// Mask every word, keeping its first character: `Anna Andersson` → `A*** A********`.
///
/// Digits are kept so street numbers stay readable.
pub fn mask_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            if word.chars().all(|c| c.is_ascii_digit()) {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    let rest = chars.count();
                    format!("{first}{}", "*".repeat(rest))
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
