//! Core types for Parcelwise: parcel and owner records, identity keys, owner
//! formatting, and resolver configuration.

pub mod config;
pub mod format;
pub mod identity;
pub mod model;

pub use config::{ConfigError, FieldMap, OwnerStrategy, ResolverConfig, validate_point};
pub use format::{OWNER_QUERY_FAILED, UNKNOWN_OWNER, format_owner};
pub use identity::{
    OwnerKeyContext, build_owner_identity_key, normalize_parcel_key, owner_discriminator, row_id,
};
pub use model::{
    AttributeBag, DisplayRow, Geometry, GeometryKind, MapPoint, OwnerRecord, OwnerStatus,
    ParcelAttributes, ParcelId, ParcelRecord, RowRef,
};
