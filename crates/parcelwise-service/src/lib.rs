//! Service layer: the feature-service contract, a layer handle cache, and an
//! optional HTTP implementation for ArcGIS-REST-style services.

mod cache;
mod error;
mod layer;

pub use cache::{QueryCache, canonical_url};
pub use error::ServiceError;
pub use layer::{FeatureLayer, LayerConnector, with_cancel};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{ArcGisConnector, ArcGisLayer};
