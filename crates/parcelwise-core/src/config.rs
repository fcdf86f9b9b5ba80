//! Resolver configuration, validation, and owner-strategy selection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::MapPoint;

pub const DEFAULT_MAX_RESULTS: usize = 50;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;
pub const DEFAULT_RELATIONSHIP_BATCH_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("property service URL is not configured")]
    MissingPropertyService,

    #[error("owner service URL is not configured")]
    MissingOwnerService,

    #[error("{field} is not an http(s) URL: {url}")]
    InvalidUrl { field: &'static str, url: String },

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),

    #[error("map point has non-finite coordinates ({x}, {y})")]
    InvalidPoint { x: f64, y: f64 },

    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Service attribute names the pipeline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMap {
    pub parcel_id: String,
    pub designation: String,
    pub object_id: String,
    pub uuid: String,
    pub owner_name: String,
    pub owner_address: String,
    pub owner_postal_code: String,
    pub owner_city: String,
    pub owner_org_number: String,
    pub owner_share: String,
    pub owner_list: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            parcel_id: "FNR_FDS".into(),
            designation: "FASTIGHET".into(),
            object_id: "OBJECTID".into(),
            uuid: "UUID".into(),
            owner_name: "NAMN".into(),
            owner_address: "ADRESS".into(),
            owner_postal_code: "POSTNR".into(),
            owner_city: "POSTORT".into(),
            owner_org_number: "ORGNR".into(),
            owner_share: "ANDEL".into(),
            owner_list: "AGARLISTA".into(),
        }
    }
}

/// Everything one resolution needs to know about the services and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    pub property_service_url: String,
    pub owner_service_url: String,
    /// Server-side relationship from parcels to owners.
    pub relationship_id: Option<i64>,
    /// Fetch owners with one relationship query instead of one query per parcel.
    pub batch_owner_query: bool,
    pub max_results: usize,
    /// Clicking an already-selected parcel deselects it.
    pub toggle_enabled: bool,
    pub concurrency_limit: usize,
    /// Parcel ids per attribute query in the batch strategy.
    pub relationship_batch_size: usize,
    pub mask_pii: bool,
    pub fields: FieldMap,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            property_service_url: String::new(),
            owner_service_url: String::new(),
            relationship_id: None,
            batch_owner_query: false,
            max_results: DEFAULT_MAX_RESULTS,
            toggle_enabled: true,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            relationship_batch_size: DEFAULT_RELATIONSHIP_BATCH_SIZE,
            mask_pii: true,
            fields: FieldMap::default(),
        }
    }
}

impl ResolverConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Reject configurations no resolution could succeed with.
    ///
    /// Runs before any network call. The owner service is only required by the
    /// individual strategy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.property_service_url.trim().is_empty() {
            return Err(ConfigError::MissingPropertyService);
        }
        check_url("propertyServiceUrl", &self.property_service_url)?;
        if self.max_results == 0 {
            return Err(ConfigError::ZeroLimit("maxResults"));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ZeroLimit("concurrencyLimit"));
        }
        match OwnerStrategy::select(self) {
            OwnerStrategy::Individual => {
                if self.owner_service_url.trim().is_empty() {
                    return Err(ConfigError::MissingOwnerService);
                }
                check_url("ownerServiceUrl", &self.owner_service_url)?;
            }
            OwnerStrategy::Batch { batch_size, .. } => {
                if batch_size == 0 {
                    return Err(ConfigError::ZeroLimit("relationshipBatchSize"));
                }
            }
        }
        Ok(())
    }
}

/// How owners are fetched for a set of parcels. Resolved once per resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum OwnerStrategy {
    /// One owner query per parcel.
    Individual,
    /// Attribute queries for row ids, then one relationship query.
    Batch { relationship_id: i64, batch_size: usize },
}

impl OwnerStrategy {
    /// Batch iff batch mode is on, a relationship is configured and the
    /// parcel service is known. Otherwise individual, unconditionally.
    pub fn select(config: &ResolverConfig) -> Self {
        match config.relationship_id {
            Some(relationship_id)
                if config.batch_owner_query && !config.property_service_url.trim().is_empty() =>
            {
                Self::Batch {
                    relationship_id,
                    batch_size: config.relationship_batch_size,
                }
            }
            _ => Self::Individual,
        }
    }
}

/// Reject points the service could not interpret.
pub fn validate_point(point: &MapPoint) -> Result<(), ConfigError> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return Err(ConfigError::InvalidPoint {
            x: point.x,
            y: point.y,
        });
    }
    Ok(())
}

fn check_url(field: &'static str, url: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field,
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn individual() -> ResolverConfig {
        ResolverConfig {
            property_service_url: "https://gis.example.org/rest/services/Parcels/MapServer/0".into(),
            owner_service_url: "https://gis.example.org/rest/services/Parcels/MapServer/1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.max_results, 50);
        assert_eq!(config.concurrency_limit, 5);
        assert!(config.toggle_enabled);
        assert!(config.mask_pii);
        assert_eq!(config.fields.parcel_id, "FNR_FDS");
    }

    #[test]
    fn individual_config_validates() {
        individual().validate().unwrap();
        assert_eq!(OwnerStrategy::select(&individual()), OwnerStrategy::Individual);
    }

    #[test]
    fn missing_property_service_rejected() {
        let config = ResolverConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPropertyService)
        ));
    }

    #[test]
    fn individual_requires_owner_service() {
        let config = ResolverConfig {
            owner_service_url: String::new(),
            ..individual()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOwnerService)
        ));
    }

    #[test]
    fn non_http_url_rejected() {
        let config = ResolverConfig {
            property_service_url: "ftp://example.org/layer".into(),
            ..individual()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "propertyServiceUrl", .. })
        ));
    }

    #[test]
    fn zero_limits_rejected() {
        let config = ResolverConfig {
            concurrency_limit: 0,
            ..individual()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroLimit("concurrencyLimit"))
        ));
    }

    #[test]
    fn batch_requires_flag_and_relationship() {
        let only_flag = ResolverConfig {
            batch_owner_query: true,
            ..individual()
        };
        assert_eq!(OwnerStrategy::select(&only_flag), OwnerStrategy::Individual);

        let only_relationship = ResolverConfig {
            relationship_id: Some(3),
            ..individual()
        };
        assert_eq!(
            OwnerStrategy::select(&only_relationship),
            OwnerStrategy::Individual
        );

        let both = ResolverConfig {
            batch_owner_query: true,
            relationship_id: Some(3),
            ..individual()
        };
        assert_eq!(
            OwnerStrategy::select(&both),
            OwnerStrategy::Batch {
                relationship_id: 3,
                batch_size: 50
            }
        );
    }

    #[test]
    fn batch_does_not_need_owner_service() {
        let config = ResolverConfig {
            batch_owner_query: true,
            relationship_id: Some(3),
            owner_service_url: String::new(),
            ..individual()
        };
        config.validate().unwrap();
    }

    #[test]
    fn non_finite_point_rejected() {
        assert!(validate_point(&MapPoint::new(f64::NAN, 1.0)).is_err());
        validate_point(&MapPoint::new(674_000.0, 6_580_000.0)).unwrap();
    }

    #[test]
    fn load_camel_case_json_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "propertyServiceUrl": "https://gis.example.org/parcels/0",
                "ownerServiceUrl": "https://gis.example.org/parcels/1",
                "relationshipId": 2,
                "batchOwnerQuery": true,
                "maxResults": 10,
                "fields": {{ "ownerName": "OWNER" }}
            }}"#
        )
        .unwrap();

        let config = ResolverConfig::load(file.path()).unwrap();
        assert_eq!(config.max_results, 10);
        assert_eq!(config.relationship_id, Some(2));
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.fields.owner_name, "OWNER");
        assert_eq!(config.fields.parcel_id, "FNR_FDS");
    }

    #[test]
    fn load_missing_file_errors() {
        let result = ResolverConfig::load(Path::new("/nonexistent/parcelwise.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
