//! HTTP client for ArcGIS-REST-style feature layers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parcelwise_core::{
    AttributeBag, FieldMap, Geometry, GeometryKind, MapPoint, OwnerRecord, ParcelId, ParcelRecord,
    RowRef,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{FeatureLayer, LayerConnector, ServiceError, with_cancel};

const DEFAULT_OBJECT_ID_FIELD: &str = "OBJECTID";

/// Connects [`ArcGisLayer`] handles over a shared `reqwest` client.
pub struct ArcGisConnector {
    client: reqwest::Client,
    fields: FieldMap,
}

impl ArcGisConnector {
    pub fn new(fields: FieldMap) -> Self {
        Self {
            client: reqwest::Client::new(),
            fields,
        }
    }
}

#[async_trait]
impl LayerConnector for ArcGisConnector {
    type Layer = ArcGisLayer;

    /// Fetch the layer description once to learn its object-id field.
    async fn connect(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ArcGisLayer, ServiceError> {
        let url = url.trim_end_matches('/').to_string();
        info!(url = %url, "fetching layer description");
        let info: LayerInfo = with_cancel(cancel, async {
            let resp = self
                .client
                .get(&url)
                .query(&[("f", "json")])
                .send()
                .await?;
            read_json(resp).await
        })
        .await?;

        let object_id_field = info.object_id_field().to_string();
        debug!(url = %url, object_id_field = %object_id_field, "layer connected");
        Ok(ArcGisLayer {
            client: self.client.clone(),
            url,
            fields: self.fields.clone(),
            object_id_field,
            closed: AtomicBool::new(false),
        })
    }
}

/// One connected feature layer.
pub struct ArcGisLayer {
    client: reqwest::Client,
    url: String,
    fields: FieldMap,
    object_id_field: String,
    closed: AtomicBool,
}

impl ArcGisLayer {
    fn ensure_open(&self) -> Result<(), ServiceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::Closed(self.url.clone()));
        }
        Ok(())
    }

    /// POST a form to `{url}/{endpoint}` and decode the JSON reply.
    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, ServiceError> {
        self.ensure_open()?;
        let url = format!("{}/{endpoint}", self.url);
        with_cancel(cancel, async {
            let resp = self.client.post(&url).form(params).send().await?;
            read_json(resp).await
        })
        .await
    }

    async fn query(
        &self,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<FeatureSet, ServiceError> {
        self.post("query", params, cancel).await
    }
}

#[async_trait]
impl FeatureLayer for ArcGisLayer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query_parcels_at_point(
        &self,
        point: &MapPoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParcelRecord>, ServiceError> {
        let mut params = vec![
            ("geometry", point_geometry(point).to_string()),
            ("geometryType", "esriGeometryPoint".to_string()),
            ("spatialRel", "esriSpatialRelIntersects".to_string()),
            ("outFields", "*".to_string()),
            ("returnGeometry", "true".to_string()),
            ("f", "json".to_string()),
        ];
        if let Some(wkid) = point.wkid {
            params.push(("inSR", wkid.to_string()));
            params.push(("outSR", wkid.to_string()));
        }

        let set = self.query(&params, cancel).await?;
        let parcels = set.into_parcels(&self.fields);
        info!(url = %self.url, count = parcels.len(), "point query returned parcels");
        Ok(parcels)
    }

    async fn query_owners_for_parcel(
        &self,
        parcel_id: &ParcelId,
        cancel: &CancellationToken,
    ) -> Result<Vec<OwnerRecord>, ServiceError> {
        let params = [
            (
                "where",
                format!("{} = {}", self.fields.parcel_id, sql_literal(parcel_id)),
            ),
            ("outFields", "*".to_string()),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];
        let set = self.query(&params, cancel).await?;
        Ok(set
            .features
            .into_iter()
            .map(|f| OwnerRecord::from_attributes(f.attributes, &self.fields))
            .collect())
    }

    async fn query_row_ids(
        &self,
        parcel_ids: &[ParcelId],
        cancel: &CancellationToken,
    ) -> Result<Vec<RowRef>, ServiceError> {
        if parcel_ids.is_empty() {
            return Ok(vec![]);
        }
        let params = [
            ("where", in_clause(&self.fields.parcel_id, parcel_ids)),
            (
                "outFields",
                format!("{},{}", self.object_id_field, self.fields.parcel_id),
            ),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];
        let set = self.query(&params, cancel).await?;
        Ok(set.into_row_refs(&self.object_id_field, &self.fields.parcel_id))
    }

    async fn query_related_owners(
        &self,
        object_ids: &[i64],
        relationship_id: i64,
        cancel: &CancellationToken,
    ) -> Result<HashMap<i64, Vec<OwnerRecord>>, ServiceError> {
        if object_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = object_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let params = [
            ("objectIds", ids),
            ("relationshipId", relationship_id.to_string()),
            ("outFields", "*".to_string()),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];
        let resp: RelatedResponse = self.post("queryRelatedRecords", &params, cancel).await?;
        let related = resp.into_owner_map(&self.fields);
        info!(url = %self.url, groups = related.len(), "relationship query complete");
        Ok(related)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ── Wire types ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerInfo {
    object_id_field: Option<String>,
    #[serde(default)]
    fields: Vec<FieldInfo>,
}

impl LayerInfo {
    fn object_id_field(&self) -> &str {
        if let Some(name) = self.object_id_field.as_deref() {
            return name;
        }
        self.fields
            .iter()
            .find(|f| f.field_type == "esriFieldTypeOID")
            .map(|f| f.name.as_str())
            .unwrap_or(DEFAULT_OBJECT_ID_FIELD)
    }
}

#[derive(Deserialize)]
struct FieldInfo {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureSet {
    #[serde(default)]
    features: Vec<Feature>,
    geometry_type: Option<String>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    attributes: AttributeBag,
    geometry: Option<Value>,
}

impl FeatureSet {
    fn into_parcels(self, fields: &FieldMap) -> Vec<ParcelRecord> {
        let kind = self
            .geometry_type
            .as_deref()
            .map(GeometryKind::from_service_name)
            .unwrap_or_default();
        self.features
            .into_iter()
            .map(|f| {
                let geometry = f.geometry.map(|payload| Geometry { kind, payload });
                ParcelRecord::from_attributes(f.attributes, geometry, fields)
            })
            .collect()
    }

    fn into_row_refs(self, object_id_field: &str, parcel_field: &str) -> Vec<RowRef> {
        self.features
            .into_iter()
            .filter_map(|f| {
                let object_id = f.attributes.get(object_id_field)?.as_i64()?;
                let parcel_id = ParcelId::from_value(f.attributes.get(parcel_field)?)?;
                Some(RowRef {
                    object_id,
                    parcel_id,
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedResponse {
    #[serde(default)]
    related_record_groups: Vec<RelatedGroup>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedGroup {
    object_id: i64,
    #[serde(default)]
    related_records: Vec<Feature>,
}

impl RelatedResponse {
    fn into_owner_map(self, fields: &FieldMap) -> HashMap<i64, Vec<OwnerRecord>> {
        let mut map: HashMap<i64, Vec<OwnerRecord>> = HashMap::new();
        for group in self.related_record_groups {
            map.entry(group.object_id).or_default().extend(
                group
                    .related_records
                    .into_iter()
                    .map(|f| OwnerRecord::from_attributes(f.attributes, fields)),
            );
        }
        map
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<String>,
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ServiceError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ServiceError::Server {
            code: i64::from(status.as_u16()),
            message: body,
        });
    }
    let body: Value = resp.json().await?;
    decode_body(body)
}

/// Decode a JSON reply, turning an embedded `{"error": {...}}` into a server error.
///
/// ArcGIS services report most failures with HTTP 200 and an error object.
fn decode_body<T: DeserializeOwned>(body: Value) -> Result<T, ServiceError> {
    if let Some(error) = body.get("error") {
        let error: ErrorBody = serde_json::from_value(error.clone())?;
        let message = match error.details.first() {
            Some(detail) if error.message.is_empty() => detail.clone(),
            Some(detail) => format!("{} ({detail})", error.message),
            None => error.message,
        };
        return Err(ServiceError::Server {
            code: error.code,
            message,
        });
    }
    Ok(serde_json::from_value(body)?)
}

fn point_geometry(point: &MapPoint) -> Value {
    match point.wkid {
        Some(wkid) => json!({ "x": point.x, "y": point.y, "spatialReference": { "wkid": wkid } }),
        None => json!({ "x": point.x, "y": point.y }),
    }
}

/// Render a parcel id as a SQL literal. Text is single-quoted with embedded
/// quotes doubled.
fn sql_literal(id: &ParcelId) -> String {
    if id.is_numeric() {
        id.to_string()
    } else {
        format!("'{}'", id.to_string().replace('\'', "''"))
    }
}

fn in_clause(field: &str, ids: &[ParcelId]) -> String {
    let values = ids.iter().map(sql_literal).collect::<Vec<_>>().join(", ");
    format!("{field} IN ({values})")
}
