//! Record types flowing through the resolution pipeline.
//!
//! Service responses arrive as loose attribute bags. Everything the pipeline
//! branches on (identifiers, owner name and address parts) is lifted into typed
//! fields by [`ParcelRecord::from_attributes`] and
//! [`OwnerRecord::from_attributes`]; whatever is left over is kept verbatim in
//! an `extra` side-map so callers can still display it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FieldMap;

/// Raw attribute bag as returned by the feature service.
pub type AttributeBag = serde_json::Map<String, Value>;

/// Identifier of a parcel within the feature service.
///
/// Services return either strings or numbers depending on the layer schema.
/// Use [`crate::normalize_parcel_key`] for any set or map operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParcelId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParcelId {
    /// Lift a JSON attribute value into an identifier. Null, booleans and
    /// structured values are not identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// True when the identifier is numeric and can be written unquoted in a
    /// service `where` clause.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

impl fmt::Display for ParcelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            // Integral floats print like integers so 5.0 and 5 share a key.
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
                write!(f, "{}", *v as i64)
            }
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParcelId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for ParcelId {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// A clicked map location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
    /// Spatial reference well-known id. `None` means the service default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,
}

impl MapPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, wkid: None }
    }

    pub fn with_wkid(mut self, wkid: u32) -> Self {
        self.wkid = Some(wkid);
        self
    }
}

/// Geometry kind tag carried through to display rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Multipoint,
    Polyline,
    Polygon,
    Envelope,
    #[default]
    Unknown,
}

impl GeometryKind {
    /// Map a service geometry type name (`esriGeometryPolygon`, `polygon`, ...)
    /// onto a kind tag.
    pub fn from_service_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        match lower.strip_prefix("esrigeometry").unwrap_or(&lower) {
            "point" => Self::Point,
            "multipoint" => Self::Multipoint,
            "polyline" => Self::Polyline,
            "polygon" => Self::Polygon,
            "envelope" => Self::Envelope,
            _ => Self::Unknown,
        }
    }
}

/// Raw geometry feature as returned by the service, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub kind: GeometryKind,
    pub payload: Value,
}

/// Parcel attributes: the fields the pipeline reads, plus everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<i64>,
    /// Human-readable parcel designation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// One parcel from the point query. Immutable after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelRecord {
    pub id: Option<ParcelId>,
    pub attributes: ParcelAttributes,
    pub geometry: Option<Geometry>,
}

impl ParcelRecord {
    /// Split a service attribute bag into typed fields using `fields`.
    pub fn from_attributes(
        mut bag: AttributeBag,
        geometry: Option<Geometry>,
        fields: &FieldMap,
    ) -> Self {
        let id = bag.remove(&fields.parcel_id).and_then(|v| ParcelId::from_value(&v));
        let attributes = ParcelAttributes {
            object_id: take_i64(&mut bag, &fields.object_id),
            designation: take_text(&mut bag, &fields.designation),
            uuid: take_text(&mut bag, &fields.uuid),
            extra: bag.into_iter().collect(),
        };
        Self {
            id,
            attributes,
            geometry,
        }
    }

    pub fn geometry_kind(&self) -> GeometryKind {
        self.geometry
            .as_ref()
            .map(|g| g.kind)
            .unwrap_or(GeometryKind::Unknown)
    }
}

/// One ownership record related to a parcel.
///
/// Owner identity is derived by [`crate::build_owner_identity_key`], it is not a
/// field of the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub name: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub org_number: Option<String>,
    /// Ownership share as published, e.g. `1/2`.
    pub share: Option<String>,
    /// Pre-aggregated owner list, when the service publishes one.
    pub owner_list: Option<String>,
    pub object_id: Option<i64>,
    /// Parcel identifier as stored on the owner record itself.
    pub parcel_ref: Option<ParcelId>,
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl OwnerRecord {
    /// Split a service attribute bag into typed owner fields using `fields`.
    pub fn from_attributes(mut bag: AttributeBag, fields: &FieldMap) -> Self {
        Self {
            name: take_text(&mut bag, &fields.owner_name),
            address: take_text(&mut bag, &fields.owner_address),
            postal_code: take_text(&mut bag, &fields.owner_postal_code),
            city: take_text(&mut bag, &fields.owner_city),
            org_number: take_text(&mut bag, &fields.owner_org_number),
            share: take_text(&mut bag, &fields.owner_share),
            owner_list: take_text(&mut bag, &fields.owner_list),
            object_id: take_i64(&mut bag, &fields.object_id),
            parcel_ref: bag
                .remove(&fields.parcel_id)
                .and_then(|v| ParcelId::from_value(&v)),
            uuid: take_text(&mut bag, &fields.uuid),
            extra: bag.into_iter().collect(),
        }
    }

    /// True for organisations (companies, municipalities), which are never masked.
    pub fn is_organisation(&self) -> bool {
        self.org_number.is_some()
    }
}

/// Maps a parcel's internal row identifier to its parcel identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRef {
    pub object_id: i64,
    pub parcel_id: ParcelId,
}

/// How the owner text of a row was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OwnerStatus {
    #[default]
    Known,
    /// The service returned no owner for the parcel.
    Unknown,
    /// The owner fetch for this parcel failed; the row is a placeholder.
    QueryFailed,
}

/// One renderable selection row: a parcel paired with one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayRow {
    /// Stable across resolutions for the same parcel and owner.
    pub id: String,
    pub parcel_id: ParcelId,
    pub parcel_key: String,
    pub attributes: ParcelAttributes,
    pub owner_text: String,
    #[serde(default)]
    pub owner_status: OwnerStatus,
    #[serde(default)]
    pub geometry_kind: GeometryKind,
}

fn take_text(bag: &mut AttributeBag, key: &str) -> Option<String> {
    match bag.remove(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn take_i64(bag: &mut AttributeBag, key: &str) -> Option<i64> {
    match bag.remove(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> AttributeBag {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn parcel_id_from_value() {
        assert_eq!(ParcelId::from_value(&json!(5)), Some(ParcelId::Int(5)));
        assert_eq!(ParcelId::from_value(&json!("5")), Some(ParcelId::from("5")));
        assert_eq!(ParcelId::from_value(&json!(2.5)), Some(ParcelId::Float(2.5)));
        assert_eq!(ParcelId::from_value(&Value::Null), None);
        assert_eq!(ParcelId::from_value(&json!(true)), None);
    }

    #[test]
    fn integral_float_displays_as_integer() {
        assert_eq!(ParcelId::Float(5.0).to_string(), "5");
        assert_eq!(ParcelId::Float(5.25).to_string(), "5.25");
        assert_eq!(ParcelId::Int(-3).to_string(), "-3");
    }

    #[test]
    fn parcel_from_attributes_splits_known_fields() {
        let fields = FieldMap::default();
        let parcel = ParcelRecord::from_attributes(
            bag(json!({
                "FNR_FDS": "140000123",
                "OBJECTID": 17,
                "FASTIGHET": "KOMMUN ANKAN 1:2",
                "AREA": 512.5
            })),
            None,
            &fields,
        );
        assert_eq!(parcel.id, Some(ParcelId::from("140000123")));
        assert_eq!(parcel.attributes.object_id, Some(17));
        assert_eq!(
            parcel.attributes.designation.as_deref(),
            Some("KOMMUN ANKAN 1:2")
        );
        assert_eq!(parcel.attributes.extra.len(), 1);
        assert_eq!(parcel.attributes.extra["AREA"], json!(512.5));
        assert_eq!(parcel.geometry_kind(), GeometryKind::Unknown);
    }

    #[test]
    fn owner_from_attributes_trims_and_drops_blanks() {
        let fields = FieldMap::default();
        let owner = OwnerRecord::from_attributes(
            bag(json!({
                "NAMN": "  Anna Andersson ",
                "ADRESS": "",
                "POSTNR": 12345,
                "ANDEL": "1/2",
                "NOTE": "x"
            })),
            &fields,
        );
        assert_eq!(owner.name.as_deref(), Some("Anna Andersson"));
        assert_eq!(owner.address, None);
        assert_eq!(owner.postal_code.as_deref(), Some("12345"));
        assert_eq!(owner.share.as_deref(), Some("1/2"));
        assert!(!owner.is_organisation());
        assert_eq!(owner.extra.len(), 1);
    }

    #[test]
    fn geometry_kind_from_service_names() {
        assert_eq!(
            GeometryKind::from_service_name("esriGeometryPolygon"),
            GeometryKind::Polygon
        );
        assert_eq!(GeometryKind::from_service_name("point"), GeometryKind::Point);
        assert_eq!(GeometryKind::from_service_name("mesh"), GeometryKind::Unknown);
    }

    #[test]
    fn display_row_json_roundtrip() {
        let row = DisplayRow {
            id: "7::unknown".into(),
            parcel_id: ParcelId::Int(7),
            parcel_key: "7".into(),
            attributes: ParcelAttributes::default(),
            owner_text: "Unknown owner".into(),
            owner_status: OwnerStatus::Unknown,
            geometry_kind: GeometryKind::Polygon,
        };
        let json = serde_json::to_string(&row).unwrap();
        let parsed: DisplayRow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, row);
    }
}
