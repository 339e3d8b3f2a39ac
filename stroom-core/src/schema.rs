// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dataset and table structure used to validate payload shape before events are applied.
//!
//! Schemas are plain data models loaded from JSON documents supplied by the schema collaborator;
//! interpreting full JSON-Schema semantics is that collaborator's concern, not ours. What the
//! pipeline needs from a schema is limited: the identifier fields of a table, the declared fields
//! with their value types, which fields reference records in other tables, and the dataset's
//! coordinate reference system for geometry values.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::Fields;
use crate::key::{self, KeyError};

/// Value type of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    #[serde(alias = "geojson")]
    Geometry,
    Object,
    Array,
}

impl FieldType {
    /// Checks whether a JSON value is acceptable for this field type. `null` is acceptable for
    /// every type; emptiness is a value, not a shape error.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Integer, Value::Number(number)) => {
                number.is_i64() || number.is_u64()
            }
            (FieldType::Boolean, Value::Bool(_)) => true,
            // Geometry values travel as WKT strings.
            (FieldType::Geometry, Value::String(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Geometry => "geometry",
            FieldType::Object => "object",
            FieldType::Array => "array",
        };
        write!(f, "{name}")
    }
}

/// Target of a relation field, written as `"<dataset>:<table>"` in schema documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationTarget {
    pub dataset: String,
    pub table: String,
}

impl TryFrom<String> for RelationTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once(':') {
            Some((dataset, table)) if !dataset.is_empty() && !table.is_empty() => Ok(Self {
                dataset: dataset.to_owned(),
                table: table.to_owned(),
            }),
            _ => Err(format!("invalid relation target \"{value}\"")),
        }
    }
}

impl From<RelationTarget> for String {
    fn from(value: RelationTarget) -> Self {
        format!("{}:{}", value.dataset, value.table)
    }
}

/// One field of a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Set when this field references a record in another table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationTarget>,
}

/// One table of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: String,

    /// Field names making up the record identity: the first is the `identificatie`, an optional
    /// second names the `volgnummer` field of temporal tables.
    pub identifier: Vec<String>,

    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// All fields which reference records in other tables.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|field| field.relation.is_some())
    }

    /// All geometry-typed fields.
    pub fn geometry_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|field| field.field_type == FieldType::Geometry)
    }

    /// Reads the record identity out of an entity payload, as named by `identifier`.
    pub fn identity_from_entity(&self, entity: &Fields) -> Result<(String, Option<u64>), KeyError> {
        let id_field = self
            .identifier
            .first()
            .ok_or_else(|| KeyError::MissingIdentity("identifier".to_owned()))?;
        let id_value = entity
            .get(id_field)
            .ok_or_else(|| KeyError::MissingIdentity(id_field.clone()))?;
        let identificatie = key::identity_string(id_field, id_value)?;

        let volgnummer = match self.identifier.get(1) {
            Some(field) => {
                let value = entity
                    .get(field)
                    .ok_or_else(|| KeyError::MissingIdentity(field.clone()))?;
                Some(volgnummer_value(field, value)?)
            }
            None => None,
        };

        Ok((identificatie, volgnummer))
    }

    /// Builds the initial field mapping of a new document.
    ///
    /// String fields start out as an empty string, number and geometry fields as `null`; other
    /// field types only appear once a payload supplies them.
    pub fn empty_fields(&self) -> Fields {
        let mut fields = Fields::new();
        for field in &self.fields {
            let initial = match field.field_type {
                FieldType::String => Value::String(String::new()),
                FieldType::Number | FieldType::Integer | FieldType::Geometry => Value::Null,
                FieldType::Boolean | FieldType::Object | FieldType::Array => continue,
            };
            fields.insert(field.name.clone(), initial);
        }
        fields
    }

    /// Validates the shape of a (partial or full) payload against this table.
    pub fn validate(&self, payload: &Fields) -> Result<(), SchemaViolation> {
        for (name, value) in payload {
            let Some(field) = self.field(name) else {
                return Err(SchemaViolation::UnknownField {
                    table: self.id.clone(),
                    field: name.clone(),
                });
            };

            // Relation values come as a bare identity or as an object carrying the identity
            // fields of the target record.
            if field.relation.is_some() {
                let acceptable = matches!(
                    value,
                    Value::Null | Value::String(_) | Value::Number(_) | Value::Object(_)
                );
                if !acceptable {
                    return Err(SchemaViolation::InvalidRelation {
                        field: name.clone(),
                    });
                }
                continue;
            }

            if !field.field_type.matches(value) {
                return Err(SchemaViolation::TypeMismatch {
                    field: name.clone(),
                    expected: field.field_type,
                    found: json_type_name(value),
                });
            }
        }
        Ok(())
    }
}

/// One dataset: a named collection of tables with a shared coordinate reference system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub id: String,

    /// Coordinate reference system, e.g. `"EPSG:28992"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,

    pub tables: Vec<TableSchema>,
}

impl DatasetSchema {
    pub fn table(&self, id: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.id == id)
    }

    /// The numeric SRID part of the dataset's CRS, e.g. `"28992"` for `"EPSG:28992"`.
    pub fn srid(&self) -> Option<&str> {
        self.crs
            .as_deref()
            .and_then(|crs| crs.split(':').next_back())
            .filter(|srid| !srid.is_empty())
    }
}

/// Supplies dataset schemas per dataset id.
pub trait SchemaProvider {
    fn dataset(&self, id: &str) -> Option<&DatasetSchema>;

    /// Convenience lookup resolving dataset and table in one step.
    fn table(&self, dataset: &str, table: &str) -> Result<(&DatasetSchema, &TableSchema), SchemaViolation> {
        let dataset_schema = self
            .dataset(dataset)
            .ok_or_else(|| SchemaViolation::UnknownDataset(dataset.to_owned()))?;
        let table_schema =
            dataset_schema
                .table(table)
                .ok_or_else(|| SchemaViolation::UnknownTable {
                    dataset: dataset.to_owned(),
                    table: table.to_owned(),
                })?;
        Ok((dataset_schema, table_schema))
    }
}

/// Schema collection held in memory, loaded from the configured schema source.
#[derive(Clone, Debug, Default)]
pub struct SchemaSet {
    datasets: HashMap<String, DatasetSchema>,
}

impl SchemaSet {
    pub fn new(datasets: impl IntoIterator<Item = DatasetSchema>) -> Self {
        Self {
            datasets: datasets
                .into_iter()
                .map(|dataset| (dataset.id.clone(), dataset))
                .collect(),
        }
    }

    /// Loads schemas from a JSON file or from all `.json` files in a directory.
    ///
    /// A file holds either a single dataset document or an array of them.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let mut set = Self::default();
        if path.is_dir() {
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                if entry.path().extension().is_some_and(|ext| ext == "json") {
                    set.load_file(&entry.path())?;
                }
            }
        } else {
            set.load_file(path)?;
        }
        Ok(set)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), SchemaLoadError> {
        let contents = fs::read(path)?;
        let value: Value = serde_json::from_slice(&contents)?;
        match value {
            Value::Array(entries) => {
                for entry in entries {
                    self.insert(serde_json::from_value(entry)?);
                }
            }
            entry => self.insert(serde_json::from_value(entry)?),
        }
        Ok(())
    }

    pub fn insert(&mut self, dataset: DatasetSchema) {
        self.datasets.insert(dataset.id.clone(), dataset);
    }
}

impl SchemaProvider for SchemaSet {
    fn dataset(&self, id: &str) -> Option<&DatasetSchema> {
        self.datasets.get(id)
    }
}

/// A payload failed structural validation and the event was rejected.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SchemaViolation {
    #[error("no schema known for dataset \"{0}\"")]
    UnknownDataset(String),

    #[error("no schema known for table \"{table}\" in dataset \"{dataset}\"")]
    UnknownTable { dataset: String, table: String },

    #[error("table \"{table}\" declares no field \"{field}\"")]
    UnknownField { table: String, field: String },

    #[error("field \"{field}\" expects {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("relation field \"{field}\" carries neither an identity nor an identity object")]
    InvalidRelation { field: String },
}

/// Schemas could not be read from the configured source.
#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("could not read schema source: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse schema document: {0}")]
    Json(#[from] serde_json::Error),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn volgnummer_value(field: &str, value: &Value) -> Result<u64, KeyError> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| KeyError::InvalidVolgnummer(field.to_owned())),
        Value::String(text) => text
            .parse()
            .map_err(|_| KeyError::InvalidVolgnummer(field.to_owned())),
        _ => Err(KeyError::InvalidVolgnummer(field.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::key::KeyError;

    use super::{
        DatasetSchema, FieldType, RelationTarget, SchemaProvider, SchemaSet, SchemaViolation,
        TableSchema,
    };

    fn gebieden() -> DatasetSchema {
        serde_json::from_value(json!({
            "id": "gebieden",
            "crs": "EPSG:28992",
            "tables": [
                {
                    "id": "bouwblokken",
                    "identifier": ["identificatie", "volgnummer"],
                    "fields": [
                        {"name": "identificatie", "type": "string"},
                        {"name": "volgnummer", "type": "integer"},
                        {"name": "code", "type": "string"},
                        {"name": "begin_geldigheid", "type": "string"},
                        {"name": "geometrie", "type": "geometry"},
                        {"name": "ligt_in_buurt", "type": "string",
                         "relation": "gebieden:buurten"}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn parses_schema_document() {
        let dataset = gebieden();
        assert_eq!(dataset.srid(), Some("28992"));

        let table = dataset.table("bouwblokken").unwrap();
        let relation = table.field("ligt_in_buurt").unwrap();
        assert_eq!(
            relation.relation,
            Some(RelationTarget {
                dataset: "gebieden".to_owned(),
                table: "buurten".to_owned()
            })
        );
        assert_eq!(table.field("geometrie").unwrap().field_type, FieldType::Geometry);
    }

    #[test]
    fn identity_from_entity() {
        let dataset = gebieden();
        let table = dataset.table("bouwblokken").unwrap();

        let entity = json!({"identificatie": "0363", "volgnummer": 2, "code": "AA01"});
        let identity = table.identity_from_entity(entity.as_object().unwrap()).unwrap();
        assert_eq!(identity, ("0363".to_owned(), Some(2)));

        let entity = json!({"code": "AA01"});
        let result = table.identity_from_entity(entity.as_object().unwrap());
        assert_eq!(result, Err(KeyError::MissingIdentity("identificatie".to_owned())));

        let entity = json!({"identificatie": "0363", "volgnummer": "not-a-number"});
        let result = table.identity_from_entity(entity.as_object().unwrap());
        assert_eq!(result, Err(KeyError::InvalidVolgnummer("volgnummer".to_owned())));
    }

    #[test]
    fn empty_fields_seed() {
        let dataset = gebieden();
        let table = dataset.table("bouwblokken").unwrap();
        let fields = table.empty_fields();

        assert_eq!(fields["code"], json!(""));
        assert_eq!(fields["volgnummer"], json!(null));
        assert_eq!(fields["geometrie"], json!(null));
    }

    #[test]
    fn validates_payload_shape() {
        let dataset = gebieden();
        let table = dataset.table("bouwblokken").unwrap();

        let payload = json!({"code": "AA01", "volgnummer": 1});
        assert!(table.validate(payload.as_object().unwrap()).is_ok());

        let payload = json!({"onbekend": 1});
        assert!(matches!(
            table.validate(payload.as_object().unwrap()),
            Err(SchemaViolation::UnknownField { .. })
        ));

        let payload = json!({"code": 12.5});
        assert!(matches!(
            table.validate(payload.as_object().unwrap()),
            Err(SchemaViolation::TypeMismatch { .. })
        ));

        // Null is a value, not a shape error.
        let payload = json!({"code": null});
        assert!(table.validate(payload.as_object().unwrap()).is_ok());

        // Relations accept both the bare identity and the identity-object form.
        let payload = json!({"ligt_in_buurt": "B3"});
        assert!(table.validate(payload.as_object().unwrap()).is_ok());
        let payload = json!({"ligt_in_buurt": {"identificatie": "B3", "volgnummer": 1}});
        assert!(table.validate(payload.as_object().unwrap()).is_ok());
        let payload = json!({"ligt_in_buurt": [1, 2]});
        assert!(matches!(
            table.validate(payload.as_object().unwrap()),
            Err(SchemaViolation::InvalidRelation { .. })
        ));
    }

    #[test]
    fn provider_lookup() {
        let schemas = SchemaSet::new([gebieden()]);
        assert!(schemas.table("gebieden", "bouwblokken").is_ok());
        assert_eq!(
            schemas.table("verkeer", "wegen").unwrap_err(),
            SchemaViolation::UnknownDataset("verkeer".to_owned())
        );
        assert!(matches!(
            schemas.table("gebieden", "wegen").unwrap_err(),
            SchemaViolation::UnknownTable { .. }
        ));
    }
}
