//! Externally sourced item records.
//!
//! Records arrive as JSON in the API's item `data` shape, either from the
//! server or from a translation of a web page. Converting one into the
//! internal representation fails with a [`ParsingError`] when the JSON is
//! malformed and with a [`SchemaError`] when it is well formed but does not
//! fit the item schema.

use crate::schema::{self, SchemaError};
use bibsync_store::{Field, Tag};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// A record could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    /// The input is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The record is not a JSON object.
    #[error("record is not an object")]
    NotAnObject,

    /// A mandatory key is missing.
    #[error("missing key '{0}'")]
    MissingKey(String),

    /// A value has the wrong type or format.
    #[error("invalid value for '{key}': expected {expected}")]
    InvalidValue {
        /// Offending key.
        key: String,
        /// What was expected.
        expected: String,
    },
}

/// Converting a record failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record is malformed.
    #[error(transparent)]
    Parsing(#[from] ParsingError),

    /// The record does not fit the schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Keys of the item `data` object that are not fields.
const RESERVED_KEYS: &[&str] = &[
    "key",
    "version",
    "itemType",
    "parentItem",
    "collections",
    "tags",
    "relations",
    "creators",
    "dateAdded",
    "dateModified",
    "deleted",
    "inPublications",
];

/// A validated item record.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    /// Item key (generated by the caller when the source has none).
    pub key: String,
    /// Item type.
    pub item_type: String,
    /// Version reported by the source (0 for new records).
    pub version: u64,
    /// Parent item.
    pub parent_key: Option<String>,
    /// Collection membership.
    pub collection_keys: BTreeSet<String>,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Field values, with base keys resolved.
    pub fields: Vec<Field>,
    /// Trash flag.
    pub trashed: bool,
    /// Creation timestamp, if the source has one.
    pub date_added: Option<DateTime<Utc>>,
}

impl ItemRecord {
    /// Creates an empty record of the given type.
    pub fn new(key: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            item_type: item_type.into(),
            version: 0,
            parent_key: None,
            collection_keys: BTreeSet::new(),
            tags: Vec::new(),
            fields: Vec::new(),
            trashed: false,
            date_added: None,
        }
    }

    /// Sets a field, resolving its base key.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.push(Field {
            key: key.to_string(),
            base_key: schema::base_field(key).map(str::to_string),
            value: value.into(),
        });
        self
    }

    /// Parses and validates a record from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ParsingError::InvalidJson(e.to_string()))?;
        Self::from_json(&value)
    }

    /// Parses and validates a record from a JSON value.
    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        let object = value.as_object().ok_or(ParsingError::NotAnObject)?;

        let key = required_str(object, "key")?.to_string();
        let item_type = required_str(object, "itemType")?.to_string();
        let version = match object.get("version") {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_u64().ok_or_else(|| invalid("version", "unsigned integer"))?,
        };
        let parent_key = optional_str(object, "parentItem")?.map(str::to_string);

        let collection_keys = match object.get("collections") {
            None | Some(Value::Null) => BTreeSet::new(),
            Some(Value::Array(keys)) => keys
                .iter()
                .map(|k| {
                    k.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("collections", "array of strings"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid("collections", "array of strings").into()),
        };

        let tags = match object.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(tags)) => tags.iter().map(parse_tag).collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid("tags", "array of tag objects").into()),
        };

        let trashed = match object.get("deleted") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            Some(_) => return Err(invalid("deleted", "boolean").into()),
        };

        let date_added = optional_str(object, "dateAdded")?
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|_| invalid("dateAdded", "ISO 8601 timestamp"))
            })
            .transpose()?;

        let mut fields = Vec::new();
        for (name, value) in object {
            if RESERVED_KEYS.contains(&name.as_str()) {
                continue;
            }
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Null => continue,
                _ => return Err(invalid(name, "string").into()),
            };
            fields.push(Field {
                key: name.clone(),
                base_key: schema::base_field(name).map(str::to_string),
                value,
            });
        }

        schema::validate(&item_type, fields.iter().map(|f| f.key.as_str()))?;

        Ok(Self {
            key,
            item_type,
            version,
            parent_key,
            collection_keys,
            tags,
            fields,
            trashed,
            date_added,
        })
    }

    /// Validates the record against the schema.
    pub fn validate(&self) -> Result<(), SchemaError> {
        schema::validate(&self.item_type, self.fields.iter().map(|f| f.key.as_str()))
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }
}

fn invalid(key: &str, expected: &str) -> ParsingError {
    ParsingError::InvalidValue {
        key: key.to_string(),
        expected: expected.to_string(),
    }
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str, ParsingError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ParsingError::MissingKey(key.to_string())),
        Some(v) => v.as_str().ok_or_else(|| invalid(key, "string")),
    }
}

fn optional_str<'a>(
    object: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, ParsingError> {
    match object.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| invalid(key, "string")),
    }
}

fn parse_tag(value: &Value) -> Result<Tag, ParsingError> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid("tags", "array of tag objects"))?;
    let name = required_str(object, "tag")?;
    let tag_type = match object.get("type") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .and_then(|t| u8::try_from(t).ok())
            .ok_or_else(|| invalid("type", "tag type 0 or 1"))?,
    };
    Ok(Tag {
        name: name.to_string(),
        tag_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_record() {
        let record = ItemRecord::from_json(&json!({
            "key": "ABCD2345",
            "version": 4,
            "itemType": "webpage",
            "title": "Rust",
            "websiteTitle": "rust-lang.org",
            "collections": ["COLL2345"],
            "tags": [{"tag": "lang"}, {"tag": "auto", "type": 1}],
            "creators": [],
            "relations": {},
            "dateAdded": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(record.key, "ABCD2345");
        assert_eq!(record.version, 4);
        assert_eq!(record.field("title"), Some("Rust"));
        let website = record.fields.iter().find(|f| f.key == "websiteTitle").unwrap();
        assert_eq!(website.base_key.as_deref(), Some("publicationTitle"));
        assert_eq!(record.tags[1].tag_type, 1);
        assert!(record.collection_keys.contains("COLL2345"));
        assert!(record.date_added.is_some());
    }

    #[test]
    fn malformed_records_are_parsing_errors() {
        assert_eq!(
            ItemRecord::from_json(&json!([1, 2])),
            Err(RecordError::Parsing(ParsingError::NotAnObject))
        );
        assert_eq!(
            ItemRecord::from_json(&json!({"itemType": "book"})),
            Err(RecordError::Parsing(ParsingError::MissingKey("key".into())))
        );
        assert!(matches!(
            ItemRecord::from_json(&json!({"key": "A", "itemType": "book", "tags": "x"})),
            Err(RecordError::Parsing(ParsingError::InvalidValue { .. }))
        ));
        assert!(matches!(
            ItemRecord::from_json_str("{not json"),
            Err(RecordError::Parsing(ParsingError::InvalidJson(_)))
        ));
    }

    #[test]
    fn schema_violations_are_schema_errors() {
        assert_eq!(
            ItemRecord::from_json(&json!({"key": "A", "itemType": "hologram"})),
            Err(RecordError::Schema(SchemaError::UnknownItemType(
                "hologram".into()
            )))
        );
        assert!(matches!(
            ItemRecord::from_json(&json!({"key": "A", "itemType": "note", "ISBN": "1"})),
            Err(RecordError::Schema(SchemaError::InvalidField { .. }))
        ));
    }

    #[test]
    fn builder_validates() {
        let record = ItemRecord::new("ABCD2345", "book").with_field("title", "T");
        assert!(record.validate().is_ok());
        let record = record.with_field("DOI", "10.1/x");
        assert!(record.validate().is_err());
    }
}
