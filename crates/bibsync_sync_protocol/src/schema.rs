//! Item type schema.
//!
//! A deliberately small schema: the item types the submission pipeline
//! accepts from external sources and the fields valid for each. Variant
//! fields map to their base field (`websiteTitle` → `publicationTitle`).

use thiserror::Error;

/// A record does not conform to the item schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The item type is not known.
    #[error("unknown item type '{0}'")]
    UnknownItemType(String),

    /// The field is not valid for the item type.
    #[error("field '{field}' is not valid for item type '{item_type}'")]
    InvalidField {
        /// Item type of the record.
        item_type: String,
        /// Offending field.
        field: String,
    },

    /// A field required by the item type is missing.
    #[error("item type '{item_type}' requires field '{field}'")]
    MissingRequiredField {
        /// Item type of the record.
        item_type: String,
        /// Missing field.
        field: String,
    },
}

/// Fields valid for every regular item type.
const COMMON_FIELDS: &[&str] = &[
    "title",
    "abstractNote",
    "date",
    "shortTitle",
    "language",
    "url",
    "accessDate",
    "archive",
    "archiveLocation",
    "libraryCatalog",
    "callNumber",
    "rights",
    "extra",
];

/// Fields specific to one item type.
fn type_fields(item_type: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match item_type {
        "book" => &[
            "series", "seriesNumber", "volume", "numberOfVolumes", "edition", "place",
            "publisher", "numPages", "ISBN",
        ],
        "bookSection" => &[
            "bookTitle", "series", "seriesNumber", "volume", "edition", "place", "publisher",
            "pages", "ISBN",
        ],
        "journalArticle" => &[
            "publicationTitle", "volume", "issue", "pages", "series", "seriesTitle",
            "journalAbbreviation", "DOI", "ISSN",
        ],
        "magazineArticle" | "newspaperArticle" => {
            &["publicationTitle", "volume", "issue", "pages", "edition", "place", "section", "ISSN"]
        }
        "conferencePaper" => &[
            "proceedingsTitle", "conferenceName", "place", "publisher", "volume", "pages",
            "series", "DOI", "ISBN",
        ],
        "thesis" => &["thesisType", "university", "place", "numPages"],
        "report" => &["reportNumber", "reportType", "institution", "place", "pages", "seriesTitle"],
        "preprint" => &["repository", "archiveID", "place", "series", "DOI"],
        "document" => &["publisher"],
        "webpage" => &["websiteTitle", "websiteType"],
        "note" => &["note"],
        "attachment" => &["contentType", "charset", "filename", "linkMode", "md5", "mtime", "path"],
        _ => return None,
    };
    Some(fields)
}

/// Fields an item type cannot be created without.
fn required_fields(item_type: &str) -> &'static [&'static str] {
    match item_type {
        "attachment" => &["linkMode"],
        _ => &[],
    }
}

/// Returns true if the item type is part of the schema.
#[must_use]
pub fn is_known_item_type(item_type: &str) -> bool {
    type_fields(item_type).is_some()
}

/// Returns true if `field` is valid for `item_type`.
#[must_use]
pub fn is_valid_field(item_type: &str, field: &str) -> bool {
    match type_fields(item_type) {
        // Notes and attachments only take their own fields plus a few common ones.
        Some(fields) if matches!(item_type, "note" | "attachment") => {
            fields.contains(&field) || matches!(field, "title" | "url" | "accessDate")
        }
        Some(fields) => fields.contains(&field) || COMMON_FIELDS.contains(&field),
        None => false,
    }
}

/// Returns the base field for a type-specific variant field.
#[must_use]
pub fn base_field(field: &str) -> Option<&'static str> {
    match field {
        "websiteTitle" | "bookTitle" | "proceedingsTitle" => Some("publicationTitle"),
        "university" | "institution" | "repository" => Some("publisher"),
        "thesisType" | "reportType" | "websiteType" => Some("type"),
        "reportNumber" => Some("number"),
        _ => None,
    }
}

/// Validates a field set against the schema.
pub(crate) fn validate<'a>(
    item_type: &str,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    if !is_known_item_type(item_type) {
        return Err(SchemaError::UnknownItemType(item_type.to_string()));
    }
    let mut present = Vec::new();
    for field in fields {
        if !is_valid_field(item_type, field) {
            return Err(SchemaError::InvalidField {
                item_type: item_type.to_string(),
                field: field.to_string(),
            });
        }
        present.push(field);
    }
    if let Some(missing) = required_fields(item_type)
        .iter()
        .find(|f| !present.contains(f))
    {
        return Err(SchemaError::MissingRequiredField {
            item_type: item_type.to_string(),
            field: (*missing).to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_and_specific_fields() {
        assert!(is_valid_field("book", "title"));
        assert!(is_valid_field("book", "ISBN"));
        assert!(!is_valid_field("book", "DOI"));
        assert!(is_valid_field("webpage", "websiteTitle"));
        assert!(!is_valid_field("note", "publisher"));
        assert!(!is_valid_field("spaceship", "title"));
    }

    #[test]
    fn validate_reports_first_problem() {
        assert_eq!(
            validate("painting", ["title"]),
            Err(SchemaError::UnknownItemType("painting".into()))
        );
        assert_eq!(
            validate("webpage", ["title", "ISBN"]),
            Err(SchemaError::InvalidField {
                item_type: "webpage".into(),
                field: "ISBN".into()
            })
        );
        assert!(matches!(
            validate("attachment", ["title"]),
            Err(SchemaError::MissingRequiredField { .. })
        ));
        assert!(validate("journalArticle", ["title", "DOI"]).is_ok());
    }

    #[test]
    fn variant_fields_have_base() {
        assert_eq!(base_field("websiteTitle"), Some("publicationTitle"));
        assert_eq!(base_field("title"), None);
    }
}
