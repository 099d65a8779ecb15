use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskctl_error::{ChromaError, ErrorCodes};
use thiserror::Error;

/// A single metadata attribute value. Exactly one variant is ever populated for a
/// given attribute; the tag is preserved end to end rather than collapsed into a
/// dynamically-typed value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValue {
    Str(String),
    Int(i64),
    Float(f64),
}

pub type Metadata = HashMap<String, MetadataValue>;

/// A metadata row as persisted, with at most one value column populated.
/// The converter rejects rows where more than one column is set.
#[derive(Clone, Debug, Default)]
pub struct MetadataRow {
    pub key: String,
    pub str_value: Option<String>,
    pub int_value: Option<i64>,
    pub float_value: Option<f64>,
}

#[derive(Debug, Error)]
pub enum MetadataConversionError {
    #[error("metadata row for key {0} has no populated value column")]
    NoValueSet(String),
    #[error("metadata row for key {0} has more than one populated value column")]
    MultipleValuesSet(String),
}

impl ChromaError for MetadataConversionError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

impl TryFrom<MetadataRow> for (String, MetadataValue) {
    type Error = MetadataConversionError;

    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        let populated = [
            row.str_value.is_some(),
            row.int_value.is_some(),
            row.float_value.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        match populated {
            0 => Err(MetadataConversionError::NoValueSet(row.key)),
            1 => {
                let value = if let Some(s) = row.str_value {
                    MetadataValue::Str(s)
                } else if let Some(i) = row.int_value {
                    MetadataValue::Int(i)
                } else {
                    MetadataValue::Float(row.float_value.expect("checked by populated count"))
                };
                Ok((row.key, value))
            }
            _ => Err(MetadataConversionError::MultipleValuesSet(row.key)),
        }
    }
}

/// Converts a flat list of metadata rows into a typed map. An empty or absent
/// row list maps to `None`, not `Some(HashMap::new())` — metadata presence is
/// itself meaningful for callers deciding whether to render a `metadata` field.
pub fn metadata_from_rows(
    rows: Vec<MetadataRow>,
) -> Result<Option<Metadata>, MetadataConversionError> {
    if rows.is_empty() {
        return Ok(None);
    }
    let mut map = Metadata::with_capacity(rows.len());
    for row in rows {
        let (key, value) = row.try_into()?;
        map.insert(key, value);
    }
    Ok(Some(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rows_map_to_none() {
        assert_eq!(metadata_from_rows(vec![]).unwrap(), None);
    }

    #[test]
    fn single_str_row_converts() {
        let rows = vec![MetadataRow {
            key: "color".to_string(),
            str_value: Some("blue".to_string()),
            ..Default::default()
        }];
        let metadata = metadata_from_rows(rows).unwrap().unwrap();
        assert_eq!(
            metadata.get("color"),
            Some(&MetadataValue::Str("blue".to_string()))
        );
    }

    #[test]
    fn row_with_no_value_set_errors() {
        let rows = vec![MetadataRow {
            key: "color".to_string(),
            ..Default::default()
        }];
        assert!(metadata_from_rows(rows).is_err());
    }

    #[test]
    fn row_with_multiple_values_set_errors() {
        let rows = vec![MetadataRow {
            key: "color".to_string(),
            str_value: Some("blue".to_string()),
            int_value: Some(1),
            ..Default::default()
        }];
        assert!(metadata_from_rows(rows).is_err());
    }
}
