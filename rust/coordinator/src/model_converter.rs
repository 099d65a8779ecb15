//! Pure conversion rules between persistence rows and domain objects.
//!
//! A nil or empty persistence list maps to a nil domain container (not an
//! empty one) for metadata collections, but to an empty list for entity
//! lists such as `Collection` — those two rules look similar but are
//! opposite in shape, so they get distinct functions rather than one
//! generic helper.

use taskctl_types::{Metadata, MetadataConversionError, MetadataRow, Tenant, TenantRow};

/// Lifts a flat list of metadata rows into a typed map, or `None` if the
/// list was empty — an empty map would imply "this entity has metadata, all
/// of it empty", which is a different fact than "no metadata was read".
pub fn metadata_from_rows(rows: Vec<MetadataRow>) -> Result<Option<Metadata>, MetadataConversionError> {
    taskctl_types::metadata_from_rows(rows)
}

/// `name := row.id`; `resource_name` carries through unchanged.
pub fn tenant_from_row(row: TenantRow) -> Tenant {
    taskctl_types::tenant_from_row(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskctl_types::MetadataValue;

    #[test]
    fn empty_row_list_converts_to_none_not_empty_map() {
        let result = metadata_from_rows(vec![]).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn rows_convert_to_tagged_variants() {
        let rows = vec![
            MetadataRow {
                key: "a".to_string(),
                str_value: Some("hello".to_string()),
                int_value: None,
                float_value: None,
            },
            MetadataRow {
                key: "b".to_string(),
                str_value: None,
                int_value: Some(7),
                float_value: None,
            },
        ];
        let result = metadata_from_rows(rows).unwrap().unwrap();
        assert_eq!(result.get("a"), Some(&MetadataValue::Str("hello".to_string())));
        assert_eq!(result.get("b"), Some(&MetadataValue::Int(7)));
    }

    #[test]
    fn row_with_multiple_populated_columns_is_rejected() {
        let rows = vec![MetadataRow {
            key: "a".to_string(),
            str_value: Some("hello".to_string()),
            int_value: Some(1),
            float_value: None,
        }];
        assert!(metadata_from_rows(rows).is_err());
    }

    #[test]
    fn tenant_row_id_becomes_name() {
        let tenant = tenant_from_row(TenantRow {
            id: "t1".to_string(),
            resource_name: Some("t1-resource".to_string()),
        });
        assert_eq!(tenant.name, "t1");
        assert_eq!(tenant.resource_name, Some("t1-resource".to_string()));
    }
}
