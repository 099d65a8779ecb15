/// A tenant scopes a set of databases. `name` carries through from the row's
/// primary key; a tenant has no separate surrogate UUID.
#[derive(Clone, Debug, PartialEq)]
pub struct Tenant {
    pub name: String,
    pub resource_name: Option<String>,
}

/// Flat shape of one `tenants` row, as read off the metastore.
#[derive(Clone, Debug)]
pub struct TenantRow {
    pub id: String,
    pub resource_name: Option<String>,
}

/// `name := row.id`; `resource_name` carries through unchanged.
pub fn tenant_from_row(row: TenantRow) -> Tenant {
    Tenant {
        name: row.id,
        resource_name: row.resource_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_becomes_tenant_name() {
        let tenant = tenant_from_row(TenantRow {
            id: "t1".to_string(),
            resource_name: Some("t1-resource".to_string()),
        });
        assert_eq!(tenant.name, "t1");
        assert_eq!(tenant.resource_name, Some("t1-resource".to_string()));
    }

    #[test]
    fn absent_resource_name_carries_through_as_none() {
        let tenant = tenant_from_row(TenantRow {
            id: "t1".to_string(),
            resource_name: None,
        });
        assert_eq!(tenant.resource_name, None);
    }
}
