use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{AttachedFunctionUuid, CollectionUuid, FunctionUuid};

/// Reserved prefix applied to soft-deleted rows; names starting with it are
/// rejected at creation time.
pub const DELETED_NAME_PREFIX: &str = "_deleted_";

/// Authoritative record of an attached function binding. `is_ready` gates
/// visibility to read APIs; a row remains invisible to ordinary readers until
/// `FinishCreate` flips it.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachedFunction {
    pub id: AttachedFunctionUuid,
    pub name: String,
    pub tenant_id: String,
    pub database_id: String,
    pub input_collection_id: CollectionUuid,
    pub output_collection_name: String,
    pub output_collection_id: Option<CollectionUuid>,
    pub function_id: FunctionUuid,
    pub function_params: Value,
    pub min_records_for_invocation: u64,
    pub completion_offset: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub oldest_written_nonce: Option<uuid::Uuid>,
    pub current_attempts: i64,
    pub is_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttachedFunction {
    pub fn is_deleted_name(name: &str) -> bool {
        name.starts_with(DELETED_NAME_PREFIX)
    }

    /// Name a soft-deleted row is renamed to, freeing the original name for
    /// a fresh `Attach` during the grace window before `FinishDeletion`.
    pub fn deleted_name(id: AttachedFunctionUuid, name: &str) -> String {
        format!("{DELETED_NAME_PREFIX}{id}_{name}")
    }
}

/// Inputs to `Attach` (phase 1 of attached-function creation).
#[derive(Clone, Debug)]
pub struct AttachFunctionRequest {
    pub name: String,
    pub input_collection_id: CollectionUuid,
    pub output_collection_name: String,
    pub function_name: String,
    pub tenant_id: String,
    pub database: String,
    pub min_records_for_invocation: u64,
    pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deleted_name_matches_reserved_prefix() {
        assert!(AttachedFunction::is_deleted_name("_deleted_my-fn"));
        assert!(!AttachedFunction::is_deleted_name("my-fn"));
    }

    #[test]
    fn deleted_name_is_recognized_by_is_deleted_name() {
        let id = AttachedFunctionUuid::new();
        let renamed = AttachedFunction::deleted_name(id, "my-fn");
        assert!(AttachedFunction::is_deleted_name(&renamed));
        assert!(renamed.ends_with("my-fn"));
    }
}
