use crate::{DatabaseUuid, Metadata};
use crate::CollectionUuid;

/// A collection as seen by the read catalog. Fields carry through unchanged
/// from the persistence row; the converter never reshapes them.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    pub collection_id: CollectionUuid,
    pub name: String,
    pub configuration_json_str: String,
    pub schema_str: Option<String>,
    pub metadata: Option<Metadata>,
    pub dimension: Option<i32>,
    pub tenant: String,
    pub database: String,
    pub database_id: DatabaseUuid,
    pub total_records_post_compaction: u64,
    pub size_bytes_post_compaction: u64,
    pub last_compaction_time_secs: u64,
}

/// Fixed defaults used when an attached function's `FinishCreate` mints a new
/// output collection.
pub const DEFAULT_OUTPUT_COLLECTION_DIMENSION: i32 = 1;
pub const DEFAULT_OUTPUT_COLLECTION_CONFIGURATION: &str = "{}";
