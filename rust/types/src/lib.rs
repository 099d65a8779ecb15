mod attached_function;
mod collection;
mod database;
mod function;
mod ids;
mod metadata;
mod segment;
mod tenant;
mod task;

pub use attached_function::{AttachFunctionRequest, AttachedFunction, DELETED_NAME_PREFIX};
pub use collection::{
    Collection, DEFAULT_OUTPUT_COLLECTION_CONFIGURATION, DEFAULT_OUTPUT_COLLECTION_DIMENSION,
};
pub use database::Database;
pub use function::Function;
pub use ids::{
    AttachedFunctionUuid, CollectionUuid, DatabaseUuid, FunctionUuid, SegmentUuid, TaskUuid,
    MINIMAL_UUID_V7,
};
pub use metadata::{metadata_from_rows, Metadata, MetadataConversionError, MetadataRow, MetadataValue};
pub use segment::{output_collection_segment_kinds, SegmentScope, SegmentType};
pub use tenant::{tenant_from_row, Tenant, TenantRow};
pub use task::{CreateTaskRequest, ScheduleEntry, Task};
