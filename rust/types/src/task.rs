use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{CollectionUuid, FunctionUuid, TaskUuid};

/// Task represents a lightweight, scheduler-driven analog of an attached
/// function: it is triggered by collection writes and runs an operator on a
/// schedule maintained by the heap service, rather than by direct invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: TaskUuid,
    pub name: String,
    pub tenant_id: String,
    pub database_id: String,
    pub input_collection_id: CollectionUuid,
    pub output_collection_name: String,
    pub operator_id: FunctionUuid,
    /// Next nonce to be scheduled; always non-nil once the row exists.
    pub next_nonce: Uuid,
    /// `None` means "not yet initialized" — the task is in the PARTIAL state
    /// and must never be surfaced to external readers (invariant I5).
    pub lowest_live_nonce: Option<Uuid>,
    pub next_run: Option<DateTime<Utc>>,
    pub min_records_for_task: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether this task is in the READY state (I5): visible to readers.
    pub fn is_ready(&self) -> bool {
        self.lowest_live_nonce.is_some()
    }
}

/// Inputs to `CreateTask` (mirrors `AttachFunctionRequest` but targets tasks).
#[derive(Clone, Debug)]
pub struct CreateTaskRequest {
    pub name: String,
    pub input_collection_id: CollectionUuid,
    pub output_collection_name: String,
    pub operator_name: String,
    pub tenant_id: String,
    pub database: String,
    pub min_records_for_task: u64,
    pub params: Option<serde_json::Value>,
}

/// A schedule entry pushed to the heap service on a task's Phase 2.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleEntry {
    pub partitioning_uuid: CollectionUuid,
    pub scheduling_uuid: TaskUuid,
    pub nonce: Uuid,
    pub next_scheduled: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MINIMAL_UUID_V7;

    #[test]
    fn task_with_null_lowest_live_nonce_is_not_ready() {
        let task = Task {
            id: TaskUuid::new(),
            name: "t".to_string(),
            tenant_id: "tenant".to_string(),
            database_id: "db".to_string(),
            input_collection_id: CollectionUuid::new(),
            output_collection_name: "out".to_string(),
            operator_id: FunctionUuid::new(),
            next_nonce: Uuid::new_v4(),
            lowest_live_nonce: None,
            next_run: None,
            min_records_for_task: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!task.is_ready());
    }

    #[test]
    fn task_with_minimal_nonce_is_ready() {
        let mut task = Task {
            id: TaskUuid::new(),
            name: "t".to_string(),
            tenant_id: "tenant".to_string(),
            database_id: "db".to_string(),
            input_collection_id: CollectionUuid::new(),
            output_collection_name: "out".to_string(),
            operator_id: FunctionUuid::new(),
            next_nonce: Uuid::new_v4(),
            lowest_live_nonce: None,
            next_run: None,
            min_records_for_task: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        task.lowest_live_nonce = Some(MINIMAL_UUID_V7);
        assert!(task.is_ready());
    }
}
