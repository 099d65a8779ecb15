use std::sync::Arc;

use chrono::Utc;
use taskctl_types::{CreateTaskRequest, ScheduleEntry, Task, TaskUuid, MINIMAL_UUID_V7};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{CoordinatorError, FieldConflict};
use crate::heap_client::HeapClient;

/// Implements `CreateTask`'s three-phase commit: a transactional insert
/// (Phase 1), a heap `Push` outside any transaction (Phase 2), and a final
/// `UpdateLowestLiveNonce` write that flips the task to READY (Phase 3).
#[derive(Clone)]
pub struct TaskEngine {
    catalog: Catalog,
    heap_client: Arc<dyn HeapClient>,
}

impl TaskEngine {
    pub fn new(catalog: Catalog, heap_client: Arc<dyn HeapClient>) -> Self {
        Self {
            catalog,
            heap_client,
        }
    }

    #[tracing::instrument(skip(self, req))]
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<TaskUuid, CoordinatorError> {
        let (task_id, needs_push) = self.phase1(&req).await?;

        if !needs_push {
            tracing::info!(task_id = %task_id, "create_task fully idempotent, no push needed");
            return Ok(task_id);
        }

        let schedule = ScheduleEntry {
            partitioning_uuid: req.input_collection_id,
            scheduling_uuid: task_id,
            nonce: MINIMAL_UUID_V7,
            next_scheduled: Utc::now(),
        };
        tracing::info!(task_id = %task_id, input_collection_id = %req.input_collection_id, "create_task phase 2: pushing to heap");
        self.heap_client
            .push(req.input_collection_id, vec![schedule])
            .await?;

        self.catalog
            .update_lowest_live_nonce(task_id, MINIMAL_UUID_V7)
            .await?;
        tracing::info!(task_id = %task_id, "create_task phase 3 committed, task is ready");
        Ok(task_id)
    }

    /// Phase 1: inside one transaction, adopt a matching existing row or
    /// insert a new PARTIAL one. Returns `(task_id, needs_push)` where
    /// `needs_push` is false only when the task was already READY.
    async fn phase1(&self, req: &CreateTaskRequest) -> Result<(TaskUuid, bool), CoordinatorError> {
        let mut tx = self.catalog.begin().await?;

        if let Some(existing) = self
            .catalog
            .get_any_task_by_name(&mut tx, req.input_collection_id, &req.name)
            .await?
        {
            self.validate_matches_request(&mut tx, &existing, req).await?;
            tx.commit().await?;
            let needs_push = existing.lowest_live_nonce.is_none();
            return Ok((existing.id, needs_push));
        }

        let database_id = self
            .catalog
            .resolve_database_id(&mut tx, &req.tenant_id, &req.database)
            .await?
            .ok_or(CoordinatorError::DatabaseNotFound)?;
        let operator_id = self
            .catalog
            .resolve_function_id(&mut tx, &req.operator_name)
            .await?
            .ok_or(CoordinatorError::FunctionNotFound)?;
        if !self
            .catalog
            .collection_exists(&mut tx, req.input_collection_id, &req.tenant_id, &req.database)
            .await?
        {
            return Err(CoordinatorError::CollectionNotFound);
        }
        if self
            .catalog
            .output_collection_name_taken(&mut tx, req.input_collection_id, &req.output_collection_name)
            .await?
        {
            return Err(CoordinatorError::AlreadyExists {
                field: "output_collection_name",
                conflict: FieldConflict {
                    field: "output_collection_name",
                    existing: req.output_collection_name.clone(),
                    requested: req.output_collection_name.clone(),
                },
            });
        }

        let id = TaskUuid::new();
        let next_nonce = Uuid::now_v7();
        self.catalog
            .insert_task(&mut tx, id, req, database_id, operator_id, next_nonce)
            .await?;
        tx.commit().await?;
        tracing::info!(task_id = %id, "create_task phase 1 committed, task is PARTIAL");
        Ok((id, true))
    }

    /// Mirrors `AttachedFunctionEngine::validate_matches_request`: operator
    /// name, tenant, database must agree; any mismatch is `AlreadyExists`.
    async fn validate_matches_request(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        existing: &Task,
        req: &CreateTaskRequest,
    ) -> Result<(), CoordinatorError> {
        let existing_operator = self
            .catalog
            .get_function(tx, existing.operator_id)
            .await?
            .ok_or(CoordinatorError::FunctionNotFound)?;
        if existing_operator.name != req.operator_name {
            return Err(conflict("operator_name", &existing_operator.name, &req.operator_name));
        }
        if existing.tenant_id != req.tenant_id {
            return Err(conflict("tenant_id", &existing.tenant_id, &req.tenant_id));
        }
        let existing_database = self
            .catalog
            .resolve_database_name(
                tx,
                taskctl_types::DatabaseUuid(Uuid::parse_str(&existing.database_id)?),
            )
            .await?
            .ok_or(CoordinatorError::DatabaseNotFound)?;
        if existing_database != req.database {
            return Err(conflict("database", &existing_database, &req.database));
        }
        Ok(())
    }
}

fn conflict(field: &'static str, existing: &str, requested: &str) -> CoordinatorError {
    CoordinatorError::AlreadyExists {
        field,
        conflict: FieldConflict {
            field,
            existing: existing.to_string(),
            requested: requested.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_client::FakeHeapClient;
    use taskctl_sqlite::db::test_utils;
    use taskctl_sqlite::SqliteDb;

    async fn test_catalog(input_collection_id: taskctl_types::CollectionUuid) -> Catalog {
        let db: SqliteDb = test_utils::get_new_sqlite_db().await;
        seed_fixture(&db, input_collection_id).await;
        Catalog::new(db)
    }

    async fn seed_fixture(db: &SqliteDb, input_collection_id: taskctl_types::CollectionUuid) {
        sqlx::query("INSERT INTO tenants (id, resource_name) VALUES ('test-tenant', 'test-tenant')")
            .execute(db.get_conn())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO databases (id, name, tenant_id) VALUES ('db-1', 'test-database', 'test-tenant')",
        )
        .execute(db.get_conn())
        .await
        .unwrap();
        sqlx::query("INSERT INTO functions (id, name) VALUES ('fn-1', 'record_counter')")
            .execute(db.get_conn())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO collections (id, name, configuration_json_str, dimension, tenant, database, database_id, total_records_post_compaction, size_bytes_post_compaction, last_compaction_time_secs, is_deleted) \
             VALUES ($1, 'input', '{}', 1, 'test-tenant', 'test-database', 'db-1', 0, 0, 0, 0)",
        )
        .bind(input_collection_id.to_string())
        .execute(db.get_conn())
        .await
        .unwrap();
    }

    fn happy_path_request(input_collection_id: taskctl_types::CollectionUuid) -> CreateTaskRequest {
        CreateTaskRequest {
            name: "test-task".to_string(),
            input_collection_id,
            output_collection_name: "output-collection".to_string(),
            operator_name: "record_counter".to_string(),
            tenant_id: "test-tenant".to_string(),
            database: "test-database".to_string(),
            min_records_for_task: 100,
            params: Some(serde_json::json!({"param1": "value1"})),
        }
    }

    #[tokio::test]
    async fn happy_path_creates_ready_task_with_minimal_nonce() {
        let input_collection_id = taskctl_types::CollectionUuid::new();
        let catalog = test_catalog(input_collection_id).await;
        let heap = Arc::new(FakeHeapClient::new());
        let engine = TaskEngine::new(catalog, heap.clone());

        let req = happy_path_request(input_collection_id);
        let task_id = engine.create_task(req.clone()).await.unwrap();

        let pushed = heap.pushed();
        assert_eq!(pushed.len(), 1);
        let (collection_id, schedules) = &pushed[0];
        assert_eq!(*collection_id, req.input_collection_id);
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].scheduling_uuid, task_id);
        assert_eq!(schedules[0].nonce, MINIMAL_UUID_V7);
    }

    #[tokio::test]
    async fn recovers_after_heap_failure_reusing_same_task_id() {
        let input_collection_id = taskctl_types::CollectionUuid::new();
        let catalog = test_catalog(input_collection_id).await;
        let heap = Arc::new(FakeHeapClient::new());
        heap.fail_next_pushes(1);
        let engine = TaskEngine::new(catalog, heap.clone());

        let req = happy_path_request(input_collection_id);

        // First attempt fails at Phase 2.
        let first_err = engine.create_task(req.clone()).await;
        assert!(first_err.is_err());

        // Second identical attempt recovers using the same task id.
        let task_id = engine.create_task(req.clone()).await.unwrap();
        let pushed = heap.pushed();
        assert_eq!(pushed.len(), 1, "only the successful retry's push is recorded");
        assert_eq!(pushed[0].1[0].scheduling_uuid, task_id);
    }

    #[tokio::test]
    async fn param_mismatch_is_already_exists_with_no_writes() {
        let input_collection_id = taskctl_types::CollectionUuid::new();
        let catalog = test_catalog(input_collection_id).await;
        let heap = Arc::new(FakeHeapClient::new());
        let engine = TaskEngine::new(catalog, heap.clone());

        let req = happy_path_request(input_collection_id);
        engine.create_task(req.clone()).await.unwrap();

        let mut conflicting = req.clone();
        conflicting.operator_name = "different_operator".to_string();
        let err = engine.create_task(conflicting).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyExists { .. }));
        assert_eq!(heap.pushed().len(), 1, "no additional push on conflicting retry");
    }
}
