use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use taskctl_sqlite::SqliteDb;
use taskctl_types::{
    AttachedFunction, CollectionUuid, DatabaseUuid, Function, FunctionUuid, Task, TaskUuid,
};
use uuid::Uuid;

use crate::error::CoordinatorError;

/// Thin wrapper over the SQLite metastore pool. Every lifecycle-engine
/// operation that needs more than one statement opens a transaction here and
/// runs all of its reads/writes against it, so the uniqueness constraints and
/// intra-transaction re-checks described in the core design are the only
/// synchronization mechanism (no in-process locks).
#[derive(Debug, Clone)]
pub struct Catalog {
    db: SqliteDb,
}

impl Catalog {
    pub fn new(db: SqliteDb) -> Self {
        Self { db }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, CoordinatorError> {
        Ok(self.db.get_conn().begin().await?)
    }

    pub async fn resolve_database_id(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        tenant_id: &str,
        database: &str,
    ) -> Result<Option<DatabaseUuid>, CoordinatorError> {
        let row = sqlx::query("SELECT id FROM databases WHERE tenant_id = $1 AND name = $2")
            .bind(tenant_id)
            .bind(database)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => {
                let id: String = row.get("id");
                Ok(Some(DatabaseUuid::from_str(&id)?))
            }
            None => Ok(None),
        }
    }

    pub async fn resolve_function_id(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        function_name: &str,
    ) -> Result<Option<FunctionUuid>, CoordinatorError> {
        let row = sqlx::query("SELECT id FROM functions WHERE name = $1")
            .bind(function_name)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => {
                let id: String = row.get("id");
                Ok(Some(FunctionUuid::from_str(&id)?))
            }
            None => Ok(None),
        }
    }

    pub async fn get_function(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        function_id: FunctionUuid,
    ) -> Result<Option<Function>, CoordinatorError> {
        let row = sqlx::query("SELECT id, name FROM functions WHERE id = $1")
            .bind(function_id.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|row| Function {
            id: function_id,
            name: row.get("name"),
        }))
    }

    pub async fn collection_exists(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        collection_id: CollectionUuid,
        tenant: &str,
        database: &str,
    ) -> Result<bool, CoordinatorError> {
        let row = sqlx::query(
            "SELECT id FROM collections WHERE id = $1 AND tenant = $2 AND database = $3",
        )
        .bind(collection_id.to_string())
        .bind(tenant)
        .bind(database)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }

    //////////////////////// Attached functions ////////////////////////

    pub async fn get_any_attached_function_by_name(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        input_collection_id: CollectionUuid,
        name: &str,
    ) -> Result<Option<AttachedFunction>, CoordinatorError> {
        let row = sqlx::query(&format!(
            "{ATTACHED_FUNCTION_COLUMNS} WHERE input_collection_id = $1 AND name = $2 AND is_deleted = 0"
        ))
        .bind(input_collection_id.to_string())
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(row_to_attached_function).transpose()?)
    }

    pub async fn get_any_attached_function_by_id(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        id: taskctl_types::AttachedFunctionUuid,
    ) -> Result<Option<AttachedFunction>, CoordinatorError> {
        let row = sqlx::query(&format!(
            "{ATTACHED_FUNCTION_COLUMNS} WHERE id = $1 AND is_deleted = 0"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(row_to_attached_function).transpose()?)
    }

    pub async fn insert_attached_function(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        id: taskctl_types::AttachedFunctionUuid,
        req: &taskctl_types::AttachFunctionRequest,
        database_id: DatabaseUuid,
        function_id: FunctionUuid,
        params_json: &str,
    ) -> Result<(), CoordinatorError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO attached_functions (
                id, name, tenant_id, database_id, input_collection_id,
                output_collection_name, output_collection_id, function_id,
                function_params, min_records_for_invocation, completion_offset,
                last_run, oldest_written_nonce, current_attempts, is_ready,
                is_deleted, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $9, 0, NULL, NULL, 0, 0, 0, $10, $10)
            "#,
        )
        .bind(id.to_string())
        .bind(&req.name)
        .bind(&req.tenant_id)
        .bind(database_id.to_string())
        .bind(req.input_collection_id.to_string())
        .bind(&req.output_collection_name)
        .bind(function_id.to_string())
        .bind(params_json)
        .bind(req.min_records_for_invocation as i64)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn finish_create_attached_function(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        id: taskctl_types::AttachedFunctionUuid,
        output_collection_id: CollectionUuid,
    ) -> Result<(), CoordinatorError> {
        sqlx::query(
            "UPDATE attached_functions SET output_collection_id = $1, is_ready = 1, updated_at = $2 WHERE id = $3",
        )
        .bind(output_collection_id.to_string())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Frees `name` for re-`Attach` by renaming the row out of the way (see
    /// `AttachedFunction::deleted_name`); the row stays addressable by id
    /// until `finish_deletion_attached_function` removes it for good.
    pub async fn soft_delete_attached_function(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        id: taskctl_types::AttachedFunctionUuid,
    ) -> Result<(), CoordinatorError> {
        let row = sqlx::query("SELECT name FROM attached_functions WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        let name: String = row.try_get("name")?;
        if AttachedFunction::is_deleted_name(&name) {
            return Ok(());
        }
        let deleted_name = AttachedFunction::deleted_name(id, &name);

        sqlx::query(
            "UPDATE attached_functions SET name = $1, is_deleted = 1, updated_at = $2 WHERE id = $3",
        )
        .bind(deleted_name)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn hard_delete_attached_function(
        &self,
        id: taskctl_types::AttachedFunctionUuid,
    ) -> Result<(), CoordinatorError> {
        sqlx::query("DELETE FROM attached_functions WHERE id = $1")
            .bind(id.to_string())
            .execute(self.db.get_conn())
            .await?;
        Ok(())
    }

    pub async fn list_ready_attached_functions(
        &self,
        input_collection_id: CollectionUuid,
    ) -> Result<Vec<AttachedFunction>, CoordinatorError> {
        let rows = sqlx::query(&format!(
            "{ATTACHED_FUNCTION_COLUMNS} WHERE input_collection_id = $1 AND is_ready = 1 AND is_deleted = 0"
        ))
        .bind(input_collection_id.to_string())
        .fetch_all(self.db.get_conn())
        .await?;
        rows.into_iter().map(row_to_attached_function).collect()
    }

    pub async fn expired_partial_attached_functions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<taskctl_types::AttachedFunctionUuid>, CoordinatorError> {
        let rows = sqlx::query(
            "SELECT id FROM attached_functions WHERE is_ready = 0 AND is_deleted = 0 AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(self.db.get_conn())
        .await?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.get("id");
                Ok(taskctl_types::AttachedFunctionUuid::from_str(&id)?)
            })
            .collect()
    }

    pub async fn soft_deleted_attached_functions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AttachedFunction>, CoordinatorError> {
        let rows = sqlx::query(&format!(
            "{ATTACHED_FUNCTION_COLUMNS} WHERE is_deleted = 1 AND updated_at <= $1 LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(self.db.get_conn())
        .await?;
        rows.into_iter().map(row_to_attached_function).collect()
    }

    //////////////////////// Tasks ////////////////////////

    pub async fn get_any_task_by_name(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        input_collection_id: CollectionUuid,
        name: &str,
    ) -> Result<Option<Task>, CoordinatorError> {
        let row = sqlx::query(&format!(
            "{TASK_COLUMNS} WHERE input_collection_id = $1 AND name = $2 AND is_deleted = 0"
        ))
        .bind(input_collection_id.to_string())
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(row_to_task).transpose()?)
    }

    pub async fn output_collection_name_taken(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        input_collection_id: CollectionUuid,
        output_collection_name: &str,
    ) -> Result<bool, CoordinatorError> {
        let row = sqlx::query(
            "SELECT id FROM tasks WHERE input_collection_id = $1 AND output_collection_name = $2 AND is_deleted = 0",
        )
        .bind(input_collection_id.to_string())
        .bind(output_collection_name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }

    pub async fn insert_task(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        id: TaskUuid,
        req: &taskctl_types::CreateTaskRequest,
        database_id: DatabaseUuid,
        operator_id: FunctionUuid,
        next_nonce: Uuid,
    ) -> Result<(), CoordinatorError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, name, tenant_id, database_id, input_collection_id,
                output_collection_name, operator_id, next_nonce, lowest_live_nonce,
                next_run, min_records_for_task, is_deleted, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9, $10, 0, $9, $9)
            "#,
        )
        .bind(id.to_string())
        .bind(&req.name)
        .bind(&req.tenant_id)
        .bind(database_id.to_string())
        .bind(req.input_collection_id.to_string())
        .bind(&req.output_collection_name)
        .bind(operator_id.to_string())
        .bind(next_nonce.to_string())
        .bind(now)
        .bind(req.min_records_for_task as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_lowest_live_nonce(
        &self,
        id: TaskUuid,
        nonce: Uuid,
    ) -> Result<(), CoordinatorError> {
        sqlx::query("UPDATE tasks SET lowest_live_nonce = $1, updated_at = $2 WHERE id = $3")
            .bind(nonce.to_string())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(self.db.get_conn())
            .await?;
        Ok(())
    }

    //////////////////////// Collections (read catalog) ////////////////////////

    pub async fn get_collections(
        &self,
        collection_id: Option<CollectionUuid>,
        name: Option<&str>,
        tenant: &str,
        database: &str,
    ) -> Result<Vec<taskctl_types::Collection>, CoordinatorError> {
        let mut query = String::from(
            "SELECT id, name, configuration_json_str, schema_str, dimension, tenant, database, \
             database_id, total_records_post_compaction, size_bytes_post_compaction, \
             last_compaction_time_secs FROM collections WHERE tenant = $1 AND database = $2 AND is_deleted = 0",
        );
        if collection_id.is_some() {
            query.push_str(" AND id = $3");
        }
        if name.is_some() {
            query.push_str(if collection_id.is_some() {
                " AND name = $4"
            } else {
                " AND name = $3"
            });
        }
        let mut q = sqlx::query(&query).bind(tenant).bind(database);
        if let Some(collection_id) = collection_id {
            q = q.bind(collection_id.to_string());
        }
        if let Some(name) = name {
            q = q.bind(name);
        }
        let rows = q.fetch_all(self.db.get_conn()).await?;
        let mut collections = Vec::with_capacity(rows.len());
        for row in rows {
            let database_id: String = row.get("database_id");
            let id = CollectionUuid::from_str(&row.get::<String, _>("id"))?;
            let metadata_rows = self.get_collection_metadata_rows(id).await?;
            let metadata = crate::model_converter::metadata_from_rows(metadata_rows)?;
            collections.push(taskctl_types::Collection {
                collection_id: id,
                name: row.get("name"),
                configuration_json_str: row.get("configuration_json_str"),
                schema_str: row.get("schema_str"),
                metadata,
                dimension: row.get("dimension"),
                tenant: row.get("tenant"),
                database: row.get("database"),
                database_id: DatabaseUuid::from_str(&database_id)?,
                total_records_post_compaction: row.get::<i64, _>("total_records_post_compaction") as u64,
                size_bytes_post_compaction: row.get::<i64, _>("size_bytes_post_compaction") as u64,
                last_compaction_time_secs: row.get::<i64, _>("last_compaction_time_secs") as u64,
            });
        }
        Ok(collections)
    }

    async fn get_collection_metadata_rows(
        &self,
        collection_id: CollectionUuid,
    ) -> Result<Vec<taskctl_types::MetadataRow>, CoordinatorError> {
        let rows = sqlx::query(
            "SELECT key, str_value, int_value, float_value FROM collection_metadata WHERE collection_id = $1",
        )
        .bind(collection_id.to_string())
        .fetch_all(self.db.get_conn())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| taskctl_types::MetadataRow {
                key: row.get("key"),
                str_value: row.get("str_value"),
                int_value: row.get("int_value"),
                float_value: row.get("float_value"),
            })
            .collect())
    }

    /// Mints a new output collection plus its three fixed segments inside the
    /// given transaction (per `FinishCreate`'s collection-create step).
    pub async fn create_collection_and_segments(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        collection_id: CollectionUuid,
        name: &str,
        tenant: &str,
        database: &str,
        database_id: DatabaseUuid,
    ) -> Result<(), CoordinatorError> {
        sqlx::query(
            r#"
            INSERT INTO collections (
                id, name, configuration_json_str, schema_str, dimension, tenant,
                database, database_id, total_records_post_compaction,
                size_bytes_post_compaction, last_compaction_time_secs, is_deleted
            ) VALUES ($1, $2, $3, NULL, $4, $5, $6, $7, 0, 0, 0, 0)
            "#,
        )
        .bind(collection_id.to_string())
        .bind(name)
        .bind(taskctl_types::DEFAULT_OUTPUT_COLLECTION_CONFIGURATION)
        .bind(taskctl_types::DEFAULT_OUTPUT_COLLECTION_DIMENSION)
        .bind(tenant)
        .bind(database)
        .bind(database_id.to_string())
        .execute(&mut **tx)
        .await?;

        for kind in taskctl_types::output_collection_segment_kinds() {
            let segment_id = taskctl_types::SegmentUuid::new();
            sqlx::query(
                "INSERT INTO segments (id, collection_id, segment_type, scope) VALUES ($1, $2, $3, $4)",
            )
            .bind(segment_id.to_string())
            .bind(collection_id.to_string())
            .bind(kind.0.as_urn())
            .bind(kind.1.to_string())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    pub async fn soft_delete_collection(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        collection_id: CollectionUuid,
        tenant_id: &str,
    ) -> Result<(), CoordinatorError> {
        // Database name is intentionally left unscoped here: the collection ID
        // alone is sufficient to locate the row (see core spec design notes on
        // `Detach`'s empty database-name argument).
        sqlx::query("UPDATE collections SET is_deleted = 1 WHERE id = $1 AND tenant = $2")
            .bind(collection_id.to_string())
            .bind(tenant_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn resolve_database_name(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        database_id: DatabaseUuid,
    ) -> Result<Option<String>, CoordinatorError> {
        let row = sqlx::query("SELECT name FROM databases WHERE id = $1")
            .bind(database_id.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|row| row.get("name")))
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Option<taskctl_types::Tenant>, CoordinatorError> {
        let row = sqlx::query("SELECT id, resource_name FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(self.db.get_conn())
            .await?;
        Ok(row.map(|row| {
            crate::model_converter::tenant_from_row(taskctl_types::TenantRow {
                id: row.get("id"),
                resource_name: row.get("resource_name"),
            })
        }))
    }
}

const ATTACHED_FUNCTION_COLUMNS: &str = "SELECT id, name, tenant_id, database_id, input_collection_id, \
     output_collection_name, output_collection_id, function_id, function_params, \
     min_records_for_invocation, completion_offset, last_run, oldest_written_nonce, \
     current_attempts, is_ready, created_at, updated_at FROM attached_functions";

const TASK_COLUMNS: &str = "SELECT id, name, tenant_id, database_id, input_collection_id, \
     output_collection_name, operator_id, next_nonce, lowest_live_nonce, next_run, \
     min_records_for_task, created_at, updated_at FROM tasks";

fn row_to_attached_function(row: sqlx::sqlite::SqliteRow) -> Result<AttachedFunction, CoordinatorError> {
    let output_collection_id: Option<String> = row.get("output_collection_id");
    let oldest_written_nonce: Option<String> = row.get("oldest_written_nonce");
    Ok(AttachedFunction {
        id: taskctl_types::AttachedFunctionUuid::from_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        tenant_id: row.get("tenant_id"),
        database_id: row.get("database_id"),
        input_collection_id: CollectionUuid::from_str(&row.get::<String, _>("input_collection_id"))?,
        output_collection_name: row.get("output_collection_name"),
        output_collection_id: output_collection_id
            .map(|id| CollectionUuid::from_str(&id))
            .transpose()?,
        function_id: FunctionUuid::from_str(&row.get::<String, _>("function_id"))?,
        function_params: serde_json::from_str(&row.get::<String, _>("function_params"))?,
        min_records_for_invocation: row.get::<i64, _>("min_records_for_invocation") as u64,
        completion_offset: row.get::<i64, _>("completion_offset") as u64,
        last_run: row.get("last_run"),
        oldest_written_nonce: oldest_written_nonce
            .map(|n| Uuid::from_str(&n))
            .transpose()?,
        current_attempts: row.get("current_attempts"),
        is_ready: row.get::<i64, _>("is_ready") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_task(row: sqlx::sqlite::SqliteRow) -> Result<Task, CoordinatorError> {
    let lowest_live_nonce: Option<String> = row.get("lowest_live_nonce");
    Ok(Task {
        id: TaskUuid::from_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        tenant_id: row.get("tenant_id"),
        database_id: row.get("database_id"),
        input_collection_id: CollectionUuid::from_str(&row.get::<String, _>("input_collection_id"))?,
        output_collection_name: row.get("output_collection_name"),
        operator_id: FunctionUuid::from_str(&row.get::<String, _>("operator_id"))?,
        next_nonce: Uuid::from_str(&row.get::<String, _>("next_nonce"))?,
        lowest_live_nonce: lowest_live_nonce.map(|n| Uuid::from_str(&n)).transpose()?,
        next_run: row.get("next_run"),
        min_records_for_task: row.get::<i64, _>("min_records_for_task") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskctl_sqlite::db::test_utils;

    async fn seed_tenant_database_collection(db: &SqliteDb, collection_id: CollectionUuid) {
        sqlx::query("INSERT INTO tenants (id, resource_name) VALUES ('t1', 't1')")
            .execute(db.get_conn())
            .await
            .unwrap();
        sqlx::query("INSERT INTO databases (id, name, tenant_id) VALUES ('d1', 'db1', 't1')")
            .execute(db.get_conn())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO collections (id, name, configuration_json_str, dimension, tenant, database, database_id, total_records_post_compaction, size_bytes_post_compaction, last_compaction_time_secs, is_deleted) \
             VALUES ($1, 'col', '{}', 3, 't1', 'db1', 'd1', 0, 0, 0, 0)",
        )
        .bind(collection_id.to_string())
        .execute(db.get_conn())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn get_collections_lifts_metadata_rows_into_typed_map() {
        let db = test_utils::get_new_sqlite_db().await;
        let collection_id = CollectionUuid::new();
        seed_tenant_database_collection(&db, collection_id).await;
        sqlx::query(
            "INSERT INTO collection_metadata (collection_id, key, str_value, int_value, float_value) VALUES ($1, 'label', 'blue', NULL, NULL)",
        )
        .bind(collection_id.to_string())
        .execute(db.get_conn())
        .await
        .unwrap();

        let catalog = Catalog::new(db);
        let collections = catalog
            .get_collections(Some(collection_id), None, "t1", "db1")
            .await
            .unwrap();

        assert_eq!(collections.len(), 1);
        let metadata = collections[0].metadata.as_ref().unwrap();
        assert_eq!(
            metadata.get("label"),
            Some(&taskctl_types::MetadataValue::Str("blue".to_string()))
        );
    }

    #[tokio::test]
    async fn get_collections_reports_no_metadata_as_none_not_empty_map() {
        let db = test_utils::get_new_sqlite_db().await;
        let collection_id = CollectionUuid::new();
        seed_tenant_database_collection(&db, collection_id).await;

        let catalog = Catalog::new(db);
        let collections = catalog
            .get_collections(Some(collection_id), None, "t1", "db1")
            .await
            .unwrap();

        assert_eq!(collections.len(), 1);
        assert!(collections[0].metadata.is_none());
    }

    #[tokio::test]
    async fn get_tenant_converts_id_to_name() {
        let db = test_utils::get_new_sqlite_db().await;
        let collection_id = CollectionUuid::new();
        seed_tenant_database_collection(&db, collection_id).await;

        let catalog = Catalog::new(db);
        let tenant = catalog.get_tenant("t1").await.unwrap().unwrap();
        assert_eq!(tenant.name, "t1");
        assert_eq!(tenant.resource_name, Some("t1".to_string()));

        assert!(catalog.get_tenant("missing").await.unwrap().is_none());
    }
}
