use taskctl_types::{
    AttachFunctionRequest, AttachedFunction, AttachedFunctionUuid, CollectionUuid, Function,
};

use crate::catalog::Catalog;
use crate::error::{CoordinatorError, FieldConflict};

/// Implements the two-phase `Attach` / `FinishCreate` protocol plus the read,
/// detach, and cleanup verbs that operate on attached-function rows.
#[derive(Debug, Clone)]
pub struct AttachedFunctionEngine {
    catalog: Catalog,
}

impl AttachedFunctionEngine {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Phase 1 of 2: insert (or adopt an existing, matching) attached-function row.
    #[tracing::instrument(skip(self, req))]
    pub async fn attach(
        &self,
        req: AttachFunctionRequest,
    ) -> Result<AttachedFunctionUuid, CoordinatorError> {
        if AttachedFunction::is_deleted_name(&req.name) {
            return Err(CoordinatorError::InvalidArgument(format!(
                "attached function name {:?} uses the reserved deleted-row prefix",
                req.name
            )));
        }

        let mut tx = self.catalog.begin().await?;

        if let Some(existing) = self
            .catalog
            .get_any_attached_function_by_name(&mut tx, req.input_collection_id, &req.name)
            .await?
        {
            self.validate_matches_request(&mut tx, &existing, &req)
                .await?;
            tx.commit().await?;
            tracing::info!(attached_function_id = %existing.id, "attach adopted existing row");
            return Ok(existing.id);
        }

        let database_id = self
            .catalog
            .resolve_database_id(&mut tx, &req.tenant_id, &req.database)
            .await?
            .ok_or(CoordinatorError::DatabaseNotFound)?;
        let function_id = self
            .catalog
            .resolve_function_id(&mut tx, &req.function_name)
            .await?
            .ok_or(CoordinatorError::FunctionNotFound)?;
        if !self
            .catalog
            .collection_exists(&mut tx, req.input_collection_id, &req.tenant_id, &req.database)
            .await?
        {
            return Err(CoordinatorError::CollectionNotFound);
        }

        let params_json = match &req.params {
            Some(value) => serde_json::to_string(value)?,
            None => "{}".to_string(),
        };

        let id = AttachedFunctionUuid::new();
        self.catalog
            .insert_attached_function(&mut tx, id, &req, database_id, function_id, &params_json)
            .await?;
        tx.commit().await?;
        tracing::info!(attached_function_id = %id, "attach committed phase 1");
        Ok(id)
    }

    /// Phase 2 of 2: mint the output collection + fixed segments and flip `is_ready`.
    #[tracing::instrument(skip(self))]
    pub async fn finish_create(&self, id: AttachedFunctionUuid) -> Result<(), CoordinatorError> {
        let mut tx = self.catalog.begin().await?;

        let attached_function = self
            .catalog
            .get_any_attached_function_by_id(&mut tx, id)
            .await?
            .ok_or(CoordinatorError::AttachedFunctionNotFound)?;

        if attached_function.is_ready {
            tx.commit().await?;
            return Ok(());
        }

        let database_id_str = attached_function.database_id.clone();
        let database = self
            .catalog
            .resolve_database_name(&mut tx, taskctl_types::DatabaseUuid(
                uuid::Uuid::parse_str(&database_id_str)?,
            ))
            .await?
            .ok_or(CoordinatorError::DatabaseNotFound)?;

        let collection_id = CollectionUuid::new();
        self.catalog
            .create_collection_and_segments(
                &mut tx,
                collection_id,
                &attached_function.output_collection_name,
                &attached_function.tenant_id,
                &database,
                taskctl_types::DatabaseUuid(uuid::Uuid::parse_str(&database_id_str)?),
            )
            .await?;

        self.catalog
            .finish_create_attached_function(&mut tx, id, collection_id)
            .await?;
        tx.commit().await?;
        tracing::info!(attached_function_id = %id, %collection_id, "finish_create committed phase 2");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn detach(
        &self,
        attached_function_id: AttachedFunctionUuid,
        input_collection_id: CollectionUuid,
        delete_output: bool,
    ) -> Result<(), CoordinatorError> {
        let mut tx = self.catalog.begin().await?;
        let attached_function = self
            .catalog
            .get_any_attached_function_by_id(&mut tx, attached_function_id)
            .await?
            .filter(|af| af.is_ready)
            .ok_or(CoordinatorError::AttachedFunctionNotFound)?;

        if attached_function.input_collection_id != input_collection_id {
            // Mismatch on the parent collection hides the true parent rather
            // than leaking it via a distinguishable error.
            return Err(CoordinatorError::AttachedFunctionNotFound);
        }

        if delete_output {
            if let Some(output_collection_id) = attached_function.output_collection_id {
                self.catalog
                    .soft_delete_collection(&mut tx, output_collection_id, &attached_function.tenant_id)
                    .await?;
            }
        }
        self.catalog
            .soft_delete_attached_function(&mut tx, attached_function_id)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_name(
        &self,
        input_collection_id: CollectionUuid,
        name: &str,
    ) -> Result<(AttachedFunction, Function), CoordinatorError> {
        let mut tx = self.catalog.begin().await?;
        let attached_function = self
            .catalog
            .get_any_attached_function_by_name(&mut tx, input_collection_id, name)
            .await?
            .filter(|af| af.is_ready)
            .ok_or(CoordinatorError::AttachedFunctionNotFound)?;
        let function = self
            .catalog
            .get_function(&mut tx, attached_function.function_id)
            .await?
            .ok_or(CoordinatorError::FunctionNotFound)?;
        tx.commit().await?;
        Ok((attached_function, function))
    }

    pub async fn get_by_uuid(
        &self,
        id: AttachedFunctionUuid,
    ) -> Result<AttachedFunction, CoordinatorError> {
        let mut tx = self.catalog.begin().await?;
        let attached_function = self
            .catalog
            .get_any_attached_function_by_id(&mut tx, id)
            .await?
            .filter(|af| af.is_ready)
            .ok_or(CoordinatorError::AttachedFunctionNotFound)?;
        tx.commit().await?;
        Ok(attached_function)
    }

    /// Returns all ready rows for the collection. Function lookups are
    /// deduplicated by `function_id` but any missing function fails the whole
    /// call, per the core spec's all-or-nothing list semantics.
    pub async fn list(
        &self,
        input_collection_id: CollectionUuid,
    ) -> Result<Vec<AttachedFunction>, CoordinatorError> {
        let attached_functions = self
            .catalog
            .list_ready_attached_functions(input_collection_id)
            .await?;

        let mut seen = std::collections::HashSet::new();
        let mut tx = self.catalog.begin().await?;
        for af in &attached_functions {
            if seen.insert(af.function_id) {
                self.catalog
                    .get_function(&mut tx, af.function_id)
                    .await?
                    .ok_or(CoordinatorError::FunctionNotFound)?;
            }
        }
        tx.commit().await?;
        Ok(attached_functions)
    }

    pub async fn cleanup_expired_partial(
        &self,
        max_age_seconds: i64,
    ) -> Result<Vec<AttachedFunctionUuid>, CoordinatorError> {
        if max_age_seconds <= 0 {
            return Err(CoordinatorError::InvalidArgument(
                "max_age_seconds must be positive".to_string(),
            ));
        }
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age_seconds);
        let expired = self.catalog.expired_partial_attached_functions(cutoff).await?;
        let mut tx = self.catalog.begin().await?;
        for id in &expired {
            self.catalog.soft_delete_attached_function(&mut tx, *id).await?;
        }
        tx.commit().await?;
        tracing::info!(count = expired.len(), "cleanup swept expired partial attached functions");
        Ok(expired)
    }

    pub async fn get_soft_deleted(
        &self,
        cutoff_time: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
    ) -> Result<Vec<AttachedFunction>, CoordinatorError> {
        let cutoff = cutoff_time.ok_or_else(|| {
            CoordinatorError::InvalidArgument("cutoff_time is required".to_string())
        })?;
        if limit <= 0 {
            return Err(CoordinatorError::InvalidArgument(
                "limit must be positive".to_string(),
            ));
        }
        self.catalog.soft_deleted_attached_functions(cutoff, limit).await
    }

    pub async fn finish_deletion(
        &self,
        attached_function_id: AttachedFunctionUuid,
    ) -> Result<(), CoordinatorError> {
        self.catalog.hard_delete_attached_function(attached_function_id).await
    }

    /// Compares an existing row against a retried request field-by-field in
    /// the order specified by the core design: function name, tenant,
    /// database, output collection name, then min-records threshold.
    async fn validate_matches_request(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        existing: &AttachedFunction,
        req: &AttachFunctionRequest,
    ) -> Result<(), CoordinatorError> {
        let existing_function = self
            .catalog
            .get_function(tx, existing.function_id)
            .await?
            .ok_or(CoordinatorError::FunctionNotFound)?;
        if existing_function.name != req.function_name {
            return Err(conflict("function_name", &existing_function.name, &req.function_name));
        }
        if existing.tenant_id != req.tenant_id {
            return Err(conflict("tenant_id", &existing.tenant_id, &req.tenant_id));
        }
        let existing_database = self
            .catalog
            .resolve_database_name(
                tx,
                taskctl_types::DatabaseUuid(uuid::Uuid::parse_str(&existing.database_id)?),
            )
            .await?
            .ok_or(CoordinatorError::DatabaseNotFound)?;
        if existing_database != req.database {
            return Err(conflict("database", &existing_database, &req.database));
        }
        if existing.output_collection_name != req.output_collection_name {
            return Err(conflict(
                "output_collection_name",
                &existing.output_collection_name,
                &req.output_collection_name,
            ));
        }
        if existing.min_records_for_invocation != req.min_records_for_invocation {
            return Err(conflict(
                "min_records_for_invocation",
                &existing.min_records_for_invocation.to_string(),
                &req.min_records_for_invocation.to_string(),
            ));
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
    use chrono::Utc;
    use taskctl_sqlite::db::test_utils;
    use taskctl_sqlite::SqliteDb;

    /// Returns the engine's catalog plus a raw db handle for asserting
    /// directly against rows the engine's API surface doesn't expose.
    async fn test_catalog(input_collection_id: CollectionUuid) -> (Catalog, SqliteDb) {
        let db: SqliteDb = test_utils::get_new_sqlite_db().await;
        seed_fixture(&db, input_collection_id).await;
        (Catalog::new(db.clone()), db)
    }

    async fn seed_fixture(db: &SqliteDb, input_collection_id: CollectionUuid) {
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

    fn happy_path_request(input_collection_id: CollectionUuid) -> AttachFunctionRequest {
        AttachFunctionRequest {
            name: "counter-attachment".to_string(),
            input_collection_id,
            output_collection_name: "output-collection".to_string(),
            function_name: "record_counter".to_string(),
            tenant_id: "test-tenant".to_string(),
            database: "test-database".to_string(),
            min_records_for_invocation: 100,
            params: Some(serde_json::json!({"param1": "value1"})),
        }
    }

    #[tokio::test]
    async fn attach_then_get_by_uuid_is_not_found_until_finish_create() {
        let input_collection_id = CollectionUuid::new();
        let (catalog, db) = test_catalog(input_collection_id).await;
        let engine = AttachedFunctionEngine::new(catalog);

        let req = happy_path_request(input_collection_id);
        let id = engine.attach(req).await.unwrap();

        let err = engine.get_by_uuid(id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AttachedFunctionNotFound));

        engine.finish_create(id).await.unwrap();
        let attached_function = engine.get_by_uuid(id).await.unwrap();
        assert!(attached_function.is_ready);
        assert_eq!(attached_function.id, id);

        let output_collection_id = attached_function.output_collection_id.unwrap();
        let segments = sqlx::query("SELECT id FROM segments WHERE collection_id = $1")
            .bind(output_collection_id.to_string())
            .fetch_all(db.get_conn())
            .await
            .unwrap();
        assert_eq!(segments.len(), 3);

        let dimension: Option<i32> =
            sqlx::query_scalar("SELECT dimension FROM collections WHERE id = $1")
                .bind(output_collection_id.to_string())
                .fetch_one(db.get_conn())
                .await
                .unwrap();
        assert_eq!(dimension, Some(taskctl_types::DEFAULT_OUTPUT_COLLECTION_DIMENSION));

        // A second FinishCreate on an already-ready row is a no-op, not an error.
        engine.finish_create(id).await.unwrap();
        let unchanged = engine.get_by_uuid(id).await.unwrap();
        assert_eq!(unchanged.output_collection_id, Some(output_collection_id));
    }

    #[tokio::test]
    async fn identical_attach_retry_returns_same_id_with_no_extra_writes() {
        let input_collection_id = CollectionUuid::new();
        let (catalog, db) = test_catalog(input_collection_id).await;
        let engine = AttachedFunctionEngine::new(catalog);

        let req = happy_path_request(input_collection_id);
        let first_id = engine.attach(req.clone()).await.unwrap();
        let second_id = engine.attach(req).await.unwrap();
        assert_eq!(first_id, second_id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attached_functions")
            .fetch_one(db.get_conn())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn mismatched_retry_is_already_exists_with_row_unchanged() {
        let input_collection_id = CollectionUuid::new();
        let (catalog, db) = test_catalog(input_collection_id).await;
        let engine = AttachedFunctionEngine::new(catalog);

        let req = happy_path_request(input_collection_id);
        engine.attach(req.clone()).await.unwrap();

        let mut conflicting = req.clone();
        conflicting.min_records_for_invocation = 999;
        let err = engine.attach(conflicting).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyExists { .. }));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attached_functions")
            .fetch_one(db.get_conn())
            .await
            .unwrap();
        assert_eq!(count, 1, "conflicting retry must not insert a second row");

        let stored: i64 =
            sqlx::query_scalar("SELECT min_records_for_invocation FROM attached_functions")
                .fetch_one(db.get_conn())
                .await
                .unwrap();
        assert_eq!(stored, 100, "existing row's field must be untouched by the rejected retry");
    }

    #[tokio::test]
    async fn detach_frees_name_for_reattach_during_grace_window() {
        let input_collection_id = CollectionUuid::new();
        let (catalog, db) = test_catalog(input_collection_id).await;
        let engine = AttachedFunctionEngine::new(catalog);

        let req = happy_path_request(input_collection_id);
        let id = engine.attach(req.clone()).await.unwrap();
        engine.finish_create(id).await.unwrap();

        engine.detach(id, input_collection_id, false).await.unwrap();

        // Re-Attach while the original row is soft-deleted but not yet purged.
        let new_id = engine.attach(req).await.unwrap();
        assert_ne!(new_id, id);

        let stored_name: String = sqlx::query_scalar("SELECT name FROM attached_functions WHERE id = $1")
            .bind(id.to_string())
            .fetch_one(db.get_conn())
            .await
            .unwrap();
        assert!(AttachedFunction::is_deleted_name(&stored_name));
        assert!(stored_name.ends_with("counter-attachment"));
    }

    #[tokio::test]
    async fn cleanup_sweeps_expired_partial_rows_only() {
        let input_collection_id = CollectionUuid::new();
        let (catalog, db) = test_catalog(input_collection_id).await;
        let engine = AttachedFunctionEngine::new(catalog);

        let mut expired_req = happy_path_request(input_collection_id);
        expired_req.name = "expired-one".to_string();
        let expired_id = engine.attach(expired_req).await.unwrap();
        sqlx::query("UPDATE attached_functions SET created_at = $1 WHERE id = $2")
            .bind(Utc::now() - chrono::Duration::seconds(7200))
            .bind(expired_id.to_string())
            .execute(db.get_conn())
            .await
            .unwrap();

        let mut expired_req2 = happy_path_request(input_collection_id);
        expired_req2.name = "expired-two".to_string();
        let expired_id2 = engine.attach(expired_req2).await.unwrap();
        sqlx::query("UPDATE attached_functions SET created_at = $1 WHERE id = $2")
            .bind(Utc::now() - chrono::Duration::seconds(7200))
            .bind(expired_id2.to_string())
            .execute(db.get_conn())
            .await
            .unwrap();

        let mut fresh_req = happy_path_request(input_collection_id);
        fresh_req.name = "fresh-one".to_string();
        let fresh_id = engine.attach(fresh_req).await.unwrap();

        let swept = engine.cleanup_expired_partial(3600).await.unwrap();
        assert_eq!(swept.len(), 2);
        assert!(swept.contains(&expired_id));
        assert!(swept.contains(&expired_id2));
        assert!(!swept.contains(&fresh_id));

        let soft_deleted = engine
            .get_soft_deleted(Some(Utc::now() + chrono::Duration::seconds(1)), 10)
            .await
            .unwrap();
        assert_eq!(soft_deleted.len(), 2);
    }
}
