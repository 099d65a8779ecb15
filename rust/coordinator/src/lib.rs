pub mod attached_function_engine;
pub mod catalog;
pub mod config;
pub mod error;
pub mod heap_client;
pub mod model_converter;
pub mod task_engine;

use std::sync::Arc;

use async_trait::async_trait;
use taskctl_config::registry::Registry;
use taskctl_config::Configurable;
use taskctl_error::ChromaError;
use taskctl_memberlist::MemberlistReader;
use taskctl_types::{
    AttachFunctionRequest, AttachedFunction, AttachedFunctionUuid, Collection, CollectionUuid,
    CreateTaskRequest, Function, TaskUuid,
};

use crate::attached_function_engine::AttachedFunctionEngine;
use crate::catalog::Catalog;
use crate::config::RootConfig;
use crate::error::CoordinatorError;
use crate::heap_client::{GrpcHeapClient, HeapClient};
use crate::task_engine::TaskEngine;

/// Assembles the catalog, the two lifecycle engines, and the heap client
/// into the single facade the gRPC surface (and any in-process caller, such
/// as tests) drives.
#[derive(Clone)]
pub struct Coordinator {
    attached_functions: AttachedFunctionEngine,
    tasks: TaskEngine,
    catalog: Catalog,
}

impl Coordinator {
    pub fn new(catalog: Catalog, heap_client: Arc<dyn HeapClient>) -> Self {
        Self {
            attached_functions: AttachedFunctionEngine::new(catalog.clone()),
            tasks: TaskEngine::new(catalog.clone(), heap_client),
            catalog,
        }
    }

    pub async fn attach_function(
        &self,
        req: AttachFunctionRequest,
    ) -> Result<AttachedFunctionUuid, CoordinatorError> {
        self.attached_functions.attach(req).await
    }

    pub async fn finish_create_attached_function(
        &self,
        id: AttachedFunctionUuid,
    ) -> Result<(), CoordinatorError> {
        self.attached_functions.finish_create(id).await
    }

    pub async fn detach_function(
        &self,
        attached_function_id: AttachedFunctionUuid,
        input_collection_id: CollectionUuid,
        delete_output: bool,
    ) -> Result<(), CoordinatorError> {
        self.attached_functions
            .detach(attached_function_id, input_collection_id, delete_output)
            .await
    }

    pub async fn get_attached_function_by_name(
        &self,
        input_collection_id: CollectionUuid,
        name: &str,
    ) -> Result<(AttachedFunction, Function), CoordinatorError> {
        self.attached_functions
            .get_by_name(input_collection_id, name)
            .await
    }

    pub async fn get_attached_function_by_uuid(
        &self,
        id: AttachedFunctionUuid,
    ) -> Result<AttachedFunction, CoordinatorError> {
        self.attached_functions.get_by_uuid(id).await
    }

    pub async fn list_attached_functions(
        &self,
        input_collection_id: CollectionUuid,
    ) -> Result<Vec<AttachedFunction>, CoordinatorError> {
        self.attached_functions.list(input_collection_id).await
    }

    pub async fn cleanup_expired_partial_attached_functions(
        &self,
        max_age_seconds: i64,
    ) -> Result<Vec<AttachedFunctionUuid>, CoordinatorError> {
        self.attached_functions
            .cleanup_expired_partial(max_age_seconds)
            .await
    }

    pub async fn get_soft_deleted_attached_functions(
        &self,
        cutoff_time: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
    ) -> Result<Vec<AttachedFunction>, CoordinatorError> {
        self.attached_functions
            .get_soft_deleted(cutoff_time, limit)
            .await
    }

    pub async fn finish_deletion_attached_function(
        &self,
        attached_function_id: AttachedFunctionUuid,
    ) -> Result<(), CoordinatorError> {
        self.attached_functions
            .finish_deletion(attached_function_id)
            .await
    }

    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<TaskUuid, CoordinatorError> {
        self.tasks.create_task(req).await
    }

    pub async fn get_collections(
        &self,
        collection_id: Option<CollectionUuid>,
        name: Option<&str>,
        tenant: &str,
        database: &str,
    ) -> Result<Vec<Collection>, CoordinatorError> {
        self.catalog
            .get_collections(collection_id, name, tenant, database)
            .await
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Option<taskctl_types::Tenant>, CoordinatorError> {
        self.catalog.get_tenant(tenant_id).await
    }
}

#[async_trait]
impl Configurable<RootConfig> for Coordinator {
    async fn try_from_config(
        config: &RootConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let db = taskctl_sqlite::SqliteDb::try_from_config(&config.sqlite, registry).await?;
        let catalog = Catalog::new(db);

        let memberlist: Arc<dyn MemberlistReader> =
            taskctl_memberlist::from_config(&config.memberlist, registry)
                .await?
                .into();
        let assignment_policy =
            taskctl_config::assignment::from_config(&config.assignment_policy, registry).await?;

        let heap_client: Arc<dyn HeapClient> = Arc::new(
            GrpcHeapClient::new(config.heap_client.clone(), memberlist, assignment_policy)
                .map_err(|e| Box::new(e) as Box<dyn ChromaError>)?,
        );

        Ok(Coordinator::new(catalog, heap_client))
    }
}
