use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use taskctl_config::assignment::assignment_policy::AssignmentPolicy;
use taskctl_config::assignment::rendezvous_hash::AssignmentError;
use taskctl_error::{ChromaError, ErrorCodes};
use taskctl_memberlist::{MemberlistReader, MemberlistReaderError};
use taskctl_types::{CollectionUuid, ScheduleEntry};
use thiserror::Error;

/// Generated client/message types for the heap service's wire contract.
pub mod proto {
    tonic::include_proto!("taskctl.heap");
}

use proto::heap_client::HeapClient as TonicGeneratedClient;
use proto::{HeapSummaryRequest, PushRequest, Schedule, Triggerable};

#[derive(Error, Debug)]
pub enum HeapClientError {
    #[error("memberlist is empty, no heap node available")]
    EmptyMemberlist,
    #[error("no heap node has a routable IP")]
    NoRoutableMember,
    #[error(transparent)]
    Memberlist(#[from] MemberlistReaderError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error("failed to connect to heap node {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error(transparent)]
    Rpc(#[from] tonic::Status),
    #[error("unknown hasher {0:?}")]
    UnknownHasher(String),
}

impl ChromaError for HeapClientError {
    fn code(&self) -> ErrorCodes {
        match self {
            HeapClientError::EmptyMemberlist
            | HeapClientError::NoRoutableMember
            | HeapClientError::Connect { .. } => ErrorCodes::Unavailable,
            HeapClientError::Memberlist(err) => err.code(),
            HeapClientError::Assignment(err) => err.code(),
            HeapClientError::Rpc(status) => status.code().into(),
            HeapClientError::UnknownHasher(_) => ErrorCodes::InvalidArgument,
        }
    }
}

/// Client-side view of the external heap (scheduler) service. `Push` is
/// node-selected by rendezvous-hashing the collection ID over the current
/// memberlist; `Summary` is node-agnostic.
#[async_trait]
pub trait HeapClient: Send + Sync {
    async fn push(
        &self,
        collection_id: CollectionUuid,
        schedules: Vec<ScheduleEntry>,
    ) -> Result<u64, HeapClientError>;

    async fn summary(&self) -> Result<(u64, u64), HeapClientError>;
}

/// Configuration for the gRPC heap client. `hasher_name` mirrors the core
/// spec's `{"murmur3", ""}` setup-time validation; both resolve to murmur3
/// since it is the only hasher implemented.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct HeapClientConfig {
    #[serde(default = "HeapClientConfig::default_port")]
    pub port: u16,
    #[serde(default = "HeapClientConfig::default_hasher_name")]
    pub hasher_name: String,
    #[serde(default = "HeapClientConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "HeapClientConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl HeapClientConfig {
    fn default_port() -> u16 {
        50052
    }
    fn default_hasher_name() -> String {
        "murmur3".to_string()
    }
    fn default_connect_timeout_ms() -> u64 {
        5_000
    }
    fn default_request_timeout_ms() -> u64 {
        10_000
    }

    pub fn validate(&self) -> Result<(), HeapClientError> {
        match self.hasher_name.as_str() {
            "murmur3" | "" => Ok(()),
            other => Err(HeapClientError::UnknownHasher(other.to_string())),
        }
    }
}

impl Default for HeapClientConfig {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            hasher_name: Self::default_hasher_name(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Dials the assigned heap node fresh on every call. No connection pooling:
/// `Push` is infrequent (once per attach-function/task phase transition), so
/// the per-call dial cost is acceptable (see core spec design notes).
pub struct GrpcHeapClient {
    config: HeapClientConfig,
    memberlist: Arc<dyn MemberlistReader>,
    assignment_policy: Mutex<Box<dyn AssignmentPolicy>>,
}

impl GrpcHeapClient {
    pub fn new(
        config: HeapClientConfig,
        memberlist: Arc<dyn MemberlistReader>,
        assignment_policy: Box<dyn AssignmentPolicy>,
    ) -> Result<Self, HeapClientError> {
        config.validate()?;
        Ok(Self {
            config,
            memberlist,
            assignment_policy: Mutex::new(assignment_policy),
        })
    }

    async fn select_node_for_collection(
        &self,
        collection_id: &CollectionUuid,
    ) -> Result<String, HeapClientError> {
        let snapshot = self.memberlist.get_memberlist().await?;
        if snapshot.members.is_empty() {
            return Err(HeapClientError::EmptyMemberlist);
        }
        let ips: Vec<String> = snapshot
            .routable_members()
            .into_iter()
            .map(|m| m.member_ip.clone())
            .collect();
        if ips.is_empty() {
            return Err(HeapClientError::NoRoutableMember);
        }
        let mut policy = self.assignment_policy.lock();
        policy.set_members(ips);
        Ok(policy.assign_one(&collection_id.to_string())?)
    }

    async fn first_routable_member(&self) -> Result<String, HeapClientError> {
        let snapshot = self.memberlist.get_memberlist().await?;
        if snapshot.members.is_empty() {
            return Err(HeapClientError::EmptyMemberlist);
        }
        snapshot
            .routable_members()
            .into_iter()
            .next()
            .map(|m| m.member_ip.clone())
            .ok_or(HeapClientError::NoRoutableMember)
    }

    async fn dial(&self, ip: &str) -> Result<TonicGeneratedClient<tonic::transport::Channel>, HeapClientError> {
        let endpoint_str = format!("http://{ip}:{port}", port = self.config.port);
        let endpoint = tonic::transport::Endpoint::from_shared(endpoint_str.clone())
            .map_err(|source| HeapClientError::Connect {
                endpoint: endpoint_str.clone(),
                source,
            })?
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .timeout(Duration::from_millis(self.config.request_timeout_ms));
        let channel = endpoint
            .connect()
            .await
            .map_err(|source| HeapClientError::Connect {
                endpoint: endpoint_str,
                source,
            })?;
        Ok(TonicGeneratedClient::new(channel))
    }
}

#[async_trait]
impl HeapClient for GrpcHeapClient {
    #[tracing::instrument(skip(self, schedules))]
    async fn push(
        &self,
        collection_id: CollectionUuid,
        schedules: Vec<ScheduleEntry>,
    ) -> Result<u64, HeapClientError> {
        let ip = self.select_node_for_collection(&collection_id).await?;
        let mut client = self.dial(&ip).await?;
        let wire_schedules = schedules
            .into_iter()
            .map(|s| Schedule {
                triggerable: Some(Triggerable {
                    partitioning_uuid: s.partitioning_uuid.to_string(),
                    scheduling_uuid: s.scheduling_uuid.to_string(),
                }),
                nonce: s.nonce.to_string(),
                next_scheduled: Some(prost_types::Timestamp {
                    seconds: s.next_scheduled.timestamp(),
                    nanos: s.next_scheduled.timestamp_subsec_nanos() as i32,
                }),
            })
            .collect();
        let response = client
            .push(PushRequest {
                schedules: wire_schedules,
            })
            .await?;
        tracing::info!(endpoint = %ip, "heap push completed");
        Ok(response.into_inner().schedules_added)
    }

    #[tracing::instrument(skip(self))]
    async fn summary(&self) -> Result<(u64, u64), HeapClientError> {
        let ip = self.first_routable_member().await?;
        let mut client = self.dial(&ip).await?;
        let response = client.summary(HeapSummaryRequest {}).await?;
        let response = response.into_inner();
        Ok((response.total_items, response.bucket_count))
    }
}

/// In-process fake used to exercise Phase-2 push/recovery behavior in tests
/// without a real heap service. Can be switched to fail the next `N` pushes.
#[derive(Default)]
pub struct FakeHeapClient {
    pushes: Mutex<Vec<(CollectionUuid, Vec<ScheduleEntry>)>>,
    failures_remaining: Mutex<u32>,
}

impl FakeHeapClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `push` will fail with `HeapClientError::EmptyMemberlist`.
    pub fn fail_next_pushes(&self, count: u32) {
        *self.failures_remaining.lock() = count;
    }

    pub fn pushed(&self) -> Vec<(CollectionUuid, Vec<ScheduleEntry>)> {
        self.pushes.lock().clone()
    }
}

#[async_trait]
impl HeapClient for FakeHeapClient {
    async fn push(
        &self,
        collection_id: CollectionUuid,
        schedules: Vec<ScheduleEntry>,
    ) -> Result<u64, HeapClientError> {
        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(HeapClientError::EmptyMemberlist);
        }
        drop(remaining);
        let added = schedules.len() as u64;
        self.pushes.lock().push((collection_id, schedules));
        Ok(added)
    }

    async fn summary(&self) -> Result<(u64, u64), HeapClientError> {
        let pushes = self.pushes.lock();
        let total: u64 = pushes.iter().map(|(_, s)| s.len() as u64).sum();
        Ok((total, pushes.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskctl_types::TaskUuid;

    #[tokio::test]
    async fn fake_heap_client_records_pushes() {
        let client = FakeHeapClient::new();
        let collection_id = CollectionUuid::new();
        let schedule = ScheduleEntry {
            partitioning_uuid: collection_id,
            scheduling_uuid: TaskUuid::new(),
            nonce: uuid::Uuid::new_v4(),
            next_scheduled: Utc::now(),
        };
        let added = client.push(collection_id, vec![schedule]).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(client.pushed().len(), 1);
    }

    #[tokio::test]
    async fn fake_heap_client_honors_failure_injection() {
        let client = FakeHeapClient::new();
        client.fail_next_pushes(1);
        let collection_id = CollectionUuid::new();
        let err = client.push(collection_id, vec![]).await.unwrap_err();
        assert!(matches!(err, HeapClientError::EmptyMemberlist));
        // Second attempt succeeds: this models "recovery after heap failure".
        let added = client.push(collection_id, vec![]).await.unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn unknown_hasher_name_is_rejected_at_setup() {
        let config = HeapClientConfig {
            hasher_name: "consistent-ring".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
