use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use taskctl_config::registry::Registry;
use taskctl_config::Configurable;
use taskctl_error::{ChromaError, ErrorCodes};
use thiserror::Error;

use crate::config::{FileMemberlistReaderConfig, MemberlistReaderConfig};

/// A member in a memberlist represents a heap-service node eligible to receive
/// rendezvous-hashed `Push`/`Summary` RPCs.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Member {
    /// The ID of the member.
    pub member_id: String,
    /// The IP address of the member. An empty string means "not yet routable".
    pub member_ip: String,
    /// The node name hosting the member, for observability only.
    pub member_node_name: String,
}

pub type Memberlist = Vec<Member>;

/// A memberlist snapshot paired with an opaque resource version. The version is
/// monotonically increasing from the perspective of a single reader and is only
/// meaningful for detecting staleness between successive reads, not for ordering
/// across readers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberlistSnapshot {
    pub members: Memberlist,
    pub resource_version: String,
}

impl MemberlistSnapshot {
    /// Members with a non-empty IP, the only ones eligible for rendezvous assignment.
    pub fn routable_members(&self) -> Vec<&Member> {
        self.members
            .iter()
            .filter(|m| !m.member_ip.is_empty())
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum MemberlistReaderError {
    #[error("failed to read memberlist file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse memberlist file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ChromaError for MemberlistReaderError {
    fn code(&self) -> ErrorCodes {
        match self {
            MemberlistReaderError::Io { .. } => ErrorCodes::Unavailable,
            MemberlistReaderError::Parse { .. } => ErrorCodes::Internal,
        }
    }
}

/// Read-only view of the current heap-service memberlist. Membership maintenance
/// (how members are discovered, added, or removed) lives entirely outside this
/// crate; implementations here only surface the current snapshot on demand.
#[async_trait]
pub trait MemberlistReader: Send + Sync + std::fmt::Debug {
    async fn get_memberlist(&self) -> Result<MemberlistSnapshot, MemberlistReaderError>;
}

/// Reads `{"members": [...], "resource_version": "..."}` from a JSON file on every
/// call. This mirrors how membership is externally published by whatever controller
/// owns node lifecycle (out of scope here); the reader never caches stale members
/// past a single call, trading a small amount of I/O for always-fresh reads.
#[derive(Debug)]
pub struct FileMemberlistReader {
    path: String,
}

#[derive(Deserialize)]
struct FileMemberlistDocument {
    #[serde(default)]
    members: Memberlist,
    #[serde(default)]
    resource_version: String,
}

impl FileMemberlistReader {
    pub fn new(path: String) -> Self {
        Self { path }
    }
}

#[async_trait]
impl MemberlistReader for FileMemberlistReader {
    async fn get_memberlist(&self) -> Result<MemberlistSnapshot, MemberlistReaderError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| MemberlistReaderError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let doc: FileMemberlistDocument =
            serde_json::from_str(&contents).map_err(|source| MemberlistReaderError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(MemberlistSnapshot {
            members: doc.members,
            resource_version: doc.resource_version,
        })
    }
}

#[async_trait]
impl Configurable<FileMemberlistReaderConfig> for FileMemberlistReader {
    async fn try_from_config(
        config: &FileMemberlistReaderConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        Ok(FileMemberlistReader::new(config.path.clone()))
    }
}

/// Serves a fixed in-process memberlist. Useful for tests and for single-node
/// deployments with no external membership controller. The resource version is
/// bumped on every `set_members` call so callers can detect a change.
#[derive(Debug)]
pub struct StaticMemberlistReader {
    state: RwLock<MemberlistSnapshot>,
}

impl StaticMemberlistReader {
    pub fn new(members: Memberlist) -> Self {
        Self {
            state: RwLock::new(MemberlistSnapshot {
                members,
                resource_version: "0".to_string(),
            }),
        }
    }

    pub fn set_members(&self, members: Memberlist) {
        let mut state = self.state.write();
        let next_version: u64 = state.resource_version.parse().unwrap_or(0) + 1;
        *state = MemberlistSnapshot {
            members,
            resource_version: next_version.to_string(),
        };
    }
}

#[async_trait]
impl MemberlistReader for StaticMemberlistReader {
    async fn get_memberlist(&self) -> Result<MemberlistSnapshot, MemberlistReaderError> {
        Ok(self.state.read().clone())
    }
}

#[async_trait]
impl Configurable<MemberlistReaderConfig> for StaticMemberlistReader {
    async fn try_from_config(
        config: &MemberlistReaderConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        match config {
            MemberlistReaderConfig::Static(members) => Ok(StaticMemberlistReader::new(members.clone())),
            MemberlistReaderConfig::File(_) => {
                unreachable!("StaticMemberlistReader cannot be built from a File config")
            }
        }
    }
}

/// Builds the configured `MemberlistReader` implementation.
pub async fn from_config(
    config: &MemberlistReaderConfig,
    registry: &Registry,
) -> Result<Box<dyn MemberlistReader>, Box<dyn ChromaError>> {
    match config {
        MemberlistReaderConfig::File(file_config) => Ok(Box::new(
            FileMemberlistReader::try_from_config(file_config, registry).await?,
        )),
        MemberlistReaderConfig::Static(members) => {
            Ok(Box::new(StaticMemberlistReader::new(members.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn static_reader_returns_configured_members() {
        let reader = StaticMemberlistReader::new(vec![Member {
            member_id: "node-0".to_string(),
            member_ip: "10.0.0.1".to_string(),
            member_node_name: "node-0".to_string(),
        }]);
        let snapshot = reader.get_memberlist().await.unwrap();
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(snapshot.resource_version, "0");
    }

    #[tokio::test]
    async fn static_reader_bumps_resource_version_on_update() {
        let reader = StaticMemberlistReader::new(vec![]);
        reader.set_members(vec![Member {
            member_id: "node-0".to_string(),
            member_ip: "10.0.0.1".to_string(),
            member_node_name: "node-0".to_string(),
        }]);
        let snapshot = reader.get_memberlist().await.unwrap();
        assert_eq!(snapshot.resource_version, "1");
    }

    #[tokio::test]
    async fn routable_members_filters_empty_ips() {
        let snapshot = MemberlistSnapshot {
            members: vec![
                Member {
                    member_id: "a".to_string(),
                    member_ip: "".to_string(),
                    member_node_name: "a".to_string(),
                },
                Member {
                    member_id: "b".to_string(),
                    member_ip: "10.0.0.2".to_string(),
                    member_node_name: "b".to_string(),
                },
            ],
            resource_version: "0".to_string(),
        };
        let routable = snapshot.routable_members();
        assert_eq!(routable.len(), 1);
        assert_eq!(routable[0].member_id, "b");
    }

    #[tokio::test]
    async fn file_reader_parses_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"members": [{{"member_id": "n0", "member_ip": "10.0.0.1", "member_node_name": "n0"}}], "resource_version": "7"}}"#
        )
        .unwrap();
        let reader = FileMemberlistReader::new(file.path().to_str().unwrap().to_string());
        let snapshot = reader.get_memberlist().await.unwrap();
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(snapshot.resource_version, "7");
    }

    #[tokio::test]
    async fn file_reader_missing_file_is_unavailable() {
        let reader = FileMemberlistReader::new("/nonexistent/path/memberlist.json".to_string());
        let err = reader.get_memberlist().await.unwrap_err();
        assert_eq!(err.code(), ErrorCodes::Unavailable);
    }
}
