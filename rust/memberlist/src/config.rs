use serde::{Deserialize, Serialize};

/// The configuration for the memberlist reader.
/// # Options
/// - File: Read `(members, resource_version)` from a JSON file maintained by an external
///   membership controller. This is the production default.
/// - Static: Serve a fixed, in-process membership snapshot. Intended for tests and for
///   single-node deployments where no external membership controller exists.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum MemberlistReaderConfig {
    #[serde(alias = "file")]
    File(FileMemberlistReaderConfig),
    #[serde(alias = "static")]
    Static(Vec<crate::Member>),
}

impl Default for MemberlistReaderConfig {
    fn default() -> Self {
        MemberlistReaderConfig::File(FileMemberlistReaderConfig::default())
    }
}

/// The configuration for the file-backed memberlist reader.
/// # Fields
/// - path: The path to the JSON file containing the current memberlist.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FileMemberlistReaderConfig {
    #[serde(default = "FileMemberlistReaderConfig::default_path")]
    pub path: String,
}

impl FileMemberlistReaderConfig {
    fn default_path() -> String {
        "/etc/taskctl/memberlist.json".to_string()
    }
}

impl Default for FileMemberlistReaderConfig {
    fn default() -> Self {
        FileMemberlistReaderConfig {
            path: FileMemberlistReaderConfig::default_path(),
        }
    }
}
