use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use taskctl_config::assignment::config::AssignmentPolicyConfig;
use taskctl_memberlist::config::MemberlistReaderConfig;
use taskctl_sqlite::SqliteDBConfig;
use taskctl_tracing::OtelFilter;

use crate::heap_client::HeapClientConfig;

const DEFAULT_CONFIG_PATH: &str = "./taskctl_coordinator_config.yaml";
const ENV_PREFIX: &str = "TASKCTL_";

/// Top-level configuration for the coordinator binary. Aggregates each
/// component's own config type rather than flattening their fields, so that
/// a component's `Configurable` impl stays the single place that knows how
/// to interpret them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RootConfig {
    #[serde(default = "RootConfig::default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub otel_endpoint: String,
    #[serde(default)]
    pub otel_filters: Vec<OtelFilter>,
    #[serde(default = "RootConfig::default_port")]
    pub port: u16,

    #[serde(default)]
    pub sqlite: SqliteDBConfig,
    #[serde(default)]
    pub memberlist: MemberlistReaderConfig,
    #[serde(default)]
    pub assignment_policy: AssignmentPolicyConfig,
    #[serde(default)]
    pub heap_client: HeapClientConfig,
}

impl RootConfig {
    fn default_service_name() -> String {
        "taskctl-coordinator".to_string()
    }

    fn default_port() -> u16 {
        50056
    }

    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Mirrors the garbage collector's environment-variable loading scheme:
    /// double underscores address nested fields, since figment has no native
    /// support for underscore-delimited env keys.
    pub fn load_from_path(path: &str) -> Self {
        let mut f = figment::Figment::from(
            Env::prefixed(ENV_PREFIX).map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            let yaml = figment::Figment::from(Yaml::file(path));
            f = yaml.clone().merge(yaml.focus("coordinator")).merge(f);
        }
        f.extract()
            .unwrap_or_else(|e| panic!("Error loading config from {path}: {e}"))
    }
}

impl Default for RootConfig {
    fn default() -> Self {
        RootConfig {
            service_name: Self::default_service_name(),
            otel_endpoint: String::new(),
            otel_filters: Vec::new(),
            port: Self::default_port(),
            sqlite: SqliteDBConfig::default(),
            memberlist: MemberlistReaderConfig::default(),
            assignment_policy: AssignmentPolicyConfig::default(),
            heap_client: HeapClientConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_missing_path_falls_back_to_defaults() {
        let config = RootConfig::load_from_path("/nonexistent/taskctl-coordinator.yaml");
        assert_eq!(config.service_name, "taskctl-coordinator");
        assert_eq!(config.port, 50056);
    }
}
