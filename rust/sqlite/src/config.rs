use serde::{Deserialize, Serialize};

/// The configuration for the SQLite-backed metastore.
/// # Fields
/// - url: Path to the SQLite database file.
/// - hash_type: The hash function used to fingerprint migration files.
/// - migration_mode: Whether to apply unapplied migrations on boot or only validate them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SqliteDBConfig {
    #[serde(default = "SqliteDBConfig::default_url")]
    pub url: String,
    #[serde(default)]
    pub hash_type: MigrationHash,
    #[serde(default)]
    pub migration_mode: MigrationMode,
}

impl SqliteDBConfig {
    fn default_url() -> String {
        "sqlite://./taskctl.sqlite3".to_string()
    }
}

impl Default for SqliteDBConfig {
    fn default() -> Self {
        SqliteDBConfig {
            url: SqliteDBConfig::default_url(),
            hash_type: MigrationHash::default(),
            migration_mode: MigrationMode::default(),
        }
    }
}

/// Migration mode for the database
/// - Apply: Apply unapplied migrations on boot.
/// - Validate: Validate that every known migration is already applied; fail if not.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    #[default]
    Apply,
    Validate,
}

/// The hash function to use when fingerprinting migration files.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationHash {
    #[default]
    SHA256,
    MD5,
}
