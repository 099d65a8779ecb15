pub mod config;
pub mod db;
mod migrations;

pub use config::{MigrationHash, MigrationMode, SqliteDBConfig};
pub use db::{SqliteCreationError, SqliteDb, SqliteMigrationError};
