use crate::config::{MigrationHash, MigrationMode, SqliteDBConfig};
use crate::migrations::{GetSourceMigrationsError, Migration, MigrationDir, MIGRATION_DIRS};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::{Executor, Row};
use std::str::FromStr;
use taskctl_config::registry::Registry;
use taskctl_config::Configurable;
use taskctl_error::{ChromaError, ErrorCodes};
use thiserror::Error;

/// A wrapper around a SQLite connection pool that also runs migrations on the
/// coordinator schema (tenants, databases, functions, collections, segments,
/// attached functions, tasks).
/// ## Notes:
/// - Clone safety: the SqlitePool is cloneable and all clones share the same
///   connection pool. The pool is Send/Sync.
#[derive(Debug, Clone)]
pub struct SqliteDb {
    conn: SqlitePool,
    migration_hash_type: MigrationHash,
}

impl SqliteDb {
    pub(crate) fn new(conn: SqlitePool, migration_hash_type: MigrationHash) -> Self {
        Self {
            conn,
            migration_hash_type,
        }
    }

    pub fn get_conn(&self) -> &SqlitePool {
        &self.conn
    }

    pub async fn reset(&self) -> Result<(), SqliteMigrationError> {
        let query = r#"
            SELECT name FROM sqlite_master
            WHERE type='table'
        "#;
        let rows = sqlx::query(query).fetch_all(&self.conn).await?;
        for row in rows {
            let name: String = row.get("name");
            let query = format!("DROP TABLE IF EXISTS {}", name);
            sqlx::query(&query).execute(&self.conn).await?;
        }

        self.initialize_migrations_table().await?;
        self.apply_all_migration().await?;

        Ok(())
    }

    //////////////////////// Migrations ////////////////////////

    pub(crate) async fn apply_all_migration(&self) -> Result<(), SqliteMigrationError> {
        let mut all_unapplied_migrations = Vec::new();
        for dir in MIGRATION_DIRS.iter() {
            let applied_migrations = self.get_existing_migrations(dir).await;
            let source_migrations = dir
                .get_source_migrations(&self.migration_hash_type)
                .map_err(SqliteMigrationError::GetSourceMigrationsError)?;
            let unapplied = self
                .validate_migrations_and_get_unapplied(applied_migrations, source_migrations)
                .map_err(SqliteMigrationError::MigrationValidationError)?;
            all_unapplied_migrations.extend(unapplied);
        }
        self.apply_migrations(all_unapplied_migrations).await?;

        Ok(())
    }

    pub(crate) async fn validate_all_migrations(&self) -> Result<(), SqliteMigrationError> {
        if !self.has_initialized_migrations().await {
            return Err(SqliteMigrationError::MigrationsTableNotInitialized);
        }
        for dir in MIGRATION_DIRS.iter() {
            let applied_migrations = self.get_existing_migrations(dir).await;
            let source_migrations = dir
                .get_source_migrations(&self.migration_hash_type)
                .map_err(SqliteMigrationError::GetSourceMigrationsError)?;
            let unapplied =
                self.validate_migrations_and_get_unapplied(applied_migrations, source_migrations)?;
            if !unapplied.is_empty() {
                return Err(SqliteMigrationError::UnappliedMigrationsFound);
            }
        }

        Ok(())
    }

    /// Apply all migrations in a transaction.
    async fn apply_migrations(&self, migrations: Vec<Migration>) -> Result<(), sqlx::Error> {
        let mut tx = self.conn.begin().await?;
        for migration in migrations {
            tx.execute("PRAGMA foreign_keys = ON").await?;
            tx.execute(sqlx::query(&migration.sql)).await?;

            let query = r#"
                INSERT INTO migrations (dir, version, filename, sql, hash)
                VALUES ($1, $2, $3, $4, $5)
            "#;
            let query = sqlx::query(query)
                .bind(&migration.dir)
                .bind(migration.version)
                .bind(&migration.filename)
                .bind(&migration.sql)
                .bind(&migration.hash);
            tx.execute(query).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Validate migration sequence and get the migrations that need to be applied.
    fn validate_migrations_and_get_unapplied(
        &self,
        applied_migrations: Vec<Migration>,
        source_migrations: Vec<Migration>,
    ) -> Result<Vec<Migration>, MigrationValidationError> {
        for (db_migration, source_migration) in
            applied_migrations.iter().zip(source_migrations.iter())
        {
            if db_migration.version != source_migration.version {
                return Err(MigrationValidationError::InconsistentVersion(
                    db_migration.version,
                    source_migration.version,
                ));
            }
            if db_migration.hash != source_migration.hash {
                return Err(MigrationValidationError::InconsistentHash(
                    db_migration.hash.clone(),
                    source_migration.hash.clone(),
                ));
            }
        }

        if applied_migrations.len() > source_migrations.len() {
            return Ok(vec![]);
        }

        let unapplied = source_migrations[applied_migrations.len()..].to_vec();
        Ok(unapplied)
    }

    /// Initialize the migrations bookkeeping table. Idempotent.
    pub(crate) async fn initialize_migrations_table(&self) -> Result<(), sqlx::Error> {
        let query = r#"
            CREATE TABLE IF NOT EXISTS migrations (
                dir TEXT NOT NULL,
                version INTEGER NOT NULL,
                filename TEXT NOT NULL,
                sql TEXT NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (dir, version)
            )
        "#;
        sqlx::query(query).execute(&self.conn).await?;
        Ok(())
    }

    async fn has_initialized_migrations(&self) -> bool {
        let query = r#"
            SELECT name FROM sqlite_master WHERE type='table' AND name='migrations'
        "#;
        let row = sqlx::query(query).fetch_optional(&self.conn).await;
        matches!(row, Ok(Some(_)))
    }

    /// Get existing migrations for a given directory, sorted by version ascending.
    async fn get_existing_migrations(&self, dir: &MigrationDir) -> Vec<Migration> {
        let query = r#"
            SELECT dir, version, filename, sql, hash
            FROM migrations
            WHERE dir = $1
            ORDER BY version ASC
        "#;
        let rows = sqlx::query(query)
            .bind(dir.as_str())
            .fetch_all(&self.conn)
            .await
            .expect("migrations table to be queryable");

        let mut migrations = Vec::new();
        for row in rows {
            let dir: String = row.get("dir");
            let version: i32 = row.get("version");
            let filename: String = row.get("filename");
            let sql: String = row.get("sql");
            let hash: String = row.get("hash");
            migrations.push(Migration::new(dir, filename, version, sql, hash));
        }
        migrations
    }
}

#[async_trait]
impl Configurable<SqliteDBConfig> for SqliteDb {
    async fn try_from_config(
        config: &SqliteDBConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Box::new(SqliteCreationError::SqlxError(e)) as Box<dyn ChromaError>)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(connect_options)
            .await
            .map_err(|e| Box::new(SqliteCreationError::SqlxError(e)) as Box<dyn ChromaError>)?;

        let db = SqliteDb::new(pool, config.hash_type.clone());
        db.initialize_migrations_table()
            .await
            .map_err(|e| Box::new(SqliteCreationError::SqlxError(e)) as Box<dyn ChromaError>)?;

        match config.migration_mode {
            MigrationMode::Apply => db
                .apply_all_migration()
                .await
                .map_err(|e| Box::new(SqliteCreationError::MigrationError(e)) as Box<dyn ChromaError>)?,
            MigrationMode::Validate => db
                .validate_all_migrations()
                .await
                .map_err(|e| Box::new(SqliteCreationError::MigrationError(e)) as Box<dyn ChromaError>)?,
        }

        Ok(db)
    }
}

//////////////////////// Error Types ////////////////////////

#[derive(Error, Debug)]
pub enum SqliteMigrationError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),
    #[error(transparent)]
    GetSourceMigrationsError(#[from] GetSourceMigrationsError),
    #[error(transparent)]
    MigrationValidationError(#[from] MigrationValidationError),
    #[error("Migrations table not initialized")]
    MigrationsTableNotInitialized,
    #[error("Unapplied migrations found")]
    UnappliedMigrationsFound,
}

impl ChromaError for SqliteMigrationError {
    fn code(&self) -> ErrorCodes {
        match self {
            SqliteMigrationError::SqlxError(_) => ErrorCodes::Internal,
            SqliteMigrationError::GetSourceMigrationsError(_) => ErrorCodes::Internal,
            SqliteMigrationError::MigrationValidationError(_) => ErrorCodes::Internal,
            SqliteMigrationError::MigrationsTableNotInitialized => ErrorCodes::Internal,
            SqliteMigrationError::UnappliedMigrationsFound => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum SqliteCreationError {
    #[error(transparent)]
    MigrationError(#[from] SqliteMigrationError),
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),
}

impl ChromaError for SqliteCreationError {
    fn code(&self) -> ErrorCodes {
        match self {
            SqliteCreationError::MigrationError(err) => err.code(),
            SqliteCreationError::SqlxError(_) => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum MigrationValidationError {
    #[error("Inconsistent version: db={0}, source={1}")]
    InconsistentVersion(i32, i32),
    #[error("Inconsistent hash: db={0}, source={1}")]
    InconsistentHash(String, String),
}

//////////////////////// Test Helpers ////////////////////////

pub mod test_utils {
    use super::*;
    use tempfile::tempdir;

    /// Never ":memory:" — tests exercise the same on-disk path as production
    /// so a failure leaves an inspectable database file behind.
    pub fn new_test_db_persist_path() -> String {
        let path = tempdir().unwrap().keep();
        format!("sqlite://{}/taskctl-test.sqlite3", path.to_str().unwrap())
    }

    pub async fn get_new_sqlite_db() -> SqliteDb {
        let config = SqliteDBConfig {
            url: new_test_db_persist_path(),
            hash_type: MigrationHash::MD5,
            migration_mode: MigrationMode::Apply,
        };
        let registry = Registry::new();
        SqliteDb::try_from_config(&config, &registry)
            .await
            .expect("in-memory test db to be created")
    }
}

//////////////////////// Tests ////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::new_test_db_persist_path;

    #[tokio::test]
    async fn migrations_table_is_created() {
        let db = test_utils::get_new_sqlite_db().await;
        let query = r#"
            SELECT name FROM sqlite_master WHERE type='table' AND name='migrations'
        "#;
        let row = sqlx::query(query)
            .fetch_one(&db.conn)
            .await
            .expect("migrations table to exist");
        let name: String = row.get("name");
        assert_eq!(name, "migrations");
    }

    #[tokio::test]
    async fn coordinator_schema_is_applied() {
        let db = test_utils::get_new_sqlite_db().await;
        for table in [
            "tenants",
            "databases",
            "functions",
            "collections",
            "segments",
            "attached_functions",
            "tasks",
        ] {
            let query = "SELECT name FROM sqlite_master WHERE type='table' AND name=$1";
            let row = sqlx::query(query)
                .bind(table)
                .fetch_optional(&db.conn)
                .await
                .expect("query to succeed");
            assert!(row.is_some(), "expected table {table} to exist");
        }
    }

    #[tokio::test]
    async fn validate_mode_succeeds_after_apply() {
        let test_db_path = new_test_db_persist_path();
        let config = SqliteDBConfig {
            url: test_db_path.clone(),
            hash_type: MigrationHash::MD5,
            migration_mode: MigrationMode::Apply,
        };
        let registry = Registry::new();
        SqliteDb::try_from_config(&config, &registry)
            .await
            .expect("apply to succeed");

        let config = SqliteDBConfig {
            url: test_db_path,
            hash_type: MigrationHash::MD5,
            migration_mode: MigrationMode::Validate,
        };
        SqliteDb::try_from_config(&config, &registry)
            .await
            .expect("validate to succeed against an already-migrated db");
    }

    #[tokio::test]
    async fn tampered_migration_fails_validation() {
        let test_db_path = new_test_db_persist_path();
        let config = SqliteDBConfig {
            url: test_db_path.clone(),
            hash_type: MigrationHash::MD5,
            migration_mode: MigrationMode::Apply,
        };
        let registry = Registry::new();
        let db = SqliteDb::try_from_config(&config, &registry)
            .await
            .expect("apply to succeed");

        let dir = &MIGRATION_DIRS[0];
        let migrations = db.get_existing_migrations(dir).await;
        let query = r#"
            UPDATE migrations SET hash = $1 WHERE dir = $2 AND version = $3
        "#;
        sqlx::query(query)
            .bind("tampered-hash")
            .bind(&migrations[0].dir)
            .bind(migrations[0].version)
            .execute(&db.conn)
            .await
            .expect("update to succeed");

        let config = SqliteDBConfig {
            url: test_db_path,
            hash_type: MigrationHash::MD5,
            migration_mode: MigrationMode::Validate,
        };
        let result = SqliteDb::try_from_config(&config, &registry).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reset_drops_user_data() {
        let db = test_utils::get_new_sqlite_db().await;

        sqlx::query("INSERT INTO tenants (id, last_compaction_time) VALUES ($1, 0)")
            .bind("test_tenant")
            .execute(&db.conn)
            .await
            .expect("insert to succeed");

        db.reset().await.expect("reset to succeed");

        let result = sqlx::query("SELECT id FROM tenants WHERE id = $1")
            .bind("test_tenant")
            .fetch_all(&db.conn)
            .await
            .expect("query to succeed");
        assert!(result.is_empty());
    }
}
