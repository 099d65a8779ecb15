use crate::config::MigrationHash;
use core::str;
use regex::Regex;
use rust_embed::Embed;
use sha2::{Digest, Sha256};
use std::{borrow::Cow, sync::LazyLock};
use thiserror::Error;

/// A migration is a single SQL file that is executed to update the database schema.
/// ## Fields
/// - dir: the migration directory the file belongs to (currently just "coordinator")
/// - filename: the name of the migration file
/// - version: the version of the migration file
/// - sql: the SQL content of the migration file
/// - hash: the hash of the migration file content
#[derive(Clone, Debug)]
pub(crate) struct Migration {
    pub(crate) dir: String,
    pub(crate) filename: String,
    pub(crate) version: i32,
    pub(crate) sql: String,
    pub(crate) hash: String,
}

impl Migration {
    pub(crate) fn new(
        dir: String,
        filename: String,
        version: i32,
        sql: String,
        hash: String,
    ) -> Self {
        Self {
            dir,
            filename,
            version,
            sql,
            hash,
        }
    }
}

/// A migration dir is a directory that contains migration files for a given subsystem.
/// The coordinator only has a single logical schema (tenants, databases, functions,
/// collections, segments, attached functions, tasks) so there is a single directory.
pub(crate) enum MigrationDir {
    Coordinator,
}

pub(crate) const MIGRATION_DIRS: [MigrationDir; 1] = [MigrationDir::Coordinator];

#[derive(Error, Debug)]
pub enum GetSourceMigrationsError {
    #[error(transparent)]
    ParseMigrationFilenameError(#[from] ParseMigrationFilenameError),
    #[error("{0}")]
    NoSuchMigrationFile(String),
    #[error("Failed to get migration file: {0}")]
    FailedToGetMigrationFile(String),
}

impl MigrationDir {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::Coordinator => "coordinator",
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Cow<'static, str>>> {
        match self {
            Self::Coordinator => Box::new(CoordinatorMigrationsFolder::iter()),
        }
    }

    fn get_file(&self, name: &str) -> Option<rust_embed::EmbeddedFile> {
        match self {
            Self::Coordinator => CoordinatorMigrationsFolder::get(name),
        }
    }

    /// Get the migrations that are on disk, sorted by version ascending.
    pub(crate) fn get_source_migrations(
        &self,
        migration_hash: &MigrationHash,
    ) -> Result<Vec<Migration>, GetSourceMigrationsError> {
        let mut migrations = Vec::new();

        for migration_name in self.iter() {
            let (version, _) = parse_migration_filename(&migration_name)
                .map_err(GetSourceMigrationsError::ParseMigrationFilenameError)?;
            let sql = match self.get_file(&migration_name) {
                Some(sql) => str::from_utf8(&sql.data)
                    .map_err(|_| {
                        GetSourceMigrationsError::FailedToGetMigrationFile(
                            migration_name.to_string(),
                        )
                    })?
                    // Remove CR character on Windows
                    .replace(
                        str::from_utf8(&[13]).expect("CR is valid ASCII character"),
                        "",
                    ),
                None => {
                    return Err(GetSourceMigrationsError::NoSuchMigrationFile(
                        migration_name.to_string(),
                    ))
                }
            };
            let hash = match migration_hash {
                MigrationHash::SHA256 => {
                    let mut hasher = Sha256::new();
                    hasher.update(sql.as_bytes());
                    format!("{:x}", hasher.finalize())
                }
                MigrationHash::MD5 => {
                    let hash = md5::compute(sql.as_bytes());
                    format!("{:x}", hash)
                }
            };
            migrations.push(Migration::new(
                self.as_str().to_string(),
                migration_name.to_string(),
                version,
                sql,
                hash,
            ));
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }
}

///////////// MigrationDir Helpers //////////////

#[derive(Error, Debug)]
pub enum ParseMigrationFilenameError {
    #[error("Invalid migration filename: {0}")]
    InvalidMigrationFilename(String),
    #[error("Failed to find version")]
    FailedToFindVersion,
    #[error("Failed to find scope")]
    FailedToFindScope,
}

// Format is <version>-<name>.<scope>.sql, e.g. 00001-tenants.sqlite.sql
// scope is unused, kept for consistency with the rest of this codebase's migration naming.
fn parse_migration_filename(filename: &str) -> Result<(i32, String), ParseMigrationFilenameError> {
    let regex_match = MIGRATION_FILENAME_REGEX.captures(filename);
    let groups = match regex_match {
        Some(groups) => groups,
        None => {
            return Err(ParseMigrationFilenameError::InvalidMigrationFilename(
                filename.to_string(),
            ))
        }
    };

    let version = match groups.get(1) {
        Some(version) => version,
        None => return Err(ParseMigrationFilenameError::FailedToFindVersion),
    };
    let version = match version.as_str().parse::<i32>() {
        Ok(version) => version,
        Err(e) => {
            return Err(ParseMigrationFilenameError::InvalidMigrationFilename(
                e.to_string(),
            ))
        }
    };

    let scope = match groups.get(3) {
        Some(scope) => scope,
        None => return Err(ParseMigrationFilenameError::FailedToFindScope),
    };
    let scope = scope.as_str().to_string();

    Ok((version, scope))
}

static MIGRATION_FILENAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)-(.+)\.(.+)\.sql").expect("Failed to compile regex"));

///////////// Rust Embed Migrations Data //////////////

#[derive(Embed)]
#[folder = "./migrations/coordinator/"]
#[include = "*.sql"]
struct CoordinatorMigrationsFolder;
