//! Versioned schema migrations.
//!
//! Files in the migrations directory are named `NNNN_description.sql`. Each
//! version is applied once, inside a transaction that also records it in
//! `schema_migrations`, so a failed script leaves no trace.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use shared::config::server::DatabaseConfig;

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
     version    INTEGER PRIMARY KEY, \
     name       TEXT        NOT NULL, \
     applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())";

/// Tables the server reads and writes; readiness fails until all exist.
const REQUIRED_TABLES: &[&str] = &[
    "chat_messages",
    "ip_blacklist",
    "ip_whitelist",
    "chat_settings",
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migrations directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("migration file name '{0}' must look like NNNN_description.sql")]
    BadName(String),
    #[error("migration version {version} is used by both {first} and {second}")]
    DuplicateVersion {
        version: i32,
        first: String,
        second: String,
    },
    #[error("migration {version} ({name}) failed: {source}")]
    Apply {
        version: i32,
        name: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// One script on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i32,
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: usize,
    pub already_applied: usize,
}

/// Splits `0004_ip_whitelist.sql` into `(4, "ip_whitelist")`.
fn parse_file_name(file_name: &str) -> Option<(i32, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (digits, name) = stem.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some((digits.parse().ok()?, name.to_string()))
}

/// Loads every `.sql` file under `dir`, ordered by version.
///
/// # Errors
/// Fails on unreadable files, malformed names and duplicate versions.
pub fn discover(dir: &Path) -> Result<Vec<Migration>, MigrationError> {
    if !dir.is_dir() {
        return Err(MigrationError::MissingDirectory(dir.to_path_buf()));
    }
    let io_err = |source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut found: BTreeMap<i32, Migration> = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }
        let (version, name) = parse_file_name(file_name)
            .ok_or_else(|| MigrationError::BadName(file_name.to_string()))?;
        let sql = fs::read_to_string(&path).map_err(|source| MigrationError::Io {
            path: path.clone(),
            source,
        })?;

        if let Some(existing) = found.get(&version) {
            return Err(MigrationError::DuplicateVersion {
                version,
                first: existing.name.clone(),
                second: name,
            });
        }
        found.insert(version, Migration { version, name, sql });
    }

    Ok(found.into_values().collect())
}

/// Migrations not yet recorded in `applied`, in version order.
pub fn pending<'a>(migrations: &'a [Migration], applied: &BTreeSet<i32>) -> Vec<&'a Migration> {
    migrations
        .iter()
        .filter(|migration| !applied.contains(&migration.version))
        .collect()
}

/// Applies every pending migration from `config.migrations_path`.
///
/// # Errors
/// Returns [`MigrationError`] when the directory is unusable or a script fails.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<MigrationReport, MigrationError> {
    let migrations = discover(&config.migrations_path)?;
    sqlx::raw_sql(LEDGER_DDL).execute(pool).await?;

    let applied: BTreeSet<i32> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

    let known: BTreeSet<i32> = migrations.iter().map(|m| m.version).collect();
    for version in applied.difference(&known) {
        warn!(version, "database has a migration that is not on disk");
    }

    let todo = pending(&migrations, &applied);
    let report = MigrationReport {
        applied: todo.len(),
        already_applied: migrations.len() - todo.len(),
    };
    for migration in todo {
        apply(pool, migration).await?;
    }

    info!(
        applied = report.applied,
        already_applied = report.already_applied,
        "database migrations complete"
    );
    Ok(report)
}

async fn apply(pool: &PgPool, migration: &Migration) -> Result<(), MigrationError> {
    let wrap = |source| MigrationError::Apply {
        version: migration.version,
        name: migration.name.clone(),
        source,
    };

    info!(version = migration.version, name = %migration.name, "applying migration");
    let mut tx = pool.begin().await.map_err(wrap)?;
    // multi-statement scripts need the simple query protocol
    sqlx::raw_sql(&migration.sql)
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(migration.version)
        .bind(&migration.name)
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;
    tx.commit().await.map_err(wrap)
}

/// Startup liveness check.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Ready once every table the server uses exists.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    let tables: Vec<String> = REQUIRED_TABLES.iter().map(ToString::to_string).collect();
    let present: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = ANY($1)",
    )
    .bind(&tables)
    .fetch_one(pool)
    .await?;

    if usize::try_from(present).unwrap_or_default() == REQUIRED_TABLES.len() {
        Ok(())
    } else {
        Err(sqlx::Error::RowNotFound)
    }
}
