//! Repositories for the migration state store
//
// Per-object migration records (register, claim, update, release)
pub mod record;
//
// Page checkpoints of batch runs
pub mod checkpoint;

pub use checkpoint::{CheckpointRepository, PageCheckpoint};
pub use record::MigrationRepository;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::StoreResult;

/// Open (creating if needed) the SQLite database at `path` and apply the schema
pub async fn connect(path: &Path, max_connections: u32) -> StoreResult<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(
        path = %path.display(),
        max_connections,
        "State store ready"
    );

    Ok(pool)
}

/// Both repositories over one pool
#[derive(Clone)]
pub struct StateStore {
    records: MigrationRepository,
    checkpoints: CheckpointRepository,
}

impl StateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            records: MigrationRepository::new(pool.clone()),
            checkpoints: CheckpointRepository::new(pool),
        }
    }

    pub async fn open(path: &Path, max_connections: u32) -> StoreResult<Self> {
        let pool = connect(path, max_connections).await?;
        Ok(Self::new(pool))
    }

    pub fn records(&self) -> &MigrationRepository {
        &self.records
    }

    pub fn checkpoints(&self) -> &CheckpointRepository {
        &self.checkpoints
    }
}
