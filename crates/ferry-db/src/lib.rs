//! Ferry Database Layer
//!
//! SQLite backed state store: one migration record per source object plus the page
//! checkpoints of batch runs.

pub mod db;
pub mod error;

pub use db::{connect, CheckpointRepository, MigrationRepository, PageCheckpoint, StateStore};
pub use error::{StoreError, StoreResult};
