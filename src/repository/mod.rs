use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::hs_code::QueryResult;

pub mod json;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

pub trait ResultWriter {
    /// Persists one result and returns the written path.
    fn save_single(&self, result: &QueryResult) -> RepositoryResult<PathBuf>;
    /// Persists a batch with success/failure totals and returns the written path.
    fn save_batch(&self, results: &[QueryResult]) -> RepositoryResult<PathBuf>;
    /// Persists the bare result list without metadata.
    fn export_simple(&self, results: &[QueryResult]) -> RepositoryResult<PathBuf>;
}

pub trait ResultReader {
    fn load(&self, path: &Path) -> RepositoryResult<serde_json::Value>;
}
