//! Error types for the ingestion pipeline

use crate::ingestion::types::{ParseRegionError, Region};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Upstream unreachable, timed out, or the body could not be read
    #[error("network error fetching {region}: {source}")]
    Network {
        region: Region,
        #[source]
        source: reqwest::Error,
    },

    /// Body is not a GeoJSON feature collection
    #[error("malformed response for {region}: {reason}")]
    MalformedResponse { region: Region, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Snapshot file does not carry the expected columns
    #[error("invalid snapshot {}: {reason}", .path.display())]
    Snapshot { path: PathBuf, reason: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    UnknownRegion(#[from] ParseRegionError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }
}
