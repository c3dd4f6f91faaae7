//! Data ingestion module - BNGB geographic names pipeline:
//! fetch → normalize → persist (CSV + Parquet) → load (PostgreSQL)

pub mod config;
pub mod error;
pub mod fetch;
pub mod files;
pub mod parse;
pub mod pipeline;
pub mod types;
pub mod utils;
pub mod write;

pub use config::{Config, DatabaseConfig};
pub use error::{IngestError, Result};
pub use files::FileSink;
pub use types::*;
pub use write::Loader;
