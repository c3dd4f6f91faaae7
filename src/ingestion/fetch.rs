//! Fetch functions - retrieve one region's feature collection from the BNGB API

use crate::ingestion::config::Config;
use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::{Region, SourceFeature};
use crate::ingestion::utils::endpoint_url;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{info, warn};

/// Result of asking the API for one region
#[derive(Debug)]
pub enum FetchOutcome {
    Features(Vec<SourceFeature>),
    /// HTTP 200 but no features
    Empty,
    /// Any status other than 200
    Unavailable(StatusCode),
}

/// Fetch the geographic names of one region
///
/// Only network faults and bodies that are not JSON are errors; a non-200
/// status or an empty `features` list is a regular outcome. Geometry is
/// never decoded, so a bad or missing geometry cannot reject the region.
pub async fn fetch_region(client: &Client, config: &Config, region: Region) -> Result<FetchOutcome> {
    let url = endpoint_url(&config.endpoint_template, region);
    info!("Fetching geographic names for {} from {}", region, url);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|source| IngestError::Network { region, source })?;

    let status = response.status();
    if status != StatusCode::OK {
        warn!("Upstream answered {} for {}", status, region);
        return Ok(FetchOutcome::Unavailable(status));
    }

    let body = response
        .bytes()
        .await
        .map_err(|source| IngestError::Network { region, source })?;
    info!("Downloaded {} bytes for {}", body.len(), region);

    let mut document: Value =
        serde_json::from_slice(&body).map_err(|e| IngestError::MalformedResponse {
            region,
            reason: e.to_string(),
        })?;

    let features = match document.get_mut("features").map(Value::take) {
        Some(Value::Array(features)) if !features.is_empty() => features,
        _ => {
            warn!("No features returned for {}", region);
            return Ok(FetchOutcome::Empty);
        }
    };

    let features: Vec<SourceFeature> = features.into_iter().map(SourceFeature::from_value).collect();
    info!("Fetched {} features for {}", features.len(), region);

    Ok(FetchOutcome::Features(features))
}
