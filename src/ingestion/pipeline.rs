//! Per-region steps of the two passes, each reduced to a RegionOutcome

use crate::ingestion::config::Config;
use crate::ingestion::error::Result;
use crate::ingestion::fetch::{fetch_region, FetchOutcome};
use crate::ingestion::files::FileSink;
use crate::ingestion::parse::normalize;
use crate::ingestion::types::{Region, RegionOutcome};
use crate::ingestion::write::Loader;
use reqwest::Client;
use tracing::{error, info, warn};

/// Fetch → normalize → write for one region
///
/// Never fails: upstream, decoding and file faults are folded into the
/// returned outcome so the pass can continue with the next region.
pub async fn collect_region(
    client: &Client,
    config: &Config,
    sink: &FileSink,
    region: Region,
) -> RegionOutcome {
    let features = match fetch_region(client, config, region).await {
        Ok(FetchOutcome::Features(features)) => features,
        Ok(FetchOutcome::Empty) => {
            return RegionOutcome::SkippedNoData {
                reason: "no features".to_string(),
            }
        }
        Ok(FetchOutcome::Unavailable(status)) => {
            return RegionOutcome::SkippedNoData {
                reason: format!("HTTP {}", status),
            }
        }
        Err(e) => {
            error!("Collection failed for {}: {}", region, e);
            return RegionOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    let table = normalize(&features, region);

    if let Err(e) = sink.write(&table.records, region) {
        error!("Could not persist {}: {}", region, e);
        return RegionOutcome::Failed {
            reason: e.to_string(),
        };
    }

    RegionOutcome::Collected {
        rows: table.records.len(),
        dropped: table.dropped,
    }
}

/// Read the persisted CSV for one region and load it
///
/// A missing file is `SkippedNoFile`, an unreadable one is `Failed`.
/// Database errors are returned: they mean the connection itself is gone.
pub async fn load_region(
    loader: &mut Loader,
    sink: &FileSink,
    region: Region,
) -> Result<RegionOutcome> {
    let records = match sink.read(region) {
        Ok(Some(records)) => records,
        Ok(None) => {
            warn!("No persisted file for {}, skipping", region);
            return Ok(RegionOutcome::SkippedNoFile);
        }
        Err(e) => {
            error!("Could not read persisted file for {}: {}", region, e);
            return Ok(RegionOutcome::Failed {
                reason: e.to_string(),
            });
        }
    };

    let stats = loader.load_region(region, &records).await?;
    info!("Inserted data for {}: {}", region, stats);

    Ok(RegionOutcome::Loaded { stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::utils::build_http_client;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Upstream mock answering AC with two features, one with an impossible date
    async fn acre_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bngb/uf/AC/nomesgeograficos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-67.81, -9.97] },
                        "properties": {
                            "idNomebngb": 10,
                            "nomeGeografico": "Rio Branco",
                            "dataValidacao": "01-03-2020",
                            "latitude": -9.97,
                            "longitude": -67.81
                        }
                    },
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-72.67, -7.63] },
                        "properties": {
                            "idNomebngb": 11,
                            "nomeGeografico": "Cruzeiro do Sul",
                            "dataValidacao": "31-02-2020"
                        }
                    }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bngb/uf/AL/nomesgeograficos"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        server
    }

    fn setup(server: &MockServer) -> (Config, FileSink, TempDir) {
        let dir = tempdir().unwrap();
        let endpoint = format!("{}/api/v1/bngb/uf/{{uf}}/nomesgeograficos", server.uri());
        let csv_dir = dir.path().join("csv").display().to_string();
        let parquet_dir = dir.path().join("parquet").display().to_string();

        let config = Config::from_lookup(move |key| match key {
            "BNGB_ENDPOINT" => Some(endpoint.clone()),
            "CSV_DIR" => Some(csv_dir.clone()),
            "PARQUET_DIR" => Some(parquet_dir.clone()),
            _ => None,
        })
        .unwrap();
        let sink = FileSink::from_config(&config);

        (config, sink, dir)
    }

    #[tokio::test]
    async fn test_collect_region_persists_normalized_rows() {
        let server = acre_server().await;
        let (config, sink, _dir) = setup(&server);
        let client = build_http_client(Duration::from_secs(5)).unwrap();

        let outcome = collect_region(&client, &config, &sink, Region::AC).await;
        assert_eq!(outcome, RegionOutcome::Collected { rows: 2, dropped: 0 });

        let records = sink.read(Region::AC).unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 10);
        assert_eq!(records[0].data_validacao, NaiveDate::from_ymd_opt(2020, 3, 1));
        assert_eq!(records[1].id, 11);
        assert_eq!(records[1].data_validacao, None);
        assert!(records.iter().all(|r| r.uf == Region::AC));

        assert_eq!(sink.read_snapshot(Region::AC).unwrap(), Some(records));
    }

    #[tokio::test]
    async fn test_collect_region_keeps_features_with_bad_geometry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bngb/uf/PA/nomesgeograficos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-48.5, -1.45] },
                        "properties": { "idNomebngb": 20, "nomeGeografico": "Belém" }
                    },
                    {
                        "type": "Feature",
                        "properties": { "idNomebngb": 21, "nomeGeografico": "Marajó" }
                    },
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [] },
                        "properties": { "nomeGeografico": "sem id" }
                    }
                ]
            })))
            .mount(&server)
            .await;
        let (config, sink, _dir) = setup(&server);
        let client = build_http_client(Duration::from_secs(5)).unwrap();

        let outcome = collect_region(&client, &config, &sink, Region::PA).await;
        assert_eq!(outcome, RegionOutcome::Collected { rows: 2, dropped: 1 });

        let records = sink.read(Region::PA).unwrap().unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![20, 21]);
        assert_eq!(records[1].nome_geografico.as_deref(), Some("Marajó"));
    }

    #[tokio::test]
    async fn test_collect_region_skips_unavailable_upstream() {
        let server = acre_server().await;
        let (config, sink, _dir) = setup(&server);
        let client = build_http_client(Duration::from_secs(5)).unwrap();

        let outcome = collect_region(&client, &config, &sink, Region::AL).await;

        assert!(matches!(outcome, RegionOutcome::SkippedNoData { .. }));
        assert!(!sink.csv_path(Region::AL).exists());
        assert!(!sink.parquet_path(Region::AL).exists());
    }

    #[tokio::test]
    async fn test_collect_region_reports_network_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let dir = tempdir().unwrap();
        let endpoint = format!("{}/{{uf}}", base);
        let config = Config::from_lookup(move |key| {
            (key == "BNGB_ENDPOINT").then(|| endpoint.clone())
        })
        .unwrap();
        let sink = FileSink::new(dir.path().join("csv"), dir.path().join("parquet"));
        let client = build_http_client(Duration::from_secs(5)).unwrap();

        let outcome = collect_region(&client, &config, &sink, Region::AC).await;
        assert!(matches!(outcome, RegionOutcome::Failed { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL
    async fn test_collect_then_load_acre() {
        let server = acre_server().await;
        let (config, sink, _dir) = setup(&server);
        let client = build_http_client(Duration::from_secs(5)).unwrap();

        collect_region(&client, &config, &sink, Region::AC).await;

        dotenvy::dotenv().ok();
        let database = Config::from_env().unwrap().database;
        let mut loader = Loader::connect(&database).await.unwrap();
        loader.ensure_schema().await.unwrap();

        let outcome = load_region(&mut loader, &sink, Region::AC).await.unwrap();
        assert!(outcome.is_success());

        let first = loader.find(10).await.unwrap().unwrap();
        assert_eq!(first.data_validacao, NaiveDate::from_ymd_opt(2020, 3, 1));
        let second = loader.find(11).await.unwrap().unwrap();
        assert_eq!(second.data_validacao, None);

        let missing = load_region(&mut loader, &sink, Region::TO).await.unwrap();
        assert_eq!(missing, RegionOutcome::SkippedNoFile);

        loader.close().await.unwrap();
    }
}
