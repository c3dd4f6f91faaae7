//! Core data types for the ingestion pipeline
//! Pure data structures with no I/O

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Brazilian federative units (UFs) served by the BNGB endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    AC,
    AL,
    AP,
    AM,
    BA,
    CE,
    DF,
    ES,
    GO,
    MA,
    MT,
    MS,
    MG,
    PA,
    PB,
    PR,
    PE,
    PI,
    RJ,
    RN,
    RS,
    RO,
    RR,
    SC,
    SP,
    SE,
    TO,
}

impl Region {
    /// Every region, in collection order
    pub const ALL: [Region; 27] = [
        Region::AC,
        Region::AL,
        Region::AP,
        Region::AM,
        Region::BA,
        Region::CE,
        Region::DF,
        Region::ES,
        Region::GO,
        Region::MA,
        Region::MT,
        Region::MS,
        Region::MG,
        Region::PA,
        Region::PB,
        Region::PR,
        Region::PE,
        Region::PI,
        Region::RJ,
        Region::RN,
        Region::RS,
        Region::RO,
        Region::RR,
        Region::SC,
        Region::SP,
        Region::SE,
        Region::TO,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::AC => "AC",
            Region::AL => "AL",
            Region::AP => "AP",
            Region::AM => "AM",
            Region::BA => "BA",
            Region::CE => "CE",
            Region::DF => "DF",
            Region::ES => "ES",
            Region::GO => "GO",
            Region::MA => "MA",
            Region::MT => "MT",
            Region::MS => "MS",
            Region::MG => "MG",
            Region::PA => "PA",
            Region::PB => "PB",
            Region::PR => "PR",
            Region::PE => "PE",
            Region::PI => "PI",
            Region::RJ => "RJ",
            Region::RN => "RN",
            Region::RS => "RS",
            Region::RO => "RO",
            Region::RR => "RR",
            Region::SC => "SC",
            Region::SP => "SP",
            Region::SE => "SE",
            Region::TO => "TO",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown region code '{0}'")]
pub struct ParseRegionError(pub String);

impl FromStr for Region {
    type Err = ParseRegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == code)
            .ok_or_else(|| ParseRegionError(s.to_string()))
    }
}

/// Canonical column order, shared by the CSV header, the Parquet schema
/// and the `nome_geografico` table
pub const COLUMNS: [&str; 20] = [
    "id",
    "nome_geografico",
    "geocodigo",
    "termo_generico",
    "termo_especifico",
    "conectivo",
    "categoria",
    "classe",
    "escala_ocorrencia",
    "escala_origem_geometria",
    "status_validacao",
    "nivel_validacao",
    "sustentacao_validacao",
    "data_validacao",
    "data_publicacao",
    "latitude",
    "longitude",
    "latitude_gms",
    "longitude_gms",
    "uf",
];

/// One element of the API's `features` array
///
/// Only the id and the property bag are kept; `geometry`, `type` and any
/// other member are never decoded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceFeature {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
}

impl SourceFeature {
    /// Anything that is not a JSON object decodes to an empty feature
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// One geographic name - field order must match `COLUMNS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicNameRecord {
    pub id: i64,
    pub nome_geografico: Option<String>,
    pub geocodigo: Option<String>,
    pub termo_generico: Option<String>,
    pub termo_especifico: Option<String>,
    pub conectivo: Option<String>,
    pub categoria: Option<String>,
    pub classe: Option<String>,
    pub escala_ocorrencia: Option<String>,
    pub escala_origem_geometria: Option<String>,
    pub status_validacao: Option<String>,
    pub nivel_validacao: Option<String>,
    pub sustentacao_validacao: Option<String>,

    // Persisted as YYYY-MM-DD; unreadable cells come back as null
    #[serde(deserialize_with = "csv::invalid_option")]
    pub data_validacao: Option<NaiveDate>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub data_publicacao: Option<NaiveDate>,

    #[serde(deserialize_with = "csv::invalid_option")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub longitude: Option<f64>,
    pub latitude_gms: Option<String>,
    pub longitude_gms: Option<String>,

    pub uf: Region,
}

impl GeographicNameRecord {
    /// A record with only its key columns set
    pub fn new(id: i64, uf: Region) -> Self {
        Self {
            id,
            nome_geografico: None,
            geocodigo: None,
            termo_generico: None,
            termo_especifico: None,
            conectivo: None,
            categoria: None,
            classe: None,
            escala_ocorrencia: None,
            escala_origem_geometria: None,
            status_validacao: None,
            nivel_validacao: None,
            sustentacao_validacao: None,
            data_validacao: None,
            data_publicacao: None,
            latitude: None,
            longitude: None,
            latitude_gms: None,
            longitude_gms: None,
            uf,
        }
    }
}

/// Output of the normalizer for one region
#[derive(Debug, Clone, Default)]
pub struct NormalizedTable {
    pub records: Vec<GeographicNameRecord>,
    /// Features without a usable id
    pub dropped: usize,
}

/// Load operation statistics for one region
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub inserted: usize,
    /// Rows whose id was already present (conflict no-op)
    pub skipped: usize,
    pub errors: usize,
}

impl LoadStats {
    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.errors
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted: {}, skipped: {}, errors: {}",
            self.inserted, self.skipped, self.errors
        )
    }
}

/// What happened to one region in one pass
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    /// Fetched, normalized and written to both files
    Collected { rows: usize, dropped: usize },
    /// Upstream answered with a non-200 status or no features
    SkippedNoData { reason: String },
    /// Network, decoding or file fault; the run moved on
    Failed { reason: String },
    /// Inserted from the persisted CSV
    Loaded { stats: LoadStats },
    /// Nothing persisted for this region
    SkippedNoFile,
}

impl RegionOutcome {
    /// True only when the region went through its pass without losing rows
    pub fn is_success(&self) -> bool {
        match self {
            RegionOutcome::Collected { dropped, .. } => *dropped == 0,
            RegionOutcome::Loaded { stats } => stats.errors == 0,
            RegionOutcome::SkippedNoData { .. }
            | RegionOutcome::Failed { .. }
            | RegionOutcome::SkippedNoFile => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RegionOutcome::Collected { .. } if self.is_success() => "collected",
            RegionOutcome::Collected { .. } => "partial",
            RegionOutcome::Loaded { .. } if self.is_success() => "loaded",
            RegionOutcome::Loaded { .. } => "partial",
            RegionOutcome::SkippedNoData { .. } => "skipped-no-data",
            RegionOutcome::Failed { .. } => "failed",
            RegionOutcome::SkippedNoFile => "skipped-no-file",
        }
    }
}

impl fmt::Display for RegionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionOutcome::Collected { rows, dropped } => {
                write!(f, "{} ({} rows, {} dropped)", self.label(), rows, dropped)
            }
            RegionOutcome::SkippedNoData { reason } | RegionOutcome::Failed { reason } => {
                write!(f, "{} ({})", self.label(), reason)
            }
            RegionOutcome::Loaded { stats } => write!(f, "{} ({})", self.label(), stats),
            RegionOutcome::SkippedNoFile => f.write_str(self.label()),
        }
    }
}

/// Per-region outcomes of both passes
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub collection: Vec<(Region, RegionOutcome)>,
    pub load: Vec<(Region, RegionOutcome)>,
}

impl RunSummary {
    pub fn record_collection(&mut self, region: Region, outcome: RegionOutcome) {
        self.collection.push((region, outcome));
    }

    pub fn record_load(&mut self, region: Region, outcome: RegionOutcome) {
        self.load.push((region, outcome));
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &(Region, RegionOutcome)> {
        self.collection.iter().chain(self.load.iter())
    }

    /// True when every region of every pass that ran fully succeeded
    pub fn is_complete(&self) -> bool {
        self.outcomes().all(|(_, outcome)| outcome.is_success())
    }

    /// Summed load statistics across regions
    pub fn load_totals(&self) -> LoadStats {
        self.load
            .iter()
            .fold(LoadStats::default(), |mut acc, (_, outcome)| {
                if let RegionOutcome::Loaded { stats } = outcome {
                    acc.inserted += stats.inserted;
                    acc.skipped += stats.skipped;
                    acc.errors += stats.errors;
                }
                acc
            })
    }

    pub fn collected_rows(&self) -> usize {
        self.collection
            .iter()
            .map(|(_, outcome)| match outcome {
                RegionOutcome::Collected { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    /// Regions that did not fully succeed, in pass order
    pub fn incomplete(&self) -> Vec<(Region, &RegionOutcome)> {
        self.outcomes()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(region, outcome)| (*region, outcome))
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collected_ok = self
            .collection
            .iter()
            .filter(|(_, o)| o.is_success())
            .count();
        let loaded_ok = self.load.iter().filter(|(_, o)| o.is_success()).count();

        write!(
            f,
            "collection: {}/{} regions ({} rows), load: {}/{} regions ({})",
            collected_ok,
            self.collection.len(),
            self.collected_rows(),
            loaded_ok,
            self.load.len(),
            self.load_totals()
        )
    }
}
