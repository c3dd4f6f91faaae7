//! File sink - per-region CSV and Parquet copies of the canonical table

use crate::ingestion::config::Config;
use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::{GeographicNameRecord, Region, COLUMNS};
use crate::ingestion::utils::{date_to_days, days_to_date};
use arrow_array::cast::AsArray;
use arrow_array::types::{Date32Type, Float64Type, Int64Type};
use arrow_array::{
    Array, ArrayRef, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FILE_STEM: &str = "nomes_geograficos";

/// Writes and reads the two durable copies of a region's table
#[derive(Debug, Clone)]
pub struct FileSink {
    csv_dir: PathBuf,
    parquet_dir: PathBuf,
}

impl FileSink {
    pub fn new(csv_dir: impl Into<PathBuf>, parquet_dir: impl Into<PathBuf>) -> Self {
        Self {
            csv_dir: csv_dir.into(),
            parquet_dir: parquet_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.csv_dir, &config.parquet_dir)
    }

    pub fn csv_path(&self, region: Region) -> PathBuf {
        self.csv_dir.join(format!("{}_{}.csv", region, FILE_STEM))
    }

    pub fn parquet_path(&self, region: Region) -> PathBuf {
        self.parquet_dir.join(format!("{}_{}.parquet", region, FILE_STEM))
    }

    /// Overwrite both files for `region`
    pub fn write(&self, records: &[GeographicNameRecord], region: Region) -> Result<()> {
        fs::create_dir_all(&self.csv_dir).map_err(|e| IngestError::io(&self.csv_dir, e))?;
        fs::create_dir_all(&self.parquet_dir)
            .map_err(|e| IngestError::io(&self.parquet_dir, e))?;

        let csv_path = self.csv_path(region);
        write_csv(&csv_path, records)?;
        debug!("Wrote {} rows to {:?}", records.len(), csv_path);

        let parquet_path = self.parquet_path(region);
        write_parquet(&parquet_path, records)?;
        debug!("Wrote {} rows to {:?}", records.len(), parquet_path);

        info!("Saved {} records for {}", records.len(), region);
        Ok(())
    }

    /// Reload the CSV copy; `None` when nothing was persisted for `region`
    pub fn read(&self, region: Region) -> Result<Option<Vec<GeographicNameRecord>>> {
        let path = self.csv_path(region);
        if !path.exists() {
            debug!("No CSV for {} at {:?}", region, path);
            return Ok(None);
        }

        info!("Reading {:?}", path);
        let mut reader = csv::Reader::from_path(&path)?;

        let mut records = Vec::new();
        let mut parse_errors = 0;

        for (idx, result) in reader.deserialize::<GeographicNameRecord>().enumerate() {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    parse_errors += 1;
                    if parse_errors <= 10 {
                        // Only log first 10 errors
                        warn!("Failed to deserialize row {} of {:?}: {}", idx, path, e);
                    }
                }
            }
        }

        if parse_errors > 0 {
            warn!("Skipped {} unreadable rows in {:?}", parse_errors, path);
        }

        Ok(Some(records))
    }

    /// Reload the Parquet snapshot; `None` when it does not exist
    pub fn read_snapshot(&self, region: Region) -> Result<Option<Vec<GeographicNameRecord>>> {
        let path = self.parquet_path(region);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).map_err(|e| IngestError::io(&path, e))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut records = Vec::new();
        for batch in reader {
            records.extend(records_from_batch(&path, &batch?)?);
        }

        Ok(Some(records))
    }
}

fn write_csv(path: &Path, records: &[GeographicNameRecord]) -> Result<()> {
    // Header is written by hand so an empty table still gets one
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(|e| IngestError::io(path, e))?;

    Ok(())
}

/// Arrow schema of the columnar snapshot
pub fn snapshot_schema() -> SchemaRef {
    let fields = COLUMNS
        .iter()
        .map(|&name| match name {
            "id" => Field::new(name, DataType::Int64, false),
            "uf" => Field::new(name, DataType::Utf8, false),
            "data_validacao" | "data_publicacao" => Field::new(name, DataType::Date32, true),
            "latitude" | "longitude" => Field::new(name, DataType::Float64, true),
            _ => Field::new(name, DataType::Utf8, true),
        })
        .collect::<Vec<_>>();

    Arc::new(Schema::new(fields))
}

fn text_column<F>(records: &[GeographicNameRecord], field: F) -> ArrayRef
where
    F: Fn(&GeographicNameRecord) -> Option<&str>,
{
    Arc::new(StringArray::from(records.iter().map(field).collect::<Vec<_>>()))
}

fn date_column<F>(records: &[GeographicNameRecord], field: F) -> ArrayRef
where
    F: Fn(&GeographicNameRecord) -> Option<chrono::NaiveDate>,
{
    Arc::new(Date32Array::from(
        records
            .iter()
            .map(|r| field(r).map(date_to_days))
            .collect::<Vec<_>>(),
    ))
}

fn float_column<F>(records: &[GeographicNameRecord], field: F) -> ArrayRef
where
    F: Fn(&GeographicNameRecord) -> Option<f64>,
{
    Arc::new(Float64Array::from(records.iter().map(field).collect::<Vec<_>>()))
}

fn records_to_batch(records: &[GeographicNameRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(
            records.iter().map(|r| r.id).collect::<Vec<_>>(),
        )),
        text_column(records, |r| r.nome_geografico.as_deref()),
        text_column(records, |r| r.geocodigo.as_deref()),
        text_column(records, |r| r.termo_generico.as_deref()),
        text_column(records, |r| r.termo_especifico.as_deref()),
        text_column(records, |r| r.conectivo.as_deref()),
        text_column(records, |r| r.categoria.as_deref()),
        text_column(records, |r| r.classe.as_deref()),
        text_column(records, |r| r.escala_ocorrencia.as_deref()),
        text_column(records, |r| r.escala_origem_geometria.as_deref()),
        text_column(records, |r| r.status_validacao.as_deref()),
        text_column(records, |r| r.nivel_validacao.as_deref()),
        text_column(records, |r| r.sustentacao_validacao.as_deref()),
        date_column(records, |r| r.data_validacao),
        date_column(records, |r| r.data_publicacao),
        float_column(records, |r| r.latitude),
        float_column(records, |r| r.longitude),
        text_column(records, |r| r.latitude_gms.as_deref()),
        text_column(records, |r| r.longitude_gms.as_deref()),
        text_column(records, |r| Some(r.uf.as_str())),
    ];

    Ok(RecordBatch::try_new(snapshot_schema(), columns)?)
}

fn write_parquet(path: &Path, records: &[GeographicNameRecord]) -> Result<()> {
    let batch = records_to_batch(records)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(path).map_err(|e| IngestError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

fn invalid_column(path: &Path, name: &str) -> IngestError {
    IngestError::Snapshot {
        path: path.to_path_buf(),
        reason: format!("missing or mistyped column '{}'", name),
    }
}

fn records_from_batch(path: &Path, batch: &RecordBatch) -> Result<Vec<GeographicNameRecord>> {
    let text = move |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_string_opt::<i32>())
            .ok_or_else(|| invalid_column(path, name))
    };
    let dates = move |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_primitive_opt::<Date32Type>())
            .ok_or_else(|| invalid_column(path, name))
    };
    let floats = move |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_primitive_opt::<Float64Type>())
            .ok_or_else(|| invalid_column(path, name))
    };

    let ids = batch
        .column_by_name("id")
        .and_then(|c| c.as_primitive_opt::<Int64Type>())
        .ok_or_else(|| invalid_column(path, "id"))?;
    let nome_geografico = text("nome_geografico")?;
    let geocodigo = text("geocodigo")?;
    let termo_generico = text("termo_generico")?;
    let termo_especifico = text("termo_especifico")?;
    let conectivo = text("conectivo")?;
    let categoria = text("categoria")?;
    let classe = text("classe")?;
    let escala_ocorrencia = text("escala_ocorrencia")?;
    let escala_origem_geometria = text("escala_origem_geometria")?;
    let status_validacao = text("status_validacao")?;
    let nivel_validacao = text("nivel_validacao")?;
    let sustentacao_validacao = text("sustentacao_validacao")?;
    let data_validacao = dates("data_validacao")?;
    let data_publicacao = dates("data_publicacao")?;
    let latitude = floats("latitude")?;
    let longitude = floats("longitude")?;
    let latitude_gms = text("latitude_gms")?;
    let longitude_gms = text("longitude_gms")?;
    let uf = text("uf")?;

    let opt_text = |a: &StringArray, i: usize| a.is_valid(i).then(|| a.value(i).to_string());
    let opt_date =
        |a: &Date32Array, i: usize| a.is_valid(i).then(|| days_to_date(a.value(i))).flatten();
    let opt_float = |a: &Float64Array, i: usize| a.is_valid(i).then(|| a.value(i));

    (0..batch.num_rows())
        .map(|i| -> Result<GeographicNameRecord> {
            Ok(GeographicNameRecord {
                id: ids.value(i),
                nome_geografico: opt_text(nome_geografico, i),
                geocodigo: opt_text(geocodigo, i),
                termo_generico: opt_text(termo_generico, i),
                termo_especifico: opt_text(termo_especifico, i),
                conectivo: opt_text(conectivo, i),
                categoria: opt_text(categoria, i),
                classe: opt_text(classe, i),
                escala_ocorrencia: opt_text(escala_ocorrencia, i),
                escala_origem_geometria: opt_text(escala_origem_geometria, i),
                status_validacao: opt_text(status_validacao, i),
                nivel_validacao: opt_text(nivel_validacao, i),
                sustentacao_validacao: opt_text(sustentacao_validacao, i),
                data_validacao: opt_date(data_validacao, i),
                data_publicacao: opt_date(data_publicacao, i),
                latitude: opt_float(latitude, i),
                longitude: opt_float(longitude, i),
                latitude_gms: opt_text(latitude_gms, i),
                longitude_gms: opt_text(longitude_gms, i),
                uf: uf.value(i).parse::<Region>()?,
            })
        })
        .collect()
}
