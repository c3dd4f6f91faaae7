//! Parse functions - flatten BNGB features into GeographicNameRecord structs

use crate::ingestion::types::{GeographicNameRecord, NormalizedTable, Region, SourceFeature};
use crate::ingestion::utils::{value_to_date, value_to_f64, value_to_id, value_to_text};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Flatten a region's features into the canonical table
///
/// Geometry and unknown properties are discarded. Features without a
/// usable id are dropped and counted; every other feature yields one
/// record, in input order.
pub fn normalize(features: &[SourceFeature], region: Region) -> NormalizedTable {
    let mut records = Vec::with_capacity(features.len());
    let mut dropped = 0;

    for (idx, feature) in features.iter().enumerate() {
        match normalize_feature(feature, region) {
            Some(record) => records.push(record),
            None => {
                dropped += 1;
                if dropped <= 10 {
                    // Only log first 10
                    warn!("Dropping feature {} of {}: no usable idNomebngb", idx, region);
                }
            }
        }
    }

    info!(
        "Normalized {} records for {} ({} dropped)",
        records.len(),
        region,
        dropped
    );

    NormalizedTable { records, dropped }
}

fn normalize_feature(feature: &SourceFeature, region: Region) -> Option<GeographicNameRecord> {
    let empty = Map::new();
    let props = feature
        .properties
        .as_ref()
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let id = props
        .get("idNomebngb")
        .and_then(value_to_id)
        .or_else(|| feature.id.as_ref().and_then(value_to_id))?;

    let text = |key: &str| props.get(key).and_then(value_to_text);
    let number = |key: &str| props.get(key).and_then(value_to_f64);
    let date = |key: &str| props.get(key).and_then(value_to_date);

    Some(GeographicNameRecord {
        id,
        nome_geografico: text("nomeGeografico"),
        geocodigo: text("geocodigo"),
        termo_generico: text("termoGenerico"),
        termo_especifico: text("termoEspecifico"),
        conectivo: text("conectivo"),
        categoria: text("categoria"),
        classe: text("classe"),
        escala_ocorrencia: text("escalaOcorrencia"),
        escala_origem_geometria: text("escalaOrigemGeometria"),
        status_validacao: text("statusValidacao"),
        nivel_validacao: text("nivelValidacao"),
        sustentacao_validacao: text("sustentacaoValidacao"),
        data_validacao: date("dataValidacao"),
        data_publicacao: date("dataPublicacao"),
        latitude: number("latitude"),
        longitude: number("longitude"),
        latitude_gms: text("latitudeGMS"),
        longitude_gms: text("longitudeGMS"),
        uf: region,
    })
}
