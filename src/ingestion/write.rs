//! Write functions - load persisted tables into PostgreSQL with insert-if-absent semantics

use crate::ingestion::config::DatabaseConfig;
use crate::ingestion::error::Result;
use crate::ingestion::types::{GeographicNameRecord, LoadStats, Region};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Connection, Row};
use tracing::{debug, info, warn};

pub const TABLE_NAME: &str = "nome_geografico";

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS nome_geografico (
        id INTEGER PRIMARY KEY,
        nome_geografico TEXT,
        geocodigo TEXT,
        termo_generico TEXT,
        termo_especifico TEXT,
        conectivo TEXT,
        categoria TEXT,
        classe TEXT,
        escala_ocorrencia TEXT,
        escala_origem_geometria TEXT,
        status_validacao TEXT,
        nivel_validacao TEXT,
        sustentacao_validacao TEXT,
        data_validacao DATE,
        data_publicacao DATE,
        latitude DOUBLE PRECISION,
        longitude DOUBLE PRECISION,
        latitude_gms TEXT,
        longitude_gms TEXT,
        uf TEXT
    )
"#;

const INSERT_SQL: &str = r#"
    INSERT INTO nome_geografico (
        id, nome_geografico, geocodigo, termo_generico, termo_especifico,
        conectivo, categoria, classe, escala_ocorrencia, escala_origem_geometria,
        status_validacao, nivel_validacao, sustentacao_validacao,
        data_validacao, data_publicacao,
        latitude, longitude, latitude_gms, longitude_gms, uf
    ) VALUES (
        $1, $2, $3, $4, $5,
        $6, $7, $8, $9, $10,
        $11, $12, $13,
        $14, $15,
        $16, $17, $18, $19, $20
    )
    ON CONFLICT (id) DO NOTHING
"#;

const SELECT_BY_ID_SQL: &str = r#"
    SELECT
        id, nome_geografico, geocodigo, termo_generico, termo_especifico,
        conectivo, categoria, classe, escala_ocorrencia, escala_origem_geometria,
        status_validacao, nivel_validacao, sustentacao_validacao,
        data_validacao, data_publicacao,
        latitude, longitude, latitude_gms, longitude_gms, uf
    FROM nome_geografico
    WHERE id = $1
"#;

/// Single connection to the relational store, held for the whole load pass
pub struct Loader {
    conn: PgConnection,
}

impl Loader {
    /// Open the connection; callers treat failure as fatal
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = config.connect_options()?;
        info!("Connecting to PostgreSQL with {:?}", config);

        let conn = PgConnection::connect_with(&options).await?;
        info!("Database connected");

        Ok(Self { conn })
    }

    /// Create the target table when it does not exist yet
    pub async fn ensure_schema(&mut self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&mut self.conn).await?;
        debug!("Ensured table {}", TABLE_NAME);
        Ok(())
    }

    /// Drop every previously loaded row and recreate the table
    pub async fn reset_schema(&mut self) -> Result<()> {
        warn!("Dropping table {} and all loaded rows", TABLE_NAME);
        sqlx::query("DROP TABLE IF EXISTS nome_geografico")
            .execute(&mut self.conn)
            .await?;
        self.ensure_schema().await
    }

    /// Insert a region's rows, skipping ids that are already present
    ///
    /// Each row runs inside its own savepoint so a rejected row is rolled
    /// back alone and the rest of the region still commits. Only faults of
    /// the connection itself are returned as errors.
    pub async fn load_region(
        &mut self,
        region: Region,
        records: &[GeographicNameRecord],
    ) -> Result<LoadStats> {
        info!("Loading {} records for {}", records.len(), region);

        let mut stats = LoadStats::default();
        let mut tx = self.conn.begin().await?;

        for record in records {
            let mut savepoint = tx.begin().await?;

            match insert_record(&mut savepoint, record).await {
                Ok(true) => {
                    savepoint.commit().await?;
                    stats.inserted += 1;
                }
                Ok(false) => {
                    savepoint.commit().await?;
                    stats.skipped += 1;
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    warn!("Failed to insert id {} ({}): {}", record.id, region, e);
                    stats.errors += 1;
                }
            }
        }

        tx.commit().await?;
        info!("Load complete for {}: {}", region, stats);

        Ok(stats)
    }

    pub async fn count_rows(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM nome_geografico")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(count)
    }

    /// Look up one loaded record by id
    pub async fn find(&mut self, id: i64) -> Result<Option<GeographicNameRecord>> {
        let row = sqlx::query(SELECT_BY_ID_SQL)
            .bind(id)
            .fetch_optional(&mut self.conn)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        info!("Database connection closed");
        Ok(())
    }
}

/// Insert one row; returns false when the id already existed
async fn insert_record(conn: &mut PgConnection, record: &GeographicNameRecord) -> sqlx::Result<bool> {
    let result = sqlx::query(INSERT_SQL)
        .bind(record.id)
        .bind(record.nome_geografico.as_deref())
        .bind(record.geocodigo.as_deref())
        .bind(record.termo_generico.as_deref())
        .bind(record.termo_especifico.as_deref())
        .bind(record.conectivo.as_deref())
        .bind(record.categoria.as_deref())
        .bind(record.classe.as_deref())
        .bind(record.escala_ocorrencia.as_deref())
        .bind(record.escala_origem_geometria.as_deref())
        .bind(record.status_validacao.as_deref())
        .bind(record.nivel_validacao.as_deref())
        .bind(record.sustentacao_validacao.as_deref())
        .bind(record.data_validacao)
        .bind(record.data_publicacao)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.latitude_gms.as_deref())
        .bind(record.longitude_gms.as_deref())
        .bind(record.uf.as_str())
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn record_from_row(row: &PgRow) -> Result<GeographicNameRecord> {
    let uf: Option<String> = row.try_get("uf")?;
    let uf = uf.unwrap_or_default().parse::<Region>()?;

    Ok(GeographicNameRecord {
        id: i64::from(row.try_get::<i32, _>("id")?),
        nome_geografico: row.try_get("nome_geografico")?,
        geocodigo: row.try_get("geocodigo")?,
        termo_generico: row.try_get("termo_generico")?,
        termo_especifico: row.try_get("termo_especifico")?,
        conectivo: row.try_get("conectivo")?,
        categoria: row.try_get("categoria")?,
        classe: row.try_get("classe")?,
        escala_ocorrencia: row.try_get("escala_ocorrencia")?,
        escala_origem_geometria: row.try_get("escala_origem_geometria")?,
        status_validacao: row.try_get("status_validacao")?,
        nivel_validacao: row.try_get("nivel_validacao")?,
        sustentacao_validacao: row.try_get("sustentacao_validacao")?,
        data_validacao: row.try_get("data_validacao")?,
        data_publicacao: row.try_get("data_publicacao")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        latitude_gms: row.try_get("latitude_gms")?,
        longitude_gms: row.try_get("longitude_gms")?,
        uf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::config::Config;
    use chrono::NaiveDate;

    // These need a running PostgreSQL reachable through DATABASE_URL (or the
    // DB_* variables). Each test owns a disjoint id range so they can share
    // the table.
    async fn test_loader(first_id: i64, last_id: i64) -> Loader {
        dotenvy::dotenv().ok();
        let config = Config::from_env().unwrap();
        let mut loader = Loader::connect(&config.database).await.unwrap();
        loader.ensure_schema().await.unwrap();

        sqlx::query("DELETE FROM nome_geografico WHERE id BETWEEN $1 AND $2")
            .bind(first_id)
            .bind(last_id)
            .execute(&mut loader.conn)
            .await
            .unwrap();

        loader
    }

    async fn count_between(loader: &mut Loader, first_id: i64, last_id: i64) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM nome_geografico WHERE id BETWEEN $1 AND $2",
        )
        .bind(first_id)
        .bind(last_id)
        .fetch_one(&mut loader.conn)
        .await
        .unwrap()
    }

    fn records(ids: &[i64], region: Region) -> Vec<GeographicNameRecord> {
        ids.iter()
            .map(|&id| {
                let mut record = GeographicNameRecord::new(id, region);
                record.nome_geografico = Some(format!("Nome {}", id));
                record.latitude = Some(-10.5);
                record
            })
            .collect()
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL
    async fn test_load_region_is_idempotent() {
        let mut loader = test_loader(900_100, 900_199).await;
        let batch = records(&[900_101, 900_102, 900_103], Region::MG);

        let first = loader.load_region(Region::MG, &batch).await.unwrap();
        let after_first = count_between(&mut loader, 900_100, 900_199).await;
        let second = loader.load_region(Region::MG, &batch).await.unwrap();
        let after_second = count_between(&mut loader, 900_100, 900_199).await;

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(after_first, 3);
        assert_eq!(after_second, 3);
        assert!(loader.count_rows().await.unwrap() >= 3);
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL
    async fn test_failing_row_is_isolated() {
        let mut loader = test_loader(900_200, 900_299).await;

        // Row 3 does not fit the INTEGER primary key
        let batch = records(&[900_201, 900_202, 3_000_000_000, 900_204, 900_205], Region::BA);

        let stats = loader.load_region(Region::BA, &batch).await.unwrap();

        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.errors, 1);
        assert_eq!(count_between(&mut loader, 900_200, 900_299).await, 4);
        for id in [900_201, 900_202, 900_204, 900_205] {
            assert!(loader.find(id).await.unwrap().is_some(), "id {} missing", id);
        }
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL
    async fn test_loaded_values_round_trip() {
        let mut loader = test_loader(900_300, 900_399).await;

        let mut record = GeographicNameRecord::new(900_301, Region::AC);
        record.nome_geografico = Some("Rio Branco".to_string());
        record.data_validacao = NaiveDate::from_ymd_opt(2020, 3, 1);
        record.latitude = Some(-9.97);
        record.longitude_gms = Some("67°48'36\" W".to_string());

        loader
            .load_region(Region::AC, std::slice::from_ref(&record))
            .await
            .unwrap();

        assert_eq!(loader.find(900_301).await.unwrap(), Some(record));
        assert_eq!(loader.find(900_399).await.unwrap(), None);
    }
}
