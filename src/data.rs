use crate::error::Error;
use crate::journey_cache::JourneyCache;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use std::collections::HashMap;

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    username: String,
    password: String,
    hostname: String,
    port: u16,
    database: String,
}

impl DatabaseConfig {
    fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.hostname, self.port, self.database
        )
    }
}

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, Error> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.postgres_url())
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// Shared handle the query engine and web layer work through.
#[derive(Clone)]
pub struct DataClient {
    pub pool: PgPool,
    pub cache: JourneyCache,
}

impl DataClient {
    pub fn new(pool: PgPool, cache: JourneyCache) -> Self {
        Self { pool, cache }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operator {
    pub code: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Location {
    pub stanox: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub tiploc_codes: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct LocationRow {
    stanox: String,
    crs_code: Option<String>,
    description: Option<String>,
}

impl DataClient {
    // One entry per STANOX; several TIPLOCs share one, so the first
    // non-empty CRS and description encountered win.
    pub async fn all_locations(&self) -> Result<Vec<Location>, Error> {
        let rows: Vec<LocationRow> = sqlx::query_as(
            "
            SELECT DISTINCT stanox, crs_code, description
            FROM tiploc
            WHERE stanox IS NOT NULL AND stanox != ''
            ORDER BY description, crs_code
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_stanox: HashMap<String, Location> = HashMap::new();
        for row in rows {
            let location = by_stanox.entry(row.stanox.clone()).or_insert_with(|| Location {
                stanox: row.stanox,
                ..Default::default()
            });

            if location.crs.is_none() {
                if let Some(crs) = row.crs_code.filter(|x| !x.is_empty()) {
                    location.crs = Some(crs);
                }
            }
            if location.full_name.is_none() {
                if let Some(name) = row.description.filter(|x| !x.is_empty()) {
                    location.full_name = Some(name);
                }
            }
        }

        Ok(by_stanox.into_values().collect())
    }

    pub async fn all_operators(&self) -> Result<Vec<Operator>, Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT code, name FROM reference_toc ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(code, name)| Operator { code, name })
            .collect())
    }
}
