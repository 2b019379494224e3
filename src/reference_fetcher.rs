use crate::data::DataClient;
use crate::error::Error;
use crate::manager::Manager;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Duration;

#[derive(Clone, Deserialize)]
pub struct ReferenceFetcherConfig {
    base_url: String,
    api_key: String,
    refresh_hours: u64,
}

#[derive(Deserialize)]
struct StationReference {
    #[serde(rename = "StationList", default)]
    station_list: Vec<StationEntry>,
}

#[derive(Deserialize)]
struct StationEntry {
    #[serde(default)]
    crs: String,
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Deserialize)]
struct TocReference {
    #[serde(rename = "TOCList", default)]
    toc_list: Vec<TocEntry>,
}

#[derive(Deserialize)]
struct TocEntry {
    #[serde(default)]
    toc: String,
    #[serde(rename = "Value", default)]
    value: String,
}

// Periodic truncate-and-reload of the station and operator reference
// tables. Each reload is one transaction so lookups never observe a
// half-replaced table.
pub struct ReferenceFetcher {
    config: ReferenceFetcherConfig,
    data: DataClient,
}

impl ReferenceFetcher {
    pub fn new(config: ReferenceFetcherConfig, data: DataClient) -> Self {
        Self { config, data }
    }

    async fn reference_request<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
    ) -> Result<T, Error> {
        let client = Client::new();
        let response = client
            .get(format!("{}{}", self.config.base_url, endpoint))
            .header("x-apikey", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn update_stations(&self) -> Result<(), Error> {
        let reference: StationReference = self
            .reference_request("/LDBSVWS/api/ref/20211101/GetStationList/1")
            .await?;

        let mut tx = self.data.pool.begin().await?;

        sqlx::query("TRUNCATE TABLE reference_station")
            .execute(&mut *tx)
            .await?;

        for station in &reference.station_list {
            sqlx::query("INSERT INTO reference_station (crs, name) VALUES ($1, $2)")
                .bind(&station.crs)
                .bind(&station.value)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE reference_fetch SET last_fetched = NOW() WHERE key = 'stations'")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        log::info!("Refreshed {} reference stations", reference.station_list.len());
        Ok(())
    }

    async fn update_tocs(&self) -> Result<(), Error> {
        let reference: TocReference = self
            .reference_request("/LDBSVWS/api/ref/20211101/GetTOCList/1")
            .await?;

        let mut tx = self.data.pool.begin().await?;

        sqlx::query("TRUNCATE TABLE reference_toc")
            .execute(&mut *tx)
            .await?;

        for toc in &reference.toc_list {
            sqlx::query("INSERT INTO reference_toc (code, name) VALUES ($1, $2)")
                .bind(&toc.toc)
                .bind(&toc.value)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE reference_fetch SET last_fetched = NOW() WHERE key = 'toc'")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        log::info!("Refreshed {} reference operators", reference.toc_list.len());
        Ok(())
    }
}

#[async_trait]
impl Manager for ReferenceFetcher {
    async fn run(&mut self) -> Result<(), Error> {
        loop {
            if let Err(x) = self.update_stations().await {
                log::error!("Station reference refresh failed: {}", x);
            }
            if let Err(x) = self.update_tocs().await {
                log::error!("Operator reference refresh failed: {}", x);
            }

            tokio::time::sleep(Duration::from_secs(self.config.refresh_hours * 3600)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_station_list() {
        let raw = r#"{"version": "1", "StationList": [
            {"crs": "EDB", "Value": "Edinburgh"},
            {"crs": "GLQ", "Value": "Glasgow Queen Street"}
        ]}"#;
        let parsed: StationReference = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.station_list.len(), 2);
        assert_eq!(parsed.station_list[0].crs, "EDB");
    }

    #[test]
    fn decodes_toc_list() {
        let raw = r#"{"version": "1", "TOCList": [{"toc": "SR", "Value": "ScotRail"}]}"#;
        let parsed: TocReference = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.toc_list[0].toc, "SR");
        assert_eq!(parsed.toc_list[0].value, "ScotRail");
    }
}
