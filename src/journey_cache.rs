use crate::error::Error;

use redis::AsyncCommands;
use serde::Deserialize;

// TTLs are in seconds. Journeys and TIPLOC mappings written by the VSTP
// intake outlive the defaults.
pub const ACTIVATION_TTL: u64 = 48 * 3600;
pub const JOURNEY_TTL: u64 = 48 * 3600;
pub const VSTP_JOURNEY_TTL: u64 = 72 * 3600;
pub const TIPLOC_TTL: u64 = 24 * 3600;
pub const VSTP_TIPLOC_TTL: u64 = 7 * 24 * 3600;

pub fn activation_key(train_id: &str) -> String {
    format!("activation:{}", train_id)
}

pub fn schedule_key(train_uid: &str, run_date: &str) -> String {
    format!("schedule:{}:{}", train_uid, run_date)
}

pub fn tiploc_key(tiploc_code: &str) -> String {
    format!("tiploc:{}", tiploc_code)
}

#[derive(Clone, Deserialize)]
pub struct JourneyCacheConfig {
    addr: String,
}

#[derive(Clone)]
pub struct JourneyCache {
    conn: redis::aio::MultiplexedConnection,
}

impl JourneyCache {
    pub async fn connect(config: &JourneyCacheConfig) -> Result<Self, Error> {
        let client = redis::Client::open(format!("redis://{}/", config.addr))?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        assert_eq!(activation_key("1A23"), "activation:1A23");
        assert_eq!(schedule_key("Z12345", "20250301"), "schedule:Z12345:20250301");
        assert_eq!(tiploc_key("EDINBUR"), "tiploc:EDINBUR");
    }
}
