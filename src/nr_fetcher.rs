use crate::error::Error;
use crate::fetcher::Fetcher;

use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use reqwest::Client;
use serde::Deserialize;

use tokio::io::AsyncBufRead;
use tokio::io::BufReader;
use tokio_util::compat::FuturesAsyncReadCompatExt;

// Downloads the nightly full timetable extract: one gzipped JSON document
// per line, decompressed on the fly so the importer never holds the whole
// file in memory.
pub struct NrFetcher {
    config: NrFetcherConfig,
}

#[derive(Clone, Deserialize)]
pub struct NrFetcherConfig {
    url: String,
    username: String,
    password: String,
}

impl NrFetcher {
    pub fn new(config: NrFetcherConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Fetcher for NrFetcher {
    async fn fetch(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>, Error> {
        log::info!("Fetching timetable data from Network Rail");
        let client = Client::new();
        let response = client
            .get(&self.config.url)
            .basic_auth(self.config.username.clone(), Some(self.config.password.clone()))
            .send()
            .await?
            .error_for_status()?;
        let reader = response
            .bytes_stream()
            .map_err(|e| futures::io::Error::new(futures::io::ErrorKind::Other, e))
            .into_async_read()
            .compat();
        let gz = GzipDecoder::new(BufReader::new(reader));
        Ok(Box::new(BufReader::new(gz)))
    }
}
