mod data;
mod error;
mod fetcher;
mod journey;
mod journey_cache;
mod manager;
mod nr_fetcher;
mod nr_subscriber;
mod reference_fetcher;
mod service_query;
mod stanox;
mod subscriber;
mod timetable_importer;
mod times;
mod trust_consumer;
mod vstp_consumer;
mod webui;

use config_file::FromConfigFile;
use serde::Deserialize;
use tokio::signal::unix::{signal, SignalKind};

use crate::data::DataClient;
use crate::fetcher::Fetcher;
use crate::manager::Manager;
use crate::nr_subscriber::NrSubscriber;

#[derive(Deserialize)]
struct Config {
    database_config: data::DatabaseConfig,
    cache_config: journey_cache::JourneyCacheConfig,
    nr_feeds_config: nr_subscriber::NrSubscriberConfig,
    // present = load the full timetable at start-up
    nr_fetcher_config: Option<nr_fetcher::NrFetcherConfig>,
    reference_config: Option<reference_fetcher::ReferenceFetcherConfig>,
}

#[tokio::main]
async fn main() -> Result<(), error::Error> {
    env_logger::init();

    let config = Config::from_config_file("./config.toml")?;

    let pool = data::connect(&config.database_config).await?;
    let cache = journey_cache::JourneyCache::connect(&config.cache_config).await?;
    let data = DataClient::new(pool, cache);

    if let Some(fetcher_config) = config.nr_fetcher_config {
        let fetcher = nr_fetcher::NrFetcher::new(fetcher_config);
        let importer = timetable_importer::TimetableImporter::new(data.clone());
        let reader = fetcher.fetch().await?;
        importer.import(reader).await?;
    }

    let mut trust_consumer = trust_consumer::TrustConsumer::new(
        NrSubscriber::new(config.nr_feeds_config.clone(), "TRAIN_MVT_ALL_TOC"),
        data.clone(),
    );
    let mut vstp_consumer = vstp_consumer::VstpConsumer::new(
        NrSubscriber::new(config.nr_feeds_config.clone(), "VSTP_ALL"),
        data.clone(),
    );

    let trust_task = tokio::spawn(async move { trust_consumer.run().await });
    let vstp_task = tokio::spawn(async move { vstp_consumer.run().await });

    let reference_task = config.reference_config.map(|reference_config| {
        let mut reference_fetcher =
            reference_fetcher::ReferenceFetcher::new(reference_config, data.clone());
        tokio::spawn(async move { reference_fetcher.run().await })
    });

    let web_task = tokio::spawn(webui::rocket(data.clone()));

    let mut sigterm = signal(SignalKind::terminate())?;

    // The consumer and web tasks only return on a fatal error; a signal wins
    // the race, the in-flight message finishes with its task, and the
    // process exits.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received SIGINT, shutting down");
            Ok(())
        }
        _ = sigterm.recv() => {
            log::info!("Received SIGTERM, shutting down");
            Ok(())
        }
        result = trust_task => result?,
        result = vstp_task => result?,
        result = async {
            match reference_task {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => result?,
        result = web_task => result?,
    }
}
