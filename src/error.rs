use crate::journey::JourneyError;
use crate::nr_subscriber::NrStompError;
use crate::vstp_consumer::VstpError;
use crate::webui::WebUiError;
use anyhow;
use config_file::ConfigFileError;
use reqwest;
use tokio::task::JoinError;

use std::fmt;

#[derive(Debug)]
pub enum Error {
    ConfigFileError(ConfigFileError),
    HttpRequestError(reqwest::Error),
    IoError(std::io::Error),
    SqlxError(sqlx::Error),
    MigrateError(sqlx::migrate::MigrateError),
    RedisError(redis::RedisError),
    SerdeJsonError(serde_json::Error),
    AnyhowError(anyhow::Error),
    RocketError(rocket::Error),
    JoinError(JoinError),
    NrStompError(NrStompError),
    VstpError(VstpError),
    JourneyError(JourneyError),
    WebUiError(WebUiError),
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConfigFileError(x) => write!(f, "GbRailLive error: {}", x),
            Error::HttpRequestError(x) => write!(f, "GbRailLive error: {}", x),
            Error::IoError(x) => write!(f, "GbRailLive error: {}", x),
            Error::SqlxError(x) => write!(f, "GbRailLive error: {}", x),
            Error::MigrateError(x) => write!(f, "GbRailLive error: {}", x),
            Error::RedisError(x) => write!(f, "GbRailLive error: {}", x),
            Error::SerdeJsonError(x) => write!(f, "GbRailLive error: {}", x),
            Error::AnyhowError(x) => write!(f, "GbRailLive error: {}", x),
            Error::RocketError(x) => write!(f, "GbRailLive error: {}", x.pretty_print()),
            Error::JoinError(x) => write!(f, "GbRailLive error: {}", x),
            Error::NrStompError(x) => write!(f, "GbRailLive error: {}", x),
            Error::VstpError(x) => write!(f, "GbRailLive error: {}", x),
            Error::JourneyError(x) => write!(f, "GbRailLive error: {}", x),
            Error::WebUiError(x) => write!(f, "GbRailLive error: {}", x),
            Error::NotFound => write!(f, "GbRailLive error: not found"),
        }
    }
}

impl Error {
    // sqlx reports an empty result as an error; queries that mean "no such
    // row" normalise to NotFound so the web layer can map it to a 404.
    pub fn from_query(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Error::NotFound,
            x => Error::SqlxError(x),
        }
    }
}

impl From<ConfigFileError> for Error {
    fn from(error: ConfigFileError) -> Self {
        Error::ConfigFileError(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::HttpRequestError(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error)
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::SqlxError(error)
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Error::MigrateError(error)
    }
}

impl From<redis::RedisError> for Error {
    fn from(error: redis::RedisError) -> Self {
        Error::RedisError(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerdeJsonError(error)
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::AnyhowError(error)
    }
}

impl From<rocket::Error> for Error {
    fn from(error: rocket::Error) -> Self {
        Error::RocketError(error)
    }
}

impl From<JoinError> for Error {
    fn from(error: JoinError) -> Self {
        Error::JoinError(error)
    }
}

impl From<NrStompError> for Error {
    fn from(error: NrStompError) -> Self {
        Error::NrStompError(error)
    }
}

impl From<VstpError> for Error {
    fn from(error: VstpError) -> Self {
        Error::VstpError(error)
    }
}

impl From<JourneyError> for Error {
    fn from(error: JourneyError) -> Self {
        Error::JourneyError(error)
    }
}

impl From<WebUiError> for Error {
    fn from(error: WebUiError) -> Self {
        Error::WebUiError(error)
    }
}
