use crate::error::Error;
use crate::subscriber::Subscriber;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;

use tokio_stomp::client;
use tokio_stomp::client::ClientTransport;
use tokio_stomp::FromServer;
use tokio_stomp::ToServer;

use futures::stream::SplitSink;
use futures::stream::SplitStream;
use futures::SinkExt;
use futures::StreamExt;

use tokio::time::Duration;

use std::fmt;

// One STOMP subscription to a Network Rail topic (TRAIN_MVT_ALL_TOC,
// VSTP_ALL, ...). Each consumer owns its own connection so the broker
// delivers its feed in order on a single channel.
pub struct NrSubscriber {
    config: NrSubscriberConfig,
    topic: String,
    stream: Option<SplitStream<ClientTransport>>,
    keepalive: Option<JoinHandle<Result<(), Error>>>,
}

#[derive(Clone, Deserialize)]
pub struct NrSubscriberConfig {
    endpoint: String,
    username: String,
    password: String,
}

#[derive(Debug)]
pub struct NrStompError {
    what: String,
}

impl fmt::Display for NrStompError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error reading from NR STOMP stream: {}", self.what)
    }
}

impl NrSubscriber {
    pub fn new(config: NrSubscriberConfig, topic: &str) -> Self {
        Self {
            config,
            topic: topic.to_string(),
            stream: None,
            keepalive: None,
        }
    }

    fn error(what: &str) -> Error {
        Error::NrStompError(NrStompError {
            what: what.to_string(),
        })
    }
}

async fn keep_alive(
    mut sink: SplitSink<ClientTransport, tokio_stomp::Message<ToServer>>,
) -> Result<(), Error> {
    // horrible hacky workaround for tokio_stomp's lack of heartbeat support.
    // An aborted no-op transaction every 30s keeps the broker from closing
    // the connection.
    loop {
        tokio::time::sleep(Duration::from_secs(15)).await;
        sink.send(
            ToServer::Begin {
                transaction: "hb".to_string(),
            }
            .into(),
        )
        .await?;
        tokio::time::sleep(Duration::from_secs(15)).await;
        sink.send(
            ToServer::Abort {
                transaction: "hb".to_string(),
            }
            .into(),
        )
        .await?;
    }
}

#[async_trait]
impl Subscriber for NrSubscriber {
    async fn subscribe(&mut self) -> Result<(), Error> {
        log::info!("Subscribing to {} from Network Rail", self.topic);
        let (mut sink, stream) = client::connect(
            &self.config.endpoint,
            "/".to_string(),
            Some(self.config.username.clone()),
            Some(self.config.password.clone()),
        )
        .await?
        .split();
        self.stream = Some(stream);

        sink.send(client::subscribe(format!("/topic/{}", self.topic), "1"))
            .await?;

        self.keepalive = Some(tokio::spawn(async move { keep_alive(sink).await }));

        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Error> {
        let msg = match &mut self.stream {
            Some(x) => x.next().await.transpose()?,
            None => return Err(Self::error("Subscribe not yet called")),
        };
        let msg = match msg {
            Some(x) => x,
            None => return Err(Self::error("Received empty message")),
        };

        match msg.content {
            FromServer::Message { body, .. } => match body {
                Some(x) => Ok(x),
                None => Err(Self::error("No body")),
            },
            FromServer::Receipt { .. } => Err(Self::error("Received Receipt")),
            FromServer::Error { message, .. } => Err(Self::error(
                &message.unwrap_or_else(|| "unspecified broker error".to_string()),
            )),
            _ => Err(Self::error("Received unknown message")),
        }
    }
}
