use crate::data::DataClient;
use crate::error::Error;
use crate::journey::{load_train_journey, merge_trust_event};
use crate::journey_cache::{activation_key, schedule_key, ACTIVATION_TTL, JOURNEY_TTL};
use crate::manager::Manager;
use crate::subscriber::Subscriber;
use crate::times::format_run_date;

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;

// TRUST message types are discriminated on the header's msg_type tag;
// anything this build does not correlate decodes to a known-but-ignored
// variant rather than failing the batch.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub enum MsgType {
    #[serde(rename = "0001")]
    TrainActivation,
    #[serde(rename = "0002")]
    TrainCancellation,
    #[serde(rename = "0003")]
    TrainMovement,
    #[serde(rename = "0004")]
    UnidentifiedTrain,
    #[serde(rename = "0005")]
    TrainReinstatement,
    #[serde(rename = "0006")]
    ChangeOfOrigin,
    #[serde(rename = "0007")]
    ChangeOfIdentity,
    #[serde(rename = "0008")]
    ChangeOfLocation,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrustMessage {
    pub header: TrustHeader,
    pub body: TrustBody,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrustHeader {
    pub msg_type: MsgType,
    #[serde(default)]
    pub msg_queue_timestamp: String,
    #[serde(default)]
    pub source_system_id: String,
    #[serde(default)]
    pub original_data_source: String,
}

// The feed frequently sends bodies with fields missing or empty; everything
// defaults so one sparse movement does not reject the whole frame.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TrustBody {
    #[serde(default)]
    pub train_id: String,
    #[serde(default)]
    pub train_uid: String,
    #[serde(default)]
    pub actual_timestamp: String,
    #[serde(default)]
    pub loc_stanox: String,
    #[serde(default)]
    pub gbtt_timestamp: String,
    #[serde(default)]
    pub planned_timestamp: String,
    #[serde(default)]
    pub planned_event_type: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub toc_id: String,
    #[serde(default)]
    pub variation_status: String,
    #[serde(default)]
    pub train_terminated: String,
}

pub struct TrustConsumer<S: Subscriber + Send> {
    subscriber: S,
    data: DataClient,
}

impl<S: Subscriber + Send> TrustConsumer<S> {
    pub fn new(subscriber: S, data: DataClient) -> Self {
        Self { subscriber, data }
    }

    async fn process_activation(&self, body: &TrustBody) -> Result<(), Error> {
        let train_id = body.train_id.trim();
        let train_uid = body.train_uid.trim();

        self.data
            .cache
            .set(&activation_key(train_id), train_uid, ACTIVATION_TTL)
            .await?;

        log::info!("Stored activation: {} -> {}", train_id, train_uid);
        Ok(())
    }

    async fn process_movement(&self, body: &TrustBody) -> Result<(), Error> {
        let run_date = format_run_date(Local::now().date_naive());
        let train_id = body.train_id.trim();

        // Two-step identity resolution: the daily TRAIN_ID binds to the
        // stable TRAIN_UID at activation time.
        let train_uid = match self.data.cache.get(&activation_key(train_id)).await {
            Ok(Some(x)) => x.trim().to_string(),
            _ => {
                log::info!("No activation found for train_id {}", train_id);
                return Ok(());
            }
        };

        let mut journey =
            match load_train_journey(&self.data.pool, &self.data.cache, &train_uid, &run_date)
                .await
            {
                Ok(x) => x,
                Err(_) => return Ok(()),
            };

        let merged = merge_trust_event(
            &mut journey,
            &body.loc_stanox,
            &body.event_type,
            &body.actual_timestamp,
        );
        if !merged {
            let known: Vec<&str> = journey.stops.iter().map(|s| s.stanox.as_str()).collect();
            log::info!(
                "No stanox match for {} (looking for {}, schedule has: {:?})",
                train_uid,
                body.loc_stanox,
                known
            );
            return Ok(());
        }

        let encoded = serde_json::to_string(&journey)?;
        self.data
            .cache
            .set(&schedule_key(&train_uid, &run_date), &encoded, JOURNEY_TTL)
            .await?;

        log::info!(
            "Merged TRUST into schedule: {} ({}) {} @ {}",
            train_uid,
            train_id,
            body.event_type,
            body.loc_stanox
        );

        Ok(())
    }

    async fn process(&self, message: &TrustMessage) -> Result<(), Error> {
        match message.header.msg_type {
            MsgType::TrainActivation => self.process_activation(&message.body).await,
            MsgType::TrainMovement => self.process_movement(&message.body).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S: Subscriber + Send + Sync> Manager for TrustConsumer<S> {
    async fn run(&mut self) -> Result<(), Error> {
        self.subscriber.subscribe().await?;
        log::info!("Tracking train positions via TRUST feed");

        loop {
            let frame = self.subscriber.receive().await?;

            // one frame carries a batch of messages
            let messages: Vec<TrustMessage> = match serde_json::from_slice(&frame) {
                Ok(x) => x,
                Err(x) => {
                    log::warn!("Bad TRUST JSON: {}", x);
                    continue;
                }
            };

            for message in &messages {
                if let Err(x) = self.process(message).await {
                    log::error!(
                        "Error processing TRUST event for train {}: {}",
                        message.body.train_id,
                        x
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_activation_and_movement_batch() {
        let frame = r#"[
            {"header": {"msg_type": "0001"},
             "body": {"train_id": "1A23", "train_uid": " Z12345 "}},
            {"header": {"msg_type": "0003"},
             "body": {"train_id": "1A23", "loc_stanox": "87201",
                      "event_type": "DEPARTURE",
                      "actual_timestamp": "1740825600000"}}
        ]"#;

        let messages: Vec<TrustMessage> = serde_json::from_slice(frame.as_bytes()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].header.msg_type, MsgType::TrainActivation);
        assert_eq!(messages[0].body.train_uid, " Z12345 ");
        assert_eq!(messages[1].header.msg_type, MsgType::TrainMovement);
        assert_eq!(messages[1].body.loc_stanox, "87201");
    }

    #[test]
    fn unknown_msg_type_decodes_to_ignored_variant() {
        let frame = r#"[{"header": {"msg_type": "0042"}, "body": {}}]"#;
        let messages: Vec<TrustMessage> = serde_json::from_slice(frame.as_bytes()).unwrap();
        assert_eq!(messages[0].header.msg_type, MsgType::Unknown);
    }

    #[test]
    fn sparse_bodies_default_to_empty() {
        let frame = r#"[{"header": {"msg_type": "0003"}, "body": {"train_id": "1A23"}}]"#;
        let messages: Vec<TrustMessage> = serde_json::from_slice(frame.as_bytes()).unwrap();
        assert_eq!(messages[0].body.loc_stanox, "");
        assert_eq!(messages[0].body.event_type, "");
    }
}
