use crate::data::DataClient;
use crate::error::Error;
use crate::journey::{JourneyStop, TrainJourney};
use crate::journey_cache::{schedule_key, VSTP_JOURNEY_TTL, VSTP_TIPLOC_TTL};
use crate::manager::Manager;
use crate::subscriber::Subscriber;
use crate::times::{format_planned_time, null_string, parse_int_or_zero, parse_vstp_time};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{Postgres, Transaction};

use std::fmt;

#[derive(Debug)]
pub struct VstpError {
    what: String,
}

impl VstpError {
    fn new(what: impl Into<String>) -> Self {
        Self { what: what.into() }
    }
}

impl fmt::Display for VstpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error processing VSTP message: {}", self.what)
    }
}

// Wire shape of the VSTP feed. Field names follow the upstream contract;
// everything defaults because the feed routinely sends empty strings for
// fields it has no value for.
#[derive(Clone, Debug, Deserialize)]
pub struct VstpMessage {
    #[serde(rename = "VSTPCIFMsgV1")]
    pub vstp_cif_msg_v1: VstpCifMsgV1,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VstpCifMsgV1 {
    #[serde(rename = "schemaLocation", default)]
    pub schema_location: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub owner: String,
    #[serde(rename = "originMsgId", default)]
    pub origin_msg_id: String,
    pub schedule: VstpSchedule,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VstpSchedule {
    #[serde(default)]
    pub schedule_id: String,
    #[serde(default)]
    pub transaction_type: String,
    #[serde(default)]
    pub schedule_start_date: String,
    #[serde(default)]
    pub schedule_end_date: String,
    #[serde(default)]
    pub schedule_days_runs: String,
    #[serde(default)]
    pub applicable_timetable: String,
    #[serde(rename = "CIF_bank_holiday_running", default)]
    pub bank_holiday_running: String,
    #[serde(rename = "CIF_train_uid", default)]
    pub train_uid: String,
    #[serde(default)]
    pub train_status: String,
    #[serde(rename = "CIF_stp_indicator", default)]
    pub stp_indicator: String,
    #[serde(default)]
    pub schedule_segment: Vec<VstpScheduleSegment>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VstpScheduleSegment {
    #[serde(default)]
    pub signalling_id: String,
    #[serde(default)]
    pub uic_code: String,
    #[serde(default)]
    pub atoc_code: String,
    #[serde(rename = "CIF_train_category", default)]
    pub train_category: String,
    #[serde(rename = "CIF_headcode", default)]
    pub headcode: String,
    #[serde(rename = "CIF_course_indicator", default)]
    pub course_indicator: String,
    #[serde(rename = "CIF_train_service_code", default)]
    pub train_service_code: String,
    #[serde(rename = "CIF_business_sector", default)]
    pub business_sector: String,
    #[serde(rename = "CIF_power_type", default)]
    pub power_type: String,
    #[serde(rename = "CIF_timing_load", default)]
    pub timing_load: String,
    #[serde(rename = "CIF_speed", default)]
    pub speed: String,
    #[serde(rename = "CIF_operating_characteristics", default)]
    pub operating_characteristics: String,
    #[serde(rename = "CIF_train_class", default)]
    pub train_class: String,
    #[serde(rename = "CIF_sleepers", default)]
    pub sleepers: String,
    #[serde(rename = "CIF_reservations", default)]
    pub reservations: String,
    #[serde(rename = "CIF_connection_indicator", default)]
    pub connection_indicator: String,
    #[serde(rename = "CIF_catering_code", default)]
    pub catering_code: String,
    #[serde(rename = "CIF_service_branding", default)]
    pub service_branding: String,
    #[serde(rename = "CIF_traction_class", default)]
    pub traction_class: String,
    #[serde(default)]
    pub schedule_location: Vec<VstpScheduleLocation>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VstpScheduleLocation {
    #[serde(default)]
    pub scheduled_arrival_time: String,
    #[serde(default)]
    pub scheduled_departure_time: String,
    #[serde(default)]
    pub scheduled_pass_time: String,
    #[serde(default)]
    pub public_arrival_time: String,
    #[serde(default)]
    pub public_departure_time: String,
    #[serde(rename = "CIF_platform", default)]
    pub platform: String,
    #[serde(rename = "CIF_line", default)]
    pub line: String,
    #[serde(rename = "CIF_path", default)]
    pub path: String,
    #[serde(rename = "CIF_activity", default)]
    pub activity: String,
    #[serde(rename = "CIF_engineering_allowance", default)]
    pub engineering_allowance: String,
    #[serde(rename = "CIF_pathing_allowance", default)]
    pub pathing_allowance: String,
    #[serde(rename = "CIF_performance_allowance", default)]
    pub performance_allowance: String,
    #[serde(default)]
    pub location: VstpLocation,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VstpLocation {
    #[serde(default)]
    pub tiploc: VstpTiploc,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VstpTiploc {
    #[serde(default)]
    pub tiploc_id: String,
}

async fn insert_schedule_location(
    tx: &mut Transaction<'_, Postgres>,
    schedule_id: i32,
    location: &VstpScheduleLocation,
    order: i32,
) -> Result<(), Error> {
    sqlx::query(
        "
        INSERT INTO schedule_location (
            schedule_id, location_type, record_identity, tiploc_code, tiploc_instance,
            arrival, public_arrival, departure, public_departure, pass,
            platform, line, path, engineering_allowance, pathing_allowance,
            performance_allowance, location_order, activity
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
        )",
    )
    .bind(schedule_id)
    .bind("LO")
    .bind("LO")
    .bind(&location.location.tiploc.tiploc_id)
    .bind(None::<String>)
    .bind(parse_vstp_time(&location.scheduled_arrival_time))
    .bind(parse_vstp_time(&location.public_arrival_time))
    .bind(parse_vstp_time(&location.scheduled_departure_time))
    .bind(parse_vstp_time(&location.public_departure_time))
    .bind(parse_vstp_time(&location.scheduled_pass_time))
    .bind(null_string(&location.platform))
    .bind(null_string(&location.line))
    .bind(null_string(&location.path))
    .bind(null_string(&location.engineering_allowance))
    .bind(null_string(&location.pathing_allowance))
    .bind(null_string(&location.performance_allowance))
    .bind(order)
    .bind(null_string(&location.activity))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub struct VstpConsumer<S: Subscriber + Send> {
    subscriber: S,
    data: DataClient,
}

impl<S: Subscriber + Send> VstpConsumer<S> {
    pub fn new(subscriber: S, data: DataClient) -> Self {
        Self { subscriber, data }
    }

    // One transaction per message: a reader never sees a schedule without
    // its calling points.
    async fn insert_message(&self, msg: &VstpMessage) -> Result<(), Error> {
        let schedule = &msg.vstp_cif_msg_v1.schedule;

        let start_date = NaiveDate::parse_from_str(&schedule.schedule_start_date, "%Y-%m-%d")
            .map_err(|x| VstpError::new(format!("invalid start date: {}", x)))?;
        let end_date = NaiveDate::parse_from_str(&schedule.schedule_end_date, "%Y-%m-%d")
            .map_err(|x| VstpError::new(format!("invalid end date: {}", x)))?;

        let mut tx = self.data.pool.begin().await?;

        for segment in &schedule.schedule_segment {
            let (schedule_id,): (i32,) = sqlx::query_as(
                "
                INSERT INTO schedule (
                    train_uid, transaction_type, stp_indicator, bank_holiday_running,
                    applicable_timetable, atoc_code, schedule_days_runs, schedule_start_date,
                    schedule_end_date, train_status, signalling_id, train_category,
                    headcode, course_indicator, train_service_code, business_sector,
                    power_type, timing_load, speed, operating_characteristics,
                    train_class, sleepers, reservations, connection_indicator,
                    catering_code, service_branding, traction_class, uic_code,
                    origin_msg_id, schema_location
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30
                ) RETURNING id",
            )
            .bind(&schedule.train_uid)
            .bind(&schedule.transaction_type)
            .bind(&schedule.stp_indicator)
            .bind(null_string(&schedule.bank_holiday_running))
            .bind(null_string(&schedule.applicable_timetable))
            .bind(null_string(&segment.atoc_code))
            .bind(&schedule.schedule_days_runs)
            .bind(start_date)
            .bind(end_date)
            .bind(&schedule.train_status)
            .bind(&segment.signalling_id)
            .bind(&segment.train_category)
            .bind(&segment.headcode)
            .bind(parse_int_or_zero(&segment.course_indicator))
            .bind(&segment.train_service_code)
            .bind(null_string(&segment.business_sector))
            .bind(null_string(&segment.power_type))
            .bind(null_string(&segment.timing_load))
            .bind(null_string(&segment.speed))
            .bind(null_string(&segment.operating_characteristics))
            .bind(null_string(&segment.train_class))
            .bind(null_string(&segment.sleepers))
            .bind(null_string(&segment.reservations))
            .bind(null_string(&segment.connection_indicator))
            .bind(null_string(&segment.catering_code))
            .bind(&segment.service_branding)
            .bind(null_string(&segment.traction_class))
            .bind(null_string(&segment.uic_code))
            .bind(&msg.vstp_cif_msg_v1.origin_msg_id)
            .bind(&msg.vstp_cif_msg_v1.schema_location)
            .fetch_one(&mut *tx)
            .await?;

            for (i, location) in segment.schedule_location.iter().enumerate() {
                insert_schedule_location(&mut tx, schedule_id, location, (i + 1) as i32).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // Pre-warms the journey cache so the new working is queryable before the
    // next full timetable refresh. Failures here are logged, never fatal.
    async fn warm_journey(&self, msg: &VstpMessage) {
        let schedule = &msg.vstp_cif_msg_v1.schedule;
        let run_date = schedule.schedule_start_date.replace('-', "");
        let train_uid = schedule.train_uid.trim().to_string();

        let mut stops = vec![];
        for segment in &schedule.schedule_segment {
            for location in &segment.schedule_location {
                let tiploc_id = &location.location.tiploc.tiploc_id;
                let stanox = match self.data.stanox_by_tiploc(tiploc_id, VSTP_TIPLOC_TTL).await {
                    Ok(x) => x,
                    Err(_) => continue,
                };

                stops.push(JourneyStop {
                    stanox,
                    planned_arr: format_planned_time(&location.scheduled_arrival_time),
                    planned_dep: format_planned_time(&location.scheduled_departure_time),
                    ..Default::default()
                });
            }
        }

        let journey = TrainJourney {
            uid: train_uid.clone(),
            run_date: run_date.clone(),
            stops,
        };

        let encoded = match serde_json::to_string(&journey) {
            Ok(x) => x,
            Err(x) => {
                log::warn!("Failed to encode journey for {}: {}", train_uid, x);
                return;
            }
        };

        let key = schedule_key(&train_uid, &run_date);
        match self.data.cache.set(&key, &encoded, VSTP_JOURNEY_TTL).await {
            Ok(()) => log::info!("Wrote schedule to cache: {}", key),
            Err(x) => log::warn!("Failed to write schedule to cache for {}: {}", train_uid, x),
        }
    }

    async fn process(&self, msg: &VstpMessage) -> Result<(), Error> {
        self.insert_message(msg).await?;
        self.warm_journey(msg).await;
        Ok(())
    }
}

#[async_trait]
impl<S: Subscriber + Send + Sync> Manager for VstpConsumer<S> {
    async fn run(&mut self) -> Result<(), Error> {
        self.subscriber.subscribe().await?;
        log::info!("Processing VSTP schedule messages");

        loop {
            let frame = self.subscriber.receive().await?;

            let message: VstpMessage = match serde_json::from_slice(&frame) {
                Ok(x) => x,
                Err(x) => {
                    log::warn!("Bad VSTP JSON: {}", x);
                    continue;
                }
            };

            if let Err(x) = self.process(&message).await {
                log::error!("Error processing VSTP message: {}", x);
                continue;
            }

            log::info!(
                "Processed VSTP schedule: {}",
                message.vstp_cif_msg_v1.schedule.train_uid
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_feed_message() {
        let raw = r#"{
            "VSTPCIFMsgV1": {
                "schemaLocation": "http://example/schema",
                "originMsgId": "2025-03-01T00:00:00-00:00@vstp",
                "schedule": {
                    "transaction_type": "Create",
                    "schedule_start_date": "2025-03-01",
                    "schedule_end_date": "2025-03-01",
                    "schedule_days_runs": "0000010",
                    "CIF_train_uid": "Z12345",
                    "train_status": "1",
                    "CIF_stp_indicator": "N",
                    "schedule_segment": [{
                        "signalling_id": "1A23",
                        "atoc_code": "XX",
                        "CIF_train_category": "XX",
                        "schedule_location": [
                            {"scheduled_departure_time": "100000",
                             "location": {"tiploc": {"tiploc_id": "EDINBUR"}}},
                            {"scheduled_arrival_time": "101500",
                             "CIF_platform": "4",
                             "location": {"tiploc": {"tiploc_id": "HAYMRKT"}}}
                        ]
                    }]
                }
            }
        }"#;

        let msg: VstpMessage = serde_json::from_str(raw).unwrap();
        let schedule = &msg.vstp_cif_msg_v1.schedule;
        assert_eq!(schedule.train_uid, "Z12345");
        assert_eq!(schedule.schedule_segment.len(), 1);

        let segment = &schedule.schedule_segment[0];
        assert_eq!(segment.signalling_id, "1A23");
        assert_eq!(segment.schedule_location.len(), 2);
        assert_eq!(segment.schedule_location[1].platform, "4");
        assert_eq!(
            segment.schedule_location[0].location.tiploc.tiploc_id,
            "EDINBUR"
        );
    }

    #[test]
    fn run_date_strips_dashes() {
        assert_eq!("2025-03-01".replace('-', ""), "20250301");
    }

    #[test]
    fn warmed_planned_times_are_hh_mm() {
        assert_eq!(format_planned_time("100000"), "10:00");
        assert_eq!(format_planned_time("101500"), "10:15");
    }
}
