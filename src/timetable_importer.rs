use crate::data::DataClient;
use crate::error::Error;
use crate::times::null_string;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

// Record shapes of the nightly timetable extract, one JSON document per
// line. Every line carries exactly one of these members.
#[derive(Clone, Debug, Deserialize)]
pub struct TimetableEntry {
    #[serde(rename = "JsonTimetableV1")]
    pub json_timetable_v1: Option<serde_json::Value>,
    #[serde(rename = "TiplocV1")]
    pub tiploc_v1: Option<TiplocV1>,
    #[serde(rename = "JsonAssociationV1")]
    pub json_association_v1: Option<JsonAssociationV1>,
    #[serde(rename = "JsonScheduleV1")]
    pub json_schedule_v1: Option<JsonScheduleV1>,
    #[serde(rename = "EOFMessage")]
    pub eof: Option<EofMessage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EofMessage {
    #[serde(rename = "EOF", default)]
    pub eof: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TiplocV1 {
    #[serde(default)]
    pub transaction_type: String,
    pub tiploc_code: String,
    #[serde(default)]
    pub nalco: String,
    pub stanox: Option<String>,
    pub crs_code: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tps_description: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonAssociationV1 {
    #[serde(default)]
    pub transaction_type: String,
    pub main_train_uid: String,
    pub assoc_train_uid: String,
    pub assoc_start_date: String,
    pub assoc_end_date: String,
    #[serde(default)]
    pub assoc_days: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub date_indicator: String,
    #[serde(default)]
    pub location: String,
    pub base_location_suffix: Option<String>,
    pub assoc_location_suffix: Option<String>,
    #[serde(default)]
    pub diagram_type: String,
    #[serde(rename = "CIF_stp_indicator", default)]
    pub stp_indicator: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonScheduleV1 {
    #[serde(rename = "CIF_bank_holiday_running")]
    pub bank_holiday_running: Option<String>,
    #[serde(rename = "CIF_stp_indicator", default)]
    pub stp_indicator: String,
    #[serde(rename = "CIF_train_uid")]
    pub train_uid: String,
    pub applicable_timetable: Option<String>,
    pub atoc_code: Option<String>,
    pub new_schedule_segment: Option<NewScheduleSegment>,
    #[serde(default)]
    pub schedule_days_runs: String,
    pub schedule_start_date: String,
    pub schedule_end_date: String,
    #[serde(default)]
    pub schedule_segment: ScheduleSegment,
    #[serde(default)]
    pub train_status: String,
    #[serde(default)]
    pub transaction_type: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewScheduleSegment {
    #[serde(default)]
    pub traction_class: String,
    #[serde(default)]
    pub uic_code: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScheduleSegment {
    #[serde(default)]
    pub signalling_id: String,
    #[serde(rename = "CIF_train_category", default)]
    pub train_category: String,
    #[serde(rename = "CIF_headcode", default)]
    pub headcode: String,
    #[serde(rename = "CIF_course_indicator", default)]
    pub course_indicator: i32,
    #[serde(rename = "CIF_train_service_code", default)]
    pub train_service_code: String,
    #[serde(rename = "CIF_business_sector", default)]
    pub business_sector: String,
    #[serde(rename = "CIF_power_type")]
    pub power_type: Option<String>,
    #[serde(rename = "CIF_timing_load")]
    pub timing_load: Option<String>,
    #[serde(rename = "CIF_speed")]
    pub speed: Option<String>,
    #[serde(rename = "CIF_operating_characteristics")]
    pub operating_characteristics: Option<String>,
    #[serde(rename = "CIF_train_class")]
    pub train_class: Option<String>,
    #[serde(rename = "CIF_sleepers")]
    pub sleepers: Option<String>,
    #[serde(rename = "CIF_reservations")]
    pub reservations: Option<String>,
    #[serde(rename = "CIF_connection_indicator")]
    pub connection_indicator: Option<String>,
    #[serde(rename = "CIF_catering_code")]
    pub catering_code: Option<String>,
    #[serde(rename = "CIF_service_branding", default)]
    pub service_branding: String,
    #[serde(default)]
    pub schedule_location: Vec<ScheduleLocationRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScheduleLocationRecord {
    #[serde(default)]
    pub location_type: String,
    #[serde(default)]
    pub record_identity: String,
    #[serde(default)]
    pub tiploc_code: String,
    pub tiploc_instance: Option<String>,
    pub arrival: Option<String>,
    pub public_arrival: Option<String>,
    pub departure: Option<String>,
    pub public_departure: Option<String>,
    pub pass: Option<String>,
    pub platform: Option<String>,
    pub line: Option<String>,
    pub path: Option<String>,
    pub engineering_allowance: Option<String>,
    pub pathing_allowance: Option<String>,
    pub performance_allowance: Option<String>,
}

#[derive(Debug, Default)]
pub struct ImportCounts {
    pub processed: u64,
    pub tiplocs: u64,
    pub associations: u64,
    pub schedules: u64,
}

// Timetable feeds are inconsistent about date formats across record types.
fn parse_timetable_date(text: &str) -> Option<NaiveDate> {
    for layout in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(t.date());
        }
    }
    for layout in ["%Y-%m-%d", "%y-%m-%d", "%y%m%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, layout) {
            return Some(d);
        }
    }
    None
}

// CIF working times are HHMM, with a trailing H marking the half minute.
fn parse_cif_time(text: &Option<String>) -> Result<Option<NaiveTime>, String> {
    let text = match text.as_deref() {
        Some(x) if !x.is_empty() => x,
        _ => return Ok(None),
    };

    if text.len() == 5 && text.ends_with('H') {
        let t = NaiveTime::parse_from_str(&text[..4], "%H%M")
            .map_err(|_| format!("invalid time format: {}", text))?;
        return Ok(Some(t + chrono::Duration::seconds(30)));
    }

    NaiveTime::parse_from_str(text, "%H%M")
        .map(Some)
        .map_err(|_| format!("invalid time format: {}", text))
}

pub struct TimetableImporter {
    data: DataClient,
}

impl TimetableImporter {
    pub fn new(data: DataClient) -> Self {
        Self { data }
    }

    async fn import_tiploc(&self, tiploc: &TiplocV1) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO tiploc (tiploc_code, nalco, stanox, crs_code, description, tps_description)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tiploc_code)
            DO UPDATE SET
                nalco = EXCLUDED.nalco,
                stanox = EXCLUDED.stanox,
                crs_code = EXCLUDED.crs_code,
                description = EXCLUDED.description,
                tps_description = EXCLUDED.tps_description
            ",
        )
        .bind(&tiploc.tiploc_code)
        .bind(&tiploc.nalco)
        .bind(&tiploc.stanox)
        .bind(&tiploc.crs_code)
        .bind(&tiploc.description)
        .bind(&tiploc.tps_description)
        .execute(&self.data.pool)
        .await?;

        Ok(())
    }

    async fn import_association(&self, assoc: &JsonAssociationV1) -> Result<(), Error> {
        let start_date = parse_timetable_date(&assoc.assoc_start_date).ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad association start date {}", assoc.assoc_start_date),
            ))
        })?;
        let end_date = parse_timetable_date(&assoc.assoc_end_date).ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad association end date {}", assoc.assoc_end_date),
            ))
        })?;

        sqlx::query(
            "
            INSERT INTO association (
                transaction_type, main_train_uid, assoc_train_uid, assoc_start_date,
                assoc_end_date, assoc_days, category, date_indicator,
                location, base_location_suffix, assoc_location_suffix,
                diagram_type, stp_indicator
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (main_train_uid, assoc_train_uid, assoc_start_date, location, stp_indicator)
            DO NOTHING
            ",
        )
        .bind(&assoc.transaction_type)
        .bind(&assoc.main_train_uid)
        .bind(&assoc.assoc_train_uid)
        .bind(start_date)
        .bind(end_date)
        .bind(&assoc.assoc_days)
        .bind(&assoc.category)
        .bind(&assoc.date_indicator)
        .bind(&assoc.location)
        .bind(&assoc.base_location_suffix)
        .bind(&assoc.assoc_location_suffix)
        .bind(&assoc.diagram_type)
        .bind(&assoc.stp_indicator)
        .execute(&self.data.pool)
        .await?;

        Ok(())
    }

    async fn import_schedule(&self, schedule: &JsonScheduleV1) -> Result<(), Error> {
        let start_date = parse_timetable_date(&schedule.schedule_start_date).ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad schedule start date {}", schedule.schedule_start_date),
            ))
        })?;
        let end_date = parse_timetable_date(&schedule.schedule_end_date).ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad schedule end date {}", schedule.schedule_end_date),
            ))
        })?;

        let segment = &schedule.schedule_segment;
        let mut tx = self.data.pool.begin().await?;

        let (schedule_id,): (i32,) = sqlx::query_as(
            "
            INSERT INTO schedule (
                train_uid, transaction_type, stp_indicator, bank_holiday_running,
                applicable_timetable, atoc_code, schedule_days_runs, schedule_start_date,
                schedule_end_date, train_status, signalling_id, train_category,
                headcode, course_indicator, train_service_code, business_sector,
                power_type, timing_load, speed, operating_characteristics,
                train_class, sleepers, reservations, connection_indicator,
                catering_code, service_branding, traction_class, uic_code
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
            RETURNING id
            ",
        )
        .bind(&schedule.train_uid)
        .bind(&schedule.transaction_type)
        .bind(&schedule.stp_indicator)
        .bind(&schedule.bank_holiday_running)
        .bind(&schedule.applicable_timetable)
        .bind(&schedule.atoc_code)
        .bind(&schedule.schedule_days_runs)
        .bind(start_date)
        .bind(end_date)
        .bind(&schedule.train_status)
        .bind(&segment.signalling_id)
        .bind(&segment.train_category)
        .bind(&segment.headcode)
        .bind(segment.course_indicator)
        .bind(&segment.train_service_code)
        .bind(&segment.business_sector)
        .bind(&segment.power_type)
        .bind(&segment.timing_load)
        .bind(&segment.speed)
        .bind(&segment.operating_characteristics)
        .bind(&segment.train_class)
        .bind(&segment.sleepers)
        .bind(&segment.reservations)
        .bind(&segment.connection_indicator)
        .bind(&segment.catering_code)
        .bind(&segment.service_branding)
        .bind(schedule.new_schedule_segment.as_ref().map(|x| x.traction_class.clone()))
        .bind(schedule.new_schedule_segment.as_ref().map(|x| x.uic_code.clone()))
        .fetch_one(&mut *tx)
        .await?;

        for (i, location) in segment.schedule_location.iter().enumerate() {
            let times = [
                parse_cif_time(&location.arrival),
                parse_cif_time(&location.public_arrival),
                parse_cif_time(&location.departure),
                parse_cif_time(&location.public_departure),
                parse_cif_time(&location.pass),
            ];
            if let Some(Err(x)) = times.iter().find(|t| t.is_err()).cloned() {
                log::warn!(
                    "Skipping location {} of schedule {}: {}",
                    i,
                    schedule.train_uid,
                    x
                );
                continue;
            }
            let [arrival, public_arrival, departure, public_departure, pass] =
                times.map(|t| t.unwrap_or(None));

            sqlx::query(
                "
                INSERT INTO schedule_location (
                    schedule_id, location_type, record_identity, tiploc_code,
                    tiploc_instance, arrival, public_arrival, departure,
                    public_departure, pass, platform, line, path,
                    engineering_allowance, pathing_allowance, performance_allowance,
                    location_order
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ",
            )
            .bind(schedule_id)
            .bind(&location.location_type)
            .bind(&location.record_identity)
            .bind(&location.tiploc_code)
            .bind(&location.tiploc_instance)
            .bind(arrival)
            .bind(public_arrival)
            .bind(departure)
            .bind(public_departure)
            .bind(pass)
            .bind(location.platform.as_deref().and_then(null_string))
            .bind(location.line.as_deref().and_then(null_string))
            .bind(location.path.as_deref().and_then(null_string))
            .bind(location.engineering_allowance.as_deref().and_then(null_string))
            .bind(location.pathing_allowance.as_deref().and_then(null_string))
            .bind(location.performance_allowance.as_deref().and_then(null_string))
            .bind((i + 1) as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // Streams the extract line by line; an unreadable line never halts the
    // load, it is logged and skipped.
    pub async fn import(
        &self,
        reader: impl AsyncBufRead + Unpin + Send,
    ) -> Result<ImportCounts, Error> {
        let mut counts = ImportCounts::default();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            let entry: TimetableEntry = match serde_json::from_str(&line) {
                Ok(x) => x,
                Err(x) => {
                    log::warn!("Error decoding timetable line: {}", x);
                    continue;
                }
            };

            counts.processed += 1;
            if counts.processed % 10000 == 0 {
                log::info!(
                    "Processed {} entries (TIPLOCs: {}, Associations: {}, Schedules: {})",
                    counts.processed,
                    counts.tiplocs,
                    counts.associations,
                    counts.schedules
                );
            }

            if let Some(tiploc) = &entry.tiploc_v1 {
                match self.import_tiploc(tiploc).await {
                    Ok(()) => counts.tiplocs += 1,
                    Err(x) => log::warn!("Error inserting tiploc {}: {}", tiploc.tiploc_code, x),
                }
            } else if let Some(assoc) = &entry.json_association_v1 {
                match self.import_association(assoc).await {
                    Ok(()) => counts.associations += 1,
                    Err(x) => log::warn!(
                        "Error inserting association {}-{}: {}",
                        assoc.main_train_uid,
                        assoc.assoc_train_uid,
                        x
                    ),
                }
            } else if let Some(schedule) = &entry.json_schedule_v1 {
                match self.import_schedule(schedule).await {
                    Ok(()) => counts.schedules += 1,
                    Err(x) => {
                        log::warn!("Error inserting schedule {}: {}", schedule.train_uid, x)
                    }
                }
            } else if entry.eof.as_ref().is_some_and(|x| x.eof) {
                log::info!("End of timetable data reached");
                break;
            }
        }

        log::info!(
            "Timetable load complete - TIPLOCs: {}, Associations: {}, Schedules: {}",
            counts.tiplocs,
            counts.associations,
            counts.schedules
        );

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tiploc_line() {
        let line = r#"{"TiplocV1": {"transaction_type": "Create", "tiploc_code": "EDINBUR",
            "nalco": "908700", "stanox": "04302", "crs_code": "EDB",
            "description": "EDINBURGH", "tps_description": "EDINBURGH"}}"#;

        let entry: TimetableEntry = serde_json::from_str(line).unwrap();
        let tiploc = entry.tiploc_v1.unwrap();
        assert_eq!(tiploc.tiploc_code, "EDINBUR");
        assert_eq!(tiploc.stanox.as_deref(), Some("04302"));
    }

    #[test]
    fn decodes_schedule_line() {
        let line = r#"{"JsonScheduleV1": {"CIF_stp_indicator": "P", "CIF_train_uid": "Z12345",
            "atoc_code": "SR", "schedule_days_runs": "1111100",
            "schedule_start_date": "2025-03-03", "schedule_end_date": "2025-12-12",
            "train_status": "P",
            "schedule_segment": {"signalling_id": "1A23", "schedule_location": [
                {"location_type": "LO", "record_identity": "LO", "tiploc_code": "EDINBUR",
                 "departure": "1000", "public_departure": "1000", "platform": "4"}
            ]}}}"#;

        let entry: TimetableEntry = serde_json::from_str(line).unwrap();
        let schedule = entry.json_schedule_v1.unwrap();
        assert_eq!(schedule.train_uid, "Z12345");
        assert_eq!(schedule.schedule_segment.schedule_location.len(), 1);
    }

    #[test]
    fn decodes_eof_line() {
        let entry: TimetableEntry =
            serde_json::from_str(r#"{"EOFMessage": {"EOF": true}}"#).unwrap();
        assert!(entry.eof.unwrap().eof);
    }

    #[test]
    fn cif_time_half_minute() {
        assert_eq!(
            parse_cif_time(&Some("1000H".to_string())).unwrap(),
            Some(NaiveTime::from_hms_opt(10, 0, 30).unwrap())
        );
        assert_eq!(
            parse_cif_time(&Some("1000".to_string())).unwrap(),
            Some(NaiveTime::from_hms_opt(10, 0, 0).unwrap())
        );
        assert_eq!(parse_cif_time(&None).unwrap(), None);
        assert!(parse_cif_time(&Some("25xx".to_string())).is_err());
    }

    #[test]
    fn timetable_dates_in_many_layouts() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(parse_timetable_date("2025-03-01"), Some(expected));
        assert_eq!(parse_timetable_date("2025-03-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_timetable_date("250301"), Some(expected));
        assert_eq!(parse_timetable_date("2025/03/01"), Some(expected));
        assert_eq!(parse_timetable_date("gibberish"), None);
    }
}
