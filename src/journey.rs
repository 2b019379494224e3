use crate::error::Error;
use crate::journey_cache::{schedule_key, JourneyCache, JOURNEY_TTL};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use std::fmt;

// The per-train-per-day cache document. `planned_*` hold "HH:MM" text taken
// from the timetable; `actual_*` hold whatever TRUST reported, raw
// epoch-millisecond strings until a response formats them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JourneyStop {
    pub stanox: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub planned_arr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub planned_dep: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actual_arr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actual_dep: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainJourney {
    pub uid: String,
    pub run_date: String,
    pub stops: Vec<JourneyStop>,
}

#[derive(Debug)]
pub struct JourneyError {
    what: String,
}

impl JourneyError {
    pub fn new(what: impl Into<String>) -> Self {
        Self { what: what.into() }
    }
}

impl fmt::Display for JourneyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error resolving train journey: {}", self.what)
    }
}

// The 7-character mask runs Monday..Sunday.
pub fn is_schedule_valid_for_date(
    days_runs: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    check_date: NaiveDate,
) -> bool {
    if check_date < start_date || check_date > end_date {
        return false;
    }

    if days_runs.len() != 7 {
        return false;
    }

    let day_index = check_date.weekday().num_days_from_monday() as usize;
    days_runs.as_bytes()[day_index] == b'1'
}

// First stop with a matching STANOX takes the event; later duplicates of the
// same STANOX in the calling point list are never touched.
pub fn merge_trust_event(
    journey: &mut TrainJourney,
    loc_stanox: &str,
    event_type: &str,
    actual_timestamp: &str,
) -> bool {
    for stop in journey.stops.iter_mut() {
        if stop.stanox == loc_stanox {
            if event_type == "ARRIVAL" {
                stop.actual_arr = actual_timestamp.to_string();
            } else {
                stop.actual_dep = actual_timestamp.to_string();
            }
            return true;
        }
    }
    false
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i32,
    schedule_days_runs: String,
    schedule_start_date: NaiveDate,
    schedule_end_date: NaiveDate,
}

#[derive(sqlx::FromRow)]
struct StopRow {
    arrival: Option<String>,
    departure: Option<String>,
    stanox: Option<String>,
}

fn truncate_to_hh_mm(time_text: &str) -> String {
    if time_text.len() >= 5 {
        time_text[..5].to_string()
    } else {
        time_text.to_string()
    }
}

async fn load_journey_from_database(
    pool: &PgPool,
    train_uid: &str,
    run_date: &str,
) -> Result<TrainJourney, Error> {
    let date = NaiveDate::parse_from_str(run_date, "%Y%m%d")
        .map_err(|_| JourneyError::new(format!("invalid run date {}", run_date)))?;

    // Overlapping STP layers can cover the same day; the latest-starting one
    // wins.
    let schedule: ScheduleRow = sqlx::query_as(
        "
        SELECT id, schedule_days_runs, schedule_start_date, schedule_end_date
        FROM schedule
        WHERE train_uid = $1
          AND schedule_start_date <= $2
          AND schedule_end_date >= $2
        ORDER BY schedule_start_date DESC
        LIMIT 1
        ",
    )
    .bind(train_uid)
    .bind(date)
    .fetch_one(pool)
    .await
    .map_err(Error::from_query)?;

    if !is_schedule_valid_for_date(
        &schedule.schedule_days_runs,
        schedule.schedule_start_date,
        schedule.schedule_end_date,
        date,
    ) {
        return Err(JourneyError::new("schedule does not run on this day").into());
    }

    let rows: Vec<StopRow> = sqlx::query_as(
        "
        SELECT sl.arrival::text AS arrival, sl.departure::text AS departure, t.stanox
        FROM schedule_location sl
        LEFT JOIN tiploc t ON sl.tiploc_code = t.tiploc_code
        WHERE sl.schedule_id = $1
        ORDER BY sl.location_order
        ",
    )
    .bind(schedule.id)
    .fetch_all(pool)
    .await?;

    let mut stops = vec![];
    for row in rows {
        let stanox = match row.stanox {
            Some(x) if !x.is_empty() => x,
            _ => continue,
        };

        stops.push(JourneyStop {
            stanox,
            planned_arr: row.arrival.as_deref().map(truncate_to_hh_mm).unwrap_or_default(),
            planned_dep: row.departure.as_deref().map(truncate_to_hh_mm).unwrap_or_default(),
            ..Default::default()
        });
    }

    Ok(TrainJourney {
        uid: train_uid.to_string(),
        run_date: run_date.to_string(),
        stops,
    })
}

// Cache hit else materialise from the schedule store; a cache that cannot be
// read is treated as a miss, and the write-through is best-effort.
pub async fn load_train_journey(
    pool: &PgPool,
    cache: &JourneyCache,
    train_uid: &str,
    run_date: &str,
) -> Result<TrainJourney, Error> {
    let key = schedule_key(train_uid, run_date);

    if let Ok(Some(raw)) = cache.get(&key).await {
        return Ok(serde_json::from_str(&raw)?);
    }

    let journey = load_journey_from_database(pool, train_uid, run_date).await?;

    if let Ok(encoded) = serde_json::to_string(&journey) {
        let _ = cache.set(&key, &encoded, JOURNEY_TTL).await;
    }

    Ok(journey)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn two_stop_journey() -> TrainJourney {
        TrainJourney {
            uid: "Z12345".to_string(),
            run_date: "20250301".to_string(),
            stops: vec![
                JourneyStop {
                    stanox: "87201".to_string(),
                    planned_dep: "10:00".to_string(),
                    ..Default::default()
                },
                JourneyStop {
                    stanox: "87202".to_string(),
                    planned_arr: "10:15".to_string(),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn validity_requires_date_in_range() {
        // 2025-03-01 is a Saturday
        assert!(!is_schedule_valid_for_date(
            "1111111",
            date(2025, 3, 2),
            date(2025, 3, 31),
            date(2025, 3, 1),
        ));
        assert!(!is_schedule_valid_for_date(
            "1111111",
            date(2025, 2, 1),
            date(2025, 2, 28),
            date(2025, 3, 1),
        ));
    }

    #[test]
    fn validity_checks_weekday_mask() {
        let start = date(2025, 3, 1);
        let end = date(2025, 3, 31);
        // Saturday is index 5
        assert!(is_schedule_valid_for_date("0000010", start, end, date(2025, 3, 1)));
        assert!(!is_schedule_valid_for_date("1111101", start, end, date(2025, 3, 1)));
        // Monday is index 0
        assert!(is_schedule_valid_for_date("1000000", start, end, date(2025, 3, 3)));
    }

    #[test]
    fn validity_rejects_malformed_mask() {
        let start = date(2025, 3, 1);
        let end = date(2025, 3, 31);
        assert!(!is_schedule_valid_for_date("111111", start, end, date(2025, 3, 3)));
        assert!(!is_schedule_valid_for_date("", start, end, date(2025, 3, 3)));
    }

    #[test]
    fn merge_sets_arrival_and_departure_independently() {
        let mut journey = two_stop_journey();
        assert!(merge_trust_event(&mut journey, "87201", "DEPARTURE", "1740825600000"));
        assert!(merge_trust_event(&mut journey, "87202", "ARRIVAL", "1740826500000"));

        assert_eq!(journey.stops[0].actual_dep, "1740825600000");
        assert_eq!(journey.stops[0].actual_arr, "");
        assert_eq!(journey.stops[1].actual_arr, "1740826500000");
        assert_eq!(journey.stops[1].actual_dep, "");
    }

    #[test]
    fn merge_is_idempotent_on_replay() {
        let mut journey = two_stop_journey();
        assert!(merge_trust_event(&mut journey, "87201", "ARRIVAL", "1740825600000"));
        assert!(merge_trust_event(&mut journey, "87201", "ARRIVAL", "1740825600000"));
        assert_eq!(journey.stops[0].actual_arr, "1740825600000");
    }

    #[test]
    fn merge_takes_first_matching_stop_only() {
        let mut journey = two_stop_journey();
        journey.stops.push(JourneyStop {
            stanox: "87201".to_string(),
            ..Default::default()
        });

        assert!(merge_trust_event(&mut journey, "87201", "ARRIVAL", "1"));
        assert_eq!(journey.stops[0].actual_arr, "1");
        assert_eq!(journey.stops[2].actual_arr, "");
    }

    #[test]
    fn merge_reports_no_match() {
        let mut journey = two_stop_journey();
        assert!(!merge_trust_event(&mut journey, "99999", "ARRIVAL", "1"));
    }

    #[test]
    fn journey_document_round_trips() {
        let journey = two_stop_journey();
        let encoded = serde_json::to_string(&journey).unwrap();
        // unset actuals are omitted from the document
        assert!(!encoded.contains("actual_arr"));
        let decoded: TrainJourney = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, journey);
    }

    #[test]
    fn hh_mm_truncation() {
        assert_eq!(truncate_to_hh_mm("10:00:00"), "10:00");
        assert_eq!(truncate_to_hh_mm("10:00"), "10:00");
        assert_eq!(truncate_to_hh_mm("9:0"), "9:0");
    }
}
