use crate::data::{DataClient, Location, Operator};
use crate::error::Error;
use crate::journey::{is_schedule_valid_for_date, load_train_journey, TrainJourney};
use crate::journey_cache::TIPLOC_TTL;
use crate::times::{calculate_lateness, format_actual_time, format_run_date};

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use futures::stream::StreamExt;
use itertools::Itertools;
use serde::Serialize;
use sqlx::FromRow;

use std::collections::{HashMap, HashSet};

// Fan-out bounds for the enrichment phase of one request.
const JOURNEY_CONCURRENCY: usize = 50;
const TIPLOC_CONCURRENCY: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct ServiceFilters {
    pub headcode: Option<String>,
    pub operator_code: Option<String>,
    pub passes_through: Vec<LocationFilter>,
}

#[derive(Clone, Debug)]
pub struct LocationFilter {
    pub stanox: String,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceResponse {
    pub id: i32,
    pub train_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signalling_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_category: Option<String>,
    pub schedule_start_date: NaiveDate,
    pub schedule_end_date: NaiveDate,
    pub schedule_days_runs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    pub locations: Vec<ServiceLocation>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceLocation {
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_arrival: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_departure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub location_order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_arrival: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_departure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_lateness: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_lateness: Option<i64>,
}

// Parameters for the dynamically assembled filter query. Dates bind as SQL
// dates, times-of-day as text the server casts against ::time.
enum SqlParam {
    Date(NaiveDate),
    Text(String),
}

fn bind_params<'q, O>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    params: &'q [SqlParam],
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    let mut query = query;
    for param in params {
        query = match param {
            SqlParam::Date(x) => query.bind(x),
            SqlParam::Text(x) => query.bind(x),
        };
    }
    query
}

// Assembles the WHERE clause with positional placeholders, in a fixed
// order: exact predicates, the validity-date window, then one EXISTS
// sub-predicate per passes-through entry.
fn build_service_filter(filters: &ServiceFilters) -> (String, Vec<SqlParam>) {
    let mut conditions = vec![];
    let mut params = vec![];
    let mut arg_index = 1;

    if let Some(headcode) = &filters.headcode {
        conditions.push(format!("s.signalling_id = ${}", arg_index));
        params.push(SqlParam::Text(headcode.clone()));
        arg_index += 1;
    }

    if let Some(operator_code) = &filters.operator_code {
        conditions.push(format!("s.atoc_code = ${}", arg_index));
        params.push(SqlParam::Text(operator_code.clone()));
        arg_index += 1;
    }

    let dates: HashSet<NaiveDate> = filters
        .passes_through
        .iter()
        .filter_map(|f| f.time_from.map(|t| t.date_naive()))
        .collect();

    if let (Some(min_date), Some(max_date)) = (dates.iter().min(), dates.iter().max()) {
        conditions.push(format!("s.schedule_start_date <= ${}", arg_index));
        params.push(SqlParam::Date(*max_date));
        arg_index += 1;
        conditions.push(format!("s.schedule_end_date >= ${}", arg_index));
        params.push(SqlParam::Date(*min_date));
        arg_index += 1;
    }

    for filter in &filters.passes_through {
        let mut parts = vec![format!(
            "EXISTS (SELECT 1 FROM schedule_location sl WHERE sl.schedule_id = s.id \
             AND sl.tiploc_code IN (SELECT t.tiploc_code FROM tiploc t WHERE t.stanox = ${})",
            arg_index
        )];
        params.push(SqlParam::Text(filter.stanox.clone()));
        arg_index += 1;

        match (filter.time_from, filter.time_to) {
            (Some(from), Some(to)) => {
                parts.push(format!(
                    "((sl.arrival::time BETWEEN ${0} AND ${1}) OR (sl.departure::time BETWEEN ${0} AND ${1}))",
                    arg_index,
                    arg_index + 1
                ));
                params.push(SqlParam::Text(from.format("%H:%M:%S").to_string()));
                params.push(SqlParam::Text(to.format("%H:%M:%S").to_string()));
                arg_index += 2;
            }
            (Some(from), None) => {
                parts.push(format!(
                    "((sl.arrival::time >= ${0}) OR (sl.departure::time >= ${0}))",
                    arg_index
                ));
                params.push(SqlParam::Text(from.format("%H:%M:%S").to_string()));
                arg_index += 1;
            }
            (None, Some(to)) => {
                parts.push(format!(
                    "((sl.arrival::time <= ${0}) OR (sl.departure::time <= ${0}))",
                    arg_index
                ));
                params.push(SqlParam::Text(to.format("%H:%M:%S").to_string()));
                arg_index += 1;
            }
            (None, None) => {}
        }

        conditions.push(parts.join(" AND ") + ")");
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, params)
}

#[derive(FromRow)]
struct ServiceRow {
    id: i32,
    train_uid: String,
    signalling_id: Option<String>,
    headcode: Option<String>,
    train_category: Option<String>,
    schedule_start_date: NaiveDate,
    schedule_end_date: NaiveDate,
    schedule_days_runs: String,
    train_status: Option<String>,
    atoc_code: Option<String>,
    toc_name: Option<String>,
}

impl ServiceRow {
    fn into_response(self) -> ServiceResponse {
        let operator = match (self.atoc_code, self.toc_name) {
            (Some(code), Some(name)) => Some(Operator { code, name }),
            _ => None,
        };

        ServiceResponse {
            id: self.id,
            train_uid: self.train_uid,
            signalling_id: self.signalling_id,
            headcode: self.headcode,
            train_category: self.train_category,
            schedule_start_date: self.schedule_start_date,
            schedule_end_date: self.schedule_end_date,
            schedule_days_runs: self.schedule_days_runs,
            train_status: self.train_status,
            operator,
            locations: vec![],
        }
    }
}

#[derive(FromRow)]
struct StopRow {
    schedule_id: i32,
    id: i32,
    location_type: Option<String>,
    tiploc_code: String,
    arrival: Option<String>,
    public_arrival: Option<String>,
    departure: Option<String>,
    public_departure: Option<String>,
    platform: Option<String>,
    location_order: i32,
    stanox: Option<String>,
    crs_code: Option<String>,
    description: Option<String>,
}

fn parse_location_time(text: &Option<String>) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text.as_deref()?, "%H:%M:%S").ok()
}

// Walks the calling points in order, advancing the running date whenever the
// hour-minute of a stop goes backwards relative to the previous one.
fn compute_location_dates(
    locations: &[ServiceLocation],
    base_date: NaiveDate,
) -> HashMap<i32, NaiveDate> {
    let mut location_dates = HashMap::new();
    let mut current_date = base_date;
    let mut prev_time: Option<NaiveTime> = None;

    for location in locations {
        let loc_time = if location.departure.as_deref().is_some_and(|x| !x.is_empty()) {
            parse_location_time(&location.departure)
        } else {
            parse_location_time(&location.arrival)
        };

        if let (Some(prev), Some(time)) = (prev_time, loc_time) {
            if time.hour() < prev.hour()
                || (time.hour() == prev.hour() && time.minute() < prev.minute())
            {
                current_date = current_date.succ_opt().unwrap_or(current_date);
            }
        }

        location_dates.insert(location.location_order, current_date);
        if let Some(time) = loc_time {
            prev_time = Some(time);
        }
    }

    location_dates
}

// A stop's effective time for window matching: the later of arrival and
// departure when both exist.
fn effective_time(location: &ServiceLocation) -> Option<NaiveTime> {
    match (
        parse_location_time(&location.arrival),
        parse_location_time(&location.departure),
    ) {
        (Some(arr), Some(dep)) => Some(arr.max(dep)),
        (Some(arr), None) => Some(arr),
        (None, Some(dep)) => Some(dep),
        (None, None) => None,
    }
}

fn seconds_of_day(t: NaiveTime) -> u32 {
    t.hour() * 3600 + t.minute() * 60 + t.second()
}

fn matches_location_filters(
    service: &ServiceResponse,
    filters: &[LocationFilter],
    base_date: NaiveDate,
) -> bool {
    let location_dates = compute_location_dates(&service.locations, base_date);

    for filter in filters {
        let candidates = service
            .locations
            .iter()
            .filter(|loc| loc.location.stanox == filter.stanox);

        let mut match_found = false;
        for location in candidates {
            if filter.time_from.is_none() && filter.time_to.is_none() {
                match_found = true;
                break;
            }

            if let Some(time_from) = filter.time_from {
                // The stop must fall on the same computed calendar day as
                // the window's start.
                let stop_date = location_dates.get(&location.location_order).copied();
                if stop_date != Some(time_from.date_naive()) {
                    continue;
                }
            }

            let loc_time = match effective_time(location) {
                Some(x) => seconds_of_day(x),
                None => continue,
            };

            if let Some(time_from) = filter.time_from {
                if loc_time < seconds_of_day(time_from.time()) {
                    continue;
                }
            }
            if let Some(time_to) = filter.time_to {
                if loc_time > seconds_of_day(time_to.time()) {
                    continue;
                }
            }

            match_found = true;
            break;
        }

        if !match_found {
            return false;
        }
    }

    true
}

impl DataClient {
    // One batched query for every returned schedule's calling points.
    async fn fetch_stops(
        &self,
        schedule_ids: &[i32],
    ) -> Result<HashMap<i32, Vec<ServiceLocation>>, Error> {
        if schedule_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<StopRow> = sqlx::query_as(
            "
            SELECT sl.schedule_id, sl.id, sl.location_type, sl.tiploc_code,
                   sl.arrival::text AS arrival, sl.public_arrival::text AS public_arrival,
                   sl.departure::text AS departure, sl.public_departure::text AS public_departure,
                   sl.platform, sl.location_order,
                   t.stanox, t.crs_code, t.description
            FROM schedule_location sl
            LEFT JOIN tiploc t ON sl.tiploc_code = t.tiploc_code
            WHERE sl.schedule_id = ANY($1)
            ORDER BY sl.schedule_id, sl.location_order
            ",
        )
        .bind(schedule_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let location = ServiceLocation {
                    id: row.id,
                    location_type: row.location_type,
                    location: Location {
                        stanox: row.stanox.unwrap_or_default(),
                        crs: row.crs_code,
                        full_name: row.description,
                        tiploc_codes: vec![row.tiploc_code],
                    },
                    arrival: row.arrival,
                    public_arrival: row.public_arrival,
                    departure: row.departure,
                    public_departure: row.public_departure,
                    platform: row.platform,
                    location_order: row.location_order,
                    actual_arrival: None,
                    actual_departure: None,
                    arrival_lateness: None,
                    departure_lateness: None,
                };
                (row.schedule_id, location)
            })
            .into_group_map())
    }

    pub async fn services_with_filters(
        &self,
        filters: &ServiceFilters,
    ) -> Result<Vec<ServiceResponse>, Error> {
        let (where_clause, params) = build_service_filter(filters);

        let sql = format!(
            "
            SELECT s.id, s.train_uid, s.signalling_id, s.headcode,
                   s.train_category, s.schedule_start_date, s.schedule_end_date,
                   s.schedule_days_runs, s.train_status, s.atoc_code, toc.name AS toc_name
            FROM schedule s
            JOIN reference_toc toc ON s.atoc_code = toc.code
            {}
            ",
            where_clause
        );

        let rows: Vec<ServiceRow> = bind_params(sqlx::query_as(&sql), &params)
            .fetch_all(&self.pool)
            .await?;

        let mut services: Vec<ServiceResponse> =
            rows.into_iter().map(ServiceRow::into_response).collect();

        let schedule_ids: Vec<i32> = services.iter().map(|s| s.id).collect();
        let mut all_stops = self.fetch_stops(&schedule_ids).await?;
        for service in services.iter_mut() {
            service.locations = all_stops.remove(&service.id).unwrap_or_default();
        }

        // The SQL window predicate is date-blind; re-check each survivor
        // against the calendar and the per-stop day roll-over.
        let earliest_date = filters
            .passes_through
            .iter()
            .filter_map(|f| f.time_from.map(|t| t.date_naive()))
            .min();

        if let Some(earliest_date) = earliest_date {
            services.retain(|service| {
                is_schedule_valid_for_date(
                    &service.schedule_days_runs,
                    service.schedule_start_date,
                    service.schedule_end_date,
                    earliest_date,
                ) && matches_location_filters(service, &filters.passes_through, earliest_date)
            });
        }

        Ok(services)
    }

    pub async fn services_by_headcode(
        &self,
        headcode: &str,
    ) -> Result<Vec<ServiceResponse>, Error> {
        let rows: Vec<ServiceRow> = sqlx::query_as(
            "
            SELECT s.id, s.train_uid, s.signalling_id, s.headcode,
                   s.train_category, s.schedule_start_date, s.schedule_end_date,
                   s.schedule_days_runs, s.train_status, s.atoc_code, t.name AS toc_name
            FROM schedule s
            LEFT JOIN reference_toc t ON s.atoc_code = t.code
            WHERE s.signalling_id = $1
            ORDER BY s.id
            ",
        )
        .bind(headcode)
        .fetch_all(&self.pool)
        .await?;

        let mut services: Vec<ServiceResponse> =
            rows.into_iter().map(ServiceRow::into_response).collect();

        let schedule_ids: Vec<i32> = services.iter().map(|s| s.id).collect();
        let mut all_stops = self.fetch_stops(&schedule_ids).await?;
        for service in services.iter_mut() {
            service.locations = all_stops.remove(&service.id).unwrap_or_default();
        }

        Ok(services)
    }

    pub async fn scheduled_services_at_location(
        &self,
        stanox: &str,
        date: NaiveDate,
    ) -> Result<Vec<ServiceResponse>, Error> {
        let rows: Vec<ServiceRow> = sqlx::query_as(
            "
            SELECT DISTINCT s.id, s.train_uid, s.signalling_id, s.headcode,
                   s.train_category, s.schedule_start_date, s.schedule_end_date,
                   s.schedule_days_runs, s.train_status, s.atoc_code, rt.name AS toc_name
            FROM schedule s
            JOIN schedule_location sl ON s.id = sl.schedule_id
            JOIN tiploc t ON sl.tiploc_code = t.tiploc_code
            LEFT JOIN reference_toc rt ON s.atoc_code = rt.code
            WHERE t.stanox = $1
            ",
        )
        .bind(stanox)
        .fetch_all(&self.pool)
        .await?;

        let mut services: Vec<ServiceResponse> = rows
            .into_iter()
            .filter(|row| {
                is_schedule_valid_for_date(
                    &row.schedule_days_runs,
                    row.schedule_start_date,
                    row.schedule_end_date,
                    date,
                )
            })
            .map(ServiceRow::into_response)
            .collect();

        let schedule_ids: Vec<i32> = services.iter().map(|s| s.id).collect();
        let mut all_stops = self.fetch_stops(&schedule_ids).await?;
        for service in services.iter_mut() {
            service.locations = all_stops.remove(&service.id).unwrap_or_default();
        }

        Ok(services)
    }

    // Overlays cached realtime data onto the scheduled services: journeys
    // and TIPLOC resolutions fan out concurrently (bounded), then the
    // single-threaded pass annotates each stop.
    pub async fn add_realtime_data(&self, services: &mut [ServiceResponse], date: DateTime<Utc>) {
        if services.is_empty() {
            return;
        }

        let run_date = format_run_date(date.date_naive());

        let train_uids: HashSet<String> = services
            .iter()
            .map(|s| s.train_uid.trim().to_string())
            .filter(|uid| !uid.is_empty())
            .collect();

        let journeys: HashMap<String, TrainJourney> = futures::stream::iter(train_uids)
            .map(|uid| {
                let run_date = run_date.clone();
                async move {
                    let journey =
                        load_train_journey(&self.pool, &self.cache, &uid, &run_date).await;
                    (uid, journey)
                }
            })
            .buffer_unordered(JOURNEY_CONCURRENCY)
            .filter_map(|(uid, journey)| async move { journey.ok().map(|j| (uid, j)) })
            .collect()
            .await;

        let tiplocs: HashSet<String> = services
            .iter()
            .flat_map(|s| s.locations.iter())
            .flat_map(|loc| loc.location.tiploc_codes.iter().cloned())
            .collect();

        let tiploc_to_stanox: HashMap<String, String> = futures::stream::iter(tiplocs)
            .map(|tiploc| async move {
                let stanox = self.stanox_by_tiploc(&tiploc, TIPLOC_TTL).await;
                (tiploc, stanox)
            })
            .buffer_unordered(TIPLOC_CONCURRENCY)
            .filter_map(|(tiploc, stanox)| async move { stanox.ok().map(|s| (tiploc, s)) })
            .collect()
            .await;

        for service in services.iter_mut() {
            let journey = match journeys.get(service.train_uid.trim()) {
                Some(x) => x,
                None => continue,
            };

            let stanox_to_stop: HashMap<&str, _> = journey
                .stops
                .iter()
                .map(|stop| (stop.stanox.as_str(), stop))
                .collect();

            for location in service.locations.iter_mut() {
                let stanox = location
                    .location
                    .tiploc_codes
                    .iter()
                    .find_map(|t| tiploc_to_stanox.get(t));
                let stanox = match stanox {
                    Some(x) => x,
                    None => continue,
                };

                let stop = match stanox_to_stop.get(stanox.as_str()) {
                    Some(x) => x,
                    None => continue,
                };

                if !stop.actual_arr.is_empty() {
                    location.actual_arrival = Some(format_actual_time(&stop.actual_arr));

                    if let Some(arrival) = location.arrival.as_deref().filter(|x| !x.is_empty()) {
                        location.arrival_lateness =
                            Some(calculate_lateness(arrival, &stop.actual_arr));
                    }
                }

                if !stop.actual_dep.is_empty() {
                    location.actual_departure = Some(format_actual_time(&stop.actual_dep));

                    if let Some(departure) =
                        location.departure.as_deref().filter(|x| !x.is_empty())
                    {
                        location.departure_lateness =
                            Some(calculate_lateness(departure, &stop.actual_dep));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn location(order: i32, stanox: &str, arrival: Option<&str>, departure: Option<&str>) -> ServiceLocation {
        ServiceLocation {
            id: order,
            location_type: None,
            location: Location {
                stanox: stanox.to_string(),
                crs: None,
                full_name: None,
                tiploc_codes: vec![],
            },
            arrival: arrival.map(str::to_string),
            public_arrival: None,
            departure: departure.map(str::to_string),
            public_departure: None,
            platform: None,
            location_order: order,
            actual_arrival: None,
            actual_departure: None,
            arrival_lateness: None,
            departure_lateness: None,
        }
    }

    fn service(locations: Vec<ServiceLocation>) -> ServiceResponse {
        ServiceResponse {
            id: 1,
            train_uid: "Z12345".to_string(),
            signalling_id: Some("1A23".to_string()),
            headcode: None,
            train_category: None,
            schedule_start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            schedule_end_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            schedule_days_runs: "1111111".to_string(),
            train_status: None,
            operator: None,
            locations,
        }
    }

    #[test]
    fn filter_sql_orders_placeholders() {
        let filters = ServiceFilters {
            headcode: Some("1A23".to_string()),
            operator_code: Some("SR".to_string()),
            passes_through: vec![LocationFilter {
                stanox: "87201".to_string(),
                time_from: Some(utc(2025, 3, 1, 9, 0, 0)),
                time_to: Some(utc(2025, 3, 1, 11, 0, 0)),
            }],
        };

        let (where_clause, params) = build_service_filter(&filters);

        assert_eq!(
            where_clause,
            "WHERE s.signalling_id = $1 AND s.atoc_code = $2 \
             AND s.schedule_start_date <= $3 AND s.schedule_end_date >= $4 \
             AND EXISTS (SELECT 1 FROM schedule_location sl WHERE sl.schedule_id = s.id \
             AND sl.tiploc_code IN (SELECT t.tiploc_code FROM tiploc t WHERE t.stanox = $5) \
             AND ((sl.arrival::time BETWEEN $6 AND $7) OR (sl.departure::time BETWEEN $6 AND $7)))"
        );
        assert_eq!(params.len(), 7);
        assert!(matches!(&params[4], SqlParam::Text(x) if x == "87201"));
        assert!(matches!(&params[5], SqlParam::Text(x) if x == "09:00:00"));
        assert!(matches!(&params[6], SqlParam::Text(x) if x == "11:00:00"));
    }

    #[test]
    fn filter_sql_empty_when_no_filters() {
        let (where_clause, params) = build_service_filter(&ServiceFilters::default());
        assert_eq!(where_clause, "");
        assert!(params.is_empty());
    }

    #[test]
    fn filter_sql_lower_bound_only() {
        let filters = ServiceFilters {
            headcode: None,
            operator_code: None,
            passes_through: vec![LocationFilter {
                stanox: "87201".to_string(),
                time_from: Some(utc(2025, 3, 1, 9, 0, 0)),
                time_to: None,
            }],
        };

        let (where_clause, params) = build_service_filter(&filters);
        assert!(where_clause.contains("s.schedule_start_date <= $1"));
        assert!(where_clause.contains("WHERE t.stanox = $3"));
        assert!(where_clause.contains("(sl.arrival::time >= $4) OR (sl.departure::time >= $4)"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn rollover_advances_date_on_time_inversion() {
        let base = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let next = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        let locations = vec![
            location(1, "A", None, Some("23:50:00")),
            location(2, "B", Some("00:10:00"), None),
            location(3, "C", Some("00:40:00"), None),
        ];

        let dates = compute_location_dates(&locations, base);
        assert_eq!(dates[&1], base);
        assert_eq!(dates[&2], next);
        assert_eq!(dates[&3], next);
    }

    #[test]
    fn rollover_ignores_seconds() {
        let base = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let locations = vec![
            location(1, "A", None, Some("10:00:30")),
            location(2, "B", Some("10:00:10"), None),
        ];

        let dates = compute_location_dates(&locations, base);
        assert_eq!(dates[&2], base);
    }

    #[test]
    fn window_match_uses_effective_time() {
        let svc = service(vec![
            location(1, "87201", None, Some("10:00:00")),
            location(2, "87202", Some("10:15:00"), None),
        ]);

        let filters = [LocationFilter {
            stanox: "87201".to_string(),
            time_from: Some(utc(2025, 3, 1, 9, 0, 0)),
            time_to: Some(utc(2025, 3, 1, 11, 0, 0)),
        }];

        assert!(matches_location_filters(
            &svc,
            &filters,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        ));
    }

    #[test]
    fn window_match_rejects_out_of_window_stop() {
        let svc = service(vec![location(1, "87201", None, Some("12:30:00"))]);

        let filters = [LocationFilter {
            stanox: "87201".to_string(),
            time_from: Some(utc(2025, 3, 1, 9, 0, 0)),
            time_to: Some(utc(2025, 3, 1, 11, 0, 0)),
        }];

        assert!(!matches_location_filters(
            &svc,
            &filters,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        ));
    }

    #[test]
    fn presence_filter_matches_without_times() {
        let svc = service(vec![location(1, "87201", None, Some("12:30:00"))]);

        let filters = [LocationFilter {
            stanox: "87201".to_string(),
            time_from: None,
            time_to: None,
        }];

        assert!(matches_location_filters(
            &svc,
            &filters,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        ));
    }

    #[test]
    fn rolled_over_stop_matches_next_day_window_only() {
        // 23:50 then 00:30: the second stop's computed day is d+1
        let locations = vec![
            location(1, "87100", None, Some("23:50:00")),
            location(2, "87201", Some("00:30:00"), None),
        ];

        let d = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let filter_on_d = [LocationFilter {
            stanox: "87201".to_string(),
            time_from: Some(utc(2025, 3, 1, 23, 45, 0)),
            time_to: Some(utc(2025, 3, 2, 1, 0, 0)),
        }];
        assert!(!matches_location_filters(&service(locations.clone()), &filter_on_d, d));

        let filter_on_d_plus_1 = [LocationFilter {
            stanox: "87201".to_string(),
            time_from: Some(utc(2025, 3, 2, 0, 0, 0)),
            time_to: Some(utc(2025, 3, 2, 1, 0, 0)),
        }];
        assert!(matches_location_filters(&service(locations), &filter_on_d_plus_1, d));
    }

    #[test]
    fn every_filter_entry_must_match() {
        let svc = service(vec![
            location(1, "87201", None, Some("10:00:00")),
            location(2, "87202", Some("10:15:00"), None),
        ]);

        let filters = [
            LocationFilter {
                stanox: "87201".to_string(),
                time_from: None,
                time_to: None,
            },
            LocationFilter {
                stanox: "99999".to_string(),
                time_from: None,
                time_to: None,
            },
        ];

        assert!(!matches_location_filters(
            &svc,
            &filters,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        ));
    }

    #[test]
    fn upper_bound_only_filter_needs_no_date_match() {
        let svc = service(vec![location(1, "87201", Some("08:00:00"), None)]);

        let filters = [LocationFilter {
            stanox: "87201".to_string(),
            time_from: None,
            time_to: Some(utc(2025, 3, 1, 9, 0, 0)),
        }];

        assert!(matches_location_filters(
            &svc,
            &filters,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        ));
    }
}
