use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

// Time-of-day and run-date conventions shared by the feed consumers and the
// query engine. Planned times are wall-clock text from the timetable; actual
// times arrive from TRUST as epoch-millisecond strings and stay raw in the
// cache until formatted for a response.

pub fn format_run_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

// Timetable feeds write times as a bare HHMMSS; anything else is passed on
// unchanged.
pub fn format_planned_time(s: &str) -> String {
    if s.len() == 6 {
        if let Ok(t) = NaiveTime::parse_from_str(s, "%H%M%S") {
            return t.format("%H:%M").to_string();
        }
    }
    s.to_string()
}

pub fn parse_vstp_time(s: &str) -> Option<NaiveTime> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() == 6 {
        if let Ok(t) = NaiveTime::parse_from_str(trimmed, "%H%M%S") {
            return Some(t);
        }
    }
    None
}

pub fn null_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_int_or_zero(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}

fn epoch_millis(s: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = s.parse().ok()?;
    if millis <= 1_000_000_000 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

pub fn format_actual_time(s: &str) -> String {
    let trimmed = s.trim();
    match epoch_millis(trimmed) {
        Some(t) => t.format("%H:%M:%S%.6f").to_string(),
        None => trimmed.to_string(),
    }
}

// Pins a time-of-day string (or epoch-millisecond string) onto today's UTC
// date so two of them can be subtracted.
pub fn parse_time_for_comparison(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    let ref_date = Utc::now().date_naive();

    if let Some(t) = epoch_millis(trimmed) {
        return Some(ref_date.and_time(t.time()));
    }

    for format in ["%H:%M", "%H:%M:%S", "%H:%M:%S%.6f"] {
        if let Ok(t) = NaiveTime::parse_from_str(trimmed, format) {
            return Some(ref_date.and_time(t));
        }
    }

    None
}

pub fn calculate_lateness(planned: &str, actual: &str) -> i64 {
    let planned = match parse_time_for_comparison(planned) {
        Some(x) => x,
        None => return 0,
    };
    let actual = match parse_time_for_comparison(actual) {
        Some(x) => x,
        None => return 0,
    };

    (actual - planned).num_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_date_is_compact() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(format_run_date(date), "20250301");
    }

    #[test]
    fn planned_time_from_hhmmss() {
        assert_eq!(format_planned_time("100000"), "10:00");
        assert_eq!(format_planned_time("235930"), "23:59");
    }

    #[test]
    fn planned_time_passthrough() {
        assert_eq!(format_planned_time("10:00"), "10:00");
        assert_eq!(format_planned_time(""), "");
        assert_eq!(format_planned_time("999999"), "999999");
    }

    #[test]
    fn vstp_time_blank_is_none() {
        assert_eq!(parse_vstp_time(""), None);
        assert_eq!(parse_vstp_time("      "), None);
    }

    #[test]
    fn vstp_time_parses() {
        assert_eq!(
            parse_vstp_time("101500"),
            Some(NaiveTime::from_hms_opt(10, 15, 0).unwrap())
        );
    }

    #[test]
    fn null_string_trims() {
        assert_eq!(null_string("  "), None);
        assert_eq!(null_string(" X "), Some("X".to_string()));
    }

    #[test]
    fn actual_time_from_epoch_millis() {
        // 2025-03-01T10:00:00Z
        assert_eq!(format_actual_time("1740823200000"), "10:00:00.000000");
    }

    #[test]
    fn actual_time_passthrough() {
        assert_eq!(format_actual_time("10:05:30"), "10:05:30");
        assert_eq!(format_actual_time(" 42 "), "42");
    }

    #[test]
    fn lateness_whole_minutes() {
        assert_eq!(calculate_lateness("10:00", "10:05:30"), 5);
        assert_eq!(calculate_lateness("10:00:00", "10:07:00"), 7);
    }

    #[test]
    fn lateness_can_be_negative() {
        assert_eq!(calculate_lateness("10:05", "10:00:00"), -5);
    }

    #[test]
    fn lateness_unparseable_is_zero() {
        assert_eq!(calculate_lateness("nonsense", "10:00"), 0);
        assert_eq!(calculate_lateness("10:00", ""), 0);
    }

    #[test]
    fn lateness_against_epoch_actual() {
        // 10:07:00Z on the reference date regardless of the actual calendar
        // day the millis fall on.
        assert_eq!(calculate_lateness("10:00", "1740823620000"), 7);
    }

    #[test]
    fn parse_int_or_zero_handles_blanks() {
        assert_eq!(parse_int_or_zero(" 7 "), 7);
        assert_eq!(parse_int_or_zero(""), 0);
        assert_eq!(parse_int_or_zero("x"), 0);
    }
}
