//! Parsing and display of user-supplied backup dates.

use chrono::{Local, NaiveDate, NaiveDateTime};

/// Accepted date-time formats, tried in order.
const DATE_TIME_FORMATS: &[&str] = &["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Date-only formats; these resolve to midnight.
const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d"];

/// Display format used when listing backups.
pub const DISPLAY_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Parse a date typed by a user.
pub fn parse_user_date(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();

    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(dt);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Current local wall-clock time, the clock backup names are written in.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Keep the `limit` dates closest to `around`, returned in ascending order.
pub fn nearest(mut dates: Vec<NaiveDateTime>, around: NaiveDateTime, limit: usize) -> Vec<NaiveDateTime> {
    dates.sort_by_key(|dt| (*dt - around).num_milliseconds().abs());
    dates.truncate(limit);
    dates.sort();
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_parse_user_date_formats() {
        assert_eq!(parse_user_date("2020/06/29 16:00:01"), Some(dt("2020-06-29 16:00:01")));
        assert_eq!(parse_user_date("2020-06-29 16:00:01"), Some(dt("2020-06-29 16:00:01")));
        assert_eq!(parse_user_date("  2020/06/29 "), Some(dt("2020-06-29 00:00:00")));
        assert_eq!(parse_user_date("yesterday"), None);
    }

    #[test]
    fn test_nearest_keeps_closest_sorted() {
        let around = dt("2020-06-29 12:00:00");
        let dates: Vec<_> = (-5..=5).map(|h| around + Duration::hours(h * 3)).collect();

        let picked = nearest(dates, around, 3);
        assert_eq!(
            picked,
            vec![around - Duration::hours(3), around, around + Duration::hours(3)]
        );
    }
}
