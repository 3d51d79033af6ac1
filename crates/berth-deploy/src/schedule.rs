//! Weekly schedule windows

use berth_store::ScheduleWindow;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike};
use thiserror::Error;

/// A window with an unusable time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Start or end is blank
    #[error("schedule window time is empty")]
    EmptyTime,
    /// Start or end is not `HH:MM`
    #[error("invalid schedule window time: {0}")]
    InvalidTime(String),
}

fn clock_minutes(value: &str) -> Result<u32, ScheduleError> {
    if value.is_empty() {
        return Err(ScheduleError::EmptyTime);
    }
    let time = NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(value.to_string()))?;
    Ok(time.hour() * 60 + time.minute())
}

/// Whether `now` falls inside any of `windows`.
///
/// No windows means always allowed. A window whose end equals its start
/// covers its whole weekday; an end before the start runs past midnight
/// into the next weekday. Windows with a weekday outside 0..=6 are ignored.
pub fn is_allowed<Tz: TimeZone>(
    windows: &[ScheduleWindow],
    now: &DateTime<Tz>,
) -> Result<bool, ScheduleError> {
    if windows.is_empty() {
        return Ok(true);
    }

    let weekday = now.weekday().num_days_from_sunday();
    let minutes = now.hour() * 60 + now.minute();

    for window in windows {
        let day = u32::from(window.weekday);
        if day > 6 {
            continue;
        }
        let start = clock_minutes(&window.start)?;
        let end = clock_minutes(&window.end)?;

        let matched = if start == end {
            weekday == day
        } else if end > start {
            weekday == day && minutes >= start && minutes < end
        } else {
            (weekday == day && minutes >= start) || (weekday == (day + 1) % 7 && minutes < end)
        };
        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn window(weekday: u8, start: &str, end: &str) -> ScheduleWindow {
        ScheduleWindow {
            weekday,
            start: start.into(),
            end: end.into(),
        }
    }

    // 2024-06-05 is a Wednesday (weekday 3)
    fn wednesday(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, hour, minute, 0).unwrap()
    }

    #[test]
    fn empty_schedule_is_always_allowed() {
        assert!(is_allowed(&[], &wednesday(3, 0)).unwrap());
    }

    #[test]
    fn same_day_window_is_half_open() {
        let windows = [window(3, "09:00", "17:00")];
        assert!(is_allowed(&windows, &wednesday(12, 0)).unwrap());
        assert!(is_allowed(&windows, &wednesday(9, 0)).unwrap());
        assert!(!is_allowed(&windows, &wednesday(17, 0)).unwrap());
        assert!(!is_allowed(&windows, &wednesday(20, 0)).unwrap());
    }

    #[test]
    fn overnight_window_spills_into_next_day() {
        let windows = [window(3, "22:00", "06:00")];
        assert!(is_allowed(&windows, &wednesday(23, 0)).unwrap());
        let thursday_2am = Utc.with_ymd_and_hms(2024, 6, 6, 2, 0, 0).unwrap();
        assert!(is_allowed(&windows, &thursday_2am).unwrap());
        assert!(!is_allowed(&windows, &wednesday(12, 0)).unwrap());
        let thursday_7am = Utc.with_ymd_and_hms(2024, 6, 6, 7, 0, 0).unwrap();
        assert!(!is_allowed(&windows, &thursday_7am).unwrap());
    }

    #[test]
    fn saturday_overnight_wraps_to_sunday() {
        let windows = [window(6, "23:00", "01:00")];
        let sunday = Utc.with_ymd_and_hms(2024, 6, 9, 0, 30, 0).unwrap();
        assert!(is_allowed(&windows, &sunday).unwrap());
    }

    #[test]
    fn equal_start_and_end_covers_the_day() {
        let windows = [window(3, "00:00", "00:00")];
        assert!(is_allowed(&windows, &wednesday(23, 59)).unwrap());
        let thursday = Utc.with_ymd_and_hms(2024, 6, 6, 12, 0, 0).unwrap();
        assert!(!is_allowed(&windows, &thursday).unwrap());
    }

    #[test]
    fn out_of_range_weekday_is_skipped() {
        let windows = [window(9, "00:00", "00:00")];
        assert!(!is_allowed(&windows, &wednesday(12, 0)).unwrap());
    }

    #[test]
    fn malformed_time_is_an_error() {
        assert_eq!(
            is_allowed(&[window(3, "9am", "17:00")], &wednesday(12, 0)),
            Err(ScheduleError::InvalidTime("9am".into()))
        );
        assert_eq!(
            is_allowed(&[window(3, "", "17:00")], &wednesday(12, 0)),
            Err(ScheduleError::EmptyTime)
        );
    }

    #[test]
    fn evaluated_in_the_given_offset() {
        let windows = [window(3, "09:00", "17:00")];
        // 02:00 UTC is 10:00 at +08:00
        let local = wednesday(2, 0).with_timezone(&FixedOffset::east_opt(8 * 3600).unwrap());
        assert!(is_allowed(&windows, &local).unwrap());
    }
}
