//! Conversions between 12-hour display text and minute-of-day.

use thiserror::Error;

use crate::model::{Minute, MINUTES_PER_DAY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("malformed time {0:?}: expected H:MM AM|PM")]
    Malformed(String),
    #[error("hour {0} out of range 1-12")]
    Hour(u32),
    #[error("minute {0} out of range 0-59")]
    Minute(u32),
    #[error("meridiem {0:?} is neither AM nor PM")]
    Meridiem(String),
    #[error("minute-of-day {0} out of range 0-1439")]
    OutOfDay(u32),
}

/// Parse `H:MM AM` / `HH:MM PM` into a minute-of-day.
///
/// `12:00 AM` is midnight (0) and `12:00 PM` is noon (720).
pub fn parse_12h(text: &str) -> Result<Minute, FormatError> {
    let malformed = || FormatError::Malformed(text.to_string());
    let trimmed = text.trim();
    let (clock, meridiem) = trimmed.split_once(' ').ok_or_else(malformed)?;
    let (hour, minute) = clock.split_once(':').ok_or_else(malformed)?;

    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return Err(malformed());
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let hour: u32 = hour.parse().map_err(|_| malformed())?;
    let minute: u32 = minute.parse().map_err(|_| malformed())?;

    if !(1..=12).contains(&hour) {
        return Err(FormatError::Hour(hour));
    }
    if minute > 59 {
        return Err(FormatError::Minute(minute));
    }
    let pm = match meridiem.trim() {
        "AM" => false,
        "PM" => true,
        other => return Err(FormatError::Meridiem(other.to_string())),
    };

    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    Ok((hour24 * 60 + minute) as Minute)
}

/// Canonical `HH:MM AM|PM` text for a minute-of-day.
pub fn format_12h(minute: Minute) -> Result<String, FormatError> {
    if u32::from(minute) >= MINUTES_PER_DAY as u32 {
        return Err(FormatError::OutOfDay(minute.into()));
    }
    let hour24 = minute / 60;
    let mins = minute % 60;
    let (hour, meridiem) = match hour24 {
        0 => (12, "AM"),
        1..=11 => (hour24, "AM"),
        12 => (12, "PM"),
        _ => (hour24 - 12, "PM"),
    };
    Ok(format!("{hour:02}:{mins:02} {meridiem}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn midnight_and_noon() {
        assert_eq!(parse_12h("12:00 AM").unwrap(), 0);
        assert_eq!(parse_12h("12:00 PM").unwrap(), 720);
        assert_eq!(parse_12h("12:59 AM").unwrap(), 59);
        assert_eq!(parse_12h("11:59 PM").unwrap(), 1439);
    }

    #[test]
    fn unpadded_hour_accepted() {
        assert_eq!(parse_12h("9:30 AM").unwrap(), 570);
        assert_eq!(parse_12h("09:30 AM").unwrap(), 570);
        assert_eq!(parse_12h("  4:00 PM ").unwrap(), 960);
    }

    #[test]
    fn rejects_bad_hour() {
        assert_eq!(parse_12h("0:30 AM"), Err(FormatError::Hour(0)));
        assert_eq!(parse_12h("13:00 PM"), Err(FormatError::Hour(13)));
    }

    #[test]
    fn rejects_bad_minute() {
        assert_eq!(parse_12h("10:60 AM"), Err(FormatError::Minute(60)));
    }

    #[test]
    fn rejects_bad_meridiem() {
        assert!(matches!(parse_12h("10:00 XM"), Err(FormatError::Meridiem(_))));
        assert!(matches!(parse_12h("10:00 am"), Err(FormatError::Meridiem(_))));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "10:00", "1000 AM", "10:0 AM", "a:00 AM", "100:00 AM", "10:+5 AM"] {
            assert!(
                matches!(parse_12h(bad), Err(FormatError::Malformed(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn format_canonical() {
        assert_eq!(format_12h(0).unwrap(), "12:00 AM");
        assert_eq!(format_12h(570).unwrap(), "09:30 AM");
        assert_eq!(format_12h(720).unwrap(), "12:00 PM");
        assert_eq!(format_12h(960).unwrap(), "04:00 PM");
        assert_eq!(format_12h(1439).unwrap(), "11:59 PM");
        assert_eq!(format_12h(1440), Err(FormatError::OutOfDay(1440)));
    }

    proptest! {
        #[test]
        fn round_trip_from_text(hour in 1u32..=12, minute in 0u32..60, pm in any::<bool>(), pad in any::<bool>()) {
            let meridiem = if pm { "PM" } else { "AM" };
            let text = if pad {
                format!("{hour:02}:{minute:02} {meridiem}")
            } else {
                format!("{hour}:{minute:02} {meridiem}")
            };
            let parsed = parse_12h(&text).unwrap();
            let canonical = format!("{hour:02}:{minute:02} {meridiem}");
            prop_assert_eq!(format_12h(parsed).unwrap(), canonical);
        }

        #[test]
        fn round_trip_from_minute(m in 0u16..1440) {
            prop_assert_eq!(parse_12h(&format_12h(m).unwrap()).unwrap(), m);
        }
    }
}
