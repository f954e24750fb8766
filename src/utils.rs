/// Utility functions for data processing and formatting
use rust_decimal::Decimal;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::models::MeasurementEntry;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS ±hh:mm format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!(
        "[day].[month].[year] - [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    );
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// Drop seconds and sub-seconds, keeping the offset.
pub fn truncate_to_minute(dt: OffsetDateTime) -> OffsetDateTime {
    dt.replace_second(0)
        .and_then(|dt| dt.replace_nanosecond(0))
        .unwrap_or(dt)
}

/// Time left until the next whole minute; zero when already on one.
pub fn duration_until_next_minute(dt: OffsetDateTime) -> std::time::Duration {
    let into_minute = std::time::Duration::new(u64::from(dt.second()), dt.nanosecond());
    if into_minute.is_zero() {
        std::time::Duration::ZERO
    } else {
        std::time::Duration::from_secs(60) - into_minute
    }
}

/// Calculate the per-dimension mean of a group of readings
///
/// The result is time-stamped at `time`. Returns None for an empty group.
pub fn average_measurements(
    data_points: &[MeasurementEntry],
    time: OffsetDateTime,
) -> Option<MeasurementEntry> {
    if data_points.is_empty() {
        return None;
    }

    let count = Decimal::from(data_points.len());
    let mean = |value: fn(&MeasurementEntry) -> Decimal| {
        let sum: Decimal = data_points.iter().map(value).sum();
        (sum / count).normalize()
    };

    Some(MeasurementEntry::new(
        time,
        mean(|d| d.temperature),
        mean(|d| d.humidity),
        mean(|d| d.pressure),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;
    use time::macros::datetime;

    #[test]
    fn test_format_datetime() {
        assert_eq!(
            format_datetime(&datetime!(2024-03-09 07:05:03 +1)),
            "09.03.2024 - 07:05:03 +01:00"
        );
    }

    #[test]
    fn test_truncate_keeps_offset() {
        assert_eq!(
            truncate_to_minute(datetime!(2024-03-09 19:50:42.250 -5)),
            datetime!(2024-03-09 19:50 -5)
        );
    }

    #[test]
    fn test_duration_until_next_minute() {
        assert_eq!(
            duration_until_next_minute(datetime!(2024-03-09 19:50 UTC)),
            Duration::ZERO
        );
        assert_eq!(
            duration_until_next_minute(datetime!(2024-03-09 19:50:45.5 UTC)),
            Duration::from_millis(14_500)
        );
    }

    #[test]
    fn test_average_measurements() {
        let readings = [
            MeasurementEntry::new(
                datetime!(2024-03-09 19:50:10 +1),
                Decimal::from(30),
                Decimal::from(45),
                Decimal::from(950),
            ),
            MeasurementEntry::new(
                datetime!(2024-03-09 19:50:40 +1),
                Decimal::from(20),
                Decimal::from(40),
                Decimal::from(1050),
            ),
        ];

        let avg = average_measurements(&readings, datetime!(2024-03-09 19:50 +1)).unwrap();
        assert_eq!(avg.temperature, Decimal::from(25));
        assert_eq!(avg.humidity, Decimal::from_str("42.5").unwrap());
        assert_eq!(avg.pressure.to_string(), "1000");

        assert!(average_measurements(&[], datetime!(2024-03-09 19:50 +1)).is_none());
    }
}
