use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// One temperature/humidity/pressure reading.
///
/// The UTC offset carried by `time` is part of the value: it decides which
/// day file the entry is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    /// Degrees Celsius
    pub temperature: Decimal,
    /// Relative humidity, percent
    pub humidity: Decimal,
    /// Hectopascal
    pub pressure: Decimal,
}

impl MeasurementEntry {
    pub fn new(
        time: OffsetDateTime,
        temperature: Decimal,
        humidity: Decimal,
        pressure: Decimal,
    ) -> Self {
        Self {
            time,
            temperature,
            humidity,
            pressure,
        }
    }

    /// Calendar date of the entry in its own offset.
    pub fn day_key(&self) -> Date {
        self.time.date()
    }
}

/// Where a boundary or extreme value occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateEntry {
    pub time: OffsetDateTime,
    pub value: Decimal,
}

/// First/min/max/last of one dimension over one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregates {
    pub first: AggregateEntry,
    pub min: AggregateEntry,
    pub max: AggregateEntry,
    pub last: AggregateEntry,
}

impl Aggregates {
    pub fn starting_at(time: OffsetDateTime, value: Decimal) -> Self {
        let entry = AggregateEntry { time, value };
        Self {
            first: entry,
            min: entry,
            max: entry,
            last: entry,
        }
    }

    /// Fold one sample in. Equal values never replace an earlier min/max.
    pub fn include(&mut self, time: OffsetDateTime, value: Decimal) {
        let entry = AggregateEntry { time, value };
        if time < self.first.time {
            self.first = entry;
        }
        if time >= self.last.time {
            self.last = entry;
        }
        if value < self.min.value {
            self.min = entry;
        }
        if value > self.max.value {
            self.max = entry;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementAggregates {
    pub temperature: Aggregates,
    pub pressure: Aggregates,
    pub humidity: Aggregates,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::*;
    use time::macros::datetime;

    #[test]
    fn test_min_max_ties_keep_first_occurrence() {
        let t0 = datetime!(2024-05-01 10:00 UTC);
        let t1 = datetime!(2024-05-01 10:01 UTC);
        let t2 = datetime!(2024-05-01 10:02 UTC);

        let mut agg = Aggregates::starting_at(t0, Decimal::from(5));
        agg.include(t1, Decimal::from(5));
        agg.include(t2, Decimal::from(3));

        assert_eq!(agg.first.time, t0);
        assert_eq!(agg.max.time, t0);
        assert_eq!(agg.min, AggregateEntry { time: t2, value: Decimal::from(3) });
        assert_eq!(agg.last.time, t2);
    }

    #[test]
    fn test_upload_json_shape() {
        let entry = MeasurementEntry::new(
            datetime!(2024-05-01 19:50 +2),
            Decimal::from_str("21.5").unwrap(),
            Decimal::from_str("40").unwrap(),
            Decimal::from_str("1013.25").unwrap(),
        );

        let json = serde_json::to_value(entry).unwrap();

        assert_eq!(json["time"], "2024-05-01T19:50:00+02:00");
        assert_eq!(json["temperature"].as_f64(), Some(21.5));
        assert_eq!(json["humidity"].as_f64(), Some(40.0));
        assert_eq!(json["pressure"].as_f64(), Some(1013.25));
    }
}
