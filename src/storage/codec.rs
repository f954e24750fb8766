//! Line format for one measurement: `HH:mm±hh:mm temperature humidity pressure`.
//!
//! Seconds are not stored. Numbers use a dot separator with no grouping and
//! keep the precision they were recorded with.

use std::str::FromStr;

use rust_decimal::Decimal;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time, UtcOffset};

use super::error::StoreError;
use crate::models::MeasurementEntry;

const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");
const OFFSET_FORMAT: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

/// Byte length of the `HH:mm` prefix of the first field.
const TIME_LEN: usize = 5;

pub fn encode(entry: &MeasurementEntry) -> Result<String, StoreError> {
    let time = entry
        .time
        .format(TIME_FORMAT)
        .map_err(|e| StoreError::format("", e.to_string()))?;
    let offset = entry
        .time
        .offset()
        .format(OFFSET_FORMAT)
        .map_err(|e| StoreError::format("", e.to_string()))?;

    Ok(format!(
        "{}{} {} {} {}",
        time, offset, entry.temperature, entry.humidity, entry.pressure
    ))
}

/// Decode a line written on `date`. The date comes from the day file, the
/// time of day and offset from the line itself.
pub fn decode(date: Date, line: &str) -> Result<MeasurementEntry, StoreError> {
    let mut fields = line.split(' ');
    let mut next_field = |name: &str| {
        fields
            .next()
            .filter(|field| !field.is_empty())
            .ok_or_else(|| StoreError::format(line, format!("missing {}", name)))
    };

    let stamp = next_field("time")?;
    let temperature = parse_decimal(line, next_field("temperature")?)?;
    let humidity = parse_decimal(line, next_field("humidity")?)?;
    let pressure = parse_decimal(line, next_field("pressure")?)?;

    if fields.next().is_some() {
        return Err(StoreError::format(line, "unexpected trailing data"));
    }

    let (time, offset) = match (stamp.get(..TIME_LEN), stamp.get(TIME_LEN..)) {
        (Some(time), Some(offset)) => (time, offset),
        _ => return Err(StoreError::format(line, "truncated time")),
    };
    let time = Time::parse(time, TIME_FORMAT)
        .map_err(|e| StoreError::format(line, format!("bad time: {}", e)))?;
    let offset = UtcOffset::parse(offset, OFFSET_FORMAT)
        .map_err(|e| StoreError::format(line, format!("bad offset: {}", e)))?;

    Ok(MeasurementEntry::new(
        PrimitiveDateTime::new(date, time).assume_offset(offset),
        temperature,
        humidity,
        pressure,
    ))
}

/// Plain `-?digits(.digits)?`. `Decimal::from_str` alone also accepts
/// underscores and exponents, which never appear in a valid record.
fn parse_decimal(line: &str, field: &str) -> Result<Decimal, StoreError> {
    let digits = field.strip_prefix('-').unwrap_or(field);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if !all_digits(whole) || !fraction.map_or(true, all_digits) {
        return Err(StoreError::format(line, format!("bad number {:?}", field)));
    }

    Decimal::from_str(field)
        .map_err(|e| StoreError::format(line, format!("bad number {:?}: {}", field, e)))
}
