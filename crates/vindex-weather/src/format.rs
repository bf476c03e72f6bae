//! Display helpers. Cached values stay in Celsius; only these convert.

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::types::TemperatureUnit;

/// "24.0°C" / "75.2°F"
pub fn format_temperature(celsius: f64, unit: TemperatureUnit) -> String {
    format!("{:.1}{}", unit.convert(celsius), unit.symbol())
}

/// "Mon, 2:00 PM" in UTC.
pub fn format_day_time(timestamp_seconds: i64) -> String {
    format_day_time_at(timestamp_seconds, Utc.fix())
}

/// "Mon, 2:00 PM" at a fixed UTC offset (e.g. the forecast city's timezone).
pub fn format_day_time_at(timestamp_seconds: i64, offset: FixedOffset) -> String {
    match DateTime::from_timestamp(timestamp_seconds, 0) {
        Some(utc) => utc.with_timezone(&offset).format("%a, %-I:%M %p").to_string(),
        None => timestamp_seconds.to_string(),
    }
}

/// Offset from a city's `timezone` field (seconds east of UTC).
pub fn offset_from_seconds(seconds: i64) -> FixedOffset {
    i32::try_from(seconds)
        .ok()
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}
