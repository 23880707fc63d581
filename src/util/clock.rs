use chrono::{DateTime, Local, Utc};

/// current unix time in seconds with sub-second precision, the timestamp format of payloads
pub fn unix_now_secs() -> f64 {
    unix_secs(&Utc::now())
}

pub fn unix_secs(t: &DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

/// local wall-clock time as `YYYY-mm-dd HH:MM:SS`, the format used in acknowledgments and in
///  the `datetime` payload field
pub fn local_datetime_string() -> String {
    format_datetime(&Local::now())
}

pub fn format_datetime<Tz: chrono::TimeZone>(t: &DateTime<Tz>) -> String
where Tz::Offset: std::fmt::Display
{
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}
