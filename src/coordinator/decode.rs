//! Raw device record → `DeviceState`
//!
//! The backend is loose about types: numbers arrive as JSON numbers or as
//! strings, nullable fields come as `null` or `""`. Everything is coerced
//! here so the rest of the crate only sees typed values.

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::ApiError;
use crate::models::{DeviceState, LocationSource, MotionStatus};

const RECORD: &str = "device record";
const GPS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LED_BIT: i64 = 0;
const SPEAKER_BIT: i64 = 1;

/// Field-level decode failure, turned into `ApiError::Decode` with the record attached
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RecordError {
    pub field: &'static str,
    pub reason: String,
}

impl RecordError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    pub fn into_api_error(self, raw: &Value) -> ApiError {
        ApiError::Decode {
            endpoint: RECORD,
            reason: format!("{}: {}", self.field, self.reason),
            payload: raw.to_string(),
        }
    }
}

fn text(raw: &Value, key: &'static str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_text(raw: &Value, key: &'static str) -> Result<String, RecordError> {
    text(raw, key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RecordError::new(key, "missing"))
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// `null`, `""` and absence all mean "unknown"
fn optional_int(raw: &Value, key: &'static str) -> Result<Option<i64>, RecordError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => coerce_int(v)
            .map(Some)
            .ok_or_else(|| RecordError::new(key, format!("not an integer: {}", v))),
    }
}

fn required_int(raw: &Value, key: &'static str) -> Result<i64, RecordError> {
    optional_int(raw, key)?.ok_or_else(|| RecordError::new(key, "missing"))
}

fn narrow<T: TryFrom<i64>>(value: i64, field: &'static str) -> Result<T, RecordError> {
    T::try_from(value).map_err(|_| RecordError::new(field, format!("out of range: {}", value)))
}

fn online(raw: &Value) -> bool {
    match raw.get("online") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        Some(v) => coerce_int(v).map(|n| n != 0).unwrap_or(true),
    }
}

fn coordinates(raw: &Value) -> Result<(f64, f64), RecordError> {
    let google = required_text(raw, "google")?;
    let (lat, lng) = google
        .split_once(',')
        .ok_or_else(|| RecordError::new("google", format!("expected \"lat,lng\": {}", google)))?;

    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| RecordError::new("google", format!("bad coordinate: {}", s)))
    };
    Ok((parse(lat)?, parse(lng)?))
}

struct Fix {
    time: NaiveDateTime,
    heading: Option<u16>,
    altitude: Option<i32>,
}

/// `gps` sub-record: `time,_,_,_,heading,_,_,altitude`. Zero means "not reported".
fn fix(raw: &Value) -> Result<Fix, RecordError> {
    let gps = required_text(raw, "gps")?;
    let parts: Vec<&str> = gps.split(',').map(str::trim).collect();
    if parts.len() < 8 {
        return Err(RecordError::new(
            "gps",
            format!("expected 8 fields, got {}", parts.len()),
        ));
    }

    let time = NaiveDateTime::parse_from_str(parts[0], GPS_TIME_FORMAT)
        .map_err(|e| RecordError::new("gps", format!("bad time {:?}: {}", parts[0], e)))?;
    let int = |s: &str| {
        coerce_int(&Value::String(s.to_string()))
            .ok_or_else(|| RecordError::new("gps", format!("not an integer: {}", s)))
    };

    let heading = match int(parts[4])? {
        0 => None,
        h => Some(narrow::<u16>(h, "gps")?),
    };
    let altitude = match int(parts[7])? {
        0 => None,
        a => Some(narrow::<i32>(a, "gps")?),
    };

    Ok(Fix {
        time,
        heading,
        altitude,
    })
}

pub(crate) fn decode_device(raw: &Value, app_version: &str) -> Result<DeviceState, RecordError> {
    let imei = required_text(raw, "imei")?;
    let name = text(raw, "name")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| imei.clone());
    let model = text(raw, "device").unwrap_or_default();
    let firmware_version = text(raw, "ver")
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
        .unwrap_or_default();

    let (latitude, longitude) = coordinates(raw)?;
    let fix = fix(raw)?;

    let speed = optional_int(raw, "speed")?
        .map(|s| narrow::<u32>(s, "speed"))
        .transpose()?;
    let battery_level = narrow::<u8>(required_int(raw, "bat")?.clamp(0, 100), "bat")?;
    let cellular_signal = narrow::<u8>(required_int(raw, "level")?, "level")?;
    let update_interval = narrow::<u32>(required_int(raw, "sec")?, "sec")?;
    let onoff = required_int(raw, "onoff")?;

    Ok(DeviceState {
        imei,
        name,
        model,
        firmware_version,
        app_version: app_version.to_string(),
        latitude,
        longitude,
        altitude: fix.altitude,
        heading: fix.heading,
        updated_at: fix.time.and_utc(),
        speed,
        battery_level,
        cellular_signal,
        status: MotionStatus::derive(online(raw), speed),
        location_source: LocationSource::classify(fix.heading, fix.altitude),
        update_interval,
        led: (onoff >> LED_BIT) & 1 == 1,
        speaker: (onoff >> SPEAKER_BIT) & 1 == 1,
        saving: None,
    })
}
