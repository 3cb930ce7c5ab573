//! Data models for tracked devices

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::saving_profile::{ProfileField, SavingProfile};

/// Speed (km/h) from which a moving device counts as driving
pub const DRIVING_SPEED_KMH: u32 = 20;

// ============================================================================
// Classification enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocationSource {
    #[serde(rename = "gps")]
    Satellite,
    #[serde(rename = "lbs")]
    CellTower,
}

impl LocationSource {
    /// Cell-tower fixes carry no heading and no altitude
    pub fn classify(heading: Option<u16>, altitude: Option<i32>) -> Self {
        if heading.is_none() && altitude.is_none() {
            LocationSource::CellTower
        } else {
            LocationSource::Satellite
        }
    }

    pub fn accuracy_meters(&self) -> u32 {
        match self {
            LocationSource::Satellite => 10,
            LocationSource::CellTower => 100,
        }
    }
}

impl std::fmt::Display for LocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationSource::Satellite => write!(f, "gps"),
            LocationSource::CellTower => write!(f, "lbs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    Offline,
    Static,
    Moving,
    Driving,
}

impl MotionStatus {
    pub fn derive(online: bool, speed: Option<u32>) -> Self {
        if !online {
            return MotionStatus::Offline;
        }
        match speed {
            None | Some(0) => MotionStatus::Static,
            Some(s) if s < DRIVING_SPEED_KMH => MotionStatus::Moving,
            Some(_) => MotionStatus::Driving,
        }
    }
}

impl std::fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MotionStatus::Offline => write!(f, "offline"),
            MotionStatus::Static => write!(f, "static"),
            MotionStatus::Moving => write!(f, "moving"),
            MotionStatus::Driving => write!(f, "driving"),
        }
    }
}

/// Named update intervals offered alongside the free-form setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPreset {
    Precision,
    PowerSaving,
    Sleep,
}

impl IntervalPreset {
    pub const ALL: [IntervalPreset; 3] = [
        IntervalPreset::Precision,
        IntervalPreset::PowerSaving,
        IntervalPreset::Sleep,
    ];

    pub fn seconds(&self) -> u32 {
        match self {
            IntervalPreset::Precision => 10,
            IntervalPreset::PowerSaving => 600,
            IntervalPreset::Sleep => 65535,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IntervalPreset::Precision => "Precision Update Interval",
            IntervalPreset::PowerSaving => "Power Saving Update Interval",
            IntervalPreset::Sleep => "Sleep Update Interval",
        }
    }
}

impl std::str::FromStr for IntervalPreset {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "precision" => Ok(IntervalPreset::Precision),
            "power_saving" => Ok(IntervalPreset::PowerSaving),
            "sleep" => Ok(IntervalPreset::Sleep),
            _ => Err(format!("Unknown interval preset: {}", s)),
        }
    }
}

// ============================================================================
// Device state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub imei: String,
    pub model: String,
    pub firmware_version: String,
    pub app_version: String,
}

/// Everything known about one tracker after a refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub imei: String,
    pub name: String,
    pub model: String,
    pub firmware_version: String,
    pub app_version: String,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<i32>,
    pub heading: Option<u16>,
    pub updated_at: DateTime<Utc>,

    pub speed: Option<u32>,
    pub battery_level: u8,
    pub cellular_signal: u8,
    pub status: MotionStatus,
    pub location_source: LocationSource,

    pub update_interval: u32,
    pub led: bool,
    pub speaker: bool,

    pub saving: Option<SavingProfile>,
}

impl DeviceState {
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            imei: self.imei.clone(),
            model: self.model.clone(),
            firmware_version: self.firmware_version.clone(),
            app_version: self.app_version.clone(),
        }
    }

    pub fn location_accuracy(&self) -> u32 {
        self.location_source.accuracy_meters()
    }
}

// ============================================================================
// Field accessor table
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Flag(bool),
    Time(NaiveTime),
    Text(String),
    Unknown,
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Flag(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            FieldValue::Time(t) => write!(f, "{}", t.format("%H:%M")),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<Option<i64>> for FieldValue {
    fn from(v: Option<i64>) -> Self {
        v.map(FieldValue::Integer).unwrap_or(FieldValue::Unknown)
    }
}

/// Every field a consumer can present, each bound to its getter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceField {
    UpdateTime,
    Speed,
    Altitude,
    Heading,
    LocationSource,
    BatteryLevel,
    CellularSignal,
    Status,
    UpdateInterval,
    Led,
    Speaker,
    PowerSaving,
    OnTime,
    OffTime,
}

impl DeviceField {
    pub const ALL: [DeviceField; 14] = [
        DeviceField::UpdateTime,
        DeviceField::Speed,
        DeviceField::Altitude,
        DeviceField::Heading,
        DeviceField::LocationSource,
        DeviceField::BatteryLevel,
        DeviceField::CellularSignal,
        DeviceField::Status,
        DeviceField::UpdateInterval,
        DeviceField::Led,
        DeviceField::Speaker,
        DeviceField::PowerSaving,
        DeviceField::OnTime,
        DeviceField::OffTime,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            DeviceField::UpdateTime => "update_time",
            DeviceField::Speed => "speed",
            DeviceField::Altitude => "altitude",
            DeviceField::Heading => "direction",
            DeviceField::LocationSource => "location_source",
            DeviceField::BatteryLevel => "battery_level",
            DeviceField::CellularSignal => "cellular_signal",
            DeviceField::Status => "status",
            DeviceField::UpdateInterval => "update_interval",
            DeviceField::Led => "led",
            DeviceField::Speaker => "speaker",
            DeviceField::PowerSaving => ProfileField::PowerSaving.key(),
            DeviceField::OnTime => ProfileField::OnTime.key(),
            DeviceField::OffTime => ProfileField::OffTime.key(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceField::UpdateTime => "Update Time",
            DeviceField::Speed => "Speed",
            DeviceField::Altitude => "Altitude",
            DeviceField::Heading => "Direction",
            DeviceField::LocationSource => "Location Source",
            DeviceField::BatteryLevel => "Battery Level",
            DeviceField::CellularSignal => "Cellular Signal",
            DeviceField::Status => "Status",
            DeviceField::UpdateInterval => "Update Interval",
            DeviceField::Led => "LED",
            DeviceField::Speaker => "Speaker",
            DeviceField::PowerSaving => "Power Saving",
            DeviceField::OnTime => "Power Saving On Time",
            DeviceField::OffTime => "Power Saving Off Time",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            DeviceField::Speed => Some("km/h"),
            DeviceField::Altitude => Some("m"),
            DeviceField::Heading => Some("°"),
            DeviceField::BatteryLevel => Some("%"),
            DeviceField::UpdateInterval => Some("s"),
            _ => None,
        }
    }

    pub fn value(&self, device: &DeviceState) -> FieldValue {
        match self {
            DeviceField::UpdateTime => FieldValue::Timestamp(device.updated_at),
            DeviceField::Speed => device.speed.map(i64::from).into(),
            DeviceField::Altitude => device.altitude.map(i64::from).into(),
            DeviceField::Heading => device.heading.map(i64::from).into(),
            DeviceField::LocationSource => FieldValue::Text(device.location_source.to_string()),
            DeviceField::BatteryLevel => FieldValue::Integer(device.battery_level.into()),
            DeviceField::CellularSignal => FieldValue::Integer(device.cellular_signal.into()),
            DeviceField::Status => FieldValue::Text(device.status.to_string()),
            DeviceField::UpdateInterval => FieldValue::Integer(device.update_interval.into()),
            DeviceField::Led => FieldValue::Flag(device.led),
            DeviceField::Speaker => FieldValue::Flag(device.speaker),
            DeviceField::PowerSaving => device
                .saving
                .as_ref()
                .map(|s| FieldValue::Flag(s.power_saving()))
                .unwrap_or(FieldValue::Unknown),
            DeviceField::OnTime => device
                .saving
                .as_ref()
                .map(|s| FieldValue::Time(s.on_time()))
                .unwrap_or(FieldValue::Unknown),
            DeviceField::OffTime => device
                .saving
                .as_ref()
                .map(|s| FieldValue::Time(s.off_time()))
                .unwrap_or(FieldValue::Unknown),
        }
    }
}
