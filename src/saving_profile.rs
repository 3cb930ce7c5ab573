//! Saving profile codec
//!
//! The backend stores a device's power-saving configuration as a fixed-width
//! digit string. Each named field owns a fixed character range:
//!
//! - `[0]`     power_saving flag (`0`/`1`)
//! - `[1]`     remote flag (`0`/`1`)
//! - `[2..6]`  on_time  `HHMM`
//! - `[6..10]` off_time `HHMM`
//!
//! Anything after offset 10 is opaque and carried through untouched.

use std::fmt;
use std::ops::Range;

use chrono::{NaiveTime, Timelike};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Shortest string that holds every field
pub const MIN_PROFILE_LEN: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileFormatError {
    #[error("Saving profile is {len} chars, at least {required} required")]
    TooShort { len: usize, required: usize },

    #[error("Saving profile contains non-ASCII data")]
    NotAscii,

    #[error("Flag {field} holds {found:?}, expected '0' or '1'")]
    InvalidFlag { field: &'static str, found: char },

    #[error("Time {field} holds {raw:?}, expected HHMM")]
    InvalidTime { field: &'static str, raw: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    PowerSaving,
    Remote,
    OnTime,
    OffTime,
}

impl ProfileField {
    pub const ALL: [ProfileField; 4] = [
        ProfileField::PowerSaving,
        ProfileField::Remote,
        ProfileField::OnTime,
        ProfileField::OffTime,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ProfileField::PowerSaving => "power_saving",
            ProfileField::Remote => "remote",
            ProfileField::OnTime => "on_time",
            ProfileField::OffTime => "off_time",
        }
    }

    fn range(self) -> Range<usize> {
        match self {
            ProfileField::PowerSaving => 0..1,
            ProfileField::Remote => 1..2,
            ProfileField::OnTime => 2..6,
            ProfileField::OffTime => 6..10,
        }
    }
}

/// A field together with its new value. The variant fixes the field, so a
/// time can never be written into a flag slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileValue {
    PowerSaving(bool),
    Remote(bool),
    OnTime(NaiveTime),
    OffTime(NaiveTime),
}

impl ProfileValue {
    pub fn field(&self) -> ProfileField {
        match self {
            ProfileValue::PowerSaving(_) => ProfileField::PowerSaving,
            ProfileValue::Remote(_) => ProfileField::Remote,
            ProfileValue::OnTime(_) => ProfileField::OnTime,
            ProfileValue::OffTime(_) => ProfileField::OffTime,
        }
    }

    fn encode(&self) -> String {
        match self {
            ProfileValue::PowerSaving(on) | ProfileValue::Remote(on) => {
                String::from(if *on { "1" } else { "0" })
            }
            ProfileValue::OnTime(t) | ProfileValue::OffTime(t) => {
                format!("{:02}{:02}", t.hour(), t.minute())
            }
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ProfileValue::PowerSaving(on) | ProfileValue::Remote(on) => Some(*on),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            ProfileValue::OnTime(t) | ProfileValue::OffTime(t) => Some(*t),
            _ => None,
        }
    }
}

fn check_shape(raw: &str) -> Result<(), ProfileFormatError> {
    if !raw.is_ascii() {
        return Err(ProfileFormatError::NotAscii);
    }
    if raw.len() < MIN_PROFILE_LEN {
        return Err(ProfileFormatError::TooShort {
            len: raw.len(),
            required: MIN_PROFILE_LEN,
        });
    }
    Ok(())
}

/// Read one field out of a raw profile string
pub fn decode_field(raw: &str, field: ProfileField) -> Result<ProfileValue, ProfileFormatError> {
    check_shape(raw)?;
    let slot = &raw[field.range()];

    match field {
        ProfileField::PowerSaving | ProfileField::Remote => {
            let on = match slot {
                "0" => false,
                "1" => true,
                _ => {
                    return Err(ProfileFormatError::InvalidFlag {
                        field: field.key(),
                        found: slot.chars().next().unwrap_or_default(),
                    })
                }
            };
            Ok(if field == ProfileField::PowerSaving {
                ProfileValue::PowerSaving(on)
            } else {
                ProfileValue::Remote(on)
            })
        }
        ProfileField::OnTime | ProfileField::OffTime => {
            let invalid = || ProfileFormatError::InvalidTime {
                field: field.key(),
                raw: slot.to_string(),
            };
            if !slot.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let hour: u32 = slot[..2].parse().map_err(|_| invalid())?;
            let minute: u32 = slot[2..].parse().map_err(|_| invalid())?;
            let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
            Ok(if field == ProfileField::OnTime {
                ProfileValue::OnTime(time)
            } else {
                ProfileValue::OffTime(time)
            })
        }
    }
}

/// Return a copy of `raw` with only the value's character range replaced
pub fn encode_field(raw: &str, value: ProfileValue) -> Result<String, ProfileFormatError> {
    check_shape(raw)?;
    let range = value.field().range();
    let mut out = String::with_capacity(raw.len());
    out.push_str(&raw[..range.start]);
    out.push_str(&value.encode());
    out.push_str(&raw[range.end..]);
    Ok(out)
}

/// Validated saving profile as reported by a device.
///
/// Only ever replaced wholesale: `with` hands back a new profile and leaves
/// `self` untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingProfile {
    raw: String,
    power_saving: bool,
    remote: bool,
    on_time: NaiveTime,
    off_time: NaiveTime,
}

impl SavingProfile {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ProfileFormatError> {
        let raw = raw.into();
        let flag = |field| decode_field(&raw, field).map(|v| v.as_flag().unwrap_or_default());
        let time = |field| decode_field(&raw, field).map(|v| v.as_time().unwrap_or_default());

        let power_saving = flag(ProfileField::PowerSaving)?;
        let remote = flag(ProfileField::Remote)?;
        let on_time = time(ProfileField::OnTime)?;
        let off_time = time(ProfileField::OffTime)?;

        Ok(Self {
            raw,
            power_saving,
            remote,
            on_time,
            off_time,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn power_saving(&self) -> bool {
        self.power_saving
    }

    pub fn remote(&self) -> bool {
        self.remote
    }

    pub fn on_time(&self) -> NaiveTime {
        self.on_time
    }

    pub fn off_time(&self) -> NaiveTime {
        self.off_time
    }

    pub fn get(&self, field: ProfileField) -> ProfileValue {
        match field {
            ProfileField::PowerSaving => ProfileValue::PowerSaving(self.power_saving),
            ProfileField::Remote => ProfileValue::Remote(self.remote),
            ProfileField::OnTime => ProfileValue::OnTime(self.on_time),
            ProfileField::OffTime => ProfileValue::OffTime(self.off_time),
        }
    }

    pub fn with(&self, value: ProfileValue) -> SavingProfile {
        let mut next = self.clone();
        let range = value.field().range();
        next.raw.replace_range(range, &value.encode());
        match value {
            ProfileValue::PowerSaving(on) => next.power_saving = on,
            ProfileValue::Remote(on) => next.remote = on,
            ProfileValue::OnTime(t) => next.on_time = t,
            ProfileValue::OffTime(t) => next.off_time = t,
        }
        next
    }
}

impl fmt::Display for SavingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for SavingProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
