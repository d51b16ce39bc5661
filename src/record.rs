//! Sensor records and their wire grammar.
//!
//! One record is one line of ASCII, identical on the radio link and in flash:
//!
//! ```text
//! \r$<tag>,<value>,<weekday>,<hour>,<minute>,<second>\n
//! ```
//!
//! `tag` is `ec` (ECG voltage, 3 decimals) or `ox` (SpO2 percentage, 2 decimals).

use crate::error::{AppResult, NodeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record terminator; also the token separator when scanning the log.
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Measurement channel of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    /// ECG electrode voltage in volts
    Ecg,
    /// Blood oxygen saturation in percent
    Spo2,
}

impl Tag {
    /// Two-letter code used on the wire
    pub fn code(self) -> &'static str {
        match self {
            Tag::Ecg => "ec",
            Tag::Spo2 => "ox",
        }
    }

    /// Number of decimals the value is printed with
    pub fn precision(self) -> usize {
        match self {
            Tag::Ecg => 3,
            Tag::Spo2 => 2,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "ec" => Some(Tag::Ecg),
            "ox" => Some(Tag::Spo2),
            _ => None,
        }
    }
}

/// Wall-clock fields carried by every record (RTC resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Day of week, 0 = Sunday
    pub weekday: u8,
    /// 0-23
    pub hour: u8,
    /// 0-59
    pub minute: u8,
    /// 0-59
    pub second: u8,
}

impl Timestamp {
    /// Build a timestamp, rejecting out-of-range fields.
    pub fn new(weekday: u8, hour: u8, minute: u8, second: u8) -> AppResult<Self> {
        if weekday > 6 || hour > 23 || minute > 59 || second > 59 {
            return Err(NodeError::HardwareFault(format!(
                "RTC returned invalid time {weekday} {hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self {
            weekday,
            hour,
            minute,
            second,
        })
    }
}

/// A single timestamped measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Channel
    pub tag: Tag,
    /// Measured value (volts or percent)
    pub value: f32,
    /// Time of measurement
    pub timestamp: Timestamp,
}

impl Record {
    /// ECG voltage record
    pub fn ecg(volts: f32, timestamp: Timestamp) -> Self {
        Self {
            tag: Tag::Ecg,
            value: volts,
            timestamp,
        }
    }

    /// SpO2 percentage record
    pub fn spo2(percent: f32, timestamp: Timestamp) -> Self {
        Self {
            tag: Tag::Spo2,
            value: percent,
            timestamp,
        }
    }

    /// Wire/flash encoding of the record, terminator included
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse one token as produced by [`FlashLog::read_all`](crate::storage::FlashLog::read_all).
    ///
    /// Leading `\r` and the trailing `\n` are optional.
    pub fn parse(token: &[u8]) -> AppResult<Self> {
        let text = std::str::from_utf8(token)
            .map_err(|_| malformed(token, "not ASCII"))?
            .trim_end_matches(['\n', '\r'])
            .trim_start_matches('\r');
        let body = text
            .strip_prefix('$')
            .ok_or_else(|| malformed(token, "missing '$'"))?;

        let mut fields = body.split(',');
        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| malformed(token, &format!("missing {name}")))
        };

        let tag = Tag::from_code(next("tag")?).ok_or_else(|| malformed(token, "unknown tag"))?;
        let value: f32 = next("value")?
            .parse()
            .map_err(|_| malformed(token, "bad value"))?;
        let mut int = |name: &str| -> AppResult<u8> {
            next(name)?
                .parse()
                .map_err(|_| malformed(token, &format!("bad {name}")))
        };
        let weekday = int("weekday")?;
        let hour = int("hour")?;
        let minute = int("minute")?;
        let second = int("second")?;
        if fields.next().is_some() {
            return Err(malformed(token, "trailing fields"));
        }

        let timestamp = Timestamp::new(weekday, hour, minute, second)
            .map_err(|_| malformed(token, "timestamp out of range"))?;
        Ok(Self {
            tag,
            value,
            timestamp,
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = &self.timestamp;
        write!(
            f,
            "\r${},{:.*},{},{},{},{}\n",
            self.tag.code(),
            self.tag.precision(),
            self.value,
            ts.weekday,
            ts.hour,
            ts.minute,
            ts.second
        )
    }
}

fn malformed(token: &[u8], reason: &str) -> NodeError {
    NodeError::MalformedRecord(format!(
        "{:?}: {reason}",
        String::from_utf8_lossy(token)
    ))
}
