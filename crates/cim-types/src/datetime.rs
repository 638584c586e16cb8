//! CIM datetime values: point-in-time timestamps and intervals.
//!
//! The wire format is a fixed 25 character string:
//! `yyyymmddhhmmss.mmmmmmsutc` for timestamps (`s` is `+` or `-`, `utc` the
//! offset in minutes) and `ddddddddhhmmss.mmmmmm:000` for intervals. Trailing
//! digits of the value part may be replaced by `*` to reduce precision.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

use crate::CimError;

const DATETIME_LEN: usize = 25;
/// Index of the `.` separating seconds from microseconds.
const DOT_POS: usize = 14;
/// Index of the sign character (`+`, `-` or `:`).
const SIGN_POS: usize = 21;

/// Parsed form of a CIM datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeKind {
    /// Point in time with a fixed UTC offset.
    Timestamp(DateTime<FixedOffset>),
    /// Time interval.
    Interval {
        days: u32,
        hours: u32,
        minutes: u32,
        seconds: u32,
        microseconds: u32,
    },
}

/// A validated CIM datetime value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CimDateTime {
    text: String,
    kind: DateTimeKind,
    precision: Option<usize>,
}

impl CimDateTime {
    /// Build a timestamp from a chrono datetime (full precision).
    pub fn from_timestamp(dt: DateTime<FixedOffset>) -> Self {
        let offset_min = dt.offset().local_minus_utc() / 60;
        let sign = if offset_min < 0 { '-' } else { '+' };
        let text = format!(
            "{}.{:06}{}{:03}",
            dt.format("%Y%m%d%H%M%S"),
            dt.timestamp_subsec_micros(),
            sign,
            offset_min.unsigned_abs()
        );
        Self {
            text,
            kind: DateTimeKind::Timestamp(dt),
            precision: None,
        }
    }

    /// Build an interval value.
    pub fn interval(
        days: u32,
        hours: u32,
        minutes: u32,
        seconds: u32,
        microseconds: u32,
    ) -> Result<Self, CimError> {
        if days > 99_999_999 || hours > 23 || minutes > 59 || seconds > 59 || microseconds > 999_999
        {
            return Err(CimError::value(format!(
                "interval field out of range: {days}d {hours}h {minutes}m {seconds}s {microseconds}us"
            )));
        }
        let text = format!("{days:08}{hours:02}{minutes:02}{seconds:02}.{microseconds:06}:000");
        Ok(Self {
            text,
            kind: DateTimeKind::Interval {
                days,
                hours,
                minutes,
                seconds,
                microseconds,
            },
            precision: None,
        })
    }

    pub fn kind(&self) -> DateTimeKind {
        self.kind
    }

    pub fn is_interval(&self) -> bool {
        matches!(self.kind, DateTimeKind::Interval { .. })
    }

    /// Index of the first `*` wildcard, if the value has reduced precision.
    pub fn precision(&self) -> Option<usize> {
        self.precision
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CimDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for CimDateTime {
    type Err = CimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = |why: &str| CimError::value(format!("invalid CIM datetime {text:?}: {why}"));
        if text.len() != DATETIME_LEN || !text.is_ascii() {
            return Err(invalid("must be 25 ASCII characters"));
        }
        let bytes = text.as_bytes();
        if bytes[DOT_POS] != b'.' {
            return Err(invalid("missing '.' separator"));
        }

        let mut precision = None;
        for (idx, &b) in bytes[..SIGN_POS].iter().enumerate() {
            if idx == DOT_POS {
                continue;
            }
            match (b, precision) {
                (b'*', None) => precision = Some(idx),
                (b'*', Some(_)) => {}
                (b'0'..=b'9', None) => {}
                (b'0'..=b'9', Some(_)) => return Err(invalid("digit after wildcard")),
                _ => return Err(invalid("unexpected character in value part")),
            }
        }
        let tail = &text[SIGN_POS + 1..];
        if !tail.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("offset must be three digits"));
        }

        // Wildcarded digits count as zero, except month/day which default to 1.
        let field = |start: usize, end: usize, fill: u32| -> u32 {
            let part = &text[start..end];
            if part.contains('*') {
                let digits: String = part.chars().take_while(|c| *c != '*').collect();
                if digits.is_empty() {
                    return fill;
                }
                let scale = 10u32.pow((part.len() - digits.len()) as u32);
                return digits.parse::<u32>().map(|v| v * scale).unwrap_or(fill);
            }
            part.parse().unwrap_or(0)
        };

        let kind = match bytes[SIGN_POS] {
            b':' => {
                if tail != "000" {
                    return Err(invalid("interval must end in ':000'"));
                }
                let hours = field(8, 10, 0);
                let minutes = field(10, 12, 0);
                let seconds = field(12, 14, 0);
                if hours > 23 || minutes > 59 || seconds > 59 {
                    return Err(invalid("interval field out of range"));
                }
                DateTimeKind::Interval {
                    days: field(0, 8, 0),
                    hours,
                    minutes,
                    seconds,
                    microseconds: field(15, 21, 0),
                }
            }
            sign @ (b'+' | b'-') => {
                let minutes: i32 = tail.parse().map_err(|_| invalid("bad UTC offset"))?;
                let offset_secs = minutes * 60 * if sign == b'-' { -1 } else { 1 };
                let offset =
                    FixedOffset::east_opt(offset_secs).ok_or_else(|| invalid("UTC offset out of range"))?;
                let date = NaiveDate::from_ymd_opt(
                    field(0, 4, 0) as i32,
                    field(4, 6, 1).max(1),
                    field(6, 8, 1).max(1),
                )
                .ok_or_else(|| invalid("date out of range"))?;
                let naive = date
                    .and_hms_micro_opt(
                        field(8, 10, 0),
                        field(10, 12, 0),
                        field(12, 14, 0),
                        field(15, 21, 0),
                    )
                    .ok_or_else(|| invalid("time out of range"))?;
                let dt = offset
                    .from_local_datetime(&naive)
                    .single()
                    .ok_or_else(|| invalid("ambiguous local time"))?;
                DateTimeKind::Timestamp(dt)
            }
            _ => return Err(invalid("expected '+', '-' or ':' at position 21")),
        };

        Ok(Self {
            text: text.to_string(),
            kind,
            precision,
        })
    }
}
