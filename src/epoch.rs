//! Archiver-epoch timestamps and calendar boundaries.
//!
//! Sample times are carried as seconds since 1990-01-01 UTC plus a
//! nanosecond fraction. Calendar arithmetic (years, months, days) is always
//! UTC; wall-clock literals from the command line and from the database are
//! interpreted at a configured offset.

use std::fmt;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::{Error, Result};

/// Unix time of 1990-01-01T00:00:00Z.
pub const POSIX_TIME_AT_EPICS_EPOCH: i64 = 631_152_000;
pub const SECONDS_PER_DAY: u32 = 86_400;

const LITERAL_T: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const LITERAL_SPACE: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const OFFSET: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EpicsTime {
    pub secs: u32,
    pub nanos: u32,
}

impl EpicsTime {
    pub fn new(secs: u32, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn from_unix(unix_secs: i64, nanos: u32) -> Result<Self> {
        if nanos >= 1_000_000_000 {
            return Err(Error::InvalidTime(format!("nanoseconds out of range: {nanos}")));
        }
        let secs = unix_secs - POSIX_TIME_AT_EPICS_EPOCH;
        let secs = u32::try_from(secs).map_err(|_| {
            Error::InvalidTime(format!("unix time {unix_secs} outside archiver epoch"))
        })?;
        Ok(Self { secs, nanos })
    }

    pub fn unix_secs(&self) -> i64 {
        i64::from(self.secs) + POSIX_TIME_AT_EPICS_EPOCH
    }

    /// UTC day number, used to detect the first record of a new day.
    pub fn day(&self) -> u32 {
        self.secs / SECONDS_PER_DAY
    }

    pub fn to_utc(&self) -> Result<OffsetDateTime> {
        Ok(OffsetDateTime::from_unix_timestamp(self.unix_secs())?)
    }

    pub fn year(&self) -> Result<i32> {
        Ok(self.to_utc()?.year())
    }

    pub fn year_month(&self) -> Result<(i32, Month)> {
        let utc = self.to_utc()?;
        Ok((utc.year(), utc.month()))
    }
}

impl fmt::Display for EpicsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utc() {
            Ok(utc) => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
                utc.year(),
                u8::from(utc.month()),
                utc.day(),
                utc.hour(),
                utc.minute(),
                utc.second(),
                self.nanos
            ),
            Err(_) => write!(f, "{}.{:09}", self.secs, self.nanos),
        }
    }
}

/// First second of `year` (UTC) in archiver-epoch seconds.
pub fn start_of_year(year: i32) -> Result<u32> {
    start_of_month(year, Month::January)
}

/// First second of `month` in `year` (UTC) in archiver-epoch seconds.
pub fn start_of_month(year: i32, month: Month) -> Result<u32> {
    let date = Date::from_calendar_date(year, month, 1)?;
    let unix = date.midnight().assume_utc().unix_timestamp();
    Ok(EpicsTime::from_unix(unix, 0)?.secs)
}

/// Parse a command-line time bound; both `YYYY-MM-DDTHH:MM:SS` and
/// `YYYY-MM-DD HH:MM:SS` are accepted.
pub fn parse_literal(value: &str) -> Result<PrimitiveDateTime> {
    let value = value.trim();
    PrimitiveDateTime::parse(value, LITERAL_T)
        .or_else(|_| PrimitiveDateTime::parse(value, LITERAL_SPACE))
        .map_err(|_| Error::InvalidTime(format!("unrecognised time literal: {value}")))
}

pub fn format_literal(value: PrimitiveDateTime) -> String {
    value
        .format(LITERAL_T)
        .unwrap_or_else(|_| value.to_string())
}

/// Format a wall-clock time the way the RDB stores it.
pub fn format_sql(value: PrimitiveDateTime) -> String {
    value
        .format(LITERAL_SPACE)
        .unwrap_or_else(|_| value.to_string())
}

/// Parse a timestamp column rendered as text. Any fractional part is
/// ignored; the fraction lives in its own column.
pub fn parse_db_timestamp(value: &str) -> Result<PrimitiveDateTime> {
    let whole = value.split('.').next().unwrap_or(value);
    parse_literal(whole)
}

/// Drop any sub-second part of a wall-clock time.
pub fn truncate_fraction(value: PrimitiveDateTime) -> Result<PrimitiveDateTime> {
    let time = Time::from_hms(value.hour(), value.minute(), value.second())?;
    Ok(PrimitiveDateTime::new(value.date(), time))
}

pub fn parse_offset(value: &str) -> Result<UtcOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(value, OFFSET)
        .map_err(|_| Error::Config(format!("invalid utc offset (expected +HH:MM): {value}")))
}

/// Convert a wall-clock time at `offset` plus a nanosecond column into an
/// archiver timestamp.
pub fn wall_to_epics(wall: PrimitiveDateTime, offset: UtcOffset, nanos: u32) -> Result<EpicsTime> {
    let unix = wall.assume_offset(offset).unix_timestamp();
    EpicsTime::from_unix(unix, nanos)
}

pub fn one_second_later(wall: PrimitiveDateTime) -> Result<PrimitiveDateTime> {
    wall.checked_add(Duration::SECOND)
        .ok_or_else(|| Error::InvalidTime(format!("{wall} has no successor")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn epoch_origin_is_1990() {
        let t = EpicsTime::from_unix(POSIX_TIME_AT_EPICS_EPOCH, 0).expect("epoch");
        assert_eq!(t.secs, 0);
        assert_eq!(t.year().expect("year"), 1990);
        assert!(EpicsTime::from_unix(POSIX_TIME_AT_EPICS_EPOCH - 1, 0).is_err());
    }

    #[test]
    fn both_literal_formats_parse() {
        let a = parse_literal("2017-02-01T00:00:00").expect("T form");
        let b = parse_literal("2017-02-01 00:00:00").expect("space form");
        assert_eq!(a, b);
        assert_eq!(a, datetime!(2017-02-01 00:00:00));
        assert!(parse_literal("2017/02/01 00:00:00").is_err());
    }

    #[test]
    fn db_timestamp_fraction_is_dropped() {
        let t = parse_db_timestamp("2017-01-31 23:59:59.987654").expect("parse");
        assert_eq!(t, datetime!(2017-01-31 23:59:59));
    }

    #[test]
    fn month_boundaries_roll_into_next_year() {
        let dec = start_of_month(2016, Month::December).expect("dec");
        let next = start_of_year(2017).expect("jan");
        assert_eq!(next - dec, 31 * SECONDS_PER_DAY);
    }

    #[test]
    fn offsets_shift_wall_clock() {
        let offset = parse_offset("+09:00").expect("offset");
        let wall = datetime!(2017-01-01 09:00:00);
        let t = wall_to_epics(wall, offset, 5).expect("convert");
        assert_eq!(t.secs, start_of_year(2017).expect("start"));
        assert_eq!(t.nanos, 5);
        assert_eq!(parse_offset("utc").expect("utc"), UtcOffset::UTC);
    }

    #[test]
    fn day_number_matches_utc_days() {
        let t = EpicsTime::new(SECONDS_PER_DAY * 3 - 1, 0);
        assert_eq!(t.day(), 2);
        assert_eq!(EpicsTime::new(SECONDS_PER_DAY * 3, 0).day(), 3);
    }
}
