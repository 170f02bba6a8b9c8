//! Partition keys and file paths.
//!
//! A partition covers one channel for one calendar year or month (UTC).
//! Its file lives at `<root>/<mapped name>:<YYYY>[_<MM>].<ext>[.<n>]`
//! where the mapped name has every configured name separator replaced by
//! the path separator, and `n` counts type-change retries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Month;

use crate::epoch::{self, EpicsTime};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionGranularity {
    Year,
    #[default]
    Month,
}

impl FromStr for PartitionGranularity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "year" | "y" => Ok(PartitionGranularity::Year),
            "month" | "m" => Ok(PartitionGranularity::Month),
            other => Err(Error::Config(format!(
                "unknown partition granularity {other:?} (expected year or month)"
            ))),
        }
    }
}

impl fmt::Display for PartitionGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionGranularity::Year => f.write_str("year"),
            PartitionGranularity::Month => f.write_str("month"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionKey {
    pub year: i32,
    pub month: Option<Month>,
}

impl PartitionKey {
    pub fn for_time(stamp: EpicsTime, granularity: PartitionGranularity) -> Result<Self> {
        let (year, month) = stamp.year_month()?;
        Ok(match granularity {
            PartitionGranularity::Year => Self { year, month: None },
            PartitionGranularity::Month => Self {
                year,
                month: Some(month),
            },
        })
    }

    /// First second of the partition.
    pub fn start(&self) -> Result<u32> {
        match self.month {
            None => epoch::start_of_year(self.year),
            Some(month) => epoch::start_of_month(self.year, month),
        }
    }

    /// First second past the partition.
    pub fn end(&self) -> Result<u32> {
        match self.month {
            None => epoch::start_of_year(self.year + 1),
            Some(Month::December) => epoch::start_of_year(self.year + 1),
            Some(month) => epoch::start_of_month(self.year, month.next()),
        }
    }

    /// First second of the key's year; record times are stored relative
    /// to it.
    pub fn year_start(&self) -> Result<u32> {
        epoch::start_of_year(self.year)
    }

    pub fn contains(&self, stamp: EpicsTime) -> Result<bool> {
        Ok(stamp.secs >= self.start()? && stamp.secs < self.end()?)
    }

    fn suffix(&self) -> String {
        match self.month {
            None => format!("{}", self.year),
            Some(month) => format!("{}_{:02}", self.year, u8::from(month)),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// Maps channel names onto partition file paths.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    name_separators: String,
    path_separator: char,
    extension: String,
}

impl PathMapper {
    pub fn new(
        root: impl Into<PathBuf>,
        name_separators: impl Into<String>,
        path_separator: char,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            name_separators: name_separators.into(),
            path_separator,
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Channel name with every separator character replaced.
    pub fn map_name(&self, channel: &str) -> String {
        channel
            .chars()
            .map(|c| {
                if self.name_separators.contains(c) {
                    self.path_separator
                } else {
                    c
                }
            })
            .collect()
    }

    pub fn partition_path(&self, channel: &str, key: PartitionKey, retry: u32) -> Result<PathBuf> {
        let mapped = self.map_name(channel);
        validate_mapped(channel, &mapped, self.path_separator)?;
        let mut name = format!("{mapped}:{key}.{}", self.extension);
        if retry > 0 {
            name.push_str(&format!(".{retry}"));
        }
        Ok(self.root.join(name))
    }
}

fn validate_mapped(channel: &str, mapped: &str, separator: char) -> Result<()> {
    let invalid = || Error::InvalidPath(format!("channel {channel:?} maps to {mapped:?}"));
    if channel.is_empty() || mapped.starts_with(separator) || mapped.contains('\0') {
        return Err(invalid());
    }
    if mapped
        .split(separator)
        .any(|component| component == "." || component == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new("/data/pb", ":-{}", '/', "pb")
    }

    #[test]
    fn maps_separators_including_trailing() {
        assert_eq!(mapper().map_name("SR:C01-BPM{X}"), "SR/C01/BPM/X/");
        let key = PartitionKey {
            year: 2017,
            month: Some(Month::February),
        };
        assert_eq!(
            mapper().partition_path("SR:C01-BPM{X}", key, 0).expect("path"),
            PathBuf::from("/data/pb/SR/C01/BPM/X/:2017_02.pb")
        );
    }

    #[test]
    fn retry_counter_suffixes_path() {
        let key = PartitionKey {
            year: 2016,
            month: None,
        };
        assert_eq!(
            mapper().partition_path("TST:pv", key, 2).expect("path"),
            PathBuf::from("/data/pb/TST/pv:2016.pb.2")
        );
    }

    #[test]
    fn rejects_escaping_names() {
        let key = PartitionKey {
            year: 2016,
            month: None,
        };
        assert!(mapper().partition_path(":abs", key, 0).is_err());
        assert!(mapper().partition_path("a:..:b", key, 0).is_err());
        assert!(mapper().partition_path("", key, 0).is_err());
    }

    #[test]
    fn december_ends_at_next_year() {
        let key = PartitionKey {
            year: 2016,
            month: Some(Month::December),
        };
        assert_eq!(key.end().expect("end"), epoch::start_of_year(2017).expect("start"));
        let year = PartitionKey {
            year: 2016,
            month: None,
        };
        assert_eq!(year.start().expect("start"), year.year_start().expect("year"));
    }

    #[test]
    fn key_for_time_uses_utc_calendar() {
        let feb = EpicsTime::new(epoch::start_of_month(2017, Month::February).expect("feb"), 0);
        let last_jan = EpicsTime::new(feb.secs - 1, 999_999_999);
        let k1 = PartitionKey::for_time(last_jan, PartitionGranularity::Month).expect("key");
        let k2 = PartitionKey::for_time(feb, PartitionGranularity::Month).expect("key");
        assert_eq!(k1.month, Some(Month::January));
        assert_eq!(k2.month, Some(Month::February));
        assert!(k1.contains(last_jan).expect("contains"));
        assert!(!k1.contains(feb).expect("contains"));
        assert_eq!(
            "YEAR".parse::<PartitionGranularity>().expect("parse"),
            PartitionGranularity::Year
        );
    }
}
