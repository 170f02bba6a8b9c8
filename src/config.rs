//! Export configuration.
//!
//! Settings come from an optional JSON file; every field has a default so
//! a partial file (or none at all) is valid. Command-line flags are applied
//! on top by the binary.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use serde::{Deserialize, Serialize};

use crate::cursor::{CursorOptions, DEFAULT_FETCH_SIZE};
use crate::epoch;
use crate::store::ArchiveStore;
use crate::writer::{PartitionGranularity, PathMapper};
use crate::{Error, Result};

pub const DEFAULT_NAME_SEPARATORS: &str = ":-{}";
pub const DEFAULT_EXTENSION: &str = "pb";
pub const DEFAULT_DATABASE: &str = "host=localhost dbname=archive user=report";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Root directory of the partition tree.
    /// Default: current directory
    pub output_dir: PathBuf,

    /// Partition granularity.
    /// Default: month
    pub partition: PartitionGranularity,

    /// Characters of a channel name that become directory separators.
    /// Default: `:-{}`
    pub name_separators: String,

    /// Default: the platform separator
    pub path_separator: char,

    /// Partition file extension, without the dot.
    /// Default: pb
    pub extension: String,

    /// Offset of the database's wall-clock timestamps, `+HH:MM`.
    /// Default: +00:00
    pub utc_offset: String,

    /// Sample rows per round trip.
    /// Default: 1000
    pub fetch_size: usize,

    /// `sqlite:<path>` or a PostgreSQL connection string.
    pub database: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            partition: PartitionGranularity::Month,
            name_separators: DEFAULT_NAME_SEPARATORS.to_string(),
            path_separator: MAIN_SEPARATOR,
            extension: DEFAULT_EXTENSION.to_string(),
            utc_offset: "+00:00".to_string(),
            fetch_size: DEFAULT_FETCH_SIZE,
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl ExportConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(Error::Config("fetch_size must be positive".to_string()));
        }
        if self.extension.is_empty() || self.extension.contains(self.path_separator) {
            return Err(Error::Config(format!(
                "invalid extension {:?}",
                self.extension
            )));
        }
        if self.name_separators.contains('.') {
            return Err(Error::Config(
                "name_separators must not contain '.'".to_string(),
            ));
        }
        epoch::parse_offset(&self.utc_offset)?;
        StoreLocation::parse(&self.database)?;
        Ok(())
    }

    pub fn cursor_options(&self) -> Result<CursorOptions> {
        Ok(CursorOptions {
            utc_offset: epoch::parse_offset(&self.utc_offset)?,
            fetch_size: self.fetch_size,
        })
    }

    pub fn path_mapper(&self) -> PathMapper {
        PathMapper::new(
            &self.output_dir,
            self.name_separators.clone(),
            self.path_separator,
            self.extension.clone(),
        )
    }

    pub fn store_location(&self) -> Result<StoreLocation> {
        StoreLocation::parse(&self.database)
    }
}

/// Where the archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Sqlite(PathBuf),
    Postgres(String),
}

impl StoreLocation {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Config("database is empty".to_string()));
        }
        if let Some(rest) = value.strip_prefix("sqlite:") {
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(Error::Config("sqlite database path is empty".to_string()));
            }
            return Ok(StoreLocation::Sqlite(PathBuf::from(path)));
        }
        Ok(StoreLocation::Postgres(value.to_string()))
    }

    pub fn open(&self) -> Result<Box<dyn ArchiveStore>> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreLocation::Sqlite(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "sqlite archive {} does not exist",
                        path.display()
                    )));
                }
                Ok(Box::new(crate::store::SqliteStore::open(path)?))
            }
            #[cfg(feature = "postgres")]
            StoreLocation::Postgres(params) => {
                Ok(Box::new(crate::store::PostgresStore::connect(params)?))
            }
            #[allow(unreachable_patterns)]
            other => Err(Error::Config(format!(
                "{other:?} needs a backend this build was compiled without"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ExportConfig =
            serde_json::from_str(r#"{"partition":"year","fetch_size":50}"#).expect("parse");
        assert_eq!(config.partition, PartitionGranularity::Year);
        assert_eq!(config.fetch_size, 50);
        assert_eq!(config.name_separators, ":-{}");
        assert_eq!(config.extension, "pb");
        config.validate().expect("valid");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = ExportConfig::default();
        config.fetch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ExportConfig::default();
        config.utc_offset = "nine".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn store_locations() {
        assert_eq!(
            StoreLocation::parse("sqlite:/tmp/a.db").expect("parse"),
            StoreLocation::Sqlite(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(
            StoreLocation::parse("sqlite:///tmp/a.db").expect("parse"),
            StoreLocation::Sqlite(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(
            StoreLocation::parse("host=db user=report").expect("parse"),
            StoreLocation::Postgres("host=db user=report".to_string())
        );
        assert!(StoreLocation::parse("sqlite:").is_err());
    }
}
