//! Backing-store contract.
//!
//! The exporter reads an RDB archiver schema (`channel`, `severity`,
//! `status`, `num_metadata`, `enum_metadata`, `sample`). Each adapter
//! returns plain rows; decoding and validation happen in [`crate::cursor`].
//!
//! Samples are streamed: `open_samples` starts an ordered query, repeated
//! `fetch_samples` calls page through it, and `close_samples` releases it.
//! Only one sample stream is open at a time.

use time::PrimitiveDateTime;

use crate::Result;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteStore;

/// One row of the `severity` or `status` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRow {
    pub id: i64,
    pub label: String,
}

/// One row of `num_metadata`. NULL columns stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRow {
    pub low_disp_rng: Option<f64>,
    pub high_disp_rng: Option<f64>,
    pub low_warn_lmt: Option<f64>,
    pub high_warn_lmt: Option<f64>,
    pub low_alarm_lmt: Option<f64>,
    pub high_alarm_lmt: Option<f64>,
    pub prec: Option<i64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumRow {
    pub ordinal: i64,
    pub label: Option<String>,
}

/// One row of `sample`, as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    /// Wall-clock time without fraction; the fraction is `nanosecs`.
    pub smpl_time: PrimitiveDateTime,
    pub nanosecs: i64,
    pub severity_id: i64,
    pub status_id: i64,
    pub num_val: Option<i64>,
    pub float_val: Option<f64>,
    pub str_val: Option<String>,
    pub datatype: Option<String>,
    pub array_val: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    First,
    Last,
}

/// Half-open `[start, end)` range of wall-clock sample times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: PrimitiveDateTime,
    pub end: PrimitiveDateTime,
}

pub trait ArchiveStore {
    /// Severity table ordered by id.
    fn severities(&mut self) -> Result<Vec<AlarmRow>>;

    /// Status table ordered by id.
    fn statuses(&mut self) -> Result<Vec<AlarmRow>>;

    /// Every `channel_id` whose name matches exactly.
    fn channel_ids(&mut self, name: &str) -> Result<Vec<i64>>;

    fn metadata(&mut self, channel_id: i64) -> Result<Vec<MetadataRow>>;

    /// Enum labels ordered by ordinal.
    fn enum_states(&mut self, channel_id: i64) -> Result<Vec<EnumRow>>;

    /// Earliest or latest `smpl_time` of the channel, `None` if it has no
    /// samples.
    fn sample_extent(&mut self, channel_id: i64, edge: Edge) -> Result<Option<PrimitiveDateTime>>;

    /// Start streaming samples ordered by `(smpl_time, nanosecs)`. Any
    /// previously open stream is closed first.
    fn open_samples(&mut self, channel_id: i64, window: &QueryWindow) -> Result<()>;

    /// Up to `max` further rows. An empty batch means the stream is drained.
    fn fetch_samples(&mut self, max: usize) -> Result<Vec<SampleRow>>;

    /// Release the open stream. Calling it with no open stream is a no-op.
    fn close_samples(&mut self) -> Result<()>;
}

impl<T: ArchiveStore + ?Sized> ArchiveStore for Box<T> {
    fn severities(&mut self) -> Result<Vec<AlarmRow>> {
        (**self).severities()
    }

    fn statuses(&mut self) -> Result<Vec<AlarmRow>> {
        (**self).statuses()
    }

    fn channel_ids(&mut self, name: &str) -> Result<Vec<i64>> {
        (**self).channel_ids(name)
    }

    fn metadata(&mut self, channel_id: i64) -> Result<Vec<MetadataRow>> {
        (**self).metadata(channel_id)
    }

    fn enum_states(&mut self, channel_id: i64) -> Result<Vec<EnumRow>> {
        (**self).enum_states(channel_id)
    }

    fn sample_extent(&mut self, channel_id: i64, edge: Edge) -> Result<Option<PrimitiveDateTime>> {
        (**self).sample_extent(channel_id, edge)
    }

    fn open_samples(&mut self, channel_id: i64, window: &QueryWindow) -> Result<()> {
        (**self).open_samples(channel_id, window)
    }

    fn fetch_samples(&mut self, max: usize) -> Result<Vec<SampleRow>> {
        (**self).fetch_samples(max)
    }

    fn close_samples(&mut self) -> Result<()> {
        (**self).close_samples()
    }
}
