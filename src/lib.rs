//! Export RDB archiver samples into Archiver Appliance partition files.
//!
//! The pipeline for one channel is:
//!
//! 1. [`SampleCursor`] resolves the channel in an [`ArchiveStore`] and
//!    streams its samples in time order, canonicalizing alarm ids through
//!    the [`alarm::AlarmCatalog`].
//! 2. [`PartitionWriter`] splits the stream into yearly or monthly
//!    partition files, brackets disconnect gaps, embeds daily metadata
//!    snapshots and frames each protobuf record on its own line.
//! 3. Existing files are resumed through a [`resume::ResumeLocator`], so a
//!    rerun appends only what is missing.
//!
//! [`export::export_channels`] drives this over a list of channels.

pub mod alarm;
pub mod config;
pub mod cursor;
pub mod epoch;
pub mod error;
pub mod export;
pub mod framing;
pub mod payload;
pub mod proto;
pub mod resume;
pub mod store;
pub mod writer;

pub use config::ExportConfig;
pub use cursor::{CursorOptions, Located, Sample, SampleCursor};
pub use error::{Error, Result};
pub use export::{export_channels, ChannelOutcome, ExportReport, ExportRequest};
pub use payload::{DeclaredType, SampleValue, ValueKind};
pub use store::ArchiveStore;
pub use writer::{PartitionGranularity, PartitionWriter, WriteStats};
