//! Partitioned output for one channel.
//!
//! [`PartitionWriter::write`] drains a positioned [`SampleCursor`] into
//! partition files. Each pass owns one file: it starts at the first sample
//! of a partition and ends when the cursor runs dry, the partition's end
//! boundary is reached, or the declared type changes. A type change (or an
//! existing file holding another type) moves the channel to the next
//! `.n` path for that partition.

mod connectivity;
mod partition;
mod transcode;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use prost::Message;

use crate::alarm::{Sentinel, SPECIAL_STATUS_THRESHOLD};
use crate::cursor::{Sample, SampleCursor};
use crate::epoch::{self, EpicsTime};
use crate::framing;
use crate::payload::DeclaredType;
use crate::proto::PayloadInfo;
use crate::resume::{LastRecordLocator, Resume, ResumeLocator};
use crate::store::ArchiveStore;
use crate::{Error, Result};

pub use connectivity::{Bracket, Connectivity};
pub use partition::{PartitionGranularity, PartitionKey, PathMapper};
pub use transcode::{format_g, FieldSnapshot, RecordHead, Transcoder};

/// Per-channel totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub records: u64,
    /// Samples already present in an existing file.
    pub skipped: u64,
    /// Sentinel rows consumed without output.
    pub gap_rows: u64,
    pub type_changes: u32,
    /// Every file a pass wrote to, in order.
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    Exhausted,
    Boundary,
    TypeChanged,
}

pub struct PartitionWriter<L: ResumeLocator = LastRecordLocator> {
    mapper: PathMapper,
    granularity: PartitionGranularity,
    locator: L,
}

impl PartitionWriter<LastRecordLocator> {
    pub fn new(mapper: PathMapper, granularity: PartitionGranularity) -> Self {
        Self::with_locator(mapper, granularity, LastRecordLocator)
    }
}

impl<L: ResumeLocator> PartitionWriter<L> {
    pub fn with_locator(mapper: PathMapper, granularity: PartitionGranularity, locator: L) -> Self {
        Self {
            mapper,
            granularity,
            locator,
        }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn granularity(&self) -> PartitionGranularity {
        self.granularity
    }

    /// Write every remaining sample of the cursor's channel.
    pub fn write<S: ArchiveStore>(&self, cursor: &mut SampleCursor<S>) -> Result<WriteStats> {
        let channel = cursor
            .channel_name()
            .map(str::to_string)
            .ok_or_else(|| Error::Schema("writer started with no channel selected".to_string()))?;
        let mut stats = WriteStats::default();
        let mut connectivity = Connectivity::default();
        let mut retry = 0u32;

        while let Some(sample) = cursor.get() {
            // Gap rows never open a file on their own.
            if let Some(sentinel) = Sentinel::from_code(sample.raw_status) {
                connectivity.disconnect(sentinel, sample.stamp);
                stats.gap_rows += 1;
                cursor.next()?;
                continue;
            }
            let declared = sample.declared;
            let key = PartitionKey::for_time(sample.stamp, self.granularity)?;
            let element_count = if declared.array {
                sample.value.element_count()
            } else {
                1
            };
            let path = self.mapper.partition_path(&channel, key, retry)?;

            let Some(mut pass) = self.open_pass(
                cursor,
                &channel,
                &path,
                key,
                declared,
                element_count,
                &mut connectivity,
                &mut stats,
            )?
            else {
                retry += 1;
                stats.type_changes += 1;
                continue;
            };
            stats.paths.push(path);
            match pass.run(cursor, &channel, &mut connectivity, &mut stats)? {
                PassEnd::Exhausted => break,
                PassEnd::Boundary => retry = 0,
                PassEnd::TypeChanged => {
                    retry += 1;
                    stats.type_changes += 1;
                }
            }
        }
        info!(
            "{channel}: {} records written, {} already present, {} gap rows",
            stats.records, stats.skipped, stats.gap_rows
        );
        Ok(stats)
    }

    /// Open `path` for a pass. `None` when the file already holds another
    /// type. Samples already present in the file are replayed through
    /// `connectivity` so a resumed file brackets gaps exactly once.
    #[allow(clippy::too_many_arguments)]
    fn open_pass<S: ArchiveStore>(
        &self,
        cursor: &mut SampleCursor<S>,
        channel: &str,
        path: &Path,
        key: PartitionKey,
        declared: DeclaredType,
        element_count: usize,
        connectivity: &mut Connectivity,
        stats: &mut WriteStats,
    ) -> Result<Option<Pass>> {
        let transcoder = Transcoder::for_type(declared)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let resume = match self.locator.locate(path, declared) {
            Err(Error::TypeMismatch { expected, found }) => {
                warn!(
                    "{}: holds {found:?}, {channel} is now {expected:?}",
                    path.display()
                );
                return Ok(None);
            }
            other => other?,
        };

        let file = match resume {
            Resume::Fresh => {
                info!("starting {}", path.display());
                let mut file = File::create(path)?;
                let header = PayloadInfo {
                    r#type: declared.payload_type() as i32,
                    pvname: channel.to_string(),
                    year: key.year,
                    element_count: Some(i32::try_from(element_count).unwrap_or(i32::MAX)),
                    headers: Vec::new(),
                };
                file.write_all(&framing::escape(&header.encode_to_vec()))?;
                file
            }
            Resume::Append {
                last,
                year,
                valid_len,
            } => {
                info!("appending to {}", path.display());
                let file = OpenOptions::new().append(true).open(path)?;
                file.set_len(valid_len)?;
                if let Some((secs, nano)) = last {
                    let base = epoch::start_of_year(year)?;
                    let last = EpicsTime::new(base.saturating_add(secs), nano);
                    let skipped =
                        cursor.skip_through(last, |sample| replay(connectivity, sample))?;
                    debug!("{channel}: skipped {skipped} samples up to {last}");
                    stats.skipped += skipped;
                }
                file
            }
        };

        Ok(Some(Pass {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            end: key.end()?,
            year_start: key.year_start()?,
            declared,
            transcoder,
            snapshot: FieldSnapshot::build(declared, cursor.metadata(), cursor.enum_states()),
            last_snapshot_day: None,
            written: 0,
        }))
    }
}

/// One open partition file.
struct Pass {
    out: BufWriter<File>,
    path: PathBuf,
    end: u32,
    year_start: u32,
    declared: DeclaredType,
    transcoder: Transcoder,
    snapshot: FieldSnapshot,
    last_snapshot_day: Option<u32>,
    written: u64,
}

impl Pass {
    fn run<S: ArchiveStore>(
        &mut self,
        cursor: &mut SampleCursor<S>,
        channel: &str,
        connectivity: &mut Connectivity,
        stats: &mut WriteStats,
    ) -> Result<PassEnd> {
        let mut frame = Vec::new();
        let end = loop {
            let Some(sample) = cursor.get() else {
                break PassEnd::Exhausted;
            };
            if sample.stamp.secs >= self.end {
                break PassEnd::Boundary;
            }
            if let Some(sentinel) = Sentinel::from_code(sample.raw_status) {
                connectivity.disconnect(sentinel, sample.stamp);
                stats.gap_rows += 1;
                cursor.next()?;
                continue;
            }
            if sample.declared != self.declared {
                warn!(
                    "{channel}: type changed from {} to {} at {}",
                    self.declared, sample.declared, sample.stamp
                );
                break PassEnd::TypeChanged;
            }

            let mut fields = Vec::new();
            warn_unusual(channel, sample);
            if is_ordinary(sample) {
                if let Some(bracket) = connectivity.reconnect(sample.stamp) {
                    fields.extend(bracket.field_values());
                }
            }
            let day = sample.stamp.day();
            let snapshot_due = !self.snapshot.is_empty() && self.last_snapshot_day != Some(day);
            if snapshot_due {
                fields.extend_from_slice(self.snapshot.fields());
            }

            let head = RecordHead::new(sample, self.year_start, fields);
            let payload = self.transcoder.encode(head, &sample.value)?;
            frame.clear();
            framing::escape_into(&payload, &mut frame);
            self.out.write_all(&frame)?;

            if snapshot_due {
                self.last_snapshot_day = Some(day);
            }
            connectivity.commit();
            self.written += 1;
            stats.records += 1;
            cursor.next()?;
        };
        self.out.flush()?;
        debug!("{}: {} records this pass ({end:?})", self.path.display(), self.written);
        Ok(end)
    }
}

/// Only ordinary samples may close a gap.
fn is_ordinary(sample: &Sample) -> bool {
    sample.raw_status < SPECIAL_STATUS_THRESHOLD
        && sample.status.is_known()
        && sample.severity.is_known()
}

/// Feed a sample that is already on disk through the gap state, as if it
/// had just been written.
fn replay(connectivity: &mut Connectivity, sample: &Sample) {
    if let Some(sentinel) = Sentinel::from_code(sample.raw_status) {
        connectivity.disconnect(sentinel, sample.stamp);
    } else if is_ordinary(sample) {
        connectivity.reconnect(sample.stamp);
        connectivity.commit();
    }
}

fn warn_unusual(channel: &str, sample: &Sample) {
    if sample.raw_status >= SPECIAL_STATUS_THRESHOLD {
        warn!(
            "{channel} {}: special status {} encountered",
            sample.stamp, sample.raw_status
        );
    } else if !sample.status.is_known() {
        warn!(
            "{channel} {}: unknown status id {} ({})",
            sample.stamp, sample.status_source, sample.status
        );
    } else if !sample.severity.is_known() {
        warn!(
            "{channel} {}: unknown severity id {} ({})",
            sample.stamp, sample.severity_source, sample.severity
        );
    }
}
