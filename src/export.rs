//! Multi-channel export driver.
//!
//! Channels are exported one after another over a single store
//! connection. A failure confined to one channel (an unwritable path, a
//! damaged partition file) is logged and recorded in the report; anything
//! that points at the database or its schema ends the run.

use log::{error, info};

use crate::config::ExportConfig;
use crate::cursor::{Located, SampleCursor};
use crate::payload::DeclaredType;
use crate::resume::ResumeLocator;
use crate::store::ArchiveStore;
use crate::writer::{PartitionWriter, WriteStats};
use crate::Result;

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub channels: Vec<String>,
    pub declared: DeclaredType,
    /// Inclusive bounds, `YYYY-MM-DD[T ]HH:MM:SS`.
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Written(WriteStats),
    NotFound,
    EmptyWindow,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub name: String,
    pub outcome: ChannelOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub channels: Vec<ChannelReport>,
}

impl ExportReport {
    pub fn records_written(&self) -> u64 {
        self.channels
            .iter()
            .map(|c| match &c.outcome {
                ChannelOutcome::Written(stats) => stats.records,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Failed(_)))
            .count()
    }

    pub fn outcome(&self, name: &str) -> Option<&ChannelOutcome> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.outcome)
    }
}

/// Export every requested channel in order.
pub fn export_channels<S: ArchiveStore, L: ResumeLocator>(
    cursor: &mut SampleCursor<S>,
    writer: &PartitionWriter<L>,
    request: &ExportRequest,
) -> Result<ExportReport> {
    let mut report = ExportReport::default();
    for name in &request.channels {
        info!("visiting {name}");
        let outcome = match export_one(cursor, writer, request, name) {
            Ok(outcome) => outcome,
            Err(err) if err.is_fatal() => {
                error!("{name}: {err}");
                return Err(err);
            }
            Err(err) => {
                error!("{name}: {err}; continuing with the next channel");
                ChannelOutcome::Failed(err.to_string())
            }
        };
        report.channels.push(ChannelReport {
            name: name.clone(),
            outcome,
        });
    }
    info!(
        "{} channels, {} records written, {} failed",
        report.channels.len(),
        report.records_written(),
        report.failures()
    );
    Ok(report)
}

fn export_one<S: ArchiveStore, L: ResumeLocator>(
    cursor: &mut SampleCursor<S>,
    writer: &PartitionWriter<L>,
    request: &ExportRequest,
    name: &str,
) -> Result<ChannelOutcome> {
    let located = cursor.find(
        name,
        request.declared,
        request.start.as_deref(),
        request.end.as_deref(),
    )?;
    match located {
        Located::ChannelNotFound => {
            info!("{name}: channel not found");
            return Ok(ChannelOutcome::NotFound);
        }
        Located::EmptyWindow => {
            info!("{name}: no samples in the query window");
            return Ok(ChannelOutcome::EmptyWindow);
        }
        Located::First(_) => {}
    }
    Ok(ChannelOutcome::Written(writer.write(cursor)?))
}

/// Open the configured store and export `request` with default resume
/// handling.
pub fn run(config: &ExportConfig, request: &ExportRequest) -> Result<ExportReport> {
    config.validate()?;
    let store = config.store_location()?.open()?;
    let mut cursor = SampleCursor::open(store, config.cursor_options()?)?;
    let writer = PartitionWriter::new(config.path_mapper(), config.partition);
    export_channels(&mut cursor, &writer, request)
}
