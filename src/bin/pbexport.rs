use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use pbexport::export::{self, ChannelOutcome};
use pbexport::{DeclaredType, ExportConfig, ExportRequest, PartitionGranularity, ValueKind};

#[derive(Parser, Debug)]
#[command(name = "pbexport")]
#[command(about = "Export RDB archiver channels into Archiver Appliance .pb partitions")]
#[command(
    after_help = "Example:\n  pbexport -s 2017-02-01T00:00:00 -e 2017-02-02T00:00:00 \
                  -t DBR_TIME_DOUBLE SOME:PVNAME"
)]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output directory (overrides the config file)
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Start of the query window (YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD HH:MM:SS)
    #[arg(short, long)]
    start: Option<String>,

    /// End of the query window, inclusive to the second
    #[arg(short, long)]
    end: Option<String>,

    /// DBR_TIME_xxx type of the channels, by name (DBR_TIME_ENUM) or number (17)
    #[arg(short = 't', long = "type", value_parser = parse_kind)]
    kind: ValueKind,

    /// Channels hold waveforms rather than scalars
    #[arg(long)]
    array: bool,

    /// Partition granularity: year or month
    #[arg(long, value_parser = parse_partition)]
    partition: Option<PartitionGranularity>,

    /// `sqlite:<path>` or a PostgreSQL connection string
    #[arg(long)]
    database: Option<String>,

    /// Offset of database timestamps, e.g. +09:00
    #[arg(long)]
    utc_offset: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Channel names
    #[arg(required = true)]
    channels: Vec<String>,
}

fn parse_kind(value: &str) -> std::result::Result<ValueKind, String> {
    value.parse().map_err(|err: pbexport::Error| err.to_string())
}

fn parse_partition(value: &str) -> std::result::Result<PartitionGranularity, String> {
    value.parse().map_err(|err: pbexport::Error| err.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExportConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(partition) = cli.partition {
        config.partition = partition;
    }
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(offset) = cli.utc_offset {
        config.utc_offset = offset;
    }

    let declared = DeclaredType {
        kind: cli.kind,
        array: cli.array,
    };
    info!(
        "exporting {} channels as {declared} into {} ({} partitions)",
        cli.channels.len(),
        config.output_dir.display(),
        config.partition
    );
    let request = ExportRequest {
        channels: cli.channels,
        declared,
        start: cli.start,
        end: cli.end,
    };
    let report = export::run(&config, &request).context("export aborted")?;
    for channel in &report.channels {
        match &channel.outcome {
            ChannelOutcome::Written(stats) => info!(
                "{}: {} records in {} files",
                channel.name,
                stats.records,
                stats.paths.len()
            ),
            ChannelOutcome::NotFound => info!("{}: not found", channel.name),
            ChannelOutcome::EmptyWindow => info!("{}: no data", channel.name),
            ChannelOutcome::Failed(reason) => error!("{}: {reason}", channel.name),
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
