#![allow(dead_code)]

use std::path::{Path, PathBuf};

use prost::Message;
use rusqlite::params;

use pbexport::cursor::CursorOptions;
use pbexport::epoch;
use pbexport::export::{export_channels, ExportReport, ExportRequest};
use pbexport::framing;
use pbexport::proto::{FieldValue, PayloadInfo, SampleKey};
use pbexport::store::SqliteStore;
use pbexport::writer::{PartitionGranularity, PartitionWriter, PathMapper};
use pbexport::{DeclaredType, SampleCursor, ValueKind};

pub const SEV_OK: i64 = 1;
pub const SEV_MINOR: i64 = 2;
pub const SEV_MAJOR: i64 = 3;
pub const SEV_INVALID: i64 = 4;

pub const STAT_OK: i64 = 1;
pub const STAT_HIHI: i64 = 2;
pub const STAT_DISCONNECTED: i64 = 3;
pub const STAT_ARCHIVE_OFF: i64 = 4;
pub const STAT_ARCHIVE_DISABLED: i64 = 5;
pub const STAT_WRITE_ERROR: i64 = 6;

/// An on-disk SQLite archive with the standard alarm tables.
pub struct Archive {
    pub db: PathBuf,
    pub out: PathBuf,
}

impl Archive {
    pub fn create(dir: &Path) -> Self {
        let db = dir.join("archive.db");
        let out = dir.join("pb");
        let store = SqliteStore::open(&db).expect("open archive");
        store.create_schema().expect("schema");
        store
            .connection()
            .execute_batch(
                "INSERT INTO severity VALUES (1, 'OK'), (2, 'MINOR'), (3, 'MAJOR'), (4, 'INVALID');
                 INSERT INTO status VALUES
                    (1, 'NO_ALARM'), (2, 'HIHI_ALARM'), (3, 'Disconnected'),
                    (4, 'Archive_Off'), (5, 'Archive_Disabled'), (6, 'Write_Error');",
            )
            .expect("alarm tables");
        Self { db, out }
    }

    pub fn store(&self) -> SqliteStore {
        SqliteStore::open(&self.db).expect("open archive")
    }

    pub fn sql(&self, sql: &str) {
        self.store()
            .connection()
            .execute_batch(sql)
            .expect("execute sql");
    }

    pub fn channel(&self, id: i64, name: &str) {
        self.store()
            .connection()
            .execute("INSERT INTO channel VALUES (?1, ?2)", params![id, name])
            .expect("insert channel");
    }

    pub fn limits(&self, id: i64, high: f64, low: f64, units: &str) {
        self.store()
            .connection()
            .execute(
                "INSERT INTO num_metadata VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 3, ?8)",
                params![id, low, high, low + 1.0, high - 1.0, low + 0.5, high - 0.5, units],
            )
            .expect("insert metadata");
    }

    pub fn float(&self, id: i64, time: &str, nanos: i64, severity: i64, status: i64, value: f64) {
        self.store()
            .connection()
            .execute(
                "INSERT INTO sample (channel_id, smpl_time, nanosecs, severity_id, status_id,
                     float_val)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, time, nanos, severity, status, value],
            )
            .expect("insert sample");
    }

    /// A value-less archiver bookkeeping row.
    pub fn gap(&self, id: i64, time: &str, status: i64) {
        self.store()
            .connection()
            .execute(
                "INSERT INTO sample (channel_id, smpl_time, nanosecs, severity_id, status_id,
                     str_val)
                 VALUES (?1, ?2, 0, ?3, ?4, 'Disconnected')",
                params![id, time, SEV_INVALID, status],
            )
            .expect("insert gap");
    }

    pub fn doubles(&self, id: i64, time: &str, values: &[f64]) {
        let blob: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.store()
            .connection()
            .execute(
                "INSERT INTO sample (channel_id, smpl_time, nanosecs, severity_id, status_id,
                     datatype, array_val)
                 VALUES (?1, ?2, 0, ?3, ?4, 'd', ?5)",
                params![id, time, SEV_OK, STAT_OK, blob],
            )
            .expect("insert array");
    }

    pub fn writer(&self) -> PartitionWriter {
        PartitionWriter::new(
            PathMapper::new(&self.out, ":-{}", '/', "pb"),
            PartitionGranularity::Month,
        )
    }

    pub fn export(
        &self,
        channels: &[&str],
        start: Option<&str>,
        end: Option<&str>,
    ) -> pbexport::Result<ExportReport> {
        let mut cursor = SampleCursor::open(self.store(), CursorOptions::default())?;
        let request = ExportRequest {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            declared: DeclaredType::scalar(ValueKind::Double),
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        };
        export_channels(&mut cursor, &self.writer(), &request)
    }
}

/// Decoded partition file: header plus the raw payload of every record.
pub struct Partition {
    pub header: PayloadInfo,
    pub records: Vec<Vec<u8>>,
}

impl Partition {
    pub fn read(path: &Path) -> Self {
        let bytes = std::fs::read(path).expect("read partition");
        let mut lines = bytes.split_inclusive(|&b| b == b'\n');
        let first = lines.next().expect("header line");
        let header = PayloadInfo::decode(framing::unescape(first).expect("unescape").as_slice())
            .expect("decode header");
        let records = lines
            .map(|line| framing::unescape(line).expect("unescape record"))
            .collect();
        Self { header, records }
    }

    pub fn keys(&self) -> Vec<(u32, u32)> {
        self.records
            .iter()
            .map(|r| {
                let key = SampleKey::decode(r.as_slice()).expect("decode key");
                (key.secondsintoyear, key.nano)
            })
            .collect()
    }

    pub fn decode<M: Message + Default>(&self) -> Vec<M> {
        self.records
            .iter()
            .map(|r| M::decode(r.as_slice()).expect("decode record"))
            .collect()
    }
}

pub fn field<'a>(fields: &'a [FieldValue], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.val.as_str())
}

/// Seconds into `year` of a UTC wall-clock literal.
pub fn secs_into_year(literal: &str, year: i32) -> u32 {
    let wall = epoch::parse_literal(literal).expect("literal");
    let t = epoch::wall_to_epics(wall, time::UtcOffset::UTC, 0).expect("epics");
    t.secs - epoch::start_of_year(year).expect("year start")
}

/// POSIX seconds of a UTC wall-clock literal.
pub fn posix(literal: &str) -> i64 {
    let wall = epoch::parse_literal(literal).expect("literal");
    wall.assume_utc().unix_timestamp()
}
