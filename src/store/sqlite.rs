//! SQLite adapter for local archive extracts.
//!
//! Sample times are stored as `YYYY-MM-DD HH:MM:SS[.ffffff]` text so that
//! lexical order is time order. Samples are paged with a keyset on
//! `(smpl_time, nanosecs, rowid)`; no statement outlives a single fetch.

use std::path::Path;

use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use time::PrimitiveDateTime;

use super::{AlarmRow, ArchiveStore, Edge, EnumRow, MetadataRow, QueryWindow, SampleRow};
use crate::epoch::{format_sql, parse_db_timestamp};
use crate::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS channel (
    channel_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS severity (
    severity_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS status (
    status_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS num_metadata (
    channel_id INTEGER NOT NULL,
    low_disp_rng REAL,
    high_disp_rng REAL,
    low_warn_lmt REAL,
    high_warn_lmt REAL,
    low_alarm_lmt REAL,
    high_alarm_lmt REAL,
    prec INTEGER,
    unit TEXT
);
CREATE TABLE IF NOT EXISTS enum_metadata (
    channel_id INTEGER NOT NULL,
    enum_nbr INTEGER NOT NULL,
    enum_val TEXT
);
CREATE TABLE IF NOT EXISTS sample (
    channel_id INTEGER NOT NULL,
    smpl_time TEXT NOT NULL,
    nanosecs INTEGER NOT NULL DEFAULT 0,
    severity_id INTEGER NOT NULL,
    status_id INTEGER NOT NULL,
    num_val INTEGER,
    float_val REAL,
    str_val TEXT,
    datatype TEXT,
    array_val BLOB
);
CREATE INDEX IF NOT EXISTS sample_channel_time ON sample (channel_id, smpl_time, nanosecs);
";

#[derive(Debug)]
struct SampleStream {
    channel_id: i64,
    start: String,
    end: String,
    last_time: String,
    last_nanos: i64,
    last_rowid: i64,
    drained: bool,
}

pub struct SqliteStore {
    conn: Connection,
    stream: Option<SampleStream>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn, stream: None }
    }

    /// Create the archiver tables if they are missing.
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn alarm_rows(&self, sql: &str, table: &str) -> Result<Vec<AlarmRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, Value>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(id, label)| {
                Ok(AlarmRow {
                    id: alarm_id(id, table)?,
                    label: label.unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn alarm_id(value: Value, table: &str) -> Result<i64> {
    match value {
        Value::Integer(id) => Ok(id),
        Value::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| Error::AlarmTable(format!("{table} id {text:?} is not an integer"))),
        other => Err(Error::AlarmTable(format!(
            "{table} id {other:?} is not an integer"
        ))),
    }
}

impl ArchiveStore for SqliteStore {
    fn severities(&mut self) -> Result<Vec<AlarmRow>> {
        self.alarm_rows(
            "SELECT severity_id, name FROM severity ORDER BY severity_id",
            "severity",
        )
    }

    fn statuses(&mut self) -> Result<Vec<AlarmRow>> {
        self.alarm_rows("SELECT status_id, name FROM status ORDER BY status_id", "status")
    }

    fn channel_ids(&mut self, name: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT channel_id FROM channel WHERE name = ?1")?;
        let ids = stmt
            .query_map(params![name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn metadata(&mut self, channel_id: i64) -> Result<Vec<MetadataRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT low_disp_rng, high_disp_rng, low_warn_lmt, high_warn_lmt,
                    low_alarm_lmt, high_alarm_lmt, prec, unit
             FROM num_metadata WHERE channel_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![channel_id], |row| {
                Ok(MetadataRow {
                    low_disp_rng: row.get(0)?,
                    high_disp_rng: row.get(1)?,
                    low_warn_lmt: row.get(2)?,
                    high_warn_lmt: row.get(3)?,
                    low_alarm_lmt: row.get(4)?,
                    high_alarm_lmt: row.get(5)?,
                    prec: row.get(6)?,
                    unit: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn enum_states(&mut self, channel_id: i64) -> Result<Vec<EnumRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT enum_nbr, enum_val FROM enum_metadata
             WHERE channel_id = ?1 ORDER BY enum_nbr",
        )?;
        let rows = stmt
            .query_map(params![channel_id], |row| {
                Ok(EnumRow {
                    ordinal: row.get(0)?,
                    label: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn sample_extent(&mut self, channel_id: i64, edge: Edge) -> Result<Option<PrimitiveDateTime>> {
        let sql = match edge {
            Edge::First => "SELECT min(smpl_time) FROM sample WHERE channel_id = ?1",
            Edge::Last => "SELECT max(smpl_time) FROM sample WHERE channel_id = ?1",
        };
        let extent: Option<String> = self
            .conn
            .query_row(sql, params![channel_id], |row| row.get(0))
            .optional()?
            .flatten();
        extent.as_deref().map(parse_db_timestamp).transpose()
    }

    fn open_samples(&mut self, channel_id: i64, window: &QueryWindow) -> Result<()> {
        self.close_samples()?;
        debug!(
            "paging samples for channel {channel_id} in [{}, {})",
            format_sql(window.start),
            format_sql(window.end)
        );
        self.stream = Some(SampleStream {
            channel_id,
            start: format_sql(window.start),
            end: format_sql(window.end),
            last_time: String::new(),
            last_nanos: -1,
            last_rowid: -1,
            drained: false,
        });
        Ok(())
    }

    fn fetch_samples(&mut self, max: usize) -> Result<Vec<SampleRow>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Vec::new());
        };
        if stream.drained {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(max.max(1)).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(
            "SELECT smpl_time, nanosecs, severity_id, status_id, num_val, float_val,
                    str_val, datatype, array_val, rowid
             FROM sample
             WHERE channel_id = ?1 AND smpl_time >= ?2 AND smpl_time < ?3
               AND (smpl_time, nanosecs, rowid) > (?4, ?5, ?6)
             ORDER BY smpl_time, nanosecs, rowid
             LIMIT ?7",
        )?;
        let raw = stmt
            .query_map(
                params![
                    stream.channel_id,
                    stream.start,
                    stream.end,
                    stream.last_time,
                    stream.last_nanos,
                    stream.last_rowid,
                    limit
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<Vec<u8>>>(8)?,
                        row.get::<_, i64>(9)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if raw.is_empty() {
            stream.drained = true;
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(raw.len());
        for (
            time,
            nanos,
            severity_id,
            status_id,
            num_val,
            float_val,
            str_val,
            datatype,
            array_val,
            rowid,
        ) in raw
        {
            stream.last_time.clone_from(&time);
            stream.last_nanos = nanos.unwrap_or(0);
            stream.last_rowid = rowid;
            rows.push(SampleRow {
                smpl_time: parse_db_timestamp(&time)?,
                nanosecs: nanos.unwrap_or(0),
                severity_id,
                status_id,
                num_val,
                float_val,
                str_val,
                datatype,
                array_val,
            });
        }
        Ok(rows)
    }

    fn close_samples(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().expect("open");
        store.create_schema().expect("schema");
        store
    }

    #[test]
    fn pages_in_time_order_across_fetches() {
        let mut store = store();
        for (time, nanos) in [
            ("2017-01-01 00:00:02", 0),
            ("2017-01-01 00:00:01", 500),
            ("2017-01-01 00:00:01", 100),
            ("2017-01-01 00:00:03", 0),
        ] {
            store
                .connection()
                .execute(
                    "INSERT INTO sample (channel_id, smpl_time, nanosecs, severity_id, status_id,
                         float_val)
                     VALUES (1, ?1, ?2, 1, 1, 1.0)",
                    params![time, nanos],
                )
                .expect("insert");
        }
        let window = QueryWindow {
            start: datetime!(2017-01-01 00:00:00),
            end: datetime!(2017-01-01 00:00:03),
        };
        store.open_samples(1, &window).expect("open");
        let mut seen = Vec::new();
        loop {
            let batch = store.fetch_samples(2).expect("fetch");
            if batch.is_empty() {
                break;
            }
            seen.extend(batch.into_iter().map(|row| (row.smpl_time.second(), row.nanosecs)));
        }
        assert_eq!(seen, vec![(1, 100), (1, 500), (2, 0)]);
        store.close_samples().expect("close");
        store.close_samples().expect("close twice");
    }

    #[test]
    fn malformed_alarm_id_is_rejected() {
        let mut store = store();
        store
            .connection()
            .execute_batch(
                "DROP TABLE severity;
                 CREATE TABLE severity (severity_id, name TEXT);
                 INSERT INTO severity VALUES ('x1', 'MAJOR');",
            )
            .expect("setup");
        let err = store.severities().unwrap_err();
        assert!(matches!(err, Error::AlarmTable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn extent_of_empty_channel_is_none() {
        let mut store = store();
        assert_eq!(store.sample_extent(9, Edge::First).expect("extent"), None);
    }
}
