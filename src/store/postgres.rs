//! PostgreSQL adapter.
//!
//! Samples are streamed through a server-side `NO SCROLL` cursor inside a
//! read-only transaction, so a channel with millions of rows never sits in
//! client memory at once.

use log::{debug, info, warn};
use postgres::{Client, NoTls, Row};
use time::PrimitiveDateTime;

use super::{AlarmRow, ArchiveStore, Edge, EnumRow, MetadataRow, QueryWindow, SampleRow};
use crate::epoch::{format_sql, truncate_fraction};
use crate::Result;

const CURSOR_NAME: &str = "pbe_samples";

pub struct PostgresStore {
    client: Client,
    cursor_open: bool,
}

impl PostgresStore {
    /// Connect with a libpq-style parameter string or URL.
    pub fn connect(params: &str) -> Result<Self> {
        let client = Client::connect(params, NoTls)?;
        info!("connected to archive database");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            cursor_open: false,
        }
    }

    fn alarm_rows(&mut self, sql: &str) -> Result<Vec<AlarmRow>> {
        let rows = self.client.query(sql, &[])?;
        rows.iter()
            .map(|row| {
                Ok(AlarmRow {
                    id: row.try_get(0)?,
                    label: row.try_get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })
            .collect()
    }
}

impl ArchiveStore for PostgresStore {
    fn severities(&mut self) -> Result<Vec<AlarmRow>> {
        self.alarm_rows("SELECT severity_id::int8, name::text FROM severity ORDER BY severity_id")
    }

    fn statuses(&mut self) -> Result<Vec<AlarmRow>> {
        self.alarm_rows("SELECT status_id::int8, name::text FROM status ORDER BY status_id")
    }

    fn channel_ids(&mut self, name: &str) -> Result<Vec<i64>> {
        let rows = self.client.query(
            "SELECT channel_id::int8 FROM channel WHERE name = $1::text",
            &[&name],
        )?;
        rows.iter()
            .map(|row| Ok(row.try_get(0)?))
            .collect()
    }

    fn metadata(&mut self, channel_id: i64) -> Result<Vec<MetadataRow>> {
        let rows = self.client.query(
            "SELECT low_disp_rng::float8, high_disp_rng::float8, \
                    low_warn_lmt::float8, high_warn_lmt::float8, \
                    low_alarm_lmt::float8, high_alarm_lmt::float8, \
                    prec::int8, unit::text \
             FROM num_metadata WHERE channel_id = $1::int8",
            &[&channel_id],
        )?;
        rows.iter()
            .map(|row| {
                Ok(MetadataRow {
                    low_disp_rng: row.try_get(0)?,
                    high_disp_rng: row.try_get(1)?,
                    low_warn_lmt: row.try_get(2)?,
                    high_warn_lmt: row.try_get(3)?,
                    low_alarm_lmt: row.try_get(4)?,
                    high_alarm_lmt: row.try_get(5)?,
                    prec: row.try_get(6)?,
                    unit: row.try_get(7)?,
                })
            })
            .collect()
    }

    fn enum_states(&mut self, channel_id: i64) -> Result<Vec<EnumRow>> {
        let rows = self.client.query(
            "SELECT enum_nbr::int8, enum_val::text FROM enum_metadata \
             WHERE channel_id = $1::int8 ORDER BY enum_nbr",
            &[&channel_id],
        )?;
        rows.iter()
            .map(|row| {
                Ok(EnumRow {
                    ordinal: row.try_get(0)?,
                    label: row.try_get(1)?,
                })
            })
            .collect()
    }

    fn sample_extent(&mut self, channel_id: i64, edge: Edge) -> Result<Option<PrimitiveDateTime>> {
        let sql = match edge {
            Edge::First => {
                "SELECT min(smpl_time)::timestamp FROM sample WHERE channel_id = $1::int8"
            }
            Edge::Last => {
                "SELECT max(smpl_time)::timestamp FROM sample WHERE channel_id = $1::int8"
            }
        };
        let row = self.client.query_one(sql, &[&channel_id])?;
        row.try_get::<_, Option<PrimitiveDateTime>>(0)?
            .map(truncate_fraction)
            .transpose()
    }

    fn open_samples(&mut self, channel_id: i64, window: &QueryWindow) -> Result<()> {
        self.close_samples()?;
        // DECLARE takes no bind parameters; every literal below comes from a
        // typed value.
        let sql = format!(
            "BEGIN READ ONLY; \
             DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR \
             SELECT smpl_time::timestamp, nanosecs::int8, severity_id::int8, status_id::int8, \
                    num_val::int8, float_val::float8, str_val::text, datatype::text, array_val \
             FROM sample \
             WHERE channel_id = {channel_id} \
               AND smpl_time >= '{start}' AND smpl_time < '{end}' \
             ORDER BY smpl_time, nanosecs",
            start = format_sql(window.start),
            end = format_sql(window.end),
        );
        debug!("declaring sample cursor for channel {channel_id}");
        self.client.batch_execute(&sql)?;
        self.cursor_open = true;
        Ok(())
    }

    fn fetch_samples(&mut self, max: usize) -> Result<Vec<SampleRow>> {
        if !self.cursor_open {
            return Ok(Vec::new());
        }
        let sql = format!("FETCH FORWARD {} FROM {CURSOR_NAME}", max.max(1));
        let rows = self.client.query(sql.as_str(), &[])?;
        rows.iter().map(sample_row).collect()
    }

    fn close_samples(&mut self) -> Result<()> {
        if !self.cursor_open {
            return Ok(());
        }
        self.cursor_open = false;
        self.client
            .batch_execute(&format!("CLOSE {CURSOR_NAME}; COMMIT"))?;
        Ok(())
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        if let Err(err) = self.close_samples() {
            warn!("closing sample cursor failed: {err}");
        }
    }
}

fn sample_row(row: &Row) -> Result<SampleRow> {
    let smpl_time: PrimitiveDateTime = row.try_get(0)?;
    Ok(SampleRow {
        smpl_time: truncate_fraction(smpl_time)?,
        nanosecs: row.try_get::<_, Option<i64>>(1)?.unwrap_or(0),
        severity_id: row.try_get(2)?,
        status_id: row.try_get(3)?,
        num_val: row.try_get(4)?,
        float_val: row.try_get(5)?,
        str_val: row.try_get(6)?,
        datatype: row.try_get(7)?,
        array_val: row.try_get(8)?,
    })
}
