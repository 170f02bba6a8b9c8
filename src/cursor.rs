//! Forward cursor over one channel's samples.
//!
//! A [`SampleCursor`] owns the backing store for its whole lifetime. For
//! each channel it resolves the id, loads the optional metadata and enum
//! labels, works out the query window and then hands out decoded samples
//! one at a time. Rows are fetched from the store in batches of
//! `fetch_size`, so only one batch is ever buffered.

use std::collections::VecDeque;

use log::{debug, trace};
use time::UtcOffset;

use crate::alarm::{AlarmCatalog, AlarmId, INVALID_ALARM, SPECIAL_STATUS_THRESHOLD};
use crate::epoch::{self, EpicsTime};
use crate::payload::{DeclaredType, SampleValue, ValueKind};
use crate::store::{ArchiveStore, Edge, EnumRow, MetadataRow, QueryWindow, SampleRow};
use crate::{Error, Result};

pub const DEFAULT_FETCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct CursorOptions {
    /// Offset at which `smpl_time` and command-line bounds are read.
    pub utc_offset: UtcOffset,
    /// Rows per round trip to the store.
    pub fetch_size: usize,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            utc_offset: UtcOffset::UTC,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

/// Display, alarm and warning limits of a numeric channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetadata {
    pub display_low: f64,
    pub display_high: f64,
    pub warn_low: f64,
    pub warn_high: f64,
    pub alarm_low: f64,
    pub alarm_high: f64,
    pub precision: i64,
    pub units: String,
}

impl From<MetadataRow> for ChannelMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            display_low: row.low_disp_rng.unwrap_or(0.0),
            display_high: row.high_disp_rng.unwrap_or(0.0),
            warn_low: row.low_warn_lmt.unwrap_or(0.0),
            warn_high: row.high_warn_lmt.unwrap_or(0.0),
            alarm_low: row.low_alarm_lmt.unwrap_or(0.0),
            alarm_high: row.high_alarm_lmt.unwrap_or(0.0),
            precision: row.prec.unwrap_or(0),
            units: row.unit.unwrap_or_default(),
        }
    }
}

/// Enum labels indexed by ordinal. Gaps are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumStates {
    labels: Vec<String>,
}

impl EnumStates {
    /// Ordinals above `u16::MAX` cannot be stored in an enum sample and are
    /// rejected as a schema violation.
    pub fn from_rows(rows: Vec<EnumRow>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|row| row.ordinal > i64::from(u16::MAX)) {
            return Err(Error::Schema(format!(
                "enum_metadata ordinal {} exceeds {}",
                row.ordinal,
                u16::MAX
            )));
        }
        let max = rows
            .iter()
            .filter_map(|row| usize::try_from(row.ordinal).ok())
            .max();
        let Some(max) = max else {
            return Ok(Self::default());
        };
        let mut labels = vec![String::new(); max + 1];
        for row in rows {
            if let (Ok(idx), Some(label)) = (usize::try_from(row.ordinal), row.label) {
                labels[idx] = label;
            }
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels joined with `;`, the form stored in the `states` field.
    pub fn joined(&self) -> String {
        self.labels.join(";")
    }
}

/// One decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub stamp: EpicsTime,
    pub severity: AlarmId,
    pub status: AlarmId,
    /// Integer form of `status`; sentinel detection compares against it.
    pub raw_status: i32,
    pub severity_source: i64,
    pub status_source: i64,
    pub declared: DeclaredType,
    pub value: SampleValue,
}

impl Sample {
    pub fn key(&self) -> (u32, u32) {
        (self.stamp.secs, self.stamp.nanos)
    }
}

#[derive(Debug)]
pub enum Located<'a> {
    First(&'a Sample),
    ChannelNotFound,
    EmptyWindow,
}

#[derive(Debug)]
struct ChannelContext {
    name: String,
    id: i64,
    declared: DeclaredType,
    metadata: Option<ChannelMetadata>,
    enum_states: EnumStates,
    window: Option<QueryWindow>,
}

pub struct SampleCursor<S: ArchiveStore> {
    store: S,
    catalog: AlarmCatalog,
    options: CursorOptions,
    channel: Option<ChannelContext>,
    buffer: VecDeque<SampleRow>,
    current: Option<Sample>,
    /// Declared type of the last row that carried a value.
    last_declared: Option<DeclaredType>,
    drained: bool,
}

impl<S: ArchiveStore> SampleCursor<S> {
    /// Take ownership of `store` and load the alarm tables.
    pub fn open(mut store: S, options: CursorOptions) -> Result<Self> {
        let catalog = AlarmCatalog::load(&mut store)?;
        Ok(Self {
            store,
            catalog,
            options,
            channel: None,
            buffer: VecDeque::new(),
            current: None,
            last_declared: None,
            drained: true,
        })
    }

    /// Position the cursor on the first sample of `channel` inside the
    /// window. Bounds are `YYYY-MM-DD[T ]HH:MM:SS` literals; an omitted
    /// bound is taken from the channel's own first or last sample. The
    /// end bound is inclusive to the second.
    pub fn find(
        &mut self,
        channel: &str,
        declared: DeclaredType,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Located<'_>> {
        self.reset()?;

        let ids = self.store.channel_ids(channel)?;
        let id = match ids.as_slice() {
            [] => return Ok(Located::ChannelNotFound),
            [id] => *id,
            _ => {
                return Err(Error::DuplicateChannel {
                    name: channel.to_string(),
                    count: ids.len(),
                })
            }
        };

        let mut metadata_rows = self.store.metadata(id)?;
        if metadata_rows.len() > 1 {
            return Err(Error::Schema(format!(
                "{} num_metadata rows for channel {channel} (id {id})",
                metadata_rows.len()
            )));
        }
        let metadata = metadata_rows.pop().map(ChannelMetadata::from);
        let enum_states = EnumStates::from_rows(self.store.enum_states(id)?)?;

        let window = self.query_window(id, start, end)?;
        self.channel = Some(ChannelContext {
            name: channel.to_string(),
            id,
            declared,
            metadata,
            enum_states,
            window,
        });
        let Some(window) = window else {
            debug!("{channel}: no samples to query");
            return Ok(Located::EmptyWindow);
        };

        debug!(
            "{channel}: id {id}, window [{}, {})",
            epoch::format_literal(window.start),
            epoch::format_literal(window.end)
        );
        self.store.open_samples(id, &window)?;
        self.drained = false;
        self.advance()?;
        Ok(match self.current.as_ref() {
            Some(sample) => Located::First(sample),
            None => Located::EmptyWindow,
        })
    }

    fn query_window(
        &mut self,
        id: i64,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Option<QueryWindow>> {
        let start = match start {
            Some(literal) => Some(epoch::parse_literal(literal)?),
            None => self.store.sample_extent(id, Edge::First)?,
        };
        let end = match end {
            Some(literal) => Some(epoch::parse_literal(literal)?),
            None => self.store.sample_extent(id, Edge::Last)?,
        };
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(None);
        };
        let end = epoch::one_second_later(end)?;
        if start >= end {
            return Ok(None);
        }
        Ok(Some(QueryWindow { start, end }))
    }

    /// Advance and decode one row. `Ok(None)` once the window is drained.
    pub fn next(&mut self) -> Result<Option<&Sample>> {
        self.advance()?;
        Ok(self.current.as_ref())
    }

    /// The current sample, without advancing.
    pub fn get(&self) -> Option<&Sample> {
        self.current.as_ref()
    }

    /// Advance past every sample at or before `last`, handing each one to
    /// `visit` first. Returns how many were skipped.
    pub fn skip_through<F>(&mut self, last: EpicsTime, mut visit: F) -> Result<u64>
    where
        F: FnMut(&Sample),
    {
        let mut skipped = 0;
        while let Some(sample) = self.current.as_ref() {
            if sample.stamp > last {
                break;
            }
            visit(sample);
            skipped += 1;
            self.advance()?;
        }
        Ok(skipped)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = match self.next_row()? {
            Some(row) => {
                let sample = self.decode(row)?;
                if sample.value != SampleValue::NoPayload {
                    self.last_declared = Some(sample.declared);
                }
                Some(sample)
            }
            None => None,
        };
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<SampleRow>> {
        if self.buffer.is_empty() && !self.drained {
            let batch = self.store.fetch_samples(self.options.fetch_size)?;
            if batch.is_empty() {
                self.drained = true;
                self.store.close_samples()?;
            } else {
                trace!("fetched {} rows", batch.len());
                self.buffer.extend(batch);
            }
        }
        Ok(self.buffer.pop_front())
    }

    fn reset(&mut self) -> Result<()> {
        self.channel = None;
        self.buffer.clear();
        self.current = None;
        self.last_declared = None;
        self.drained = true;
        self.store.close_samples()
    }

    fn decode(&self, row: SampleRow) -> Result<Sample> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::Schema("sample decoded with no channel selected".to_string()))?;
        let corrupt = |detail: String| Error::CorruptSample {
            channel: channel.name.clone(),
            detail,
        };

        let nanos = u32::try_from(row.nanosecs)
            .ok()
            .filter(|n| *n < 1_000_000_000)
            .ok_or_else(|| corrupt(format!("nanosecs {} out of range", row.nanosecs)))?;
        let stamp = epoch::wall_to_epics(row.smpl_time, self.options.utc_offset, nanos)
            .map_err(|err| Error::SampleTime {
                channel: channel.name.clone(),
                detail: err.to_string(),
            })?;
        let severity = self.catalog.lookup_severity(row.severity_id);
        let status = self.catalog.lookup_status(row.status_id);
        let raw_status = status.raw();

        let (declared, value) = if severity == AlarmId::Canonical(INVALID_ALARM)
            && raw_status >= SPECIAL_STATUS_THRESHOLD
        {
            // Value-less rows take the type of the row before them.
            let declared = self.last_declared.unwrap_or(channel.declared);
            (declared, SampleValue::NoPayload)
        } else if let Some(bytes) = row.array_val {
            let code = row.datatype.as_deref().unwrap_or("");
            let kind = ValueKind::from_array_code(code)
                .ok_or_else(|| corrupt(format!("unknown array datatype {code:?}")))?;
            let value = decode_array(kind, &bytes).map_err(corrupt)?;
            (DeclaredType::array(kind), value)
        } else {
            let kind = channel.declared.kind;
            let value = decode_scalar(kind, row.num_val, row.float_val, row.str_val)
                .map_err(corrupt)?;
            (DeclaredType::scalar(kind), value)
        };

        Ok(Sample {
            stamp,
            severity,
            status,
            raw_status,
            severity_source: row.severity_id,
            status_source: row.status_id,
            declared,
            value,
        })
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.name.as_str())
    }

    pub fn channel_id(&self) -> Option<i64> {
        self.channel.as_ref().map(|c| c.id)
    }

    pub fn declared(&self) -> Option<DeclaredType> {
        self.channel.as_ref().map(|c| c.declared)
    }

    pub fn metadata(&self) -> Option<&ChannelMetadata> {
        self.channel.as_ref().and_then(|c| c.metadata.as_ref())
    }

    pub fn enum_states(&self) -> Option<&EnumStates> {
        self.channel.as_ref().map(|c| &c.enum_states)
    }

    pub fn window(&self) -> Option<QueryWindow> {
        self.channel.as_ref().and_then(|c| c.window)
    }

    pub fn catalog(&self) -> &AlarmCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &CursorOptions {
        &self.options
    }

    /// Release the open stream and give the store back.
    pub fn into_store(mut self) -> Result<S> {
        self.store.close_samples()?;
        Ok(self.store)
    }
}

fn decode_scalar(
    kind: ValueKind,
    num: Option<i64>,
    float: Option<f64>,
    text: Option<String>,
) -> std::result::Result<SampleValue, String> {
    if kind == ValueKind::String {
        if let Some(text) = text {
            return Ok(SampleValue::Text(text));
        }
    }
    let number = match (num, float) {
        (Some(n), None) => Number::Int(n),
        (None, Some(f)) => Number::Float(f),
        (Some(_), Some(_)) => return Err("both num_val and float_val are set".to_string()),
        (None, None) => return Err("neither num_val nor float_val is set".to_string()),
    };
    Ok(match kind {
        ValueKind::String => SampleValue::Text(number.to_string()),
        ValueKind::Short | ValueKind::Long | ValueKind::Char => {
            SampleValue::Integer(number.as_i64())
        }
        ValueKind::Float | ValueKind::Double => SampleValue::Floating(number.as_f64()),
        ValueKind::Enum => {
            let ordinal = number.as_i64();
            let ordinal = u16::try_from(ordinal)
                .map_err(|_| format!("enum ordinal {ordinal} out of range"))?;
            SampleValue::EnumOrdinal(ordinal)
        }
    })
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_i64(self) -> i64 {
        match self {
            Number::Int(n) => n,
            Number::Float(f) => f as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{n}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Decode a big-endian `array_val` blob.
fn decode_array(kind: ValueKind, bytes: &[u8]) -> std::result::Result<SampleValue, String> {
    Ok(match kind {
        ValueKind::Double => SampleValue::FloatingArray(elements(bytes, f64::from_be_bytes)?),
        ValueKind::Float => SampleValue::FloatingArray(elements(bytes, |b: [u8; 4]| {
            f64::from(f32::from_be_bytes(b))
        })?),
        ValueKind::Long => SampleValue::IntegerArray(elements(bytes, |b: [u8; 4]| {
            i64::from(i32::from_be_bytes(b))
        })?),
        ValueKind::Short => SampleValue::IntegerArray(elements(bytes, |b: [u8; 2]| {
            i64::from(i16::from_be_bytes(b))
        })?),
        ValueKind::Enum => SampleValue::IntegerArray(elements(bytes, |b: [u8; 2]| {
            i64::from(u16::from_be_bytes(b))
        })?),
        ValueKind::Char => SampleValue::Bytes(bytes.to_vec()),
        ValueKind::String => return Err("string arrays are not supported".to_string()),
    })
}

fn elements<const N: usize, T>(
    bytes: &[u8],
    convert: impl Fn([u8; N]) -> T,
) -> std::result::Result<Vec<T>, String> {
    if bytes.len() % N != 0 {
        return Err(format!(
            "array_val of {} bytes is not a whole number of {N}-byte elements",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            convert(buf)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_states_fill_gaps() {
        let states = EnumStates::from_rows(vec![
            EnumRow {
                ordinal: 0,
                label: Some("Off".into()),
            },
            EnumRow {
                ordinal: 2,
                label: Some("Fault".into()),
            },
        ])
        .expect("states");
        assert_eq!(states.labels(), &["Off", "", "Fault"]);
        assert_eq!(states.joined(), "Off;;Fault");
        assert!(EnumStates::from_rows(Vec::new()).expect("empty").is_empty());
    }

    #[test]
    fn oversized_enum_ordinal_is_a_schema_error() {
        let err = EnumStates::from_rows(vec![EnumRow {
            ordinal: 1 << 40,
            label: Some("Bogus".into()),
        }])
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let top = EnumStates::from_rows(vec![EnumRow {
            ordinal: i64::from(u16::MAX),
            label: Some("Last".into()),
        }])
        .expect("u16::MAX fits");
        assert_eq!(top.labels().len(), usize::from(u16::MAX) + 1);
    }

    #[test]
    fn null_metadata_columns_default() {
        let meta = ChannelMetadata::from(MetadataRow {
            high_disp_rng: Some(10.0),
            ..MetadataRow::default()
        });
        assert_eq!(meta.display_high, 10.0);
        assert_eq!(meta.display_low, 0.0);
        assert_eq!(meta.units, "");
    }

    #[test]
    fn scalar_needs_exactly_one_numeric_column() {
        assert_eq!(
            decode_scalar(ValueKind::Double, Some(3), None, None),
            Ok(SampleValue::Floating(3.0))
        );
        assert_eq!(
            decode_scalar(ValueKind::Long, None, Some(2.9), None),
            Ok(SampleValue::Integer(2))
        );
        assert!(decode_scalar(ValueKind::Double, Some(1), Some(1.0), None).is_err());
        assert!(decode_scalar(ValueKind::Double, None, None, Some("x".into())).is_err());
        assert_eq!(
            decode_scalar(ValueKind::String, None, None, Some("hello".into())),
            Ok(SampleValue::Text("hello".into()))
        );
        assert!(decode_scalar(ValueKind::Enum, Some(70_000), None, None).is_err());
    }

    #[test]
    fn arrays_are_big_endian() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&1.5f64.to_be_bytes());
        blob.extend_from_slice(&(-2.0f64).to_be_bytes());
        assert_eq!(
            decode_array(ValueKind::Double, &blob),
            Ok(SampleValue::FloatingArray(vec![1.5, -2.0]))
        );
        assert_eq!(
            decode_array(ValueKind::Short, &[0xFF, 0xFE, 0x00, 0x07]),
            Ok(SampleValue::IntegerArray(vec![-2, 7]))
        );
        assert!(decode_array(ValueKind::Long, &[0, 0, 1]).is_err());
        assert!(decode_array(ValueKind::String, &[]).is_err());
    }
}
