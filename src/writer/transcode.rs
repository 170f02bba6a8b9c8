//! Per-type record encoding.

use prost::Message;

use crate::cursor::{ChannelMetadata, EnumStates, Sample};
use crate::payload::{DeclaredType, SampleValue, ValueKind};
use crate::proto::{self, FieldValue, PayloadType};
use crate::{Error, Result};

/// Fields common to every sample message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordHead {
    pub secondsintoyear: u32,
    pub nano: u32,
    pub severity: Option<i32>,
    pub status: Option<i32>,
    pub fieldvalues: Vec<FieldValue>,
}

impl RecordHead {
    /// Severity and status are left unset when zero.
    pub fn new(sample: &Sample, year_start: u32, fieldvalues: Vec<FieldValue>) -> Self {
        let severity = sample.severity.raw();
        let status = sample.raw_status;
        Self {
            secondsintoyear: sample.stamp.secs.saturating_sub(year_start),
            nano: sample.stamp.nanos,
            severity: (severity != 0).then_some(severity),
            status: (status != 0).then_some(status),
            fieldvalues,
        }
    }
}

macro_rules! encode_as {
    ($msg:ident, $head:expr, $val:expr) => {
        proto::$msg {
            secondsintoyear: $head.secondsintoyear,
            nano: $head.nano,
            val: $val,
            severity: $head.severity,
            status: $head.status,
            repeatcount: None,
            fieldvalues: $head.fieldvalues,
            fieldactualchange: None,
        }
        .encode_to_vec()
    };
}

/// Message builder for one declared type, chosen once per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcoder {
    ScalarString,
    ScalarShort,
    ScalarFloat,
    ScalarEnum,
    ScalarByte,
    ScalarInt,
    ScalarDouble,
    VectorShort,
    VectorFloat,
    VectorEnum,
    VectorChar,
    VectorInt,
    VectorDouble,
}

impl Transcoder {
    pub fn for_type(declared: DeclaredType) -> Result<Self> {
        Ok(match declared.payload_type() {
            PayloadType::ScalarString => Transcoder::ScalarString,
            PayloadType::ScalarShort => Transcoder::ScalarShort,
            PayloadType::ScalarFloat => Transcoder::ScalarFloat,
            PayloadType::ScalarEnum => Transcoder::ScalarEnum,
            PayloadType::ScalarByte => Transcoder::ScalarByte,
            PayloadType::ScalarInt => Transcoder::ScalarInt,
            PayloadType::ScalarDouble => Transcoder::ScalarDouble,
            PayloadType::WaveformShort => Transcoder::VectorShort,
            PayloadType::WaveformFloat => Transcoder::VectorFloat,
            PayloadType::WaveformEnum => Transcoder::VectorEnum,
            PayloadType::WaveformByte => Transcoder::VectorChar,
            PayloadType::WaveformInt => Transcoder::VectorInt,
            PayloadType::WaveformDouble => Transcoder::VectorDouble,
            other => return Err(Error::Unsupported(format!("{declared} ({other:?})"))),
        })
    }

    /// Serialized message, not yet framed.
    pub fn encode(&self, head: RecordHead, value: &SampleValue) -> Result<Vec<u8>> {
        let mismatch = || {
            Error::Unsupported(format!("{} value written as {self:?}", value.describe()))
        };
        Ok(match self {
            Transcoder::ScalarString => encode_as!(ScalarString, head, text(value)),
            Transcoder::ScalarShort => {
                encode_as!(ScalarShort, head, integer(value).ok_or_else(mismatch)? as i32)
            }
            Transcoder::ScalarFloat => {
                encode_as!(ScalarFloat, head, floating(value).ok_or_else(mismatch)? as f32)
            }
            Transcoder::ScalarEnum => {
                encode_as!(ScalarEnum, head, integer(value).ok_or_else(mismatch)? as i32)
            }
            Transcoder::ScalarByte => {
                let val = match value {
                    SampleValue::Bytes(bytes) => bytes.clone(),
                    SampleValue::NoPayload => Vec::new(),
                    other => vec![integer(other).ok_or_else(mismatch)? as u8],
                };
                encode_as!(ScalarByte, head, val)
            }
            Transcoder::ScalarInt => {
                encode_as!(ScalarInt, head, integer(value).ok_or_else(mismatch)? as i32)
            }
            Transcoder::ScalarDouble => {
                encode_as!(ScalarDouble, head, floating(value).ok_or_else(mismatch)?)
            }
            Transcoder::VectorShort => {
                encode_as!(VectorShort, head, integers(value).ok_or_else(mismatch)?)
            }
            Transcoder::VectorFloat => {
                let val = floats(value)
                    .ok_or_else(mismatch)?
                    .into_iter()
                    .map(|v| v as f32)
                    .collect();
                encode_as!(VectorFloat, head, val)
            }
            Transcoder::VectorEnum => {
                encode_as!(VectorEnum, head, integers(value).ok_or_else(mismatch)?)
            }
            Transcoder::VectorChar => {
                let val = match value {
                    SampleValue::Bytes(bytes) => bytes.clone(),
                    SampleValue::NoPayload => Vec::new(),
                    other => integers(other)
                        .ok_or_else(mismatch)?
                        .into_iter()
                        .map(|v| v as u8)
                        .collect(),
                };
                encode_as!(VectorChar, head, val)
            }
            Transcoder::VectorInt => {
                encode_as!(VectorInt, head, integers(value).ok_or_else(mismatch)?)
            }
            Transcoder::VectorDouble => {
                encode_as!(VectorDouble, head, floats(value).ok_or_else(mismatch)?)
            }
        })
    }
}

fn text(value: &SampleValue) -> String {
    match value {
        SampleValue::Text(text) => text.clone(),
        SampleValue::Integer(n) => n.to_string(),
        SampleValue::Floating(v) => format_g(*v),
        SampleValue::EnumOrdinal(n) => n.to_string(),
        _ => String::new(),
    }
}

fn integer(value: &SampleValue) -> Option<i64> {
    match value {
        SampleValue::Integer(n) => Some(*n),
        SampleValue::EnumOrdinal(n) => Some(i64::from(*n)),
        SampleValue::Floating(v) => Some(*v as i64),
        SampleValue::NoPayload => Some(0),
        _ => None,
    }
}

fn floating(value: &SampleValue) -> Option<f64> {
    match value {
        SampleValue::Floating(v) => Some(*v),
        SampleValue::Integer(n) => Some(*n as f64),
        SampleValue::NoPayload => Some(f64::NAN),
        _ => None,
    }
}

fn integers(value: &SampleValue) -> Option<Vec<i32>> {
    let mut out = Vec::with_capacity(value.element_count());
    match value {
        SampleValue::IntegerArray(values) => out.extend(values.iter().map(|&v| v as i32)),
        SampleValue::Bytes(bytes) => out.extend(bytes.iter().map(|&b| i32::from(b))),
        SampleValue::NoPayload => {}
        _ => return None,
    }
    Some(out)
}

fn floats(value: &SampleValue) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(value.element_count());
    match value {
        SampleValue::FloatingArray(values) => out.extend_from_slice(values),
        SampleValue::IntegerArray(values) => out.extend(values.iter().map(|&v| v as f64)),
        SampleValue::NoPayload => {}
        _ => return None,
    }
    Some(out)
}

/// Channel properties embedded in the first record of each day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSnapshot {
    fields: Vec<FieldValue>,
}

impl FieldSnapshot {
    /// Numeric kinds carry display limits and units, scalars also the
    /// alarm limits, floating kinds the precision. Enums carry their
    /// labels. A channel without a metadata row gets no numeric fields.
    pub fn build(
        declared: DeclaredType,
        metadata: Option<&ChannelMetadata>,
        states: Option<&EnumStates>,
    ) -> Self {
        let mut fields = Vec::new();
        if let Some(meta) = metadata.filter(|_| declared.kind.is_numeric()) {
            fields.push(FieldValue::new("HOPR", format_g(meta.display_high)));
            fields.push(FieldValue::new("LOPR", format_g(meta.display_low)));
            fields.push(FieldValue::new("EGU", meta.units.clone()));
            if !declared.array {
                fields.push(FieldValue::new("HIHI", format_g(meta.alarm_high)));
                fields.push(FieldValue::new("HIGH", format_g(meta.warn_high)));
                fields.push(FieldValue::new("LOW", format_g(meta.warn_low)));
                fields.push(FieldValue::new("LOLO", format_g(meta.alarm_low)));
            }
            if declared.kind.is_floating() {
                fields.push(FieldValue::new("PREC", meta.precision.to_string()));
            }
        }
        if declared.kind == ValueKind::Enum {
            if let Some(states) = states.filter(|s| !s.is_empty()) {
                fields.push(FieldValue::new("states", states.joined()));
            }
        }
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Render a double the way a default-configured C++ output stream does
/// (`%g`, six significant digits).
pub fn format_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{value:.5e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..6).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.abs())
    } else {
        let decimals = (5 - exponent) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}
