//! Declared value types and sample values.

use std::fmt;
use std::str::FromStr;

use crate::proto::PayloadType;
use crate::{Error, Result};

/// Value kind of a channel, named after the `DBR_TIME_*` request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Short,
    Float,
    Enum,
    Char,
    Long,
    Double,
}

impl ValueKind {
    pub const ALL: [ValueKind; 7] = [
        ValueKind::String,
        ValueKind::Short,
        ValueKind::Float,
        ValueKind::Enum,
        ValueKind::Char,
        ValueKind::Long,
        ValueKind::Double,
    ];

    /// Numeric `DBR_TIME_*` code.
    pub fn dbr_code(self) -> u16 {
        match self {
            ValueKind::String => 14,
            ValueKind::Short => 15,
            ValueKind::Float => 16,
            ValueKind::Enum => 17,
            ValueKind::Char => 18,
            ValueKind::Long => 19,
            ValueKind::Double => 20,
        }
    }

    pub fn dbr_name(self) -> &'static str {
        match self {
            ValueKind::String => "DBR_TIME_STRING",
            ValueKind::Short => "DBR_TIME_SHORT",
            ValueKind::Float => "DBR_TIME_FLOAT",
            ValueKind::Enum => "DBR_TIME_ENUM",
            ValueKind::Char => "DBR_TIME_CHAR",
            ValueKind::Long => "DBR_TIME_LONG",
            ValueKind::Double => "DBR_TIME_DOUBLE",
        }
    }

    pub fn from_dbr_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.dbr_code() == code)
    }

    /// Element kind named by the RDB `datatype` column of array rows.
    pub fn from_array_code(code: &str) -> Option<Self> {
        match code.trim() {
            "d" => Some(ValueKind::Double),
            "f" => Some(ValueKind::Float),
            "l" | "i" => Some(ValueKind::Long),
            "s" => Some(ValueKind::Short),
            "e" => Some(ValueKind::Enum),
            "b" => Some(ValueKind::Char),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueKind::Short | ValueKind::Float | ValueKind::Long | ValueKind::Double
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }
}

impl FromStr for ValueKind {
    type Err = Error;

    /// Accepts `DBR_TIME_DOUBLE`-style names and numeric codes (`20`).
    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            let code: u16 = value
                .parse()
                .map_err(|_| Error::Unsupported(format!("DBR type {value}")))?;
            return Self::from_dbr_code(code)
                .ok_or_else(|| Error::Unsupported(format!("DBR type {code}")));
        }
        let upper = value.to_ascii_uppercase();
        if upper == "DBR_TIME_INT" {
            return Ok(ValueKind::Short);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.dbr_name() == upper)
            .ok_or_else(|| Error::Unsupported(format!("DBR type {value}")))
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dbr_name())
    }
}

/// Value kind and arity. Every record of a partition shares one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclaredType {
    pub kind: ValueKind,
    pub array: bool,
}

impl DeclaredType {
    pub fn scalar(kind: ValueKind) -> Self {
        Self { kind, array: false }
    }

    pub fn array(kind: ValueKind) -> Self {
        Self { kind, array: true }
    }

    pub fn payload_type(self) -> PayloadType {
        match (self.kind, self.array) {
            (ValueKind::String, false) => PayloadType::ScalarString,
            (ValueKind::Short, false) => PayloadType::ScalarShort,
            (ValueKind::Float, false) => PayloadType::ScalarFloat,
            (ValueKind::Enum, false) => PayloadType::ScalarEnum,
            (ValueKind::Char, false) => PayloadType::ScalarByte,
            (ValueKind::Long, false) => PayloadType::ScalarInt,
            (ValueKind::Double, false) => PayloadType::ScalarDouble,
            (ValueKind::String, true) => PayloadType::WaveformString,
            (ValueKind::Short, true) => PayloadType::WaveformShort,
            (ValueKind::Float, true) => PayloadType::WaveformFloat,
            (ValueKind::Enum, true) => PayloadType::WaveformEnum,
            (ValueKind::Char, true) => PayloadType::WaveformByte,
            (ValueKind::Long, true) => PayloadType::WaveformInt,
            (ValueKind::Double, true) => PayloadType::WaveformDouble,
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "{}[]", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Decoded value of one sample row.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Integer(i64),
    Floating(f64),
    Text(String),
    EnumOrdinal(u16),
    Bytes(Vec<u8>),
    IntegerArray(Vec<i64>),
    FloatingArray(Vec<f64>),
    /// Archiver bookkeeping row with no value columns.
    NoPayload,
}

impl SampleValue {
    pub fn element_count(&self) -> usize {
        match self {
            SampleValue::Bytes(v) => v.len(),
            SampleValue::IntegerArray(v) => v.len(),
            SampleValue::FloatingArray(v) => v.len(),
            _ => 1,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            SampleValue::Integer(_) => "integer",
            SampleValue::Floating(_) => "floating",
            SampleValue::Text(_) => "text",
            SampleValue::EnumOrdinal(_) => "enum",
            SampleValue::Bytes(_) => "bytes",
            SampleValue::IntegerArray(_) => "integer array",
            SampleValue::FloatingArray(_) => "floating array",
            SampleValue::NoPayload => "no payload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_codes() {
        assert_eq!("DBR_TIME_DOUBLE".parse::<ValueKind>().unwrap(), ValueKind::Double);
        assert_eq!("dbr_time_enum".parse::<ValueKind>().unwrap(), ValueKind::Enum);
        assert_eq!("20".parse::<ValueKind>().unwrap(), ValueKind::Double);
        assert_eq!("17".parse::<ValueKind>().unwrap(), ValueKind::Enum);
        assert_eq!("DBR_TIME_INT".parse::<ValueKind>().unwrap(), ValueKind::Short);
        assert!("21".parse::<ValueKind>().is_err());
        assert!("DBR_DOUBLE".parse::<ValueKind>().is_err());
    }

    #[test]
    fn payload_types_cover_kind_and_arity() {
        assert_eq!(
            DeclaredType::scalar(ValueKind::Double).payload_type(),
            PayloadType::ScalarDouble
        );
        assert_eq!(
            DeclaredType::array(ValueKind::Char).payload_type(),
            PayloadType::WaveformByte
        );
        assert_eq!(
            DeclaredType::array(ValueKind::Long).payload_type() as i32,
            12
        );
    }

    #[test]
    fn array_codes() {
        assert_eq!(ValueKind::from_array_code("d"), Some(ValueKind::Double));
        assert_eq!(ValueKind::from_array_code("b"), Some(ValueKind::Char));
        assert_eq!(ValueKind::from_array_code("x"), None);
    }
}
