use thiserror::Error;

use crate::proto::PayloadType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backing store: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("malformed alarm table row: {0}")]
    AlarmTable(String),

    #[error("found {count} channel rows for {name}")]
    DuplicateChannel { name: String, count: usize },

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("corrupt sample for {channel}: {detail}")]
    CorruptSample { channel: String, detail: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("sample time of {channel} out of range: {detail}")]
    SampleTime { channel: String, detail: String },

    #[error("framing error: {0}")]
    Framing(&'static str),

    #[error("protobuf decode: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("partition file holds {found:?}, expected {expected:?}")]
    TypeMismatch {
        expected: PayloadType,
        found: Option<PayloadType>,
    },

    #[error("invalid output path: {0}")]
    InvalidPath(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error should end the whole run rather than just the
    /// channel being exported.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Store(_)
            | Error::AlarmTable(_)
            | Error::DuplicateChannel { .. }
            | Error::Schema(_)
            | Error::CorruptSample { .. }
            | Error::Unsupported(_)
            | Error::InvalidTime(_)
            | Error::Config(_)
            | Error::Json(_) => true,
            Error::Io(_)
            | Error::Framing(_)
            | Error::Decode(_)
            | Error::TypeMismatch { .. }
            | Error::SampleTime { .. }
            | Error::InvalidPath(_) => false,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<postgres::Error> for Error {
    fn from(value: postgres::Error) -> Self {
        Error::Store(Box::new(value))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Error::Store(Box::new(value))
    }
}

impl From<time::error::ComponentRange> for Error {
    fn from(value: time::error::ComponentRange) -> Self {
        Error::InvalidTime(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
