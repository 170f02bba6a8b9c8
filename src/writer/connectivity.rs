//! Disconnect bracketing.
//!
//! Archiver sentinel rows mark periods where the channel was not being
//! recorded. They are never written. The first ordinary record after such
//! a gap carries when the gap started and ended, plus a flag naming what
//! caused it.

use crate::alarm::Sentinel;
use crate::epoch::{EpicsTime, POSIX_TIME_AT_EPICS_EPOCH};
use crate::proto::FieldValue;

/// Gap summary attached to the first record after reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    pub lost: EpicsTime,
    pub regained: EpicsTime,
    pub cause: Option<Sentinel>,
}

impl Bracket {
    pub fn field_values(&self) -> Vec<FieldValue> {
        let mut fields = vec![
            FieldValue::new("cnxlostepsecs", posix_secs(self.lost).to_string()),
            FieldValue::new("cnxregainedepsecs", posix_secs(self.regained).to_string()),
        ];
        let flag = match self.cause {
            Some(Sentinel::ArchiveOff) => Some("startup"),
            Some(Sentinel::ArchiveDisabled) => Some("resume"),
            Some(Sentinel::WriteError) => Some("writeerror"),
            Some(Sentinel::Disconnected) | None => None,
        };
        if let Some(flag) = flag {
            fields.push(FieldValue::new(flag, "true"));
        }
        fields
    }
}

fn posix_secs(stamp: EpicsTime) -> i64 {
    i64::from(stamp.secs) + POSIX_TIME_AT_EPICS_EPOCH
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Connected,
    Disconnected {
        since: EpicsTime,
        cause: Option<Sentinel>,
    },
    /// A bracket has been handed out but its record is not yet written.
    Recovering(Bracket),
}

impl Connectivity {
    /// Record a sentinel sample. The gap starts at the first one; the first
    /// sentinel other than plain `DISCONNECTED` fixes the cause.
    pub fn disconnect(&mut self, sentinel: Sentinel, at: EpicsTime) {
        let cause = (sentinel != Sentinel::Disconnected).then_some(sentinel);
        *self = match *self {
            Connectivity::Connected => Connectivity::Disconnected { since: at, cause },
            Connectivity::Disconnected {
                since,
                cause: existing,
            } => Connectivity::Disconnected {
                since,
                cause: existing.or(cause),
            },
            Connectivity::Recovering(bracket) => Connectivity::Disconnected {
                since: bracket.lost,
                cause: bracket.cause.or(cause),
            },
        };
    }

    /// Bracket for an ordinary sample at `at`, if it ends a gap. Until
    /// [`Connectivity::commit`] is called the same bracket is returned again.
    pub fn reconnect(&mut self, at: EpicsTime) -> Option<Bracket> {
        match *self {
            Connectivity::Connected => None,
            Connectivity::Disconnected { since, cause } => {
                let bracket = Bracket {
                    lost: since,
                    regained: at,
                    cause,
                };
                *self = Connectivity::Recovering(bracket);
                Some(bracket)
            }
            Connectivity::Recovering(bracket) => Some(bracket),
        }
    }

    /// The bracketed record has been written.
    pub fn commit(&mut self) {
        if let Connectivity::Recovering(_) = self {
            *self = Connectivity::Connected;
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Connectivity::Connected)
    }
}
