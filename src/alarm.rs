//! Severity and status canonicalization.
//!
//! The RDB archiver keeps its own severity and status tables whose ids and
//! labels vary between installations. Both tables are loaded once and
//! mapped onto the EPICS alarm enumerations plus the archiver's sentinel
//! statuses. Lookups never touch the database again.

use std::fmt;

use log::debug;

use crate::store::{AlarmRow, ArchiveStore};
use crate::Result;

pub const NO_ALARM: u16 = 0;
pub const MINOR_ALARM: u16 = 1;
pub const MAJOR_ALARM: u16 = 2;
pub const INVALID_ALARM: u16 = 3;

/// Raw statuses at or above this value are archiver bookkeeping, not
/// alarm conditions.
pub const SPECIAL_STATUS_THRESHOLD: i32 = 3000;

const SEVERITY_NAMES: [&str; 4] = ["NO_ALARM", "MINOR", "MAJOR", "INVALID"];

const CONDITION_NAMES: [&str; 22] = [
    "NO_ALARM",
    "READ",
    "WRITE",
    "HIHI",
    "HIGH",
    "LOLO",
    "LOW",
    "STATE",
    "COS",
    "COMM",
    "TIMEOUT",
    "HWLIMIT",
    "CALC",
    "SCAN",
    "LINK",
    "SOFT",
    "BAD_SUB",
    "UDF",
    "DISABLE",
    "SIMM",
    "READ_ACCESS",
    "WRITE_ACCESS",
];

/// Archiver status codes that mark a gap in the data rather than a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    Disconnected,
    ArchiveOff,
    ArchiveDisabled,
    WriteError,
}

impl Sentinel {
    pub const ALL: [Sentinel; 4] = [
        Sentinel::Disconnected,
        Sentinel::ArchiveOff,
        Sentinel::ArchiveDisabled,
        Sentinel::WriteError,
    ];

    pub fn code(self) -> i32 {
        match self {
            Sentinel::Disconnected => 3904,
            Sentinel::ArchiveOff => 3872,
            Sentinel::ArchiveDisabled => 3848,
            Sentinel::WriteError => 3976,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sentinel::Disconnected => "DISCONNECTED",
            Sentinel::ArchiveOff => "ARCHIVE_OFF",
            Sentinel::ArchiveDisabled => "ARCHIVE_DISABLED",
            Sentinel::WriteError => "WRITE_ERROR",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

/// Result of mapping a source severity/status id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmId {
    /// Member of the EPICS severity or alarm-condition enumeration.
    Canonical(u16),
    Sentinel(Sentinel),
    /// Present in the source table but with a label that maps to nothing.
    Unmapped { position: usize },
    /// Absent from the source table.
    NotFound { table_len: usize },
}

impl AlarmId {
    /// Integer form as written to the output records.
    pub fn raw(self) -> i32 {
        match self {
            AlarmId::Canonical(id) => i32::from(id),
            AlarmId::Sentinel(s) => s.code(),
            AlarmId::Unmapped { position } => -(position as i32 + 1),
            AlarmId::NotFound { table_len } => -(table_len as i32 + 1),
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, AlarmId::Canonical(_) | AlarmId::Sentinel(_))
    }

    pub fn sentinel(self) -> Option<Sentinel> {
        match self {
            AlarmId::Sentinel(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmId::Canonical(id) => write!(f, "{id}"),
            AlarmId::Sentinel(s) => write!(f, "{}({})", s.label(), s.code()),
            AlarmId::Unmapped { position } => write!(f, "unmapped#{position}"),
            AlarmId::NotFound { .. } => f.write_str("not-found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEntry {
    pub source_id: i64,
    pub label: String,
    pub id: AlarmId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmTable {
    entries: Vec<AlarmEntry>,
}

impl AlarmTable {
    pub fn severities(rows: Vec<AlarmRow>) -> Self {
        Self::build(rows, canonical_severity)
    }

    pub fn statuses(rows: Vec<AlarmRow>) -> Self {
        Self::build(rows, canonical_status)
    }

    fn build(rows: Vec<AlarmRow>, canonical: fn(&str) -> Option<AlarmId>) -> Self {
        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(position, row)| {
                let label = row.label.trim().to_ascii_uppercase();
                let id = canonical(&label).unwrap_or(AlarmId::Unmapped { position });
                AlarmEntry {
                    source_id: row.id,
                    label,
                    id,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, source_id: i64) -> AlarmId {
        self.entries
            .iter()
            .find(|entry| entry.source_id == source_id)
            .map(|entry| entry.id)
            .unwrap_or(AlarmId::NotFound {
                table_len: self.entries.len(),
            })
    }

    pub fn entries(&self) -> &[AlarmEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn canonical_severity(label: &str) -> Option<AlarmId> {
    if matches!(label, "OK" | "NONE") {
        return Some(AlarmId::Canonical(NO_ALARM));
    }
    SEVERITY_NAMES
        .iter()
        .position(|name| *name == label)
        .map(|idx| AlarmId::Canonical(idx as u16))
}

fn canonical_status(label: &str) -> Option<AlarmId> {
    if matches!(label, "OK" | "NONE" | "NO_ALARM") {
        return Some(AlarmId::Canonical(NO_ALARM));
    }
    if let Some(sentinel) = Sentinel::from_label(label) {
        return Some(AlarmId::Sentinel(sentinel));
    }
    let condition = label.strip_suffix("_ALARM").unwrap_or(label);
    CONDITION_NAMES
        .iter()
        .skip(1)
        .position(|name| *name == condition)
        .map(|idx| AlarmId::Canonical(idx as u16 + 1))
}

/// Severity and status tables of one session.
#[derive(Debug, Clone, Default)]
pub struct AlarmCatalog {
    severities: AlarmTable,
    statuses: AlarmTable,
}

impl AlarmCatalog {
    pub fn load<S: ArchiveStore + ?Sized>(store: &mut S) -> Result<Self> {
        let severities = AlarmTable::severities(store.severities()?);
        let statuses = AlarmTable::statuses(store.statuses()?);
        for (name, table) in [("severity", &severities), ("status", &statuses)] {
            for entry in table.entries() {
                debug!(
                    "{name}: rdb {:>4} -> {:>5} {}",
                    entry.source_id,
                    entry.id.raw(),
                    entry.label
                );
            }
        }
        Ok(Self {
            severities,
            statuses,
        })
    }

    pub fn from_tables(severities: AlarmTable, statuses: AlarmTable) -> Self {
        Self {
            severities,
            statuses,
        }
    }

    pub fn lookup_severity(&self, source_id: i64) -> AlarmId {
        self.severities.lookup(source_id)
    }

    pub fn lookup_status(&self, source_id: i64) -> AlarmId {
        self.statuses.lookup(source_id)
    }

    pub fn severities(&self) -> &AlarmTable {
        &self.severities
    }

    pub fn statuses(&self) -> &AlarmTable {
        &self.statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(items: &[(i64, &str)]) -> Vec<AlarmRow> {
        items
            .iter()
            .map(|(id, label)| AlarmRow {
                id: *id,
                label: label.to_string(),
            })
            .collect()
    }

    #[test]
    fn severity_synonyms_and_exact_names() {
        let table = AlarmTable::severities(rows(&[
            (1, "OK"),
            (2, "minor"),
            (3, "MAJOR"),
            (4, "Invalid"),
            (5, "NONE"),
            (6, "BOGUS"),
        ]));
        assert_eq!(table.lookup(1), AlarmId::Canonical(NO_ALARM));
        assert_eq!(table.lookup(2), AlarmId::Canonical(MINOR_ALARM));
        assert_eq!(table.lookup(3), AlarmId::Canonical(MAJOR_ALARM));
        assert_eq!(table.lookup(4), AlarmId::Canonical(INVALID_ALARM));
        assert_eq!(table.lookup(5), AlarmId::Canonical(NO_ALARM));
        assert_eq!(table.lookup(6), AlarmId::Unmapped { position: 5 });
    }

    #[test]
    fn status_conditions_and_sentinels() {
        let table = AlarmTable::statuses(rows(&[
            (10, "NO_ALARM"),
            (11, "HIHI_ALARM"),
            (12, "LOLO_ALARM"),
            (13, "Disconnected"),
            (14, "ARCHIVE_OFF"),
            (15, "ARCHIVE_DISABLED"),
            (16, "WRITE_ERROR"),
            (17, "UDF_ALARM"),
            (18, "???"),
        ]));
        assert_eq!(table.lookup(10), AlarmId::Canonical(0));
        assert_eq!(table.lookup(11), AlarmId::Canonical(3));
        assert_eq!(table.lookup(12), AlarmId::Canonical(5));
        assert_eq!(table.lookup(13).raw(), 3904);
        assert_eq!(table.lookup(14).raw(), 3872);
        assert_eq!(table.lookup(15).raw(), 3848);
        assert_eq!(table.lookup(16).raw(), 3976);
        assert_eq!(table.lookup(17), AlarmId::Canonical(17));
        assert_eq!(table.lookup(18), AlarmId::Unmapped { position: 8 });
    }

    #[test]
    fn lookup_is_total_and_not_found_is_most_negative() {
        let table = AlarmTable::statuses(rows(&[(1, "X"), (2, "Y"), (3, "NO_ALARM")]));
        let synthetic: Vec<i32> = table
            .entries()
            .iter()
            .filter(|e| matches!(e.id, AlarmId::Unmapped { .. }))
            .map(|e| e.id.raw())
            .collect();
        assert_eq!(synthetic, vec![-1, -2]);

        let missing = table.lookup(99);
        assert_eq!(missing, AlarmId::NotFound { table_len: 3 });
        assert!(synthetic.iter().all(|&id| missing.raw() < id));
        assert_eq!(table.lookup(99), missing);
        assert_eq!(table.lookup(1), table.lookup(1));
    }

    #[test]
    fn unmapped_ids_are_distinct_from_canonical() {
        let table = AlarmTable::severities(rows(&[(7, "WEIRD")]));
        let id = table.lookup(7);
        assert!(!id.is_known());
        assert_ne!(id.raw(), i32::from(NO_ALARM));
    }
}
