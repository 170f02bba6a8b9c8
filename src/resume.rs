//! Locating where an interrupted partition file left off.
//!
//! A partition file is its own resume state: the header names the stored
//! type and year, and the last complete line holds the newest sample key.
//! Bytes after the final newline belong to a record that was cut short
//! and are reported so the writer can truncate them.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, warn};
use memmap2::MmapOptions;
use prost::Message;

use crate::framing::{self, NEWLINE};
use crate::payload::DeclaredType;
use crate::proto::{PayloadInfo, PayloadType, SampleKey};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// No usable content; the file gets a fresh header.
    Fresh,
    Append {
        /// `(secondsintoyear, nano)` of the last record, `None` if the file
        /// holds only a header.
        last: Option<(u32, u32)>,
        year: i32,
        /// Length of the file up to and including its last newline.
        valid_len: u64,
    },
}

pub trait ResumeLocator {
    /// Inspect `path`. A header whose type differs from `expected` yields
    /// [`Error::TypeMismatch`].
    fn locate(&self, path: &Path, expected: DeclaredType) -> Result<Resume>;
}

/// Reads the header and trailing record of a partition file through a
/// read-only memory map.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastRecordLocator;

impl ResumeLocator for LastRecordLocator {
    fn locate(&self, path: &Path, expected: DeclaredType) -> Result<Resume> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Resume::Fresh),
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Resume::Fresh);
        }
        // SAFETY: the map is read-only and dropped before this call returns;
        // partition files have a single writer, which is this process.
        let map = unsafe { MmapOptions::new().map(&file)? };
        locate_in(&map, path, expected)
    }
}

fn locate_in(bytes: &[u8], path: &Path, expected: DeclaredType) -> Result<Resume> {
    let Some(last_newline) = bytes.iter().rposition(|&b| b == NEWLINE) else {
        warn!("{}: header record is incomplete, rewriting", path.display());
        return Ok(Resume::Fresh);
    };
    let valid_len = last_newline + 1;
    if valid_len < bytes.len() {
        warn!(
            "{}: dropping {} bytes of a torn trailing record",
            path.display(),
            bytes.len() - valid_len
        );
    }

    let header_end = bytes
        .iter()
        .position(|&b| b == NEWLINE)
        .map(|pos| pos + 1)
        .unwrap_or(valid_len);
    let info = PayloadInfo::decode(framing::unescape(&bytes[..header_end])?.as_slice())?;
    let found = PayloadType::try_from(info.r#type).ok();
    let wanted = expected.payload_type();
    if found != Some(wanted) {
        return Err(Error::TypeMismatch {
            expected: wanted,
            found,
        });
    }

    let last = if valid_len > header_end {
        let start = bytes[..valid_len - 1]
            .iter()
            .rposition(|&b| b == NEWLINE)
            .map(|pos| pos + 1)
            .unwrap_or(0)
            .max(header_end);
        let key = SampleKey::decode(framing::unescape(&bytes[start..valid_len])?.as_slice())?;
        Some((key.secondsintoyear, key.nano))
    } else {
        None
    };
    debug!(
        "{}: {} of {} bytes valid, last record {:?}",
        path.display(),
        valid_len,
        bytes.len(),
        last
    );
    Ok(Resume::Append {
        last,
        year: info.year,
        valid_len: valid_len as u64,
    })
}
