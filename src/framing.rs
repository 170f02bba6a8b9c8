//! Line framing for partition files.
//!
//! Every record is one line. Bytes that would break the line structure are
//! replaced by a two-byte escape sequence, so a reader can find record
//! boundaries by scanning for `\n` alone.
//!
//! | payload byte | frame bytes   |
//! |--------------|---------------|
//! | `0x1B`       | `0x1B 0x01`   |
//! | `\n`         | `0x1B 0x02`   |
//! | `\r`         | `0x1B 0x03`   |

use crate::{Error, Result};

pub const ESCAPE: u8 = 0x1B;
pub const NEWLINE: u8 = b'\n';
pub const CARRIAGE_RETURN: u8 = b'\r';

const ESCAPE_CODE: u8 = 0x01;
const NEWLINE_CODE: u8 = 0x02;
const CARRIAGE_RETURN_CODE: u8 = 0x03;

/// Escape `payload` and terminate it with a newline.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + payload.len() / 16 + 1);
    escape_into(payload, &mut frame);
    frame
}

/// Append the framed form of `payload` to `out`.
pub fn escape_into(payload: &[u8], out: &mut Vec<u8>) {
    for &byte in payload {
        match byte {
            ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPE_CODE]),
            NEWLINE => out.extend_from_slice(&[ESCAPE, NEWLINE_CODE]),
            CARRIAGE_RETURN => out.extend_from_slice(&[ESCAPE, CARRIAGE_RETURN_CODE]),
            other => out.push(other),
        }
    }
    out.push(NEWLINE);
}

/// Decode one frame. A single trailing newline, if present, is the
/// terminator and is dropped.
pub fn unescape(frame: &[u8]) -> Result<Vec<u8>> {
    let body = frame.strip_suffix(&[NEWLINE]).unwrap_or(frame);
    let mut out = Vec::with_capacity(unescaped_len(body)?);
    let mut bytes = body.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        let decoded = match bytes.next() {
            Some(&ESCAPE_CODE) => ESCAPE,
            Some(&NEWLINE_CODE) => NEWLINE,
            Some(&CARRIAGE_RETURN_CODE) => CARRIAGE_RETURN,
            Some(_) => return Err(Error::Framing("unknown escape code")),
            None => return Err(Error::Framing("dangling escape byte")),
        };
        out.push(decoded);
    }
    Ok(out)
}

/// Size of the payload `body` decodes to, without decoding it.
pub fn unescaped_len(body: &[u8]) -> Result<usize> {
    let escapes = body.iter().filter(|&&b| b == ESCAPE).count();
    // Each escape consumes the byte after it, so a well-formed body never
    // has more escapes than half its length.
    if escapes * 2 > body.len() {
        return Err(Error::Framing("dangling escape byte"));
    }
    Ok(body.len() - escapes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_bytes_in_order() {
        let frame = escape(&[b'a', ESCAPE, NEWLINE, CARRIAGE_RETURN, b'z']);
        assert_eq!(
            frame,
            vec![b'a', 0x1B, 0x01, 0x1B, 0x02, 0x1B, 0x03, b'z', b'\n']
        );
    }

    #[test]
    fn empty_payload_is_a_bare_newline() {
        assert_eq!(escape(&[]), vec![b'\n']);
        assert_eq!(unescape(b"\n").expect("unescape"), Vec::<u8>::new());
    }

    #[test]
    fn round_trips_every_byte_value() {
        let payload: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        let frame = escape(&payload);
        let newlines = frame.iter().filter(|&&b| b == NEWLINE).count();
        assert_eq!(newlines, 1);
        assert_eq!(frame.last(), Some(&NEWLINE));
        assert_eq!(unescape(&frame).expect("unescape"), payload);
    }

    #[test]
    fn well_formed_frames_survive_decode_then_encode() {
        let frame = vec![b'x', 0x1B, 0x02, b'y', 0x1B, 0x01, b'\n'];
        let payload = unescape(&frame).expect("unescape");
        assert_eq!(escape(&payload), frame);
    }

    #[test]
    fn rejects_dangling_escape() {
        let err = unescape(&[b'a', ESCAPE]).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
        let err = unescape(&[b'a', ESCAPE, b'\n']).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn rejects_unknown_escape_code() {
        let err = unescape(&[ESCAPE, 0x04, b'\n']).unwrap_err();
        assert!(matches!(err, Error::Framing("unknown escape code")));
    }

    #[test]
    fn unescaped_len_matches_decode() {
        let frame = escape(b"\x1b\n\rabc");
        let body = &frame[..frame.len() - 1];
        assert_eq!(unescaped_len(body).expect("len"), 6);
    }
}
