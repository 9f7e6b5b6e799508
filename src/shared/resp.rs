//! Inbound RESP request framing.
//!
//! A request is a length-prefixed array of length-prefixed bulk strings.
//! The decoder is incremental: it consumes nothing from the connection
//! buffer until a complete request is present, and holds no state of its
//! own between requests.

use bytes::{Buf, Bytes, BytesMut};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Upper bound on elements in one request array.
const MAX_REQUEST_ARGS: usize = 1024 * 1024;

/// Upper bound on a single bulk string payload.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Try to decode one complete request from `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full request;
/// the caller should read more bytes and retry. On success the consumed
/// bytes are removed from `buf` and the argument vector is returned.
///
/// # Examples
///
/// ```rust
/// use bytes::BytesMut;
/// use fincache::shared::resp::decode_request;
///
/// let mut buf = BytesMut::from(&b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n"[..]);
/// let args = decode_request(&mut buf).unwrap().unwrap();
/// assert_eq!(args.len(), 2);
/// assert_eq!(&args[0][..], b"ECHO");
/// assert!(buf.is_empty());
/// ```
pub fn decode_request(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>> {
    let mut pos = 0usize;

    let Some(header) = read_line(buf, &mut pos)? else {
        return Ok(None);
    };
    if header.first() != Some(&b'*') {
        return Err(Error::Protocol(format!(
            "expected array header, got {:?}",
            header.first().map(|b| *b as char)
        )));
    }
    let count = parse_len(&header[1..])?;
    if count > MAX_REQUEST_ARGS {
        return Err(Error::Protocol(format!("request array too large ({count})")));
    }
    if count == 0 {
        buf.advance(pos);
        return Ok(Some(Vec::new()));
    }

    // Typical commands carry a handful of arguments; keep their offsets
    // on the stack.
    let mut bulk_ranges: SmallVec<[(usize, usize); 16]> = SmallVec::new();
    for _ in 0..count {
        let Some(header) = read_line(buf, &mut pos)? else {
            return Ok(None);
        };
        if header.first() != Some(&b'$') {
            return Err(Error::Protocol("expected bulk string header".to_string()));
        }
        let len = parse_len(&header[1..])?;
        if len > MAX_BULK_LEN {
            return Err(Error::Protocol(format!("bulk string too large ({len})")));
        }
        if buf.len() < pos + len + 2 {
            return Ok(None);
        }
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Err(Error::Protocol("bulk string missing terminator".to_string()));
        }
        bulk_ranges.push((pos, len));
        pos += len + 2;
    }

    // Full request present: freeze the consumed prefix and slice args out
    // of it without copying payloads.
    let consumed = buf.split_to(pos).freeze();
    let args = bulk_ranges
        .into_iter()
        .map(|(start, len)| consumed.slice(start..start + len))
        .collect();
    Ok(Some(args))
}

/// Read one CRLF-terminated line starting at `*pos`, advancing `*pos` past
/// the terminator. Returns `Ok(None)` when no full line is buffered.
fn read_line<'a>(buf: &'a BytesMut, pos: &mut usize) -> Result<Option<&'a [u8]>> {
    let data = &buf[*pos..];
    let Some(nl) = data.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    if nl == 0 || data[nl - 1] != b'\r' {
        return Err(Error::Protocol("line not CRLF-terminated".to_string()));
    }
    let line = &data[..nl - 1];
    *pos += nl + 1;
    Ok(Some(line))
}

fn parse_len(digits: &[u8]) -> Result<usize> {
    if digits.is_empty() {
        return Err(Error::Protocol("empty length".to_string()));
    }
    let mut value = 0usize;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol("invalid length digit".to_string()));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or_else(|| Error::Protocol("length overflow".to_string()))?;
    }
    Ok(value)
}
