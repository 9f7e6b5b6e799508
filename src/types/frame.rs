//! Outbound wire frames.
//!
//! A [`Frame`] is one fully-typed RESP reply. Encoding writes the textbook
//! dialect: simple strings, errors, integers, bulk strings, null bulks and
//! arrays. Inbound parsing lives in [`crate::shared::resp`]; this type owns
//! only the reply side.

use bytes::{BufMut, Bytes, BytesMut};

/// A single RESP reply frame.
///
/// # Examples
///
/// ```rust
/// use fincache::types::Frame;
///
/// let mut buf = bytes::BytesMut::new();
/// Frame::ok().encode(&mut buf);
/// assert_eq!(&buf[..], b"+OK\r\n");
///
/// let mut buf = bytes::BytesMut::new();
/// Frame::bulk("bar").encode(&mut buf);
/// assert_eq!(&buf[..], b"$3\r\nbar\r\n");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+…\r\n`
    Simple(String),
    /// `-…\r\n`
    Error(String),
    /// `:N\r\n`
    Integer(i64),
    /// `$len\r\n…\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    NullBulk,
    /// `*N\r\n<elements>`
    Array(Vec<Frame>),
}

impl Frame {
    /// The canonical `+OK` reply.
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// Build a bulk frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Bulk frame holding a float rendered the way Redis renders scores:
    /// integral values drop the fraction.
    pub fn bulk_f64(value: f64) -> Self {
        Frame::Bulk(Bytes::from(format_f64(value)))
    }

    /// Serialize this frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            },
            Frame::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            },
            Frame::Integer(n) => {
                buf.put_u8(b':');
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            },
            Frame::Bulk(data) => {
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            },
            Frame::NullBulk => buf.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                buf.put_u8(b'*');
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for item in items {
                    item.encode(buf);
                }
            },
        }
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.len()
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Frame::Integer(n)
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::Bulk(Bytes::from(s))
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl<T: Into<Frame>> From<Option<T>> for Frame {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Frame::NullBulk,
        }
    }
}

/// Render a score without a trailing `.0` for integral values.
pub fn format_f64(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn encodes_all_reply_kinds() {
        assert_eq!(encoded(Frame::Simple("PONG".into())), b"+PONG\r\n");
        assert_eq!(encoded(Frame::Error("ERR boom".into())), b"-ERR boom\r\n");
        assert_eq!(encoded(Frame::Integer(-42)), b":-42\r\n");
        assert_eq!(encoded(Frame::bulk("bar")), b"$3\r\nbar\r\n");
        assert_eq!(encoded(Frame::NullBulk), b"$-1\r\n");
    }

    #[test]
    fn encodes_nested_arrays() {
        let frame = Frame::Array(vec![
            Frame::bulk("message"),
            Frame::bulk("md"),
            Frame::Array(vec![Frame::Integer(1)]),
        ]);
        assert_eq!(
            encoded(frame),
            b"*3\r\n$7\r\nmessage\r\n$2\r\nmd\r\n*1\r\n:1\r\n"
        );
    }

    #[test]
    fn integral_scores_drop_fraction() {
        assert_eq!(format_f64(150.0), "150");
        assert_eq!(format_f64(150.25), "150.25");
        assert_eq!(format_f64(-0.5), "-0.5");
    }
}
