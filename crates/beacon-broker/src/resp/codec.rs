//! RESP2 frame codec.
//!
//! ```text
//! +OK\r\n                   simple string
//! -ERR message\r\n          error
//! :42\r\n                   integer
//! $5\r\nhello\r\n           bulk string ($-1 is null)
//! *2\r\n$3\r\nfoo\r\n...    array (*-1 is null)
//! ```
//!
//! Frame size is checked before buffering a bulk payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::RespError;

/// Default upper bound on a single frame (8 MiB).
pub const DEFAULT_MAX_FRAME: usize = 8 * 1024 * 1024;

/// Maximum nesting depth accepted for arrays.
const MAX_DEPTH: usize = 8;

/// A RESP2 value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RespValue {
    /// `+...`
    Simple(String),
    /// `-...`
    Error(String),
    /// `:...`
    Integer(i64),
    /// `$...`, `None` for the null bulk string.
    Bulk(Option<Bytes>),
    /// `*...`, `None` for the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// A command as an array of bulk strings.
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self::Array(Some(
            args.into_iter()
                .map(|a| Self::Bulk(Some(Bytes::copy_from_slice(a.as_ref()))))
                .collect(),
        ))
    }

    /// A non-null bulk string.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(Some(data.into()))
    }

    /// Borrow the payload of a simple or bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Simple(s) => Some(s.as_bytes()),
            Self::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Whether this is a simple or bulk string equal to `expected`, ignoring ASCII case.
    pub fn is_str(&self, expected: &str) -> bool {
        self.as_bytes()
            .is_some_and(|b| b.eq_ignore_ascii_case(expected.as_bytes()))
    }
}

/// Encodes and decodes [`RespValue`] frames.
#[derive(Clone, Copy, Debug)]
pub struct RespCodec {
    max_frame: usize,
}

impl RespCodec {
    /// Codec with a custom frame limit.
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        match parse(src, 0, self.max_frame, 0)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None if src.len() > self.max_frame => Err(RespError::TooLarge {
                max: self.max_frame,
            }),
            None => Ok(None),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), RespError> {
        write_value(&item, dst);
        Ok(())
    }
}

fn write_value(value: &RespValue, dst: &mut BytesMut) {
    match value {
        RespValue::Simple(s) => write_line(dst, b'+', s.as_bytes()),
        RespValue::Error(s) => write_line(dst, b'-', s.as_bytes()),
        RespValue::Integer(n) => write_line(dst, b':', n.to_string().as_bytes()),
        RespValue::Bulk(None) => dst.put_slice(b"$-1\r\n"),
        RespValue::Bulk(Some(data)) => {
            write_line(dst, b'$', data.len().to_string().as_bytes());
            dst.put_slice(data);
            dst.put_slice(b"\r\n");
        }
        RespValue::Array(None) => dst.put_slice(b"*-1\r\n"),
        RespValue::Array(Some(items)) => {
            write_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_value(item, dst);
            }
        }
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

/// Parse one value starting at `pos`. `Ok(None)` means more bytes are needed.
/// On success returns the value and the position just past it.
fn parse(
    buf: &[u8],
    pos: usize,
    max_frame: usize,
    depth: usize,
) -> Result<Option<(RespValue, usize)>, RespError> {
    if depth > MAX_DEPTH {
        return Err(RespError::Malformed("array nesting too deep".into()));
    }
    let Some(&prefix) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match prefix {
        b'+' => Ok(Some((RespValue::Simple(utf8(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(utf8(line)?), next))),
        b':' => Ok(Some((RespValue::Integer(integer(line)?), next))),
        b'$' => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Bulk(None), next)));
            }
            let len = usize::try_from(len)
                .map_err(|_| RespError::Malformed(format!("invalid bulk length {len}")))?;
            if len > max_frame {
                return Err(RespError::TooLarge { max: max_frame });
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(RespError::Malformed("bulk string missing terminator".into()));
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((RespValue::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let count = integer(line)?;
            if count == -1 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            let count = usize::try_from(count)
                .map_err(|_| RespError::Malformed(format!("invalid array length {count}")))?;
            // each element needs at least 3 bytes
            if count > max_frame / 3 {
                return Err(RespError::TooLarge { max: max_frame });
            }
            let mut items = Vec::with_capacity(count.min(64));
            let mut cursor = next;
            for _ in 0..count {
                match parse(buf, cursor, max_frame, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(RespError::Malformed(format!(
            "unknown type byte 0x{other:02x}"
        ))),
    }
}

/// Line body starting at `pos` and the position after its `\r\n`.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], pos + idx + 2))
}

fn utf8(line: &[u8]) -> Result<String, RespError> {
    String::from_utf8(line.to_vec()).map_err(|_| RespError::Malformed("invalid UTF-8".into()))
}

fn integer(line: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| RespError::Malformed("invalid integer".into()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn decode_all(input: &[u8]) -> Vec<RespValue> {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(v) = codec.decode(&mut buf).unwrap() {
            out.push(v);
        }
        assert!(buf.is_empty(), "trailing bytes: {buf:?}");
        out
    }

    #[test]
    fn decode_scalars() {
        let values = decode_all(b"+OK\r\n-ERR nope\r\n:-12\r\n$-1\r\n*-1\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::Simple("OK".into()),
                RespValue::Error("ERR nope".into()),
                RespValue::Integer(-12),
                RespValue::Bulk(None),
                RespValue::Array(None),
            ]
        );
    }

    #[test]
    fn decode_pubsub_message() {
        let values = decode_all(b"*3\r\n$7\r\nmessage\r\n$6\r\nevents\r\n$5\r\nhe\r\no\r\n");
        assert_eq!(
            values,
            vec![RespValue::Array(Some(vec![
                RespValue::bulk("message"),
                RespValue::bulk("events"),
                RespValue::bulk(Bytes::from_static(b"he\r\no")),
            ]))]
        );
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let mut codec = RespCodec::default();
        let full = b"*2\r\n$9\r\nsubscribe\r\n:1\r\n";
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            let decoded = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(decoded.is_none(), "decoded early at byte {i}");
            } else {
                assert_eq!(
                    decoded,
                    Some(RespValue::Array(Some(vec![
                        RespValue::bulk("subscribe"),
                        RespValue::Integer(1),
                    ])))
                );
            }
        }
    }

    #[test]
    fn encode_command() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(RespValue::command(["PUBLISH", "events", "hi"]), &mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            b"*3\r\n$7\r\nPUBLISH\r\n$6\r\nevents\r\n$2\r\nhi\r\n"
        );
    }

    #[test]
    fn oversized_bulk_rejected_before_buffering() {
        let mut codec = RespCodec::new(16);
        let mut buf = BytesMut::from(&b"$1000\r\n"[..]);
        assert_matches!(codec.decode(&mut buf), Err(RespError::TooLarge { max: 16 }));
    }

    #[test]
    fn unterminated_line_over_limit_rejected() {
        let mut codec = RespCodec::new(16);
        let mut buf = BytesMut::from(&b"+aaaaaaaaaaaaaaaaaaaaaaaa"[..]);
        assert_matches!(codec.decode(&mut buf), Err(RespError::TooLarge { .. }));
    }

    #[test]
    fn garbage_rejected() {
        let mut codec = RespCodec::default();
        assert_matches!(
            codec.decode(&mut BytesMut::from(&b"?what\r\n"[..])),
            Err(RespError::Malformed(_))
        );
        assert_matches!(
            codec.decode(&mut BytesMut::from(&b":abc\r\n"[..])),
            Err(RespError::Malformed(_))
        );
        assert_matches!(
            codec.decode(&mut BytesMut::from(&b"$2\r\nabcd\r\n"[..])),
            Err(RespError::Malformed(_))
        );
    }

    #[test]
    fn is_str_ignores_case() {
        assert!(RespValue::Simple("PONG".into()).is_str("pong"));
        assert!(RespValue::bulk("Message").is_str("message"));
        assert!(!RespValue::Integer(1).is_str("1"));
    }
}
