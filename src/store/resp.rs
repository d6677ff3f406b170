//! RESP2/RESP3 frame codec.
//!
//! Commands are always sent as arrays of bulk strings. Replies may use any
//! RESP3 type; attribute frames are parsed and dropped, sets are flattened into
//! arrays, verbatim strings into bulk strings and big numbers into simple
//! strings.

use bytes::{BufMut, Bytes, BytesMut};

use super::StoreError;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Boolean(bool),
    Double(f64),
    Array(Vec<Frame>),
    Map(Vec<(Frame, Frame)>),
    /// Out-of-band server push (RESP3)
    Push(Vec<Frame>),
}

impl Frame {
    /// Text content of a simple or bulk string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Describes the frame for error messages.
    pub fn describe(&self) -> String {
        match self {
            Frame::Simple(s) => format!("+{s}"),
            Frame::Error(e) => format!("-{e}"),
            Frame::Integer(i) => format!(":{i}"),
            Frame::Bulk(b) => format!("${} bytes", b.len()),
            Frame::Null => "null".to_string(),
            Frame::Boolean(v) => format!("#{v}"),
            Frame::Double(d) => format!(",{d}"),
            Frame::Array(items) => format!("array of {}", items.len()),
            Frame::Map(pairs) => format!("map of {}", pairs.len()),
            Frame::Push(items) => format!("push of {}", items.len()),
        }
    }
}

/// Appends `args` to `dst` as a command array of bulk strings.
pub fn encode_command(args: &[&[u8]], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    dst.put_slice(args.len().to_string().as_bytes());
    dst.put_slice(b"\r\n");
    for arg in args {
        dst.put_u8(b'$');
        dst.put_slice(arg.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

/// Encodes a reply frame. Used by the scripted servers in tests and by tools
/// that need to speak the server side of the protocol.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => {
            dst.put_u8(b'+');
            dst.put_slice(s.as_bytes());
            dst.put_slice(b"\r\n");
        }
        Frame::Error(e) => {
            dst.put_u8(b'-');
            dst.put_slice(e.as_bytes());
            dst.put_slice(b"\r\n");
        }
        Frame::Integer(i) => {
            dst.put_slice(format!(":{i}\r\n").as_bytes());
        }
        Frame::Bulk(b) => {
            dst.put_slice(format!("${}\r\n", b.len()).as_bytes());
            dst.put_slice(b);
            dst.put_slice(b"\r\n");
        }
        Frame::Null => dst.put_slice(b"_\r\n"),
        Frame::Boolean(v) => dst.put_slice(if *v { b"#t\r\n" } else { b"#f\r\n" }),
        Frame::Double(d) => dst.put_slice(format!(",{d}\r\n").as_bytes()),
        Frame::Array(items) | Frame::Push(items) => {
            let tag = if matches!(frame, Frame::Push(_)) { '>' } else { '*' };
            dst.put_slice(format!("{tag}{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_frame(item, dst);
            }
        }
        Frame::Map(pairs) => {
            dst.put_slice(format!("%{}\r\n", pairs.len()).as_bytes());
            for (k, v) in pairs {
                encode_frame(k, dst);
                encode_frame(v, dst);
            }
        }
    }
}

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, otherwise
/// the frame and the number of bytes it occupied.
pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, StoreError> {
    parse_at(buf, 0)
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(Frame, usize)>, StoreError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, after_line)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((Frame::Simple(text(line)?), after_line))),
        b'-' => Ok(Some((Frame::Error(text(line)?), after_line))),
        b':' => Ok(Some((Frame::Integer(number(line)?), after_line))),
        b'(' => Ok(Some((Frame::Simple(text(line)?), after_line))),
        b'_' => Ok(Some((Frame::Null, after_line))),
        b'#' => match line {
            b"t" => Ok(Some((Frame::Boolean(true), after_line))),
            b"f" => Ok(Some((Frame::Boolean(false), after_line))),
            other => Err(protocol(format!("invalid boolean {other:?}"))),
        },
        b',' => {
            let raw = text(line)?;
            let value = match raw.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => other
                    .parse()
                    .map_err(|_| protocol(format!("invalid double {other}")))?,
            };
            Ok(Some((Frame::Double(value), after_line)))
        }
        b'$' | b'!' | b'=' => {
            let len = number(line)?;
            if len < 0 {
                return Ok(Some((Frame::Null, after_line)));
            }
            let len = len as usize;
            let end = after_line + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(protocol("bulk string not terminated by CRLF".to_string()));
            }
            let body = &buf[after_line..end];
            let frame = match tag {
                b'!' => Frame::Error(String::from_utf8_lossy(body).into_owned()),
                // verbatim strings carry a three letter format and a colon
                b'=' if body.len() >= 4 => Frame::Bulk(Bytes::copy_from_slice(&body[4..])),
                _ => Frame::Bulk(Bytes::copy_from_slice(body)),
            };
            Ok(Some((frame, end + 2)))
        }
        b'*' | b'~' | b'>' => {
            let count = number(line)?;
            if count < 0 {
                return Ok(Some((Frame::Null, after_line)));
            }
            let Some((items, next)) = parse_many(buf, after_line, count as usize)? else {
                return Ok(None);
            };
            let frame = if tag == b'>' {
                Frame::Push(items)
            } else {
                Frame::Array(items)
            };
            Ok(Some((frame, next)))
        }
        b'%' | b'|' => {
            let count = number(line)?;
            let Some((items, next)) = parse_many(buf, after_line, count.max(0) as usize * 2)?
            else {
                return Ok(None);
            };
            if tag == b'|' {
                // attributes annotate the frame that follows
                return parse_at(buf, next);
            }
            let mut pairs = Vec::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                pairs.push((k, v));
            }
            Ok(Some((Frame::Map(pairs), next)))
        }
        other => Err(protocol(format!("unknown frame type byte {other:#04x}"))),
    }
}

fn parse_many(
    buf: &[u8],
    mut pos: usize,
    count: usize,
) -> Result<Option<(Vec<Frame>, usize)>, StoreError> {
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        match parse_at(buf, pos)? {
            Some((frame, next)) => {
                items.push(frame);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((items, pos)))
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    if start > buf.len() {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|offset| (&buf[start..start + offset], start + offset + 2))
}

fn text(line: &[u8]) -> Result<String, StoreError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| protocol(format!("invalid utf-8: {e}")))
}

fn number(line: &[u8]) -> Result<i64, StoreError> {
    let raw = std::str::from_utf8(line).map_err(|e| protocol(format!("invalid utf-8: {e}")))?;
    raw.parse()
        .map_err(|_| protocol(format!("invalid integer {raw}")))
}

fn protocol(msg: String) -> StoreError {
    StoreError::Protocol(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_encode_command() {
        let mut buf = BytesMut::new();
        encode_command(&[b"SET", b"key-1", b"value"], &mut buf);
        assert_eq!(
            &buf[..],
            b"*3\r\n$3\r\nSET\r\n$5\r\nkey-1\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            parse(b"+OK\r\n").unwrap(),
            Some((Frame::Simple("OK".to_string()), 5))
        );
        assert_eq!(
            parse(b"-ERR bad\r\n").unwrap(),
            Some((Frame::Error("ERR bad".to_string()), 10))
        );
        assert_eq!(parse(b":42\r\n").unwrap(), Some((Frame::Integer(42), 5)));
        assert_eq!(parse(b"$-1\r\n").unwrap(), Some((Frame::Null, 5)));
        assert_eq!(parse(b"_\r\n").unwrap(), Some((Frame::Null, 3)));
        assert_eq!(parse(b"#t\r\n").unwrap(), Some((Frame::Boolean(true), 4)));
        assert_eq!(parse(b",1.5\r\n").unwrap(), Some((Frame::Double(1.5), 6)));
        assert_eq!(parse(b"$5\r\nhello\r\n").unwrap(), Some((bulk("hello"), 11)));
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(parse(b"").unwrap(), None);
        assert_eq!(parse(b"+OK").unwrap(), None);
        assert_eq!(parse(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse(b"*2\r\n$1\r\na\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_push_invalidate() {
        let raw = b">2\r\n$10\r\ninvalidate\r\n*1\r\n$5\r\nkey-7\r\n";
        let (frame, used) = parse(raw).unwrap().unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(
            frame,
            Frame::Push(vec![bulk("invalidate"), Frame::Array(vec![bulk("key-7")])])
        );
    }

    #[test]
    fn test_parse_map_and_attribute() {
        let raw = b"%1\r\n+server\r\n+redis\r\n";
        let (frame, _) = parse(raw).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Map(vec![(
                Frame::Simple("server".to_string()),
                Frame::Simple("redis".to_string())
            )])
        );

        let raw = b"|1\r\n+ttl\r\n:3\r\n+OK\r\n";
        let (frame, used) = parse(raw).unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("OK".to_string()));
        assert_eq!(used, raw.len());
    }

    #[test]
    fn test_parse_verbatim() {
        let (frame, _) = parse(b"=8\r\ntxt:info\r\n").unwrap().unwrap();
        assert_eq!(frame, bulk("info"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse(b"?what\r\n").is_err());
        assert!(parse(b":abc\r\n").is_err());
        assert!(parse(b"$3\r\nabcde\r\n").is_err());
    }

    #[test]
    fn test_frame_roundtrip_through_encoder() {
        let frame = Frame::Push(vec![
            bulk("message"),
            bulk("cache-invalidation"),
            bulk("{\"key\":\"key-1\"}"),
        ]);
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        let (decoded, used) = parse(&buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(used, buf.len());
    }
}
