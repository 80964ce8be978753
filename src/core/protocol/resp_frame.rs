// src/core/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder`/`Decoder` used for both the client-facing and the
//! backend-facing sockets.

use crate::core::errors::ProxyError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to keep a malformed or hostile frame from exhausting memory.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// A single RESP value. RESP3 container types are modeled only so that a
/// frame received from one side can be re-encoded byte-faithfully for the
/// other; the dispatcher itself only ever inspects `Array`/`BulkString`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
    // RESP3 passthrough-only additions.
    Map(Vec<(RespFrame, RespFrame)>),
    Set(Vec<RespFrame>),
    Boolean(bool),
    Double(f64),
    BigNumber(String),
    VerbatimString(String, Bytes),
}

impl RespFrame {
    /// Builds a multi-bulk array frame for a command name and its raw argument bytes.
    pub fn command(parts: &[&[u8]]) -> RespFrame {
        RespFrame::Array(
            parts
                .iter()
                .map(|p| RespFrame::BulkString(Bytes::copy_from_slice(p)))
                .collect(),
        )
    }

    pub fn error(msg: impl Into<String>) -> RespFrame {
        RespFrame::Error(format!("ERR {}", msg.into()))
    }

    /// Returns the frame's elements if this is an `Array` of `BulkString`s,
    /// i.e. the shape a well-formed client command takes.
    pub fn as_command_parts(&self) -> Option<Vec<&Bytes>> {
        match self {
            RespFrame::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| match item {
                    RespFrame::BulkString(b) => Some(b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>, ProxyError> {
        let mut buf = BytesMut::new();
        RespFrameCodec::default().encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// True if this looks like a RESP error reply whose text starts with `prefix`
    /// (e.g. `"MOVED"`), used to detect post-migration redirection replies.
    pub fn error_prefix(&self) -> Option<&str> {
        match self {
            RespFrame::Error(s) => s.split_whitespace().next(),
            _ => None,
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec {
    protocol_version: u8,
}

impl RespFrameCodec {
    pub fn new(protocol_version: u8) -> Self {
        Self { protocol_version }
    }
}

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
            RespFrame::Map(map) => {
                self.require_resp3("Map")?;
                dst.extend_from_slice(b"%");
                dst.extend_from_slice(map.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for (k, v) in map {
                    self.encode(k, dst)?;
                    self.encode(v, dst)?;
                }
            }
            RespFrame::Set(set) => {
                self.require_resp3("Set")?;
                dst.extend_from_slice(b"~");
                dst.extend_from_slice(set.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in set {
                    self.encode(frame, dst)?;
                }
            }
            RespFrame::Boolean(b) => {
                self.require_resp3("Boolean")?;
                dst.extend_from_slice(if b { b"#t" } else { b"#f" });
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Double(d) => {
                self.require_resp3("Double")?;
                dst.extend_from_slice(b",");
                dst.extend_from_slice(d.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BigNumber(bn) => {
                self.require_resp3("BigNumber")?;
                dst.extend_from_slice(b"(");
                dst.extend_from_slice(bn.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::VerbatimString(format, text) => {
                self.require_resp3("VerbatimString")?;
                dst.extend_from_slice(b"=");
                dst.extend_from_slice((text.len() + 4).to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(format.as_bytes());
                dst.extend_from_slice(b":");
                dst.extend_from_slice(&text);
                dst.extend_from_slice(CRLF);
            }
        }
        Ok(())
    }
}

impl RespFrameCodec {
    fn require_resp3(&self, type_name: &str) -> Result<(), ProxyError> {
        if self.protocol_version < 3 {
            Err(ProxyError::ProtocolError(format!(
                "{type_name} type not supported in RESP2"
            )))
        } else {
            Ok(())
        }
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(ProxyError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Entry point: inspects the first byte and dispatches to the right parser.
/// An inline command (a line with no type prefix, terminated by CRLF) is
/// accepted too, split on whitespace into a multi-bulk-equivalent `Array`.
fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    if src.is_empty() {
        return Err(ProxyError::IncompleteData);
    }
    match src[0] {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        b'%' => parse_map(src),
        b'~' => parse_set(src),
        b'#' => parse_boolean(src),
        b',' => parse_double(src),
        b'(' => parse_big_number(src),
        b'=' => parse_verbatim_string(src),
        _ => parse_inline(src),
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

fn parse_line(src: &[u8]) -> Result<(&[u8], usize), ProxyError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(ProxyError::IncompleteData)
}

fn parse_inline(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(src)?;
    if line.len() > 64 * 1024 {
        return Err(ProxyError::SyntaxError);
    }
    let parts: Vec<RespFrame> = line
        .split(|&b| b == b' ')
        .filter(|p| !p.is_empty())
        .map(|p| RespFrame::BulkString(Bytes::copy_from_slice(p)))
        .collect();
    Ok((RespFrame::Array(parts), len))
}

fn parse_simple_string(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::SimpleString(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_error(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::Error(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_integer(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let i = s.parse::<i64>().map_err(|_| ProxyError::SyntaxError)?;
    Ok((RespFrame::Integer(i), len + 1))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let str_len = s.parse::<isize>().map_err(|_| ProxyError::SyntaxError)?;

    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(ProxyError::SyntaxError);
    }

    let total_len_prefix = len_of_line + 1;
    if src.len() < total_len_prefix + str_len + CRLF_LEN {
        return Err(ProxyError::IncompleteData);
    }
    if &src[total_len_prefix + str_len..total_len_prefix + str_len + CRLF_LEN] != CRLF {
        return Err(ProxyError::SyntaxError);
    }

    let data_start = total_len_prefix;
    let data_end = total_len_prefix + str_len;
    let data = Bytes::copy_from_slice(&src[data_start..data_end]);
    Ok((RespFrame::BulkString(data), data_end + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let arr_len = s.parse::<isize>().map_err(|_| ProxyError::SyntaxError)?;

    if arr_len == -1 {
        return Ok((RespFrame::NullArray, len_of_line + 1));
    }
    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(ProxyError::SyntaxError);
    }

    let mut frames = Vec::with_capacity(arr_len.min(4096));
    let mut cursor = len_of_line + 1;
    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        frames.push(frame);
        cursor += frame_len;
    }
    Ok((RespFrame::Array(frames), cursor))
}

fn parse_map(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let map_len = s
        .parse::<isize>()
        .map_err(|_| ProxyError::SyntaxError)?
        .max(0) as usize;
    if map_len > MAX_FRAME_ELEMENTS {
        return Err(ProxyError::SyntaxError);
    }
    let mut entries = Vec::with_capacity(map_len.min(4096));
    let mut cursor = len_of_line + 1;
    for _ in 0..map_len {
        let (k, kl) = parse_frame(&src[cursor..])?;
        cursor += kl;
        let (v, vl) = parse_frame(&src[cursor..])?;
        cursor += vl;
        entries.push((k, v));
    }
    Ok((RespFrame::Map(entries), cursor))
}

fn parse_set(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let set_len = s
        .parse::<isize>()
        .map_err(|_| ProxyError::SyntaxError)?
        .max(0) as usize;
    if set_len > MAX_FRAME_ELEMENTS {
        return Err(ProxyError::SyntaxError);
    }
    let mut elems = Vec::with_capacity(set_len.min(4096));
    let mut cursor = len_of_line + 1;
    for _ in 0..set_len {
        let (f, fl) = parse_frame(&src[cursor..])?;
        elems.push(f);
        cursor += fl;
    }
    Ok((RespFrame::Set(elems), cursor))
}

fn parse_boolean(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(&src[1..])?;
    match line {
        b"t" => Ok((RespFrame::Boolean(true), len + 1)),
        b"f" => Ok((RespFrame::Boolean(false), len + 1)),
        _ => Err(ProxyError::SyntaxError),
    }
}

fn parse_double(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let d = s.parse::<f64>().map_err(|_| ProxyError::SyntaxError)?;
    Ok((RespFrame::Double(d), len + 1))
}

fn parse_big_number(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line).to_string();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '+') {
        return Err(ProxyError::SyntaxError);
    }
    Ok((RespFrame::BigNumber(s), len + 1))
}

fn parse_verbatim_string(src: &[u8]) -> Result<(RespFrame, usize), ProxyError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let str_len = s
        .parse::<isize>()
        .map_err(|_| ProxyError::SyntaxError)?
        .max(0) as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(ProxyError::SyntaxError);
    }

    let total_len_prefix = len_of_line + 1;
    if src.len() < total_len_prefix + str_len + CRLF_LEN {
        return Err(ProxyError::IncompleteData);
    }
    if &src[total_len_prefix + str_len..total_len_prefix + str_len + CRLF_LEN] != CRLF {
        return Err(ProxyError::SyntaxError);
    }

    let data_start = total_len_prefix;
    let data_end = total_len_prefix + str_len;
    let data_slice = &src[data_start..data_end];
    let colon_pos = data_slice
        .iter()
        .position(|&b| b == b':')
        .ok_or(ProxyError::SyntaxError)?;
    let format = String::from_utf8_lossy(&data_slice[..colon_pos]).to_string();
    let text = Bytes::copy_from_slice(&data_slice[colon_pos + 1..]);
    Ok((RespFrame::VerbatimString(format, text), data_end + CRLF_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &[u8]) -> (RespFrame, usize) {
        let mut codec = RespFrameCodec::default();
        let mut buf = BytesMut::from(input);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        (frame, input.len() - buf.len())
    }

    #[test]
    fn parses_multibulk_command() {
        let (frame, _) = roundtrip(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        let parts = frame.as_command_parts().unwrap();
        assert_eq!(parts[0].as_ref(), b"SET");
        assert_eq!(parts[1].as_ref(), b"foo");
        assert_eq!(parts[2].as_ref(), b"bar");
    }

    #[test]
    fn parses_inline_command() {
        let (frame, len) = roundtrip(b"PING\r\n");
        let parts = frame.as_command_parts().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_ref(), b"PING");
        assert_eq!(len, 6);
    }

    #[test]
    fn incomplete_frame_yields_none() {
        let mut codec = RespFrameCodec::default();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_roundtrips_simple_string() {
        let frame = RespFrame::SimpleString("OK".into());
        let bytes = frame.encode_to_vec().unwrap();
        assert_eq!(bytes, b"+OK\r\n");
    }

    #[test]
    fn error_prefix_detects_moved() {
        let frame = RespFrame::Error("MOVED 12 127.0.0.1:6380".into());
        assert_eq!(frame.error_prefix(), Some("MOVED"));
    }
}
