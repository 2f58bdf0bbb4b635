//! Non-blocking RESP2/RESP3 framing.
//!
//! `protocol_resp.rs` parses a reply by blocking on `TcpStream::read`
//! until each length-prefixed piece has arrived (`parse_array_len`,
//! `parse_bulk_len`, `read_exact_bulk`). A `tokio_util::codec::Decoder`
//! cannot block: it must instead report "not enough bytes yet" and be
//! called again once more arrive. `RespCodec` keeps that same counting
//! logic but turns every place the blocking version would wait into an
//! `Ok(None)` return, so the buffer is never partially consumed.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ClientError;
use crate::resp::value::Value;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Value;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, ClientError> {
        match parse_value(src)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Encodes an outgoing command as a RESP array of bulk strings, the only
/// shape a client ever sends (mirrors `resp_client_command_write`).
impl Encoder<Vec<Vec<u8>>> for RespCodec {
    type Error = ClientError;

    fn encode(&mut self, args: Vec<Vec<u8>>, dst: &mut BytesMut) -> Result<(), ClientError> {
        dst.put_u8(b'*');
        dst.put_slice(args.len().to_string().as_bytes());
        dst.put_slice(CRLF);
        for arg in args {
            dst.put_u8(b'$');
            dst.put_slice(arg.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(&arg);
            dst.put_slice(CRLF);
        }
        Ok(())
    }
}

/// Encodes an arbitrary decoded value back onto the wire. Real clients
/// never need this (they only ever send command arrays), but the test
/// harness's mock server plays the server side of the protocol and needs
/// to write canned `Value` replies, including errors and redirects.
impl Encoder<Value> for RespCodec {
    type Error = ClientError;

    fn encode(&mut self, value: Value, dst: &mut BytesMut) -> Result<(), ClientError> {
        encode_value(&value, dst);
        Ok(())
    }
}

fn encode_value(value: &Value, dst: &mut BytesMut) {
    match value {
        Value::SimpleString(s) => {
            dst.put_u8(b'+');
            dst.put_slice(s.as_bytes());
            dst.put_slice(CRLF);
        }
        Value::Error { kind, message } => {
            dst.put_u8(b'-');
            dst.put_slice(kind.as_bytes());
            dst.put_u8(b' ');
            dst.put_slice(message.as_bytes());
            dst.put_slice(CRLF);
        }
        Value::Integer(n) => {
            dst.put_u8(b':');
            dst.put_slice(n.to_string().as_bytes());
            dst.put_slice(CRLF);
        }
        Value::Double(f) => {
            dst.put_u8(b',');
            dst.put_slice(f.to_string().as_bytes());
            dst.put_slice(CRLF);
        }
        Value::Boolean(b) => {
            dst.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
        }
        Value::Nil => dst.put_slice(b"_\r\n"),
        Value::BigNumber(s) => {
            dst.put_u8(b'(');
            dst.put_slice(s.as_bytes());
            dst.put_slice(CRLF);
        }
        Value::BulkString(bytes) => {
            dst.put_u8(b'$');
            dst.put_slice(bytes.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(bytes);
            dst.put_slice(CRLF);
        }
        Value::Verbatim { format, text } => {
            let body_len = 4 + text.len();
            dst.put_u8(b'=');
            dst.put_slice(body_len.to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(format.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(text.as_bytes());
            dst.put_slice(CRLF);
        }
        Value::Array(items) => encode_aggregate(b'*', items, dst),
        Value::Set(items) => encode_aggregate(b'~', items, dst),
        Value::Push(items) => encode_aggregate(b'>', items, dst),
        Value::Map(pairs) => {
            dst.put_u8(b'%');
            dst.put_slice(pairs.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            for (k, v) in pairs {
                encode_value(k, dst);
                encode_value(v, dst);
            }
        }
    }
}

fn encode_aggregate(tag: u8, items: &[Value], dst: &mut BytesMut) {
    dst.put_u8(tag);
    dst.put_slice(items.len().to_string().as_bytes());
    dst.put_slice(CRLF);
    for item in items {
        encode_value(item, dst);
    }
}

/// Finds the first `\r\n` in `buf`, returning the index of the `\r`.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Reads a line (anything up to but excluding `\r\n`) and returns it along
/// with the number of bytes the line plus its terminator occupies.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let idx = find_crlf(buf)?;
    Some((&buf[..idx], idx + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, ClientError> {
    std::str::from_utf8(line)
        .map_err(|_| ClientError::connection("non-utf8 integer in reply"))?
        .parse()
        .map_err(|_| ClientError::connection("malformed integer in reply"))
}

fn parse_float(line: &[u8]) -> Result<f64, ClientError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ClientError::connection("non-utf8 double in reply"))?;
    match text {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        other => other
            .parse()
            .map_err(|_| ClientError::connection("malformed double in reply")),
    }
}

/// Attempts to parse one complete `Value` from the front of `buf`. Returns
/// `Ok(None)` when `buf` holds an incomplete frame; never consumes anything
/// in that case since the caller only advances on `Some`.
fn parse_value(buf: &[u8]) -> Result<Option<(Value, usize)>, ClientError> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };
    let Some((line, header_len)) = read_line(&buf[1..]) else {
        return Ok(None);
    };
    let header_len = header_len + 1;

    match tag {
        b'+' => {
            let text = String::from_utf8(line.to_vec())
                .map_err(|_| ClientError::connection("non-utf8 simple string"))?;
            Ok(Some((Value::SimpleString(text), header_len)))
        }
        b'-' => {
            let text = String::from_utf8(line.to_vec())
                .map_err(|_| ClientError::connection("non-utf8 error reply"))?;
            let (kind, message) = split_error(&text);
            Ok(Some((Value::Error { kind, message }, header_len)))
        }
        b':' => Ok(Some((Value::Integer(parse_int(line)?), header_len))),
        b',' => Ok(Some((Value::Double(parse_float(line)?), header_len))),
        b'#' => match line {
            b"t" => Ok(Some((Value::Boolean(true), header_len))),
            b"f" => Ok(Some((Value::Boolean(false), header_len))),
            _ => Err(ClientError::connection("malformed boolean reply")),
        },
        b'_' => Ok(Some((Value::Nil, header_len))),
        b'(' => {
            let text = String::from_utf8(line.to_vec())
                .map_err(|_| ClientError::connection("non-utf8 big number"))?;
            Ok(Some((Value::BigNumber(text), header_len)))
        }
        b'$' => parse_bulk_string(buf, line, header_len),
        b'=' => parse_verbatim(buf, line, header_len),
        b'*' => parse_aggregate(buf, line, header_len, AggregateKind::Array),
        b'~' => parse_aggregate(buf, line, header_len, AggregateKind::Set),
        b'>' => parse_aggregate(buf, line, header_len, AggregateKind::Push),
        b'%' => parse_map(buf, line, header_len),
        other => Err(ClientError::connection(format!(
            "unrecognized RESP type byte {other:#x}"
        ))),
    }
}

fn split_error(text: &str) -> (String, String) {
    match text.split_once(' ') {
        Some((kind, rest)) if kind.chars().all(|c| c.is_ascii_uppercase()) && !kind.is_empty() => {
            (kind.to_string(), rest.to_string())
        }
        _ => ("ERR".to_string(), text.to_string()),
    }
}

fn parse_bulk_string(
    buf: &[u8],
    len_line: &[u8],
    header_len: usize,
) -> Result<Option<(Value, usize)>, ClientError> {
    let len = parse_int(len_line)?;
    if len < 0 {
        return Ok(Some((Value::Nil, header_len)));
    }
    let len = len as usize;
    let total = header_len + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    let data = buf[header_len..header_len + len].to_vec();
    Ok(Some((Value::BulkString(data), total)))
}

fn parse_verbatim(
    buf: &[u8],
    len_line: &[u8],
    header_len: usize,
) -> Result<Option<(Value, usize)>, ClientError> {
    let len = parse_int(len_line)?;
    if len < 4 {
        return Err(ClientError::connection("verbatim string too short"));
    }
    let len = len as usize;
    let total = header_len + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[header_len..header_len + len];
    let format = String::from_utf8_lossy(&body[..3]).to_string();
    let text = String::from_utf8(body[4..].to_vec())
        .map_err(|_| ClientError::connection("non-utf8 verbatim string"))?;
    Ok(Some((Value::Verbatim { format, text }, total)))
}

enum AggregateKind {
    Array,
    Set,
    Push,
}

fn parse_aggregate(
    buf: &[u8],
    len_line: &[u8],
    header_len: usize,
    kind: AggregateKind,
) -> Result<Option<(Value, usize)>, ClientError> {
    let len = parse_int(len_line)?;
    if len < 0 {
        let value = match kind {
            AggregateKind::Array => Value::Nil,
            AggregateKind::Set => Value::Set(Vec::new()),
            AggregateKind::Push => Value::Push(Vec::new()),
        };
        return Ok(Some((value, header_len)));
    }
    let mut items = Vec::with_capacity(len as usize);
    let mut consumed = header_len;
    for _ in 0..len {
        match parse_value(&buf[consumed..])? {
            Some((item, item_len)) => {
                items.push(item);
                consumed += item_len;
            }
            None => return Ok(None),
        }
    }
    let value = match kind {
        AggregateKind::Array => Value::Array(items),
        AggregateKind::Set => Value::Set(items),
        AggregateKind::Push => Value::Push(items),
    };
    Ok(Some((value, consumed)))
}

fn parse_map(
    buf: &[u8],
    len_line: &[u8],
    header_len: usize,
) -> Result<Option<(Value, usize)>, ClientError> {
    let len = parse_int(len_line)?;
    if len < 0 {
        return Err(ClientError::connection("negative map length"));
    }
    let mut pairs = Vec::with_capacity(len as usize);
    let mut consumed = header_len;
    for _ in 0..len {
        let Some((key, key_len)) = parse_value(&buf[consumed..])? else {
            return Ok(None);
        };
        consumed += key_len;
        let Some((value, value_len)) = parse_value(&buf[consumed..])? else {
            return Ok(None);
        };
        consumed += value_len;
        pairs.push((key, value));
    }
    Ok(Some((Value::Map(pairs), consumed)))
}
