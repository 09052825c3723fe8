//! Framing for rows sent across a remote transport.
//!
//! Every frame is a one byte tag, a big endian u32 payload length, then the
//! payload. A connection carries a layout frame before the first row (and
//! again whenever the layout changes), row frames, then a single end frame.
use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, NaiveDate};
use rowpipe_error::{ErrorKind, ResultExt, RowpipeError, Result};

use crate::row::{RowLayout, Value};

const TAG_LAYOUT: u8 = b'L';
const TAG_ROW: u8 = b'R';
const TAG_END: u8 = b'E';

const HEADER_LEN: usize = 5;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Layout(RowLayout),
    Row(Vec<Value>),
    End,
}

fn codec_error(msg: &'static str) -> RowpipeError {
    RowpipeError::new(msg).with_kind(ErrorKind::ChannelIo)
}

/// Encode a frame into `buf`.
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) -> Result<()> {
    let start = buf.len();
    let tag = match frame {
        Frame::Layout(_) => TAG_LAYOUT,
        Frame::Row(_) => TAG_ROW,
        Frame::End => TAG_END,
    };
    buf.put_u8(tag);
    buf.put_u32(0); // Length, patched below.

    match frame {
        Frame::Layout(layout) => {
            let json = serde_json::to_vec(layout).context("Failed to serialize row layout")?;
            buf.put_slice(&json);
        }
        Frame::Row(values) => {
            buf.put_u32(values.len() as u32);
            for value in values {
                put_value(buf, value);
            }
        }
        Frame::End => (),
    }

    let payload_len = buf.len() - start - HEADER_LEN;
    if payload_len > MAX_FRAME_LEN {
        return Err(codec_error("Frame exceeds maximum length").with_field("len", payload_len));
    }
    buf[start + 1..start + HEADER_LEN].copy_from_slice(&(payload_len as u32).to_be_bytes());

    Ok(())
}

/// Write a single frame to a writer.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame, scratch: &mut BytesMut) -> Result<()> {
    scratch.clear();
    encode_frame(frame, scratch)?;
    writer.write_all(scratch)?;
    Ok(())
}

/// Read a single frame from a reader.
///
/// Returns `None` if the reader is at EOF before any byte of the frame was
/// read.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0; HEADER_LEN];
    match reader.read_exact(&mut header[..1]) {
        Ok(()) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    reader.read_exact(&mut header[1..])?;

    let tag = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(codec_error("Frame exceeds maximum length").with_field("len", len));
    }

    let mut payload = vec![0; len];
    reader.read_exact(&mut payload)?;

    decode_payload(tag, &payload).map(Some)
}

fn decode_payload(tag: u8, payload: &[u8]) -> Result<Frame> {
    match tag {
        TAG_LAYOUT => {
            let layout: RowLayout =
                serde_json::from_slice(payload).context("Failed to deserialize row layout")?;
            Ok(Frame::Layout(layout))
        }
        TAG_ROW => {
            let mut cursor = Cursor::new(payload);
            let count = cursor.read_u32()? as usize;
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push(cursor.read_value()?);
            }
            if cursor.remaining() != 0 {
                return Err(codec_error("Trailing bytes in row frame")
                    .with_field("remaining", cursor.remaining()));
            }
            Ok(Frame::Row(values))
        }
        TAG_END => Ok(Frame::End),
        other => Err(codec_error("Unknown frame tag").with_field("tag", other)),
    }
}

fn put_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Null => buf.put_u8(0),
        Value::Boolean(v) => {
            buf.put_u8(1);
            buf.put_u8(*v as u8);
        }
        Value::Integer(v) => {
            buf.put_u8(2);
            buf.put_i64(*v);
        }
        Value::Number(v) => {
            buf.put_u8(3);
            buf.put_f64(*v);
        }
        Value::String(v) => {
            buf.put_u8(4);
            buf.put_u32(v.len() as u32);
            buf.put_slice(v.as_bytes());
        }
        Value::Date(v) => {
            buf.put_u8(5);
            buf.put_i64(i64::from(v.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE);
        }
        Value::Timestamp(v) => {
            buf.put_u8(6);
            buf.put_i64(v.timestamp_micros());
        }
        Value::Binary(v) => {
            buf.put_u8(7);
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
    }
}

#[derive(Debug)]
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.len() < n {
            return Err(codec_error("Unexpected end of row frame")
                .with_field("need", n)
                .with_field("remaining", self.buf.len()));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.get_u32())
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.get_i64())
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        let (bytes, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(bytes)
    }

    fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_u8()?;
        Ok(match tag {
            0 => Value::Null,
            1 => Value::Boolean(self.read_u8()? != 0),
            2 => Value::Integer(self.read_i64()?),
            3 => {
                self.ensure(8)?;
                Value::Number(self.get_f64())
            }
            4 => {
                let bytes = self.read_bytes()?;
                let s = std::str::from_utf8(bytes).context("Invalid utf8 in string value")?;
                Value::String(s.to_string())
            }
            5 => {
                let days = self.read_i64()?;
                let date = days
                    .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
                    .and_then(|d| i32::try_from(d).ok())
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                    .ok_or_else(|| codec_error("Date value out of range").with_field("days", days))?;
                Value::Date(date)
            }
            6 => {
                let micros = self.read_i64()?;
                let ts = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                    codec_error("Timestamp value out of range").with_field("micros", micros)
                })?;
                Value::Timestamp(ts)
            }
            7 => Value::Binary(self.read_bytes()?.to_vec()),
            other => return Err(codec_error("Unknown value tag").with_field("tag", other)),
        })
    }
}

impl Buf for Cursor<'_> {
    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn chunk(&self) -> &[u8] {
        self.buf
    }

    fn advance(&mut self, cnt: usize) {
        self.buf = &self.buf[cnt..]
    }
}
