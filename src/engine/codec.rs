//! kdb+ IPC wire codec.
//!
//! # Message format
//! Every message starts with an 8-byte header:
//! - Endianness (u8): 1 = little endian, 0 = big endian
//! - Message type (u8): 0 async, 1 sync, 2 response
//! - Compressed (u8): 1 when the body is compressed
//! - Reserved (u8)
//! - Total length (u32): header included, in the message's byte order
//!
//! The body is one serialized q value: a type byte followed by its data.
//! We always encode little endian; either byte order is decoded.

use crate::error::{KdbError, KdbResult};
use crate::models::value::{QAtom, QTable, QValue, type_code};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Capability byte sent during the handshake (compression, timestamps).
pub const CAPABILITY: u8 = 3;

/// IPC message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Async = 0,
    Sync = 1,
    Response = 2,
}

impl MessageType {
    pub fn from_u8(value: u8) -> KdbResult<Self> {
        match value {
            0 => Ok(Self::Async),
            1 => Ok(Self::Sync),
            2 => Ok(Self::Response),
            other => Err(KdbError::protocol(format!("invalid message type {other}"))),
        }
    }
}

/// IPC message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub little_endian: bool,
    pub message_type: MessageType,
    pub compressed: bool,
    pub length: u32,
}

impl Header {
    /// Uncompressed little-endian header.
    pub fn new(message_type: MessageType, length: u32) -> Self {
        Self {
            little_endian: true,
            message_type,
            compressed: false,
            length,
        }
    }

    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = u8::from(self.little_endian);
        buf[1] = self.message_type as u8;
        buf[2] = u8::from(self.compressed);
        if self.little_endian {
            LittleEndian::write_u32(&mut buf[4..], self.length);
        } else {
            BigEndian::write_u32(&mut buf[4..], self.length);
        }
        buf
    }

    pub fn unpack(data: &[u8]) -> KdbResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(KdbError::protocol(format!(
                "header too short: expected {HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let little_endian = data[0] == 1;
        let length = if little_endian {
            LittleEndian::read_u32(&data[4..HEADER_SIZE])
        } else {
            BigEndian::read_u32(&data[4..HEADER_SIZE])
        };
        if (length as usize) < HEADER_SIZE {
            return Err(KdbError::protocol(format!("invalid message length {length}")));
        }
        Ok(Self {
            little_endian,
            message_type: MessageType::from_u8(data[1])?,
            compressed: data[2] == 1,
            length,
        })
    }

    /// Bytes following the header.
    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_SIZE
    }
}

fn io_error(err: std::io::Error) -> KdbError {
    KdbError::protocol(format!("malformed message: {err}"))
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize a value as a complete IPC message.
pub fn encode_message(message_type: MessageType, value: &QValue) -> KdbResult<Vec<u8>> {
    let mut body = Vec::new();
    write_value(&mut body, value)?;
    frame(message_type, body)
}

/// A sync request evaluating `query` as a q string.
pub fn encode_query(query: &str) -> KdbResult<Vec<u8>> {
    encode_message(MessageType::Sync, &QValue::CharVector(query.to_string()))
}

/// A response carrying a q error (`'message`).
pub fn encode_error(message: &str) -> KdbResult<Vec<u8>> {
    let mut body = Vec::with_capacity(message.len() + 2);
    body.write_i8(type_code::ERROR).map_err(io_error)?;
    write_symbol(&mut body, message)?;
    frame(MessageType::Response, body)
}

fn frame(message_type: MessageType, body: Vec<u8>) -> KdbResult<Vec<u8>> {
    let length = u32::try_from(HEADER_SIZE + body.len())
        .map_err(|_| KdbError::protocol("message exceeds 4 GiB"))?;
    let mut message = Vec::with_capacity(length as usize);
    message.extend_from_slice(&Header::new(message_type, length).pack());
    message.extend_from_slice(&body);
    Ok(message)
}

fn write_len(buf: &mut Vec<u8>, len: usize) -> KdbResult<()> {
    let len = i32::try_from(len).map_err(|_| KdbError::protocol("vector too long"))?;
    buf.write_i32::<LittleEndian>(len).map_err(io_error)
}

fn write_symbol(buf: &mut Vec<u8>, s: &str) -> KdbResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(KdbError::protocol("symbol contains NUL byte"));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_atom_body(buf: &mut Vec<u8>, atom: &QAtom) -> KdbResult<()> {
    match atom {
        QAtom::Boolean(b) => buf.write_u8(u8::from(*b)).map_err(io_error),
        QAtom::Guid(bytes) => {
            buf.extend_from_slice(bytes);
            Ok(())
        }
        QAtom::Byte(b) | QAtom::Char(b) => buf.write_u8(*b).map_err(io_error),
        QAtom::Short(v) => buf.write_i16::<LittleEndian>(*v).map_err(io_error),
        QAtom::Int(v)
        | QAtom::Month(v)
        | QAtom::Date(v)
        | QAtom::Minute(v)
        | QAtom::Second(v)
        | QAtom::Time(v) => buf.write_i32::<LittleEndian>(*v).map_err(io_error),
        QAtom::Long(v) | QAtom::Timestamp(v) | QAtom::Timespan(v) => {
            buf.write_i64::<LittleEndian>(*v).map_err(io_error)
        }
        QAtom::Real(v) => buf.write_f32::<LittleEndian>(*v).map_err(io_error),
        QAtom::Float(v) | QAtom::Datetime(v) => buf.write_f64::<LittleEndian>(*v).map_err(io_error),
        QAtom::Symbol(s) => write_symbol(buf, s),
    }
}

fn write_value(buf: &mut Vec<u8>, value: &QValue) -> KdbResult<()> {
    match value {
        QValue::Atom(atom) => {
            buf.write_i8(-atom.type_code()).map_err(io_error)?;
            write_atom_body(buf, atom)
        }
        QValue::Vector { type_code, items } => {
            buf.write_i8(*type_code).map_err(io_error)?;
            buf.write_u8(0).map_err(io_error)?;
            write_len(buf, items.len())?;
            for item in items {
                if item.type_code() != *type_code {
                    return Err(KdbError::protocol(format!(
                        "vector of type {type_code} holds an item of type {}",
                        item.type_code()
                    )));
                }
                write_atom_body(buf, item)?;
            }
            Ok(())
        }
        QValue::CharVector(s) => {
            buf.write_i8(type_code::CHAR).map_err(io_error)?;
            buf.write_u8(0).map_err(io_error)?;
            write_len(buf, s.len())?;
            buf.extend_from_slice(s.as_bytes());
            Ok(())
        }
        QValue::List(items) => {
            buf.write_i8(type_code::LIST).map_err(io_error)?;
            buf.write_u8(0).map_err(io_error)?;
            write_len(buf, items.len())?;
            items.iter().try_for_each(|item| write_value(buf, item))
        }
        QValue::Dict { keys, values } => {
            buf.write_i8(type_code::DICT).map_err(io_error)?;
            write_value(buf, keys)?;
            write_value(buf, values)
        }
        QValue::Table(table) if table.key_columns > 0 => {
            let (key_names, value_names) = table.columns.split_at(table.key_columns);
            let (key_data, value_data) = table.data.split_at(table.key_columns);
            buf.write_i8(type_code::DICT).map_err(io_error)?;
            write_value(
                buf,
                &QValue::Table(QTable::new(key_names.to_vec(), key_data.to_vec())),
            )?;
            write_value(
                buf,
                &QValue::Table(QTable::new(value_names.to_vec(), value_data.to_vec())),
            )
        }
        QValue::Table(table) => {
            buf.write_i8(type_code::TABLE).map_err(io_error)?;
            buf.write_u8(0).map_err(io_error)?;
            buf.write_i8(type_code::DICT).map_err(io_error)?;
            write_value(buf, &QValue::symbols(table.columns.iter().cloned()))?;
            write_value(buf, &QValue::List(table.data.clone()))
        }
        QValue::Nil => {
            buf.write_i8(type_code::UNARY_PRIMITIVE).map_err(io_error)?;
            buf.write_u8(0).map_err(io_error)
        }
        QValue::Function(_) => Err(KdbError::protocol("functions cannot be serialized")),
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a complete IPC message (header included), decompressing if needed.
///
/// A q error response becomes [`KdbError::Engine`].
pub fn decode_message(message: &[u8]) -> KdbResult<QValue> {
    let header = Header::unpack(message)?;
    if message.len() != header.length as usize {
        return Err(KdbError::protocol(format!(
            "length mismatch: header says {}, got {} bytes",
            header.length,
            message.len()
        )));
    }
    if header.compressed {
        let plain = decompress(message, header.little_endian)?;
        return decode_body(&plain[HEADER_SIZE..], header.little_endian);
    }
    decode_body(&message[HEADER_SIZE..], header.little_endian)
}

/// Decode a message body.
pub fn decode_body(body: &[u8], little_endian: bool) -> KdbResult<QValue> {
    let mut decoder = Decoder {
        cursor: Cursor::new(body),
        little_endian,
    };
    decoder.read_value()
}

struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    little_endian: bool,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.cursor
            .get_ref()
            .len()
            .saturating_sub(self.cursor.position() as usize)
    }

    fn read_u8(&mut self) -> KdbResult<u8> {
        self.cursor.read_u8().map_err(io_error)
    }

    fn read_i8(&mut self) -> KdbResult<i8> {
        self.cursor.read_i8().map_err(io_error)
    }

    fn read_i16(&mut self) -> KdbResult<i16> {
        let value = if self.little_endian {
            self.cursor.read_i16::<LittleEndian>()
        } else {
            self.cursor.read_i16::<BigEndian>()
        };
        value.map_err(io_error)
    }

    fn read_i32(&mut self) -> KdbResult<i32> {
        let value = if self.little_endian {
            self.cursor.read_i32::<LittleEndian>()
        } else {
            self.cursor.read_i32::<BigEndian>()
        };
        value.map_err(io_error)
    }

    fn read_i64(&mut self) -> KdbResult<i64> {
        let value = if self.little_endian {
            self.cursor.read_i64::<LittleEndian>()
        } else {
            self.cursor.read_i64::<BigEndian>()
        };
        value.map_err(io_error)
    }

    fn read_f32(&mut self) -> KdbResult<f32> {
        let value = if self.little_endian {
            self.cursor.read_f32::<LittleEndian>()
        } else {
            self.cursor.read_f32::<BigEndian>()
        };
        value.map_err(io_error)
    }

    fn read_f64(&mut self) -> KdbResult<f64> {
        let value = if self.little_endian {
            self.cursor.read_f64::<LittleEndian>()
        } else {
            self.cursor.read_f64::<BigEndian>()
        };
        value.map_err(io_error)
    }

    fn read_bytes(&mut self, n: usize) -> KdbResult<&'a [u8]> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let bytes = data
            .get(start..start + n)
            .ok_or_else(|| KdbError::protocol("malformed message: unexpected end of data"))?;
        self.cursor.set_position((start + n) as u64);
        Ok(bytes)
    }

    fn read_symbol(&mut self) -> KdbResult<String> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let rest = data.get(start..).unwrap_or_default();
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| KdbError::protocol("unterminated symbol"))?;
        self.cursor.set_position((start + end + 1) as u64);
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    /// Vector length; every item takes at least one byte.
    fn read_len(&mut self) -> KdbResult<usize> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| KdbError::protocol(format!("negative length {len}")))?;
        if len > self.remaining() {
            return Err(KdbError::protocol(format!(
                "length {len} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(len)
    }

    fn read_atom(&mut self, code: i8) -> KdbResult<QAtom> {
        use type_code::*;
        let atom = match code {
            BOOLEAN => QAtom::Boolean(self.read_u8()? != 0),
            GUID => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(self.read_bytes(16)?);
                QAtom::Guid(bytes)
            }
            BYTE => QAtom::Byte(self.read_u8()?),
            SHORT => QAtom::Short(self.read_i16()?),
            INT => QAtom::Int(self.read_i32()?),
            LONG => QAtom::Long(self.read_i64()?),
            REAL => QAtom::Real(self.read_f32()?),
            FLOAT => QAtom::Float(self.read_f64()?),
            CHAR => QAtom::Char(self.read_u8()?),
            SYMBOL => QAtom::Symbol(self.read_symbol()?),
            TIMESTAMP => QAtom::Timestamp(self.read_i64()?),
            MONTH => QAtom::Month(self.read_i32()?),
            DATE => QAtom::Date(self.read_i32()?),
            DATETIME => QAtom::Datetime(self.read_f64()?),
            TIMESPAN => QAtom::Timespan(self.read_i64()?),
            MINUTE => QAtom::Minute(self.read_i32()?),
            SECOND => QAtom::Second(self.read_i32()?),
            TIME => QAtom::Time(self.read_i32()?),
            other => return Err(KdbError::protocol(format!("unsupported atom type {other}"))),
        };
        Ok(atom)
    }

    fn read_value(&mut self) -> KdbResult<QValue> {
        let code = self.read_i8()?;
        match code {
            type_code::ERROR => Err(KdbError::engine(self.read_symbol()?)),
            -19..=-1 => Ok(QValue::Atom(self.read_atom(-code)?)),
            type_code::LIST => {
                let _attr = self.read_u8()?;
                let len = self.read_len()?;
                let items = (0..len)
                    .map(|_| self.read_value())
                    .collect::<KdbResult<Vec<_>>>()?;
                Ok(QValue::List(items))
            }
            type_code::CHAR => {
                let _attr = self.read_u8()?;
                let len = self.read_len()?;
                let bytes = self.read_bytes(len)?;
                Ok(QValue::CharVector(String::from_utf8_lossy(bytes).into_owned()))
            }
            1..=19 => {
                let _attr = self.read_u8()?;
                let len = self.read_len()?;
                let items = (0..len)
                    .map(|_| self.read_atom(code))
                    .collect::<KdbResult<Vec<_>>>()?;
                Ok(QValue::Vector {
                    type_code: code,
                    items,
                })
            }
            type_code::TABLE => {
                let _attr = self.read_u8()?;
                match self.read_value()? {
                    QValue::Dict { keys, values } => {
                        let columns = keys
                            .as_symbols()
                            .ok_or_else(|| KdbError::protocol("table column names must be symbols"))?;
                        let data = match *values {
                            QValue::List(items) => items,
                            other => vec![other],
                        };
                        Ok(QValue::Table(QTable::new(columns, data)))
                    }
                    _ => Err(KdbError::protocol("table body must be a dictionary")),
                }
            }
            type_code::DICT | type_code::SORTED_DICT => {
                let keys = self.read_value()?;
                let values = self.read_value()?;
                match (keys, values) {
                    (QValue::Table(keys), QValue::Table(values)) => {
                        Ok(QValue::Table(QTable::keyed(keys, values)))
                    }
                    (keys, values) => Ok(QValue::Dict {
                        keys: Box::new(keys),
                        values: Box::new(values),
                    }),
                }
            }
            type_code::LAMBDA => {
                let _context = self.read_symbol()?;
                match self.read_value()? {
                    QValue::CharVector(body) => Ok(QValue::Function(body)),
                    _ => Err(KdbError::protocol("lambda body must be a string")),
                }
            }
            type_code::UNARY_PRIMITIVE => match self.read_u8()? {
                0 => Ok(QValue::Nil),
                op => Ok(QValue::Function(format!("<unary primitive {op}>"))),
            },
            102 | 103 => {
                let op = self.read_u8()?;
                Ok(QValue::Function(format!("<primitive {op}>")))
            }
            104 | 105 => {
                let len = self.read_len()?;
                for _ in 0..len {
                    self.read_value()?;
                }
                let kind = if code == 104 { "projection" } else { "composition" };
                Ok(QValue::Function(format!("<{kind}>")))
            }
            106..=111 => {
                self.read_value()?;
                Ok(QValue::Function("<derived function>".to_string()))
            }
            other => Err(KdbError::protocol(format!("unsupported type {other}"))),
        }
    }
}

// ============================================================================
// Decompression
// ============================================================================

/// Expand a compressed IPC message into its uncompressed form.
///
/// The compressed body starts with the uncompressed total length (i32),
/// followed by groups of one flag byte and eight items. A clear flag bit is
/// a literal byte; a set bit is a back-reference: an index into a table of
/// positions keyed by the XOR of two adjacent output bytes, then a count of
/// extra bytes to copy after the first two.
pub fn decompress(message: &[u8], little_endian: bool) -> KdbResult<Vec<u8>> {
    let corrupt = || KdbError::protocol("corrupt compressed message");
    if message.len() < HEADER_SIZE + 4 {
        return Err(corrupt());
    }
    let size_field = &message[HEADER_SIZE..HEADER_SIZE + 4];
    let size = if little_endian {
        LittleEndian::read_i32(size_field)
    } else {
        BigEndian::read_i32(size_field)
    };
    let size = usize::try_from(size)
        .ok()
        .filter(|s| *s >= HEADER_SIZE)
        .ok_or_else(corrupt)?;

    let mut dst = vec![0u8; size];
    let header = Header {
        little_endian,
        message_type: MessageType::from_u8(message[1])?,
        compressed: false,
        length: size as u32,
    };
    dst[..HEADER_SIZE].copy_from_slice(&header.pack());

    let src = |i: usize| message.get(i).copied().ok_or_else(corrupt);
    let mut positions = [0usize; 256];
    let (mut s, mut p, mut d) = (HEADER_SIZE, HEADER_SIZE, HEADER_SIZE + 4);
    let (mut flags, mut bit) = (0u16, 0u16);

    while s < size {
        if bit == 0 {
            flags = src(d)? as u16;
            d += 1;
            bit = 1;
        }
        let matched = flags & bit != 0;
        let mut extra = 0;
        if matched {
            let r = positions[src(d)? as usize];
            extra = src(d + 1)? as usize;
            d += 2;
            if s + 2 + extra > size {
                return Err(corrupt());
            }
            dst[s] = dst[r];
            dst[s + 1] = dst[r + 1];
            s += 2;
            for m in 0..extra {
                dst[s + m] = dst[r + 2 + m];
            }
        } else {
            dst[s] = src(d)?;
            s += 1;
            d += 1;
        }
        while p + 1 < s {
            positions[(dst[p] ^ dst[p + 1]) as usize] = p;
            p += 1;
        }
        if matched {
            s += extra;
            p = s;
        }
        bit <<= 1;
        if bit == 256 {
            bit = 0;
        }
    }
    Ok(dst)
}
