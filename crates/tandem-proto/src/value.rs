//! Self-describing tagged values carried inside frames.
//!
//! Every parameter and payload field is prefixed by a one-byte type
//! tag, so both directions of both dialects decode without an external
//! schema: int32 (0x01), float64 (0x02), length-prefixed UTF-8 string
//! (0x03), byte blob (0x04), and list (0x05). Integers and lengths are
//! big-endian.

use tandem_types::{MessageId, SimStep, StationId};

use crate::error::FrameError;

const TAG_INT: u8 = 0x01;
const TAG_DOUBLE: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_LIST: u8 = 0x05;

/// Maximum list nesting the decoder accepts.
pub const MAX_LIST_DEPTH: usize = 8;

/// One tagged value on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 32-bit integer.
    Int(i32),
    /// IEEE-754 double.
    Double(f64),
    /// UTF-8 string with u32 length prefix.
    Text(String),
    /// Opaque byte blob with u32 length prefix.
    Bytes(Vec<u8>),
    /// Ordered list of tagged values with u32 count prefix.
    List(Vec<Value>),
}

impl Value {
    /// Name of the value's type, for error reporting.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int32",
            Self::Double(_) => "float64",
            Self::Text(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
        }
    }

    /// Append the tagged encoding of this value to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), FrameError> {
        match self {
            Self::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Double(v) => {
                out.push(TAG_DOUBLE);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Text(s) => {
                out.push(TAG_TEXT);
                push_len(out, s.len(), "string length")?;
                out.extend_from_slice(s.as_bytes());
            }
            Self::Bytes(b) => {
                out.push(TAG_BYTES);
                push_len(out, b.len(), "blob length")?;
                out.extend_from_slice(b);
            }
            Self::List(items) => {
                out.push(TAG_LIST);
                push_len(out, items.len(), "list length")?;
                for item in items {
                    item.encode_into(out)?;
                }
            }
        }
        Ok(())
    }

    /// Decode one tagged value from the reader.
    pub(crate) fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, FrameError> {
        Self::decode_at_depth(reader, 0)
    }

    fn decode_at_depth(reader: &mut ByteReader<'_>, depth: usize) -> Result<Self, FrameError> {
        if depth > MAX_LIST_DEPTH {
            return Err(FrameError::DepthExceeded {
                max: MAX_LIST_DEPTH,
            });
        }
        let offset = reader.position();
        let tag = reader.read_u8()?;
        match tag {
            TAG_INT => Ok(Self::Int(reader.read_i32()?)),
            TAG_DOUBLE => Ok(Self::Double(reader.read_f64()?)),
            TAG_TEXT => {
                let len = reader.read_len()?;
                let raw = reader.take(len)?;
                let Ok(text) = std::str::from_utf8(raw) else {
                    return Err(FrameError::InvalidUtf8);
                };
                Ok(Self::Text(text.to_owned()))
            }
            TAG_BYTES => {
                let len = reader.read_len()?;
                Ok(Self::Bytes(reader.take(len)?.to_vec()))
            }
            TAG_LIST => {
                let count = reader.read_len()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(Self::decode_at_depth(reader, depth.saturating_add(1))?);
                }
                Ok(Self::List(items))
            }
            other => Err(FrameError::UnknownTag { tag: other, offset }),
        }
    }
}

/// Append a u32 big-endian length, rejecting sizes that do not fit.
fn push_len(out: &mut Vec<u8>, len: usize, what: &str) -> Result<(), FrameError> {
    let Ok(len32) = u32::try_from(len) else {
        return Err(FrameError::ValueRange {
            detail: format!("{what} {len} exceeds u32"),
        });
    };
    out.extend_from_slice(&len32.to_be_bytes());
    Ok(())
}

/// Bounds-checked cursor over a frame body.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) const fn position(&self) -> usize {
        self.pos
    }

    pub(crate) const fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Take the next `n` bytes or fail with the shortfall.
    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let end = self.pos.saturating_add(n);
        match self.buf.get(self.pos..end) {
            Some(slice) => {
                self.pos = end;
                Ok(slice)
            }
            None => Err(FrameError::Truncated {
                needed: n.saturating_sub(self.remaining()),
                offset: self.pos,
            }),
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, FrameError> {
        let slice = self.take(1)?;
        slice.first().copied().ok_or(FrameError::Truncated {
            needed: 1,
            offset: self.pos,
        })
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, FrameError> {
        Ok(i32::from_be_bytes(self.take_array::<4>()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, FrameError> {
        Ok(u32::from_be_bytes(self.take_array::<4>()?))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, FrameError> {
        Ok(f64::from_be_bytes(self.take_array::<8>()?))
    }

    /// Read a u32 length prefix as usize.
    pub(crate) fn read_len(&mut self) -> Result<usize, FrameError> {
        let raw = self.read_u32()?;
        let Ok(len) = usize::try_from(raw) else {
            return Err(FrameError::ValueRange {
                detail: format!("length {raw} exceeds usize"),
            });
        };
        Ok(len)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let offset = self.pos;
        let slice = self.take(N)?;
        let Ok(array) = <[u8; N]>::try_from(slice) else {
            return Err(FrameError::Truncated { needed: N, offset });
        };
        Ok(array)
    }
}

/// Typed, in-order extractor over a reply's decoded values.
///
/// Dialect parsers consume fields positionally and call [`finish`] to
/// reject replies with extra fields.
///
/// [`finish`]: FieldReader::finish
#[derive(Debug)]
pub struct FieldReader {
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl FieldReader {
    /// Wrap a decoded value list.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
            index: 0,
        }
    }

    fn next_value(&mut self) -> Result<Value, FrameError> {
        let index = self.index;
        self.index = index.saturating_add(1);
        self.values.next().ok_or(FrameError::FieldCount {
            expected: index.saturating_add(1),
            got: index,
        })
    }

    /// Next field as int32.
    pub fn next_int(&mut self) -> Result<i32, FrameError> {
        match self.next_value()? {
            Value::Int(v) => Ok(v),
            other => Err(self.type_error("int32", &other)),
        }
    }

    /// Next field as float64.
    pub fn next_double(&mut self) -> Result<f64, FrameError> {
        match self.next_value()? {
            Value::Double(v) => Ok(v),
            other => Err(self.type_error("float64", &other)),
        }
    }

    /// Next field as string.
    pub fn next_text(&mut self) -> Result<String, FrameError> {
        match self.next_value()? {
            Value::Text(v) => Ok(v),
            other => Err(self.type_error("string", &other)),
        }
    }

    /// Next field as byte blob.
    pub fn next_bytes(&mut self) -> Result<Vec<u8>, FrameError> {
        match self.next_value()? {
            Value::Bytes(v) => Ok(v),
            other => Err(self.type_error("bytes", &other)),
        }
    }

    /// Next field as list.
    pub fn next_list(&mut self) -> Result<Vec<Value>, FrameError> {
        match self.next_value()? {
            Value::List(v) => Ok(v),
            other => Err(self.type_error("list", &other)),
        }
    }

    /// Number of fields consumed so far.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.index
    }

    /// Fail if any fields remain unconsumed.
    pub fn finish(self) -> Result<(), FrameError> {
        let leftover = self.values.len();
        if leftover == 0 {
            Ok(())
        } else {
            Err(FrameError::FieldCount {
                expected: self.index,
                got: self.index.saturating_add(leftover),
            })
        }
    }

    const fn type_error(&self, expected: &'static str, got: &Value) -> FrameError {
        FrameError::FieldType {
            index: self.index.saturating_sub(1),
            expected,
            got: got.type_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain <-> wire integer conversions
// ---------------------------------------------------------------------------

/// Convert a wire int32 into a station id; negative ids are malformed.
pub fn station_from_wire(raw: i32) -> Result<StationId, FrameError> {
    let Ok(id) = u32::try_from(raw) else {
        return Err(FrameError::ValueRange {
            detail: format!("negative station id {raw}"),
        });
    };
    Ok(StationId::new(id))
}

/// Station id as wire int32.
pub fn station_to_wire(id: StationId) -> Result<i32, FrameError> {
    let Ok(raw) = i32::try_from(id.into_inner()) else {
        return Err(FrameError::ValueRange {
            detail: format!("station id {id} exceeds int32"),
        });
    };
    Ok(raw)
}

/// Convert a wire int32 into a message id; negative ids are malformed.
pub fn message_from_wire(raw: i32) -> Result<MessageId, FrameError> {
    let Ok(id) = u32::try_from(raw) else {
        return Err(FrameError::ValueRange {
            detail: format!("negative message id {raw}"),
        });
    };
    Ok(MessageId::new(id))
}

/// Message id as wire int32.
pub fn message_to_wire(id: MessageId) -> Result<i32, FrameError> {
    let Ok(raw) = i32::try_from(id.into_inner()) else {
        return Err(FrameError::ValueRange {
            detail: format!("message id {id} exceeds int32"),
        });
    };
    Ok(raw)
}

/// Simulation step as wire int32.
pub fn step_to_wire(step: SimStep) -> Result<i32, FrameError> {
    let Ok(raw) = i32::try_from(step) else {
        return Err(FrameError::ValueRange {
            detail: format!("step {step} exceeds int32"),
        });
    };
    Ok(raw)
}

/// Convert a wire int32 into a simulation step; negative is malformed.
pub fn step_from_wire(raw: i32) -> Result<SimStep, FrameError> {
    let Ok(step) = u64::try_from(raw) else {
        return Err(FrameError::ValueRange {
            detail: format!("negative step {raw}"),
        });
    };
    Ok(step)
}
