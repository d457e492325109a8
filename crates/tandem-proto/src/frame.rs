//! Length-prefixed request and response frames.
//!
//! Wire layout, both directions:
//!
//! ```text
//! u32 body length (big-endian)
//! u8  opcode (request) or status (response)
//! tagged values ...
//! ```
//!
//! The body length never includes the 4-byte prefix. Oversize frames
//! are rejected before allocation; a short read anywhere is a fatal
//! transport error for the owning client.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{FrameError, WireError};
use crate::value::{ByteReader, Value};

/// Largest frame body either dialect may carry.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Response status byte.
///
/// The traffic dialect only ever produces `Ok`, `Error`, and
/// `NotSupported` (its "not implemented"); `Busy` is reserved for the
/// network dialect's backpressure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Command failed; payload carries [int32 code, string message].
    Error,
    /// Command not implemented by the simulator.
    NotSupported,
    /// Simulator cannot accept the command right now.
    Busy,
}

impl Status {
    /// Wire byte for this status.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
            Self::NotSupported => 2,
            Self::Busy => 3,
        }
    }

    /// Decode a status byte.
    pub const fn from_wire(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Error),
            2 => Ok(Self::NotSupported),
            3 => Ok(Self::Busy),
            other => Err(FrameError::UnknownStatus { status: other }),
        }
    }

    /// Lowercase name for log fields.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::NotSupported => "not_supported",
            Self::Busy => "busy",
        }
    }
}

/// Error code reported with [`Status::Error`] for an unknown station.
///
/// The only data-level error the controller recovers from; everything
/// else under `Error` status is surfaced as a rejected command.
pub const ERR_UNKNOWN_STATION: i32 = 1;

/// Parsed payload of a [`Status::Error`] response: [int32 code, string
/// message].
///
/// Parsing is deliberately lenient; a simulator that fails to populate
/// the payload still yields a usable (if empty) reply rather than
/// masking the primary failure with a codec error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    /// Dialect error code; 0 when absent.
    pub code: i32,
    /// Human-readable message; empty when absent.
    pub message: String,
}

impl ErrorReply {
    /// Extract code and message from an error response's values.
    #[must_use]
    pub fn parse(values: &[Value]) -> Self {
        let mut iter = values.iter();
        let code = match iter.next() {
            Some(Value::Int(c)) => *c,
            _ => 0,
        };
        let message = match iter.next() {
            Some(Value::Text(m)) => m.clone(),
            _ => String::new(),
        };
        Self { code, message }
    }

    /// Whether the reply names a station the simulator does not know.
    #[must_use]
    pub const fn is_unknown_station(&self) -> bool {
        self.code == ERR_UNKNOWN_STATION
    }
}

/// A command frame sent to a simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    /// Dialect-specific command opcode.
    pub opcode: u8,
    /// Tagged parameters in command order.
    pub values: Vec<Value>,
}

impl RequestFrame {
    /// Build a request frame.
    #[must_use]
    pub const fn new(opcode: u8, values: Vec<Value>) -> Self {
        Self { opcode, values }
    }

    /// Encode to wire bytes including the length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_with_prefix(self.opcode, &self.values)
    }

    /// Decode from a frame body (length prefix already stripped).
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let (opcode, values) = decode_body(body)?;
        Ok(Self { opcode, values })
    }
}

/// A status frame received from a simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    /// Outcome of the correlated command.
    pub status: Status,
    /// Tagged payload in reply order.
    pub values: Vec<Value>,
}

impl ResponseFrame {
    /// Build a response frame.
    #[must_use]
    pub const fn new(status: Status, values: Vec<Value>) -> Self {
        Self { status, values }
    }

    /// An empty `Ok` response.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: Status::Ok,
            values: Vec::new(),
        }
    }

    /// Encode to wire bytes including the length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_with_prefix(self.status.to_wire(), &self.values)
    }

    /// Decode from a frame body (length prefix already stripped).
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let (status_byte, values) = decode_body(body)?;
        Ok(Self {
            status: Status::from_wire(status_byte)?,
            values,
        })
    }
}

fn encode_with_prefix(lead: u8, values: &[Value]) -> Result<Vec<u8>, FrameError> {
    let mut body = vec![lead];
    for value in values {
        value.encode_into(&mut body)?;
    }
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize {
            declared: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    let Ok(len) = u32::try_from(body.len()) else {
        return Err(FrameError::ValueRange {
            detail: format!("frame body {} exceeds u32", body.len()),
        });
    };
    let mut out = Vec::with_capacity(body.len().saturating_add(4));
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_body(body: &[u8]) -> Result<(u8, Vec<Value>), FrameError> {
    let mut reader = ByteReader::new(body);
    if reader.remaining() == 0 {
        return Err(FrameError::EmptyBody);
    }
    let lead = reader.read_u8()?;
    let mut values = Vec::new();
    while reader.remaining() > 0 {
        values.push(Value::decode_from(&mut reader)?);
    }
    Ok((lead, values))
}

/// Read one frame body from the stream (length prefix consumed).
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let declared = u32::from_be_bytes(prefix);
    let Ok(len) = usize::try_from(declared) else {
        return Err(WireError::Frame {
            source: FrameError::Oversize {
                declared: usize::MAX,
                max: MAX_FRAME_BYTES,
            },
        });
    };
    if len > MAX_FRAME_BYTES {
        return Err(WireError::Frame {
            source: FrameError::Oversize {
                declared: len,
                max: MAX_FRAME_BYTES,
            },
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    debug!(len, "Frame body read");
    Ok(body)
}

/// Write pre-encoded frame bytes to the stream and flush.
pub async fn write_frame_bytes<W>(writer: &mut W, encoded: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await?;
    debug!(len = encoded.len(), "Frame bytes written");
    Ok(())
}

/// Encode and send one request frame.
pub async fn send_request<W>(writer: &mut W, frame: &RequestFrame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode()?;
    write_frame_bytes(writer, &encoded).await
}

/// Receive and decode one response frame.
pub async fn recv_response<R>(reader: &mut R) -> Result<ResponseFrame, WireError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame_bytes(reader).await?;
    Ok(ResponseFrame::decode(&body)?)
}

/// Receive and decode one request frame (simulator side; used by the
/// in-process fakes in client tests).
pub async fn recv_request<R>(reader: &mut R) -> Result<RequestFrame, WireError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame_bytes(reader).await?;
    Ok(RequestFrame::decode(&body)?)
}

/// Encode and send one response frame (simulator side).
pub async fn send_response<W>(writer: &mut W, frame: &ResponseFrame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode()?;
    write_frame_bytes(writer, &encoded).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_bytes_roundtrip() {
        for status in [Status::Ok, Status::Error, Status::NotSupported, Status::Busy] {
            assert_eq!(Status::from_wire(status.to_wire()), Ok(status));
        }
        assert_eq!(
            Status::from_wire(9),
            Err(FrameError::UnknownStatus { status: 9 })
        );
    }

    #[test]
    fn request_roundtrip() {
        let frame = RequestFrame::new(
            0x02,
            vec![Value::Int(41), Value::List(vec![Value::Int(1), Value::Int(2)])],
        );
        let encoded = frame.encode().unwrap();
        let (prefix, body) = encoded.split_at(4);
        let declared = u32::from_be_bytes(<[u8; 4]>::try_from(prefix).unwrap());
        assert_eq!(usize::try_from(declared).unwrap(), body.len());
        assert_eq!(RequestFrame::decode(body).unwrap(), frame);
    }

    #[test]
    fn response_roundtrip() {
        let frame = ResponseFrame::new(
            Status::Error,
            vec![Value::Int(1), Value::Text("unknown station".to_owned())],
        );
        let encoded = frame.encode().unwrap();
        let (_, body) = encoded.split_at(4);
        assert_eq!(ResponseFrame::decode(body).unwrap(), frame);
    }

    #[test]
    fn empty_body_rejected() {
        assert_eq!(RequestFrame::decode(&[]), Err(FrameError::EmptyBody));
    }

    #[test]
    fn trailing_garbage_is_a_decode_error() {
        // A valid int value followed by a lone tag byte with no payload.
        let frame = RequestFrame::new(0x01, vec![Value::Int(5)]);
        let mut encoded = frame.encode().unwrap();
        encoded.push(0x01);
        // Fix up the prefix to cover the extra byte.
        let body_len = u32::try_from(encoded.len().saturating_sub(4)).unwrap();
        encoded.splice(0..4, body_len.to_be_bytes());
        let (_, body) = encoded.split_at(4);
        assert!(matches!(
            RequestFrame::decode(body),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = RequestFrame::new(0x01, vec![Value::Int(10)]);
        send_request(&mut client, &request).await.unwrap();
        let received = recv_request(&mut server).await.unwrap();
        assert_eq!(received, request);

        let response = ResponseFrame::new(Status::Ok, vec![Value::Int(10)]);
        send_response(&mut server, &response).await.unwrap();
        let received = recv_response(&mut client).await.unwrap();
        assert_eq!(received, response);
    }

    #[tokio::test]
    async fn oversize_frame_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = u32::try_from(MAX_FRAME_BYTES.saturating_add(1)).unwrap();
        tokio::spawn(async move {
            let _ = tokio::io::AsyncWriteExt::write_all(&mut client, &huge.to_be_bytes()).await;
        });
        let result = read_frame_bytes(&mut server).await;
        assert!(matches!(
            result,
            Err(WireError::Frame {
                source: FrameError::Oversize { .. }
            })
        ));
    }

    #[tokio::test]
    async fn closed_stream_surfaces_io_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let result = recv_response(&mut server).await;
        assert!(matches!(result, Err(WireError::Io { .. })));
    }
}
