//! Error types for frame encoding, decoding, and transport.
//!
//! A [`FrameError`] always means the byte stream and the codec disagree.
//! There is no local recovery from that: the connection is desynced and
//! the owning client must drop the socket. [`WireError`] adds the
//! socket-level I/O failures around it.

/// A frame could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A type tag byte is not one of the defined tags.
    #[error("unknown type tag 0x{tag:02x} at offset {offset}")]
    UnknownTag {
        /// The unrecognized tag byte.
        tag: u8,
        /// Byte offset inside the frame body.
        offset: usize,
    },

    /// The body ended before a declared value was complete.
    #[error("frame truncated: needed {needed} more bytes at offset {offset}")]
    Truncated {
        /// How many bytes were still required.
        needed: usize,
        /// Byte offset inside the frame body.
        offset: usize,
    },

    /// Bytes remained after the last decoded value.
    #[error("{trailing} trailing bytes after frame body")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        trailing: usize,
    },

    /// The length prefix exceeds the frame size limit.
    #[error("declared frame length {declared} exceeds the {max} byte limit")]
    Oversize {
        /// Declared body length.
        declared: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The body carried no opcode or status byte.
    #[error("empty frame body")]
    EmptyBody,

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A status byte is not one of the defined status codes.
    #[error("unknown status byte 0x{status:02x}")]
    UnknownStatus {
        /// The unrecognized status byte.
        status: u8,
    },

    /// Lists nested deeper than the codec allows.
    #[error("list nesting exceeds depth {max}")]
    DepthExceeded {
        /// Allowed maximum nesting depth.
        max: usize,
    },

    /// A domain value does not fit its wire representation.
    #[error("value does not fit the wire representation: {detail}")]
    ValueRange {
        /// What overflowed and how.
        detail: String,
    },

    /// A reply field had a different type than the dialect expects.
    #[error("field {index}: expected {expected}, got {got}")]
    FieldType {
        /// Zero-based field position.
        index: usize,
        /// Type the dialect expected.
        expected: &'static str,
        /// Type actually decoded.
        got: &'static str,
    },

    /// A reply had more or fewer fields than the dialect expects.
    #[error("expected {expected} reply fields, got {got}")]
    FieldCount {
        /// Number of fields expected.
        expected: usize,
        /// Number of fields present.
        got: usize,
    },

    /// A reply value was structurally valid but semantically wrong.
    #[error("unexpected reply value: {detail}")]
    Unexpected {
        /// What was wrong.
        detail: String,
    },
}

/// A frame exchange failed at the socket or codec level.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The underlying stream failed.
    #[error("i/o failure on simulator socket: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The bytes on the stream did not form a valid frame.
    #[error("frame error: {source}")]
    Frame {
        /// The underlying codec error.
        #[from]
        source: FrameError,
    },
}
