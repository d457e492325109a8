//! Wire protocol shared by both simulator links.
//!
//! Frames are length-prefixed: a big-endian `u32` body length, then an
//! opcode (requests) or status (responses) byte, then a sequence of
//! tagged values. The tagged value layer is common to both dialects;
//! [`traffic`] and [`network`] define the opcode tables and typed
//! command builders on top of it.
//!
//! The crate is transport-thin on purpose. It owns encoding, decoding
//! and the async frame exchange over any `AsyncRead + AsyncWrite`
//! stream, but holds no retry, timeout or reconnect policy. That
//! behaviour lives with the clients that drive these frames.

pub mod error;
pub mod frame;
pub mod network;
pub mod traffic;
pub mod value;

pub use error::{FrameError, WireError};
pub use frame::{
    ERR_UNKNOWN_STATION, ErrorReply, MAX_FRAME_BYTES, RequestFrame, ResponseFrame, Status,
    read_frame_bytes, recv_request, recv_response, send_request, send_response, write_frame_bytes,
};
pub use network::NetworkCommand;
pub use traffic::{AdvanceReply, SimulationVariable, TrafficCommand};
pub use value::{FieldReader, MAX_LIST_DEPTH, Value};
