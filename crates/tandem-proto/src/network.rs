//! Network simulator wire dialect.
//!
//! Commands: `AdvanceUntil`, `SendMessage`, `DrainReceived`, plus the
//! station mirroring commands (`CreateStation`, `UpdatePosition`,
//! `RemoveStation`) and `Close`. `SendMessage` is deliberately
//! area-free point-to-point: geometric candidacy is resolved before a
//! send ever reaches this dialect, and the network process only decides
//! the physical-layer outcome.

use tandem_types::{MessageId, Position, Reception, SimStep, StationId};

use crate::error::FrameError;
use crate::frame::RequestFrame;
use crate::value::{
    FieldReader, Value, message_from_wire, message_to_wire, station_from_wire, station_to_wire,
    step_from_wire, step_to_wire,
};

/// Command opcodes of the network dialect.
pub mod opcodes {
    /// Advance the network simulation to a target step.
    pub const ADVANCE_UNTIL: u8 = 0x01;
    /// Deliver one message to one recipient.
    pub const SEND_MESSAGE: u8 = 0x02;
    /// Collect messages received during the completed step.
    pub const DRAIN_RECEIVED: u8 = 0x03;
    /// Mirror a newly appeared station.
    pub const CREATE_STATION: u8 = 0x04;
    /// Push fresh mobility for a station.
    pub const UPDATE_POSITION: u8 = 0x05;
    /// Retire a vanished station.
    pub const REMOVE_STATION: u8 = 0x06;
    /// Orderly connection shutdown.
    pub const CLOSE: u8 = 0x7F;
}

/// Commands the network client can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCommand {
    /// Advance the network simulation to `target`.
    AdvanceUntil {
        /// Step to simulate up to.
        target: SimStep,
    },
    /// Hand one candidate delivery to the physical layer.
    SendMessage {
        /// Originating station.
        sender: StationId,
        /// Candidate recipient.
        recipient: StationId,
        /// Message identity, echoed back in receptions.
        message_id: MessageId,
        /// Opaque payload.
        payload: Vec<u8>,
    },
    /// Collect receptions from the step just completed.
    DrainReceived,
    /// Mirror a station into the network process.
    CreateStation {
        /// Station to create.
        station: StationId,
        /// Initial position.
        position: Position,
        /// Radio technologies the station carries.
        technologies: Vec<String>,
    },
    /// Push current mobility for a station.
    UpdatePosition {
        /// Station to update.
        station: StationId,
        /// Current position.
        position: Position,
        /// Current speed in m/s.
        speed: f64,
        /// Current heading in degrees.
        heading: f64,
    },
    /// Remove a vanished station from the network process.
    RemoveStation {
        /// Station to remove.
        station: StationId,
    },
    /// Orderly shutdown.
    Close,
}

impl NetworkCommand {
    /// Command name for log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AdvanceUntil { .. } => "advance_until",
            Self::SendMessage { .. } => "send_message",
            Self::DrainReceived => "drain_received",
            Self::CreateStation { .. } => "create_station",
            Self::UpdatePosition { .. } => "update_position",
            Self::RemoveStation { .. } => "remove_station",
            Self::Close => "close",
        }
    }

    /// Encode into a request frame.
    pub fn into_frame(self) -> Result<RequestFrame, FrameError> {
        match self {
            Self::AdvanceUntil { target } => Ok(RequestFrame::new(
                opcodes::ADVANCE_UNTIL,
                vec![Value::Int(step_to_wire(target)?)],
            )),
            Self::SendMessage {
                sender,
                recipient,
                message_id,
                payload,
            } => Ok(RequestFrame::new(
                opcodes::SEND_MESSAGE,
                vec![
                    Value::Int(station_to_wire(sender)?),
                    Value::Int(station_to_wire(recipient)?),
                    Value::Int(message_to_wire(message_id)?),
                    Value::Bytes(payload),
                ],
            )),
            Self::DrainReceived => Ok(RequestFrame::new(opcodes::DRAIN_RECEIVED, Vec::new())),
            Self::CreateStation {
                station,
                position,
                technologies,
            } => {
                let techs = technologies.into_iter().map(Value::Text).collect();
                Ok(RequestFrame::new(
                    opcodes::CREATE_STATION,
                    vec![
                        Value::Int(station_to_wire(station)?),
                        Value::Double(position.x),
                        Value::Double(position.y),
                        Value::List(techs),
                    ],
                ))
            }
            Self::UpdatePosition {
                station,
                position,
                speed,
                heading,
            } => Ok(RequestFrame::new(
                opcodes::UPDATE_POSITION,
                vec![
                    Value::Int(station_to_wire(station)?),
                    Value::Double(position.x),
                    Value::Double(position.y),
                    Value::Double(speed),
                    Value::Double(heading),
                ],
            )),
            Self::RemoveStation { station } => Ok(RequestFrame::new(
                opcodes::REMOVE_STATION,
                vec![Value::Int(station_to_wire(station)?)],
            )),
            Self::Close => Ok(RequestFrame::new(opcodes::CLOSE, Vec::new())),
        }
    }
}

/// Parse the values of an OK `AdvanceUntil` response: the simulator's
/// resulting clock, cross-checked by the scheduler against the
/// requested step.
pub fn parse_advance_reply(values: Vec<Value>) -> Result<SimStep, FrameError> {
    let mut fields = FieldReader::new(values);
    let clock = step_from_wire(fields.next_int()?)?;
    fields.finish()?;
    Ok(clock)
}

/// Parse the values of an OK `DrainReceived` response.
///
/// Layout: one outer list whose elements are
/// `list[int32 recipient, int32 message id, bytes payload]`.
pub fn parse_drain_reply(values: Vec<Value>) -> Result<Vec<Reception>, FrameError> {
    let mut fields = FieldReader::new(values);
    let entries = fields.next_list()?;
    fields.finish()?;
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::List(parts) => {
                let mut parts = FieldReader::new(parts);
                let recipient = station_from_wire(parts.next_int()?)?;
                let message_id = message_from_wire(parts.next_int()?)?;
                let payload = parts.next_bytes()?;
                parts.finish()?;
                Ok(Reception {
                    recipient,
                    message_id,
                    payload,
                })
            }
            other => Err(FrameError::FieldType {
                index: 0,
                expected: "list",
                got: other.type_name(),
            }),
        })
        .collect()
}
