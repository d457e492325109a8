//! Traffic simulator wire dialect.
//!
//! Commands: `Advance`, `GetVariables`, `SetVariable`, `Subscribe`,
//! `Close`. The client subscribes once, at connect time, to the
//! departed/arrived simulation variables; from then on every `Advance`
//! response carries the reached step plus the two station-delta lists.
//!
//! This module owns the byte-level knowledge of the dialect; the
//! socket handling lives with the client.

use tandem_types::{Position, SimStep, StationId, TrafficVariable, VariableValue};

use crate::error::FrameError;
use crate::frame::RequestFrame;
use crate::value::{
    FieldReader, Value, station_from_wire, station_to_wire, step_from_wire, step_to_wire,
};

/// Command opcodes of the traffic dialect.
pub mod opcodes {
    /// Advance the simulation to a target step.
    pub const ADVANCE: u8 = 0x01;
    /// Read a set of variables for one station.
    pub const GET_VARIABLES: u8 = 0x02;
    /// Write one variable for one station.
    pub const SET_VARIABLE: u8 = 0x03;
    /// Subscribe to simulation-level variables.
    pub const SUBSCRIBE: u8 = 0x04;
    /// Orderly connection shutdown.
    pub const CLOSE: u8 = 0x7F;
}

/// Station variable codes.
pub mod var_codes {
    /// Planar position; value is `list[float64 x, float64 y]`.
    pub const POSITION: i32 = 0x01;
    /// Speed in m/s; value is float64.
    pub const SPEED: i32 = 0x02;
    /// Heading in degrees; value is float64.
    pub const HEADING: i32 = 0x03;
    /// Stations that appeared since the last advance (subscribe-only).
    pub const DEPARTED: i32 = 0x10;
    /// Stations that left since the last advance (subscribe-only).
    pub const ARRIVED: i32 = 0x11;
}

/// Simulation-level variables valid in `Subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationVariable {
    /// List of stations that entered the simulation.
    DepartedStations,
    /// List of stations that left the simulation.
    ArrivedStations,
}

impl SimulationVariable {
    /// Wire code for this simulation variable.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::DepartedStations => var_codes::DEPARTED,
            Self::ArrivedStations => var_codes::ARRIVED,
        }
    }
}

/// Wire code for a station variable.
#[must_use]
pub const fn variable_code(variable: TrafficVariable) -> i32 {
    match variable {
        TrafficVariable::Position => var_codes::POSITION,
        TrafficVariable::Speed => var_codes::SPEED,
        TrafficVariable::Heading => var_codes::HEADING,
    }
}

/// Decode a station variable code.
pub fn variable_from_code(code: i32) -> Result<TrafficVariable, FrameError> {
    match code {
        var_codes::POSITION => Ok(TrafficVariable::Position),
        var_codes::SPEED => Ok(TrafficVariable::Speed),
        var_codes::HEADING => Ok(TrafficVariable::Heading),
        other => Err(FrameError::Unexpected {
            detail: format!("unknown variable code {other}"),
        }),
    }
}

/// Commands the traffic client can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum TrafficCommand {
    /// Advance the traffic simulation to `target`.
    Advance {
        /// Step to simulate up to.
        target: SimStep,
    },
    /// Read `variables` for `station`, in order.
    GetVariables {
        /// Station to read.
        station: StationId,
        /// Variables to read.
        variables: Vec<TrafficVariable>,
    },
    /// Write one variable for `station`.
    SetVariable {
        /// Station to write.
        station: StationId,
        /// Variable to write.
        variable: TrafficVariable,
        /// New value.
        value: VariableValue,
    },
    /// Subscribe to simulation-level delta variables for a step range.
    Subscribe {
        /// Simulation variables to subscribe to.
        variables: Vec<SimulationVariable>,
        /// First step covered.
        from_step: SimStep,
        /// Last step covered.
        until_step: SimStep,
    },
    /// Orderly shutdown.
    Close,
}

impl TrafficCommand {
    /// Command name for log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Advance { .. } => "advance",
            Self::GetVariables { .. } => "get_variables",
            Self::SetVariable { .. } => "set_variable",
            Self::Subscribe { .. } => "subscribe",
            Self::Close => "close",
        }
    }

    /// Encode into a request frame.
    pub fn into_frame(self) -> Result<RequestFrame, FrameError> {
        match self {
            Self::Advance { target } => Ok(RequestFrame::new(
                opcodes::ADVANCE,
                vec![Value::Int(step_to_wire(target)?)],
            )),
            Self::GetVariables { station, variables } => {
                let codes = variables
                    .into_iter()
                    .map(|v| Value::Int(variable_code(v)))
                    .collect();
                Ok(RequestFrame::new(
                    opcodes::GET_VARIABLES,
                    vec![Value::Int(station_to_wire(station)?), Value::List(codes)],
                ))
            }
            Self::SetVariable {
                station,
                variable,
                value,
            } => Ok(RequestFrame::new(
                opcodes::SET_VARIABLE,
                vec![
                    Value::Int(station_to_wire(station)?),
                    Value::Int(variable_code(variable)),
                    encode_variable_value(value),
                ],
            )),
            Self::Subscribe {
                variables,
                from_step,
                until_step,
            } => {
                let codes = variables.into_iter().map(|v| Value::Int(v.code())).collect();
                Ok(RequestFrame::new(
                    opcodes::SUBSCRIBE,
                    vec![
                        Value::List(codes),
                        Value::Int(step_to_wire(from_step)?),
                        Value::Int(step_to_wire(until_step)?),
                    ],
                ))
            }
            Self::Close => Ok(RequestFrame::new(opcodes::CLOSE, Vec::new())),
        }
    }
}

/// Encode a variable value in its wire form.
#[must_use]
pub fn encode_variable_value(value: VariableValue) -> Value {
    match value {
        VariableValue::Point(p) => Value::List(vec![Value::Double(p.x), Value::Double(p.y)]),
        VariableValue::Scalar(s) => Value::Double(s),
    }
}

/// Decode one variable value according to the variable it answers.
pub fn decode_variable_value(
    variable: TrafficVariable,
    value: Value,
) -> Result<VariableValue, FrameError> {
    match variable {
        TrafficVariable::Position => match value {
            Value::List(items) => {
                let mut fields = FieldReader::new(items);
                let x = fields.next_double()?;
                let y = fields.next_double()?;
                fields.finish()?;
                Ok(VariableValue::Point(Position::new(x, y)))
            }
            other => Err(FrameError::FieldType {
                index: 0,
                expected: "list",
                got: other.type_name(),
            }),
        },
        TrafficVariable::Speed | TrafficVariable::Heading => match value {
            Value::Double(s) => Ok(VariableValue::Scalar(s)),
            other => Err(FrameError::FieldType {
                index: 0,
                expected: "float64",
                got: other.type_name(),
            }),
        },
    }
}

/// Parsed `Advance` reply: reached step plus station deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceReply {
    /// Step the simulator has actually reached.
    pub reached: SimStep,
    /// Stations that appeared during the advance.
    pub departed: Vec<StationId>,
    /// Stations that left during the advance.
    pub arrived: Vec<StationId>,
}

impl AdvanceReply {
    /// Parse the values of an OK `Advance` response.
    pub fn parse(values: Vec<Value>) -> Result<Self, FrameError> {
        let mut fields = FieldReader::new(values);
        let reached = step_from_wire(fields.next_int()?)?;
        let departed = parse_station_list(fields.next_list()?)?;
        let arrived = parse_station_list(fields.next_list()?)?;
        fields.finish()?;
        Ok(Self {
            reached,
            departed,
            arrived,
        })
    }
}

fn parse_station_list(items: Vec<Value>) -> Result<Vec<StationId>, FrameError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Int(raw) => station_from_wire(raw),
            other => Err(FrameError::FieldType {
                index: 0,
                expected: "int32",
                got: other.type_name(),
            }),
        })
        .collect()
}

/// Parse an OK `GetVariables` reply against the requested variables.
///
/// The reply carries one value per requested variable, in request
/// order; any count or type mismatch is a codec error.
pub fn parse_variables_reply(
    requested: &[TrafficVariable],
    values: Vec<Value>,
) -> Result<Vec<(TrafficVariable, VariableValue)>, FrameError> {
    if values.len() != requested.len() {
        return Err(FrameError::FieldCount {
            expected: requested.len(),
            got: values.len(),
        });
    }
    requested
        .iter()
        .zip(values)
        .map(|(variable, value)| Ok((*variable, decode_variable_value(*variable, value)?)))
        .collect()
}
