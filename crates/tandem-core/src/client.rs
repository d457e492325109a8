//! Simulator client traits and scripted test doubles.
//!
//! The scheduler drives the two external simulator processes through
//! the [`TrafficSim`] and [`NetworkSim`] traits. The socket-backed
//! implementations live in the `tandem-sim` crate; the synthetic pair
//! lives in the engine; the scripted stubs here let scheduler, registry
//! and tracker tests run the full step cycle without a socket.
//!
//! Both traits are object safe so the scheduler can hold either backing
//! behind `Box<dyn ...>` and tests can swap doubles in freely.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use tandem_types::{
    MessageId, Position, Reception, SimStep, StationId, TrafficVariable, VariableValue,
};

/// Errors raised at the simulator seam.
///
/// Fatality is a property of the variant, not the call site, with one
/// exception: the scheduler escalates every `advance` failure because a
/// rejected or failed advance leaves the lockstep unrecoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// The peer sent bytes that violate the wire contract. The
    /// connection state is unknowable afterwards.
    #[error("malformed frame: {detail}")]
    MalformedFrame {
        /// What the codec could not accept.
        detail: String,
    },

    /// The simulator's reported step or clock disagrees with the
    /// requested one after an advance.
    #[error("simulator desync: requested step {requested}, peer reported {reported}")]
    Desync {
        /// Step the controller asked the simulator to reach.
        requested: SimStep,
        /// Step the simulator claims to be at.
        reported: SimStep,
    },

    /// No response within the configured deadline, after the single
    /// reconnect-and-resend retry already happened.
    #[error("simulator did not respond within {millis}ms")]
    Timeout {
        /// The deadline that was exceeded, in milliseconds.
        millis: u64,
    },

    /// Socket-level failure outside the timeout path (connect, read,
    /// write, or dropped connection).
    #[error("connection failure: {detail}")]
    Connection {
        /// Description of the transport failure.
        detail: String,
    },

    /// The simulator does not know the referenced station. Recoverable:
    /// the operation becomes a no-op and subscriptions on the station
    /// are auto-cancelled.
    #[error("station {station} not known to the simulator")]
    StationNotFound {
        /// The station the simulator rejected.
        station: StationId,
    },

    /// The simulator refused the command (Error, `NotSupported` or Busy
    /// status that is not an unknown-station reply).
    #[error("command rejected by simulator: {detail}")]
    Rejected {
        /// The peer's stated reason.
        detail: String,
    },
}

impl SimError {
    /// Whether this error must terminate the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::MalformedFrame { .. }
            | Self::Desync { .. }
            | Self::Timeout { .. }
            | Self::Connection { .. } => true,
            Self::StationNotFound { .. } | Self::Rejected { .. } => false,
        }
    }
}

/// Stations that appeared and vanished during one traffic step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDelta {
    /// Stations that entered the traffic simulation this step.
    pub appeared: Vec<StationId>,
    /// Stations that left the traffic simulation this step.
    pub vanished: Vec<StationId>,
}

impl StepDelta {
    /// Delta with no changes.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            appeared: Vec::new(),
            vanished: Vec::new(),
        }
    }

    /// Whether the step changed station presence at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.vanished.is_empty()
    }
}

/// Client-side view of the road traffic simulator.
///
/// One command in flight at a time; every method resolves to exactly
/// one response. Implementations verify after `advance_to` that the
/// simulator actually reached the requested step and report
/// [`SimError::Desync`] themselves when it did not.
#[async_trait]
pub trait TrafficSim: Send {
    /// Advance the traffic simulation to `target` and return the
    /// stations that appeared and vanished while getting there.
    async fn advance_to(&mut self, target: SimStep) -> Result<StepDelta, SimError>;

    /// Read a batch of variables for one station, returned in request
    /// order.
    async fn read_variables(
        &mut self,
        station: StationId,
        variables: &[TrafficVariable],
    ) -> Result<Vec<(TrafficVariable, VariableValue)>, SimError>;

    /// Write one variable on one station.
    async fn write_variable(
        &mut self,
        station: StationId,
        variable: TrafficVariable,
        value: VariableValue,
    ) -> Result<(), SimError>;

    /// Stations currently present per the deltas applied so far.
    fn present_stations(&self) -> &BTreeSet<StationId>;

    /// Orderly shutdown: send Close and release the connection.
    async fn close(&mut self) -> Result<(), SimError>;
}

/// Client-side view of the wireless network simulator.
#[async_trait]
pub trait NetworkSim: Send {
    /// Advance the network simulation to `target`. Implementations
    /// cross-check the clock the simulator reports and return it;
    /// a mismatch is [`SimError::Desync`].
    async fn advance_until(&mut self, target: SimStep) -> Result<SimStep, SimError>;

    /// Hand one candidate delivery to the physical layer. `Ok` is the
    /// acknowledgement that the delivery was accepted.
    async fn send_message(
        &mut self,
        sender: StationId,
        recipient: StationId,
        message_id: MessageId,
        payload: &[u8],
    ) -> Result<(), SimError>;

    /// Collect the messages physically received during the step just
    /// completed. Draining is destructive on the simulator side.
    async fn drain_received(&mut self) -> Result<Vec<Reception>, SimError>;

    /// Mirror a newly appeared station into the network simulation.
    async fn create_station(
        &mut self,
        station: StationId,
        position: Position,
        technologies: &[String],
    ) -> Result<(), SimError>;

    /// Push fresh mobility for a present station.
    async fn update_position(
        &mut self,
        station: StationId,
        position: Position,
        speed: f64,
        heading: f64,
    ) -> Result<(), SimError>;

    /// Retire a vanished station.
    async fn remove_station(&mut self, station: StationId) -> Result<(), SimError>;

    /// Orderly shutdown: send Close and release the connection.
    async fn close(&mut self) -> Result<(), SimError>;
}

// ---------------------------------------------------------------------------
// Scripted stubs
// ---------------------------------------------------------------------------

/// Scripted traffic simulator for lockstep tests.
///
/// Advances pop outcomes from `advance_script` (an exhausted script
/// yields empty deltas); variable reads are served from the `variables`
/// map. Every call is recorded so tests can assert ordering, batching
/// and teardown.
#[derive(Debug, Default)]
pub struct StubTrafficSim {
    /// Outcomes for successive `advance_to` calls.
    pub advance_script: VecDeque<Result<StepDelta, SimError>>,
    /// Values served per station.
    pub variables: BTreeMap<StationId, BTreeMap<TrafficVariable, VariableValue>>,
    /// Stations answered with `StationNotFound` on read and write.
    pub unknown_stations: BTreeSet<StationId>,
    /// When set, every read fails with a clone of this error.
    pub read_failure: Option<SimError>,
    /// Recorded advance targets, in call order.
    pub advanced_to: Vec<SimStep>,
    /// Recorded reads: station and requested variables, in call order.
    pub reads: Vec<(StationId, Vec<TrafficVariable>)>,
    /// Recorded writes, in call order.
    pub writes: Vec<(StationId, TrafficVariable, VariableValue)>,
    /// Whether `close` was called.
    pub closed: bool,
    present: BTreeSet<StationId>,
}

impl StubTrafficSim {
    /// Empty stub: advances succeed with empty deltas, reads find no
    /// stations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an advance outcome.
    pub fn push_advance(&mut self, outcome: Result<StepDelta, SimError>) {
        self.advance_script.push_back(outcome);
    }

    /// Serve `values` for `station` on subsequent reads.
    pub fn set_variables(
        &mut self,
        station: StationId,
        values: &[(TrafficVariable, VariableValue)],
    ) {
        self.variables
            .insert(station, values.iter().copied().collect());
    }
}

#[async_trait]
impl TrafficSim for StubTrafficSim {
    async fn advance_to(&mut self, target: SimStep) -> Result<StepDelta, SimError> {
        self.advanced_to.push(target);
        let outcome = self
            .advance_script
            .pop_front()
            .unwrap_or_else(|| Ok(StepDelta::empty()));
        if let Ok(delta) = &outcome {
            for id in &delta.appeared {
                self.present.insert(*id);
            }
            for id in &delta.vanished {
                self.present.remove(id);
            }
        }
        outcome
    }

    async fn read_variables(
        &mut self,
        station: StationId,
        variables: &[TrafficVariable],
    ) -> Result<Vec<(TrafficVariable, VariableValue)>, SimError> {
        self.reads.push((station, variables.to_vec()));
        if let Some(failure) = &self.read_failure {
            return Err(failure.clone());
        }
        if self.unknown_stations.contains(&station) {
            return Err(SimError::StationNotFound { station });
        }
        let Some(known) = self.variables.get(&station) else {
            return Err(SimError::StationNotFound { station });
        };
        Ok(variables
            .iter()
            .filter_map(|variable| known.get(variable).map(|value| (*variable, *value)))
            .collect())
    }

    async fn write_variable(
        &mut self,
        station: StationId,
        variable: TrafficVariable,
        value: VariableValue,
    ) -> Result<(), SimError> {
        if self.unknown_stations.contains(&station) {
            return Err(SimError::StationNotFound { station });
        }
        self.writes.push((station, variable, value));
        Ok(())
    }

    fn present_stations(&self) -> &BTreeSet<StationId> {
        &self.present
    }

    async fn close(&mut self) -> Result<(), SimError> {
        self.closed = true;
        Ok(())
    }
}

/// Scripted network simulator for lockstep tests.
///
/// `advance_until` echoes the target unless `advance_script` supplies
/// an outcome; sends are acknowledged unless `send_script` says
/// otherwise; drains pop batches from `drain_script`.
#[derive(Debug, Default)]
pub struct StubNetworkSim {
    /// Outcomes for successive `advance_until` calls; empty = echo.
    pub advance_script: VecDeque<Result<SimStep, SimError>>,
    /// Outcomes for successive `send_message` calls; empty = ack.
    pub send_script: VecDeque<Result<(), SimError>>,
    /// Reception batches for successive `drain_received` calls.
    pub drain_script: VecDeque<Vec<Reception>>,
    /// Recorded acknowledged and refused sends, in call order.
    pub sends: Vec<(StationId, StationId, MessageId)>,
    /// Recorded station creations, in call order.
    pub created: Vec<StationId>,
    /// Recorded station removals, in call order.
    pub removed: Vec<StationId>,
    /// Recorded position pushes, in call order.
    pub position_updates: Vec<(StationId, Position)>,
    /// Whether `close` was called.
    pub closed: bool,
}

impl StubNetworkSim {
    /// Empty stub: advances echo, sends ack, drains return nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reception batch for the next drain.
    pub fn push_drain(&mut self, batch: Vec<Reception>) {
        self.drain_script.push_back(batch);
    }
}

#[async_trait]
impl NetworkSim for StubNetworkSim {
    async fn advance_until(&mut self, target: SimStep) -> Result<SimStep, SimError> {
        self.advance_script.pop_front().unwrap_or(Ok(target))
    }

    async fn send_message(
        &mut self,
        sender: StationId,
        recipient: StationId,
        message_id: MessageId,
        _payload: &[u8],
    ) -> Result<(), SimError> {
        self.sends.push((sender, recipient, message_id));
        self.send_script.pop_front().unwrap_or(Ok(()))
    }

    async fn drain_received(&mut self) -> Result<Vec<Reception>, SimError> {
        Ok(self.drain_script.pop_front().unwrap_or_default())
    }

    async fn create_station(
        &mut self,
        station: StationId,
        _position: Position,
        _technologies: &[String],
    ) -> Result<(), SimError> {
        self.created.push(station);
        Ok(())
    }

    async fn update_position(
        &mut self,
        station: StationId,
        position: Position,
        _speed: f64,
        _heading: f64,
    ) -> Result<(), SimError> {
        self.position_updates.push((station, position));
        Ok(())
    }

    async fn remove_station(&mut self, station: StationId) -> Result<(), SimError> {
        self.removed.push(station);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SimError> {
        self.closed = true;
        Ok(())
    }
}
