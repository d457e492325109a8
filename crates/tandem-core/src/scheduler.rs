//! Step cycle: the lockstep engine that keeps both simulators aligned.
//!
//! Each step runs through these phases:
//!
//! 1. **Traffic advance** -- drive the traffic simulator to the current
//!    step and collect the stations that appeared and vanished.
//!
//! 2. **Reconcile** -- apply the delta to the station table, mirror
//!    creations and removals into the network simulator, then refresh
//!    position, speed and heading for every surviving mobile station on
//!    both sides.
//!
//! 3. **Network advance** -- drive the network simulator to the same
//!    step, drain the receptions its physical layer produced, and
//!    classify each one against the tracker (late and unknown message
//!    ids are dropped here).
//!
//! 4. **Message evaluation** -- expire and re-evaluate open broadcasts
//!    against current positions, hand the resulting send orders to the
//!    network simulator, and record delivery for acknowledged sends.
//!
//! 5. **Dispatch** -- resolve subscriptions into per-application
//!    snapshots and push each application its input exactly once,
//!    together with its routed receptions and cancellation notices.
//!
//! 6. **Flush** -- send the orders queued by broadcasts issued during
//!    dispatch, so a new message reaches its initial candidates within
//!    the step it was issued in.
//!
//! Within one step the phase order is fixed; across steps the cycle is
//! deterministic given the same simulator behavior.

use tandem_types::{
    AppId, Position, Reception, SimStep, Station, StationId, StationKind, TrafficVariable,
    VariableValue,
};
use tracing::{debug, info, warn};

use crate::app::{Application, StepActions, StepInput};
use crate::client::{NetworkSim, SimError, StepDelta, TrafficSim};
use crate::clock::{ClockError, StepClock};
use crate::config::{ControllerConfig, FixedStationConfig};
use crate::registry::{ResolvedStep, SubscriptionRegistry};
use crate::stations::StationTable;
use crate::tracker::{GeobroadcastTracker, ReceptionClass, SendOrder};

use std::collections::BTreeMap;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A simulator failed fatally, or an advance failed at all.
    #[error("step {step}: {source}")]
    Sim {
        /// The step being executed when the failure surfaced.
        step: SimStep,
        /// The underlying simulator error.
        source: SimError,
    },

    /// The step clock could not be built or advanced.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A lifecycle operation was called in the wrong state.
    #[error("controller is {current}, expected {expected}")]
    InvalidState {
        /// The state the controller is actually in.
        current: &'static str,
        /// The state the operation requires.
        expected: &'static str,
    },
}

/// Lifecycle of the controller.
///
/// `Idle -> Connected -> Running -> Stopping -> Stopped`, with
/// `Faulted` reachable from `Running` on any fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Built from configuration, simulators not yet reconciled.
    Idle,
    /// Fixed stations mirrored, ready to run.
    Connected,
    /// Stepping.
    Running,
    /// Clean shutdown in progress.
    Stopping,
    /// Clean shutdown completed.
    Stopped,
    /// A fatal error ended the run; both connections are closed.
    Faulted,
}

impl RunState {
    /// Lowercase name for log fields and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        }
    }
}

/// Summary of a single step's execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSummary {
    /// The step that was executed.
    pub step: SimStep,
    /// Stations that appeared this step.
    pub appeared: usize,
    /// Stations that vanished this step.
    pub vanished: usize,
    /// Stations in the table after reconciliation.
    pub stations_present: usize,
    /// Send orders handed to the network simulator (both phases).
    pub sends: usize,
    /// Sends the network simulator acknowledged.
    pub acks: usize,
    /// Receptions dispatched to applications.
    pub receptions: usize,
    /// Applications whose `on_step` completed without error.
    pub dispatched_apps: usize,
    /// Broadcasts still open at the end of the step.
    pub open_messages: usize,
}

/// An application and the identity it runs under.
pub struct RegisteredApp {
    /// Controller-assigned identity.
    pub id: AppId,
    /// Station the application is installed on.
    pub host: StationId,
    /// The application itself.
    pub app: Box<dyn Application>,
}

/// Everything the scheduler owns between steps.
///
/// The two simulator clients stay outside this struct and are passed
/// into each call, so the borrow checker can see that client I/O and
/// controller bookkeeping touch disjoint state.
pub struct ControllerState {
    /// Lifecycle state.
    pub run_state: RunState,
    /// The lockstep clock.
    pub clock: StepClock,
    /// Authoritative station table.
    pub stations: StationTable,
    /// Geobroadcast lifecycle owner.
    pub tracker: GeobroadcastTracker,
    /// Subscription owner.
    pub registry: SubscriptionRegistry,
    /// Registered applications, dispatched in registration order.
    pub apps: Vec<RegisteredApp>,
    next_app_id: u32,
    /// Roadside units to mirror into the network simulator at connect.
    fixed: Vec<FixedStationConfig>,
    /// Technologies assigned to mobile stations at creation.
    mobile_technologies: Vec<String>,
}

impl ControllerState {
    /// Build controller state from configuration.
    ///
    /// Fixed stations are seeded into the station table immediately;
    /// [`connect`] mirrors them into the network simulator.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Clock`] when the configured run bounds
    /// are contradictory.
    pub fn new(config: &ControllerConfig) -> Result<Self, SchedulerError> {
        let clock = StepClock::new(config.run.begin_step, config.run.run_until())?;
        let mut stations = StationTable::new();
        for fixed in &config.fixed_stations {
            let station =
                Station::fixed(StationId::new(fixed.id), Position::new(fixed.x, fixed.y));
            if stations.insert(station).is_some() {
                warn!(station = fixed.id, "Duplicate fixed station in config");
            }
        }
        Ok(Self {
            run_state: RunState::Idle,
            clock,
            stations,
            tracker: GeobroadcastTracker::new(config.tracker.closed_retention_steps),
            registry: SubscriptionRegistry::new(),
            apps: Vec::new(),
            next_app_id: 1,
            fixed: config.fixed_stations.clone(),
            mobile_technologies: config.network.mobile_technologies.clone(),
        })
    }

    /// Register an application under a host station.
    ///
    /// The host is the station identity stamped on the application's
    /// emissions; it is not required to exist in the station table.
    pub fn register_app(&mut self, host: StationId, app: Box<dyn Application>) -> AppId {
        let id = AppId::new(self.next_app_id);
        self.next_app_id = self.next_app_id.saturating_add(1);
        info!(app = %id, host = %host, name = app.name(), "Application registered");
        self.apps.push(RegisteredApp { id, host, app });
        id
    }
}

/// Connect-time reconciliation: mirror the configured fixed stations
/// into the network simulator and mark the controller ready to run.
///
/// Call once both clients are connected at the transport level.
///
/// # Errors
///
/// Fatal simulator errors surface as [`SchedulerError::Sim`];
/// recoverable refusals are logged and cost only the affected station.
pub async fn connect(
    state: &mut ControllerState,
    network: &mut dyn NetworkSim,
) -> Result<(), SchedulerError> {
    if state.run_state != RunState::Idle {
        return Err(SchedulerError::InvalidState {
            current: state.run_state.name(),
            expected: RunState::Idle.name(),
        });
    }
    let step = state.clock.begin();
    for fixed in &state.fixed {
        let result = network
            .create_station(
                StationId::new(fixed.id),
                Position::new(fixed.x, fixed.y),
                &fixed.technologies,
            )
            .await;
        tolerate(step, "create fixed station", result)
            .map_err(|source| SchedulerError::Sim { step, source })?;
    }
    state.run_state = RunState::Connected;
    info!(fixed_stations = state.fixed.len(), "Controller connected");
    Ok(())
}

/// Execute one full step at the clock's current position.
///
/// The caller advances the clock between steps; the runner does both
/// in a loop.
///
/// # Errors
///
/// Any fatal simulator error, and any `advance` failure, aborts the
/// step and must end the run.
pub async fn run_step(
    state: &mut ControllerState,
    traffic: &mut dyn TrafficSim,
    network: &mut dyn NetworkSim,
) -> Result<StepSummary, SchedulerError> {
    let step = state.clock.current();
    let fatal = |source| SchedulerError::Sim { step, source };

    // --- Phase 1: traffic advance ---
    let delta = traffic.advance_to(step).await.map_err(fatal)?;

    // --- Phase 2: reconcile station presence and mobility ---
    phase_reconcile(state, traffic, network, step, &delta).await?;

    // --- Phase 3: network advance and reception drain ---
    let reached = network.advance_until(step).await.map_err(fatal)?;
    debug!(step, reached, "Network advanced");
    let receptions = phase_drain(&state.tracker, network, step).await?;

    // --- Phase 4: message evaluation and sends ---
    let orders = state.tracker.evaluate_step(step, &state.stations);
    let (sends, acks) = perform_sends(&mut state.tracker, network, &orders, step).await?;

    // --- Phase 5: subscription resolution and application dispatch ---
    let resolved = state
        .registry
        .resolve_step(step, &state.stations, traffic)
        .await
        .map_err(fatal)?;
    let routed = state.registry.route_receptions(step, &receptions);
    let dispatched = phase_dispatch(
        &mut state.apps,
        &mut state.tracker,
        &mut state.registry,
        &state.stations,
        step,
        resolved,
        routed,
    );

    // --- Phase 6: flush issue-time send orders ---
    let pending = state.tracker.take_pending();
    let (flush_sends, flush_acks) =
        perform_sends(&mut state.tracker, network, &pending, step).await?;

    let summary = StepSummary {
        step,
        appeared: delta.appeared.len(),
        vanished: delta.vanished.len(),
        stations_present: state.stations.len(),
        sends: sends.saturating_add(flush_sends),
        acks: acks.saturating_add(flush_acks),
        receptions: receptions.len(),
        dispatched_apps: dispatched,
        open_messages: state.tracker.open_count(),
    };
    debug!(
        step,
        stations = summary.stations_present,
        sends = summary.sends,
        receptions = summary.receptions,
        open_messages = summary.open_messages,
        "Step complete"
    );
    Ok(summary)
}

/// Phase 2: apply the traffic delta to the station table and mirror it
/// into the network simulator, then refresh mobility for every
/// surviving mobile station.
async fn phase_reconcile(
    state: &mut ControllerState,
    traffic: &mut dyn TrafficSim,
    network: &mut dyn NetworkSim,
    step: SimStep,
    delta: &StepDelta,
) -> Result<(), SchedulerError> {
    let fatal = |source| SchedulerError::Sim { step, source };

    for &station in &delta.vanished {
        if matches!(state.stations.kind(station), Some(StationKind::Fixed)) {
            warn!(step, station = %station, "Vanish reported for a fixed station, ignoring");
            continue;
        }
        if state.stations.remove(station).is_none() {
            warn!(step, station = %station, "Vanish reported for a station never tracked");
            continue;
        }
        tolerate(step, "remove station", network.remove_station(station).await).map_err(fatal)?;
        let cancelled = state.registry.station_vanished(station, step);
        debug!(step, station = %station, cancelled, "Station vanished");
    }

    for &station in &delta.appeared {
        if matches!(state.stations.kind(station), Some(StationKind::Fixed)) {
            warn!(step, station = %station, "Appeared id collides with a fixed station, ignoring");
            continue;
        }
        let Some((position, speed, heading)) =
            read_mobility(traffic, station, step).await.map_err(fatal)?
        else {
            continue;
        };
        state
            .stations
            .insert(Station::mobile(station, position, speed, heading));
        let result = network
            .create_station(station, position, &state.mobile_technologies)
            .await;
        tolerate(step, "create station", result).map_err(fatal)?;
        debug!(step, station = %station, "Station appeared");
    }

    // Collect first so the presence borrow ends before the mutable reads.
    let survivors: Vec<StationId> = traffic
        .present_stations()
        .iter()
        .copied()
        .filter(|id| !delta.appeared.contains(id))
        .collect();
    for station in survivors {
        let Some((position, speed, heading)) =
            read_mobility(traffic, station, step).await.map_err(fatal)?
        else {
            continue;
        };
        if !state.stations.update_mobility(station, position, speed, heading) {
            warn!(step, station = %station, "Mobility for a station not in the table");
            continue;
        }
        let result = network
            .update_position(station, position, speed, heading)
            .await;
        tolerate(step, "update position", result).map_err(fatal)?;
    }
    Ok(())
}

/// One batched position/speed/heading read.
///
/// An unknown-station refusal yields `Ok(None)`; the station is left
/// alone and the next delta retires it. Other recoverable refusals get
/// the same treatment.
async fn read_mobility(
    traffic: &mut dyn TrafficSim,
    station: StationId,
    step: SimStep,
) -> Result<Option<(Position, f64, f64)>, SimError> {
    const MOBILITY: [TrafficVariable; 3] = [
        TrafficVariable::Position,
        TrafficVariable::Speed,
        TrafficVariable::Heading,
    ];
    let values = match traffic.read_variables(station, &MOBILITY).await {
        Ok(values) => values,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            warn!(step, station = %station, error = %err, "Mobility read refused");
            return Ok(None);
        }
    };
    let mut position = None;
    let mut speed = 0.0;
    let mut heading = 0.0;
    for (variable, value) in values {
        match (variable, value) {
            (TrafficVariable::Position, VariableValue::Point(p)) => position = Some(p),
            (TrafficVariable::Speed, VariableValue::Scalar(s)) => speed = s,
            (TrafficVariable::Heading, VariableValue::Scalar(h)) => heading = h,
            _ => {}
        }
    }
    match position {
        Some(position) => Ok(Some((position, speed, heading))),
        None => {
            warn!(step, station = %station, "Mobility read returned no position");
            Ok(None)
        }
    }
}

/// Phase 3 drain: collect receptions and keep only the ones that belong
/// to an open message.
async fn phase_drain(
    tracker: &GeobroadcastTracker,
    network: &mut dyn NetworkSim,
    step: SimStep,
) -> Result<Vec<Reception>, SchedulerError> {
    let drained = network
        .drain_received()
        .await
        .map_err(|source| SchedulerError::Sim { step, source })?;
    let mut receptions = Vec::new();
    for reception in drained {
        match tracker.classify_reception(reception.message_id) {
            ReceptionClass::Active => receptions.push(reception),
            ReceptionClass::Late => {
                debug!(
                    step,
                    message = %reception.message_id,
                    recipient = %reception.recipient,
                    "Late reception for closed message dropped"
                );
            }
            ReceptionClass::Unknown => {
                warn!(
                    step,
                    message = %reception.message_id,
                    recipient = %reception.recipient,
                    "Reception for unknown message dropped"
                );
            }
        }
    }
    Ok(receptions)
}

/// Hand send orders to the network simulator. Delivery is recorded only
/// for acknowledged sends, so a refused send stays eligible next step.
/// Returns `(attempted, acknowledged)`.
async fn perform_sends(
    tracker: &mut GeobroadcastTracker,
    network: &mut dyn NetworkSim,
    orders: &[SendOrder],
    step: SimStep,
) -> Result<(usize, usize), SchedulerError> {
    let mut attempted = 0_usize;
    let mut acknowledged = 0_usize;
    for order in orders {
        // Cancelled between evaluation and this send.
        let Some(payload) = tracker.payload(order.message) else {
            continue;
        };
        attempted = attempted.saturating_add(1);
        let outcome = network
            .send_message(order.sender, order.recipient, order.message, payload)
            .await;
        match outcome {
            Ok(()) => {
                if tracker.record_sent(order.message, order.recipient) {
                    acknowledged = acknowledged.saturating_add(1);
                }
            }
            Err(err) if err.is_fatal() => {
                return Err(SchedulerError::Sim { step, source: err });
            }
            Err(err) => {
                warn!(
                    step,
                    message = %order.message,
                    recipient = %order.recipient,
                    error = %err,
                    "Send refused, recipient stays undelivered"
                );
            }
        }
    }
    Ok((attempted, acknowledged))
}

/// Phase 5 dispatch: push each application its input exactly once.
///
/// An application error is logged and costs only that application's
/// step; the run continues.
fn phase_dispatch(
    apps: &mut [RegisteredApp],
    tracker: &mut GeobroadcastTracker,
    registry: &mut SubscriptionRegistry,
    stations: &StationTable,
    step: SimStep,
    mut resolved: ResolvedStep,
    mut routed: BTreeMap<AppId, Vec<Reception>>,
) -> usize {
    let mut dispatched = 0_usize;
    for entry in apps {
        let input = StepInput {
            step,
            snapshots: resolved.snapshots.remove(&entry.id).unwrap_or_default(),
            receptions: routed.remove(&entry.id).unwrap_or_default(),
            notices: resolved.notices.remove(&entry.id).unwrap_or_default(),
        };
        let mut actions = StepActions::new(step, entry.id, entry.host, tracker, registry, stations);
        match entry.app.on_step(&input, &mut actions) {
            Ok(()) => dispatched = dispatched.saturating_add(1),
            Err(err) => {
                warn!(
                    step,
                    app = %entry.id,
                    name = entry.app.name(),
                    error = %err,
                    "Application step failed"
                );
            }
        }
    }
    dispatched
}

/// Collapse a recoverable simulator refusal into a logged no-op; fatal
/// errors pass through for the caller to escalate.
fn tolerate(
    step: SimStep,
    action: &'static str,
    result: Result<(), SimError>,
) -> Result<(), SimError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(step, action, error = %err, "Recoverable simulator refusal, skipping");
            Ok(())
        }
    }
}
