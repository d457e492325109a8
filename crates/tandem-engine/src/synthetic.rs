//! Seeded in-process simulator pair for socket-free runs.
//!
//! With `run.mode: synthetic` the engine drives the step loop against
//! [`SyntheticTrafficSim`] and [`SyntheticNetworkSim`] instead of the
//! socket clients. The traffic side moves a small fleet of vehicles on
//! a seeded random walk with arrivals and departures; the network side
//! accepts every delivery and loops it back as a reception on the next
//! drain. Two runs with the same seed produce identical station
//! histories, which makes synthetic runs reproducible smoke tests for
//! the whole controller.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tandem_core::client::{NetworkSim, SimError, StepDelta, TrafficSim};
use tandem_core::config::ControllerConfig;
use tandem_types::{
    MessageId, Position, Reception, SimStep, StationId, TrafficVariable, VariableValue,
};
use tracing::debug;

/// Vehicles present immediately, reported in the first advance.
const INITIAL_VEHICLES: usize = 3;

/// Lowest vehicle id; ids count up from here and are never reused.
const FIRST_VEHICLE_ID: u32 = 1;

/// Probability a new vehicle enters on any given step.
const ARRIVAL_CHANCE: f64 = 0.25;

/// Probability the oldest vehicle leaves on any given step, applied
/// only while more than [`INITIAL_VEHICLES`] are present.
const DEPARTURE_CHANCE: f64 = 0.25;

/// Side length in meters of the square the vehicles wander in.
/// Positions wrap around at the edges.
const WORLD_EXTENT: f64 = 500.0;

/// Speed range for spawned vehicles in m/s.
const MIN_SPEED: f64 = 3.0;
const MAX_SPEED: f64 = 15.0;

/// Largest per-step heading change in degrees.
const HEADING_JITTER: f64 = 20.0;

/// Build the simulator pair from the `run` config section.
#[must_use]
pub fn seeded_pair(config: &ControllerConfig) -> (SyntheticTrafficSim, SyntheticNetworkSim) {
    let traffic = SyntheticTrafficSim::new(
        config.run.synthetic_seed,
        config.run.begin_step,
        config.run.step_length_ms,
    );
    (traffic, SyntheticNetworkSim::new())
}

/// One simulated vehicle.
#[derive(Debug, Clone, Copy)]
struct Vehicle {
    position: Position,
    speed: f64,
    heading: f64,
}

/// Traffic simulator stand-in driven by a seeded random walk.
///
/// Every step each vehicle jitters its heading and moves by its speed;
/// arrivals spawn at random positions and departures retire the oldest
/// vehicle, never dropping below the initial fleet size.
pub struct SyntheticTrafficSim {
    rng: SmallRng,
    step: SimStep,
    step_seconds: f64,
    next_vehicle: u32,
    vehicles: BTreeMap<StationId, Vehicle>,
    present: BTreeSet<StationId>,
    pending_appeared: Vec<StationId>,
}

impl SyntheticTrafficSim {
    /// Seeded simulator starting at `begin_step` with the initial fleet
    /// queued for the first advance.
    #[must_use]
    pub fn new(seed: u64, begin_step: SimStep, step_length_ms: u64) -> Self {
        let mut sim = Self {
            rng: SmallRng::seed_from_u64(seed),
            step: begin_step,
            step_seconds: seconds_per_step(step_length_ms),
            next_vehicle: FIRST_VEHICLE_ID,
            vehicles: BTreeMap::new(),
            present: BTreeSet::new(),
            pending_appeared: Vec::new(),
        };
        for _ in 0..INITIAL_VEHICLES {
            let station = sim.spawn_vehicle();
            sim.pending_appeared.push(station);
        }
        sim
    }

    fn spawn_vehicle(&mut self) -> StationId {
        let station = StationId::new(self.next_vehicle);
        self.next_vehicle = self.next_vehicle.saturating_add(1);
        let vehicle = Vehicle {
            position: Position::new(
                self.rng.random_range(0.0..WORLD_EXTENT),
                self.rng.random_range(0.0..WORLD_EXTENT),
            ),
            speed: self.rng.random_range(MIN_SPEED..=MAX_SPEED),
            heading: self.rng.random_range(0.0..360.0),
        };
        self.vehicles.insert(station, vehicle);
        self.present.insert(station);
        station
    }

    fn move_vehicles(&mut self) {
        for vehicle in self.vehicles.values_mut() {
            let jitter = self.rng.random_range(-HEADING_JITTER..=HEADING_JITTER);
            vehicle.heading = (vehicle.heading + jitter).rem_euclid(360.0);
            let radians = vehicle.heading.to_radians();
            let distance = vehicle.speed * self.step_seconds;
            vehicle.position.x =
                (vehicle.position.x + distance * radians.sin()).rem_euclid(WORLD_EXTENT);
            vehicle.position.y =
                (vehicle.position.y + distance * radians.cos()).rem_euclid(WORLD_EXTENT);
        }
    }
}

#[async_trait]
impl TrafficSim for SyntheticTrafficSim {
    async fn advance_to(&mut self, target: SimStep) -> Result<StepDelta, SimError> {
        let mut delta = StepDelta {
            appeared: mem::take(&mut self.pending_appeared),
            vanished: Vec::new(),
        };
        while self.step < target {
            self.step = self.step.saturating_add(1);
            self.move_vehicles();
            // Never retire a vehicle that appeared within this same advance.
            if self.vehicles.len() > INITIAL_VEHICLES
                && self.rng.random_bool(DEPARTURE_CHANCE)
                && let Some(station) = self.vehicles.keys().next().copied()
                && !delta.appeared.contains(&station)
            {
                self.vehicles.remove(&station);
                self.present.remove(&station);
                delta.vanished.push(station);
            }
            if self.rng.random_bool(ARRIVAL_CHANCE) {
                delta.appeared.push(self.spawn_vehicle());
            }
        }
        debug!(
            step = target,
            appeared = delta.appeared.len(),
            vanished = delta.vanished.len(),
            vehicles = self.vehicles.len(),
            "Synthetic traffic advanced"
        );
        Ok(delta)
    }

    async fn read_variables(
        &mut self,
        station: StationId,
        variables: &[TrafficVariable],
    ) -> Result<Vec<(TrafficVariable, VariableValue)>, SimError> {
        let Some(vehicle) = self.vehicles.get(&station) else {
            return Err(SimError::StationNotFound { station });
        };
        Ok(variables
            .iter()
            .map(|&variable| {
                let value = match variable {
                    TrafficVariable::Position => VariableValue::Point(vehicle.position),
                    TrafficVariable::Speed => VariableValue::Scalar(vehicle.speed),
                    TrafficVariable::Heading => VariableValue::Scalar(vehicle.heading),
                };
                (variable, value)
            })
            .collect())
    }

    async fn write_variable(
        &mut self,
        station: StationId,
        variable: TrafficVariable,
        value: VariableValue,
    ) -> Result<(), SimError> {
        let Some(vehicle) = self.vehicles.get_mut(&station) else {
            return Err(SimError::StationNotFound { station });
        };
        match (variable, value) {
            (TrafficVariable::Position, VariableValue::Point(position)) => {
                vehicle.position = position;
            }
            (TrafficVariable::Speed, VariableValue::Scalar(speed)) => vehicle.speed = speed,
            (TrafficVariable::Heading, VariableValue::Scalar(heading)) => {
                vehicle.heading = heading;
            }
            _ => {
                return Err(SimError::Rejected {
                    detail: format!("value does not fit variable {variable:?}"),
                });
            }
        }
        Ok(())
    }

    fn present_stations(&self) -> &BTreeSet<StationId> {
        &self.present
    }

    async fn close(&mut self) -> Result<(), SimError> {
        debug!(step = self.step, "Synthetic traffic closed");
        Ok(())
    }
}

impl std::fmt::Debug for SyntheticTrafficSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticTrafficSim")
            .field("step", &self.step)
            .field("vehicles", &self.vehicles.len())
            .finish_non_exhaustive()
    }
}

/// Network simulator stand-in with lossless one-step propagation.
///
/// Every accepted send becomes a reception returned by the next drain,
/// which under the step cycle means delivery lands one step after the
/// send, the same shape a real network simulator produces.
#[derive(Debug, Default)]
pub struct SyntheticNetworkSim {
    clock: SimStep,
    stations: BTreeSet<StationId>,
    pending: Vec<Reception>,
}

impl SyntheticNetworkSim {
    /// Simulator with no stations and nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkSim for SyntheticNetworkSim {
    async fn advance_until(&mut self, target: SimStep) -> Result<SimStep, SimError> {
        self.clock = target;
        debug!(step = target, "Synthetic network advanced");
        Ok(target)
    }

    async fn send_message(
        &mut self,
        _sender: StationId,
        recipient: StationId,
        message_id: MessageId,
        payload: &[u8],
    ) -> Result<(), SimError> {
        if !self.stations.contains(&recipient) {
            return Err(SimError::StationNotFound { station: recipient });
        }
        self.pending.push(Reception {
            recipient,
            message_id,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn drain_received(&mut self) -> Result<Vec<Reception>, SimError> {
        let batch = mem::take(&mut self.pending);
        if !batch.is_empty() {
            debug!(step = self.clock, count = batch.len(), "Receptions drained");
        }
        Ok(batch)
    }

    async fn create_station(
        &mut self,
        station: StationId,
        _position: Position,
        _technologies: &[String],
    ) -> Result<(), SimError> {
        self.stations.insert(station);
        Ok(())
    }

    async fn update_position(
        &mut self,
        station: StationId,
        _position: Position,
        _speed: f64,
        _heading: f64,
    ) -> Result<(), SimError> {
        if !self.stations.contains(&station) {
            return Err(SimError::StationNotFound { station });
        }
        Ok(())
    }

    async fn remove_station(&mut self, station: StationId) -> Result<(), SimError> {
        if !self.stations.remove(&station) {
            return Err(SimError::StationNotFound { station });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SimError> {
        debug!(step = self.clock, "Synthetic network closed");
        Ok(())
    }
}

/// Milliseconds to seconds for displacement math.
fn seconds_per_step(step_length_ms: u64) -> f64 {
    f64::from(u32::try_from(step_length_ms).unwrap_or(u32::MAX)) / 1000.0
}
