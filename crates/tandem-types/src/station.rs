//! Stations and the per-step variable snapshots read for them.
//!
//! A station is any simulated traffic participant or fixed roadside
//! unit with a V2X radio. Mobile stations appear and vanish with the
//! traffic simulation; fixed stations are declared in configuration and
//! exist for the whole run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SimStep;
use crate::geometry::Position;
use crate::ids::StationId;

/// Whether a station moves with traffic or is installed at the roadside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationKind {
    /// A vehicle (or other participant) driven by the traffic simulator.
    Mobile,
    /// A roadside unit declared in configuration; never moves, never
    /// appears in traffic deltas.
    Fixed,
}

/// One active station as mirrored in the authoritative station table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Identifier, unique for the lifetime of the simulation.
    pub id: StationId,
    /// Mobile or fixed.
    pub kind: StationKind,
    /// Last reconciled position.
    pub position: Position,
    /// Last reconciled speed in m/s; zero for fixed stations.
    pub speed: f64,
    /// Last reconciled heading in degrees; zero for fixed stations.
    pub heading: f64,
}

impl Station {
    /// Create a fixed roadside station at `position`.
    #[must_use]
    pub const fn fixed(id: StationId, position: Position) -> Self {
        Self {
            id,
            kind: StationKind::Fixed,
            position,
            speed: 0.0,
            heading: 0.0,
        }
    }

    /// Create a mobile station from its first mobility read.
    #[must_use]
    pub const fn mobile(id: StationId, position: Position, speed: f64, heading: f64) -> Self {
        Self {
            id,
            kind: StationKind::Mobile,
            position,
            speed,
            heading,
        }
    }
}

/// Mobility variables an application can subscribe to.
///
/// The wire codes for these live with the protocol dialects; this enum
/// is the domain-side identity used in subscriptions and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrafficVariable {
    /// Planar position, meters.
    Position,
    /// Speed in m/s.
    Speed,
    /// Heading in degrees, clockwise from north.
    Heading,
}

impl TrafficVariable {
    /// Short name for log fields.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Speed => "speed",
            Self::Heading => "heading",
        }
    }
}

/// Value of a single read variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VariableValue {
    /// A planar point (for [`TrafficVariable::Position`]).
    Point(Position),
    /// A scalar quantity (speed, heading).
    Scalar(f64),
}

/// Per-step, per-station read of subscribed variables.
///
/// Ephemeral by contract: built during step resolution, pushed to
/// applications once, then discarded. Never persisted across steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    /// The station the values belong to.
    pub station: StationId,
    /// The step the values were read for.
    pub step: SimStep,
    /// Requested variables and their values.
    pub values: BTreeMap<TrafficVariable, VariableValue>,
}

impl StationSnapshot {
    /// Create an empty snapshot for `station` at `step`.
    #[must_use]
    pub const fn new(station: StationId, step: SimStep) -> Self {
        Self {
            station,
            step,
            values: BTreeMap::new(),
        }
    }

    /// Convenience accessor for the position value, if present.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        match self.values.get(&TrafficVariable::Position) {
            Some(VariableValue::Point(p)) => Some(*p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stations_have_zero_motion() {
        let s = Station::fixed(StationId::new(900), Position::new(10.0, 20.0));
        assert_eq!(s.kind, StationKind::Fixed);
        assert!(s.speed.abs() < f64::EPSILON);
        assert!(s.heading.abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_position_accessor() {
        let mut snap = StationSnapshot::new(StationId::new(1), 5);
        assert_eq!(snap.position(), None);
        snap.values.insert(
            TrafficVariable::Position,
            VariableValue::Point(Position::new(3.0, 4.0)),
        );
        snap.values
            .insert(TrafficVariable::Speed, VariableValue::Scalar(13.9));
        assert_eq!(snap.position(), Some(Position::new(3.0, 4.0)));
    }

    #[test]
    fn variables_order_deterministically() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(TrafficVariable::Speed);
        set.insert(TrafficVariable::Position);
        set.insert(TrafficVariable::Heading);
        let ordered: Vec<_> = set.into_iter().collect();
        assert_eq!(
            ordered,
            vec![
                TrafficVariable::Position,
                TrafficVariable::Speed,
                TrafficVariable::Heading
            ]
        );
    }
}
