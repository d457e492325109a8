//! Authoritative station table.
//!
//! One table, owned by the scheduler, mutated only during the
//! reconciliation phase. The tracker and the registry consult it
//! read-only through the `position`/`kind` lookups; applications never
//! see it directly.

use std::collections::BTreeMap;

use tandem_types::{Position, Station, StationId, StationKind};

/// All stations currently part of the co-simulation, fixed and mobile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationTable {
    stations: BTreeMap<StationId, Station>,
}

impl StationTable {
    /// Empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stations: BTreeMap::new(),
        }
    }

    /// Insert or replace a station record. Returns the previous record
    /// for the id, if any.
    pub fn insert(&mut self, station: Station) -> Option<Station> {
        self.stations.insert(station.id, station)
    }

    /// Remove a station. Returns the removed record, if any.
    pub fn remove(&mut self, id: StationId) -> Option<Station> {
        self.stations.remove(&id)
    }

    /// Update mobility for an existing station. Returns `false` when
    /// the station is not in the table.
    pub fn update_mobility(
        &mut self,
        id: StationId,
        position: Position,
        speed: f64,
        heading: f64,
    ) -> bool {
        let Some(station) = self.stations.get_mut(&id) else {
            return false;
        };
        station.position = position;
        station.speed = speed;
        station.heading = heading;
        true
    }

    /// Position lookup, the read-only boundary consumed by the tracker.
    #[must_use]
    pub fn position(&self, id: StationId) -> Option<Position> {
        self.stations.get(&id).map(|s| s.position)
    }

    /// Kind lookup.
    #[must_use]
    pub fn kind(&self, id: StationId) -> Option<StationKind> {
        self.stations.get(&id).map(|s| s.kind)
    }

    /// Full record lookup.
    #[must_use]
    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.stations.get(&id)
    }

    /// Whether the table holds a record for `id`.
    #[must_use]
    pub fn contains(&self, id: StationId) -> bool {
        self.stations.contains_key(&id)
    }

    /// Number of stations in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Iterate all stations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Ids of all stations in the table, in order.
    pub fn ids(&self) -> impl Iterator<Item = StationId> + '_ {
        self.stations.keys().copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let mut table = StationTable::new();
        assert!(table.is_empty());

        let id = StationId::new(4);
        table.insert(Station::mobile(id, Position::new(1.0, 2.0), 10.0, 90.0));
        assert_eq!(table.len(), 1);
        assert!(table.contains(id));
        assert_eq!(table.position(id), Some(Position::new(1.0, 2.0)));
        assert_eq!(table.kind(id), Some(StationKind::Mobile));

        let removed = table.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(table.position(id), None);
    }

    #[test]
    fn mobility_update_requires_presence() {
        let mut table = StationTable::new();
        let id = StationId::new(7);
        assert!(!table.update_mobility(id, Position::new(0.0, 0.0), 1.0, 0.0));

        table.insert(Station::mobile(id, Position::new(0.0, 0.0), 1.0, 0.0));
        assert!(table.update_mobility(id, Position::new(5.0, 5.0), 2.0, 45.0));
        let station = table.get(id).unwrap();
        assert_eq!(station.position, Position::new(5.0, 5.0));
        assert!((station.speed - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fixed_and_mobile_coexist() {
        let mut table = StationTable::new();
        table.insert(Station::fixed(StationId::new(900), Position::new(50.0, 50.0)));
        table.insert(Station::mobile(
            StationId::new(1),
            Position::new(0.0, 0.0),
            14.0,
            180.0,
        ));

        assert_eq!(table.kind(StationId::new(900)), Some(StationKind::Fixed));
        assert_eq!(table.kind(StationId::new(1)), Some(StationKind::Mobile));
        let ids: Vec<_> = table.ids().collect();
        assert_eq!(ids, vec![StationId::new(1), StationId::new(900)]);
    }
}
