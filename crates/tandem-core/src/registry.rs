//! Subscription registry: per-step resolution of application data.
//!
//! Applications subscribe to a variable set for one station or for all
//! stations, bounded by a step window. Each step the registry reads the
//! union of needed variables from the traffic simulator, batched per
//! station so a station is read at most once no matter how many
//! subscriptions cover it, and assembles per-application snapshots
//! filtered back to each subscription's set.
//!
//! The registry never talks to the network simulator. Receptions are
//! drained by the scheduler and handed to [`route_receptions`], which
//! fans each one out to the applications whose active subscriptions
//! cover the recipient station.
//!
//! [`route_receptions`]: SubscriptionRegistry::route_receptions

use std::collections::{BTreeMap, BTreeSet};

use tandem_types::{
    AppId, Reception, SimStep, StationId, StationKind, StationSnapshot, StepWindow, Subscription,
    SubscriptionId, SubscriptionNotice, SubscriptionScope, TrafficVariable, VariableValue,
};
use tracing::{debug, warn};

use crate::client::{SimError, TrafficSim};
use crate::stations::StationTable;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The handle does not name a subscription owned by the caller.
    #[error("unknown subscription {subscription}")]
    UnknownSubscription {
        /// The handle that was presented.
        subscription: SubscriptionId,
    },

    /// The per-run subscription id space is exhausted.
    #[error("subscription id space exhausted")]
    IdExhausted,
}

/// Output of one resolution pass: everything the dispatch needs,
/// already grouped per application.
#[derive(Debug, Default)]
pub struct ResolvedStep {
    /// Snapshots per application, stations in id order.
    pub snapshots: BTreeMap<AppId, Vec<StationSnapshot>>,
    /// Auto-cancellation notices drained for this dispatch.
    pub notices: BTreeMap<AppId, Vec<SubscriptionNotice>>,
}

/// Subscription state and the pending one-shot notices.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    next_id: u32,
    subs: BTreeMap<SubscriptionId, Subscription>,
    pending_notices: BTreeMap<AppId, Vec<SubscriptionNotice>>,
}

impl SubscriptionRegistry {
    /// Empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: 1,
            subs: BTreeMap::new(),
            pending_notices: BTreeMap::new(),
        }
    }

    /// Create or replace a subscription.
    ///
    /// At most one subscription exists per (application, scope).
    /// Re-subscribing the same pair replaces the variable set and the
    /// window in place and returns the existing handle, so a duplicate
    /// subscribe is never an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::IdExhausted`] if the handle counter
    /// overflows.
    pub fn subscribe(
        &mut self,
        app: AppId,
        scope: SubscriptionScope,
        variables: BTreeSet<TrafficVariable>,
        window: StepWindow,
    ) -> Result<SubscriptionId, RegistryError> {
        if let Some(existing) = self
            .subs
            .values_mut()
            .find(|sub| sub.app == app && sub.scope == scope)
        {
            existing.variables = variables;
            existing.window = window;
            debug!(subscription = %existing.id, app = %app, "Subscription replaced in place");
            return Ok(existing.id);
        }

        let id = SubscriptionId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(RegistryError::IdExhausted)?;
        self.subs.insert(
            id,
            Subscription {
                id,
                app,
                scope,
                variables,
                window,
            },
        );
        debug!(subscription = %id, app = %app, "Subscription created");
        Ok(id)
    }

    /// Remove a subscription owned by `app`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownSubscription`] if the handle is
    /// unknown or belongs to another application.
    pub fn unsubscribe(&mut self, app: AppId, handle: SubscriptionId) -> Result<(), RegistryError> {
        let owned = self
            .subs
            .get(&handle)
            .is_some_and(|sub| sub.app == app);
        if !owned {
            return Err(RegistryError::UnknownSubscription {
                subscription: handle,
            });
        }
        self.subs.remove(&handle);
        debug!(subscription = %handle, app = %app, "Subscription removed");
        Ok(())
    }

    /// Auto-cancel every subscription scoped to a station that left the
    /// traffic simulation. Each owner is queued exactly one notice,
    /// delivered with the next dispatch. Returns the number of
    /// cancelled subscriptions.
    pub fn station_vanished(&mut self, station: StationId, at_step: SimStep) -> usize {
        self.cancel_station_subs(station, at_step)
    }

    /// Resolve one step: batched variable reads plus notice drain.
    ///
    /// Mobile stations are read from the traffic simulator, one read
    /// per station for the union of requested variables; fixed stations
    /// are served from the table without a round trip. An
    /// unknown-station reply mid-resolve cancels the subscriptions on
    /// that station with the same one-notice treatment as a vanish.
    ///
    /// # Errors
    ///
    /// Propagates fatal [`SimError`]s from the traffic client;
    /// recoverable refusals are logged and cost only the affected
    /// station's snapshot.
    pub async fn resolve_step(
        &mut self,
        step: SimStep,
        stations: &StationTable,
        traffic: &mut dyn TrafficSim,
    ) -> Result<ResolvedStep, SimError> {
        let wanted = self.collect_wanted(step, stations);

        let mut values_by_station: BTreeMap<StationId, BTreeMap<TrafficVariable, VariableValue>> =
            BTreeMap::new();
        for (station, variables) in &wanted {
            match stations.kind(*station) {
                Some(StationKind::Fixed) => {
                    if let Some(record) = stations.get(*station) {
                        let values = variables
                            .iter()
                            .map(|variable| {
                                let value = match variable {
                                    TrafficVariable::Position => {
                                        VariableValue::Point(record.position)
                                    }
                                    TrafficVariable::Speed => VariableValue::Scalar(record.speed),
                                    TrafficVariable::Heading => {
                                        VariableValue::Scalar(record.heading)
                                    }
                                };
                                (*variable, value)
                            })
                            .collect();
                        values_by_station.insert(*station, values);
                    }
                }
                Some(StationKind::Mobile) => {
                    let requested: Vec<TrafficVariable> = variables.iter().copied().collect();
                    match traffic.read_variables(*station, &requested).await {
                        Ok(values) => {
                            values_by_station.insert(*station, values.into_iter().collect());
                        }
                        Err(SimError::StationNotFound { .. }) => {
                            warn!(
                                step,
                                station = %station,
                                "Station unknown mid-resolve, cancelling its subscriptions"
                            );
                            self.cancel_station_subs(*station, step);
                        }
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            warn!(step, station = %station, error = %err, "Variable read refused");
                        }
                    }
                }
                None => {}
            }
        }

        let snapshots = self.assemble_snapshots(step, &values_by_station);
        let notices = std::mem::take(&mut self.pending_notices);
        Ok(ResolvedStep { snapshots, notices })
    }

    /// Fan receptions out to the applications whose active
    /// subscriptions cover the recipient station. An application
    /// receives each reception at most once even when several of its
    /// subscriptions match.
    #[must_use]
    pub fn route_receptions(
        &self,
        step: SimStep,
        receptions: &[Reception],
    ) -> BTreeMap<AppId, Vec<Reception>> {
        let mut routed: BTreeMap<AppId, Vec<Reception>> = BTreeMap::new();
        for reception in receptions {
            let targets: BTreeSet<AppId> = self
                .subs
                .values()
                .filter(|sub| sub.window.covers(step) && sub.scope.matches(reception.recipient))
                .map(|sub| sub.app)
                .collect();
            for app in targets {
                routed.entry(app).or_default().push(reception.clone());
            }
        }
        routed
    }

    /// Look up a subscription by handle.
    #[must_use]
    pub fn subscription(&self, handle: SubscriptionId) -> Option<&Subscription> {
        self.subs.get(&handle)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }

    /// Per-station union of variables needed for `step`, with orphaned
    /// station-scoped subscriptions cancelled on the way.
    fn collect_wanted(
        &mut self,
        step: SimStep,
        stations: &StationTable,
    ) -> BTreeMap<StationId, BTreeSet<TrafficVariable>> {
        let mut wanted: BTreeMap<StationId, BTreeSet<TrafficVariable>> = BTreeMap::new();
        let mut orphaned: Vec<StationId> = Vec::new();

        for sub in self.subs.values() {
            if !sub.window.covers(step) {
                continue;
            }
            match sub.scope {
                SubscriptionScope::Station(target) => {
                    if stations.contains(target) {
                        wanted
                            .entry(target)
                            .or_default()
                            .extend(sub.variables.iter().copied());
                    } else {
                        orphaned.push(target);
                    }
                }
                SubscriptionScope::All => {
                    for station in stations.iter() {
                        wanted
                            .entry(station.id)
                            .or_default()
                            .extend(sub.variables.iter().copied());
                    }
                }
            }
        }

        for station in orphaned {
            self.cancel_station_subs(station, step);
        }
        wanted
    }

    /// Build per-application snapshots from the values read this step.
    /// Subscriptions of one application covering the same station are
    /// merged into a single snapshot.
    fn assemble_snapshots(
        &self,
        step: SimStep,
        values_by_station: &BTreeMap<StationId, BTreeMap<TrafficVariable, VariableValue>>,
    ) -> BTreeMap<AppId, Vec<StationSnapshot>> {
        let mut per_app: BTreeMap<AppId, BTreeMap<StationId, StationSnapshot>> = BTreeMap::new();

        for sub in self.subs.values() {
            if !sub.window.covers(step) {
                continue;
            }
            for (station, values) in values_by_station {
                if !sub.scope.matches(*station) {
                    continue;
                }
                let mut filtered = sub
                    .variables
                    .iter()
                    .filter_map(|variable| values.get(variable).map(|value| (*variable, *value)))
                    .peekable();
                if filtered.peek().is_none() {
                    continue;
                }
                let snapshot = per_app
                    .entry(sub.app)
                    .or_default()
                    .entry(*station)
                    .or_insert_with(|| StationSnapshot::new(*station, step));
                for (variable, value) in filtered {
                    snapshot.values.insert(variable, value);
                }
            }
        }

        per_app
            .into_iter()
            .map(|(app, by_station)| (app, by_station.into_values().collect()))
            .collect()
    }

    fn cancel_station_subs(&mut self, station: StationId, at_step: SimStep) -> usize {
        let doomed: Vec<SubscriptionId> = self
            .subs
            .values()
            .filter(|sub| sub.scope == SubscriptionScope::Station(station))
            .map(|sub| sub.id)
            .collect();
        for id in &doomed {
            if let Some(sub) = self.subs.remove(id) {
                warn!(
                    subscription = %id,
                    station = %station,
                    app = %sub.app,
                    "Subscription auto-cancelled, station vanished"
                );
                self.pending_notices
                    .entry(sub.app)
                    .or_default()
                    .push(SubscriptionNotice {
                        subscription: *id,
                        station,
                        at_step,
                    });
            }
        }
        doomed.len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tandem_types::{MessageId, Position, Station};

    use super::*;
    use crate::client::StubTrafficSim;

    fn make_vars(vars: &[TrafficVariable]) -> BTreeSet<TrafficVariable> {
        vars.iter().copied().collect()
    }

    fn make_mobile_table(ids: &[u32]) -> StationTable {
        let mut table = StationTable::new();
        for &id in ids {
            table.insert(Station::mobile(
                StationId::new(id),
                Position::new(f64::from(id), 0.0),
                10.0,
                90.0,
            ));
        }
        table
    }

    fn make_stub_for(table: &StationTable) -> StubTrafficSim {
        let mut stub = StubTrafficSim::new();
        for station in table.iter() {
            stub.set_variables(
                station.id,
                &[
                    (TrafficVariable::Position, VariableValue::Point(station.position)),
                    (TrafficVariable::Speed, VariableValue::Scalar(station.speed)),
                    (TrafficVariable::Heading, VariableValue::Scalar(station.heading)),
                ],
            );
        }
        stub
    }

    #[test]
    fn duplicate_subscribe_is_an_upsert() {
        let mut registry = SubscriptionRegistry::new();
        let app = AppId::new(1);
        let scope = SubscriptionScope::Station(StationId::new(4));

        let first = registry
            .subscribe(app, scope, make_vars(&[TrafficVariable::Position]), StepWindow::open_from(0))
            .unwrap();
        let second = registry
            .subscribe(app, scope, make_vars(&[TrafficVariable::Speed]), StepWindow::bounded(2, 9))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.subscription_count(), 1);
        let sub = registry.subscription(first).unwrap();
        assert_eq!(sub.variables, make_vars(&[TrafficVariable::Speed]));
        assert_eq!(sub.window, StepWindow::bounded(2, 9));
    }

    #[test]
    fn unsubscribe_requires_ownership() {
        let mut registry = SubscriptionRegistry::new();
        let owner = AppId::new(1);
        let other = AppId::new(2);
        let handle = registry
            .subscribe(
                owner,
                SubscriptionScope::All,
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();

        assert!(matches!(
            registry.unsubscribe(other, handle),
            Err(RegistryError::UnknownSubscription { .. })
        ));
        registry.unsubscribe(owner, handle).unwrap();
        assert_eq!(registry.subscription_count(), 0);
        assert!(matches!(
            registry.unsubscribe(owner, handle),
            Err(RegistryError::UnknownSubscription { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_batches_one_read_per_station() {
        let table = make_mobile_table(&[7]);
        let mut traffic = make_stub_for(&table);
        let mut registry = SubscriptionRegistry::new();

        let reader = AppId::new(1);
        let watcher = AppId::new(2);
        let _ = registry
            .subscribe(
                reader,
                SubscriptionScope::Station(StationId::new(7)),
                make_vars(&[TrafficVariable::Position, TrafficVariable::Speed]),
                StepWindow::open_from(0),
            )
            .unwrap();
        let _ = registry
            .subscribe(
                watcher,
                SubscriptionScope::All,
                make_vars(&[TrafficVariable::Heading]),
                StepWindow::open_from(0),
            )
            .unwrap();

        let resolved = registry.resolve_step(3, &table, &mut traffic).await.unwrap();

        // one read carrying the union of both variable sets
        assert_eq!(
            traffic.reads,
            vec![(
                StationId::new(7),
                vec![
                    TrafficVariable::Position,
                    TrafficVariable::Speed,
                    TrafficVariable::Heading
                ]
            )]
        );

        let reader_snaps = resolved.snapshots.get(&reader).unwrap();
        assert_eq!(reader_snaps.len(), 1);
        let snap = reader_snaps.first().unwrap();
        assert_eq!(snap.step, 3);
        assert_eq!(snap.values.len(), 2);
        assert!(snap.values.contains_key(&TrafficVariable::Position));

        let watcher_snaps = resolved.snapshots.get(&watcher).unwrap();
        assert_eq!(watcher_snaps.first().map(|s| s.values.len()), Some(1));
    }

    #[tokio::test]
    async fn churn_before_resolve_leaves_no_residual() {
        let table = make_mobile_table(&[1]);
        let mut traffic = make_stub_for(&table);
        let mut registry = SubscriptionRegistry::new();
        let app = AppId::new(1);

        let handle = registry
            .subscribe(
                app,
                SubscriptionScope::Station(StationId::new(1)),
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();
        registry.unsubscribe(app, handle).unwrap();

        let resolved = registry.resolve_step(1, &table, &mut traffic).await.unwrap();
        assert!(resolved.snapshots.is_empty());
        assert!(resolved.notices.is_empty());
        assert!(traffic.reads.is_empty());
    }

    #[tokio::test]
    async fn window_gates_reads() {
        let table = make_mobile_table(&[1]);
        let mut traffic = make_stub_for(&table);
        let mut registry = SubscriptionRegistry::new();

        let _ = registry
            .subscribe(
                AppId::new(1),
                SubscriptionScope::Station(StationId::new(1)),
                make_vars(&[TrafficVariable::Position]),
                StepWindow::bounded(5, 6),
            )
            .unwrap();

        let early = registry.resolve_step(4, &table, &mut traffic).await.unwrap();
        assert!(early.snapshots.is_empty());
        let late = registry.resolve_step(7, &table, &mut traffic).await.unwrap();
        assert!(late.snapshots.is_empty());
        assert!(traffic.reads.is_empty());

        let covered = registry.resolve_step(5, &table, &mut traffic).await.unwrap();
        assert_eq!(covered.snapshots.len(), 1);
    }

    #[tokio::test]
    async fn vanished_station_notifies_exactly_once() {
        let table = make_mobile_table(&[2]);
        let mut traffic = make_stub_for(&table);
        let mut registry = SubscriptionRegistry::new();
        let app = AppId::new(1);
        let gone = StationId::new(9);

        let handle = registry
            .subscribe(
                app,
                SubscriptionScope::Station(gone),
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();

        assert_eq!(registry.station_vanished(gone, 4), 1);
        assert_eq!(registry.subscription_count(), 0);

        let first = registry.resolve_step(4, &table, &mut traffic).await.unwrap();
        let notices = first.notices.get(&app).unwrap();
        assert_eq!(
            notices.as_slice(),
            &[SubscriptionNotice {
                subscription: handle,
                station: gone,
                at_step: 4
            }]
        );

        let second = registry.resolve_step(5, &table, &mut traffic).await.unwrap();
        assert!(second.notices.is_empty());
    }

    #[tokio::test]
    async fn mid_resolve_unknown_station_is_treated_as_vanish() {
        let mut table = make_mobile_table(&[3]);
        // table still lists the station, but the simulator no longer knows it
        let mut traffic = StubTrafficSim::new();
        traffic.unknown_stations.insert(StationId::new(3));
        let mut registry = SubscriptionRegistry::new();
        let app = AppId::new(1);

        let _ = registry
            .subscribe(
                app,
                SubscriptionScope::Station(StationId::new(3)),
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();

        let resolved = registry.resolve_step(2, &table, &mut traffic).await.unwrap();
        assert!(resolved.snapshots.is_empty());
        assert_eq!(resolved.notices.get(&app).map(Vec::len), Some(1));
        assert_eq!(registry.subscription_count(), 0);

        // the next step the station is gone from the table as well
        let _ = table.remove(StationId::new(3));
        let after = registry.resolve_step(3, &table, &mut traffic).await.unwrap();
        assert!(after.notices.is_empty());
    }

    #[tokio::test]
    async fn fixed_station_is_served_without_a_read() {
        let mut table = StationTable::new();
        table.insert(Station::fixed(StationId::new(900), Position::new(40.0, 60.0)));
        let mut traffic = StubTrafficSim::new();
        let mut registry = SubscriptionRegistry::new();
        let app = AppId::new(1);

        let _ = registry
            .subscribe(
                app,
                SubscriptionScope::Station(StationId::new(900)),
                make_vars(&[TrafficVariable::Position, TrafficVariable::Speed]),
                StepWindow::open_from(0),
            )
            .unwrap();

        let resolved = registry.resolve_step(1, &table, &mut traffic).await.unwrap();
        assert!(traffic.reads.is_empty());
        let snap = resolved
            .snapshots
            .get(&app)
            .and_then(|snaps| snaps.first())
            .unwrap();
        assert_eq!(snap.position(), Some(Position::new(40.0, 60.0)));
    }

    #[tokio::test]
    async fn fatal_read_error_propagates() {
        let table = make_mobile_table(&[1]);
        let mut traffic = make_stub_for(&table);
        traffic.read_failure = Some(SimError::Connection {
            detail: "reset by peer".to_owned(),
        });
        let mut registry = SubscriptionRegistry::new();

        let _ = registry
            .subscribe(
                AppId::new(1),
                SubscriptionScope::Station(StationId::new(1)),
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();

        let result = registry.resolve_step(1, &table, &mut traffic).await;
        assert!(matches!(result, Err(SimError::Connection { .. })));
    }

    #[test]
    fn receptions_route_once_per_app() {
        let mut registry = SubscriptionRegistry::new();
        let app = AppId::new(1);
        let bystander = AppId::new(2);
        let recipient = StationId::new(5);

        // two matching subscriptions for the same app: All and the exact station
        let _ = registry
            .subscribe(
                app,
                SubscriptionScope::All,
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();
        let _ = registry
            .subscribe(
                app,
                SubscriptionScope::Station(recipient),
                make_vars(&[TrafficVariable::Speed]),
                StepWindow::open_from(0),
            )
            .unwrap();
        // bystander watches a different station
        let _ = registry
            .subscribe(
                bystander,
                SubscriptionScope::Station(StationId::new(8)),
                make_vars(&[TrafficVariable::Position]),
                StepWindow::open_from(0),
            )
            .unwrap();

        let receptions = vec![Reception {
            recipient,
            message_id: MessageId::new(3),
            payload: vec![0xFE],
        }];
        let routed = registry.route_receptions(2, &receptions);

        assert_eq!(routed.get(&app).map(Vec::len), Some(1));
        assert!(!routed.contains_key(&bystander));
    }
}
