//! Geobroadcast tracker: message lifecycle and candidate resolution.
//!
//! The tracker owns every [`BroadcastMessage`] from issue until expiry
//! or cancellation. Each step it re-evaluates the open messages against
//! current station positions and produces send orders for stations that
//! are inside the dissemination area and have not been delivered to
//! yet. Geometric candidacy here and physical delivery in the network
//! simulator are separate stages: an order only turns into a
//! `delivered_to` entry once the scheduler reports the network layer's
//! acknowledgement back via [`record_sent`].
//!
//! Closed messages leave only their id behind, kept in a bounded
//! recently-closed set for a configured number of steps so that late
//! receptions can be told apart from receptions for ids the run never
//! issued.
//!
//! [`record_sent`]: GeobroadcastTracker::record_sent

use std::collections::{BTreeMap, BTreeSet};

use tandem_types::{
    AreaError, BroadcastMessage, GeoArea, MessageId, MessageState, SimStep, StationId,
};
use tracing::debug;

use crate::stations::StationTable;

/// Errors from tracker operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The dissemination area failed validation; the message was never
    /// tracked. Raised synchronously at issue time.
    #[error("invalid dissemination area: {source}")]
    InvalidArea {
        /// The geometric defect.
        #[from]
        source: AreaError,
    },

    /// No open message with this id.
    #[error("message {message} is not active")]
    UnknownMessage {
        /// The id that was referenced.
        message: MessageId,
    },

    /// The per-run message id space is exhausted.
    #[error("message id space exhausted")]
    IdExhausted,
}

/// One candidate delivery for the scheduler to hand to the network
/// simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOrder {
    /// The message to deliver.
    pub message: MessageId,
    /// Station the message originates from.
    pub sender: StationId,
    /// Candidate recipient, inside the area at evaluation time.
    pub recipient: StationId,
}

/// How a drained reception relates to tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionClass {
    /// Belongs to an open message; dispatch it to applications.
    Active,
    /// Belongs to a recently closed message; a harmless late duplicate
    /// that must not resurrect the message.
    Late,
    /// No record of the message id at all.
    Unknown,
}

/// Terminal bookkeeping for a closed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClosedRecord {
    state: MessageState,
    closed_at: SimStep,
}

/// Tracker state: open messages, the recently-closed id set, and the
/// send orders queued by dispatch-time issues.
#[derive(Debug)]
pub struct GeobroadcastTracker {
    next_id: u32,
    /// Open messages (`Issued` or `Active`), keyed by id.
    open: BTreeMap<MessageId, BroadcastMessage>,
    /// Ids of closed messages, pruned after `retention_steps`.
    closed: BTreeMap<MessageId, ClosedRecord>,
    /// Steps a closed id stays classifiable after closing.
    retention_steps: u64,
    /// Issue-time send orders awaiting the post-dispatch flush.
    pending: Vec<SendOrder>,
}

impl GeobroadcastTracker {
    /// Tracker with an empty message table. A message closed at step
    /// `c` stays classifiable through step `c + retention_steps`.
    #[must_use]
    pub const fn new(retention_steps: u64) -> Self {
        Self {
            next_id: 1,
            open: BTreeMap::new(),
            closed: BTreeMap::new(),
            retention_steps,
            pending: Vec::new(),
        }
    }

    /// Issue a new geobroadcast.
    ///
    /// The area is validated synchronously; invalid geometry never
    /// enters the message table. On success the message id is assigned,
    /// candidates inside the area are queued as issue-time send orders
    /// (collected by [`take_pending`]), and the message joins the
    /// per-step re-evaluation from the next step. A zero-TTL message is
    /// assigned an id but closes immediately without any send.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidArea`] for degenerate geometry
    /// and [`TrackerError::IdExhausted`] if the id counter overflows.
    ///
    /// [`take_pending`]: GeobroadcastTracker::take_pending
    pub fn issue(
        &mut self,
        sender: StationId,
        area: GeoArea,
        payload: Vec<u8>,
        ttl_steps: u32,
        issued_at: SimStep,
        stations: &StationTable,
    ) -> Result<MessageId, TrackerError> {
        area.validate()?;

        let id = MessageId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(TrackerError::IdExhausted)?;

        let message = BroadcastMessage {
            id,
            sender,
            area,
            payload,
            issued_at,
            ttl_steps,
            delivered_to: BTreeSet::new(),
            state: MessageState::Issued,
        };

        if !message.window_covers(issued_at) {
            self.closed.insert(
                id,
                ClosedRecord {
                    state: MessageState::Expired,
                    closed_at: issued_at,
                },
            );
            debug!(message = %id, step = issued_at, "Zero-ttl message expired at issue");
            return Ok(id);
        }

        let mut candidates = 0_usize;
        for station in stations.iter() {
            if message.area.contains(station.position) {
                self.pending.push(SendOrder {
                    message: id,
                    sender,
                    recipient: station.id,
                });
                candidates = candidates.saturating_add(1);
            }
        }
        debug!(
            message = %id,
            sender = %sender,
            step = issued_at,
            ttl = ttl_steps,
            candidates,
            "Geobroadcast issued"
        );
        self.open.insert(id, message);
        Ok(id)
    }

    /// Re-evaluate open messages for `step`.
    ///
    /// Messages whose TTL window no longer covers `step` are expired
    /// first and produce nothing. For the rest, every station inside
    /// the area that is not yet in `delivered_to` becomes a send order.
    /// Newly issued messages are promoted `Issued -> Active` on their
    /// first evaluation. The recently-closed set is pruned afterwards.
    pub fn evaluate_step(&mut self, step: SimStep, stations: &StationTable) -> Vec<SendOrder> {
        let mut orders = Vec::new();
        let mut expired = Vec::new();

        for (id, message) in &mut self.open {
            if !message.window_covers(step) {
                expired.push(*id);
                continue;
            }
            if message.state == MessageState::Issued {
                message.state = MessageState::Active;
            }
            for station in stations.iter() {
                if message.delivered_to.contains(&station.id) {
                    continue;
                }
                if message.area.contains(station.position) {
                    orders.push(SendOrder {
                        message: *id,
                        sender: message.sender,
                        recipient: station.id,
                    });
                }
            }
        }

        for id in expired {
            self.close(id, MessageState::Expired, step);
        }
        self.prune_closed(step);
        orders
    }

    /// Record the network layer's acknowledgement of a send. Returns
    /// `false` if the message is no longer open or the station was
    /// already delivered to (the at-most-once guard).
    pub fn record_sent(&mut self, message: MessageId, recipient: StationId) -> bool {
        let Some(open) = self.open.get_mut(&message) else {
            return false;
        };
        open.delivered_to.insert(recipient)
    }

    /// Cancel an open message.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::UnknownMessage`] if no open message has
    /// this id (closed ids cannot be resurrected or re-cancelled).
    pub fn cancel(&mut self, message: MessageId, step: SimStep) -> Result<(), TrackerError> {
        if !self.open.contains_key(&message) {
            return Err(TrackerError::UnknownMessage { message });
        }
        self.close(message, MessageState::Cancelled, step);
        Ok(())
    }

    /// Classify a drained reception by message id.
    #[must_use]
    pub fn classify_reception(&self, message: MessageId) -> ReceptionClass {
        if self.open.contains_key(&message) {
            ReceptionClass::Active
        } else if self.closed.contains_key(&message) {
            ReceptionClass::Late
        } else {
            ReceptionClass::Unknown
        }
    }

    /// Take the issue-time send orders queued since the last call.
    pub fn take_pending(&mut self) -> Vec<SendOrder> {
        std::mem::take(&mut self.pending)
    }

    /// Payload of an open message.
    #[must_use]
    pub fn payload(&self, message: MessageId) -> Option<&[u8]> {
        self.open.get(&message).map(|m| m.payload.as_slice())
    }

    /// Read access to an open message.
    #[must_use]
    pub fn open_message(&self, message: MessageId) -> Option<&BroadcastMessage> {
        self.open.get(&message)
    }

    /// Terminal state of a recently closed message, while retained.
    #[must_use]
    pub fn closed_state(&self, message: MessageId) -> Option<MessageState> {
        self.closed.get(&message).map(|record| record.state)
    }

    /// Number of open messages.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn close(&mut self, id: MessageId, state: MessageState, step: SimStep) {
        if self.open.remove(&id).is_some() {
            self.closed.insert(
                id,
                ClosedRecord {
                    state,
                    closed_at: step,
                },
            );
            debug!(message = %id, state = ?state, step, "Message closed");
        }
    }

    fn prune_closed(&mut self, step: SimStep) {
        let retention = self.retention_steps;
        self.closed
            .retain(|_, record| step.saturating_sub(record.closed_at) <= retention);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tandem_types::{Position, Station};

    use super::*;

    fn circle(radius: f64) -> GeoArea {
        GeoArea::Circle {
            center: Position::new(0.0, 0.0),
            radius,
        }
    }

    fn make_table(positions: &[(u32, f64, f64)]) -> StationTable {
        let mut table = StationTable::new();
        for &(id, x, y) in positions {
            table.insert(Station::mobile(
                StationId::new(id),
                Position::new(x, y),
                10.0,
                0.0,
            ));
        }
        table
    }

    fn make_tracker() -> GeobroadcastTracker {
        GeobroadcastTracker::new(2)
    }

    #[test]
    fn invalid_area_is_rejected_at_issue() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 0.0, 0.0)]);
        let result = tracker.issue(
            StationId::new(900),
            circle(0.0),
            vec![1],
            3,
            5,
            &table,
        );
        assert!(matches!(result, Err(TrackerError::InvalidArea { .. })));
        assert_eq!(tracker.open_count(), 0);
        assert!(tracker.take_pending().is_empty());
    }

    #[test]
    fn issue_queues_candidates_inside_area() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 5.0, 0.0), (2, 20.0, 0.0), (3, 0.0, 10.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![0xAA], 2, 10, &table)
            .unwrap();

        let pending = tracker.take_pending();
        let recipients: Vec<_> = pending.iter().map(|o| o.recipient).collect();
        // boundary (0, 10) counts as inside; (20, 0) does not
        assert_eq!(recipients, vec![StationId::new(1), StationId::new(3)]);
        assert!(pending.iter().all(|o| o.message == id));
        assert!(tracker.take_pending().is_empty());
        assert_eq!(
            tracker.open_message(id).map(|m| m.state),
            Some(MessageState::Issued)
        );
    }

    #[test]
    fn message_ids_are_monotonic() {
        let mut tracker = make_tracker();
        let table = make_table(&[]);
        let first = tracker
            .issue(StationId::new(1), circle(10.0), vec![], 1, 0, &table)
            .unwrap();
        let second = tracker
            .issue(StationId::new(1), circle(10.0), vec![], 1, 0, &table)
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn acked_station_is_not_resent() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 5.0, 0.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![], 3, 5, &table)
            .unwrap();
        let _ = tracker.take_pending();

        assert!(tracker.record_sent(id, StationId::new(1)));
        // second ack for the same station is refused
        assert!(!tracker.record_sent(id, StationId::new(1)));

        // station 1 stays inside but is already delivered to
        let orders = tracker.evaluate_step(6, &table);
        assert!(orders.is_empty());
        assert_eq!(
            tracker.open_message(id).map(|m| m.state),
            Some(MessageState::Active)
        );
    }

    #[test]
    fn newly_covered_station_gets_an_order() {
        let mut tracker = make_tracker();
        let mut table = make_table(&[(1, 5.0, 0.0), (2, 50.0, 0.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![], 5, 0, &table)
            .unwrap();
        let _ = tracker.take_pending();
        assert!(tracker.record_sent(id, StationId::new(1)));

        // station 2 drives into the area
        assert!(table.update_mobility(StationId::new(2), Position::new(8.0, 0.0), 10.0, 270.0));
        let orders = tracker.evaluate_step(1, &table);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders.first().map(|o| o.recipient), Some(StationId::new(2)));
    }

    #[test]
    fn expiry_window_and_retention() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 5.0, 0.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![], 3, 5, &table)
            .unwrap();
        let _ = tracker.take_pending();

        // active for steps 5, 6, 7
        assert!(!tracker.evaluate_step(6, &table).is_empty());
        assert!(!tracker.evaluate_step(7, &table).is_empty());

        // expired at 8: no orders, id moves to the closed set
        assert!(tracker.evaluate_step(8, &table).is_empty());
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.closed_state(id), Some(MessageState::Expired));
        assert_eq!(tracker.classify_reception(id), ReceptionClass::Late);

        // retention is 2 steps: classifiable through step 10, gone at 11
        let _ = tracker.evaluate_step(10, &table);
        assert_eq!(tracker.classify_reception(id), ReceptionClass::Late);
        let _ = tracker.evaluate_step(11, &table);
        assert_eq!(tracker.classify_reception(id), ReceptionClass::Unknown);
    }

    #[test]
    fn cancel_closes_and_stops_sends() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 5.0, 0.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![], 10, 0, &table)
            .unwrap();
        let _ = tracker.take_pending();

        tracker.cancel(id, 1).unwrap();
        assert_eq!(tracker.closed_state(id), Some(MessageState::Cancelled));
        assert!(tracker.evaluate_step(1, &table).is_empty());

        // a closed message cannot be cancelled again
        assert!(matches!(
            tracker.cancel(id, 2),
            Err(TrackerError::UnknownMessage { .. })
        ));
    }

    #[test]
    fn zero_ttl_expires_without_sends() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 0.0, 0.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![], 0, 5, &table)
            .unwrap();
        assert!(tracker.take_pending().is_empty());
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.closed_state(id), Some(MessageState::Expired));
    }

    #[test]
    fn unknown_reception_classification() {
        let tracker = make_tracker();
        assert_eq!(
            tracker.classify_reception(MessageId::new(77)),
            ReceptionClass::Unknown
        );
    }

    #[test]
    fn ack_for_closed_message_is_refused() {
        let mut tracker = make_tracker();
        let table = make_table(&[(1, 5.0, 0.0)]);
        let id = tracker
            .issue(StationId::new(900), circle(10.0), vec![], 1, 0, &table)
            .unwrap();
        let _ = tracker.take_pending();
        let _ = tracker.evaluate_step(1, &table); // expires here
        assert!(!tracker.record_sent(id, StationId::new(1)));
    }
}
