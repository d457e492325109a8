//! Geobroadcast messages and their delivery bookkeeping.
//!
//! A [`BroadcastMessage`] is owned exclusively by the geobroadcast
//! tracker from issue until expiry or cancellation. Applications only
//! ever see its id and, on reception, its payload.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::SimStep;
use crate::geometry::GeoArea;
use crate::ids::{MessageId, StationId};

/// Lifecycle state of a broadcast message.
///
/// `Issued -> Active -> {Expired, Cancelled}`. A message is `Issued`
/// between its dispatch-time creation and the first scheduler pass that
/// promotes it; `Active` while eligible for sends; terminal states are
/// kept only in the tracker's bounded recently-closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    /// Created this step; joins re-evaluation from the next step.
    Issued,
    /// Eligible for candidate sends.
    Active,
    /// TTL elapsed; no further sends.
    Expired,
    /// Explicitly cancelled by the issuing application.
    Cancelled,
}

/// A geobroadcast message tracked across steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Monotonically assigned identifier, unique per run.
    pub id: MessageId,
    /// Station the message originates from (the issuing application's
    /// host station).
    pub sender: StationId,
    /// Dissemination area; immutable once attached.
    pub area: GeoArea,
    /// Opaque payload bytes; the controller never interprets them.
    pub payload: Vec<u8>,
    /// Step the message was issued at; the first step of its TTL window.
    pub issued_at: SimStep,
    /// Number of steps the message stays eligible for delivery.
    pub ttl_steps: u32,
    /// Stations a send has been acknowledged for; at most one entry per
    /// station across the whole Active lifetime.
    pub delivered_to: BTreeSet<StationId>,
    /// Current lifecycle state.
    pub state: MessageState,
}

impl BroadcastMessage {
    /// First step at which the message is expired.
    ///
    /// A message issued at step 5 with `ttl_steps` 3 covers steps 5, 6
    /// and 7 and is expired from step 8 on.
    #[must_use]
    pub fn expires_at(&self) -> SimStep {
        self.issued_at.saturating_add(SimStep::from(self.ttl_steps))
    }

    /// Whether `step` falls inside the TTL window.
    #[must_use]
    pub fn window_covers(&self, step: SimStep) -> bool {
        step >= self.issued_at && step < self.expires_at()
    }

    /// Whether the message is in a terminal state.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, MessageState::Expired | MessageState::Cancelled)
    }
}

/// A message the network simulator reports as physically received.
///
/// Drained once per step from the network process; geometric candidacy
/// happened earlier and separately, so a reception is always the
/// physical-layer outcome for a candidate the controller sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reception {
    /// Station that received the message.
    pub recipient: StationId,
    /// Id of the received message.
    pub message_id: MessageId,
    /// Payload as carried by the network simulator.
    pub payload: Vec<u8>,
}
