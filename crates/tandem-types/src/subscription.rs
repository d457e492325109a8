//! Subscriptions connecting applications to station data.
//!
//! An application subscribes to a variable set for one station or for
//! all stations, bounded by a step window. The registry enforces at
//! most one subscription per (application, scope); re-subscribing
//! replaces the variable set and window in place.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::SimStep;
use crate::ids::{AppId, StationId, SubscriptionId};
use crate::station::TrafficVariable;

/// Which stations a subscription targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriptionScope {
    /// Every station present in a given step.
    All,
    /// Exactly one station; auto-cancelled when it vanishes.
    Station(StationId),
}

impl SubscriptionScope {
    /// Whether the scope covers `station`.
    #[must_use]
    pub fn matches(self, station: StationId) -> bool {
        match self {
            Self::All => true,
            Self::Station(target) => target == station,
        }
    }
}

/// Inclusive step window a subscription is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepWindow {
    /// First step the subscription applies to.
    pub from: SimStep,
    /// Last step the subscription applies to; `None` means open-ended.
    pub until: Option<SimStep>,
}

impl StepWindow {
    /// Window starting at `from` with no end.
    #[must_use]
    pub const fn open_from(from: SimStep) -> Self {
        Self { from, until: None }
    }

    /// Window covering `from..=until`.
    #[must_use]
    pub const fn bounded(from: SimStep, until: SimStep) -> Self {
        Self {
            from,
            until: Some(until),
        }
    }

    /// Whether `step` falls inside the window.
    #[must_use]
    pub const fn covers(&self, step: SimStep) -> bool {
        if step < self.from {
            return false;
        }
        match self.until {
            Some(until) => step <= until,
            None => true,
        }
    }
}

/// One active subscription as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Handle returned to the subscribing application.
    pub id: SubscriptionId,
    /// Owning application.
    pub app: AppId,
    /// Target scope (one station or all).
    pub scope: SubscriptionScope,
    /// Variables to read each covered step.
    pub variables: BTreeSet<TrafficVariable>,
    /// Steps the subscription is valid for.
    pub window: StepWindow,
}

/// One-shot notice that a subscription was auto-cancelled because its
/// target station vanished from the traffic simulation.
///
/// Delivered to the owning application in the next dispatch, exactly
/// once; the subscription is already gone when the notice arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionNotice {
    /// The cancelled subscription's handle.
    pub subscription: SubscriptionId,
    /// The station that vanished.
    pub station: StationId,
    /// Step at which the cancellation happened.
    pub at_step: SimStep,
}
