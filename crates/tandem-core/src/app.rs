//! Application plug-in surface.
//!
//! Applications run in-process and are dispatched exactly once per
//! step, after reconciliation and message evaluation, with everything
//! they are entitled to see bundled in a [`StepInput`]. They act back
//! on the controller through [`StepActions`], a facade over the tracker
//! and the registry that pins the caller's identity: an application can
//! only subscribe as itself and only emit from its host station.

use std::collections::BTreeMap;

use tandem_types::{
    AppId, GeoArea, MessageId, Reception, SimStep, StationId, StationSnapshot, StepWindow,
    SubscriptionId, SubscriptionNotice, SubscriptionScope, TrafficVariable,
};

use crate::registry::{RegistryError, SubscriptionRegistry};
use crate::stations::StationTable;
use crate::tracker::{GeobroadcastTracker, TrackerError};

/// Errors surfaced by application dispatch.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A message action was refused by the tracker.
    #[error("message tracking failed: {source}")]
    Tracker {
        /// Underlying tracker error.
        #[from]
        source: TrackerError,
    },

    /// A subscription action was refused by the registry.
    #[error("subscription handling failed: {source}")]
    Registry {
        /// Underlying registry error.
        #[from]
        source: RegistryError,
    },

    /// The application itself failed.
    #[error("application failure: {message}")]
    Internal {
        /// Human-readable description of the failure.
        message: String,
    },
}

/// Everything pushed to one application for one step.
#[derive(Debug, Clone, Default)]
pub struct StepInput {
    /// The step being dispatched.
    pub step: SimStep,
    /// Snapshots resolved from this application's subscriptions.
    pub snapshots: Vec<StationSnapshot>,
    /// Receptions routed to this application this step.
    pub receptions: Vec<Reception>,
    /// Auto-cancellation notices for subscriptions that lost their
    /// station.
    pub notices: Vec<SubscriptionNotice>,
}

/// Control surface handed to an application during its dispatch.
///
/// Borrows tracker and registry for the duration of the `on_step` call;
/// every action is applied immediately and attributed to the dispatched
/// application and its host station.
pub struct StepActions<'a> {
    step: SimStep,
    app: AppId,
    host: StationId,
    tracker: &'a mut GeobroadcastTracker,
    registry: &'a mut SubscriptionRegistry,
    stations: &'a StationTable,
}

impl<'a> StepActions<'a> {
    pub(crate) const fn new(
        step: SimStep,
        app: AppId,
        host: StationId,
        tracker: &'a mut GeobroadcastTracker,
        registry: &'a mut SubscriptionRegistry,
        stations: &'a StationTable,
    ) -> Self {
        Self {
            step,
            app,
            host,
            tracker,
            registry,
            stations,
        }
    }

    /// Issue a geobroadcast from this application's host station.
    ///
    /// Stations currently inside the area are queued for delivery in
    /// the same step; the message then joins the per-step re-evaluation
    /// until its TTL runs out.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Tracker`] for degenerate geometry or an
    /// exhausted id space.
    pub fn emit_message(
        &mut self,
        area: GeoArea,
        payload: Vec<u8>,
        ttl_steps: u32,
    ) -> Result<MessageId, AppError> {
        let id = self
            .tracker
            .issue(self.host, area, payload, ttl_steps, self.step, self.stations)?;
        Ok(id)
    }

    /// Cancel one of this run's open geobroadcasts.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Tracker`] if the message is not open.
    pub fn cancel_message(&mut self, message: MessageId) -> Result<(), AppError> {
        self.tracker.cancel(message, self.step)?;
        Ok(())
    }

    /// Subscribe this application to traffic variables.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Registry`] if the handle space is exhausted.
    pub fn subscribe(
        &mut self,
        scope: SubscriptionScope,
        variables: &[TrafficVariable],
        window: StepWindow,
    ) -> Result<SubscriptionId, AppError> {
        let id = self.registry.subscribe(
            self.app,
            scope,
            variables.iter().copied().collect(),
            window,
        )?;
        Ok(id)
    }

    /// Drop one of this application's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Registry`] if the handle is unknown or
    /// belongs to another application.
    pub fn unsubscribe(&mut self, handle: SubscriptionId) -> Result<(), AppError> {
        self.registry.unsubscribe(self.app, handle)?;
        Ok(())
    }

    /// The step being dispatched.
    #[must_use]
    pub const fn step(&self) -> SimStep {
        self.step
    }

    /// The station this application is installed on.
    #[must_use]
    pub const fn host(&self) -> StationId {
        self.host
    }
}

/// An in-process application dispatched once per simulation step.
pub trait Application: Send {
    /// Short name for log fields.
    fn name(&self) -> &str;

    /// Handle one step: consume the pushed input, act through
    /// `actions`.
    ///
    /// # Errors
    ///
    /// An error is logged by the scheduler and does not stop the run;
    /// the application stays registered and is dispatched again next
    /// step.
    fn on_step(&mut self, input: &StepInput, actions: &mut StepActions<'_>)
        -> Result<(), AppError>;
}

/// One scripted broadcast for [`StubApplication`].
#[derive(Debug, Clone)]
pub struct PlannedEmission {
    /// Dissemination area.
    pub area: GeoArea,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Steps the broadcast stays eligible for delivery.
    pub ttl_steps: u32,
}

/// Scripted application for tests: records every input it is
/// dispatched and emits pre-programmed broadcasts at given steps.
#[derive(Debug, Default)]
pub struct StubApplication {
    /// Inputs seen so far, in dispatch order.
    pub inputs: Vec<StepInput>,
    /// Broadcasts to emit, keyed by step.
    pub emissions: BTreeMap<SimStep, PlannedEmission>,
    /// Ids of the broadcasts emitted so far, in order.
    pub emitted: Vec<MessageId>,
}

impl StubApplication {
    /// Stub with no scripted emissions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a broadcast to be emitted when `step` is dispatched.
    pub fn emit_at(&mut self, step: SimStep, area: GeoArea, payload: Vec<u8>, ttl_steps: u32) {
        self.emissions.insert(
            step,
            PlannedEmission {
                area,
                payload,
                ttl_steps,
            },
        );
    }
}

impl Application for StubApplication {
    fn name(&self) -> &str {
        "stub"
    }

    fn on_step(
        &mut self,
        input: &StepInput,
        actions: &mut StepActions<'_>,
    ) -> Result<(), AppError> {
        self.inputs.push(input.clone());
        if let Some(planned) = self.emissions.get(&input.step) {
            let id = actions.emit_message(
                planned.area.clone(),
                planned.payload.clone(),
                planned.ttl_steps,
            )?;
            self.emitted.push(id);
        }
        Ok(())
    }
}
