//! Zone-alert demo application.
//!
//! A small built-in application exercising the full dispatch surface:
//! it subscribes to every station's position, geobroadcasts a JSON
//! alert around a configured point on a fixed period, and logs when
//! one of its own alerts comes back as a delivered reception.

use std::collections::VecDeque;

use serde::Serialize;
use tandem_core::app::{AppError, Application, StepActions, StepInput};
use tandem_core::config::DemoAppConfig;
use tandem_types::{
    GeoArea, MessageId, Position, SimStep, StepWindow, SubscriptionScope, TrafficVariable,
};
use tracing::{debug, info};

/// Alert ids kept for delivery confirmation; older alerts are closed
/// by then and their receptions never reach the application anyway.
const SENT_MEMORY: usize = 32;

/// Payload carried by every alert, serialized as JSON.
#[derive(Debug, Serialize)]
struct AlertPayload {
    /// Discriminator for consumers seeing multiple message kinds.
    kind: &'static str,
    /// Step the alert was issued at.
    step: SimStep,
    /// Alert zone center, east-west meters.
    center_x: f64,
    /// Alert zone center, north-south meters.
    center_y: f64,
    /// Alert zone radius in meters.
    radius: f64,
}

/// Application that periodically geobroadcasts an alert zone.
pub struct ZoneAlertApp {
    center: Position,
    radius: f64,
    ttl_steps: u32,
    period_steps: u64,
    subscribed: bool,
    next_alert: Option<SimStep>,
    sent: VecDeque<MessageId>,
}

impl ZoneAlertApp {
    /// Build the application from its config section.
    #[must_use]
    pub fn new(config: &DemoAppConfig) -> Self {
        Self {
            center: Position::new(config.center_x, config.center_y),
            radius: config.radius,
            ttl_steps: config.ttl_steps,
            // a zero period degenerates to an alert every step
            period_steps: config.period_steps.max(1),
            subscribed: false,
            next_alert: None,
            sent: VecDeque::new(),
        }
    }
}

impl Application for ZoneAlertApp {
    fn name(&self) -> &str {
        "zone-alert"
    }

    fn on_step(
        &mut self,
        input: &StepInput,
        actions: &mut StepActions<'_>,
    ) -> Result<(), AppError> {
        if !self.subscribed {
            actions.subscribe(
                SubscriptionScope::All,
                &[TrafficVariable::Position],
                StepWindow::open_from(input.step),
            )?;
            self.subscribed = true;
        }

        for reception in &input.receptions {
            if self.sent.contains(&reception.message_id) {
                debug!(
                    step = input.step,
                    recipient = %reception.recipient,
                    message = %reception.message_id,
                    "Zone alert delivery confirmed"
                );
            }
        }

        if self.next_alert.is_some_and(|due| input.step < due) {
            return Ok(());
        }

        let payload = AlertPayload {
            kind: "zone-alert",
            step: input.step,
            center_x: self.center.x,
            center_y: self.center.y,
            radius: self.radius,
        };
        let bytes = serde_json::to_vec(&payload).map_err(|err| AppError::Internal {
            message: format!("alert payload serialization failed: {err}"),
        })?;
        let area = GeoArea::Circle {
            center: self.center,
            radius: self.radius,
        };
        let message = actions.emit_message(area, bytes, self.ttl_steps)?;
        self.sent.push_back(message);
        if self.sent.len() > SENT_MEMORY {
            self.sent.pop_front();
        }
        self.next_alert = Some(input.step.saturating_add(self.period_steps));
        info!(
            step = input.step,
            message = %message,
            stations_seen = input.snapshots.len(),
            "Zone alert issued"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use tandem_core::client::{StepDelta, StubNetworkSim, StubTrafficSim};
    use tandem_core::config::{ControllerConfig, DemoAppConfig, FixedStationConfig, TrackerConfig};
    use tandem_core::scheduler::{self, ControllerState};
    use tandem_types::{StationId, VariableValue};

    use super::*;

    fn make_config(period_steps: u64, ttl_steps: u32) -> ControllerConfig {
        ControllerConfig {
            tracker: TrackerConfig {
                closed_retention_steps: 2,
            },
            fixed_stations: vec![FixedStationConfig {
                id: 900,
                x: 0.0,
                y: 0.0,
                technologies: vec!["its-g5".to_owned()],
            }],
            demo_app: DemoAppConfig {
                enabled: true,
                host_station: 900,
                center_x: 0.0,
                center_y: 0.0,
                radius: 100.0,
                ttl_steps,
                period_steps,
            },
            ..ControllerConfig::default()
        }
    }

    fn make_state(config: &ControllerConfig) -> ControllerState {
        let mut state = ControllerState::new(config).unwrap();
        state.register_app(
            StationId::new(config.demo_app.host_station),
            Box::new(ZoneAlertApp::new(&config.demo_app)),
        );
        state
    }

    async fn drive(
        state: &mut ControllerState,
        traffic: &mut StubTrafficSim,
        network: &mut StubNetworkSim,
        steps: u64,
    ) {
        for _ in 0..steps {
            scheduler::run_step(state, traffic, network).await.unwrap();
            state.clock.advance().unwrap();
        }
    }

    #[tokio::test]
    async fn alert_fires_on_the_configured_period() {
        let config = make_config(2, 1);
        let mut state = make_state(&config);
        let mut traffic = StubTrafficSim::new();
        let mut network = StubNetworkSim::new();

        drive(&mut state, &mut traffic, &mut network, 5).await;

        // alerts at steps 0, 2 and 4, each one delivered to the host
        // roadside unit at the zone center
        assert_eq!(network.sends.len(), 3);
        assert!(network.sends.iter().all(|&(sender, recipient, _)| {
            sender == StationId::new(900) && recipient == StationId::new(900)
        }));
        assert_eq!(state.registry.subscription_count(), 1);
    }

    #[tokio::test]
    async fn alert_reaches_only_stations_inside_the_zone() {
        let config = make_config(10, 3);
        let mut state = make_state(&config);
        let mut network = StubNetworkSim::new();

        let mut traffic = StubTrafficSim::new();
        traffic.push_advance(Ok(StepDelta {
            appeared: vec![StationId::new(31), StationId::new(32)],
            vanished: Vec::new(),
        }));
        traffic.set_variables(
            StationId::new(31),
            &[
                (TrafficVariable::Position, VariableValue::Point(Position::new(50.0, 0.0))),
                (TrafficVariable::Speed, VariableValue::Scalar(10.0)),
                (TrafficVariable::Heading, VariableValue::Scalar(90.0)),
            ],
        );
        traffic.set_variables(
            StationId::new(32),
            &[
                (TrafficVariable::Position, VariableValue::Point(Position::new(400.0, 0.0))),
                (TrafficVariable::Speed, VariableValue::Scalar(10.0)),
                (TrafficVariable::Heading, VariableValue::Scalar(90.0)),
            ],
        );

        drive(&mut state, &mut traffic, &mut network, 2).await;

        let recipients: BTreeSet<StationId> =
            network.sends.iter().map(|&(_, recipient, _)| recipient).collect();
        assert_eq!(
            recipients,
            BTreeSet::from([StationId::new(31), StationId::new(900)])
        );
    }

    #[tokio::test]
    async fn alert_payload_is_json_with_step_and_zone() {
        let config = make_config(10, 3);
        let mut state = make_state(&config);
        let mut traffic = StubTrafficSim::new();
        let mut network = StubNetworkSim::new();

        drive(&mut state, &mut traffic, &mut network, 1).await;

        let message = network.sends.first().unwrap().2;
        let bytes = state.tracker.payload(message).unwrap();
        let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();

        assert_eq!(value.get("kind").and_then(serde_json::Value::as_str), Some("zone-alert"));
        assert_eq!(value.get("step").and_then(serde_json::Value::as_u64), Some(0));
        assert_eq!(
            value.get("radius").and_then(serde_json::Value::as_f64),
            Some(100.0)
        );
    }
}
