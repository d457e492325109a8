//! Socket-backed traffic simulator client.
//!
//! Implements [`TrafficSim`] over the traffic wire dialect. At connect
//! time the client subscribes to the departed/arrived simulation
//! variables for the whole run window; from then on every advance
//! response carries the reached step plus both station-delta lists, and
//! the client folds those deltas into its presence set. The subscribe
//! frame doubles as the link's session-restore command, so a redial
//! re-subscribes before the interrupted command is resent.
//!
//! The advance cross-check lives here: a reply whose reached step is
//! not the requested one is reported as [`SimError::Desync`] without
//! touching the presence set.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tandem_core::client::{SimError, StepDelta, TrafficSim};
use tandem_core::config::ControllerConfig;
use tandem_proto::traffic::parse_variables_reply;
use tandem_proto::{AdvanceReply, SimulationVariable, TrafficCommand};
use tandem_types::{SimStep, StationId, TrafficVariable, VariableValue};
use tracing::debug;

use crate::link::{LinkConfig, SimLink, expect_ok, frame_to_sim};

/// Largest step the wire's int32 can carry; used as the subscription
/// end for unbounded runs.
const OPEN_END_STEP: SimStep = 2_147_483_647;

/// Traffic simulator connection.
pub struct TrafficClient {
    link: SimLink,
    present: BTreeSet<StationId>,
}

impl TrafficClient {
    /// Connect to the configured traffic endpoint and subscribe to the
    /// station-delta variables for the run window.
    ///
    /// # Errors
    ///
    /// [`SimError::Connection`] when the endpoint stays unreachable,
    /// and any exchange error from the subscribe handshake.
    pub async fn connect(config: &ControllerConfig) -> Result<Self, SimError> {
        let link = SimLink::connect(LinkConfig {
            peer: "traffic",
            addr: config.traffic.addr(),
            connect_attempts: config.traffic.connect_attempts,
            retry_delay: Duration::from_millis(config.traffic.retry_delay_ms),
            response_timeout: Duration::from_millis(config.timeouts.response_timeout_ms),
        })
        .await?;
        let mut client = Self {
            link,
            present: BTreeSet::new(),
        };
        client
            .subscribe_deltas(
                config.run.begin_step,
                config.run.run_until().unwrap_or(OPEN_END_STEP),
            )
            .await?;
        Ok(client)
    }

    async fn subscribe_deltas(&mut self, from: SimStep, until: SimStep) -> Result<(), SimError> {
        let frame = TrafficCommand::Subscribe {
            variables: vec![
                SimulationVariable::DepartedStations,
                SimulationVariable::ArrivedStations,
            ],
            from_step: from,
            until_step: until,
        }
        .into_frame()
        .map_err(frame_to_sim)?;
        let response = self.link.request(&frame).await?;
        let _ = expect_ok("subscribe", None, response)?;
        // Subscription state is connection-scoped on the peer; replay
        // the same frame after any reconnect.
        self.link.set_session_restore(frame);
        debug!(from, until, "Station-delta subscription active");
        Ok(())
    }
}

#[async_trait]
impl TrafficSim for TrafficClient {
    async fn advance_to(&mut self, target: SimStep) -> Result<StepDelta, SimError> {
        let frame = TrafficCommand::Advance { target }
            .into_frame()
            .map_err(frame_to_sim)?;
        let response = self.link.request(&frame).await?;
        let values = expect_ok("advance", None, response)?;
        let reply = AdvanceReply::parse(values).map_err(frame_to_sim)?;
        if reply.reached != target {
            return Err(SimError::Desync {
                requested: target,
                reported: reply.reached,
            });
        }
        for id in &reply.departed {
            self.present.insert(*id);
        }
        for id in &reply.arrived {
            self.present.remove(id);
        }
        debug!(
            target,
            appeared = reply.departed.len(),
            vanished = reply.arrived.len(),
            present = self.present.len(),
            "Traffic advanced"
        );
        Ok(StepDelta {
            appeared: reply.departed,
            vanished: reply.arrived,
        })
    }

    async fn read_variables(
        &mut self,
        station: StationId,
        variables: &[TrafficVariable],
    ) -> Result<Vec<(TrafficVariable, VariableValue)>, SimError> {
        let frame = TrafficCommand::GetVariables {
            station,
            variables: variables.to_vec(),
        }
        .into_frame()
        .map_err(frame_to_sim)?;
        let response = self.link.request(&frame).await?;
        let values = expect_ok("get_variables", Some(station), response)?;
        parse_variables_reply(variables, values).map_err(frame_to_sim)
    }

    async fn write_variable(
        &mut self,
        station: StationId,
        variable: TrafficVariable,
        value: VariableValue,
    ) -> Result<(), SimError> {
        let frame = TrafficCommand::SetVariable {
            station,
            variable,
            value,
        }
        .into_frame()
        .map_err(frame_to_sim)?;
        let response = self.link.request(&frame).await?;
        let _ = expect_ok("set_variable", Some(station), response)?;
        Ok(())
    }

    fn present_stations(&self) -> &BTreeSet<StationId> {
        &self.present
    }

    async fn close(&mut self) -> Result<(), SimError> {
        let frame = TrafficCommand::Close.into_frame().map_err(frame_to_sim)?;
        let response = self.link.request(&frame).await?;
        let _ = expect_ok("close", None, response)?;
        debug!("Traffic connection closed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tandem_core::config::{TimeoutConfig, TrafficEndpointConfig};
    use tandem_proto::traffic::{opcodes, var_codes};
    use tandem_proto::{
        ERR_UNKNOWN_STATION, RequestFrame, ResponseFrame, Status, Value, recv_request,
        send_response,
    };
    use tandem_types::Position;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// One scripted connection: answer each request with the next reply
    /// and hand the observed requests back for assertions.
    fn spawn_sim(
        listener: TcpListener,
        replies: Vec<ResponseFrame>,
    ) -> JoinHandle<Vec<RequestFrame>> {
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            for reply in replies {
                let request = recv_request(&mut socket).await.unwrap();
                seen.push(request);
                send_response(&mut socket, &reply).await.unwrap();
            }
            seen
        })
    }

    async fn make_config() -> (TcpListener, ControllerConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ControllerConfig {
            traffic: TrafficEndpointConfig {
                host: "127.0.0.1".to_owned(),
                port,
                connect_attempts: 1,
                ..TrafficEndpointConfig::default()
            },
            timeouts: TimeoutConfig {
                response_timeout_ms: 1000,
            },
            ..ControllerConfig::default()
        };
        (listener, config)
    }

    fn ok_with(values: Vec<Value>) -> ResponseFrame {
        ResponseFrame::new(Status::Ok, values)
    }

    fn advance_reply(reached: i32, appeared: Vec<i32>, vanished: Vec<i32>) -> ResponseFrame {
        ok_with(vec![
            Value::Int(reached),
            Value::List(appeared.into_iter().map(Value::Int).collect()),
            Value::List(vanished.into_iter().map(Value::Int).collect()),
        ])
    }

    #[tokio::test]
    async fn connect_subscribes_over_the_run_window() {
        let (listener, mut config) = make_config().await;
        config.run.begin_step = 5;
        config.run.end_step = 60;
        let sim = spawn_sim(listener, vec![ResponseFrame::ok()]);

        let _client = TrafficClient::connect(&config).await.unwrap();

        let seen = sim.await.unwrap();
        let subscribe = seen.first().unwrap();
        assert_eq!(subscribe.opcode, opcodes::SUBSCRIBE);
        assert_eq!(
            subscribe.values,
            vec![
                Value::List(vec![
                    Value::Int(var_codes::DEPARTED),
                    Value::Int(var_codes::ARRIVED),
                ]),
                Value::Int(5),
                Value::Int(60),
            ]
        );
    }

    #[tokio::test]
    async fn unbounded_run_subscribes_to_the_wire_maximum() {
        let (listener, config) = make_config().await;
        let sim = spawn_sim(listener, vec![ResponseFrame::ok()]);

        let _client = TrafficClient::connect(&config).await.unwrap();

        let seen = sim.await.unwrap();
        let subscribe = seen.first().unwrap();
        assert_eq!(subscribe.values.get(2), Some(&Value::Int(i32::MAX)));
    }

    #[tokio::test]
    async fn advance_folds_deltas_into_presence() {
        let (listener, config) = make_config().await;
        let sim = spawn_sim(
            listener,
            vec![
                ResponseFrame::ok(),
                advance_reply(1, vec![4, 5], Vec::new()),
                advance_reply(2, Vec::new(), vec![4]),
            ],
        );

        let mut client = TrafficClient::connect(&config).await.unwrap();

        let delta = client.advance_to(1).await.unwrap();
        assert_eq!(delta.appeared, vec![StationId::new(4), StationId::new(5)]);
        assert!(delta.vanished.is_empty());
        assert!(client.present_stations().contains(&StationId::new(4)));

        let delta = client.advance_to(2).await.unwrap();
        assert_eq!(delta.vanished, vec![StationId::new(4)]);
        assert!(!client.present_stations().contains(&StationId::new(4)));
        assert!(client.present_stations().contains(&StationId::new(5)));

        let seen = sim.await.unwrap();
        assert_eq!(seen.get(1).map(|f| f.opcode), Some(opcodes::ADVANCE));
        assert_eq!(seen.get(1).map(|f| f.values.clone()), Some(vec![Value::Int(1)]));
    }

    #[tokio::test]
    async fn reconnect_restores_the_delta_subscription_before_resending() {
        let (listener, mut config) = make_config().await;
        config.timeouts.response_timeout_ms = 100;
        let sim = tokio::spawn(async move {
            // First connection: answer the subscribe, swallow the
            // advance to force the deadline miss.
            let (mut first, _) = listener.accept().await.unwrap();
            let subscribe = recv_request(&mut first).await.unwrap();
            send_response(&mut first, &ResponseFrame::ok()).await.unwrap();
            let _swallowed = recv_request(&mut first).await.unwrap();
            // Second connection: a fresh peer without subscription state.
            let (mut second, _) = listener.accept().await.unwrap();
            let mut replayed = Vec::new();
            for reply in [ResponseFrame::ok(), advance_reply(3, vec![8], Vec::new())] {
                let request = recv_request(&mut second).await.unwrap();
                replayed.push(request);
                send_response(&mut second, &reply).await.unwrap();
            }
            drop(first);
            (subscribe, replayed)
        });

        let mut client = TrafficClient::connect(&config).await.unwrap();
        let delta = client.advance_to(3).await.unwrap();
        assert_eq!(delta.appeared, vec![StationId::new(8)]);
        assert!(client.present_stations().contains(&StationId::new(8)));

        let (subscribe, replayed) = sim.await.unwrap();
        assert_eq!(subscribe.opcode, opcodes::SUBSCRIBE);
        // The subscribe is replayed verbatim, then the advance resent.
        assert_eq!(replayed.first(), Some(&subscribe));
        assert_eq!(replayed.get(1).map(|f| f.opcode), Some(opcodes::ADVANCE));
    }

    #[tokio::test]
    async fn advance_to_the_wrong_step_is_a_desync() {
        let (listener, config) = make_config().await;
        let _sim = spawn_sim(
            listener,
            vec![ResponseFrame::ok(), advance_reply(7, Vec::new(), Vec::new())],
        );

        let mut client = TrafficClient::connect(&config).await.unwrap();
        let result = client.advance_to(1).await;

        assert_eq!(
            result,
            Err(SimError::Desync {
                requested: 1,
                reported: 7
            })
        );
        // the presence set is untouched by a desynced reply
        assert!(client.present_stations().is_empty());
    }

    #[tokio::test]
    async fn reads_parse_in_request_order() {
        let (listener, config) = make_config().await;
        let sim = spawn_sim(
            listener,
            vec![
                ResponseFrame::ok(),
                ok_with(vec![
                    Value::List(vec![Value::Double(12.5), Value::Double(-3.0)]),
                    Value::Double(13.9),
                ]),
            ],
        );

        let mut client = TrafficClient::connect(&config).await.unwrap();
        let values = client
            .read_variables(
                StationId::new(4),
                &[TrafficVariable::Position, TrafficVariable::Speed],
            )
            .await
            .unwrap();

        assert_eq!(
            values,
            vec![
                (
                    TrafficVariable::Position,
                    VariableValue::Point(Position::new(12.5, -3.0))
                ),
                (TrafficVariable::Speed, VariableValue::Scalar(13.9)),
            ]
        );

        let seen = sim.await.unwrap();
        assert_eq!(
            seen.get(1).map(|f| f.values.clone()),
            Some(vec![
                Value::Int(4),
                Value::List(vec![
                    Value::Int(var_codes::POSITION),
                    Value::Int(var_codes::SPEED),
                ]),
            ])
        );
    }

    #[tokio::test]
    async fn unknown_station_read_is_recoverable() {
        let (listener, config) = make_config().await;
        let _sim = spawn_sim(
            listener,
            vec![
                ResponseFrame::ok(),
                ResponseFrame::new(
                    Status::Error,
                    vec![
                        Value::Int(ERR_UNKNOWN_STATION),
                        Value::Text("gone".to_owned()),
                    ],
                ),
            ],
        );

        let mut client = TrafficClient::connect(&config).await.unwrap();
        let result = client
            .read_variables(StationId::new(31), &[TrafficVariable::Speed])
            .await;

        assert_eq!(
            result,
            Err(SimError::StationNotFound {
                station: StationId::new(31)
            })
        );
    }

    #[tokio::test]
    async fn close_is_a_full_handshake() {
        let (listener, config) = make_config().await;
        let sim = spawn_sim(listener, vec![ResponseFrame::ok(), ResponseFrame::ok()]);

        let mut client = TrafficClient::connect(&config).await.unwrap();
        client.close().await.unwrap();

        let seen = sim.await.unwrap();
        assert_eq!(seen.get(1).map(|f| f.opcode), Some(opcodes::CLOSE));
    }
}
