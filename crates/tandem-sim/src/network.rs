//! Socket-backed network simulator client.
//!
//! Implements [`NetworkSim`] over the network wire dialect. Candidate
//! deliveries go out as point-to-point sends whose acknowledgement is
//! the `Ok` status; receptions come back batched through the drain
//! command. The advance cross-check mirrors the traffic side: a
//! reported clock other than the requested step is a
//! [`SimError::Desync`].

use std::time::Duration;

use async_trait::async_trait;
use tandem_core::client::{NetworkSim, SimError};
use tandem_core::config::ControllerConfig;
use tandem_proto::network::{parse_advance_reply, parse_drain_reply};
use tandem_proto::{NetworkCommand, Value};
use tandem_types::{MessageId, Position, Reception, SimStep, StationId};
use tracing::debug;

use crate::link::{LinkConfig, SimLink, expect_ok, frame_to_sim};

/// Network simulator connection.
pub struct NetworkClient {
    link: SimLink,
}

impl NetworkClient {
    /// Connect to the configured network endpoint.
    ///
    /// # Errors
    ///
    /// [`SimError::Connection`] when the endpoint stays unreachable.
    pub async fn connect(config: &ControllerConfig) -> Result<Self, SimError> {
        let link = SimLink::connect(LinkConfig {
            peer: "network",
            addr: config.network.addr(),
            connect_attempts: config.network.connect_attempts,
            retry_delay: Duration::from_millis(config.network.retry_delay_ms),
            response_timeout: Duration::from_millis(config.timeouts.response_timeout_ms),
        })
        .await?;
        Ok(Self { link })
    }

    async fn command(
        &mut self,
        name: &'static str,
        station: Option<StationId>,
        command: NetworkCommand,
    ) -> Result<Vec<Value>, SimError> {
        let frame = command.into_frame().map_err(frame_to_sim)?;
        let response = self.link.request(&frame).await?;
        expect_ok(name, station, response)
    }
}

#[async_trait]
impl NetworkSim for NetworkClient {
    async fn advance_until(&mut self, target: SimStep) -> Result<SimStep, SimError> {
        let values = self
            .command("advance_until", None, NetworkCommand::AdvanceUntil { target })
            .await?;
        let clock = parse_advance_reply(values).map_err(frame_to_sim)?;
        if clock != target {
            return Err(SimError::Desync {
                requested: target,
                reported: clock,
            });
        }
        Ok(clock)
    }

    async fn send_message(
        &mut self,
        sender: StationId,
        recipient: StationId,
        message_id: MessageId,
        payload: &[u8],
    ) -> Result<(), SimError> {
        let _ = self
            .command(
                "send_message",
                Some(recipient),
                NetworkCommand::SendMessage {
                    sender,
                    recipient,
                    message_id,
                    payload: payload.to_vec(),
                },
            )
            .await?;
        Ok(())
    }

    async fn drain_received(&mut self) -> Result<Vec<Reception>, SimError> {
        let values = self
            .command("drain_received", None, NetworkCommand::DrainReceived)
            .await?;
        let receptions = parse_drain_reply(values).map_err(frame_to_sim)?;
        if !receptions.is_empty() {
            debug!(count = receptions.len(), "Receptions drained");
        }
        Ok(receptions)
    }

    async fn create_station(
        &mut self,
        station: StationId,
        position: Position,
        technologies: &[String],
    ) -> Result<(), SimError> {
        let _ = self
            .command(
                "create_station",
                Some(station),
                NetworkCommand::CreateStation {
                    station,
                    position,
                    technologies: technologies.to_vec(),
                },
            )
            .await?;
        Ok(())
    }

    async fn update_position(
        &mut self,
        station: StationId,
        position: Position,
        speed: f64,
        heading: f64,
    ) -> Result<(), SimError> {
        let _ = self
            .command(
                "update_position",
                Some(station),
                NetworkCommand::UpdatePosition {
                    station,
                    position,
                    speed,
                    heading,
                },
            )
            .await?;
        Ok(())
    }

    async fn remove_station(&mut self, station: StationId) -> Result<(), SimError> {
        let _ = self
            .command(
                "remove_station",
                Some(station),
                NetworkCommand::RemoveStation { station },
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SimError> {
        let _ = self.command("close", None, NetworkCommand::Close).await?;
        debug!("Network connection closed");
        Ok(())
    }
}
