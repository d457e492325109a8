//! Shared socket link for both simulator clients.
//!
//! [`SimLink`] owns one TCP connection and the policy around it:
//! connect with bounded retries, one command in flight at a time, and a
//! response deadline backed by a single reconnect-and-resend attempt.
//! Peer session state such as a variable subscription lives and dies
//! with one connection, so a client may register a session-restore
//! command that is replayed on the replacement connection before the
//! interrupted command is resent. A command that misses its deadline
//! twice is a fatal [`SimError::Timeout`]; transport and codec failures
//! are fatal on the first occurrence.
//!
//! The dialects stay out of this module. Clients hand in encoded
//! [`RequestFrame`]s and interpret the [`ResponseFrame`]s; the helpers
//! at the bottom do the error mapping both clients share.

use std::time::Duration;

use tandem_core::client::SimError;
use tandem_proto::{
    ErrorReply, FrameError, RequestFrame, ResponseFrame, Status, Value, WireError, recv_response,
    send_request,
};
use tandem_types::StationId;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Connection parameters for one simulator link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Peer name for log fields, `traffic` or `network`.
    pub peer: &'static str,
    /// Address to dial, `host:port`.
    pub addr: String,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Delay between connection attempts.
    pub retry_delay: Duration,
    /// Deadline for each response.
    pub response_timeout: Duration,
}

/// Outcome of one framed exchange, before policy is applied.
enum Exchange {
    Response(ResponseFrame),
    Wire(WireError),
    TimedOut,
}

/// One framed command connection to a simulator process.
pub struct SimLink {
    config: LinkConfig,
    stream: TcpStream,
    restore: Option<RequestFrame>,
}

impl SimLink {
    /// Dial the simulator, retrying failed attempts per the config.
    ///
    /// # Errors
    ///
    /// [`SimError::Connection`] once every attempt is exhausted.
    pub async fn connect(config: LinkConfig) -> Result<Self, SimError> {
        let stream = dial(&config).await?;
        info!(peer = config.peer, addr = %config.addr, "Simulator connected");
        Ok(Self {
            config,
            stream,
            restore: None,
        })
    }

    /// Register a command to replay after any reconnect, before the
    /// interrupted command is resent.
    ///
    /// The replacement connection starts without the peer's
    /// per-connection session state; the restore command re-establishes
    /// it.
    pub fn set_session_restore(&mut self, frame: RequestFrame) {
        self.restore = Some(frame);
    }

    /// Send one command and await its response.
    ///
    /// A missed deadline triggers one reconnect-and-resend; the
    /// registered session-restore command, if any, is replayed before
    /// the resend. A second miss fails the exchange with
    /// [`SimError::Timeout`].
    pub async fn request(&mut self, frame: &RequestFrame) -> Result<ResponseFrame, SimError> {
        match self.exchange(frame).await {
            Exchange::Response(response) => Ok(response),
            Exchange::Wire(err) => Err(wire_to_sim(err)),
            Exchange::TimedOut => {
                warn!(
                    peer = self.config.peer,
                    millis = millis(self.config.response_timeout),
                    "Response deadline missed, reconnecting once"
                );
                self.stream = dial(&self.config).await?;
                self.restore_session().await?;
                match self.exchange(frame).await {
                    Exchange::Response(response) => Ok(response),
                    Exchange::Wire(err) => Err(wire_to_sim(err)),
                    Exchange::TimedOut => Err(SimError::Timeout {
                        millis: millis(self.config.response_timeout),
                    }),
                }
            }
        }
    }

    /// Replay the registered restore command on a fresh connection.
    /// A refusal is a fatal [`SimError::Connection`]; without its
    /// session state the link cannot serve further commands.
    async fn restore_session(&mut self) -> Result<(), SimError> {
        let Some(frame) = self.restore.clone() else {
            return Ok(());
        };
        match self.exchange(&frame).await {
            Exchange::Response(response) => {
                let _ = expect_ok("session restore", None, response).map_err(|err| {
                    SimError::Connection {
                        detail: format!("session restore refused after reconnect: {err}"),
                    }
                })?;
                debug!(peer = self.config.peer, "Session restored after reconnect");
                Ok(())
            }
            Exchange::Wire(err) => Err(wire_to_sim(err)),
            Exchange::TimedOut => Err(SimError::Timeout {
                millis: millis(self.config.response_timeout),
            }),
        }
    }

    async fn exchange(&mut self, frame: &RequestFrame) -> Exchange {
        if let Err(err) = send_request(&mut self.stream, frame).await {
            return Exchange::Wire(err);
        }
        match timeout(self.config.response_timeout, recv_response(&mut self.stream)).await {
            Ok(Ok(response)) => Exchange::Response(response),
            Ok(Err(err)) => Exchange::Wire(err),
            Err(_elapsed) => Exchange::TimedOut,
        }
    }
}

/// Connect with retries, one attempt per `retry_delay`.
async fn dial(config: &LinkConfig) -> Result<TcpStream, SimError> {
    let mut last_failure = String::new();
    for attempt in 1..=config.connect_attempts {
        match TcpStream::connect(&config.addr).await {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(peer = config.peer, error = %err, "Nodelay not applied");
                }
                if attempt > 1 {
                    debug!(peer = config.peer, attempt, "Connected after retry");
                }
                return Ok(stream);
            }
            Err(err) => {
                debug!(peer = config.peer, attempt, error = %err, "Connection attempt failed");
                last_failure = err.to_string();
            }
        }
        if attempt < config.connect_attempts {
            tokio::time::sleep(config.retry_delay).await;
        }
    }
    Err(SimError::Connection {
        detail: format!(
            "{} at {} unreachable after {} attempts: {last_failure}",
            config.peer, config.addr, config.connect_attempts
        ),
    })
}

/// Map a response's status onto the command outcome.
///
/// `station` is the station the command referenced, if any. It turns an
/// unknown-station error reply into the recoverable
/// [`SimError::StationNotFound`]; every other non-`Ok` status is a
/// recoverable [`SimError::Rejected`].
pub fn expect_ok(
    command: &'static str,
    station: Option<StationId>,
    response: ResponseFrame,
) -> Result<Vec<Value>, SimError> {
    match response.status {
        Status::Ok => Ok(response.values),
        Status::Error => {
            let reply = ErrorReply::parse(&response.values);
            if reply.is_unknown_station()
                && let Some(station) = station
            {
                return Err(SimError::StationNotFound { station });
            }
            let reason = if reply.message.is_empty() {
                format!("error code {}", reply.code)
            } else {
                reply.message
            };
            Err(SimError::Rejected {
                detail: format!("{command}: {reason}"),
            })
        }
        Status::NotSupported => Err(SimError::Rejected {
            detail: format!("{command} not supported by the simulator"),
        }),
        Status::Busy => Err(SimError::Rejected {
            detail: format!("{command} refused, simulator busy"),
        }),
    }
}

/// Collapse a transport failure into the client-facing error.
pub fn wire_to_sim(err: WireError) -> SimError {
    match err {
        WireError::Io { source } => SimError::Connection {
            detail: source.to_string(),
        },
        WireError::Frame { source } => SimError::MalformedFrame {
            detail: source.to_string(),
        },
    }
}

/// An encode failure never reaches the socket but poisons the command
/// the same way a decode failure does.
pub fn frame_to_sim(err: FrameError) -> SimError {
    SimError::MalformedFrame {
        detail: err.to_string(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
