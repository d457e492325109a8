//! Run loop: drives the step cycle from the first step to the last.
//!
//! [`run`] owns the whole lifecycle after [`connect`]: it marks the
//! controller running, executes [`run_step`] and advances the clock
//! until the end step is passed or a stop is requested, then closes
//! both simulator connections. A fatal step error tears the run down
//! the same way and leaves the controller [`RunState::Faulted`].
//!
//! Stopping is cooperative. A [`StopHandle`] can be cloned into a
//! signal handler or another task; the loop checks it between steps,
//! so the step in flight always completes before the run winds down.
//!
//! [`connect`]: crate::scheduler::connect
//! [`run_step`]: crate::scheduler::run_step

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tandem_types::SimStep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{NetworkSim, TrafficSim};
use crate::scheduler::{ControllerState, RunState, SchedulerError, run_step};

/// Errors that end a run abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A step failed; the run was torn down and the controller is
    /// faulted.
    #[error("step execution failed: {source}")]
    Step {
        /// The scheduler error that ended the run.
        #[from]
        source: SchedulerError,
    },
}

/// Cooperative stop request, checked between steps.
///
/// Clones share one flag, so a handle can be moved into a signal
/// handler while the runner keeps its own.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// A handle with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop after the step in flight.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why the run ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The configured end step was executed.
    EndStepReached,
    /// A [`StopHandle`] requested the stop.
    StopRequested,
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier stamped on every log line of the run.
    pub run_id: String,
    /// First step of the run.
    pub begin_step: SimStep,
    /// Last step actually executed, `None` if the run ended before
    /// executing any.
    pub last_step: Option<SimStep>,
    /// Steps completed.
    pub steps_executed: u64,
    /// Send orders handed to the network simulator over the whole run.
    pub total_sends: u64,
    /// Sends the network simulator acknowledged.
    pub total_acks: u64,
    /// Receptions dispatched to applications.
    pub total_receptions: u64,
    /// Why the run ended.
    pub end_reason: EndReason,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the run.
    pub ended_at: DateTime<Utc>,
}

/// Execute the run from the clock's current step until done.
///
/// On success both connections are closed and the controller is
/// [`RunState::Stopped`]. On failure the connections are still closed,
/// the controller is [`RunState::Faulted`], and the step error is
/// returned.
///
/// # Errors
///
/// [`RunnerError::Step`] wraps the first fatal scheduler error.
pub async fn run(
    state: &mut ControllerState,
    traffic: &mut dyn TrafficSim,
    network: &mut dyn NetworkSim,
    stop: &StopHandle,
) -> Result<RunReport, RunnerError> {
    if state.run_state != RunState::Connected {
        return Err(SchedulerError::InvalidState {
            current: state.run_state.name(),
            expected: RunState::Connected.name(),
        }
        .into());
    }
    state.run_state = RunState::Running;

    let run_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    info!(
        run_id = %run_id,
        begin_step = state.clock.begin(),
        end_step = ?state.clock.end(),
        apps = state.apps.len(),
        "Run started"
    );

    let mut last_step = None;
    let mut total_sends = 0_u64;
    let mut total_acks = 0_u64;
    let mut total_receptions = 0_u64;

    let end_reason = loop {
        if stop.is_requested() {
            break EndReason::StopRequested;
        }
        if state.clock.past_end() {
            break EndReason::EndStepReached;
        }
        match run_step(state, traffic, network).await {
            Ok(summary) => {
                last_step = Some(summary.step);
                total_sends = total_sends.saturating_add(as_u64(summary.sends));
                total_acks = total_acks.saturating_add(as_u64(summary.acks));
                total_receptions = total_receptions.saturating_add(as_u64(summary.receptions));
                if let Err(source) = state.clock.advance() {
                    teardown(state, traffic, network, RunState::Faulted).await;
                    error!(run_id = %run_id, error = %source, "Run aborted");
                    return Err(SchedulerError::Clock { source }.into());
                }
            }
            Err(err) => {
                teardown(state, traffic, network, RunState::Faulted).await;
                error!(run_id = %run_id, step = state.clock.current(), error = %err, "Run aborted");
                return Err(err.into());
            }
        }
    };

    state.run_state = RunState::Stopping;
    teardown(state, traffic, network, RunState::Stopped).await;

    let report = RunReport {
        run_id,
        begin_step: state.clock.begin(),
        last_step,
        steps_executed: state.clock.steps_executed(),
        total_sends,
        total_acks,
        total_receptions,
        end_reason,
        started_at,
        ended_at: Utc::now(),
    };
    log_run_end(&report);
    Ok(report)
}

/// Close both simulator connections and settle the lifecycle state.
/// Close failures are logged, not escalated: teardown runs on paths
/// that already have an error to report.
async fn teardown(
    state: &mut ControllerState,
    traffic: &mut dyn TrafficSim,
    network: &mut dyn NetworkSim,
    final_state: RunState,
) {
    if let Err(err) = traffic.close().await {
        warn!(error = %err, "Traffic close failed during teardown");
    }
    if let Err(err) = network.close().await {
        warn!(error = %err, "Network close failed during teardown");
    }
    state.run_state = final_state;
    debug!(state = final_state.name(), "Teardown complete");
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn log_run_end(report: &RunReport) {
    info!(
        run_id = %report.run_id,
        end_reason = ?report.end_reason,
        steps = report.steps_executed,
        last_step = ?report.last_step,
        sends = report.total_sends,
        acks = report.total_acks,
        receptions = report.total_receptions,
        "Run complete"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::{SimError, StubNetworkSim, StubTrafficSim};
    use crate::config::{ControllerConfig, RunConfig};
    use crate::scheduler::connect;

    fn make_state(end_step: u64) -> ControllerState {
        let config = ControllerConfig {
            run: RunConfig {
                end_step,
                ..RunConfig::default()
            },
            ..ControllerConfig::default()
        };
        ControllerState::new(&config).unwrap()
    }

    #[tokio::test]
    async fn bounded_run_reports_and_stops() {
        let mut state = make_state(2);
        let mut traffic = StubTrafficSim::new();
        let mut network = StubNetworkSim::new();
        connect(&mut state, &mut network).await.unwrap();

        let stop = StopHandle::new();
        let report = run(&mut state, &mut traffic, &mut network, &stop)
            .await
            .unwrap();

        assert_eq!(report.end_reason, EndReason::EndStepReached);
        assert_eq!(report.steps_executed, 3);
        assert_eq!(report.begin_step, 0);
        assert_eq!(report.last_step, Some(2));
        assert!(!report.run_id.is_empty());
        assert!(report.started_at <= report.ended_at);

        assert_eq!(state.run_state, RunState::Stopped);
        assert_eq!(traffic.advanced_to, vec![0, 1, 2]);
        assert!(traffic.closed);
        assert!(network.closed);
    }

    #[tokio::test]
    async fn fatal_step_error_faults_and_closes_both() {
        let mut state = make_state(5);
        let mut traffic = StubTrafficSim::new();
        let mut network = StubNetworkSim::new();
        connect(&mut state, &mut network).await.unwrap();
        network.advance_script.push_back(Err(SimError::Desync {
            requested: 0,
            reported: 7,
        }));

        let stop = StopHandle::new();
        let result = run(&mut state, &mut traffic, &mut network, &stop).await;

        assert!(matches!(
            result,
            Err(RunnerError::Step {
                source: SchedulerError::Sim {
                    step: 0,
                    source: SimError::Desync { .. },
                },
            })
        ));
        assert_eq!(state.run_state, RunState::Faulted);
        assert!(traffic.closed);
        assert!(network.closed);
    }

    #[tokio::test]
    async fn pre_requested_stop_executes_no_steps() {
        let mut state = make_state(0); // unbounded
        let mut traffic = StubTrafficSim::new();
        let mut network = StubNetworkSim::new();
        connect(&mut state, &mut network).await.unwrap();

        let stop = StopHandle::new();
        stop.request();
        let report = run(&mut state, &mut traffic, &mut network, &stop)
            .await
            .unwrap();

        assert_eq!(report.end_reason, EndReason::StopRequested);
        assert_eq!(report.steps_executed, 0);
        assert_eq!(report.last_step, None);
        assert!(traffic.advanced_to.is_empty());
        assert_eq!(state.run_state, RunState::Stopped);
    }

    #[tokio::test]
    async fn run_requires_a_connected_controller() {
        let mut state = make_state(1);
        let mut traffic = StubTrafficSim::new();
        let mut network = StubNetworkSim::new();

        let stop = StopHandle::new();
        let result = run(&mut state, &mut traffic, &mut network, &stop).await;

        assert!(matches!(
            result,
            Err(RunnerError::Step {
                source: SchedulerError::InvalidState { .. },
            })
        ));
        // a lifecycle refusal is not a fault and closes nothing
        assert_eq!(state.run_state, RunState::Idle);
        assert!(!traffic.closed);
        assert!(!network.closed);
    }
}
