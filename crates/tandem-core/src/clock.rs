//! Step clock for the lockstep run.
//!
//! The clock is the single source of truth for the controller's notion
//! of time. Both simulators are advanced to its current step each
//! cycle; it never moves backwards and only ever advances by one. Run
//! bounds come from configuration: a begin step and an optional
//! inclusive end step.

use tandem_types::SimStep;

/// Errors from clock construction and advancement.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Step counter would overflow.
    #[error("step counter overflow: cannot advance beyond u64::MAX")]
    StepOverflow,

    /// End step lies before the begin step.
    #[error("invalid run bounds: end step {end} is before begin step {begin}")]
    InvalidBounds {
        /// Configured begin step.
        begin: SimStep,
        /// Configured end step.
        end: SimStep,
    },
}

/// Monotonic step counter with run bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepClock {
    current: SimStep,
    begin: SimStep,
    end: Option<SimStep>,
}

impl StepClock {
    /// Create a clock positioned at `begin`. `end` is the last step to
    /// execute (inclusive); `None` means the run is unbounded and stops
    /// only on request or fault.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidBounds`] if `end < begin`.
    pub const fn new(begin: SimStep, end: Option<SimStep>) -> Result<Self, ClockError> {
        if let Some(end_step) = end {
            if end_step < begin {
                return Err(ClockError::InvalidBounds {
                    begin,
                    end: end_step,
                });
            }
        }
        Ok(Self {
            current: begin,
            begin,
            end,
        })
    }

    /// The step the controller is currently executing (or about to).
    #[must_use]
    pub const fn current(&self) -> SimStep {
        self.current
    }

    /// First step of the run.
    #[must_use]
    pub const fn begin(&self) -> SimStep {
        self.begin
    }

    /// Last step of the run, if bounded.
    #[must_use]
    pub const fn end(&self) -> Option<SimStep> {
        self.end
    }

    /// Move to the next step. Returns the new current step.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::StepOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<SimStep, ClockError> {
        self.current = self
            .current
            .checked_add(1)
            .ok_or(ClockError::StepOverflow)?;
        Ok(self.current)
    }

    /// Whether the current step lies past the configured end.
    #[must_use]
    pub const fn past_end(&self) -> bool {
        match self.end {
            Some(end) => self.current > end,
            None => false,
        }
    }

    /// Number of steps completed since the begin step.
    #[must_use]
    pub const fn steps_executed(&self) -> u64 {
        self.current.saturating_sub(self.begin)
    }
}
