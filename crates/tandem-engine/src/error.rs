//! Error types for the controller binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode of engine startup and the run itself.

/// Top-level error for the controller binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tandem_core::config::ConfigError,
    },

    /// Controller state construction or connect failed.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: tandem_core::scheduler::SchedulerError,
    },

    /// The step loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: tandem_core::runner::RunnerError,
    },

    /// A simulator connection could not be established.
    #[error("simulator error: {source}")]
    Sim {
        /// The underlying simulator error.
        #[from]
        source: tandem_core::client::SimError,
    },

    /// The configured run mode is not recognized.
    #[error("unknown run mode {mode:?}, expected \"live\" or \"synthetic\"")]
    Mode {
        /// The mode string found in configuration.
        mode: String,
    },
}
