//! Error types for the step engine and its transports.

use lockstep_core::error::GameError;
use lockstep_core::step::StepNumber;
use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that stop the step engine.
///
/// None of these are retried: a transport failure, a timeout or a desync
/// ends the match for this peer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport failed to send or receive.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The other end of the transport went away.
    #[error("Transport disconnected")]
    Disconnected,

    /// The authoritative step did not arrive in time.
    #[error("Timed out waiting for step {step} after {waited_ms} ms")]
    StepTimeout {
        /// Step being waited for.
        step: StepNumber,
        /// How long the engine waited.
        waited_ms: u64,
    },

    /// The wait was cancelled from outside the engine.
    #[error("Step wait cancelled")]
    Cancelled,

    /// The transport delivered a different step than the one requested.
    #[error("Expected step {expected}, received step {received}")]
    UnexpectedStep {
        /// Step the engine asked for.
        expected: StepNumber,
        /// Step the transport returned.
        received: StepNumber,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Simulation or protocol error from the core.
    #[error(transparent)]
    Game(#[from] GameError),
}
