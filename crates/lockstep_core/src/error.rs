//! Error types for the lockstep simulation core.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all simulation and protocol errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// A command tag that is not in the registry.
    ///
    /// Indicates a protocol or version mismatch between peers and is fatal
    /// to the connection that produced it.
    #[error("Unknown command kind: tag {tag}")]
    UnknownCommandKind {
        /// The unrecognised leading tag byte.
        tag: u8,
    },

    /// A known command whose payload could not be encoded or decoded.
    #[error("Malformed {kind} payload: {message}")]
    MalformedPayload {
        /// Name of the command variant.
        kind: &'static str,
        /// Codec error message.
        message: String,
    },

    /// The command registry was built with conflicting or reserved tags.
    #[error("Invalid command registry: {0}")]
    InvalidRegistry(String),

    /// A grid query outside the map.
    #[error("Position ({x}, {y}) is outside the grid map")]
    OutOfBounds {
        /// Queried x coordinate (world units, truncated).
        x: i64,
        /// Queried y coordinate (world units, truncated).
        y: i64,
    },

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(u64),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Desync detected in multiplayer.
    #[error("Desync detected at step {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Step where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}
