//! # Lockstep Client
//!
//! Drives a [`lockstep_core`] world in lockstep with other peers.
//!
//! - [`engine`] - The per-tick step engine: batch, exchange, apply, advance
//! - [`transport`] - What the engine needs from a network layer
//! - [`relay`] - An in-process transport that merges peer batches
//! - [`config`] - RON client configuration
//! - [`error`] - Engine error type

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod error;
pub mod relay;
pub mod transport;

pub use config::{ClientConfig, EngineConfig};
pub use engine::{CancelHandle, CommandSender, EngineStatus, RunSummary, StepEngine};
pub use error::EngineError;
pub use relay::{LocalRelay, RelayPeer};
pub use transport::Transport;
