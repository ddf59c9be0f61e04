//! The seam between the step engine and whatever carries steps between
//! peers.

use std::future::Future;

use lockstep_core::commands::Command;
use lockstep_core::step::{Step, StepNumber};

use crate::error::Result;

/// Carries local batches out and authoritative steps in.
///
/// A transport does not retry. Any error it returns ends the match for
/// this peer.
pub trait Transport: Send {
    /// Submit this peer's commands for `step`, with the hash of the local
    /// world before that step is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be encoded or delivered.
    fn send(
        &mut self,
        step: StepNumber,
        commands: Vec<Command>,
        state_hash: Option<u64>,
    ) -> Result<()>;

    /// Wait for the authoritative step `step`.
    ///
    /// The engine bounds this wait itself; implementations may pend
    /// indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error on disconnect or if the step does not decode.
    fn get_step(&mut self, step: StepNumber) -> impl Future<Output = Result<Step>> + Send;
}
