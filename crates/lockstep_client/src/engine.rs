//! The lockstep step engine.
//!
//! Per tick the engine:
//! 1. drains locally queued commands into an outgoing batch,
//! 2. hands the batch and the hash of its current world to the transport,
//! 3. waits (bounded, cancellable) for the authoritative step,
//! 4. applies the step's commands in canonical order,
//! 5. advances every system by one tick,
//! 6. and only then increments the step counter.
//!
//! Any failure in 2-4 leaves the step counter where it was. Failures are
//! fatal to the match; there is no retry or resynchronisation.

use std::sync::Arc;
use std::time::Duration;

use lockstep_core::commands::Command;
use lockstep_core::components::PlayerId;
use lockstep_core::error::GameError;
use lockstep_core::simulation::{CommandEffect, World};
use lockstep_core::step::{Step, StepNumber, HANDSHAKE_STEP, INITIAL_STEP};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::transport::Transport;

/// What the engine is doing, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Waiting for the handshake step.
    AwaitingHandshake,
    /// Between steps; `step` runs next.
    Running {
        /// Next step to execute.
        step: StepNumber,
    },
    /// Batch sent, waiting for the authoritative step.
    WaitingForPeers {
        /// Step being waited for.
        step: StepNumber,
    },
    /// The wait has exceeded the stall warning.
    Stalled {
        /// Step being waited for.
        step: StepNumber,
        /// Time waited so far.
        waited_ms: u64,
    },
    /// [`StepEngine::run`] has returned.
    Stopped,
}

/// Cancels a running engine from any task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stop the engine at its next wait.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Queues local commands from another task.
#[derive(Debug, Clone)]
pub struct CommandSender {
    sender: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Queue a command for the engine's next batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the engine has been dropped.
    pub fn send(&self, command: impl Into<Command>) -> Result<()> {
        self.sender
            .send(command.into())
            .map_err(|_| EngineError::Disconnected)
    }
}

/// How [`StepEngine::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Gameplay steps executed by this run.
    pub steps_executed: u64,
    /// Step that would have run next.
    pub next_step: StepNumber,
    /// Hash of the world when the run ended.
    pub state_hash: u64,
    /// The run stopped because it was cancelled.
    pub cancelled: bool,
}

/// Drives one peer's [`World`] in lockstep through a [`Transport`].
pub struct StepEngine<T> {
    config: EngineConfig,
    transport: T,
    world: World,
    next_step: StepNumber,
    local_player: Option<PlayerId>,
    outgoing: Vec<Command>,
    inbox: mpsc::UnboundedReceiver<Command>,
    inbox_sender: mpsc::UnboundedSender<Command>,
    status: watch::Sender<EngineStatus>,
    cancel: watch::Receiver<bool>,
    cancel_sender: Arc<watch::Sender<bool>>,
}

impl<T: Transport> StepEngine<T> {
    /// Create an engine awaiting its handshake.
    pub fn new(config: EngineConfig, transport: T, world: World) -> Self {
        let (inbox_sender, inbox) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(EngineStatus::AwaitingHandshake);
        let (cancel_sender, cancel) = watch::channel(false);

        Self {
            config,
            transport,
            world,
            next_step: HANDSHAKE_STEP,
            local_player: None,
            outgoing: Vec::new(),
            inbox,
            inbox_sender,
            status,
            cancel,
            cancel_sender: Arc::new(cancel_sender),
        }
    }

    /// Subscribe to status changes.
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// The most recently published status.
    pub fn current_status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    /// A handle that cancels this engine.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            sender: Arc::clone(&self.cancel_sender),
        }
    }

    /// A sender for queueing commands from other tasks.
    pub fn command_sender(&self) -> CommandSender {
        CommandSender {
            sender: self.inbox_sender.clone(),
        }
    }

    /// Queue a command for the next outgoing batch.
    pub fn queue_command(&mut self, command: impl Into<Command>) {
        self.outgoing.push(command.into());
    }

    /// Next step to execute.
    pub fn current_step(&self) -> StepNumber {
        self.next_step
    }

    /// Local player id, known after the handshake.
    pub fn local_player(&self) -> Option<PlayerId> {
        self.local_player
    }

    /// The simulated world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch and apply the handshake step, then start at [`INITIAL_STEP`].
    ///
    /// # Errors
    ///
    /// Fails if the wait fails, if the transport returns another step, or
    /// if the step carries no handshake.
    pub async fn perform_handshake(&mut self) -> Result<PlayerId> {
        if self.local_player.is_some() {
            return Err(GameError::InvalidState("handshake already performed".into()).into());
        }

        let mut step = self.wait_for_step(HANDSHAKE_STEP).await?;
        check_number(HANDSHAKE_STEP, &step)?;
        step.canonicalize();

        let mut your_id = None;
        for entry in &step.commands {
            if let CommandEffect::Handshake { your_id: id, spawned } =
                self.world.apply_command(entry.issuer, &entry.command)
            {
                debug!(player = id, buildings = spawned.len(), "Start buildings placed");
                your_id = Some(id);
            }
        }

        let id = your_id.ok_or_else(|| {
            GameError::InvalidState("handshake step carried no handshake".into())
        })?;

        self.local_player = Some(id);
        self.next_step = INITIAL_STEP;
        self.status.send_replace(EngineStatus::Running { step: INITIAL_STEP });
        info!(player = id, entities = self.world.entities().len(), "Handshake complete");
        Ok(id)
    }

    /// Exchange and execute one step. Returns the step executed.
    ///
    /// # Errors
    ///
    /// Fails before the handshake, on any transport error, timeout or
    /// cancellation, if the transport returns the wrong step, or if the
    /// step's reference hash differs from the local one. On error the
    /// step counter does not advance.
    pub async fn advance_step(&mut self) -> Result<StepNumber> {
        if self.local_player.is_none() {
            return Err(GameError::InvalidState("step before handshake".into()).into());
        }

        let step_number = self.next_step;
        while let Ok(command) = self.inbox.try_recv() {
            self.outgoing.push(command);
        }
        let batch = std::mem::take(&mut self.outgoing);
        let local_hash = self.world.state_hash();

        debug!(step = step_number, commands = batch.len(), local_hash, "Sending batch");
        self.transport.send(step_number, batch, Some(local_hash))?;

        self.status.send_replace(EngineStatus::WaitingForPeers { step: step_number });
        let mut step = self.wait_for_step(step_number).await?;
        check_number(step_number, &step)?;

        if let Some(remote_hash) = step.state_hash {
            if remote_hash != local_hash {
                error!(step = step_number, local_hash, remote_hash, "Desync detected");
                return Err(GameError::DesyncDetected {
                    tick: step_number,
                    local_hash,
                    remote_hash,
                }
                .into());
            }
        }

        step.canonicalize();
        for entry in &step.commands {
            let effect = self.world.apply_command(entry.issuer, &entry.command);
            debug!(step = step_number, issuer = entry.issuer, ?effect, "Command applied");
        }
        self.world.do_step();

        self.next_step += 1;
        self.status.send_replace(EngineStatus::Running { step: self.next_step });
        Ok(step_number)
    }

    /// Handshake if needed, then advance one step per tick interval until
    /// the configured step count is reached or the engine is cancelled.
    ///
    /// Publishes [`EngineStatus::Stopped`] when it returns.
    ///
    /// # Errors
    ///
    /// Any error from [`advance_step`](Self::advance_step) other than
    /// cancellation.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let result = self.run_until_done().await;
        self.status.send_replace(EngineStatus::Stopped);

        match &result {
            Ok(summary) => info!(
                steps = summary.steps_executed,
                state_hash = summary.state_hash,
                cancelled = summary.cancelled,
                "Step engine stopped"
            ),
            Err(error) => error!(%error, step = self.next_step, "Step engine failed"),
        }
        result
    }

    async fn run_until_done(&mut self) -> Result<RunSummary> {
        if self.local_player.is_none() {
            match self.perform_handshake().await {
                Ok(_) => {}
                Err(EngineError::Cancelled) => return Ok(self.summary(0, true)),
                Err(error) => return Err(error),
            }
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut executed = 0;

        loop {
            if self.config.max_steps.is_some_and(|max| executed >= max) {
                return Ok(self.summary(executed, false));
            }
            if *self.cancel.borrow() {
                return Ok(self.summary(executed, true));
            }

            tokio::select! {
                biased;
                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        return Ok(self.summary(executed, true));
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.advance_step().await {
                Ok(_) => executed += 1,
                Err(EngineError::Cancelled) => return Ok(self.summary(executed, true)),
                Err(error) => return Err(error),
            }
        }
    }

    fn summary(&self, steps_executed: u64, cancelled: bool) -> RunSummary {
        RunSummary {
            steps_executed,
            next_step: self.next_step,
            state_hash: self.world.state_hash(),
            cancelled,
        }
    }

    /// Wait for `step`, bounded by the step timeout and the cancel
    /// handle. Publishes [`EngineStatus::Stalled`] every stall interval.
    async fn wait_for_step(&mut self, step: StepNumber) -> Result<Step> {
        if *self.cancel.borrow() {
            return Err(EngineError::Cancelled);
        }

        let started = Instant::now();
        let stall_period = self.config.stall_warning.max(Duration::from_millis(1));
        let mut stall_timer = tokio::time::interval_at(started + stall_period, stall_period);
        let timeout = tokio::time::sleep(self.config.step_timeout);
        tokio::pin!(timeout);
        let fetch = self.transport.get_step(step);
        tokio::pin!(fetch);

        loop {
            tokio::select! {
                biased;
                result = &mut fetch => {
                    let waited = started.elapsed();
                    if waited >= stall_period {
                        info!(step, waited_ms = millis(waited), "Step arrived after stall");
                    }
                    return result;
                }
                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        warn!(step, "Step wait cancelled");
                        return Err(EngineError::Cancelled);
                    }
                }
                () = &mut timeout => {
                    let waited_ms = millis(started.elapsed());
                    error!(step, waited_ms, "Timed out waiting for step");
                    return Err(EngineError::StepTimeout { step, waited_ms });
                }
                _ = stall_timer.tick() => {
                    let waited_ms = millis(started.elapsed());
                    warn!(step, waited_ms, "Waiting for peers");
                    self.status.send_replace(EngineStatus::Stalled { step, waited_ms });
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for StepEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEngine")
            .field("next_step", &self.next_step)
            .field("local_player", &self.local_player)
            .field("queued", &self.outgoing.len())
            .field("status", &*self.status.borrow())
            .field("world", &self.world)
            .finish_non_exhaustive()
    }
}

fn check_number(expected: StepNumber, step: &Step) -> Result<()> {
    if step.number == expected {
        Ok(())
    } else {
        Err(EngineError::UnexpectedStep {
            expected,
            received: step.number,
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
