//! OpenLockstep RTS - local lockstep match
//!
//! Runs several peers in one process, connected through the in-process
//! relay. Each peer spawns one unit on the first step and sends it toward
//! the next peer's start location a few steps later. When the match ends
//! the peers' final state hashes are compared.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use lockstep_client::engine::EngineStatus;
use lockstep_client::relay::spread_start_locations;
use lockstep_client::{ClientConfig, CommandSender, EngineError, LocalRelay, StepEngine};
use lockstep_core::commands::{MoveOrder, Point, SpawnUnit, StartLocation};
use lockstep_core::components::PlayerId;
use lockstep_core::error::GameError;
use lockstep_core::grid::{GridMap, GridNode};
use lockstep_core::math::Fixed;
use lockstep_core::registry::CommandRegistry;
use lockstep_core::simulation::World;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Step on which each peer orders its unit to move.
const ORDER_STEP: u64 = 3;

#[derive(Parser)]
#[command(name = "lockstep_client")]
#[command(about = "Run a local lockstep match between in-process peers")]
#[command(version)]
struct Cli {
    /// RON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of peers (overrides the configuration file)
    #[arg(short, long)]
    peers: Option<u32>,

    /// Gameplay steps to run before stopping
    #[arg(short, long)]
    steps: Option<u64>,

    /// Step length in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Enable debug logging when RUST_LOG is unset
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    info!("Starting OpenLockstep local match");

    match run_match(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "Match failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig, EngineError> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    if let Some(peers) = cli.peers {
        config.peers = peers;
    }
    if let Some(steps) = cli.steps {
        config.steps = Some(steps);
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.tick_interval_ms = tick_ms;
    }

    config.validate()?;
    Ok(config)
}

async fn run_match(cli: &Cli) -> Result<(), EngineError> {
    let config = load_config(cli)?;
    let level = config.load_level()?;
    let grid = Arc::new(GridMap::from_tiles(&level)?);
    let starts = spread_start_locations(&grid, config.peers);
    let far_corner = grid.node_position(GridNode::new(grid.width() - 1, grid.height() - 1));
    let far_corner = Point::new(far_corner.x.to_num(), far_corner.y.to_num());

    info!(
        peers = config.peers,
        width = grid.width(),
        height = grid.height(),
        tick_ms = config.tick_interval_ms,
        "Match configured"
    );

    let (relay, peers) = LocalRelay::new(CommandRegistry::standard(), starts.clone())?;
    let relay_task = tokio::spawn(relay.run());

    let mut cancel_handles = Vec::new();
    let mut engines = Vec::new();
    for peer in peers {
        let id = peer.id();
        let mut engine = StepEngine::new(
            config.engine_config(),
            peer,
            World::standard(Arc::clone(&grid)),
        );
        cancel_handles.push(engine.cancel_handle());

        // Queued before the engine starts, so every spawn lands in the
        // first gameplay step.
        engine.queue_command(SpawnUnit {
            position: home_of(&starts, id),
            speed: Fixed::from_num(3),
            flying: id % 2 == 0,
        });

        tokio::spawn(issue_orders(
            id,
            starts.clone(),
            far_corner,
            engine.command_sender(),
            engine.status(),
        ));
        engines.push(tokio::spawn(async move { (id, engine.run().await) }));
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping peers");
            for handle in &cancel_handles {
                handle.cancel();
            }
        }
    });

    let mut hashes: Vec<(PlayerId, u64)> = Vec::new();
    for task in engines {
        let (id, result) = task
            .await
            .map_err(|e| EngineError::Transport(format!("peer task failed: {e}")))?;
        let summary = result?;
        info!(
            player = id,
            steps = summary.steps_executed,
            state_hash = summary.state_hash,
            "Peer finished"
        );
        hashes.push((id, summary.state_hash));
    }

    match relay_task.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "Relay task failed"),
    }

    let Some(&(_, reference)) = hashes.first() else {
        return Ok(());
    };
    if let Some(&(id, remote)) = hashes.iter().find(|(_, hash)| *hash != reference) {
        error!(player = id, "Peers ended in different states");
        return Err(GameError::DesyncDetected {
            tick: 0,
            local_hash: reference,
            remote_hash: remote,
        }
        .into());
    }

    info!(state_hash = reference, peers = hashes.len(), "All peers agree");
    Ok(())
}

fn home_of(starts: &[StartLocation], id: PlayerId) -> Point {
    starts
        .iter()
        .find(|s| s.player_id == id)
        .map_or(Point::new(0, 0), |s| s.position)
}

/// Scripted orders for one peer.
///
/// Start buildings take ids `1..=peers`. Every peer queues exactly one
/// spawn for the first step and spawns are applied in issuer order, so
/// player `id`'s unit is entity `peers + id`. A peer with no other start
/// location to head for drives to `fallback`.
async fn issue_orders(
    id: PlayerId,
    starts: Vec<StartLocation>,
    fallback: Point,
    commands: CommandSender,
    mut status: watch::Receiver<EngineStatus>,
) {
    let Some(own) = starts.iter().position(|s| s.player_id == id) else {
        return;
    };
    let home = starts[own].position;
    let target = starts
        .get((own + 1) % starts.len())
        .map(|s| s.position)
        .filter(|p| *p != home)
        .unwrap_or(fallback);

    loop {
        let ready = match *status.borrow_and_update() {
            EngineStatus::Running { step } => step >= ORDER_STEP,
            EngineStatus::Stopped => return,
            _ => false,
        };
        if ready {
            break;
        }
        if status.changed().await.is_err() {
            return;
        }
    }

    let unit = u64::try_from(starts.len()).unwrap_or(0) + u64::from(id);
    let order = MoveOrder { unit, goal: target };
    if commands.send(order).is_ok() {
        info!(player = id, unit, x = target.x, y = target.y, "Move order issued");
    }
}
