//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the world produces identical
//! results given identical command streams.
//!
//! # Testing Strategy
//!
//! Lockstep peers exchange commands, never state, so every peer must
//! arrive at the same world from the same steps. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`lockstep_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   We always iterate in sorted entity ID order.
//!
//! - **Command arrival order**: Steps are canonicalized before they are
//!   applied, so arrival order at the transport never matters.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual system determinism (flying, path following)
//! 2. **Property tests**: Random inputs must still produce deterministic outputs
//! 3. **Integration tests**: Scripted command streams are reproducible
//! 4. **Parallel tests**: Running N worlds on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use lockstep_core::commands::Command;
use lockstep_core::components::PlayerId;
use lockstep_core::simulation::World;
use tracing::trace;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic world).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "World is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial state
/// * `step` - Function to advance the state by one tick
/// * `hash` - Function to compute state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// One command scheduled for a specific tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCommand {
    /// Tick before which the command is applied.
    pub tick: u64,
    /// Issuing player.
    pub issuer: PlayerId,
    /// The command.
    pub command: Command,
}

impl ScriptedCommand {
    /// Schedule `command` from `issuer` before `tick`.
    #[must_use]
    pub fn new(tick: u64, issuer: PlayerId, command: impl Into<Command>) -> Self {
        Self {
            tick,
            issuer,
            command: command.into(),
        }
    }
}

/// Apply a script to a world for `num_ticks` ticks, the way the step
/// engine does: every command due at a tick goes in before that tick's
/// systems run.
///
/// Commands are applied in script order; callers are expected to pass
/// them already in canonical order.
pub fn play_script(world: &mut World, script: &[ScriptedCommand], num_ticks: u64) {
    for tick in 0..num_ticks {
        for entry in script.iter().filter(|entry| entry.tick == tick) {
            let effect = world.apply_command(entry.issuer, &entry.command);
            trace!(tick, issuer = entry.issuer, ?effect, "Scripted command applied");
        }
        world.do_step();
    }
}

/// Play the same script against `runs` fresh worlds and compare hashes.
pub fn verify_script_determinism<F>(
    setup_fn: F,
    script: &[ScriptedCommand],
    runs: usize,
    num_ticks: u64,
) -> DeterminismResult
where
    F: Fn() -> World,
{
    let hashes: Vec<u64> = (0..runs)
        .map(|_| {
            let mut world = setup_fn();
            play_script(&mut world, script, num_ticks);
            world.state_hash()
        })
        .collect();

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks: num_ticks,
    }
}

/// Simplified determinism verification for [`World`].
///
/// Runs the world twice with identical setup and verifies the final
/// state hashes match exactly.
pub fn verify_world_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> World,
{
    let mut world1 = setup_fn();
    let mut world2 = setup_fn();

    for _ in 0..num_ticks {
        world1.do_step();
        world2.do_step();
    }

    world1.state_hash() == world2.state_hash()
}

/// Result of parallel world runs.
#[derive(Debug, Clone)]
pub struct ParallelRunResult {
    /// Final state hash from each world.
    pub hashes: Vec<u64>,
    /// Number of ticks each world ran.
    pub ticks: u64,
    /// Number of worlds run.
    pub num_worlds: usize,
}

impl ParallelRunResult {
    /// Check if all worlds produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all worlds matched.
    ///
    /// # Panics
    ///
    /// Panics if worlds produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel worlds diverged!\n\
                 Worlds: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_worlds,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run N worlds on scoped threads, one per thread.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn run_parallel_worlds<F>(
    setup_fn: F,
    script: &[ScriptedCommand],
    num_worlds: usize,
    num_ticks: u64,
) -> ParallelRunResult
where
    F: Fn() -> World + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_worlds)
            .map(|_| {
                s.spawn(|| {
                    let mut world = setup_fn();
                    play_script(&mut world, script, num_ticks);
                    world.state_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ParallelRunResult {
        hashes,
        ticks: num_ticks,
        num_worlds,
    }
}

/// Compare two worlds tick-by-tick, finding first divergence.
///
/// Useful for debugging non-determinism by finding exactly when
/// worlds start to differ.
///
/// # Returns
///
/// `None` if the worlds agree throughout, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(
    setup_fn: F,
    script: &[ScriptedCommand],
    num_ticks: u64,
) -> Option<u64>
where
    F: Fn() -> World,
{
    let mut world1 = setup_fn();
    let mut world2 = setup_fn();

    // Check initial state
    if world1.state_hash() != world2.state_hash() {
        return Some(0);
    }

    for tick in 0..num_ticks {
        for entry in script.iter().filter(|entry| entry.tick == tick) {
            world1.apply_command(entry.issuer, &entry.command);
            world2.apply_command(entry.issuer, &entry.command);
        }
        world1.do_step();
        world2.do_step();

        if world1.state_hash() != world2.state_hash() {
            return Some(tick + 1);
        }
    }

    None
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible inputs for
/// property-based testing of commands, grids and worlds.
pub mod strategies {
    use lockstep_core::commands::{Command, Handshake, MoveOrder, Ping, Point, SpawnUnit, StartLocation};
    use lockstep_core::math::Fixed;
    use proptest::prelude::*;

    /// Generate a wire point anywhere in `i32` space.
    pub fn arb_point() -> impl Strategy<Value = Point> {
        (any::<i32>(), any::<i32>()).prop_map(|(x, y)| Point::new(x, y))
    }

    /// Generate a point inside a `width` x `height` pixel area.
    pub fn arb_point_within(width: i32, height: i32) -> impl Strategy<Value = Point> {
        (0..width, 0..height).prop_map(|(x, y)| Point::new(x, y))
    }

    /// Generate a fixed-point number for speeds.
    ///
    /// Range: 2 to 20 (pixels per tick), the usable unit speeds.
    pub fn arb_fixed_speed() -> impl Strategy<Value = Fixed> {
        (2i32..20i32).prop_map(Fixed::from_num)
    }

    /// Generate a Ping command.
    pub fn arb_ping() -> impl Strategy<Value = Command> {
        arb_point().prop_map(|position| Command::Ping(Ping { position }))
    }

    /// Generate a Handshake command.
    pub fn arb_handshake() -> impl Strategy<Value = Command> {
        (
            proptest::collection::vec((any::<u32>(), arb_point()), 0..8),
            any::<u32>(),
        )
            .prop_map(|(starts, your_id)| {
                Command::Handshake(Handshake {
                    start_locations: starts
                        .into_iter()
                        .map(|(player_id, position)| StartLocation {
                            player_id,
                            position,
                        })
                        .collect(),
                    your_id,
                })
            })
    }

    /// Generate a SpawnUnit command.
    pub fn arb_spawn_unit() -> impl Strategy<Value = Command> {
        (arb_point(), arb_fixed_speed(), any::<bool>()).prop_map(|(position, speed, flying)| {
            Command::SpawnUnit(SpawnUnit {
                position,
                speed,
                flying,
            })
        })
    }

    /// Generate a MoveOrder command.
    pub fn arb_move_order() -> impl Strategy<Value = Command> {
        (any::<u64>(), arb_point())
            .prop_map(|(unit, goal)| Command::MoveOrder(MoveOrder { unit, goal }))
    }

    /// Generate any command.
    pub fn arb_command() -> impl Strategy<Value = Command> {
        prop_oneof![arb_ping(), arb_handshake(), arb_spawn_unit(), arb_move_order()]
    }

    /// Generate a sequence of commands.
    pub fn arb_command_sequence(max_len: usize) -> impl Strategy<Value = Vec<Command>> {
        proptest::collection::vec(arb_command(), 0..max_len)
    }

    /// Generate grid rows of the given size with roughly one wall in four.
    pub fn arb_grid_rows(width: usize, height: usize) -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(
            proptest::collection::vec(prop::bool::weighted(0.25), width),
            height,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .map(|row| row.into_iter().map(|wall| if wall { '#' } else { '.' }).collect())
                .collect()
        })
    }
}
