//! Test fixtures and helpers.
//!
//! Pre-built grids, worlds and units for consistent testing.

use std::sync::Arc;

use fixed::types::I32F32;
use lockstep_core::commands::{Command, Handshake, MoveOrder, Point, SpawnUnit, StartLocation};
use lockstep_core::components::{EntityId, PlayerId};
use lockstep_core::grid::GridMap;
use lockstep_core::simulation::{CommandEffect, World};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Build a grid from ASCII rows (`#` blocked, anything else walkable).
///
/// # Panics
///
/// Panics if the rows are empty or ragged.
#[must_use]
pub fn grid(rows: &[&str], tile_size: u32) -> Arc<GridMap> {
    Arc::new(GridMap::from_rows(rows, tile_size, tile_size).expect("fixture grid rows are valid"))
}

/// A fully walkable grid.
///
/// # Panics
///
/// Panics if either dimension is zero.
#[must_use]
pub fn open_grid(width: usize, height: usize, tile_size: u32) -> Arc<GridMap> {
    let row = ".".repeat(width);
    let rows: Vec<&str> = (0..height).map(|_| row.as_str()).collect();
    grid(&rows, tile_size)
}

/// The 3x3 grid of 10x10 tiles with walls at (0,1) and (1,1).
///
/// The only route from the top-left corner to the bottom-right one goes
/// around the right-hand side.
#[must_use]
pub fn walled_three_by_three() -> Arc<GridMap> {
    grid(&["...", "##.", "..."], 10)
}

/// A two-player handshake as seen by `your_id`.
#[must_use]
pub fn two_player_handshake(your_id: PlayerId) -> Command {
    Command::Handshake(Handshake {
        start_locations: vec![
            StartLocation {
                player_id: 1,
                position: Point::new(10, 10),
            },
            StartLocation {
                player_id: 2,
                position: Point::new(90, 90),
            },
        ],
        your_id,
    })
}

/// Spawn a ground unit for `owner` through the command path.
///
/// # Panics
///
/// Panics if the world does not report a spawn.
pub fn spawn_mover(world: &mut World, owner: PlayerId, x: i32, y: i32, speed: i32) -> EntityId {
    spawn_with(world, owner, x, y, speed, false)
}

/// Spawn a flying unit for `owner` through the command path.
///
/// # Panics
///
/// Panics if the world does not report a spawn.
pub fn spawn_flyer(world: &mut World, owner: PlayerId, x: i32, y: i32, speed: i32) -> EntityId {
    spawn_with(world, owner, x, y, speed, true)
}

fn spawn_with(
    world: &mut World,
    owner: PlayerId,
    x: i32,
    y: i32,
    speed: i32,
    flying: bool,
) -> EntityId {
    let command = Command::SpawnUnit(SpawnUnit {
        position: Point::new(x, y),
        speed: fixed(speed),
        flying,
    });
    match world.apply_command(owner, &command) {
        CommandEffect::Spawned(id) => id,
        other => panic!("expected a spawn, got {other:?}"),
    }
}

/// Order `unit` to `(x, y)` on behalf of `owner`.
pub fn order_move(
    world: &mut World,
    owner: PlayerId,
    unit: EntityId,
    x: i32,
    y: i32,
) -> CommandEffect {
    world.apply_command(
        owner,
        &Command::MoveOrder(MoveOrder {
            unit,
            goal: Point::new(x, y),
        }),
    )
}
