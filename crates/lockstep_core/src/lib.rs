//! # Lockstep Core
//!
//! Deterministic simulation core for the OpenLockstep RTS client.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No network IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! Every peer feeds the same ordered command stream into a [`World`] and
//! ends up with the same entities, which is what lets peers exchange
//! commands instead of state.
//!
//! ## Crate Structure
//!
//! - [`commands`] - Command variants and their payload codecs
//! - [`registry`] - Type tags and the command wire format
//! - [`step`] - Per-tick command bundles and canonical ordering
//! - [`components`] - Entity attributes
//! - [`systems`] - The per-entity system contract
//! - [`simulation`] - Entity storage, scheduler, and command application
//! - [`grid`] - Tile grid and level loading
//! - [`pathfinding`] - Breadth-first path search
//! - [`movement`] - Direct flight and path following
//! - [`math`] - Fixed-point math utilities
//!
//! [`World`]: simulation::World

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod commands;
pub mod components;
pub mod error;
pub mod grid;
pub mod math;
pub mod movement;
pub mod pathfinding;
pub mod registry;
pub mod simulation;
pub mod step;
pub mod systems;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::commands::{
        Command, CommandKind, CommandPayload, Handshake, MoveOrder, Ping, Point, SpawnUnit,
        StartLocation,
    };
    pub use crate::components::*;
    pub use crate::error::{GameError, Result};
    pub use crate::grid::{GridMap, GridNode, LevelData, TileSource};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::movement::{FlySystem, PathFollowSystem};
    pub use crate::pathfinding::{find_path, Path};
    pub use crate::registry::CommandRegistry;
    pub use crate::simulation::{CommandEffect, EntityStorage, World};
    pub use crate::step::{Step, StepCommand, StepNumber, HANDSHAKE_STEP, INITIAL_STEP};
    pub use crate::systems::System;
}
