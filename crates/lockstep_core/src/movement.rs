//! Unit movement: straight-line seeking and grid path following.
//!
//! Two strategies, chosen by attributes:
//! - [`FlySystem`] moves `flying` entities straight at their goal.
//! - [`PathFollowSystem`] asks the path search for a route across the
//!   [`GridMap`], walks it with a per-tick speed budget, and finishes the
//!   last stretch with direct movement once the path is consumed.
//!
//! Positions are truncated toward zero after every partial displacement;
//! snapping onto a node centre is exact.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::components::{AttributeSet, Entity, EntityId, Facing};
use crate::grid::GridMap;
use crate::math::{Fixed, Vec2Fixed};
use crate::pathfinding::find_path_between;
use crate::simulation::EntityStorage;
use crate::systems::System;

/// Direct movement ends when both axes are strictly within this distance
/// of the goal.
pub const ARRIVAL_TOLERANCE: Fixed = Fixed::const_from_int(2);

/// Slowest speed a unit may be spawned with.
///
/// Positions are truncated after every partial move, so a step shorter
/// than one unit on both axes can truncate back to where it started. At
/// two units per tick the longer axis always gains at least one unit.
pub const MIN_UNIT_SPEED: Fixed = Fixed::const_from_int(2);

fn face_toward(entity: &mut Entity, from: Vec2Fixed, to: Vec2Fixed) {
    if let Some(facing) = Facing::from_vector(to - from) {
        entity.facing = Some(facing);
    }
}

/// Move straight toward the movement goal by at most one tick of speed.
///
/// Clears movement state and returns `true` once within
/// [`ARRIVAL_TOLERANCE`] of the goal. The step is capped at the remaining
/// distance, so the entity never overshoots. Entities lacking a position,
/// goal or speed are left untouched.
pub fn direct_move(entity: &mut Entity) -> bool {
    let (Some(position), Some(goal), Some(speed)) =
        (entity.position, entity.move_goal, entity.speed)
    else {
        return false;
    };

    if position.within(goal, ARRIVAL_TOLERANCE) {
        entity.clear_movement();
        return true;
    }

    face_toward(entity, position, goal);
    let step = speed.min(position.distance(goal));
    let moved = position.step_toward(goal, step).truncated();
    entity.position = Some(moved);

    if moved.within(goal, ARRIVAL_TOLERANCE) {
        entity.clear_movement();
        return true;
    }
    false
}

/// What one tick of path following did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowOutcome {
    /// Length of each displacement, in order. Their sum never exceeds the
    /// entity's speed.
    pub segments: Vec<Fixed>,
    /// Budget left when the tick ended.
    pub remaining_budget: Fixed,
    /// Nodes reached and removed from the path.
    pub nodes_reached: usize,
    /// The path emptied during this tick.
    pub completed: bool,
}

impl FollowOutcome {
    /// Total distance advanced this tick.
    #[must_use]
    pub fn travelled(&self) -> Fixed {
        self.segments.iter().fold(Fixed::ZERO, |sum, s| sum + *s)
    }
}

/// Consume the entity's path with one tick's speed budget.
///
/// While budget remains: if the next node is farther than the budget,
/// move toward it by exactly the budget and stop; otherwise snap onto it,
/// drop it from the path, pay its distance and continue. When the path
/// empties the path is removed and `path_complete` is set.
pub fn follow_path(grid: &GridMap, entity: &mut Entity) -> FollowOutcome {
    let mut outcome = FollowOutcome::default();

    let (Some(mut position), Some(speed)) = (entity.position, entity.speed) else {
        return outcome;
    };
    let Some(mut path) = entity.path.take() else {
        return outcome;
    };

    let mut budget = speed;
    while budget > Fixed::ZERO {
        let Some(next) = path.next_node() else {
            break;
        };

        let target = grid.node_position(next);
        let distance = position.distance(target);
        face_toward(entity, position, target);

        if distance > budget {
            position = position.step_toward(target, budget).truncated();
            outcome.segments.push(budget);
            budget = Fixed::ZERO;
            break;
        }

        position = target;
        path.advance();
        outcome.segments.push(distance);
        outcome.nodes_reached += 1;
        budget -= distance;
    }

    entity.position = Some(position);
    outcome.remaining_budget = budget;

    if path.is_empty() {
        entity.path_complete = true;
        outcome.completed = true;
    } else {
        entity.path = Some(path);
    }

    outcome
}

/// Straight-line movement for flying entities.
#[derive(Debug, Default)]
pub struct FlySystem;

impl System for FlySystem {
    fn name(&self) -> &'static str {
        "fly"
    }

    fn criteria(&self) -> AttributeSet {
        AttributeSet::POSITION
            | AttributeSet::FACING
            | AttributeSet::SPEED
            | AttributeSet::MOVE_GOAL
            | AttributeSet::FLYING
    }

    fn step_entity(&mut self, id: EntityId, entities: &mut EntityStorage) {
        if let Some(entity) = entities.get_mut(id) {
            if direct_move(entity) {
                debug!(entity = id, "Arrived");
            }
        }
    }
}

/// Grid path following for ground entities.
#[derive(Debug)]
pub struct PathFollowSystem {
    grid: Arc<GridMap>,
}

impl PathFollowSystem {
    /// Create the system over a shared grid.
    #[must_use]
    pub fn new(grid: Arc<GridMap>) -> Self {
        Self { grid }
    }

    /// The grid paths are searched on.
    #[must_use]
    pub fn grid(&self) -> &GridMap {
        &self.grid
    }

    fn request_path(&self, id: EntityId, entity: &mut Entity) {
        let (Some(position), Some(goal)) = (entity.position, entity.move_goal) else {
            return;
        };

        match find_path_between(&self.grid, position, goal) {
            Ok(Some(path)) => {
                debug!(entity = id, nodes = path.len(), "Path found");
                entity.path = Some(path);
            }
            Ok(None) => {
                warn!(entity = id, "No path to goal, abandoning move");
                entity.clear_movement();
            }
            Err(error) => {
                warn!(entity = id, %error, "Path query off the map, abandoning move");
                entity.clear_movement();
            }
        }
    }
}

impl System for PathFollowSystem {
    fn name(&self) -> &'static str {
        "path_follow"
    }

    fn criteria(&self) -> AttributeSet {
        AttributeSet::POSITION | AttributeSet::FACING | AttributeSet::SPEED | AttributeSet::MOVE_GOAL
    }

    fn exclusions(&self) -> AttributeSet {
        AttributeSet::FLYING
    }

    fn step_entity(&mut self, id: EntityId, entities: &mut EntityStorage) {
        let Some(entity) = entities.get_mut(id) else {
            return;
        };

        if entity.path_complete {
            direct_move(entity);
            return;
        }

        if entity.path.is_none() {
            self.request_path(id, entity);
        }

        if entity.path.is_some() {
            let outcome = follow_path(&self.grid, entity);
            if outcome.completed {
                debug!(entity = id, "Path complete");
            }
        }
    }
}
