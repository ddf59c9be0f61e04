//! Entity attribute definitions.
//!
//! Entities are attribute bags: every attribute is optional, and systems
//! select entities purely by which attributes are present. The presence
//! set is summarised as an [`AttributeSet`] bitmask so that criteria tests
//! are a single `and` per entity.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, Vec2Fixed};
use crate::pathfinding::Path;

/// Unique identifier for entities.
pub type EntityId = u64;

/// Identifier assigned to each peer by the handshake.
pub type PlayerId = u32;

/// One of eight sprite facings.
///
/// Index 0 points east and indices increase clockwise (screen y grows
/// downward), so 2 is south, 4 is west and 6 is north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Facing(u8);

/// tan(22.5°) in `I32F32`, the boundary between a cardinal and a diagonal octant.
const TAN_22_5: Fixed = Fixed::from_bits(1_779_033_704);

impl Facing {
    /// Number of distinct facings.
    pub const COUNT: u8 = 8;

    /// Facing east (index 0).
    pub const EAST: Self = Self(0);

    /// Create a facing from an index, wrapping into `0..8`.
    #[must_use]
    pub const fn new(index: u8) -> Self {
        Self(index % Self::COUNT)
    }

    /// The octant index.
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Octant closest to the bearing of `vector`.
    ///
    /// Returns `None` for the zero vector, which has no bearing.
    #[must_use]
    pub fn from_vector(vector: Vec2Fixed) -> Option<Self> {
        let (dx, dy) = (vector.x, vector.y);
        if dx == Fixed::ZERO && dy == Fixed::ZERO {
            return None;
        }

        let ax = dx.saturating_abs();
        let ay = dy.saturating_abs();

        let index = if ay <= ax * TAN_22_5 {
            if dx > Fixed::ZERO {
                0
            } else {
                4
            }
        } else if ax <= ay * TAN_22_5 {
            if dy > Fixed::ZERO {
                2
            } else {
                6
            }
        } else {
            match (dx > Fixed::ZERO, dy > Fixed::ZERO) {
                (true, true) => 1,
                (false, true) => 3,
                (false, false) => 5,
                (true, false) => 7,
            }
        };

        Some(Self(index))
    }
}

/// Bitmask of attribute names present on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttributeSet(u16);

impl AttributeSet {
    /// No attributes.
    pub const EMPTY: Self = Self(0);
    /// `position`: world position.
    pub const POSITION: Self = Self(1 << 0);
    /// `facing`: sprite octant.
    pub const FACING: Self = Self(1 << 1);
    /// `speed`: distance budget per tick.
    pub const SPEED: Self = Self(1 << 2);
    /// `move_goal`: current movement target.
    pub const MOVE_GOAL: Self = Self(1 << 3);
    /// `path`: grid nodes still to visit.
    pub const PATH: Self = Self(1 << 4);
    /// `path_complete`: path consumed, finishing with direct movement.
    pub const PATH_COMPLETE: Self = Self(1 << 5);
    /// `flying`: ignores the grid and moves in straight lines.
    pub const FLYING: Self = Self(1 << 6);
    /// `owner`: controlling player.
    pub const OWNER: Self = Self(1 << 7);

    /// Union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if every attribute in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if the two sets share at least one attribute.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if no attribute is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AttributeSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// An entity with optional attributes.
///
/// Only attributes that are `Some` (or `true` for markers) are present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    /// Unique identifier for this entity.
    pub id: EntityId,
    /// World position.
    pub position: Option<Vec2Fixed>,
    /// Sprite facing.
    pub facing: Option<Facing>,
    /// Movement speed (world units per tick).
    pub speed: Option<Fixed>,
    /// Where the entity is trying to go.
    pub move_goal: Option<Vec2Fixed>,
    /// Remaining path nodes, next node first.
    pub path: Option<Path>,
    /// Marker: the path has been consumed.
    pub path_complete: bool,
    /// Marker: moves without pathfinding.
    pub flying: bool,
    /// Controlling player.
    pub owner: Option<PlayerId>,
}

impl Entity {
    /// Create a new entity with the given ID and no attributes.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            position: None,
            facing: None,
            speed: None,
            move_goal: None,
            path: None,
            path_complete: false,
            flying: false,
            owner: None,
        }
    }

    /// The set of attributes this entity currently carries.
    #[must_use]
    pub fn attributes(&self) -> AttributeSet {
        let mut set = AttributeSet::EMPTY;
        let flags = [
            (self.position.is_some(), AttributeSet::POSITION),
            (self.facing.is_some(), AttributeSet::FACING),
            (self.speed.is_some(), AttributeSet::SPEED),
            (self.move_goal.is_some(), AttributeSet::MOVE_GOAL),
            (self.path.is_some(), AttributeSet::PATH),
            (self.path_complete, AttributeSet::PATH_COMPLETE),
            (self.flying, AttributeSet::FLYING),
            (self.owner.is_some(), AttributeSet::OWNER),
        ];
        for (present, attribute) in flags {
            if present {
                set = set | attribute;
            }
        }
        set
    }

    /// Drop all movement state: goal, path and completion marker.
    pub fn clear_movement(&mut self) {
        self.move_goal = None;
        self.path = None;
        self.path_complete = false;
    }

    /// Replace the movement goal, abandoning any path toward the old one.
    pub fn set_move_goal(&mut self, goal: Vec2Fixed) {
        self.clear_movement();
        self.move_goal = Some(goal);
    }
}

/// Parameters for spawning a new entity.
///
/// All fields are optional - only provide the attributes you need.
#[derive(Debug, Clone, Default)]
pub struct EntitySpawnParams {
    /// Initial position in world space.
    pub position: Option<Vec2Fixed>,
    /// Initial facing. Positioned entities default to [`Facing::EAST`].
    pub facing: Option<Facing>,
    /// Movement speed (units per tick).
    pub speed: Option<Fixed>,
    /// Whether the entity flies.
    pub flying: bool,
    /// Controlling player.
    pub owner: Option<PlayerId>,
}
