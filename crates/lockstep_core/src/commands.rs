//! Player commands exchanged between peers.
//!
//! A command is a player intent, never game state. Each variant is a
//! plain struct whose serialised fields are its network members; only
//! those cross the wire. The default payload codec writes them as a JSON
//! object and decodes into a default-constructed instance, so fields
//! missing from the payload keep their default values and unknown fields
//! are ignored. A variant may override the codec entirely
//! (see [`MoveOrder`]) as long as it round-trips every network member.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::components::{EntityId, PlayerId};
use crate::error::{GameError, Result};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::movement::MIN_UNIT_SPEED;

/// Integer world coordinates, as produced by pointer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate in world units.
    pub x: i32,
    /// Y coordinate in world units.
    pub y: i32,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Convert to a simulation vector.
    #[must_use]
    pub fn to_vec2(self) -> Vec2Fixed {
        Vec2Fixed::from_int(self.x, self.y)
    }
}

/// Discriminant of a [`Command`], used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    /// [`Ping`]
    Ping,
    /// [`Handshake`]
    Handshake,
    /// [`SpawnUnit`]
    SpawnUnit,
    /// [`MoveOrder`]
    MoveOrder,
}

impl CommandKind {
    /// Every kind, in standard tag order.
    pub const ALL: [Self; 4] = [Self::Ping, Self::Handshake, Self::SpawnUnit, Self::MoveOrder];

    /// Variant name, as used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Handshake => "Handshake",
            Self::SpawnUnit => "SpawnUnit",
            Self::MoveOrder => "MoveOrder",
        }
    }
}

/// Payload codec for a command variant.
///
/// The provided methods implement the default JSON field-map codec.
pub trait CommandPayload: Serialize + DeserializeOwned + Default {
    /// Which command this payload belongs to.
    const KIND: CommandKind;

    /// Encode the network members.
    fn encode_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| malformed(Self::KIND, e))
    }

    /// Decode into a fresh default instance. An empty payload transmits
    /// no fields and therefore yields the default instance.
    fn decode_payload(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes).map_err(|e| malformed(Self::KIND, e))
    }
}

fn malformed(kind: CommandKind, error: impl std::fmt::Display) -> GameError {
    GameError::MalformedPayload {
        kind: kind.name(),
        message: error.to_string(),
    }
}

/// Mark a map location for other players.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ping {
    /// Pinged location.
    pub position: Point,
}

impl CommandPayload for Ping {
    const KIND: CommandKind = CommandKind::Ping;
}

/// A player's starting location, announced in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartLocation {
    /// Player starting here.
    pub player_id: PlayerId,
    /// Where the player's start building is placed.
    pub position: Point,
}

/// Initial world setup, carried by the handshake step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Handshake {
    /// One entry per player in the match.
    pub start_locations: Vec<StartLocation>,
    /// The id assigned to the receiving peer.
    pub your_id: PlayerId,
}

impl CommandPayload for Handshake {
    const KIND: CommandKind = CommandKind::Handshake;
}

/// Create a mobile unit owned by the issuing player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnUnit {
    /// Spawn location.
    pub position: Point,
    /// Movement speed in world units per tick.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
    /// Flying units ignore the grid.
    pub flying: bool,
}

impl Default for SpawnUnit {
    fn default() -> Self {
        Self {
            position: Point::default(),
            speed: MIN_UNIT_SPEED,
            flying: false,
        }
    }
}

impl CommandPayload for SpawnUnit {
    const KIND: CommandKind = CommandKind::SpawnUnit;
}

/// Send a unit toward a goal.
///
/// Sent far more often than anything else, so it uses a fixed-width
/// binary layout instead of the JSON default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoveOrder {
    /// Unit to move.
    pub unit: EntityId,
    /// Destination.
    pub goal: Point,
}

impl CommandPayload for MoveOrder {
    const KIND: CommandKind = CommandKind::MoveOrder;

    fn encode_payload(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| malformed(Self::KIND, e))
    }

    fn decode_payload(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| malformed(Self::KIND, e))
    }
}

/// A serialisable player intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mark a map location.
    Ping(Ping),
    /// Initial world setup.
    Handshake(Handshake),
    /// Create a unit.
    SpawnUnit(SpawnUnit),
    /// Move a unit.
    MoveOrder(MoveOrder),
}

impl Command {
    /// The variant's registry key.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Ping(_) => CommandKind::Ping,
            Self::Handshake(_) => CommandKind::Handshake,
            Self::SpawnUnit(_) => CommandKind::SpawnUnit,
            Self::MoveOrder(_) => CommandKind::MoveOrder,
        }
    }

    /// Encode the payload with the variant's codec (no tag).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::Ping(c) => c.encode_payload(),
            Self::Handshake(c) => c.encode_payload(),
            Self::SpawnUnit(c) => c.encode_payload(),
            Self::MoveOrder(c) => c.encode_payload(),
        }
    }

    /// Decode a payload (no tag) as the given kind.
    pub fn decode_payload(kind: CommandKind, bytes: &[u8]) -> Result<Self> {
        Ok(match kind {
            CommandKind::Ping => Self::Ping(Ping::decode_payload(bytes)?),
            CommandKind::Handshake => Self::Handshake(Handshake::decode_payload(bytes)?),
            CommandKind::SpawnUnit => Self::SpawnUnit(SpawnUnit::decode_payload(bytes)?),
            CommandKind::MoveOrder => Self::MoveOrder(MoveOrder::decode_payload(bytes)?),
        })
    }
}

impl From<Ping> for Command {
    fn from(value: Ping) -> Self {
        Self::Ping(value)
    }
}

impl From<Handshake> for Command {
    fn from(value: Handshake) -> Self {
        Self::Handshake(value)
    }
}

impl From<SpawnUnit> for Command {
    fn from(value: SpawnUnit) -> Self {
        Self::SpawnUnit(value)
    }
}

impl From<MoveOrder> for Command {
    fn from(value: MoveOrder) -> Self {
        Self::MoveOrder(value)
    }
}
