//! Command registry: one-byte type tags and the command wire format.
//!
//! Wire format per command: `[tag: u8][payload]`. An empty byte sequence
//! encodes "no command" and is used as the heartbeat/absence signal.
//! Tag 0 is reserved so that no registered command can be confused with
//! that signal.
//!
//! The registry is built once at startup and passed by reference to every
//! encode/decode call site; it is immutable afterwards.

use std::collections::BTreeMap;

use tracing::trace;

use crate::commands::{Command, CommandKind};
use crate::error::{GameError, Result};

/// Tag value that is never assigned.
pub const RESERVED_TAG: u8 = 0;

/// Bidirectional map between tags and command kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRegistry {
    by_tag: BTreeMap<u8, CommandKind>,
    by_kind: BTreeMap<CommandKind, u8>,
}

impl CommandRegistry {
    /// Build a registry from explicit `(tag, kind)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidRegistry`] if a tag is 0, or if a tag or
    /// kind appears more than once.
    pub fn new(entries: &[(u8, CommandKind)]) -> Result<Self> {
        let mut by_tag = BTreeMap::new();
        let mut by_kind = BTreeMap::new();

        for &(tag, kind) in entries {
            if tag == RESERVED_TAG {
                return Err(GameError::InvalidRegistry(format!(
                    "tag {RESERVED_TAG} is reserved, cannot assign it to {}",
                    kind.name()
                )));
            }
            if let Some(existing) = by_tag.insert(tag, kind) {
                return Err(GameError::InvalidRegistry(format!(
                    "tag {tag} assigned to both {} and {}",
                    existing.name(),
                    kind.name()
                )));
            }
            if by_kind.insert(kind, tag).is_some() {
                return Err(GameError::InvalidRegistry(format!(
                    "{} registered more than once",
                    kind.name()
                )));
            }
        }

        Ok(Self { by_tag, by_kind })
    }

    /// The registry every peer uses: tags 1.. in [`CommandKind::ALL`] order.
    #[must_use]
    pub fn standard() -> Self {
        let mut by_tag = BTreeMap::new();
        let mut by_kind = BTreeMap::new();
        for (tag, kind) in (1u8..).zip(CommandKind::ALL) {
            by_tag.insert(tag, kind);
            by_kind.insert(kind, tag);
        }
        Self { by_tag, by_kind }
    }

    /// Tag assigned to a kind.
    #[must_use]
    pub fn tag_of(&self, kind: CommandKind) -> Option<u8> {
        self.by_kind.get(&kind).copied()
    }

    /// Kind registered under a tag.
    #[must_use]
    pub fn kind_of(&self, tag: u8) -> Option<CommandKind> {
        self.by_tag.get(&tag).copied()
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Registered `(tag, kind)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, CommandKind)> + '_ {
        self.by_tag.iter().map(|(&tag, &kind)| (tag, kind))
    }

    /// Encode a command as `[tag][payload]`.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidRegistry`] if the command's kind is not
    /// registered, or [`GameError::MalformedPayload`] if its codec fails.
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        let kind = command.kind();
        let tag = self.tag_of(kind).ok_or_else(|| {
            GameError::InvalidRegistry(format!("{} has no registered tag", kind.name()))
        })?;

        let payload = command.encode_payload()?;
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(tag);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode `[tag][payload]` into a command.
    ///
    /// An empty input decodes to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownCommandKind`] if the leading tag is not
    /// registered, which indicates a protocol mismatch with the sender, or
    /// [`GameError::MalformedPayload`] if the payload does not decode.
    pub fn decode(&self, bytes: &[u8]) -> Result<Option<Command>> {
        let Some((&tag, payload)) = bytes.split_first() else {
            return Ok(None);
        };

        let kind = self
            .kind_of(tag)
            .ok_or(GameError::UnknownCommandKind { tag })?;

        trace!(tag, kind = kind.name(), len = payload.len(), "Decoding command");
        Command::decode_payload(kind, payload).map(Some)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Handshake, MoveOrder, Ping, Point, SpawnUnit, StartLocation};
    use crate::math::Fixed;

    #[test]
    fn test_standard_tags() {
        let registry = CommandRegistry::standard();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.tag_of(CommandKind::Ping), Some(1));
        assert_eq!(registry.tag_of(CommandKind::Handshake), Some(2));
        assert_eq!(registry.tag_of(CommandKind::SpawnUnit), Some(3));
        assert_eq!(registry.tag_of(CommandKind::MoveOrder), Some(4));
        assert_eq!(registry.kind_of(0), None);
    }

    #[test]
    fn test_reserved_tag_rejected() {
        let result = CommandRegistry::new(&[(0, CommandKind::Ping)]);
        assert!(matches!(result, Err(GameError::InvalidRegistry(_))));
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let result = CommandRegistry::new(&[(1, CommandKind::Ping), (1, CommandKind::Handshake)]);
        assert!(matches!(result, Err(GameError::InvalidRegistry(_))));
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let result = CommandRegistry::new(&[(1, CommandKind::Ping), (2, CommandKind::Ping)]);
        assert!(matches!(result, Err(GameError::InvalidRegistry(_))));
    }

    #[test]
    fn test_encode_prepends_tag() {
        let registry = CommandRegistry::standard();
        let bytes = registry
            .encode(&Command::Ping(Ping {
                position: Point::new(1, 2),
            }))
            .unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..], br#"{"position":{"x":1,"y":2}}"#);
    }

    #[test]
    fn test_empty_input_is_no_command() {
        let registry = CommandRegistry::standard();
        assert_eq!(registry.decode(&[]).unwrap(), None);
    }

    #[test]
    fn test_unknown_tag() {
        let registry = CommandRegistry::standard();
        let err = registry.decode(&[200, b'{', b'}']).unwrap_err();
        assert!(matches!(err, GameError::UnknownCommandKind { tag: 200 }));

        let err = registry.decode(&[0]).unwrap_err();
        assert!(matches!(err, GameError::UnknownCommandKind { tag: 0 }));
    }

    #[test]
    fn test_unregistered_kind_cannot_encode() {
        let registry = CommandRegistry::new(&[(1, CommandKind::Ping)]).unwrap();
        let result = registry.encode(&Command::MoveOrder(MoveOrder::default()));
        assert!(matches!(result, Err(GameError::InvalidRegistry(_))));
    }

    #[test]
    fn test_custom_tags_round_trip() {
        let registry =
            CommandRegistry::new(&[(9, CommandKind::MoveOrder), (3, CommandKind::Ping)]).unwrap();
        let command = Command::MoveOrder(MoveOrder {
            unit: 4,
            goal: Point::new(8, 9),
        });
        let bytes = registry.encode(&command).unwrap();
        assert_eq!(bytes[0], 9);
        assert_eq!(registry.decode(&bytes).unwrap(), Some(command));
    }

    #[test]
    fn test_round_trip_each_variant() {
        let registry = CommandRegistry::standard();
        let commands = [
            Command::Ping(Ping {
                position: Point::new(-3, 44),
            }),
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
                your_id: 2,
            }),
            Command::SpawnUnit(SpawnUnit {
                position: Point::new(5, 5),
                speed: Fixed::from_num(12.5),
                flying: true,
            }),
            Command::MoveOrder(MoveOrder {
                unit: u64::MAX,
                goal: Point::new(i32::MIN, i32::MAX),
            }),
        ];

        for command in commands {
            let bytes = registry.encode(&command).unwrap();
            assert_eq!(registry.decode(&bytes).unwrap(), Some(command));
        }
    }
}
