//! Lockstep steps: the per-tick unit exchanged with the transport.
//!
//! A [`Step`] holds every command all peers contributed for one tick.
//! Arrival order at the transport is not meaningful; before a step is
//! applied its commands are put into canonical order with
//! [`Step::canonicalize`], so every peer executes them identically.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::components::PlayerId;
use crate::error::{GameError, Result};
use crate::registry::CommandRegistry;

/// Step counter.
pub type StepNumber = u64;

/// Distinguished step carrying initial world setup.
pub const HANDSHAKE_STEP: StepNumber = 0;

/// First gameplay step.
pub const INITIAL_STEP: StepNumber = 1;

/// A command together with who issued it and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    /// Issuing player.
    pub issuer: PlayerId,
    /// Issuer-local sequence number within the step.
    pub sequence: u32,
    /// The command itself.
    pub command: Command,
}

/// All commands for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Step number.
    pub number: StepNumber,
    /// Commands from every peer.
    pub commands: Vec<StepCommand>,
    /// Reference state hash peers compare against to detect divergence.
    pub state_hash: Option<u64>,
}

impl Step {
    /// An empty step.
    #[must_use]
    pub fn new(number: StepNumber) -> Self {
        Self {
            number,
            commands: Vec::new(),
            state_hash: None,
        }
    }

    /// True for the handshake step.
    #[must_use]
    pub const fn is_handshake(&self) -> bool {
        self.number == HANDSHAKE_STEP
    }

    /// Append one peer's batch, numbering its commands in batch order.
    pub fn extend_from_batch(&mut self, issuer: PlayerId, commands: Vec<Command>) {
        self.commands
            .extend((0u32..).zip(commands).map(|(sequence, command)| StepCommand {
                issuer,
                sequence,
                command,
            }));
    }

    /// Sort commands by `(issuer, sequence)`.
    ///
    /// The sort is stable, so duplicate keys keep their relative order.
    pub fn canonicalize(&mut self) {
        self.commands.sort_by_key(|entry| (entry.issuer, entry.sequence));
    }

    /// Encode the step for the wire: commands use the registry format,
    /// the frame around them is bincode.
    ///
    /// # Errors
    ///
    /// Returns an error if a command cannot be encoded.
    pub fn encode(&self, registry: &CommandRegistry) -> Result<Vec<u8>> {
        let commands = self
            .commands
            .iter()
            .map(|entry| {
                Ok(WireCommand {
                    issuer: entry.issuer,
                    sequence: entry.sequence,
                    bytes: registry.encode(&entry.command)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let frame = WireStep {
            number: self.number,
            state_hash: self.state_hash,
            commands,
        };
        bincode::serialize(&frame).map_err(|e| frame_error(&e))
    }

    /// Decode a step produced by [`Step::encode`].
    ///
    /// Empty command entries (heartbeats) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownCommandKind`] on an unregistered tag, or
    /// [`GameError::MalformedPayload`] if the frame or a payload is corrupt.
    pub fn decode(bytes: &[u8], registry: &CommandRegistry) -> Result<Self> {
        let frame: WireStep = bincode::deserialize(bytes).map_err(|e| frame_error(&e))?;

        let mut commands = Vec::with_capacity(frame.commands.len());
        for entry in frame.commands {
            if let Some(command) = registry.decode(&entry.bytes)? {
                commands.push(StepCommand {
                    issuer: entry.issuer,
                    sequence: entry.sequence,
                    command,
                });
            }
        }

        Ok(Self {
            number: frame.number,
            commands,
            state_hash: frame.state_hash,
        })
    }
}

fn frame_error(error: &bincode::Error) -> GameError {
    GameError::MalformedPayload {
        kind: "Step",
        message: error.to_string(),
    }
}

#[derive(Serialize, Deserialize)]
struct WireCommand {
    issuer: PlayerId,
    sequence: u32,
    bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireStep {
    number: StepNumber,
    state_hash: Option<u64>,
    commands: Vec<WireCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{MoveOrder, Ping, Point};

    fn ping(x: i32) -> Command {
        Command::Ping(Ping {
            position: Point::new(x, 0),
        })
    }

    #[test]
    fn test_constants() {
        assert!(Step::new(HANDSHAKE_STEP).is_handshake());
        assert!(!Step::new(INITIAL_STEP).is_handshake());
        assert!(INITIAL_STEP > HANDSHAKE_STEP);
    }

    #[test]
    fn test_canonical_order_ignores_arrival() {
        let mut a = Step::new(5);
        a.extend_from_batch(2, vec![ping(20), ping(21)]);
        a.extend_from_batch(1, vec![ping(10)]);

        let mut b = Step::new(5);
        b.extend_from_batch(1, vec![ping(10)]);
        b.extend_from_batch(2, vec![ping(20), ping(21)]);

        a.canonicalize();
        b.canonicalize();
        assert_eq!(a, b);

        let order: Vec<_> = a.commands.iter().map(|c| (c.issuer, c.sequence)).collect();
        assert_eq!(order, vec![(1, 0), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_wire_round_trip() {
        let registry = CommandRegistry::standard();
        let mut step = Step::new(42);
        step.state_hash = Some(0xDEAD_BEEF);
        step.extend_from_batch(1, vec![ping(1)]);
        step.extend_from_batch(
            2,
            vec![Command::MoveOrder(MoveOrder {
                unit: 3,
                goal: Point::new(4, 5),
            })],
        );

        let bytes = step.encode(&registry).unwrap();
        assert_eq!(Step::decode(&bytes, &registry).unwrap(), step);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let registry = CommandRegistry::standard();
        let frame = WireStep {
            number: 1,
            state_hash: None,
            commands: vec![WireCommand {
                issuer: 1,
                sequence: 0,
                bytes: vec![99],
            }],
        };
        let bytes = bincode::serialize(&frame).unwrap();
        assert!(matches!(
            Step::decode(&bytes, &registry),
            Err(GameError::UnknownCommandKind { tag: 99 })
        ));
    }

    #[test]
    fn test_decode_skips_heartbeats() {
        let registry = CommandRegistry::standard();
        let frame = WireStep {
            number: 3,
            state_hash: None,
            commands: vec![WireCommand {
                issuer: 1,
                sequence: 0,
                bytes: Vec::new(),
            }],
        };
        let bytes = bincode::serialize(&frame).unwrap();
        let step = Step::decode(&bytes, &registry).unwrap();
        assert!(step.commands.is_empty());
    }
}
