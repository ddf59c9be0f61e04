//! In-process relay: the transport used for local matches and tests.
//!
//! Every peer submits one batch per step. Once all peers have submitted
//! for the next unpublished step, the relay merges the batches in
//! ascending peer id order, attaches the lowest-id peer's state hash as
//! the reference, and publishes the merged step to every peer. Batches
//! and steps cross the relay as encoded bytes, exactly as they would
//! cross a socket.

use std::collections::BTreeMap;
use std::sync::Arc;

use lockstep_core::commands::{Command, Handshake, Point, StartLocation};
use lockstep_core::components::PlayerId;
use lockstep_core::grid::{GridMap, GridNode};
use lockstep_core::registry::CommandRegistry;
use lockstep_core::step::{Step, StepCommand, StepNumber, HANDSHAKE_STEP, INITIAL_STEP};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::transport::Transport;

/// Issuer recorded on relay-authored commands. Never a player id.
pub const RELAY_ISSUER: PlayerId = 0;

/// How far past the next unpublished step a batch may be buffered.
///
/// Engines submit one step ahead of the one they execute, so anything
/// further out is a misbehaving peer.
pub const MAX_STEPS_AHEAD: StepNumber = 64;

/// One encoded batch on its way to the relay.
#[derive(Debug)]
struct Submission {
    peer: PlayerId,
    bytes: Vec<u8>,
}

/// The merging hub. Drive it with [`LocalRelay::run`].
#[derive(Debug)]
pub struct LocalRelay {
    registry: Arc<CommandRegistry>,
    uplink: mpsc::UnboundedReceiver<Submission>,
    downlinks: BTreeMap<PlayerId, mpsc::UnboundedSender<Vec<u8>>>,
    pending: BTreeMap<StepNumber, BTreeMap<PlayerId, Step>>,
    next_publish: StepNumber,
}

impl LocalRelay {
    /// Create a relay and one connected transport per start location.
    ///
    /// Each peer's handshake step is queued immediately; it carries every
    /// start location and that peer's own id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if there are no start locations, a
    /// player id repeats, or a player id equals [`RELAY_ISSUER`].
    pub fn new(
        registry: CommandRegistry,
        start_locations: Vec<StartLocation>,
    ) -> Result<(Self, Vec<RelayPeer>)> {
        if start_locations.is_empty() {
            return Err(EngineError::Config("a match needs at least one peer".into()));
        }

        let registry = Arc::new(registry);
        let (uplink_tx, uplink_rx) = mpsc::unbounded_channel();
        let mut downlinks = BTreeMap::new();
        let mut peers = Vec::with_capacity(start_locations.len());

        for start in &start_locations {
            let id = start.player_id;
            if id == RELAY_ISSUER {
                return Err(EngineError::Config(format!(
                    "player id {RELAY_ISSUER} is reserved for the relay"
                )));
            }
            if downlinks.contains_key(&id) {
                return Err(EngineError::Config(format!("player id {id} appears twice")));
            }

            let (down_tx, down_rx) = mpsc::unbounded_channel();
            let handshake = handshake_step(&start_locations, id);
            down_tx
                .send(handshake.encode(&registry)?)
                .map_err(|_| EngineError::Disconnected)?;

            downlinks.insert(id, down_tx);
            peers.push(RelayPeer {
                id,
                registry: Arc::clone(&registry),
                uplink: uplink_tx.clone(),
                downlink: down_rx,
            });
        }

        info!(peers = peers.len(), "Local relay ready");

        let relay = Self {
            registry,
            uplink: uplink_rx,
            downlinks,
            pending: BTreeMap::new(),
            next_publish: INITIAL_STEP,
        };
        Ok((relay, peers))
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.downlinks.len()
    }

    /// Merge and publish steps until every peer has hung up.
    ///
    /// Submissions that fail to decode, come from the wrong peer, repeat
    /// a batch, target an already published step or land more than
    /// [`MAX_STEPS_AHEAD`] steps out are dropped with a warning; nothing
    /// already published is affected.
    ///
    /// # Errors
    ///
    /// Returns an error only if a merged step cannot be encoded.
    pub async fn run(mut self) -> Result<()> {
        while let Some(submission) = self.uplink.recv().await {
            self.accept(submission);
            self.publish_ready()?;
        }
        debug!(next_publish = self.next_publish, "All peers gone, relay stopping");
        Ok(())
    }

    fn accept(&mut self, submission: Submission) {
        let Submission { peer, bytes } = submission;

        let batch = match Step::decode(&bytes, &self.registry) {
            Ok(batch) => batch,
            Err(error) => {
                warn!(peer, %error, "Dropping undecodable batch");
                return;
            }
        };

        if !self.downlinks.contains_key(&peer) {
            warn!(peer, "Dropping batch from unknown peer");
            return;
        }
        if batch.commands.iter().any(|c| c.issuer != peer) {
            warn!(peer, step = batch.number, "Dropping batch with foreign issuer");
            return;
        }
        if batch.number < self.next_publish {
            warn!(peer, step = batch.number, "Dropping batch for published step");
            return;
        }
        if batch.number > self.next_publish.saturating_add(MAX_STEPS_AHEAD) {
            warn!(peer, step = batch.number, "Dropping batch too far ahead");
            return;
        }

        let slot = self.pending.entry(batch.number).or_default();
        if slot.contains_key(&peer) {
            warn!(peer, step = batch.number, "Dropping duplicate batch");
            return;
        }
        debug!(peer, step = batch.number, commands = batch.commands.len(), "Batch received");
        slot.insert(peer, batch);
    }

    fn publish_ready(&mut self) -> Result<()> {
        loop {
            let complete = self
                .pending
                .get(&self.next_publish)
                .is_some_and(|batches| batches.len() == self.downlinks.len());
            if !complete {
                return Ok(());
            }

            let Some(batches) = self.pending.remove(&self.next_publish) else {
                return Ok(());
            };
            let step = merge(self.next_publish, batches);
            let bytes = step.encode(&self.registry)?;

            for (peer, downlink) in &self.downlinks {
                if downlink.send(bytes.clone()).is_err() {
                    debug!(peer, step = step.number, "Peer gone, step not delivered");
                }
            }
            debug!(step = step.number, commands = step.commands.len(), "Step published");
            self.next_publish += 1;
        }
    }
}

/// Concatenate batches in ascending peer order. The reference hash is the
/// lowest-id peer's, falling through to the next peer if it sent none.
fn merge(number: StepNumber, batches: BTreeMap<PlayerId, Step>) -> Step {
    let mut step = Step::new(number);
    for batch in batches.into_values() {
        if step.state_hash.is_none() {
            step.state_hash = batch.state_hash;
        }
        step.commands.extend(batch.commands);
    }
    step
}

fn handshake_step(start_locations: &[StartLocation], your_id: PlayerId) -> Step {
    let mut step = Step::new(HANDSHAKE_STEP);
    step.commands.push(StepCommand {
        issuer: RELAY_ISSUER,
        sequence: 0,
        command: Command::Handshake(Handshake {
            start_locations: start_locations.to_vec(),
            your_id,
        }),
    });
    step
}

/// One peer's connection to a [`LocalRelay`].
#[derive(Debug)]
pub struct RelayPeer {
    id: PlayerId,
    registry: Arc<CommandRegistry>,
    uplink: mpsc::UnboundedSender<Submission>,
    downlink: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl RelayPeer {
    /// Player id this connection submits as.
    #[must_use]
    pub const fn id(&self) -> PlayerId {
        self.id
    }
}

impl Transport for RelayPeer {
    fn send(
        &mut self,
        step: StepNumber,
        commands: Vec<Command>,
        state_hash: Option<u64>,
    ) -> Result<()> {
        let mut batch = Step::new(step);
        batch.state_hash = state_hash;
        batch.extend_from_batch(self.id, commands);

        let bytes = batch.encode(&self.registry)?;
        self.uplink
            .send(Submission {
                peer: self.id,
                bytes,
            })
            .map_err(|_| EngineError::Disconnected)
    }

    fn get_step(
        &mut self,
        _step: StepNumber,
    ) -> impl std::future::Future<Output = Result<Step>> + Send {
        async move {
            let bytes = self.downlink.recv().await.ok_or(EngineError::Disconnected)?;
            Ok(Step::decode(&bytes, &self.registry)?)
        }
    }
}

/// Start locations for `peers` players spread along the map diagonal,
/// one per tile centre, with ids `1..=peers`.
#[must_use]
pub fn spread_start_locations(grid: &GridMap, peers: u32) -> Vec<StartLocation> {
    let last_x = grid.width().saturating_sub(1);
    let last_y = grid.height().saturating_sub(1);
    let span = peers.saturating_sub(1).max(1);

    (0..peers)
        .map(|i| {
            let node = GridNode::new(last_x * i / span, last_y * i / span);
            let centre = grid.node_position(node);
            StartLocation {
                player_id: i + 1,
                position: Point::new(centre.x.to_num(), centre.y.to_num()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::commands::{MoveOrder, Ping};
    use std::time::Duration;

    fn starts(ids: &[PlayerId]) -> Vec<StartLocation> {
        ids.iter()
            .map(|&player_id| StartLocation {
                player_id,
                position: Point::new(10 * player_id as i32, 10),
            })
            .collect()
    }

    fn relay_with(ids: &[PlayerId]) -> (LocalRelay, Vec<RelayPeer>) {
        LocalRelay::new(CommandRegistry::standard(), starts(ids)).unwrap()
    }

    fn ping(x: i32) -> Command {
        Command::Ping(Ping {
            position: Point::new(x, 0),
        })
    }

    #[test]
    fn test_rejects_bad_rosters() {
        let registry = CommandRegistry::standard;
        assert!(matches!(
            LocalRelay::new(registry(), Vec::new()),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            LocalRelay::new(registry(), starts(&[1, 1])),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            LocalRelay::new(registry(), starts(&[0, 1])),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_per_peer() {
        let (relay, mut peers) = relay_with(&[1, 2]);
        assert_eq!(relay.peer_count(), 2);

        for peer in &mut peers {
            let step = peer.get_step(HANDSHAKE_STEP).await.unwrap();
            assert!(step.is_handshake());
            let Command::Handshake(handshake) = &step.commands[0].command else {
                panic!("expected handshake");
            };
            assert_eq!(handshake.your_id, peer.id());
            assert_eq!(handshake.start_locations.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_merges_in_peer_order_with_reference_hash() {
        let (relay, mut peers) = relay_with(&[1, 2]);
        let relay = tokio::spawn(relay.run());

        for peer in &mut peers {
            peer.get_step(HANDSHAKE_STEP).await.unwrap();
        }

        // Arrival order is peer 2 first.
        peers[1].send(INITIAL_STEP, vec![ping(20), ping(21)], Some(22)).unwrap();
        peers[0]
            .send(
                INITIAL_STEP,
                vec![Command::MoveOrder(MoveOrder {
                    unit: 1,
                    goal: Point::new(3, 3),
                })],
                Some(11),
            )
            .unwrap();

        let first = peers[0].get_step(INITIAL_STEP).await.unwrap();
        let second = peers[1].get_step(INITIAL_STEP).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.number, INITIAL_STEP);
        assert_eq!(first.state_hash, Some(11));

        let order: Vec<_> = first.commands.iter().map(|c| (c.issuer, c.sequence)).collect();
        assert_eq!(order, vec![(1, 0), (2, 0), (2, 1)]);

        drop(peers);
        relay.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_every_peer() {
        let (relay, mut peers) = relay_with(&[1, 2]);
        tokio::spawn(relay.run());
        peers[0].get_step(HANDSHAKE_STEP).await.unwrap();

        peers[0].send(INITIAL_STEP, Vec::new(), Some(1)).unwrap();
        let waited =
            tokio::time::timeout(Duration::from_secs(5), peers[0].get_step(INITIAL_STEP)).await;
        assert!(waited.is_err(), "step published before peer 2 submitted");

        peers[1].send(INITIAL_STEP, Vec::new(), Some(1)).unwrap();
        let step = peers[0].get_step(INITIAL_STEP).await.unwrap();
        assert_eq!(step.number, INITIAL_STEP);
        assert!(step.commands.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_stale_batches_dropped() {
        let (relay, mut peers) = relay_with(&[1]);
        tokio::spawn(relay.run());
        let peer = &mut peers[0];
        peer.get_step(HANDSHAKE_STEP).await.unwrap();

        peer.send(1, vec![ping(1)], None).unwrap();
        let step = peer.get_step(1).await.unwrap();
        assert_eq!(step.commands.len(), 1);

        // Step 1 is already out; a resend must not produce a second copy.
        peer.send(1, vec![ping(2)], None).unwrap();
        peer.send(2, vec![ping(3)], None).unwrap();
        peer.send(2, vec![ping(4)], None).unwrap();

        let step = peer.get_step(2).await.unwrap();
        assert_eq!(step.number, 2);
        assert_eq!(step.commands[0].command, ping(3));

        peer.send(3, Vec::new(), None).unwrap();
        assert_eq!(peer.get_step(3).await.unwrap().number, 3);
    }

    #[test]
    fn test_undecodable_batch_dropped() {
        let (mut relay, _peers) = relay_with(&[1]);
        relay.accept(Submission {
            peer: 1,
            bytes: vec![0xFF, 0x00, 0x13],
        });
        assert!(relay.pending.is_empty());
    }

    #[test]
    fn test_far_future_batch_dropped() {
        let (mut relay, _peers) = relay_with(&[1]);
        let registry = CommandRegistry::standard();
        let submit = |relay: &mut LocalRelay, number: StepNumber| {
            relay.accept(Submission {
                peer: 1,
                bytes: Step::new(number).encode(&registry).unwrap(),
            });
        };

        submit(&mut relay, u64::MAX);
        submit(&mut relay, INITIAL_STEP + MAX_STEPS_AHEAD + 1);
        assert!(relay.pending.is_empty());

        submit(&mut relay, INITIAL_STEP + MAX_STEPS_AHEAD);
        submit(&mut relay, INITIAL_STEP);
        assert_eq!(relay.pending.len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_when_relay_stops() {
        let (relay, mut peers) = relay_with(&[1]);
        drop(relay);
        let peer = &mut peers[0];
        peer.get_step(HANDSHAKE_STEP).await.unwrap();
        assert!(matches!(
            peer.get_step(INITIAL_STEP).await,
            Err(EngineError::Disconnected)
        ));
        assert!(matches!(
            peer.send(INITIAL_STEP, Vec::new(), None),
            Err(EngineError::Disconnected)
        ));
    }

    #[test]
    fn test_spread_start_locations() {
        let grid = GridMap::from_rows(&["....", "....", "....", "...."], 10, 10).unwrap();
        let starts = spread_start_locations(&grid, 2);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].player_id, 1);
        assert_eq!(starts[0].position, Point::new(5, 5));
        assert_eq!(starts[1].player_id, 2);
        assert_eq!(starts[1].position, Point::new(35, 35));

        let solo = spread_start_locations(&grid, 1);
        assert_eq!(solo[0].position, Point::new(5, 5));
    }
}
