//! Grid pathfinding using breadth-first search.
//!
//! The grid is unweighted and 4-connected, so BFS already yields a
//! shortest path. Neighbours are explored in the fixed order defined by
//! [`GridMap::neighbors`] (east, south, west, north), which makes the
//! chosen path identical on every peer.

use std::collections::VecDeque;

use crate::error::Result;
use crate::grid::{GridMap, GridNode};
use crate::math::{Fixed, Vec2Fixed};

/// Nodes still to visit, in travel order.
///
/// The start cell is never part of the path: the first node is always
/// one step closer to the goal than the cell the search started from, and
/// the last node is the goal cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    nodes: VecDeque<GridNode>,
}

impl Path {
    /// Create a path from nodes in travel order.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = GridNode>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    /// The next node to walk to.
    #[must_use]
    pub fn next_node(&self) -> Option<GridNode> {
        self.nodes.front().copied()
    }

    /// Remove and return the next node.
    pub fn advance(&mut self) -> Option<GridNode> {
        self.nodes.pop_front()
    }

    /// Remaining node count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True once every node has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate the remaining nodes in travel order.
    pub fn iter(&self) -> impl Iterator<Item = GridNode> + '_ {
        self.nodes.iter().copied()
    }

    /// Distance from `from` through every remaining node centre.
    #[must_use]
    pub fn length_from(&self, grid: &GridMap, from: Vec2Fixed) -> Fixed {
        let mut total = Fixed::ZERO;
        let mut cursor = from;
        for node in self.iter() {
            let centre = grid.node_position(node);
            total += cursor.distance(centre);
            cursor = centre;
        }
        total
    }
}

/// Breadth-first search from `start` to `goal`.
///
/// Returns `None` if the goal is unreachable. Finding no path is a normal
/// outcome: callers abandon the movement goal rather than fail.
/// If `start == goal` the returned path is empty.
#[must_use]
pub fn find_path(grid: &GridMap, start: GridNode, goal: GridNode) -> Option<Path> {
    let width = grid.width() as usize;
    let index = |node: GridNode| (node.y as usize) * width + (node.x as usize);

    let on_map = |node: GridNode| grid.on_map(node.x as i64, node.y as i64);
    if !on_map(start) || !on_map(goal) {
        return None;
    }

    let cell_count = width * (grid.height() as usize);

    let mut came_from: Vec<Option<GridNode>> = vec![None; cell_count];
    let mut visited = vec![false; cell_count];
    let mut frontier = VecDeque::new();

    visited[index(start)] = true;
    frontier.push_back(start);

    while let Some(current) = frontier.pop_front() {
        if current == goal {
            return Some(reconstruct_path(&came_from, start, goal, index));
        }

        for next in grid.neighbors(current) {
            let slot = index(next);
            if !visited[slot] {
                visited[slot] = true;
                came_from[slot] = Some(current);
                frontier.push_back(next);
            }
        }
    }

    None
}

/// Walk predecessor links from the goal back to the start, then reverse
/// into travel order. The start cell itself is dropped.
fn reconstruct_path(
    came_from: &[Option<GridNode>],
    start: GridNode,
    goal: GridNode,
    index: impl Fn(GridNode) -> usize,
) -> Path {
    let mut nodes = Vec::new();
    let mut current = goal;

    while current != start {
        nodes.push(current);
        match came_from[index(current)] {
            Some(previous) => current = previous,
            None => break,
        }
    }

    nodes.reverse();
    Path::new(nodes)
}

/// Path between two world positions.
///
/// # Errors
///
/// Returns [`GameError::OutOfBounds`](crate::error::GameError::OutOfBounds)
/// if either position is off the map. `Ok(None)` means no path exists.
pub fn find_path_between(
    grid: &GridMap,
    position: Vec2Fixed,
    destination: Vec2Fixed,
) -> Result<Option<Path>> {
    let start = grid.closest_node(position)?;
    let goal = grid.closest_node(destination)?;
    Ok(find_path(grid, start, goal))
}
