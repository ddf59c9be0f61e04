//! Path search properties over random grids.

use lockstep_core::grid::{GridMap, GridNode};
use lockstep_core::pathfinding::find_path;
use lockstep_test_utils::determinism::strategies::arb_grid_rows;
use proptest::prelude::*;

const SIZE: u32 = 8;

fn build(rows: &[String]) -> GridMap {
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    GridMap::from_rows(&rows, 10, 10).unwrap()
}

fn arb_node() -> impl Strategy<Value = GridNode> {
    (0..SIZE, 0..SIZE).prop_map(|(x, y)| GridNode::new(x, y))
}

proptest! {
    #[test]
    fn prop_paths_are_connected_and_walkable(
        rows in arb_grid_rows(SIZE as usize, SIZE as usize),
        start in arb_node(),
        goal in arb_node(),
    ) {
        let grid = build(&rows);
        prop_assume!(start != goal);

        if let Some(path) = find_path(&grid, start, goal) {
            let nodes: Vec<_> = path.iter().collect();
            prop_assert!(!nodes.is_empty());
            prop_assert!(start.is_adjacent(nodes[0]));
            prop_assert_eq!(*nodes.last().unwrap(), goal);
            for pair in nodes.windows(2) {
                prop_assert!(pair[0].is_adjacent(pair[1]));
            }
            for node in &nodes {
                prop_assert!(grid.is_walkable(*node));
            }
        }
    }

    #[test]
    fn prop_search_is_repeatable(
        rows in arb_grid_rows(SIZE as usize, SIZE as usize),
        start in arb_node(),
        goal in arb_node(),
    ) {
        let grid = build(&rows);
        prop_assert_eq!(find_path(&grid, start, goal), find_path(&grid, start, goal));
    }

    #[test]
    fn prop_open_grid_paths_are_shortest(start in arb_node(), goal in arb_node()) {
        let row = ".".repeat(SIZE as usize);
        let rows = vec![row; SIZE as usize];
        let grid = build(&rows);

        let path = find_path(&grid, start, goal).unwrap();
        let manhattan = start.x.abs_diff(goal.x) + start.y.abs_diff(goal.y);
        prop_assert_eq!(path.len(), manhattan as usize);
    }
}

#[test]
fn test_walled_grid_tie_break() {
    let grid = GridMap::from_rows(&["...", "##.", "..."], 10, 10).unwrap();
    let path = find_path(&grid, GridNode::new(0, 0), GridNode::new(2, 2)).unwrap();
    let nodes: Vec<_> = path.iter().collect();
    assert_eq!(
        nodes,
        vec![
            GridNode::new(1, 0),
            GridNode::new(2, 0),
            GridNode::new(2, 1),
            GridNode::new(2, 2),
        ]
    );
}

#[test]
fn test_enclosed_goal_unreachable() {
    let grid = GridMap::from_rows(&[".#.", "##.", "..."], 10, 10).unwrap();
    assert!(find_path(&grid, GridNode::new(2, 2), GridNode::new(0, 0)).is_none());
}

#[test]
fn test_same_cell_is_empty_path() {
    let grid = GridMap::from_rows(&["..", ".."], 10, 10).unwrap();
    let path = find_path(&grid, GridNode::new(1, 1), GridNode::new(1, 1)).unwrap();
    assert!(path.is_empty());
}
