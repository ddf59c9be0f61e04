//! Walkability grid derived from level tile data.
//!
//! The grid is built once per match and never mutated afterwards, so it
//! can be shared freely (behind an `Arc`) by every system that needs it.

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{truncate, Fixed, Vec2Fixed};

/// A cell of the grid map, in tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridNode {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl GridNode {
    /// Create a node from tile coordinates.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// True if the two nodes share an edge.
    #[must_use]
    pub fn is_adjacent(self, other: Self) -> bool {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) == 1
    }
}

/// Neighbour offsets in exploration order: east, south, west, north.
///
/// Breadth-first search visits neighbours in this order, so it decides
/// which of several equally short paths is returned.
const NEIGHBOR_OFFSETS: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Source of per-tile passability, supplied by the level loader.
pub trait TileSource {
    /// Map width in tiles.
    fn width(&self) -> u32;
    /// Map height in tiles.
    fn height(&self) -> u32;
    /// Tile width in world units.
    fn tile_width(&self) -> u32;
    /// Tile height in world units.
    fn tile_height(&self) -> u32;
    /// Whether the tile at `(x, y)` can be walked on.
    fn is_passable(&self, x: u32, y: u32) -> bool;
}

/// Immutable walkability grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridMap {
    width: u32,
    height: u32,
    tile_width: Fixed,
    tile_height: Fixed,
    /// Row-major walkability.
    walkable: Vec<bool>,
}

impl GridMap {
    /// Build the grid by walking every tile of `source` once.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if any dimension is zero.
    pub fn from_tiles(source: &impl TileSource) -> Result<Self> {
        let (width, height) = (source.width(), source.height());
        let (tile_width, tile_height) = (source.tile_width(), source.tile_height());

        if width == 0 || height == 0 {
            return Err(GameError::InvalidState(format!(
                "grid map must have at least one tile, got {width}x{height}"
            )));
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(GameError::InvalidState(format!(
                "tile size must be positive, got {tile_width}x{tile_height}"
            )));
        }

        let mut walkable = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                walkable.push(source.is_passable(x, y));
            }
        }

        Ok(Self {
            width,
            height,
            tile_width: Fixed::from_num(tile_width),
            tile_height: Fixed::from_num(tile_height),
            walkable,
        })
    }

    /// Build a grid from text rows: `#` is blocked, anything else walkable.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if rows are empty or ragged.
    pub fn from_rows(rows: &[&str], tile_width: u32, tile_height: u32) -> Result<Self> {
        let level = AsciiRows {
            rows: rows.iter().map(|row| row.as_bytes()).collect(),
            tile_width,
            tile_height,
        };
        let width = level.width();
        if level.rows.iter().any(|row| row.len() != width as usize) {
            return Err(GameError::InvalidState("grid rows differ in length".into()));
        }
        Self::from_tiles(&level)
    }

    /// Grid width in tiles.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in tiles.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Tile width in world units.
    #[must_use]
    pub const fn tile_width(&self) -> Fixed {
        self.tile_width
    }

    /// Tile height in world units.
    #[must_use]
    pub const fn tile_height(&self) -> Fixed {
        self.tile_height
    }

    /// Check if signed tile coordinates lie on the map.
    #[must_use]
    pub fn on_map(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    #[inline]
    fn index(&self, node: GridNode) -> usize {
        (node.y as usize) * (self.width as usize) + (node.x as usize)
    }

    /// Whether a node is on the map and walkable.
    #[must_use]
    pub fn is_walkable(&self, node: GridNode) -> bool {
        self.on_map(node.x as i64, node.y as i64) && self.walkable[self.index(node)]
    }

    /// Walkable 4-connected neighbours of `node`, in east, south, west,
    /// north order. An unwalkable node has no neighbours.
    #[must_use]
    pub fn neighbors(&self, node: GridNode) -> Vec<GridNode> {
        if !self.is_walkable(node) {
            return Vec::new();
        }

        NEIGHBOR_OFFSETS
            .iter()
            .filter_map(|&(dx, dy)| {
                let (nx, ny) = (node.x as i64 + dx, node.y as i64 + dy);
                if !self.on_map(nx, ny) {
                    return None;
                }
                let next = GridNode::new(nx as u32, ny as u32);
                self.walkable[self.index(next)].then_some(next)
            })
            .collect()
    }

    /// The cell containing a world position.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::OutOfBounds`] for positions off the map,
    /// including any negative coordinate.
    pub fn closest_node(&self, position: Vec2Fixed) -> Result<GridNode> {
        let out_of_bounds = || GameError::OutOfBounds {
            x: truncate(position.x).to_num::<i64>(),
            y: truncate(position.y).to_num::<i64>(),
        };

        if position.x < Fixed::ZERO || position.y < Fixed::ZERO {
            return Err(out_of_bounds());
        }

        let x = (position.x / self.tile_width).int().to_num::<i64>();
        let y = (position.y / self.tile_height).int().to_num::<i64>();

        if self.on_map(x, y) {
            Ok(GridNode::new(x as u32, y as u32))
        } else {
            Err(out_of_bounds())
        }
    }

    /// World position of a node's centre.
    #[must_use]
    pub fn node_position(&self, node: GridNode) -> Vec2Fixed {
        let half = Fixed::from_num(1) / Fixed::from_num(2);
        Vec2Fixed::new(
            (Fixed::from_num(node.x) + half) * self.tile_width,
            (Fixed::from_num(node.y) + half) * self.tile_height,
        )
    }
}

/// Text-row level used by [`GridMap::from_rows`].
struct AsciiRows<'a> {
    rows: Vec<&'a [u8]>,
    tile_width: u32,
    tile_height: u32,
}

impl TileSource for AsciiRows<'_> {
    fn width(&self) -> u32 {
        self.rows.first().map_or(0, |row| row.len() as u32)
    }

    fn height(&self) -> u32 {
        self.rows.len() as u32
    }

    fn tile_width(&self) -> u32 {
        self.tile_width
    }

    fn tile_height(&self) -> u32 {
        self.tile_height
    }

    fn is_passable(&self, x: u32, y: u32) -> bool {
        self.rows[y as usize][x as usize] != b'#'
    }
}

/// Property key marking a tile type as passable.
pub const PASSABLE_KEY: &str = "p";
/// Property value marking a tile type as passable.
pub const PASSABLE_VALUE: &str = "t";

/// Level tile data, loaded from RON.
///
/// Tiles are stored as global tile ids in row-major order; each id may
/// carry string properties. A tile is passable iff its properties map
/// [`PASSABLE_KEY`] to [`PASSABLE_VALUE`]. Ids without properties are
/// blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelData {
    /// Map width in tiles.
    pub width: u32,
    /// Map height in tiles.
    pub height: u32,
    /// Tile width in world units.
    pub tile_width: u32,
    /// Tile height in world units.
    pub tile_height: u32,
    /// Row-major global tile ids.
    pub tiles: Vec<u32>,
    /// Properties per global tile id.
    #[serde(default)]
    pub tile_properties: BTreeMap<u32, BTreeMap<String, String>>,
}

impl LevelData {
    /// An all-passable level of the given size.
    #[must_use]
    pub fn open_field(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(PASSABLE_KEY.to_string(), PASSABLE_VALUE.to_string());

        let mut tile_properties = BTreeMap::new();
        tile_properties.insert(1, properties);

        Self {
            width,
            height,
            tile_width,
            tile_height,
            tiles: vec![1; (width as usize) * (height as usize)],
            tile_properties,
        }
    }

    /// Parse level data from RON text.
    ///
    /// `origin` names the source in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] if the text is not valid RON
    /// or the tile count does not match the dimensions.
    pub fn from_ron_str(text: &str, origin: &str) -> Result<Self> {
        let level: Self = ron::from_str(text).map_err(|e| GameError::DataParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })?;

        let expected = (level.width as usize) * (level.height as usize);
        if level.tiles.len() != expected {
            return Err(GameError::DataParseError {
                path: origin.to_string(),
                message: format!(
                    "expected {expected} tiles for a {}x{} map, found {}",
                    level.width,
                    level.height,
                    level.tiles.len()
                ),
            });
        }

        Ok(level)
    }

    /// Load level data from a RON file.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] if the file cannot be read or parsed.
    pub fn load<P: AsRef<FsPath>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| GameError::DataParseError {
            path: origin.clone(),
            message: e.to_string(),
        })?;
        Self::from_ron_str(&text, &origin)
    }
}

impl TileSource for LevelData {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn tile_width(&self) -> u32 {
        self.tile_width
    }

    fn tile_height(&self) -> u32 {
        self.tile_height
    }

    fn is_passable(&self, x: u32, y: u32) -> bool {
        let index = (y as usize) * (self.width as usize) + (x as usize);
        let Some(gid) = self.tiles.get(index) else {
            return false;
        };
        self.tile_properties
            .get(gid)
            .and_then(|props| props.get(PASSABLE_KEY))
            .is_some_and(|value| value == PASSABLE_VALUE)
    }
}
