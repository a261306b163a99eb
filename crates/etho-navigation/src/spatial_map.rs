//! [`SpatialMap`] – occupancy grid of the experimental arena.
//!
//! The arena is a polygon with optional excluded polygons (pillars, shelters,
//! walls between rooms).  It is rasterized once into a grid of square cells;
//! a cell is [`CellStatus::Free`] when its centre lies inside the arena and
//! outside every excluded polygon.
//!
//! ```text
//! cols = round((max_x − min_x) / cell_size)
//! rows = round((max_y − min_y) / cell_size)
//! centre(col, row) = (min_x + col·cell_size, min_y + row·cell_size)
//! ```
//!
//! On top of this *setup grid*, an area mask can be applied to restrict the
//! free space to a sub-region (used to keep a behavior model inside one
//! room).  Masks are rasterized once per id and cached.
//!
//! # Example
//!
//! ```rust
//! use etho_navigation::spatial_map::SpatialMap;
//! use etho_types::{PositionMeters, WorldPolygon};
//!
//! let arena = WorldPolygon::from_points(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
//! let pillar = WorldPolygon::from_points(&[(0.4, 0.4), (0.6, 0.4), (0.6, 0.6), (0.4, 0.6)]);
//! let map = SpatialMap::new(arena, vec![pillar], 0.02).unwrap();
//!
//! assert!(map.contains_point(&PositionMeters::new(0.2, 0.2)));
//! assert!(!map.contains_point(&PositionMeters::new(0.5, 0.5)));
//! assert!(!map.contains_point(&PositionMeters::new(2.0, 0.5)));
//! ```

use std::collections::HashMap;

use etho_types::{Bounds, EthoError, PositionMeters, WorldPolygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default grid resolution.
pub const DEFAULT_CELL_SIZE_M: f64 = 0.02;

/// Occupancy of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Free,
    Occupied,
}

impl CellStatus {
    pub fn is_free(self) -> bool {
        self == CellStatus::Free
    }
}

/// Grid coordinates of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridNode {
    pub col: usize,
    pub row: usize,
}

impl GridNode {
    pub fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

/// Serializable description of an arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialMapSettings {
    pub arena: WorldPolygon,
    #[serde(default)]
    pub excluded: Vec<WorldPolygon>,
    #[serde(default = "default_cell_size")]
    pub cell_size_m: f64,
}

fn default_cell_size() -> f64 {
    DEFAULT_CELL_SIZE_M
}

// ────────────────────────────────────────────────────────────────────────────
// SpatialMap
// ────────────────────────────────────────────────────────────────────────────

/// Rasterized arena with an optional area mask.
#[derive(Debug, Clone)]
pub struct SpatialMap {
    arena: WorldPolygon,
    excluded: Vec<WorldPolygon>,
    bounds: Bounds,
    cell_size: f64,
    cols: usize,
    rows: usize,
    /// Arena minus excluded polygons, row-major, `true` = free.
    setup_grid: Vec<bool>,
    /// `setup_grid` intersected with the active mask.
    current_grid: Vec<bool>,
    masks: HashMap<String, Vec<bool>>,
    current_mask: Option<String>,
}

impl SpatialMap {
    /// Rasterize `arena` minus `excluded` at `cell_size_m`.
    ///
    /// # Errors
    ///
    /// [`EthoError::ConfigMismatch`] when the arena has fewer than three
    /// vertices, the cell size is not a positive number, or the arena is
    /// smaller than one cell.
    pub fn new(arena: WorldPolygon, excluded: Vec<WorldPolygon>, cell_size_m: f64) -> Result<Self, EthoError> {
        if !(cell_size_m.is_finite() && cell_size_m > 0.0) {
            return Err(EthoError::config("spatial_map", format!("invalid cell size {cell_size_m}")));
        }
        let bounds = match arena.bounds() {
            Some(b) if !arena.is_empty() => b,
            _ => return Err(EthoError::config("spatial_map", "arena polygon needs at least three vertices")),
        };
        let cols = ((bounds.max_x - bounds.min_x) / cell_size_m).round() as usize;
        let rows = ((bounds.max_y - bounds.min_y) / cell_size_m).round() as usize;
        if cols == 0 || rows == 0 {
            return Err(EthoError::config(
                "spatial_map",
                format!("arena smaller than one {cell_size_m} m cell"),
            ));
        }

        let mut map = Self {
            arena,
            excluded,
            bounds,
            cell_size: cell_size_m,
            cols,
            rows,
            setup_grid: Vec::new(),
            current_grid: Vec::new(),
            masks: HashMap::new(),
            current_mask: None,
        };
        let setup = map.rasterize(std::slice::from_ref(&map.arena), &map.excluded);
        map.setup_grid = setup;
        map.current_grid = map.setup_grid.clone();
        info!(
            cols,
            rows,
            cell_size_m,
            free_cells = map.free_cell_count(),
            "spatial map built"
        );
        Ok(map)
    }

    pub fn from_settings(settings: &SpatialMapSettings) -> Result<Self, EthoError> {
        Self::new(settings.arena.clone(), settings.excluded.clone(), settings.cell_size_m)
    }

    pub fn arena(&self) -> &WorldPolygon {
        &self.arena
    }

    pub fn excluded(&self) -> &[WorldPolygon] {
        &self.excluded
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of free cells in the current (masked) grid.
    pub fn free_cell_count(&self) -> usize {
        self.current_grid.iter().filter(|&&free| free).count()
    }

    // ── Coordinates ─────────────────────────────────────────────────────────

    /// Signed grid coordinates of `position`; may lie outside the grid.
    fn raw_node(&self, position: &PositionMeters) -> (i64, i64) {
        (
            ((position.x - self.bounds.min_x) / self.cell_size).round() as i64,
            ((position.y - self.bounds.min_y) / self.cell_size).round() as i64,
        )
    }

    fn in_grid(&self, col: i64, row: i64) -> bool {
        col >= 0 && row >= 0 && (col as usize) < self.cols && (row as usize) < self.rows
    }

    /// Grid node nearest to `position`, clamped at zero.
    pub fn position_to_node(&self, position: &PositionMeters) -> GridNode {
        let (col, row) = self.raw_node(position);
        GridNode::new(col.max(0) as usize, row.max(0) as usize)
    }

    /// World position of the centre of `node`.
    pub fn node_to_position(&self, node: GridNode) -> PositionMeters {
        PositionMeters::new(
            self.bounds.min_x + node.col as f64 * self.cell_size,
            self.bounds.min_y + node.row as f64 * self.cell_size,
        )
    }

    fn index(&self, node: GridNode) -> Option<usize> {
        (node.col < self.cols && node.row < self.rows).then(|| node.row * self.cols + node.col)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Status of `node` in the current grid; outside the grid is occupied.
    pub fn cell_status(&self, node: GridNode) -> CellStatus {
        match self.index(node) {
            Some(i) if self.current_grid[i] => CellStatus::Free,
            _ => CellStatus::Occupied,
        }
    }

    /// Status of `node` in the unmasked setup grid.
    pub fn setup_cell_status(&self, node: GridNode) -> CellStatus {
        match self.index(node) {
            Some(i) if self.setup_grid[i] => CellStatus::Free,
            _ => CellStatus::Occupied,
        }
    }

    /// `true` when `position` falls on a free cell of the current grid.
    /// Positions outside the grid and invalid positions are never contained.
    pub fn contains_point(&self, position: &PositionMeters) -> bool {
        if !position.is_valid() {
            return false;
        }
        let (col, row) = self.raw_node(position);
        self.in_grid(col, row) && self.cell_status(GridNode::new(col as usize, row as usize)) == CellStatus::Free
    }

    /// Like [`contains_point`](Self::contains_point) but ignoring any mask.
    pub fn setup_contains_point(&self, position: &PositionMeters) -> bool {
        if !position.is_valid() {
            return false;
        }
        let (col, row) = self.raw_node(position);
        self.in_grid(col, row)
            && self.setup_cell_status(GridNode::new(col as usize, row as usize)) == CellStatus::Free
    }

    pub fn contains_node(&self, node: GridNode) -> bool {
        self.cell_status(node) == CellStatus::Free
    }

    // ── Masks ───────────────────────────────────────────────────────────────

    /// Restrict the free space to `polygons`.
    ///
    /// The mask grid for `mask_id` is computed on first use and reused after;
    /// re-applying the active mask is a no-op.
    pub fn set_area_mask(&mut self, mask_id: &str, polygons: &[WorldPolygon]) {
        if self.current_mask.as_deref() == Some(mask_id) {
            return;
        }
        if !self.masks.contains_key(mask_id) {
            let mask = self.rasterize(polygons, &[]);
            self.masks.insert(mask_id.to_string(), mask);
        }
        if let Some(mask) = self.masks.get(mask_id) {
            self.current_grid = self.setup_grid.iter().zip(mask).map(|(&s, &m)| s && m).collect();
        }
        self.current_mask = Some(mask_id.to_string());
        debug!(mask_id, free_cells = self.free_cell_count(), "area mask applied");
    }

    /// Restore the unmasked setup grid.
    pub fn clear_area_mask(&mut self) {
        if self.current_mask.take().is_some() {
            self.current_grid.clone_from(&self.setup_grid);
            debug!("area mask cleared");
        }
    }

    pub fn current_mask_id(&self) -> Option<&str> {
        self.current_mask.as_deref()
    }

    /// Free iff inside at least one of `including` and none of `excluded`.
    fn rasterize(&self, including: &[WorldPolygon], excluded: &[WorldPolygon]) -> Vec<bool> {
        let mut grid = Vec::with_capacity(self.cols * self.rows);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let p = self.node_to_position(GridNode::new(col, row));
                let free = including.iter().any(|poly| poly.contains_point(&p))
                    && !excluded.iter().any(|poly| poly.contains_point(&p));
                grid.push(free);
            }
        }
        grid
    }
}
