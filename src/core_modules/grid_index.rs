// THEORY:
// The `GridIndex` is the spatial bucketing layer of the stacker. It slices the
// working coordinate space into square cells of a fixed world size and maps any
// coordinate to the integer identity of the cell that holds it.
//
// Key architectural principles:
// 1.  **Origin Anchored**: The grid starts at the coordinate-system origin, not
//     at the query window. Cell boundaries therefore stay put while the map is
//     panned, and the same feature lands in the same cell on every request.
// 2.  **Integer Identity**: Cells are keyed by `(ix, iy)` as 64-bit integers.
//     Float coordinates never take part in a map lookup, so there is no
//     precision drift between two features that belong to the same cell.
// 3.  **Truncation, Not Floor**: Indices truncate toward zero. Cells touching
//     an axis on the negative side are therefore half the width of the others.
//     This asymmetry is accepted.
// 4.  **Pixel-Relative Sizing**: Callers usually think in output pixels. The
//     `from_window` constructor turns a pixel size into a world size using the
//     output window, so the aggregation looks the same at every zoom level.

use crate::error::{StackError, StackResult};
use geo::{Coord, Rect};

/// The integer identity of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub ix: i64,
    pub iy: i64,
}

/// Maps working-space coordinates onto a fixed, origin-anchored grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridIndex {
    /// Edge length of one square cell, in working-space units.
    cell_size: f64,
}

impl GridIndex {
    pub fn new(cell_size: f64) -> StackResult<Self> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(StackError::InvalidConfig(format!(
                "grid cell size must be a positive finite number, got {cell_size}"
            )));
        }
        Ok(Self { cell_size })
    }

    /// Builds a grid whose cells measure `cluster_size_px` pixels in an output
    /// image of `width_px` pixels covering `extent`.
    pub fn from_window(
        cluster_size_px: u32,
        extent: &Rect<f64>,
        width_px: u32,
    ) -> StackResult<Self> {
        if width_px == 0 {
            return Err(StackError::InvalidConfig("output width must be at least 1 pixel".into()));
        }
        Self::new(f64::from(cluster_size_px) * extent.width() / f64::from(width_px))
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Computes the cell holding `point`. `as` truncates toward zero and
    /// saturates at the `i64` range.
    pub fn cell_of(&self, point: Coord<f64>) -> CellId {
        CellId {
            ix: (point.x / self.cell_size) as i64,
            iy: (point.y / self.cell_size) as i64,
        }
    }

    /// The geometric center of a cell.
    pub fn cell_center(&self, cell: CellId) -> Coord<f64> {
        let half = self.cell_size / 2.0;
        Coord {
            x: cell.ix as f64 * self.cell_size + half,
            y: cell.iy as f64 * self.cell_size + half,
        }
    }
}
