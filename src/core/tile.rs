//! Rectangles, tiles and cache keys.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel rectangle in product coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle covering a whole `width x height` raster.
    pub const fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn right(&self) -> usize {
        self.x + self.width
    }

    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Rect::new(x, y, right - x, bottom - y))
    }

    /// Grows the rectangle by `border` pixels on every side, clamped to `bounds`.
    pub fn expand(&self, border: usize, bounds: &Rect) -> Rect {
        let x = self.x.saturating_sub(border).max(bounds.x);
        let y = self.y.saturating_sub(border).max(bounds.y);
        let right = (self.right() + border).min(bounds.right());
        let bottom = (self.bottom() + border).min(bounds.bottom());
        Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Shape of a sample buffer covering this rectangle: `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Splits a `width x height` raster into tiles of at most `tile_size` pixels
/// per side, row by row.
pub fn tile_grid(width: usize, height: usize, tile_size: usize) -> Vec<Rect> {
    let tile_size = tile_size.max(1);
    let mut rects = Vec::new();
    for y in (0..height).step_by(tile_size) {
        for x in (0..width).step_by(tile_size) {
            rects.push(Rect::new(
                x,
                y,
                tile_size.min(width - x),
                tile_size.min(height - y),
            ));
        }
    }
    rects
}

/// Stable handle of a node within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

/// Identity of a cached tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub execution: u64,
    pub node: NodeIndex,
    pub band: usize,
    pub rect: Rect,
}

impl TileKey {
    pub fn new(execution: u64, node: NodeIndex, band: usize, rect: Rect) -> Self {
        Self {
            execution,
            node,
            band,
            rect,
        }
    }
}

/// Computed samples of one band over one rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub rect: Rect,
    pub data: Array2<f32>,
}

impl Tile {
    pub fn new(rect: Rect, data: Array2<f32>) -> Result<Self> {
        if data.dim() != rect.shape() {
            return Err(Error::Processing(format!(
                "tile data shape {:?} does not match rectangle {}",
                data.dim(),
                rect
            )));
        }
        Ok(Self { rect, data })
    }

    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Sample at absolute product coordinates.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x < self.rect.x || y < self.rect.y {
            return None;
        }
        self.data.get((y - self.rect.y, x - self.rect.x)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_grid_covers_raster_exactly() {
        let rects = tile_grid(10, 7, 4);
        assert_eq!(rects.len(), 6);
        assert_eq!(rects[0], Rect::new(0, 0, 4, 4));
        assert_eq!(rects[2], Rect::new(8, 0, 2, 4));
        assert_eq!(rects[5], Rect::new(8, 4, 2, 3));
        assert_eq!(rects.iter().map(Rect::area).sum::<usize>(), 70);
    }

    #[test]
    fn test_expand_is_clamped() {
        let bounds = Rect::full(10, 10);
        assert_eq!(Rect::new(0, 0, 4, 4).expand(2, &bounds), Rect::new(0, 0, 6, 6));
        assert_eq!(Rect::new(4, 4, 4, 4).expand(1, &bounds), Rect::new(3, 3, 6, 6));
        assert_eq!(Rect::new(8, 8, 2, 2).expand(3, &bounds), Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn test_intersection() {
        let a = Rect::new(0, 0, 5, 5);
        assert_eq!(a.intersection(&Rect::new(3, 3, 5, 5)), Some(Rect::new(3, 3, 2, 2)));
        assert_eq!(a.intersection(&Rect::new(5, 0, 2, 2)), None);
    }

    #[test]
    fn test_tile_shape_checked() {
        let rect = Rect::new(2, 3, 4, 2);
        assert!(Tile::new(rect, Array2::zeros((2, 4))).is_ok());
        assert!(Tile::new(rect, Array2::zeros((4, 2))).is_err());
    }

    #[test]
    fn test_tile_get_uses_absolute_coordinates() {
        let rect = Rect::new(2, 3, 2, 2);
        let tile = Tile::new(rect, Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap()).unwrap();
        assert_eq!(tile.get(3, 4), Some(4.0));
        assert_eq!(tile.get(0, 0), None);
        assert_eq!(tile.byte_size(), 16);
    }
}
