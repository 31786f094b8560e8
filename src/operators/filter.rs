use std::str::FromStr;

use ndarray::Array2;

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::types::ProductInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    Mean,
    Median,
}

impl FromStr for FilterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "boxcar" => Ok(FilterKind::Mean),
            "median" => Ok(FilterKind::Median),
            _ => Err(Error::InvalidParameter {
                param: "filterType".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Moving-window filter over every band. Windows are clipped at the product
/// edges; non-finite and no-data samples are left out of each window.
#[derive(Default)]
pub struct ImageFilterOp {
    kind: FilterKind,
    size: usize,
    no_data: Vec<Option<f32>>,
}

impl ImageFilterOp {
    fn filter(&self, source: &Array2<f32>, source_rect: Rect, rect: Rect, band: usize) -> Array2<f32> {
        let half = self.size / 2;
        let no_data = self.no_data.get(band).copied().flatten();
        let mut window = Vec::with_capacity(self.size * self.size);

        Array2::from_shape_fn(rect.shape(), |(row, col)| {
            let (x, y) = (rect.x + col, rect.y + row);
            let x0 = x.saturating_sub(half).max(source_rect.x);
            let y0 = y.saturating_sub(half).max(source_rect.y);
            let x1 = (x + half + 1).min(source_rect.right());
            let y1 = (y + half + 1).min(source_rect.bottom());

            window.clear();
            for sy in y0..y1 {
                for sx in x0..x1 {
                    let v = source[[sy - source_rect.y, sx - source_rect.x]];
                    if v.is_finite() && no_data != Some(v) {
                        window.push(v);
                    }
                }
            }
            if window.is_empty() {
                return no_data.unwrap_or(0.0);
            }
            match self.kind {
                FilterKind::Mean => window.iter().sum::<f32>() / window.len() as f32,
                FilterKind::Median => {
                    window.sort_by(f32::total_cmp);
                    window[window.len() / 2]
                }
            }
        })
    }
}

impl Operator for ImageFilterOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let source = ctx.source(0)?;
        self.kind = ctx.parse_param("filterType")?.unwrap_or_default();
        self.size = ctx.parse_param("filterSize")?.unwrap_or(3);
        if self.size == 0 || self.size % 2 == 0 {
            return Err(Error::InvalidParameter {
                param: "filterSize".into(),
                value: self.size.to_string(),
            });
        }
        self.no_data = source.info.bands.iter().map(|b| b.no_data).collect();
        Ok(source.info.as_ref().clone())
    }

    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let bounds = Rect::full(ctx.target().width, ctx.target().height);
        let source_rect = rect.expand(self.size / 2, &bounds);
        let source = ctx.source_tile(0, band, source_rect)?;
        Ok(self.filter(&source.data, source_rect, rect, band))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{Array2, array};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::graph::{Config, Graph, Node};
    use crate::io::MemoryIo;
    use crate::operators::testing::{output, product, read_node, run, write_node};

    fn op(kind: FilterKind, size: usize) -> ImageFilterOp {
        ImageFilterOp {
            kind,
            size,
            no_data: vec![None],
        }
    }

    #[test]
    fn test_mean_clips_at_edges() {
        let source = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let full = Rect::full(3, 3);
        let out = op(FilterKind::Mean, 3).filter(&source, full, full, 0);
        assert_eq!(out[[1, 1]], 5.0);
        assert_eq!(out[[0, 0]], 3.0);
        assert_eq!(out[[2, 2]], 7.0);
    }

    #[test]
    fn test_median_ignores_outlier() {
        let source = array![[1.0, 1.0, 1.0], [1.0, 100.0, 1.0], [1.0, 1.0, 1.0]];
        let full = Rect::full(3, 3);
        let out = op(FilterKind::Median, 3).filter(&source, full, full, 0);
        assert_eq!(out[[1, 1]], 1.0);
    }

    #[test]
    fn test_filter_type_parsing() {
        assert_eq!("Median".parse::<FilterKind>().unwrap(), FilterKind::Median);
        assert!("Gauss".parse::<FilterKind>().is_err());
    }

    #[test]
    fn test_tiled_result_matches_whole_image() {
        let data = Array2::from_shape_fn((11, 9), |(y, x)| ((x * 7 + y * 13) % 17) as f32);
        let io = Arc::new(MemoryIo::new());
        io.insert("in.dim", product("in", &[("b", data.clone())]));

        let mut graph = Graph::new();
        graph.add_node(read_node("read", "in.dim")).unwrap();
        graph
            .add_node(
                Node::new("filter", "Image-Filter")
                    .with_config(Config::new().with("filterSize", "5"))
                    .with_source("sourceProduct", "read"),
            )
            .unwrap();
        graph.add_node(write_node("write", "filter", "out.dim")).unwrap();

        let io = run(io, &graph).unwrap();
        let full = Rect::full(9, 11);
        let expected = op(FilterKind::Mean, 5).filter(&data, full, full, 0);
        assert_eq!(output(&io, "out.dim").bands[0], expected);
    }

    #[test]
    fn test_even_window_is_rejected() {
        let io = Arc::new(MemoryIo::new());
        io.insert("in.dim", product("in", &[("b", Array2::zeros((4, 4)))]));
        let mut graph = Graph::new();
        graph.add_node(read_node("read", "in.dim")).unwrap();
        graph
            .add_node(
                Node::new("filter", "Image-Filter")
                    .with_config(Config::new().with("filterSize", "4"))
                    .with_source("sourceProduct", "read"),
            )
            .unwrap();
        assert!(run(io, &graph).is_err());
    }
}
