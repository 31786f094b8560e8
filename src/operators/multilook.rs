use ndarray::Array2;

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::types::ProductInfo;

/// Block averaging of `nRgLooks x nAzLooks` source pixels into one output
/// pixel. Trailing source columns and rows that do not fill a block are dropped.
pub struct MultilookOp {
    range_looks: usize,
    azimuth_looks: usize,
    no_data: Vec<Option<f32>>,
}

impl Default for MultilookOp {
    fn default() -> Self {
        Self {
            range_looks: 1,
            azimuth_looks: 1,
            no_data: Vec::new(),
        }
    }
}

impl Operator for MultilookOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let source = ctx.source(0)?;
        self.range_looks = ctx.parse_param("nRgLooks")?.unwrap_or(1);
        self.azimuth_looks = ctx.parse_param("nAzLooks")?.unwrap_or(1);
        for (param, looks) in [("nRgLooks", self.range_looks), ("nAzLooks", self.azimuth_looks)] {
            if looks == 0 {
                return Err(Error::InvalidParameter {
                    param: param.into(),
                    value: looks.to_string(),
                });
            }
        }

        let mut info = source.info.as_ref().clone();
        info.width /= self.range_looks;
        info.height /= self.azimuth_looks;
        if info.width == 0 || info.height == 0 {
            return Err(Error::Processing(format!(
                "{}x{} looks exceed the {}x{} source",
                self.range_looks, self.azimuth_looks, source.info.width, source.info.height
            )));
        }
        if let Some(gt) = info.geotransform.as_mut() {
            let (rg, az) = (self.range_looks as f64, self.azimuth_looks as f64);
            gt[1] *= rg;
            gt[4] *= rg;
            gt[2] *= az;
            gt[5] *= az;
        }
        self.no_data = info.bands.iter().map(|b| b.no_data).collect();
        Ok(info)
    }

    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let (rg, az) = (self.range_looks, self.azimuth_looks);
        let source_rect = Rect::new(rect.x * rg, rect.y * az, rect.width * rg, rect.height * az);
        let source = ctx.source_tile(0, band, source_rect)?;
        let no_data = self.no_data.get(band).copied().flatten();

        Ok(Array2::from_shape_fn(rect.shape(), |(row, col)| {
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for y in row * az..(row + 1) * az {
                for x in col * rg..(col + 1) * rg {
                    let v = source.data[[y, x]];
                    if v.is_finite() && no_data != Some(v) {
                        sum += v as f64;
                        count += 1;
                    }
                }
            }
            if count == 0 {
                no_data.unwrap_or(0.0)
            } else {
                (sum / count as f64) as f32
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{Array2, array};
    use pretty_assertions::assert_eq;

    use crate::graph::{Config, Graph, Node};
    use crate::io::MemoryIo;
    use crate::operators::testing::{output, product, read_node, run, write_node};

    fn run_looks(data: Array2<f32>, rg: &str, az: &str) -> crate::error::Result<Arc<crate::types::Product>> {
        let io = Arc::new(MemoryIo::new());
        let mut source = product("in", &[("b", data)]);
        source.info.geotransform = Some([0.0, 10.0, 0.0, 0.0, 0.0, -10.0]);
        io.insert("in.dim", source);

        let mut graph = Graph::new();
        graph.add_node(read_node("read", "in.dim")).unwrap();
        graph
            .add_node(
                Node::new("ml", "Multilook")
                    .with_config(Config::new().with("nRgLooks", rg).with("nAzLooks", az))
                    .with_source("sourceProduct", "read"),
            )
            .unwrap();
        graph.add_node(write_node("write", "ml", "out.dim")).unwrap();
        let io = run(io, &graph)?;
        Ok(output(&io, "out.dim"))
    }

    #[test]
    fn test_block_average() {
        let data = array![
            [1.0, 3.0, 5.0, 7.0, 9.0],
            [1.0, 3.0, 5.0, 7.0, 9.0],
            [2.0, 2.0, 2.0, 2.0, 2.0],
        ];
        let out = run_looks(data, "2", "2").unwrap();
        assert_eq!((out.info.width, out.info.height), (2, 1));
        assert_eq!(out.bands[0], array![[2.0, 6.0]]);
        assert_eq!(
            out.info.geotransform,
            Some([0.0, 20.0, 0.0, 0.0, 0.0, -20.0])
        );
    }

    #[test]
    fn test_large_product_spans_several_tiles() {
        let data = Array2::from_elem((20, 18), 4.0);
        let out = run_looks(data, "3", "2").unwrap();
        assert_eq!((out.info.width, out.info.height), (6, 10));
        assert!(out.bands[0].iter().all(|&v| v == 4.0));
    }

    #[test]
    fn test_looks_larger_than_source() {
        assert!(run_looks(Array2::zeros((2, 2)), "3", "1").is_err());
        assert!(run_looks(Array2::zeros((2, 2)), "0", "1").is_err());
    }
}
