use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array2, s};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::io::{RasterIo, resolve_format};
use crate::types::{Disposal, Product, ProductFormat, ProductInfo};

/// Terminal node: collects every tile of its source and writes the product
/// once, when the execution completes.
#[derive(Default)]
pub struct WriteOp {
    target: PathBuf,
    format: Option<ProductFormat>,
    info: Option<ProductInfo>,
    io: Option<Arc<dyn RasterIo>>,
    bands: Mutex<Vec<Array2<f32>>>,
}

impl Operator for WriteOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let source = ctx.source(0)?;
        self.target = PathBuf::from(ctx.require_param("file")?.trim());
        self.format = Some(match ctx.param("formatName") {
            Some(name) => name.parse()?,
            None => resolve_format(&self.target, None).unwrap_or(ProductFormat::BeamDimap),
        });

        let info = source.info.as_ref().clone();
        *self.bands.lock() = (0..info.band_count())
            .map(|_| Array2::zeros((info.height, info.width)))
            .collect();
        self.io = Some(ctx.io());
        self.info = Some(info.clone());
        Ok(info)
    }

    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let tile = ctx.source_tile(0, band, rect)?;
        let mut bands = self.bands.lock();
        let target = bands
            .get_mut(band)
            .ok_or_else(|| Error::Processing(format!("band {band} out of range")))?;
        target
            .slice_mut(s![rect.y..rect.bottom(), rect.x..rect.right()])
            .assign(&tile.data);
        Ok(tile.data.clone())
    }

    fn dispose(&mut self, disposal: Disposal) -> Result<()> {
        let bands = std::mem::take(&mut *self.bands.lock());
        let (Some(info), Some(io), Some(format)) = (self.info.take(), self.io.take(), self.format)
        else {
            return Ok(());
        };
        if disposal == Disposal::Aborted {
            warn!(path = %self.target.display(), "Execution aborted, product not written");
            return Ok(());
        }
        let written = io.write_product(&Product { info, bands }, &self.target, format)?;
        info!(path = %written.display(), %format, "Product written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::Array2;
    use pretty_assertions::assert_eq;

    use crate::graph::{Config, Graph, Node};
    use crate::io::MemoryIo;
    use crate::operators::testing::{output, product, read_node, run, write_node};
    use crate::types::ProductFormat;

    #[test]
    fn test_write_assembles_all_tiles() {
        let data = Array2::from_shape_fn((9, 10), |(y, x)| (y * 10 + x) as f32);
        let io = Arc::new(MemoryIo::new());
        io.insert("in.dim", product("in", &[("b", data.clone())]));

        let mut graph = Graph::new();
        graph.add_node(read_node("read", "in.dim")).unwrap();
        graph.add_node(write_node("write", "read", "out/result")).unwrap();

        let io = run(io, &graph).unwrap();
        assert_eq!(io.writes().len(), 1);
        assert_eq!(io.writes()[0].1, ProductFormat::BeamDimap);
        assert_eq!(output(&io, "out/result.dim").bands[0], data);
    }

    #[test]
    fn test_explicit_format() {
        let io = Arc::new(MemoryIo::new());
        io.insert("in.dim", product("in", &[("b", Array2::zeros((2, 2)))]));

        let mut graph = Graph::new();
        graph.add_node(read_node("read", "in.dim")).unwrap();
        graph
            .add_node(
                Node::new("write", "Write")
                    .with_config(Config::new().with("file", "q").with("formatName", "GeoTIFF"))
                    .with_source("sourceProduct", "read"),
            )
            .unwrap();

        let io = run(io, &graph).unwrap();
        assert_eq!(io.writes()[0].0, std::path::PathBuf::from("q.tif"));
    }
}
