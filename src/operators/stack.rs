use std::collections::HashSet;

use ndarray::Array2;

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::types::ProductInfo;

/// Stacks the bands of all sources, in source order, cropped to the extent
/// every source covers. Duplicate band names get the source node id appended.
#[derive(Default)]
pub struct CreateStackOp {
    /// Output band -> (source index, source band).
    band_map: Vec<(usize, usize)>,
}

impl Operator for CreateStackOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let master = ctx.source(0)?;
        let width = ctx.sources.iter().map(|s| s.info.width).min().unwrap_or(0);
        let height = ctx.sources.iter().map(|s| s.info.height).min().unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(Error::Processing("sources have no common extent".into()));
        }

        let mut info = master.info.as_ref().clone();
        info.width = width;
        info.height = height;
        info.bands.clear();
        self.band_map.clear();

        let mut names = HashSet::new();
        for (s, source) in ctx.sources.iter().enumerate() {
            for (b, band) in source.info.bands.iter().enumerate() {
                let mut band = band.clone();
                if !names.insert(band.name.clone()) {
                    band.name = format!("{}_{}", band.name, source.node_id);
                    names.insert(band.name.clone());
                }
                info.bands.push(band);
                self.band_map.push((s, b));
            }
        }
        Ok(info)
    }

    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let &(source, source_band) = self
            .band_map
            .get(band)
            .ok_or_else(|| Error::Processing(format!("band {band} out of range")))?;
        let tile = ctx.source_tile(source, source_band, rect)?;
        Ok(tile.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::Array2;
    use pretty_assertions::assert_eq;

    use crate::graph::{Graph, Node};
    use crate::io::MemoryIo;
    use crate::operators::testing::{output, product, read_node, run, write_node};

    #[test]
    fn test_stack_common_extent() {
        let io = Arc::new(MemoryIo::new());
        io.insert("m.dim", product("m", &[("VV", Array2::from_elem((6, 8), 1.0))]));
        io.insert(
            "s.dim",
            product(
                "s",
                &[
                    ("VV", Array2::from_elem((5, 9), 2.0)),
                    ("VH", Array2::from_elem((5, 9), 3.0)),
                ],
            ),
        );

        let mut graph = Graph::new();
        graph.add_node(read_node("master", "m.dim")).unwrap();
        graph.add_node(read_node("slave", "s.dim")).unwrap();
        graph
            .add_node(
                Node::new("stack", "CreateStack")
                    .with_source("sourceProduct", "master")
                    .with_source("sourceProduct.1", "slave"),
            )
            .unwrap();
        graph.add_node(write_node("write", "stack", "out.dim")).unwrap();

        let io = run(io, &graph).unwrap();
        let out = output(&io, "out.dim");
        assert_eq!((out.info.width, out.info.height), (8, 5));
        assert_eq!(out.info.band_names(), vec!["VV", "VV_slave", "VH"]);
        assert!(out.bands[1].iter().all(|&v| v == 2.0));
        assert!(out.bands[2].iter().all(|&v| v == 3.0));
    }
}
