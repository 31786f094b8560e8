use ndarray::Array2;

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::Result;
use crate::types::{BandInfo, ProductInfo};

const DB_UNIT: &str = "dB";
const DB_SUFFIX: &str = "_db";

/// Floor applied before taking the logarithm of non-positive samples.
const MIN_LINEAR: f32 = 1e-10;

pub fn linear_to_db(v: f32) -> f32 {
    10.0 * v.max(MIN_LINEAR).log10()
}

pub fn db_to_linear(v: f32) -> f32 {
    10f32.powf(v / 10.0)
}

/// Converts linear bands to dB and dB bands (unit `dB`) back to linear.
#[derive(Default)]
pub struct LinearToFromDbOp {
    /// Per output band: true when the source band is in dB.
    from_db: Vec<bool>,
}

fn converted_band(band: &BandInfo, from_db: bool) -> BandInfo {
    let mut out = band.clone();
    if from_db {
        out.name = band
            .name
            .strip_suffix(DB_SUFFIX)
            .unwrap_or(&band.name)
            .to_string();
        out.unit = None;
    } else {
        out.name = format!("{}{DB_SUFFIX}", band.name);
        out.unit = Some(DB_UNIT.to_string());
    }
    out.no_data = band.no_data.map(|nd| {
        if from_db {
            db_to_linear(nd)
        } else {
            linear_to_db(nd)
        }
    });
    out
}

impl Operator for LinearToFromDbOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let source = ctx.source(0)?;
        let mut info = source.info.as_ref().clone();
        self.from_db = info
            .bands
            .iter()
            .map(|b| b.unit.as_deref() == Some(DB_UNIT))
            .collect();
        info.bands = info
            .bands
            .iter()
            .zip(&self.from_db)
            .map(|(b, &from_db)| converted_band(b, from_db))
            .collect();
        Ok(info)
    }

    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let source = ctx.source_tile(0, band, rect)?;
        let no_data = ctx.sources()[0].info.bands[band].no_data;
        let convert: fn(f32) -> f32 = if self.from_db[band] {
            db_to_linear
        } else {
            linear_to_db
        };
        let target_no_data = ctx.target().bands[band].no_data;
        Ok(source.data.mapv(|v| match (no_data, target_no_data) {
            (Some(nd), Some(out)) if v == nd => out,
            _ => convert(v),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::array;

    use super::*;
    use crate::graph::{Graph, Node};
    use crate::io::MemoryIo;
    use crate::operators::testing::{output, product, read_node, run, write_node};

    #[test]
    fn test_conversions() {
        assert!((linear_to_db(100.0) - 20.0).abs() < 1e-5);
        assert!((linear_to_db(0.0) + 100.0).abs() < 1e-3);
        assert!((db_to_linear(-10.0) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_through_graph() {
        let io = Arc::new(MemoryIo::new());
        io.insert(
            "in.dim",
            product("in", &[("Sigma0_VV", array![[1.0, 10.0], [100.0, 0.5]])]),
        );
        let mut graph = Graph::new();
        graph.add_node(read_node("read", "in.dim")).unwrap();
        graph
            .add_node(Node::new("todb", "LinearToFromdB").with_source("sourceProduct", "read"))
            .unwrap();
        graph
            .add_node(Node::new("back", "LinearToFromdB").with_source("sourceProduct", "todb"))
            .unwrap();
        graph.add_node(write_node("w_db", "todb", "db.dim")).unwrap();
        graph.add_node(write_node("w_lin", "back", "lin.dim")).unwrap();

        let io = run(io, &graph).unwrap();
        let db = output(&io, "db.dim");
        assert_eq!(db.info.bands[0].name, "Sigma0_VV_db");
        assert_eq!(db.info.bands[0].unit.as_deref(), Some("dB"));
        assert!((db.bands[0][[1, 0]] - 20.0).abs() < 1e-5);

        let lin = output(&io, "lin.dim");
        assert_eq!(lin.info.bands[0].name, "Sigma0_VV");
        assert!((lin.bands[0][[0, 1]] - 10.0).abs() < 1e-4);
        assert!((lin.bands[0][[1, 1]] - 0.5).abs() < 1e-5);
    }
}
