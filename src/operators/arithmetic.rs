use std::str::FromStr;

use ndarray::{Array2, Zip};

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::types::{BandInfo, ProductInfo};

const EPSILON: f32 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Sum,
    Difference,
    Ratio,
    NormalizedDiff,
    LogRatio,
}

impl ArithmeticOp {
    pub fn name(&self) -> &'static str {
        match self {
            ArithmeticOp::Sum => "sum",
            ArithmeticOp::Difference => "difference",
            ArithmeticOp::Ratio => "ratio",
            ArithmeticOp::NormalizedDiff => "normalized_diff",
            ArithmeticOp::LogRatio => "log_ratio",
        }
    }

    /// Combines one pair of samples. Division by (near) zero yields 0.
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            ArithmeticOp::Sum => a + b,
            ArithmeticOp::Difference => a - b,
            ArithmeticOp::Ratio => {
                if b.abs() > EPSILON {
                    a / b
                } else {
                    0.0
                }
            }
            ArithmeticOp::NormalizedDiff => {
                let sum = a + b;
                if sum.abs() > EPSILON {
                    (a - b) / sum
                } else {
                    0.0
                }
            }
            // 10 * log10(|a/b|), in dB
            ArithmeticOp::LogRatio => {
                if b.abs() > EPSILON {
                    10.0 * (a / b).abs().max(EPSILON).log10()
                } else {
                    0.0
                }
            }
        }
    }

    fn unit(&self) -> Option<&'static str> {
        match self {
            ArithmeticOp::LogRatio => Some("dB"),
            _ => None,
        }
    }
}

impl FromStr for ArithmeticOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(ArithmeticOp::Sum),
            "difference" | "diff" => Ok(ArithmeticOp::Difference),
            "ratio" => Ok(ArithmeticOp::Ratio),
            "normalized_diff" | "normalized-diff" => Ok(ArithmeticOp::NormalizedDiff),
            "log_ratio" | "log-ratio" => Ok(ArithmeticOp::LogRatio),
            _ => Err(Error::InvalidParameter {
                param: "operation".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Band-by-band combination of two equally sized source products. Output band
/// `i` combines band `i` of the first source with band `i` of the second.
pub struct BandArithmeticOp {
    op: ArithmeticOp,
}

impl Default for BandArithmeticOp {
    fn default() -> Self {
        Self {
            op: ArithmeticOp::Sum,
        }
    }
}

impl Operator for BandArithmeticOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let a = ctx.source(0)?;
        let b = ctx.source(1)?;
        if (a.info.width, a.info.height) != (b.info.width, b.info.height) {
            return Err(Error::Processing(format!(
                "sources '{}' ({}x{}) and '{}' ({}x{}) differ in size",
                a.node_id, a.info.width, a.info.height, b.node_id, b.info.width, b.info.height
            )));
        }
        self.op = ctx.require_param("operation")?.parse()?;

        let count = a.info.band_count().min(b.info.band_count());
        if count == 0 {
            return Err(Error::Processing("sources share no bands".into()));
        }
        let prefix = ctx.param("targetBand");
        let bands = (0..count)
            .map(|i| {
                let name = match prefix {
                    Some(p) if count == 1 => p.to_string(),
                    Some(p) => format!("{p}_{}", i + 1),
                    None => format!("{}_{}", a.info.bands[i].name, self.op.name()),
                };
                let mut band = BandInfo::new(&name);
                band.unit = self.op.unit().map(str::to_string);
                band
            })
            .collect();

        let mut info = a.info.as_ref().clone();
        info.name = format!("{}_{}", a.info.name, self.op.name());
        info.bands = bands;
        Ok(info)
    }

    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let a = ctx.source_tile(0, band, rect)?;
        let b = ctx.source_tile(1, band, rect)?;
        let op = self.op;
        Ok(Zip::from(&a.data)
            .and(&b.data)
            .map_collect(|&x, &y| op.apply(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{Array2, array};

    use super::*;
    use crate::graph::{Config, Graph, Node};
    use crate::io::MemoryIo;
    use crate::operators::testing::{output, product, read_node, run, write_node};

    #[test]
    fn test_formulas() {
        assert_eq!(ArithmeticOp::Sum.apply(2.0, 3.0), 5.0);
        assert_eq!(ArithmeticOp::Difference.apply(2.0, 3.0), -1.0);
        assert_eq!(ArithmeticOp::Ratio.apply(6.0, 3.0), 2.0);
        assert_eq!(ArithmeticOp::Ratio.apply(6.0, 0.0), 0.0);
        assert_eq!(ArithmeticOp::NormalizedDiff.apply(3.0, 1.0), 0.5);
        assert_eq!(ArithmeticOp::NormalizedDiff.apply(1.0, -1.0), 0.0);
        assert!((ArithmeticOp::LogRatio.apply(100.0, 1.0) - 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(
            "Normalized_Diff".parse::<ArithmeticOp>().unwrap(),
            ArithmeticOp::NormalizedDiff
        );
        assert!("product".parse::<ArithmeticOp>().is_err());
    }

    fn graph(operation: &str) -> Graph {
        let mut graph = Graph::new();
        graph.add_node(read_node("a", "a.dim")).unwrap();
        graph.add_node(read_node("b", "b.dim")).unwrap();
        graph
            .add_node(
                Node::new("calc", "Band-Arithmetic")
                    .with_config(Config::new().with("operation", operation))
                    .with_source("sourceProduct", "a")
                    .with_source("sourceProduct.1", "b"),
            )
            .unwrap();
        graph.add_node(write_node("write", "calc", "out.dim")).unwrap();
        graph
    }

    #[test]
    fn test_ratio_of_two_products() {
        let io = Arc::new(MemoryIo::new());
        io.insert("a.dim", product("a", &[("VV", array![[4.0, 9.0], [1.0, 0.0]])]));
        io.insert("b.dim", product("b", &[("VH", array![[2.0, 3.0], [0.0, 5.0]])]));

        let io = run(io, &graph("ratio")).unwrap();
        let out = output(&io, "out.dim");
        assert_eq!(out.info.band_names(), vec!["VV_ratio"]);
        assert_eq!(out.bands[0], array![[2.0, 3.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let io = Arc::new(MemoryIo::new());
        io.insert("a.dim", product("a", &[("VV", Array2::zeros((2, 2)))]));
        io.insert("b.dim", product("b", &[("VH", Array2::zeros((3, 2)))]));
        assert!(run(io.clone(), &graph("sum")).is_err());
        assert!(io.writes().is_empty());
    }
}
