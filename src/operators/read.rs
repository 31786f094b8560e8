use std::path::Path;

use ndarray::Array2;
use tracing::debug;

use crate::core::operator::{InitContext, Operator, TileContext};
use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::io::ProductReader;
use crate::types::{Disposal, ProductFormat, ProductInfo};

/// Leaf node: serves tiles straight from an opened product.
#[derive(Default)]
pub struct ReadOp {
    reader: Option<Box<dyn ProductReader>>,
    /// Output band -> band of the opened product.
    band_map: Vec<usize>,
}

impl ReadOp {
    fn reader(&self) -> Result<&dyn ProductReader> {
        self.reader
            .as_deref()
            .ok_or_else(|| Error::Processing("read operator used before initialize".into()))
    }
}

impl Operator for ReadOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        let file = ctx.require_param("file")?;
        let format = ctx
            .param("formatName")
            .map(str::parse::<ProductFormat>)
            .transpose()?;
        let reader = ctx.io.open_product(Path::new(file.trim()), format)?;
        let source = reader.info();

        self.band_map = match ctx.param("bandNames") {
            None => (0..source.band_count()).collect(),
            Some(names) => names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| {
                    source.band_index(n).ok_or_else(|| Error::InvalidParameter {
                        param: "bandNames".into(),
                        value: n.to_string(),
                    })
                })
                .collect::<Result<_>>()?,
        };

        let mut info = source.clone();
        info.bands = self
            .band_map
            .iter()
            .map(|&b| source.bands[b].clone())
            .collect();
        debug!(node = ctx.node_id, file, bands = info.band_count(), "Product opened");
        self.reader = Some(reader);
        Ok(info)
    }

    fn compute_tile(&self, _ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let source_band = *self
            .band_map
            .get(band)
            .ok_or_else(|| Error::Processing(format!("band {band} out of range")))?;
        self.reader()?.read_tile(source_band, rect)
    }

    fn dispose(&mut self, _disposal: Disposal) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// Placeholder for a list of input files. Graphs must be rewritten before they
/// run, which replaces every such node with one `Read` node per file.
pub struct ProductSetReaderOp;

impl Operator for ProductSetReaderOp {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo> {
        Err(Error::Processing(format!(
            "product set '{}' was not expanded before execution",
            ctx.node_id
        )))
    }

    fn compute_tile(&self, _ctx: &TileContext<'_>, _band: usize, _rect: Rect) -> Result<Array2<f32>> {
        Err(Error::Processing("product sets cannot compute tiles".into()))
    }
}
