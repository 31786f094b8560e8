use std::io::{BufWriter, Write};
use std::path::Path;

use jpeg_encoder::{ColorType, Encoder};

use crate::error::{Error, Result};
use crate::io::autoscale::autoscale_to_u8;
use crate::io::{persist, sibling_tempfile};
use crate::types::Product;

/// Writes an 8-bit grayscale quicklook of the first band.
pub fn write_jpeg(product: &Product, output: &Path) -> Result<()> {
    let info = &product.info;
    let data = product
        .bands
        .first()
        .ok_or_else(|| Error::Processing(format!("product '{}' has no bands", info.name)))?;
    if info.width > u16::MAX as usize || info.height > u16::MAX as usize {
        return Err(Error::UnsupportedFormat(format!(
            "JPEG cannot hold {}x{} pixels",
            info.width, info.height
        )));
    }
    let no_data = info.bands.first().and_then(|b| b.no_data);
    let gray = autoscale_to_u8(data, no_data);

    let mut tmp = sibling_tempfile(output)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let encoder = Encoder::new(&mut writer, 100);
        encoder.encode(&gray, info.width as u16, info.height as u16, ColorType::Luma)?;
        writer.flush()?;
    }
    persist(tmp, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BandInfo, ProductInfo};
    use ndarray::Array2;

    #[test]
    fn test_write_jpeg_quicklook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quick.jpg");
        let product = Product {
            info: ProductInfo::new("q", 16, 8, vec![BandInfo::new("b")]),
            bands: vec![Array2::from_shape_fn((8, 16), |(y, x)| (x + y) as f32)],
        };
        write_jpeg(&product, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        // Only the final file remains next to it.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
