//! Raster I/O collaborators.
//!
//! Operators never touch files directly: `Read` opens products through a
//! [`RasterIo`] and `Write` hands a fully materialized [`Product`] back to it.
//! [`FileIo`] is the file-system implementation for BEAM-DIMAP, GeoTIFF and
//! JPEG (write only). Every write lands in a temporary file next to the target
//! and is persisted only once it has been written completely.
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array2, s};
use tracing::info;

use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::types::{Product, ProductFormat, ProductInfo};

pub mod autoscale;
pub mod dimap;
pub mod geotiff;
pub mod jpeg;
pub mod memory;

pub use memory::MemoryIo;

/// An opened input product.
pub trait ProductReader: Send + Sync {
    fn info(&self) -> &ProductInfo;

    /// Samples of `band` over `rect`, shaped `(rect.height, rect.width)`.
    fn read_tile(&self, band: usize, rect: Rect) -> Result<Array2<f32>>;
}

pub trait RasterIo: Send + Sync {
    /// Opens `path`, inferring the format from its extension when `format` is `None`.
    fn open_product(&self, path: &Path, format: Option<ProductFormat>) -> Result<Box<dyn ProductReader>>;

    /// Writes `product` and returns the path actually written.
    fn write_product(&self, product: &Product, path: &Path, format: ProductFormat) -> Result<PathBuf>;
}

/// File-system backed [`RasterIo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileIo;

impl RasterIo for FileIo {
    fn open_product(&self, path: &Path, format: Option<ProductFormat>) -> Result<Box<dyn ProductReader>> {
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("product not found: {}", path.display()),
            )));
        }
        let format = resolve_format(path, format)?;
        info!(path = %path.display(), %format, "Opening product");
        match format {
            ProductFormat::BeamDimap => Ok(Box::new(dimap::DimapReader::open(path)?)),
            ProductFormat::GeoTiff => Ok(Box::new(geotiff::read_geotiff(path)?)),
            ProductFormat::Jpeg => Err(Error::UnsupportedFormat(
                "JPEG is a write-only quicklook format".into(),
            )),
        }
    }

    fn write_product(&self, product: &Product, path: &Path, format: ProductFormat) -> Result<PathBuf> {
        check_product(product)?;
        let target = target_path(path, format);
        if let Some(parent) = parent_dir(&target) {
            fs::create_dir_all(parent)?;
        }
        match format {
            ProductFormat::BeamDimap => dimap::write_dimap(product, &target)?,
            ProductFormat::GeoTiff => geotiff::write_geotiff(product, &target)?,
            ProductFormat::Jpeg => jpeg::write_jpeg(product, &target)?,
        }
        info!(
            path = %target.display(),
            %format,
            width = product.info.width,
            height = product.info.height,
            bands = product.info.band_count(),
            "Wrote product"
        );
        Ok(target)
    }
}

/// Explicit format, or the one implied by the file extension.
pub fn resolve_format(path: &Path, format: Option<ProductFormat>) -> Result<ProductFormat> {
    format
        .or_else(|| ProductFormat::from_path(path))
        .ok_or_else(|| {
            Error::UnsupportedFormat(format!(
                "cannot infer product format of {}",
                path.display()
            ))
        })
}

/// Appends the format's extension to paths that have none.
pub fn target_path(path: &Path, format: ProductFormat) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(format.extension())
    }
}

/// Directory holding `path`, or `None` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// Temporary file in the target's directory, to be persisted over `target`.
pub(crate) fn sibling_tempfile(target: &Path) -> Result<tempfile::NamedTempFile> {
    let dir = parent_dir(target).unwrap_or(Path::new("."));
    let stem = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("product");
    let tmp = tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    Ok(tmp)
}

pub(crate) fn persist(tmp: tempfile::NamedTempFile, target: &Path) -> Result<()> {
    tmp.persist(target).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn check_product(product: &Product) -> Result<()> {
    let info = &product.info;
    if product.bands.len() != info.band_count() {
        return Err(Error::Processing(format!(
            "product '{}' declares {} bands but carries {}",
            info.name,
            info.band_count(),
            product.bands.len()
        )));
    }
    for (band, data) in product.info.bands.iter().zip(&product.bands) {
        if data.dim() != (info.height, info.width) {
            return Err(Error::Processing(format!(
                "band '{}' is {:?}, expected {}x{}",
                band.name,
                data.dim(),
                info.height,
                info.width
            )));
        }
    }
    Ok(())
}

/// In-memory products serve tiles straight from their band arrays.
impl ProductReader for Product {
    fn info(&self) -> &ProductInfo {
        &self.info
    }

    fn read_tile(&self, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let data = self.bands.get(band).ok_or_else(|| {
            Error::Processing(format!("band {band} out of range for '{}'", self.info.name))
        })?;
        if !Rect::full(self.info.width, self.info.height).contains(&rect) {
            return Err(Error::Processing(format!(
                "rectangle {rect} outside of '{}'",
                self.info.name
            )));
        }
        Ok(data
            .slice(s![rect.y..rect.bottom(), rect.x..rect.right()])
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BandInfo;

    fn ramp(width: usize, height: usize) -> Product {
        let data = Array2::from_shape_fn((height, width), |(y, x)| (y * width + x) as f32);
        Product {
            info: ProductInfo::new("ramp", width, height, vec![BandInfo::new("b1")]),
            bands: vec![data],
        }
    }

    #[test]
    fn test_resolve_format() {
        assert_eq!(
            resolve_format(Path::new("a.TIF"), None).unwrap(),
            ProductFormat::GeoTiff
        );
        assert_eq!(
            resolve_format(Path::new("a.tif"), Some(ProductFormat::BeamDimap)).unwrap(),
            ProductFormat::BeamDimap
        );
        assert!(resolve_format(Path::new("a.xyz"), None).is_err());
    }

    #[test]
    fn test_target_path_adds_extension() {
        assert_eq!(
            target_path(Path::new("out/target"), ProductFormat::BeamDimap),
            PathBuf::from("out/target.dim")
        );
        assert_eq!(
            target_path(Path::new("out/x.tif"), ProductFormat::GeoTiff),
            PathBuf::from("out/x.tif")
        );
    }

    #[test]
    fn test_product_read_tile() {
        let product = ramp(5, 4);
        let tile = product.read_tile(0, Rect::new(1, 2, 3, 2)).unwrap();
        assert_eq!(tile.dim(), (2, 3));
        assert_eq!(tile[[0, 0]], 11.0);
        assert_eq!(tile[[1, 2]], 18.0);
        assert!(product.read_tile(0, Rect::new(4, 0, 2, 1)).is_err());
        assert!(product.read_tile(1, Rect::new(0, 0, 1, 1)).is_err());
    }

    #[test]
    fn test_open_missing_product() {
        let err = FileIo
            .open_product(Path::new("/nonexistent/product.dim"), None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_write_rejects_mismatched_bands() {
        let mut product = ramp(3, 3);
        product.bands.push(Array2::zeros((2, 2)));
        let dir = tempfile::tempdir().unwrap();
        assert!(FileIo
            .write_product(&product, &dir.path().join("x.tif"), ProductFormat::GeoTiff)
            .is_err());
    }
}
