//! In-memory [`RasterIo`], for embedding the engine without touching disk.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array2;
use parking_lot::Mutex;

use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::io::{ProductReader, RasterIo, target_path};
use crate::types::{Product, ProductFormat, ProductInfo};

/// Products keyed by path. Opens and writes are counted so callers can check
/// how often the engine went to storage.
#[derive(Default)]
pub struct MemoryIo {
    products: Mutex<HashMap<PathBuf, Arc<Product>>>,
    written: Mutex<Vec<(PathBuf, ProductFormat)>>,
    opens: AtomicUsize,
}

struct SharedProduct(Arc<Product>);

impl ProductReader for SharedProduct {
    fn info(&self) -> &ProductInfo {
        &self.0.info
    }

    fn read_tile(&self, band: usize, rect: Rect) -> Result<Array2<f32>> {
        self.0.read_tile(band, rect)
    }
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, product: Product) {
        self.products.lock().insert(path.into(), Arc::new(product));
    }

    pub fn product(&self, path: &Path) -> Option<Arc<Product>> {
        self.products.lock().get(path).cloned()
    }

    /// Number of `open_product` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Targets of every `write_product` call, in order.
    pub fn writes(&self) -> Vec<(PathBuf, ProductFormat)> {
        self.written.lock().clone()
    }
}

impl RasterIo for MemoryIo {
    fn open_product(&self, path: &Path, _format: Option<ProductFormat>) -> Result<Box<dyn ProductReader>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let product = self.product(path).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("product not found: {}", path.display()),
            ))
        })?;
        Ok(Box::new(SharedProduct(product)))
    }

    fn write_product(&self, product: &Product, path: &Path, format: ProductFormat) -> Result<PathBuf> {
        let target = target_path(path, format);
        self.written.lock().push((target.clone(), format));
        self.insert(target.clone(), product.clone());
        Ok(target)
    }
}
