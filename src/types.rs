//! Shared types used across SARGRAPH.
//! Includes the product description (`ProductInfo`, `BandInfo`), in-memory
//! `Product`s handed to writers, `ProductFormat` and `Disposal`.
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ProductFormat {
    #[value(name = "BEAM-DIMAP")]
    BeamDimap,
    #[value(name = "GeoTIFF")]
    GeoTiff,
    #[value(name = "JPEG")]
    Jpeg, // Lossy, preview only
}

impl ProductFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ProductFormat::BeamDimap => "BEAM-DIMAP",
            ProductFormat::GeoTiff => "GeoTIFF",
            ProductFormat::Jpeg => "JPEG",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ProductFormat::BeamDimap => "dim",
            ProductFormat::GeoTiff => "tif",
            ProductFormat::Jpeg => "jpg",
        }
    }

    /// Infers the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "dim" => Some(ProductFormat::BeamDimap),
            "tif" | "tiff" => Some(ProductFormat::GeoTiff),
            "jpg" | "jpeg" => Some(ProductFormat::Jpeg),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ProductFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BEAM-DIMAP" | "DIMAP" => Ok(ProductFormat::BeamDimap),
            "GEOTIFF" | "GTIFF" | "TIFF" => Ok(ProductFormat::GeoTiff),
            "JPEG" | "JPG" => Ok(ProductFormat::Jpeg),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Description of one raster band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    pub name: String,
    pub unit: Option<String>,
    pub no_data: Option<f32>,
}

impl BandInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            no_data: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

/// Shape and metadata of a node's output product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub bands: Vec<BandInfo>,
    /// GDAL-style affine transform, if the product is georeferenced.
    pub geotransform: Option<[f64; 6]>,
    pub metadata: BTreeMap<String, String>,
}

impl ProductInfo {
    pub fn new(name: &str, width: usize, height: usize, bands: Vec<BandInfo>) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            bands,
            geotransform: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.bands.iter().position(|b| b.name == name)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }
}

/// A fully materialized product, as handed to writers.
#[derive(Debug, Clone)]
pub struct Product {
    pub info: ProductInfo,
    /// One `height x width` array per band.
    pub bands: Vec<Array2<f32>>,
}

/// How an execution ended, passed to every runtime on disposal.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Disposal {
    Completed,
    Aborted,
}

impl std::fmt::Display for Disposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposal::Completed => write!(f, "Completed"),
            Disposal::Aborted => write!(f, "Aborted"),
        }
    }
}
