//! GeoTIFF read/write through the `tiff` crate.
//!
//! Products are written as one 32-bit float page per band. The band name goes
//! into `ImageDescription`; georeferencing uses the GeoTIFF model pixel scale
//! and tie point tags; the no-data value uses the GDAL tag.
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::{persist, sibling_tempfile};
use crate::types::{BandInfo, Product, ProductInfo};

fn to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(Error::UnsupportedFormat(
                "unsupported TIFF sample type".into(),
            ));
        }
    })
}

fn read_geotransform<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<[f64; 6]> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tie = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tie.len() < 6 {
        return None;
    }
    let (sx, sy) = (scale[0], scale[1]);
    Some([tie[3] - tie[0] * sx, sx, 0.0, tie[4] + tie[1] * sy, 0.0, -sy])
}

/// Splits a decoded page into one array per interleaved sample. Pages whose
/// sample count is not a whole multiple of the pixel count (bit-packed data)
/// are rejected.
fn deinterleave(samples: &[f32], width: usize, height: usize) -> Result<Vec<Array2<f32>>> {
    let pixels = width * height;
    if pixels == 0 || samples.len() < pixels || samples.len() % pixels != 0 {
        return Err(Error::UnsupportedFormat(format!(
            "TIFF page decodes to {} samples for {width}x{height} pixels",
            samples.len()
        )));
    }
    let channels = samples.len() / pixels;
    Ok((0..channels)
        .map(|c| {
            Array2::from_shape_fn((height, width), |(y, x)| {
                samples[(y * width + x) * channels + c]
            })
        })
        .collect())
}

/// Reads every full-size page of a TIFF file into memory.
/// Interleaved multi-sample pages contribute one band per sample.
pub fn read_geotiff(path: &Path) -> Result<Product> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let geotransform = read_geotransform(&mut decoder);
    let no_data = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim().parse::<f32>().ok());

    let mut bands = Vec::new();
    let mut infos = Vec::new();
    loop {
        let (w, h) = decoder.dimensions()?;
        // Reduced-resolution pages are skipped.
        if (w as usize, h as usize) == (width, height) {
            let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
            let samples = to_f32(decoder.read_image()?)?;
            let planes = deinterleave(&samples, width, height)?;
            let channels = planes.len();
            for data in planes {
                let name = match (&description, channels) {
                    (Some(d), 1) if !d.trim().is_empty() => d.trim().to_string(),
                    _ => format!("band_{}", bands.len() + 1),
                };
                let mut info = BandInfo::new(&name);
                info.no_data = no_data;
                infos.push(info);
                bands.push(data);
            }
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("product");
    let mut info = ProductInfo::new(name, width, height, infos);
    info.geotransform = geotransform;
    debug!(path = %path.display(), width, height, bands = bands.len(), "Read GeoTIFF");
    Ok(Product { info, bands })
}

fn encode<W: Write + Seek>(product: &Product, writer: W) -> Result<()> {
    let info = &product.info;
    let mut encoder = TiffEncoder::new(writer)?;
    for (index, (band, data)) in info.bands.iter().zip(&product.bands).enumerate() {
        let samples: Vec<f32> = data.iter().copied().collect();
        let mut image =
            encoder.new_image::<colortype::Gray32Float>(info.width as u32, info.height as u32)?;
        image
            .encoder()
            .write_tag(Tag::ImageDescription, band.name.as_str())?;
        if index == 0 {
            if let Some(gt) = info.geotransform {
                let scale = [gt[1], -gt[5], 0.0];
                let tie = [0.0, 0.0, 0.0, gt[0], gt[3], 0.0];
                image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
                image.encoder().write_tag(Tag::ModelTiepointTag, &tie[..])?;
            }
            if let Some(nd) = band.no_data {
                image
                    .encoder()
                    .write_tag(Tag::GdalNodata, nd.to_string().as_str())?;
            }
        }
        image.write_data(&samples)?;
    }
    Ok(())
}

pub fn write_geotiff(product: &Product, output: &Path) -> Result<()> {
    let mut tmp = sibling_tempfile(output)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        encode(product, &mut writer)?;
        writer.flush()?;
    }
    persist(tmp, output)
}
