//! BEAM-DIMAP products: an XML `.dim` header next to a `.data/` directory
//! holding one ENVI raw image (`.img` + `.hdr`) per band, stored as big-endian
//! 32-bit floats.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::core::tile::Rect;
use crate::error::{Error, Result};
use crate::io::{ProductReader, parent_dir, persist, sibling_tempfile};
use crate::types::{BandInfo, Product, ProductInfo};

const DIMAP_VERSION: &str = "2.12.1";
const PRODUCER: &str = "sargraph";

/// `product.dim` -> `product.data`
pub fn data_dir(header: &Path) -> PathBuf {
    header.with_extension("data")
}

/// Opened BEAM-DIMAP product; band files are read on demand.
#[derive(Debug)]
pub struct DimapReader {
    info: ProductInfo,
    band_files: Vec<PathBuf>,
}

#[derive(Default)]
struct BandEntry {
    index: Option<usize>,
    name: String,
    unit: Option<String>,
    no_data_used: bool,
    no_data: Option<f32>,
}

#[derive(Default)]
struct Header {
    name: Option<String>,
    width: Option<usize>,
    height: Option<usize>,
    geotransform: Option<[f64; 6]>,
    files: BTreeMap<usize, String>,
    bands: Vec<BandEntry>,
    metadata: BTreeMap<String, String>,
}

fn parse_number<T: std::str::FromStr>(tag: &str, text: &str) -> Result<T> {
    text.trim()
        .parse::<T>()
        .map_err(|_| Error::Processing(format!("invalid DIMAP {tag}: '{text}'")))
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

fn parse_header(xml: &str) -> Result<Header> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut header = Header::default();
    let mut path: Vec<String> = Vec::new();
    let mut pending_file: (Option<usize>, Option<String>) = (None, None);
    let mut md_key: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "Spectral_Band_Info" => header.bands.push(BandEntry::default()),
                    "Data_File" => pending_file = (None, None),
                    "MDATTR" => md_key = attribute(e, b"name")?,
                    _ => {}
                }
                path.push(name);
            }
            Event::Empty(ref e) => {
                if e.name().as_ref() == b"DATA_FILE_PATH" {
                    pending_file.1 = attribute(e, b"href")?;
                }
            }
            Event::End(ref e) => {
                match e.name().as_ref() {
                    b"Data_File" => {
                        if let (Some(index), Some(href)) = pending_file.clone() {
                            header.files.insert(index, href);
                        }
                    }
                    b"MDATTR" => md_key = None,
                    _ => {}
                }
                path.pop();
            }
            Event::Text(e) => {
                let text = e.unescape()?.to_string();
                let parent = path.len().checked_sub(2).map(|i| path[i].as_str());
                let tag = path.last().map(String::as_str).unwrap_or_default();
                match (parent, tag) {
                    (_, "DATASET_NAME") => header.name = Some(text),
                    (_, "NCOLS") => header.width = Some(parse_number(tag, &text)?),
                    (_, "NROWS") => header.height = Some(parse_number(tag, &text)?),
                    (_, "IMAGE_TO_MODEL_TRANSFORM") => {
                        let values: Vec<f64> = text
                            .split(',')
                            .map(|v| parse_number(tag, v))
                            .collect::<Result<_>>()?;
                        // Flat matrix m00,m10,m01,m11,m02,m12
                        if let [a, b, c, d, e, f] = values[..] {
                            header.geotransform = Some([e, a, c, f, b, d]);
                        }
                    }
                    (Some("Data_File"), "BAND_INDEX") => {
                        pending_file.0 = Some(parse_number(tag, &text)?)
                    }
                    (Some("Spectral_Band_Info"), field) => {
                        if let Some(band) = header.bands.last_mut() {
                            match field {
                                "BAND_INDEX" => band.index = Some(parse_number(tag, &text)?),
                                "BAND_NAME" => band.name = text,
                                "PHYSICAL_UNIT" => band.unit = Some(text),
                                "NO_DATA_VALUE_USED" => band.no_data_used = text.trim() == "true",
                                "NO_DATA_VALUE" => band.no_data = Some(parse_number(tag, &text)?),
                                _ => {}
                            }
                        }
                    }
                    (_, "MDATTR") => {
                        if let Some(key) = md_key.clone() {
                            header.metadata.insert(key, text);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(header)
}

impl DimapReader {
    pub fn open(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path)?;
        let mut header = parse_header(&xml)?;
        let (Some(width), Some(height)) = (header.width, header.height) else {
            return Err(Error::Processing(format!(
                "{} lacks raster dimensions",
                path.display()
            )));
        };

        header.bands.sort_by_key(|b| b.index.unwrap_or(usize::MAX));
        let base = parent_dir(path).map(Path::to_path_buf).unwrap_or_default();
        let mut bands = Vec::with_capacity(header.bands.len());
        let mut band_files = Vec::with_capacity(header.bands.len());
        for (position, entry) in header.bands.into_iter().enumerate() {
            let index = entry.index.unwrap_or(position);
            let file = match header.files.get(&index) {
                Some(href) => base.join(href).with_extension("img"),
                None => data_dir(path).join(format!("{}.img", entry.name)),
            };
            let mut band = BandInfo::new(&entry.name);
            band.unit = entry.unit;
            band.no_data = entry.no_data.filter(|_| entry.no_data_used);
            bands.push(band);
            band_files.push(file);
        }

        let name = header.name.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("product")
                .to_string()
        });
        let mut info = ProductInfo::new(&name, width, height, bands);
        info.geotransform = header.geotransform;
        info.metadata = header.metadata;
        debug!(path = %path.display(), width, height, bands = info.band_count(), "Opened DIMAP product");
        Ok(Self { info, band_files })
    }
}

impl ProductReader for DimapReader {
    fn info(&self) -> &ProductInfo {
        &self.info
    }

    fn read_tile(&self, band: usize, rect: Rect) -> Result<Array2<f32>> {
        let file = self.band_files.get(band).ok_or_else(|| {
            Error::Processing(format!("band {band} out of range for '{}'", self.info.name))
        })?;
        if !Rect::full(self.info.width, self.info.height).contains(&rect) {
            return Err(Error::Processing(format!(
                "rectangle {rect} outside of '{}'",
                self.info.name
            )));
        }
        let mut reader = File::open(file)?;
        let mut row = vec![0u8; rect.width * 4];
        let mut samples = Vec::with_capacity(rect.area());
        for y in rect.y..rect.bottom() {
            let offset = ((y * self.info.width + rect.x) * 4) as u64;
            reader.seek(SeekFrom::Start(offset))?;
            reader.read_exact(&mut row)?;
            samples.extend(
                row.chunks_exact(4)
                    .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        Array2::from_shape_vec(rect.shape(), samples).map_err(Error::processing)
    }
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn start<W: Write>(writer: &mut Writer<W>, element: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Start(element))?;
    Ok(())
}

fn end<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn header_xml(info: &ProductInfo, data_dir_name: &str) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("ISO-8859-1"), None)))?;
    start(
        &mut writer,
        BytesStart::new("Dimap_Document").with_attributes([("name", info.name.as_str())]),
    )?;

    start(&mut writer, BytesStart::new("Metadata_Id"))?;
    writer.write_event(Event::Start(
        BytesStart::new("METADATA_FORMAT").with_attributes([("version", DIMAP_VERSION)]),
    ))?;
    writer.write_event(Event::Text(BytesText::new("DIMAP")))?;
    end(&mut writer, "METADATA_FORMAT")?;
    end(&mut writer, "Metadata_Id")?;

    start(&mut writer, BytesStart::new("Dataset_Id"))?;
    text_element(&mut writer, "DATASET_NAME", &info.name)?;
    end(&mut writer, "Dataset_Id")?;

    start(&mut writer, BytesStart::new("Production"))?;
    text_element(&mut writer, "DATASET_PRODUCER_NAME", PRODUCER)?;
    text_element(
        &mut writer,
        "PRODUCT_CREATION_TIME",
        &chrono::Utc::now().to_rfc3339(),
    )?;
    end(&mut writer, "Production")?;

    start(&mut writer, BytesStart::new("Raster_Dimensions"))?;
    text_element(&mut writer, "NCOLS", &info.width.to_string())?;
    text_element(&mut writer, "NROWS", &info.height.to_string())?;
    text_element(&mut writer, "NBANDS", &info.band_count().to_string())?;
    end(&mut writer, "Raster_Dimensions")?;

    if let Some(gt) = info.geotransform {
        start(&mut writer, BytesStart::new("Geoposition"))?;
        let affine = [gt[1], gt[4], gt[2], gt[5], gt[0], gt[3]]
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        text_element(&mut writer, "IMAGE_TO_MODEL_TRANSFORM", &affine)?;
        end(&mut writer, "Geoposition")?;
    }

    start(&mut writer, BytesStart::new("Data_Access"))?;
    text_element(&mut writer, "DATA_FILE_FORMAT", "ENVI")?;
    text_element(&mut writer, "BYTE_ORDER", "MSBFirst")?;
    for (index, band) in info.bands.iter().enumerate() {
        start(&mut writer, BytesStart::new("Data_File"))?;
        let href = format!("{data_dir_name}/{}.hdr", band.name);
        writer.write_event(Event::Empty(
            BytesStart::new("DATA_FILE_PATH").with_attributes([("href", href.as_str())]),
        ))?;
        text_element(&mut writer, "BAND_INDEX", &index.to_string())?;
        end(&mut writer, "Data_File")?;
    }
    end(&mut writer, "Data_Access")?;

    start(&mut writer, BytesStart::new("Image_Interpretation"))?;
    for (index, band) in info.bands.iter().enumerate() {
        start(&mut writer, BytesStart::new("Spectral_Band_Info"))?;
        text_element(&mut writer, "BAND_INDEX", &index.to_string())?;
        text_element(&mut writer, "BAND_NAME", &band.name)?;
        text_element(&mut writer, "BAND_RASTER_WIDTH", &info.width.to_string())?;
        text_element(&mut writer, "BAND_RASTER_HEIGHT", &info.height.to_string())?;
        text_element(&mut writer, "DATA_TYPE", "float32")?;
        if let Some(unit) = &band.unit {
            text_element(&mut writer, "PHYSICAL_UNIT", unit)?;
        }
        text_element(
            &mut writer,
            "NO_DATA_VALUE_USED",
            if band.no_data.is_some() { "true" } else { "false" },
        )?;
        if let Some(nd) = band.no_data {
            text_element(&mut writer, "NO_DATA_VALUE", &nd.to_string())?;
        }
        end(&mut writer, "Spectral_Band_Info")?;
    }
    end(&mut writer, "Image_Interpretation")?;

    if !info.metadata.is_empty() {
        start(&mut writer, BytesStart::new("Dataset_Sources"))?;
        start(
            &mut writer,
            BytesStart::new("MDElem").with_attributes([("name", "metadata")]),
        )?;
        for (key, value) in &info.metadata {
            writer.write_event(Event::Start(
                BytesStart::new("MDATTR").with_attributes([("name", key.as_str()), ("type", "ascii")]),
            ))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            end(&mut writer, "MDATTR")?;
        }
        end(&mut writer, "MDElem")?;
        end(&mut writer, "Dataset_Sources")?;
    }

    end(&mut writer, "Dimap_Document")?;
    Ok(writer.into_inner())
}

fn envi_header(info: &ProductInfo, band: &BandInfo) -> String {
    format!(
        "ENVI\ndescription = {{Sentinel Application Processing Platform (SNAP) Data Product}}\n\
         samples = {}\nlines = {}\nbands = 1\nheader offset = 0\nfile type = ENVI Standard\n\
         data type = 4\ninterleave = bsq\nbyte order = 1\nband names = {{ {} }}\n",
        info.width, info.height, band.name
    )
}

/// Band names double as file names inside the data directory.
fn check_band_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidParameter {
            param: "band name".into(),
            value: name.to_string(),
        });
    }
    Ok(())
}

fn write_band(dir: &Path, info: &ProductInfo, band: &BandInfo, data: &Array2<f32>) -> Result<()> {
    fs::write(dir.join(format!("{}.hdr", band.name)), envi_header(info, band))?;
    let mut writer = BufWriter::new(File::create(dir.join(format!("{}.img", band.name)))?);
    for &v in data.iter() {
        writer.write_all(&v.to_be_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `<output>` and `<output stem>.data/`. Both are built under temporary
/// names and moved into place once every band has been written.
pub fn write_dimap(product: &Product, output: &Path) -> Result<()> {
    let info = &product.info;
    for band in &info.bands {
        check_band_file_name(&band.name)?;
    }
    let target_data = data_dir(output);
    let data_dir_name = target_data
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Processing(format!("invalid output path {}", output.display())))?
        .to_string();

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{data_dir_name}."))
        .tempdir_in(parent_dir(output).unwrap_or(Path::new(".")))?;
    for (band, data) in info.bands.iter().zip(&product.bands) {
        write_band(staging.path(), info, band, data)?;
    }

    let mut tmp = sibling_tempfile(output)?;
    tmp.as_file_mut().write_all(&header_xml(info, &data_dir_name)?)?;
    tmp.as_file_mut().flush()?;

    if target_data.exists() {
        fs::remove_dir_all(&target_data)?;
    }
    fs::rename(staging.path(), &target_data)?;
    persist(tmp, output)
}
