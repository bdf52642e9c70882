//! GeoTIFF reading and writing
//!
//! Grids are stored as single-band 32-bit float TIFFs with the GeoTIFF
//! model tags (pixel scale, tie point, key directory) and the GDAL nodata
//! tag, which is enough for GIS tools to place them on a map.

use super::grid::{GeoTransform, RasterGrid, DEFAULT_NODATA};
use crate::errors::{ExportError, Result};
use ndarray::Array2;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

/// GeoKey directory for geographic WGS84 (EPSG:4326), pixel-is-area
const GEO_KEYS_WGS84: [u16; 16] = [
    1, 1, 0, 3, // header: version 1.1.0, three keys
    1024, 0, 1, 2, // GTModelType = geographic
    1025, 0, 1, 1, // GTRasterType = pixel is area
    2048, 0, 1, 4326, // GeographicType = WGS84
];

/// Write `grid` to `path`, replacing any existing file
///
/// # Errors
///
/// Returns an error if the file cannot be created or encoded.
pub fn write_geotiff(path: &Path, grid: &RasterGrid) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let width = u32::try_from(grid.width())
        .map_err(|_| ExportError::Generic(format!("raster width {} too large", grid.width())))?;
    let height = u32::try_from(grid.height())
        .map_err(|_| ExportError::Generic(format!("raster height {} too large", grid.height())))?;

    let t = grid.transform();
    let pixel_scale = [t.pixel_width, t.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    let nodata = format_nodata(grid.nodata());
    let values: Vec<f32> = grid.data().iter().copied().collect();

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(width, height)?;
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &pixel_scale[..])?;
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])?;
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &GEO_KEYS_WGS84[..])?;
    image
        .encoder()
        .write_tag(Tag::Unknown(GDAL_NODATA), nodata.as_str())?;
    image.write_data(&values)?;
    Ok(())
}

/// Read a single-band GeoTIFF written by [`write_geotiff`] or any GIS tool
///
/// # Errors
///
/// Returns an error if the file is missing, is not a TIFF, lacks the
/// georeferencing tags, or uses an unsupported sample type.
pub fn read_geotiff(path: &Path) -> Result<RasterGrid> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = decoder.dimensions()?;

    let scale = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_TIEPOINT))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(ExportError::Generic(format!(
            "{} is missing GeoTIFF georeferencing",
            path.display()
        )));
    }
    let nodata = decoder
        .get_tag_ascii_string(Tag::Unknown(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse::<f32>().ok())
        .unwrap_or(DEFAULT_NODATA);

    let values: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(ExportError::Generic(format!(
                "{} uses an unsupported sample type",
                path.display()
            )))
        }
    };

    // Tie point maps raster (i, j) to model (x, y)
    let transform = GeoTransform {
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
    };
    let data = Array2::from_shape_vec((height as usize, width as usize), values)?;
    RasterGrid::new(data, transform, nodata)
}

fn format_nodata(nodata: f32) -> String {
    if nodata.fract() == 0.0 {
        format!("{nodata:.0}")
    } else {
        format!("{nodata}")
    }
}
