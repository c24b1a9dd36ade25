//! Export adapters: GDAL rasters for the grid layers, OGR vectors for the
//! bounding box and CSV for the tracking list.

pub mod bbox;
mod gdal_ext;
pub mod tracklist;

use anyhow::{bail, Context, Result};
use gdal::raster::{Buffer, RasterCreationOptions};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, Driver, DriverManager};
use std::fs;
use std::path::{Path, PathBuf};

use crate::meta::Metadata;
use crate::model::{Grid, BAG_NAN};

pub use bbox::{BboxFormat, BboxWriter};
pub use tracklist::TrackListWriter;

/// Error threshold passed to the warper, in pixels.
const WARP_MAX_ERROR: f64 = 0.125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Ascii,
    GeoTiff,
    Xyz,
}

impl RasterFormat {
    pub const TAGS: [&'static str; 3] = ["ascii", "geotiff", "xyz"];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ascii" => Some(Self::Ascii),
            "geotiff" => Some(Self::GeoTiff),
            "xyz" => Some(Self::Xyz),
            _ => None,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::Ascii => "AAIGrid",
            Self::GeoTiff => "GTiff",
            Self::Xyz => "XYZ",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ascii => "asc",
            Self::GeoTiff => "tif",
            Self::Xyz => "xyz",
        }
    }

    /// `bag.<layer>.<ext>`, e.g. `bag.elevation.asc`.
    pub fn default_file_name(&self, layer: &str) -> String {
        format!("bag.{layer}.{}", self.extension())
    }
}

/// GDAL geotransform of a BAG grid: the corners in the metadata are cell
/// centres, GDAL wants the outer edge of the top-left cell.
pub fn geo_transform(meta: &Metadata) -> Result<[f64; 6]> {
    let (Some(sw), Some(ne), Some(res_x), Some(res_y)) = (meta.sw, meta.ne, meta.res_x, meta.res_y)
    else {
        bail!("metadata lacks the corners or the resolution of the grid");
    };
    Ok([
        sw[0] - res_x / 2.0,
        res_x,
        0.0,
        ne[1] + res_y / 2.0,
        0.0,
        -res_y,
    ])
}

/// Horizontal WKT of the metadata reference system, with any vertical part
/// removed.
fn horizontal_wkt(meta: &Metadata) -> Result<String> {
    let Some(wkt) = meta.wkt_srs.as_deref() else {
        tracing::warn!("unable to recover valid spatial reference info");
        return Ok(String::new());
    };
    let srs = SpatialRef::from_wkt(wkt).context("Failed to parse the BAG spatial reference")?;
    if srs.is_compound() {
        gdal_ext::strip_vertical(&srs)?;
    }
    srs.to_wkt().context("Failed to convert SpatialRef to WKT")
}

/// Writes one grid layer through a GDAL raster driver.
#[derive(Debug, Clone)]
pub struct RasterWriter {
    format: RasterFormat,
    epsg: Option<u32>,
}

impl RasterWriter {
    pub fn new(format: RasterFormat) -> Self {
        Self { format, epsg: None }
    }

    /// Reproject to `epsg` before writing.
    pub fn with_epsg(mut self, epsg: Option<u32>) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn format(&self) -> RasterFormat {
        self.format
    }

    /// Write `grid` (row 0 southernmost, NaN or sentinel for empty cells)
    /// to `output`, or to the format's default name for `layer` in the
    /// working directory. Returns the written path.
    pub fn write(
        &self,
        grid: &Grid<f32>,
        meta: &Metadata,
        layer: &str,
        output: Option<&Path>,
    ) -> Result<PathBuf> {
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(self.format.default_file_name(layer)),
        };
        if output.exists() {
            fs::remove_file(&output)
                .with_context(|| format!("Failed to remove {}", output.display()))?;
        }

        let (rows, cols) = grid.shape();
        tracing::info!(
            "Exporting {layer} as {}: {} x {} cells",
            self.format.driver_name(),
            cols,
            rows
        );

        let mem = DriverManager::get_driver_by_name("MEM").context("Failed to get MEM driver")?;
        let mut dataset = mem
            .create_with_band_type::<f32, _>("", cols, rows, 1)
            .context("Failed to create in-memory dataset")?;

        dataset
            .set_geo_transform(&geo_transform(meta)?)
            .context("Failed to set geo transform")?;
        dataset
            .set_projection(&horizontal_wkt(meta)?)
            .context("Failed to set projection")?;

        {
            let mut band = dataset.rasterband(1).context("Failed to get raster band")?;
            band.set_no_data_value(Some(BAG_NAN as f64))
                .context("Failed to set no data value")?;

            // GDAL rows run north to south
            let north_up = grid.unmask_nan().flipped_rows();
            let mut buffer = Buffer::new((cols, rows), north_up.values);
            band.write((0, 0), (cols, rows), &mut buffer)
                .context("Failed to write raster data")?;
        }

        let driver = DriverManager::get_driver_by_name(self.format.driver_name())
            .with_context(|| format!("{} driver not available", self.format.driver_name()))?;

        match self.epsg {
            None => copy_to(&driver, &dataset, &output)?,
            Some(epsg) => {
                let warped = warp_to_epsg(&dataset, epsg)?;
                copy_to(&driver, &warped, &output)?
            }
        }

        tracing::info!("{layer} written to {}", output.display());
        Ok(output)
    }
}

/// Copy `src` into a new file through `driver`.
///
/// Text formats such as AAIGrid and XYZ only support create-copy, so every
/// format goes through the in-memory dataset.
fn copy_to(driver: &Driver, src: &Dataset, output: &Path) -> Result<()> {
    src.create_copy(driver, output, &RasterCreationOptions::default())
        .with_context(|| format!("Failed to create {}", output.display()))?;
    Ok(())
}

/// Virtual dataset reprojecting `src` to `epsg` with nearest neighbour
/// resampling.
fn warp_to_epsg(src: &Dataset, epsg: u32) -> Result<Dataset> {
    let dst = SpatialRef::from_epsg(epsg)
        .with_context(|| format!("Failed to create SpatialRef from EPSG:{epsg}"))?;
    let dst_wkt = dst.to_wkt().context("Failed to convert SpatialRef to WKT")?;
    gdal_ext::auto_warped_vrt(src, &dst_wkt, WARP_MAX_ERROR)
        .with_context(|| format!("Failed to reproject to EPSG:{epsg}"))
}
