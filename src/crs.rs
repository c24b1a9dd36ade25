//! Coordinate reference system seam.
//!
//! The BAG model only needs two things from a CRS engine: turning an EPSG
//! code into WKT, and mapping projected grid coordinates to WGS84.

use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};

use crate::error::{BagError, Result};

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

pub trait PointTransform {
    /// Map an (easting, northing) pair to `(lat, lon)`.
    fn transform(&self, easting: f64, northing: f64) -> Result<(f64, f64)>;
}

pub trait CrsEngine {
    fn wkt_from_epsg(&self, code: u32) -> Result<String>;

    /// Transform from the CRS described by `wkt` to WGS84.
    fn to_geographic(&self, wkt: &str) -> Result<Box<dyn PointTransform>>;
}

/// CRS engine backed by GDAL/OGR spatial references.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalCrs;

struct GdalTransform {
    inner: CoordTransform,
}

fn crs_err(context: &str, e: gdal::errors::GdalError) -> BagError {
    BagError::Crs(format!("{context}: {e}"))
}

fn traditional(mut srs: SpatialRef) -> SpatialRef {
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    srs
}

impl CrsEngine for GdalCrs {
    fn wkt_from_epsg(&self, code: u32) -> Result<String> {
        SpatialRef::from_epsg(code)
            .and_then(|srs| srs.to_wkt())
            .map_err(|e| crs_err(&format!("EPSG:{code}"), e))
    }

    fn to_geographic(&self, wkt: &str) -> Result<Box<dyn PointTransform>> {
        let src = SpatialRef::from_wkt(wkt).map_err(|e| crs_err("source WKT", e))?;
        let dst = SpatialRef::from_epsg(WGS84_EPSG).map_err(|e| crs_err("WGS84", e))?;
        let inner = CoordTransform::new(&traditional(src), &traditional(dst))
            .map_err(|e| crs_err("coordinate transform", e))?;
        Ok(Box::new(GdalTransform { inner }))
    }
}

impl PointTransform for GdalTransform {
    fn transform(&self, easting: f64, northing: f64) -> Result<(f64, f64)> {
        let mut xs = [easting];
        let mut ys = [northing];
        let mut zs = [0.0];
        self.inner
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(|e| crs_err("point transform", e))?;
        // traditional GIS order yields lon/lat
        Ok((ys[0], xs[0]))
    }
}
