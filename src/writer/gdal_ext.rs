//! The two GDAL calls the `gdal` crate does not wrap.

use anyhow::{bail, Result};
use gdal::spatial_ref::SpatialRef;
use gdal::Dataset;
use std::ffi::CString;
use std::ptr;

/// Drop the vertical part of a compound CRS in place.
pub(crate) fn strip_vertical(srs: &SpatialRef) -> Result<()> {
    // SAFETY: the handle is owned by `srs` and stays valid for the call.
    let err = unsafe { gdal_sys::OSRStripVertical(srs.to_c_hsrs()) };
    if err != gdal_sys::OGRErr::OGRERR_NONE {
        bail!("Failed to strip the vertical datum (OGR error {err})");
    }
    Ok(())
}

/// Virtual dataset warping `src` into `dst_wkt` with nearest neighbour
/// resampling.
pub(crate) fn auto_warped_vrt(src: &Dataset, dst_wkt: &str, max_error: f64) -> Result<Dataset> {
    let Ok(c_wkt) = CString::new(dst_wkt) else {
        bail!("Target WKT contains a NUL byte");
    };
    // SAFETY: `src` and `c_wkt` outlive the call. A non-null result is a new
    // dataset handle that the returned `Dataset` owns and closes on drop.
    let handle = unsafe {
        gdal_sys::GDALAutoCreateWarpedVRT(
            src.c_dataset(),
            ptr::null(),
            c_wkt.as_ptr(),
            gdal_sys::GDALResampleAlg::GRA_NearestNeighbour,
            max_error,
            ptr::null(),
        )
    };
    if handle.is_null() {
        bail!("GDALAutoCreateWarpedVRT returned no dataset");
    }
    // SAFETY: checked non-null above and not shared with anything else.
    Ok(unsafe { Dataset::from_c_dataset(handle) })
}
