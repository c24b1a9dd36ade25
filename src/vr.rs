//! Variable-resolution refinements.
//!
//! Refinement grids are stored back to back in a flat array. The coarse
//! `varres_metadata` grid is walked row-major and every populated cell
//! claims the next `dimensions_x * dimensions_y` refinements.

use std::collections::HashMap;

use tracing::debug;

use crate::bag::BagFile;
use crate::error::Result;
use crate::model::{sentinel_to_nan, GeoSample, MinMax};
use crate::store::{layout, Store, VrRefinement};

impl<S: Store> BagFile<S> {
    /// Number of stored refinement nodes.
    pub fn vr_refinements_len(&self) -> Result<usize> {
        Ok(self.vr_refinements()?.len())
    }

    fn vr_refinements(&self) -> Result<Vec<VrRefinement>> {
        let refinements = self.store.read_vr_refinements(layout::VARRES_REFINEMENTS)?;
        Ok(refinements
            .into_iter()
            .map(|r| VrRefinement {
                depth: sentinel_to_nan(r.depth),
                depth_uncrt: sentinel_to_nan(r.depth_uncrt),
            })
            .collect())
    }

    pub fn vr_elevation_min_max(&self) -> Result<Option<(f32, f32)>> {
        let mut acc = MinMax::default();
        acc.extend(self.vr_refinements()?.iter().map(|r| r.depth));
        Ok(acc.get())
    }

    pub fn vr_uncertainty_min_max(&self) -> Result<Option<(f32, f32)>> {
        let mut acc = MinMax::default();
        acc.extend(self.vr_refinements()?.iter().map(|r| r.depth_uncrt));
        Ok(acc.get())
    }

    pub fn vr_depth_min_max(&self) -> Result<Option<(f32, f32)>> {
        Ok(self
            .vr_elevation_min_max()?
            .map(|(lo, hi)| (-hi, -lo)))
    }

    /// Flag refinements with `flag(depth, uncertainty)` and place the
    /// flagged ones on the map.
    fn vr_scan<F>(&mut self, flag: F) -> Result<Vec<GeoSample>>
    where
        F: Fn(f32, f32) -> Option<f32>,
    {
        let georef = self.georef()?;

        let flagged: HashMap<usize, f32> = self
            .vr_refinements()?
            .iter()
            .enumerate()
            .filter_map(|(idx, r)| flag(r.depth, r.depth_uncrt).map(|v| (idx, v)))
            .collect();
        debug!("flagged {} refinements", flagged.len());

        let index = self.store.read_vr_metadata(layout::VARRES_METADATA)?;
        let mut samples = Vec::with_capacity(flagged.len());
        let mut base = 0usize;
        for r in 0..index.rows {
            for c in 0..index.cols {
                let Some(cell) = index.get(r, c) else {
                    continue;
                };
                if cell.dimensions_x == 0 {
                    continue;
                }
                let dims_x = cell.dimensions_x as usize;
                let count = cell.refinement_count();
                for k in 0..count {
                    let Some(&value) = flagged.get(&(base + k)) else {
                        continue;
                    };
                    let local_row = (k / dims_x) as f64;
                    let local_col = (k % dims_x) as f64;
                    let e = georef.x_min
                        + (c as f64 - 0.5) * georef.res_x
                        + cell.sw_corner_x as f64
                        + local_col * cell.resolution_x as f64;
                    let n = georef.y_min
                        + (r as f64 - 0.5) * georef.res_y
                        + cell.sw_corner_y as f64
                        + local_row * cell.resolution_y as f64;
                    let (lat, lon) = georef.transform.transform(e, n)?;
                    samples.push(GeoSample { lat, lon, value });
                }
                base += count;
            }
        }
        Ok(samples)
    }

    /// Refinements whose uncertainty exceeds `threshold`.
    pub fn vr_uncertainty_greater_than(&mut self, threshold: f32) -> Result<Vec<GeoSample>> {
        self.vr_scan(|_, u| (u > threshold).then_some(u))
    }

    /// Refinements with a depth but no uncertainty. The value is the stored
    /// depth as is.
    pub fn vr_depth_has_uncertainty(&mut self) -> Result<Vec<GeoSample>> {
        self.vr_scan(|d, u| (d.is_finite() && u.is_nan()).then_some(d))
    }

    /// Refinements with an uncertainty but no depth.
    pub fn vr_uncertainty_has_depth(&mut self) -> Result<Vec<GeoSample>> {
        self.vr_scan(|d, u| (u.is_finite() && d.is_nan()).then_some(u))
    }
}
