//! The BAG container: named layers, chunked statistics, outlier scans and
//! metadata mutation on top of a [`Store`].

use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::crs::{CrsEngine, GdalCrs, PointTransform};
use crate::error::{BagError, Result};
use crate::meta::{self, Metadata};
use crate::model::{GeoSample, Grid, MinMax};
use crate::store::{layout, MemoryStore, Store, TrackingListEntry};
use crate::validate::{MetadataValidator, Validation};
use crate::xml::{Document, XPath};

pub const DEFAULT_METADATA_FILE: &str = "BAG_metadata.xml";

/// Estimated in-memory bytes per raster cell while scanning.
const BYTES_PER_CELL: usize = 32;

/// How many rows a chunked scan reads at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub budget_bytes: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            budget_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ChunkPolicy {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn rows_per_chunk(&self, cols: usize) -> usize {
        self.budget_bytes / (cols.max(1) * BYTES_PER_CELL) + 1
    }

    /// Consecutive row ranges covering `0..rows`.
    pub fn chunks(&self, rows: usize, cols: usize) -> impl Iterator<Item = Range<usize>> {
        let step = self.rows_per_chunk(cols);
        (0..rows)
            .step_by(step)
            .map(move |start| start..(start + step).min(rows))
    }
}

/// A row selection from a caller that may pass signed bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: i64,
    pub stop: i64,
}

impl RowRange {
    pub fn from_signed(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    /// Check `0 <= start <= stop <= rows`.
    pub fn resolve(self, rows: usize) -> Result<Range<usize>> {
        let invalid = BagError::InvalidRowRange {
            start: self.start,
            stop: self.stop,
            rows,
        };
        if self.start < 0 || self.stop < 0 || self.start > self.stop {
            return Err(invalid);
        }
        if self.stop as u64 > rows as u64 {
            return Err(invalid);
        }
        Ok(self.start as usize..self.stop as usize)
    }
}

impl From<Range<usize>> for RowRange {
    fn from(range: Range<usize>) -> Self {
        Self {
            start: range.start as i64,
            stop: range.end as i64,
        }
    }
}

/// Grid origin, spacing and reprojection needed to place samples on Earth.
pub(crate) struct Georef {
    pub x_min: f64,
    pub y_min: f64,
    pub res_x: f64,
    pub res_y: f64,
    pub transform: Box<dyn PointTransform>,
}

impl Georef {
    /// Geographic position of a grid node.
    pub fn node(&self, row: usize, col: usize) -> Result<(f64, f64)> {
        let e = self.x_min + col as f64 * self.res_x;
        let n = self.y_min + row as f64 * self.res_y;
        self.transform.transform(e, n)
    }
}

/// An open BAG container.
pub struct BagFile<S: Store> {
    pub(crate) store: S,
    crs: Box<dyn CrsEngine>,
    validator: MetadataValidator,
    chunks: ChunkPolicy,
    meta: Option<Metadata>,
    meta_errors: Vec<String>,
}

#[cfg(feature = "hdf5")]
impl BagFile<crate::store::Hdf5Store> {
    /// Open an existing BAG read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !crate::store::hdf5::is_bag(path) {
            return Err(BagError::NotABag(path.display().to_string()));
        }
        Self::from_store(crate::store::Hdf5Store::open(path)?)
    }

    /// Open an existing BAG for metadata updates.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !crate::store::hdf5::is_bag(path) {
            return Err(BagError::NotABag(path.display().to_string()));
        }
        Self::from_store(crate::store::Hdf5Store::open_rw(path)?)
    }

    /// Create a new BAG file holding the empty template structure.
    pub fn create_template(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_store(crate::store::Hdf5Store::create_template(path)?)
    }
}

impl BagFile<MemoryStore> {
    /// In-memory BAG holding the empty template structure.
    pub fn template() -> Self {
        Self::with_parts(MemoryStore::bag_template())
    }
}

impl<S: Store> BagFile<S> {
    /// Wrap a store, rejecting it unless it holds a `BAG_root` group.
    pub fn from_store(store: S) -> Result<Self> {
        if !store.exists(layout::ROOT) {
            return Err(BagError::NotABag(format!("missing {} group", layout::ROOT)));
        }
        Ok(Self::with_parts(store))
    }

    fn with_parts(store: S) -> Self {
        Self {
            store,
            crs: Box::new(GdalCrs),
            validator: MetadataValidator::default(),
            chunks: ChunkPolicy::default(),
            meta: None,
            meta_errors: Vec::new(),
        }
    }

    pub fn with_crs_engine(mut self, crs: Box<dyn CrsEngine>) -> Self {
        self.crs = crs;
        self
    }

    pub fn with_validator(mut self, validator: MetadataValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_chunk_policy(mut self, chunks: ChunkPolicy) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access. Writes made here bypass the metadata cache.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Flush pending writes and release the store.
    pub fn close(mut self) -> Result<S> {
        self.store.flush()?;
        Ok(self.store)
    }

    // existence probes

    pub fn has_bag_root(&self) -> bool {
        self.store.exists(layout::ROOT)
    }

    pub fn has_bag_version(&self) -> bool {
        self.store
            .attr_names(layout::ROOT)
            .iter()
            .any(|n| n == layout::VERSION_ATTR)
    }

    pub fn has_metadata(&self) -> bool {
        self.store.exists(layout::METADATA)
    }

    pub fn has_elevation(&self) -> bool {
        self.store.exists(layout::ELEVATION)
    }

    pub fn has_uncertainty(&self) -> bool {
        self.store.exists(layout::UNCERTAINTY)
    }

    pub fn has_density(&self) -> bool {
        self.store.exists(layout::ELEVATION_SOLUTION)
            && self
                .store
                .fields(layout::ELEVATION_SOLUTION)
                .iter()
                .any(|f| f == layout::NUM_SOUNDINGS)
    }

    pub fn has_tracking_list(&self) -> bool {
        self.store.exists(layout::TRACKING_LIST)
    }

    pub fn has_varres_metadata(&self) -> bool {
        self.store.exists(layout::VARRES_METADATA)
    }

    pub fn has_varres_refinements(&self) -> bool {
        self.store.exists(layout::VARRES_REFINEMENTS)
    }

    pub fn has_varres_tracking_list(&self) -> bool {
        self.store.exists(layout::VARRES_TRACKING_LIST)
    }

    /// True for variable-resolution BAGs.
    pub fn is_vr(&self) -> bool {
        self.has_varres_refinements()
    }

    /// True only with an uncertainty layer whose metadata declares product
    /// uncertainty.
    pub fn has_product_uncertainty(&mut self) -> bool {
        if !self.has_uncertainty() {
            return false;
        }
        match self.populate_metadata() {
            Ok(meta) => meta.is_product_uncertainty(),
            Err(e) => {
                warn!("unable to read the uncertainty type: {e}");
                false
            }
        }
    }

    pub fn bag_version(&self) -> Result<String> {
        Ok(self
            .store
            .read_attr(layout::ROOT, layout::VERSION_ATTR)?
            .to_string())
    }

    // layers

    fn shape_2d(&self, path: &str) -> Result<(usize, usize)> {
        match self.store.shape(path)?.as_slice() {
            [rows, cols] => Ok((*rows, *cols)),
            other => Err(BagError::Store(format!(
                "{path} has shape {other:?}, expected two dimensions"
            ))),
        }
    }

    fn resolve_rows(&self, path: &str, row_range: Option<Range<usize>>) -> Result<Range<usize>> {
        let (rows, _) = self.shape_2d(path)?;
        match row_range {
            Some(range) => RowRange::from(range).resolve(rows),
            None => Ok(0..rows),
        }
    }

    fn read_layer(
        &self,
        path: &str,
        mask_nan: bool,
        row_range: Option<Range<usize>>,
    ) -> Result<Grid<f32>> {
        let rows = self.resolve_rows(path, row_range)?;
        debug!("reading {path} rows {}..{}", rows.start, rows.end);
        let grid = self.store.read_f32_rows(path, rows)?;
        Ok(if mask_nan { grid.mask_sentinel() } else { grid })
    }

    pub fn elevation(&self, mask_nan: bool, row_range: Option<Range<usize>>) -> Result<Grid<f32>> {
        self.read_layer(layout::ELEVATION, mask_nan, row_range)
    }

    pub fn uncertainty(
        &self,
        mask_nan: bool,
        row_range: Option<Range<usize>>,
    ) -> Result<Grid<f32>> {
        self.read_layer(layout::UNCERTAINTY, mask_nan, row_range)
    }

    /// Sounding counts of the elevation solution, widened to `f32`.
    pub fn density(&self, mask_nan: bool, row_range: Option<Range<usize>>) -> Result<Grid<f32>> {
        let rows = self.resolve_rows(layout::ELEVATION_SOLUTION, row_range)?;
        let counts =
            self.store
                .read_u32_rows(layout::ELEVATION_SOLUTION, layout::NUM_SOUNDINGS, rows)?;
        let grid = counts.map(|c| c as f32);
        Ok(if mask_nan { grid.mask_sentinel() } else { grid })
    }

    pub fn elevation_shape(&self) -> Result<(usize, usize)> {
        self.shape_2d(layout::ELEVATION)
    }

    pub fn uncertainty_shape(&self) -> Result<(usize, usize)> {
        self.shape_2d(layout::UNCERTAINTY)
    }

    pub fn density_shape(&self) -> Result<(usize, usize)> {
        self.shape_2d(layout::ELEVATION_SOLUTION)
    }

    fn layer_min_max(&self, path: &str) -> Result<Option<(f32, f32)>> {
        let (rows, cols) = self.shape_2d(path)?;
        let mut acc = MinMax::default();
        for chunk in self.chunks.chunks(rows, cols) {
            let grid = self.read_layer(path, true, Some(chunk))?;
            acc.extend(grid.values);
        }
        Ok(acc.get())
    }

    /// NaN-ignoring elevation extrema, `None` when every cell is empty.
    pub fn elevation_min_max(&self) -> Result<Option<(f32, f32)>> {
        self.layer_min_max(layout::ELEVATION)
    }

    pub fn uncertainty_min_max(&self) -> Result<Option<(f32, f32)>> {
        self.layer_min_max(layout::UNCERTAINTY)
    }

    /// Depth is negated elevation, so the extrema swap.
    pub fn depth_min_max(&self) -> Result<Option<(f32, f32)>> {
        Ok(self
            .elevation_min_max()?
            .map(|(lo, hi)| (-hi, -lo)))
    }

    // outlier scans

    pub(crate) fn georef(&mut self) -> Result<Georef> {
        let meta = self.populate_metadata()?;
        let sw = meta.sw.ok_or(BagError::MissingMetadata("SW corner"))?;
        let res_x = meta.res_x.ok_or(BagError::MissingMetadata("resolution x"))?;
        let res_y = meta.res_y.ok_or(BagError::MissingMetadata("resolution y"))?;
        let wkt = meta
            .wkt_srs
            .clone()
            .ok_or(BagError::MissingMetadata("horizontal WKT"))?;
        let transform = self.crs.to_geographic(&wkt)?;
        Ok(Georef {
            x_min: sw[0],
            y_min: sw[1],
            res_x,
            res_y,
            transform,
        })
    }

    /// Visit the uncertainty layer chunk by chunk (and the elevation layer
    /// when `with_elevation`), emitting every cell `flag` selects.
    fn scan<F>(&mut self, with_elevation: bool, flag: F) -> Result<Vec<GeoSample>>
    where
        F: Fn(f32, f32) -> Option<f32>,
    {
        let georef = self.georef()?;
        let (rows, cols) = self.uncertainty_shape()?;
        if with_elevation && self.elevation_shape()? != (rows, cols) {
            return Err(BagError::Store(
                "elevation and uncertainty layers differ in shape".to_string(),
            ));
        }

        let mut samples = Vec::new();
        for chunk in self.chunks.chunks(rows, cols) {
            let unc = self.uncertainty(true, Some(chunk.clone()))?;
            let elev = if with_elevation {
                Some(self.elevation(true, Some(chunk.clone()))?)
            } else {
                None
            };

            for (i, &u) in unc.values.iter().enumerate() {
                let e = elev.as_ref().map_or(f32::NAN, |g| g.values[i]);
                if let Some(value) = flag(u, e) {
                    let (lat, lon) = georef.node(chunk.start + i / cols, i % cols)?;
                    samples.push(GeoSample { lat, lon, value });
                }
            }
        }
        debug!("located {} flagged cells", samples.len());
        Ok(samples)
    }

    /// Cells whose uncertainty exceeds `threshold`.
    pub fn uncertainty_greater_than(&mut self, threshold: f32) -> Result<Vec<GeoSample>> {
        self.scan(false, |u, _| (u > threshold).then_some(u))
    }

    /// Cells with an uncertainty but no elevation.
    pub fn uncertainty_has_depth(&mut self) -> Result<Vec<GeoSample>> {
        self.scan(true, |u, e| (u.is_finite() && e.is_nan()).then_some(u))
    }

    /// Cells with an elevation but no uncertainty; the value is the depth.
    pub fn depth_has_uncertainty(&mut self) -> Result<Vec<GeoSample>> {
        self.scan(true, |u, e| (e.is_finite() && u.is_nan()).then_some(-e))
    }

    // tracking list

    pub fn tracking_list(&self) -> Result<Vec<TrackingListEntry>> {
        self.store.read_tracking_list(layout::TRACKING_LIST)
    }

    pub fn tracking_list_fields(&self) -> Vec<String> {
        self.store.fields(layout::TRACKING_LIST)
    }

    pub fn has_valid_row_in_tracking_list(&self) -> Result<bool> {
        let (rows, _) = self.elevation_shape()?;
        for (idx, entry) in self.tracking_list()?.iter().enumerate() {
            if entry.row as usize >= rows {
                warn!("{idx} 'row' entry is invalid: {}", entry.row);
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn has_valid_col_in_tracking_list(&self) -> Result<bool> {
        let (_, cols) = self.elevation_shape()?;
        for (idx, entry) in self.tracking_list()?.iter().enumerate() {
            if entry.col as usize >= cols {
                warn!("{idx} 'col' entry is invalid: {}", entry.col);
                return Ok(false);
            }
        }
        Ok(true)
    }

    // metadata

    /// The embedded XML without NUL padding.
    pub fn metadata_xml(&self) -> Result<Vec<u8>> {
        let mut bytes = self.store.read_chars(layout::METADATA)?;
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        let lead = bytes.iter().take_while(|&&b| b == 0).count();
        bytes.drain(..lead);
        Ok(bytes)
    }

    /// The embedded XML, re-indented.
    pub fn metadata_pretty(&self) -> Result<String> {
        Document::parse(&self.metadata_xml()?)?.to_pretty_string()
    }

    /// Parse the metadata once; later calls return the cached record.
    pub fn populate_metadata(&mut self) -> Result<&Metadata> {
        if self.meta.is_none() {
            let meta = Metadata::from_xml(&self.metadata_xml()?, self.crs.as_ref())?;
            self.meta = Some(meta);
        }
        self.meta
            .as_ref()
            .ok_or_else(|| BagError::UnparseableMetadata("metadata not populated".to_string()))
    }

    /// Cached record, if [`populate_metadata`](Self::populate_metadata) ran.
    pub fn meta(&self) -> Option<&Metadata> {
        self.meta.as_ref()
    }

    /// Parse the current blob again without touching the cache.
    pub fn reparse_metadata(&self) -> Result<Metadata> {
        Metadata::from_xml(&self.metadata_xml()?, self.crs.as_ref())
    }

    /// Write the pretty-printed metadata to `path`, or to
    /// [`DEFAULT_METADATA_FILE`] in the working directory.
    pub fn extract_metadata(&self, path: Option<&Path>) -> Result<()> {
        let path = path.unwrap_or(Path::new(DEFAULT_METADATA_FILE));
        let xml = self.metadata_pretty()?;
        fs::write(path, xml).map_err(|e| BagError::io(path, e))?;
        info!("metadata extracted to {}", path.display());
        Ok(())
    }

    /// Diagnostics of the last validation run.
    pub fn meta_errors(&self) -> &[String] {
        &self.meta_errors
    }

    /// Validate `xml`, or the embedded metadata when `None`. Diagnostics
    /// are reset on every call.
    pub fn validate_metadata(&mut self, xml: Option<&[u8]>) -> Result<bool> {
        self.meta_errors.clear();
        let validation = match xml {
            Some(bytes) => self.validator.validate(bytes)?,
            None => match self.metadata_pretty() {
                Ok(pretty) => self.validator.validate(pretty.as_bytes())?,
                Err(e) => Validation {
                    valid: false,
                    diagnostics: vec![e.to_string()],
                },
            },
        };
        self.meta_errors = validation.diagnostics;
        Ok(validation.valid)
    }

    /// Validate the embedded metadata and describe the outcome.
    pub fn validation_info(&mut self) -> Result<String> {
        let valid = self.validate_metadata(None)?;
        let report = Validation {
            valid,
            diagnostics: self.meta_errors.clone(),
        };
        Ok(report.report(layout::METADATA))
    }

    /// Swap in the metadata document at `path` if it validates.
    ///
    /// Returns `Ok(false)` and leaves the stored blob untouched when the
    /// document is invalid.
    pub fn substitute_metadata(&mut self, path: &Path) -> Result<bool> {
        let xml = fs::read(path).map_err(|e| BagError::io(path, e))?;
        if !self.validate_metadata(Some(&xml))? {
            info!("the passed metadata file is not valid: {}", path.display());
            return Ok(false);
        }
        self.replace_metadata_blob(&xml)?;
        Ok(true)
    }

    /// Delete and recreate the metadata dataset with `xml`.
    ///
    /// Not atomic: a failure between the two steps leaves no metadata.
    pub fn replace_metadata_blob(&mut self, xml: &[u8]) -> Result<()> {
        if self.store.exists(layout::METADATA) {
            self.store.delete(layout::METADATA)?;
        }
        self.store.create_chars(layout::METADATA, xml)?;
        self.meta = None;
        info!("metadata replaced ({} bytes)", xml.len());
        Ok(())
    }

    /// Rewrite the horizontal (and optionally vertical) reference system
    /// codes.
    pub fn modify_wkt_prj(&mut self, wkt_hor: &str, wkt_ver: Option<&str>) -> Result<()> {
        let mut doc = Document::parse(&self.metadata_xml()?)?;
        let codes = select_paths(&doc, meta::CRS_CODE)?;

        let Some(first) = codes.first() else {
            warn!("unable to read the WKT projection string");
            return Ok(());
        };
        if let Some(el) = doc.root.descend_mut(first) {
            el.set_text(wkt_hor);
        }
        if let Some(ver) = wkt_ver {
            match codes.get(1).and_then(|p| doc.root.descend_mut(p)) {
                Some(el) => el.set_text(ver),
                None => {
                    warn!("unable to read the WKT vertical datum string");
                    return Ok(());
                }
            }
        }

        self.replace_metadata_blob(&doc.to_pretty_bytes()?)
    }

    /// Rewrite the geographic bounding box.
    pub fn modify_bbox(&mut self, west: f64, east: f64, south: f64, north: f64) -> Result<()> {
        let mut doc = Document::parse(&self.metadata_xml()?)?;

        let mut targets = Vec::with_capacity(4);
        for (queries, value, label) in [
            (meta::WEST_BOUND, west, "longitude"),
            (meta::EAST_BOUND, east, "longitude"),
            (meta::SOUTH_BOUND, south, "latitude"),
            (meta::NORTH_BOUND, north, "latitude"),
        ] {
            match select_paths(&doc, &queries[..1])?.into_iter().next() {
                Some(path) => targets.push((path, value)),
                None => {
                    warn!("unable to read the bbox's {label} values");
                    return Ok(());
                }
            }
        }

        for (path, value) in targets {
            if let Some(el) = doc.root.descend_mut(&path) {
                el.set_text(&format!("{value:?}"));
            }
        }

        self.replace_metadata_blob(&doc.to_pretty_bytes()?)
    }
}

/// Child-index paths of the first query in `queries` with matches.
fn select_paths(doc: &Document, queries: &[meta::Query]) -> Result<Vec<Vec<usize>>> {
    for query in queries {
        let paths = XPath::compile(query.path, query.namespaces)?.select_paths(&doc.root);
        if !paths.is_empty() {
            return Ok(paths);
        }
    }
    Ok(Vec::new())
}

impl<S: Store> fmt::Display for BagFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<BAG>")?;
        let layers = [
            (layout::ROOT, "root"),
            (layout::ELEVATION, "elevation"),
            (layout::UNCERTAINTY, "uncertainty"),
            (layout::ELEVATION_SOLUTION, "elevation solution"),
            (layout::TRACKING_LIST, "tracking list"),
            (layout::METADATA, "metadata"),
            (layout::VARRES_METADATA, "varres metadata"),
            (layout::VARRES_REFINEMENTS, "varres refinements"),
            (layout::VARRES_TRACKING_LIST, "varres tracking list"),
        ];
        for (path, label) in layers {
            if !self.store.exists(path) {
                continue;
            }
            if path == layout::METADATA {
                match &self.meta {
                    Some(meta) => writeln!(f, "  {meta}")?,
                    None => writeln!(f, "  <{path}>")?,
                }
                continue;
            }
            match self.store.shape(path) {
                Ok(shape) if !shape.is_empty() => writeln!(f, "  <{label} shape={shape:?}>")?,
                _ => writeln!(f, "  <{label}>")?,
            }
            for name in self.store.attr_names(path) {
                if let Ok(value) = self.store.read_attr(path, &name) {
                    writeln!(f, "    <{name}: {value}>")?;
                }
            }
        }
        Ok(())
    }
}
