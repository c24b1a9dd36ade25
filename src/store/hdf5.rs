//! HDF5 backend built on `hdf5-metno`.

use std::ops::Range;
use std::path::{Path, PathBuf};

use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Attribute, File, H5Type, Location};
use tracing::debug;

use super::{layout, AttrValue, Store, TrackingListEntry, VrMetadataEntry, VrRefinement};
use crate::error::{BagError, Result};
use crate::model::Grid;

#[derive(H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct RawTrackingEntry {
    row: u32,
    col: u32,
    depth: f32,
    uncertainty: f32,
    track_code: i8,
    list_series: u16,
}

#[derive(H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct RawSolution {
    shoal_elevation: f32,
    stddev: f32,
    num_soundings: u32,
}

#[derive(H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct RawVrMetadata {
    index: u32,
    dimensions_x: u32,
    dimensions_y: u32,
    resolution_x: f32,
    resolution_y: f32,
    sw_corner_x: f32,
    sw_corner_y: f32,
}

#[derive(H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct RawVrRefinement {
    depth: f32,
    depth_uncrt: f32,
}

impl From<RawTrackingEntry> for TrackingListEntry {
    fn from(raw: RawTrackingEntry) -> Self {
        Self {
            row: raw.row,
            col: raw.col,
            depth: raw.depth,
            uncertainty: raw.uncertainty,
            track_code: raw.track_code,
            list_series: raw.list_series,
        }
    }
}

impl From<RawVrMetadata> for VrMetadataEntry {
    fn from(raw: RawVrMetadata) -> Self {
        Self {
            index: raw.index,
            dimensions_x: raw.dimensions_x,
            dimensions_y: raw.dimensions_y,
            resolution_x: raw.resolution_x,
            resolution_y: raw.resolution_y,
            sw_corner_x: raw.sw_corner_x,
            sw_corner_y: raw.sw_corner_y,
        }
    }
}

/// True for an existing HDF5 file that contains the `BAG_root` group.
pub fn is_bag(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if !super::is_hdf5(path) {
        return false;
    }
    match File::open(path) {
        Ok(file) => file.link_exists(layout::ROOT),
        Err(e) => {
            debug!("unable to open {}: {e}", path.display());
            false
        }
    }
}

/// A BAG container backed by an HDF5 file on disk.
pub struct Hdf5Store {
    path: PathBuf,
    file: File,
}

impl Hdf5Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open_rw(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Create a new file holding an empty BAG skeleton.
    pub fn create_template(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("create new BAG file: {}", path.display());
        let file = File::create(path)?;

        let root = file.create_group(layout::ROOT)?;
        let version = FixedAscii::<32>::from_ascii(layout::VERSION.as_bytes())
            .map_err(|e| BagError::Store(e.to_string()))?;
        root.new_attr::<FixedAscii<32>>()
            .shape(())
            .create(layout::VERSION_ATTR)?
            .write_scalar(&version)?;

        for (name, min_attr, max_attr) in [
            (
                layout::ELEVATION,
                layout::ELEVATION_MIN_ATTR,
                layout::ELEVATION_MAX_ATTR,
            ),
            (
                layout::UNCERTAINTY,
                layout::UNCERTAINTY_MIN_ATTR,
                layout::UNCERTAINTY_MAX_ATTR,
            ),
        ] {
            let layer = file.new_dataset::<f32>().shape((0, 0)).create(name)?;
            for attr in [min_attr, max_attr] {
                layer
                    .new_attr::<f32>()
                    .shape(())
                    .create(attr)?
                    .write_scalar(&0.0f32)?;
            }
        }

        file.new_dataset::<u8>()
            .shape(1)
            .create(layout::METADATA)?;

        let tracking_list = file
            .new_dataset::<RawTrackingEntry>()
            .shape(0)
            .create(layout::TRACKING_LIST)?;
        tracking_list
            .new_attr::<u32>()
            .shape(())
            .create(layout::TRACKING_LIST_LEN_ATTR)?
            .write_scalar(&0u32)?;

        file.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self, path: &str) -> Result<Location> {
        if let Ok(ds) = self.file.dataset(path) {
            return Ok(Location::clone(&ds));
        }
        Ok(Location::clone(&self.file.group(path)?))
    }
}

fn read_attr_value(attr: &Attribute) -> Result<AttrValue> {
    let descriptor = attr.dtype()?.to_descriptor()?;
    let first = |n: usize| {
        BagError::Store(format!(
            "attribute {} holds {n} values, expected one",
            attr.name()
        ))
    };
    Ok(match descriptor {
        TypeDescriptor::Float(_) => {
            let v = attr.read_raw::<f64>()?;
            AttrValue::Float(*v.first().ok_or_else(|| first(v.len()))?)
        }
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            let v = attr.read_raw::<i64>()?;
            AttrValue::Int(*v.first().ok_or_else(|| first(v.len()))?)
        }
        TypeDescriptor::FixedAscii(_) => {
            let v = attr.read_raw::<FixedAscii<256>>()?;
            let s = v.first().ok_or_else(|| first(v.len()))?;
            AttrValue::Text(s.as_str().trim_end_matches('\0').to_string())
        }
        TypeDescriptor::FixedUnicode(_) => {
            let v = attr.read_raw::<FixedUnicode<256>>()?;
            let s = v.first().ok_or_else(|| first(v.len()))?;
            AttrValue::Text(s.as_str().trim_end_matches('\0').to_string())
        }
        TypeDescriptor::VarLenAscii => {
            let v = attr.read_raw::<VarLenAscii>()?;
            let s = v.first().ok_or_else(|| first(v.len()))?;
            AttrValue::Text(s.as_str().to_string())
        }
        TypeDescriptor::VarLenUnicode => {
            let v = attr.read_raw::<VarLenUnicode>()?;
            let s = v.first().ok_or_else(|| first(v.len()))?;
            AttrValue::Text(s.as_str().to_string())
        }
        other => {
            return Err(BagError::Store(format!(
                "unsupported attribute type {other:?} for {}",
                attr.name()
            )))
        }
    })
}

impl Store for Hdf5Store {
    fn exists(&self, path: &str) -> bool {
        self.file.link_exists(path)
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>> {
        Ok(self.file.dataset(path)?.shape())
    }

    fn fields(&self, path: &str) -> Vec<String> {
        let descriptor = self
            .file
            .dataset(path)
            .and_then(|ds| ds.dtype())
            .and_then(|dt| dt.to_descriptor());
        match descriptor {
            Ok(TypeDescriptor::Compound(compound)) => {
                compound.fields.into_iter().map(|f| f.name).collect()
            }
            _ => Vec::new(),
        }
    }

    fn read_f32_rows(&self, path: &str, rows: Range<usize>) -> Result<Grid<f32>> {
        let ds = self.file.dataset(path)?;
        let cols = ds.shape().get(1).copied().unwrap_or(0);
        let n_rows = rows.end - rows.start;
        if n_rows == 0 || cols == 0 {
            return Ok(Grid::new(0, cols, Vec::new()));
        }
        let block = ds.read_slice_2d::<f32, _>((rows, ..))?;
        Ok(Grid::new(n_rows, cols, block.iter().copied().collect()))
    }

    fn read_u32_rows(&self, path: &str, field: &str, rows: Range<usize>) -> Result<Grid<u32>> {
        if field != layout::NUM_SOUNDINGS {
            return Err(BagError::Store(format!("{path} has no member {field}")));
        }
        let ds = self.file.dataset(path)?;
        let cols = ds.shape().get(1).copied().unwrap_or(0);
        let n_rows = rows.end - rows.start;
        if n_rows == 0 || cols == 0 {
            return Ok(Grid::new(0, cols, Vec::new()));
        }
        let block = ds.read_slice_2d::<RawSolution, _>((rows, ..))?;
        Ok(Grid::new(
            n_rows,
            cols,
            block.iter().map(|s| s.num_soundings).collect(),
        ))
    }

    /// Metadata written by other tools is a run of one-byte strings; ours
    /// is plain bytes. Both read back the same.
    fn read_chars(&self, path: &str) -> Result<Vec<u8>> {
        let ds = self.file.dataset(path)?;
        match ds.dtype()?.to_descriptor()? {
            TypeDescriptor::Unsigned(_) => Ok(ds.read_raw::<u8>()?),
            TypeDescriptor::Integer(_) => Ok(ds
                .read_raw::<i8>()?
                .into_iter()
                .map(|c| c as u8)
                .collect()),
            _ => Ok(ds
                .read_raw::<FixedAscii<1>>()?
                .iter()
                .map(|c| c.as_bytes().first().copied().unwrap_or(0))
                .collect()),
        }
    }

    fn read_attr(&self, path: &str, name: &str) -> Result<AttrValue> {
        read_attr_value(&self.location(path)?.attr(name)?)
    }

    fn attr_names(&self, path: &str) -> Vec<String> {
        self.location(path)
            .ok()
            .and_then(|loc| loc.attr_names().ok())
            .unwrap_or_default()
    }

    fn read_tracking_list(&self, path: &str) -> Result<Vec<TrackingListEntry>> {
        let ds = self.file.dataset(path)?;
        if ds.size() == 0 {
            return Ok(Vec::new());
        }
        Ok(ds
            .read_raw::<RawTrackingEntry>()?
            .into_iter()
            .map(TrackingListEntry::from)
            .collect())
    }

    fn read_vr_metadata(&self, path: &str) -> Result<Grid<VrMetadataEntry>> {
        let ds = self.file.dataset(path)?;
        let shape = ds.shape();
        let (rows, cols) = match shape.as_slice() {
            [rows, cols] => (*rows, *cols),
            other => {
                return Err(BagError::Store(format!(
                    "{path} has shape {other:?}, expected two dimensions"
                )))
            }
        };
        let values = ds
            .read_raw::<RawVrMetadata>()?
            .into_iter()
            .map(VrMetadataEntry::from)
            .collect();
        Ok(Grid::new(rows, cols, values))
    }

    fn read_vr_refinements(&self, path: &str) -> Result<Vec<VrRefinement>> {
        Ok(self
            .file
            .dataset(path)?
            .read_raw::<RawVrRefinement>()?
            .into_iter()
            .map(|r| VrRefinement {
                depth: r.depth,
                depth_uncrt: r.depth_uncrt,
            })
            .collect())
    }

    fn create_chars(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.file
            .new_dataset_builder()
            .with_data(data)
            .create(path)?;
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        self.file.unlink(path)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_bag() {
        let dir = TempDir::new().unwrap();

        let bag = dir.path().join("template.bag");
        Hdf5Store::create_template(&bag).unwrap();
        assert!(is_bag(&bag));

        let plain = dir.path().join("plain.h5");
        File::create(&plain).unwrap().create_group("other").unwrap();
        assert!(!is_bag(&plain));

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "not hdf5").unwrap();
        assert!(!is_bag(&text));

        assert!(!is_bag(dir.path().join("missing.bag")));
    }

    #[test]
    fn test_template_layout_and_metadata_replace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template.bag");
        let mut store = Hdf5Store::create_template(&path).unwrap();

        assert_eq!(
            store.read_attr(layout::ROOT, layout::VERSION_ATTR).unwrap(),
            AttrValue::Text(layout::VERSION.to_string())
        );
        assert_eq!(store.shape(layout::ELEVATION).unwrap(), vec![0, 0]);
        assert!(store.read_tracking_list(layout::TRACKING_LIST).unwrap().is_empty());
        assert_eq!(store.fields(layout::TRACKING_LIST).len(), 6);

        store.delete(layout::METADATA).unwrap();
        store.create_chars(layout::METADATA, b"<a>b</a>").unwrap();
        store.flush().unwrap();
        drop(store);

        let store = Hdf5Store::open(&path).unwrap();
        assert_eq!(store.read_chars(layout::METADATA).unwrap(), b"<a>b</a>");
    }

    #[test]
    fn test_metadata_keeps_utf8_and_reads_string_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("utf8.bag");
        let mut store = Hdf5Store::create_template(&path).unwrap();

        let xml = "<a>Baie-Comeau © Québec</a>".as_bytes();
        store.delete(layout::METADATA).unwrap();
        store.create_chars(layout::METADATA, xml).unwrap();
        assert_eq!(store.read_chars(layout::METADATA).unwrap(), xml);

        let legacy = b"<b/>"
            .iter()
            .map(|b| FixedAscii::<1>::from_ascii(&[*b]).unwrap())
            .collect::<Vec<_>>();
        store.delete(layout::METADATA).unwrap();
        store
            .file
            .new_dataset_builder()
            .with_data(&legacy[..])
            .create(layout::METADATA)
            .unwrap();
        assert_eq!(store.read_chars(layout::METADATA).unwrap(), b"<b/>");
    }
}
