//! Typed access to the hierarchical container holding a BAG.
//!
//! The container itself (HDF5 on disk) is an external collaborator; this
//! module only fixes the operations the BAG model needs from it and the
//! record layouts of the compound datasets.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use crate::error::Result;
use crate::model::Grid;

#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod memory;

#[cfg(feature = "hdf5")]
pub use self::hdf5::Hdf5Store;
pub use memory::MemoryStore;

/// Dataset and attribute names of the BAG layout.
pub mod layout {
    pub const ROOT: &str = "BAG_root";
    pub const VERSION_ATTR: &str = "Bag Version";
    pub const VERSION: &str = "1.6.3";

    pub const ELEVATION: &str = "BAG_root/elevation";
    pub const ELEVATION_MIN_ATTR: &str = "Minimum Elevation Value";
    pub const ELEVATION_MAX_ATTR: &str = "Maximum Elevation Value";

    pub const UNCERTAINTY: &str = "BAG_root/uncertainty";
    pub const UNCERTAINTY_MIN_ATTR: &str = "Minimum Uncertainty Value";
    pub const UNCERTAINTY_MAX_ATTR: &str = "Maximum Uncertainty Value";

    pub const METADATA: &str = "BAG_root/metadata";

    pub const TRACKING_LIST: &str = "BAG_root/tracking_list";
    pub const TRACKING_LIST_LEN_ATTR: &str = "Tracking List Length";

    pub const ELEVATION_SOLUTION: &str = "BAG_root/elevation_solution";
    pub const NUM_SOUNDINGS: &str = "num_soundings";

    pub const VARRES_METADATA: &str = "BAG_root/varres_metadata";
    pub const VARRES_REFINEMENTS: &str = "BAG_root/varres_refinements";
    pub const VARRES_TRACKING_LIST: &str = "BAG_root/varres_tracking_list";
}

const HDF5_SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n";

/// True when the file carries the HDF5 superblock signature.
///
/// The signature may sit at offset 0, 512, 1024, 2048, ... when a user
/// block precedes it.
pub fn is_hdf5(path: impl AsRef<Path>) -> bool {
    let Ok(mut file) = File::open(path.as_ref()) else {
        return false;
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);

    let mut buf = [0u8; 8];
    let mut offset = 0u64;
    while offset + 8 <= len {
        if file.seek(SeekFrom::Start(offset)).is_err() || file.read_exact(&mut buf).is_err() {
            return false;
        }
        if buf == HDF5_SIGNATURE {
            return true;
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    false
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Manually edited or flagged grid node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingListEntry {
    pub row: u32,
    pub col: u32,
    pub depth: f32,
    pub uncertainty: f32,
    pub track_code: i8,
    pub list_series: u16,
}

impl TrackingListEntry {
    pub const FIELDS: [&'static str; 6] = [
        "row",
        "col",
        "depth",
        "uncertainty",
        "track_code",
        "list_series",
    ];
}

/// One coarse cell of the variable-resolution index.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VrMetadataEntry {
    pub index: u32,
    pub dimensions_x: u32,
    pub dimensions_y: u32,
    pub resolution_x: f32,
    pub resolution_y: f32,
    pub sw_corner_x: f32,
    pub sw_corner_y: f32,
}

impl VrMetadataEntry {
    /// Number of refinement samples owned by this coarse cell.
    pub fn refinement_count(&self) -> usize {
        self.dimensions_x as usize * self.dimensions_y as usize
    }
}

/// One refinement sample of the flattened VR refinements array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VrRefinement {
    pub depth: f32,
    pub depth_uncrt: f32,
}

pub trait Store {
    /// True when a group or dataset exists at `path`.
    fn exists(&self, path: &str) -> bool;

    fn shape(&self, path: &str) -> Result<Vec<usize>>;

    /// Names of the members of a compound dataset (empty for plain ones).
    fn fields(&self, path: &str) -> Vec<String>;

    fn read_f32_rows(&self, path: &str, rows: Range<usize>) -> Result<Grid<f32>>;

    /// Read one integer member of a compound 2D dataset.
    fn read_u32_rows(&self, path: &str, field: &str, rows: Range<usize>) -> Result<Grid<u32>>;

    /// Read a one-character-per-cell dataset as bytes.
    fn read_chars(&self, path: &str) -> Result<Vec<u8>>;

    fn read_attr(&self, path: &str, name: &str) -> Result<AttrValue>;

    fn attr_names(&self, path: &str) -> Vec<String>;

    fn read_tracking_list(&self, path: &str) -> Result<Vec<TrackingListEntry>>;

    fn read_vr_metadata(&self, path: &str) -> Result<Grid<VrMetadataEntry>>;

    fn read_vr_refinements(&self, path: &str) -> Result<Vec<VrRefinement>>;

    /// Create a one-character-per-cell dataset sized to `data`.
    fn create_chars(&mut self, path: &str, data: &[u8]) -> Result<()>;

    fn delete(&mut self, path: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}
