pub mod bag;
pub mod crs;
pub mod error;
pub mod meta;
pub mod model;
pub mod store;
pub mod validate;
pub mod vr;
pub mod writer;
pub mod xml;

pub use bag::{BagFile, ChunkPolicy, RowRange, DEFAULT_METADATA_FILE};
pub use crs::{CrsEngine, GdalCrs, PointTransform};
pub use error::{BagError, Result};
pub use meta::Metadata;
pub use model::{GeoSample, Grid, BAG_NAN};
pub use store::{is_hdf5, MemoryStore, Store, TrackingListEntry};
pub use validate::{MetadataValidator, Resources, Validation, XmlValidator, XmllintValidator};
pub use writer::{BboxFormat, BboxWriter, RasterFormat, RasterWriter, TrackListWriter};

#[cfg(feature = "hdf5")]
pub use store::{hdf5::is_bag, Hdf5Store};
