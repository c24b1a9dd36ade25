use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BagError {
    #[error("not a valid BAG container: {0}")]
    NotABag(String),

    #[error("unparseable metadata: {0}")]
    UnparseableMetadata(String),

    #[error("invalid row range {start}..{stop} for a layer with {rows} rows")]
    InvalidRowRange { start: i64, stop: i64, rows: usize },

    #[error("missing dataset: {0}")]
    MissingDataset(String),

    #[error("missing metadata field required for georeferencing: {0}")]
    MissingMetadata(&'static str),

    #[error("store error: {0}")]
    Store(String),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("CRS error: {0}")]
    Crs(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("driver not available: {0}")]
    Driver(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BagError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BagError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BagError>;
