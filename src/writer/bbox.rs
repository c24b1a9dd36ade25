use anyhow::{bail, Context, Result};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{
    FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType,
};
use gdal::DriverManager;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crs::WGS84_EPSG;
use crate::meta::{elide, Metadata};

const LAYER_NAME: &str = "BAG";
const DEFAULT_TITLE: &str = "Metadata";
const SRS_MAX_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BboxFormat {
    GeoJson,
    Gml,
    Kml,
    Shapefile,
}

impl BboxFormat {
    pub const TAGS: [&'static str; 4] = ["gjs", "gml", "kml", "shp"];

    /// Accepts the short tags and the long names.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "gjs" | "geojson" => Some(Self::GeoJson),
            "gml" => Some(Self::Gml),
            "kml" => Some(Self::Kml),
            "shp" | "shapefile" => Some(Self::Shapefile),
            _ => None,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::GeoJson => "GeoJSON",
            Self::Gml => "GML",
            Self::Kml => "KML",
            Self::Shapefile => "ESRI Shapefile",
        }
    }

    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::GeoJson => "bag.geojson",
            Self::Gml => "bag.gml",
            Self::Kml => "bag.kml",
            Self::Shapefile => "bag.shp",
        }
    }
}

/// Writes the metadata bounding box as a single WGS84 line feature.
#[derive(Debug, Clone)]
pub struct BboxWriter {
    format: BboxFormat,
    title: String,
}

impl BboxWriter {
    pub fn new(format: BboxFormat) -> Self {
        Self {
            format,
            title: DEFAULT_TITLE.to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Attribute columns for the populated metadata fields, in output order.
    fn fields(&self, meta: &Metadata) -> Vec<(&'static str, OGRFieldType::Type, FieldValue)> {
        let mut fields = vec![(
            "Name",
            OGRFieldType::OFTString,
            FieldValue::StringValue(self.title.clone()),
        )];
        if let Some(rows) = meta.rows {
            fields.push(("Rows", OGRFieldType::OFTInteger, FieldValue::IntegerValue(rows as i32)));
        }
        if let Some(cols) = meta.cols {
            fields.push(("Cols", OGRFieldType::OFTInteger, FieldValue::IntegerValue(cols as i32)));
        }
        if let Some(ne) = meta.ne {
            fields.push(("NE", OGRFieldType::OFTString, FieldValue::StringValue(format!("{ne:?}"))));
        }
        if let Some(sw) = meta.sw {
            fields.push(("SW", OGRFieldType::OFTString, FieldValue::StringValue(format!("{sw:?}"))));
        }
        if let Some(res_x) = meta.res_x {
            fields.push(("ResX", OGRFieldType::OFTReal, FieldValue::RealValue(res_x)));
        }
        if let Some(res_y) = meta.res_y {
            fields.push(("ResY", OGRFieldType::OFTReal, FieldValue::RealValue(res_y)));
        }
        if let Some(text) = &meta.abstract_text {
            fields.push(("Abstract", OGRFieldType::OFTString, FieldValue::StringValue(text.clone())));
        }
        if let Some(date) = &meta.date {
            fields.push(("Date", OGRFieldType::OFTString, FieldValue::StringValue(date.clone())));
        }
        if let Some(wkt) = &meta.wkt_srs {
            fields.push((
                "SRS",
                OGRFieldType::OFTString,
                FieldValue::StringValue(elide(wkt, SRS_MAX_LEN)),
            ));
        }
        fields.push((
            "Tools",
            OGRFieldType::OFTString,
            FieldValue::StringValue(format!("r{}", env!("CARGO_PKG_VERSION"))),
        ));
        fields
    }

    /// Write to `output`, or to the format's default name in the working
    /// directory. Returns the written path.
    pub fn write(&self, meta: &Metadata, output: Option<&Path>) -> Result<PathBuf> {
        let Some(wkt) = meta.wkt_bbox() else {
            bail!("invalid bbox read in BAG metadata");
        };

        let driver = DriverManager::get_driver_by_name(self.format.driver_name())
            .with_context(|| format!("{} driver not available", self.format.driver_name()))?;

        let output = match output {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(self.format.default_file_name()),
        };
        if output.exists() {
            fs::remove_file(&output)
                .with_context(|| format!("Failed to remove {}", output.display()))?;
        }

        let mut dataset = driver
            .create_vector_only(&output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        let srs = SpatialRef::from_epsg(WGS84_EPSG).context("Failed to create WGS84 SpatialRef")?;
        let mut layer = dataset
            .create_layer(LayerOptions {
                name: LAYER_NAME,
                srs: Some(&srs),
                ty: OGRwkbGeometryType::wkbLineString25D,
                options: None,
            })
            .context("Failed to create layer")?;

        let fields = self.fields(meta);
        let defs: Vec<(&str, OGRFieldType::Type)> =
            fields.iter().map(|(name, ty, _)| (*name, *ty)).collect();
        layer
            .create_defn_fields(&defs)
            .context("Failed to define layer fields")?;

        let names: Vec<&str> = fields.iter().map(|(name, _, _)| *name).collect();
        let values: Vec<FieldValue> = fields.into_iter().map(|(_, _, value)| value).collect();
        let geometry = Geometry::from_wkt(&wkt).context("Failed to build bbox geometry")?;
        layer
            .create_feature_fields(geometry, &names, &values)
            .context("Failed to write bbox feature")?;

        tracing::info!("bbox written to {}", output.display());
        Ok(output)
    }
}
