//! Fixtures shared by the integration tests: an in-memory BAG, a CRS that
//! maps easting/northing straight to lon/lat, and a validator that only
//! accepts ISO `MI_Metadata` documents.

#![allow(dead_code)]

use std::path::Path;

use bag_tools::crs::{CrsEngine, PointTransform};
use bag_tools::store::layout;
use bag_tools::validate::{MetadataValidator, Resources, XmlValidator};
use bag_tools::{BagFile, Grid, MemoryStore, Result};
use tempfile::TempDir;

pub struct IdentityCrs;

struct Identity;

impl PointTransform for Identity {
    fn transform(&self, easting: f64, northing: f64) -> Result<(f64, f64)> {
        Ok((northing, easting))
    }
}

impl CrsEngine for IdentityCrs {
    fn wkt_from_epsg(&self, code: u32) -> Result<String> {
        Ok(format!("LOCAL_CS[\"EPSG:{code}\"]"))
    }

    fn to_geographic(&self, _wkt: &str) -> Result<Box<dyn PointTransform>> {
        Ok(Box::new(Identity))
    }
}

pub struct IsoOnly;

impl XmlValidator for IsoOnly {
    fn validate_schema(&self, doc: &[u8], _xsd: &Path) -> Result<(bool, Vec<String>)> {
        let text = String::from_utf8_lossy(doc);
        if text.contains("gmi:MI_Metadata") {
            Ok((true, Vec::new()))
        } else {
            Ok((false, vec!["root element is not gmi:MI_Metadata".to_string()]))
        }
    }

    fn validate_schematron(&self, doc: &[u8], _sch: &Path) -> Result<(bool, Vec<String>)> {
        let text = String::from_utf8_lossy(doc);
        if text.contains("gmd:abstract") {
            Ok((true, Vec::new()))
        } else {
            Ok((false, vec!["an abstract is required".to_string()]))
        }
    }
}

/// Folder with empty schema trees, enough for the path checks.
pub fn resources() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("iso19139").join("bag")).unwrap();
    std::fs::create_dir_all(dir.path().join("iso19757-3")).unwrap();
    dir
}

/// ISO metadata for a 3 x 3 grid at (100, 200) with 2 x 3 spacing.
pub fn iso_metadata(uncertainty_type: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gmi:MI_Metadata xmlns:gmi="http://www.isotc211.org/2005/gmi"
    xmlns:gmd="http://www.isotc211.org/2005/gmd"
    xmlns:gco="http://www.isotc211.org/2005/gco"
    xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:bag="http://www.opennavsurf.org/schema/bag">
  <gmd:dateStamp><gco:Date>2016-06-13</gco:Date></gmd:dateStamp>
  <gmd:spatialRepresentationInfo>
    <gmd:MD_Georectified>
      <gmd:axisDimensionProperties>
        <gmd:MD_Dimension>
          <gmd:dimensionSize><gco:Integer>3</gco:Integer></gmd:dimensionSize>
          <gmd:resolution><gco:Measure uom="m">2.0</gco:Measure></gmd:resolution>
        </gmd:MD_Dimension>
      </gmd:axisDimensionProperties>
      <gmd:axisDimensionProperties>
        <gmd:MD_Dimension>
          <gmd:dimensionSize><gco:Integer>3</gco:Integer></gmd:dimensionSize>
          <gmd:resolution><gco:Measure uom="m">3.0</gco:Measure></gmd:resolution>
        </gmd:MD_Dimension>
      </gmd:axisDimensionProperties>
      <gmd:cornerPoints>
        <gml:Point gml:id="id1">
          <gml:coordinates decimal="." cs="," ts=" ">100.0,200.0 104.0,206.0</gml:coordinates>
        </gml:Point>
      </gmd:cornerPoints>
    </gmd:MD_Georectified>
  </gmd:spatialRepresentationInfo>
  <gmd:referenceSystemInfo>
    <gmd:MD_ReferenceSystem>
      <gmd:referenceSystemIdentifier>
        <gmd:RS_Identifier>
          <gmd:code><gco:CharacterString>32619</gco:CharacterString></gmd:code>
          <gmd:codeSpace><gco:CharacterString>EPSG</gco:CharacterString></gmd:codeSpace>
        </gmd:RS_Identifier>
      </gmd:referenceSystemIdentifier>
    </gmd:MD_ReferenceSystem>
  </gmd:referenceSystemInfo>
  <gmd:referenceSystemInfo>
    <gmd:MD_ReferenceSystem>
      <gmd:referenceSystemIdentifier>
        <gmd:RS_Identifier>
          <gmd:code><gco:CharacterString>VERT_CS["MLLW"]</gco:CharacterString></gmd:code>
          <gmd:codeSpace><gco:CharacterString>WKT</gco:CharacterString></gmd:codeSpace>
        </gmd:RS_Identifier>
      </gmd:referenceSystemIdentifier>
    </gmd:MD_ReferenceSystem>
  </gmd:referenceSystemInfo>
  <gmd:identificationInfo>
    <bag:BAG_DataIdentification>
      <gmd:abstract><gco:CharacterString>Fixture survey</gco:CharacterString></gmd:abstract>
      <gmd:extent>
        <gmd:EX_Extent>
          <gmd:geographicElement>
            <gmd:EX_GeographicBoundingBox>
              <gmd:westBoundLongitude><gco:Decimal>-70.5</gco:Decimal></gmd:westBoundLongitude>
              <gmd:eastBoundLongitude><gco:Decimal>-70.4</gco:Decimal></gmd:eastBoundLongitude>
              <gmd:southBoundLatitude><gco:Decimal>50.1</gco:Decimal></gmd:southBoundLatitude>
              <gmd:northBoundLatitude><gco:Decimal>50.2</gco:Decimal></gmd:northBoundLatitude>
            </gmd:EX_GeographicBoundingBox>
          </gmd:geographicElement>
        </gmd:EX_Extent>
      </gmd:extent>
      <bag:verticalUncertaintyType>
        <bag:BAG_VertUncertCode codeList="x" codeListValue="{uncertainty_type}">{uncertainty_type}</bag:BAG_VertUncertCode>
      </bag:verticalUncertaintyType>
    </bag:BAG_DataIdentification>
  </gmd:identificationInfo>
</gmi:MI_Metadata>
"#
    )
}

/// Template store holding the given layers and metadata.
pub fn store_with(elevation: Grid<f32>, uncertainty: Grid<f32>, xml: &str) -> MemoryStore {
    let mut store = MemoryStore::bag_template();
    store.insert_float(layout::ELEVATION, elevation);
    store.insert_float(layout::UNCERTAINTY, uncertainty);
    store.insert_chars(layout::METADATA, xml.as_bytes());
    store
}

/// Wrap `store` with the test CRS and validator. Keep the returned folder
/// alive for as long as validation is used.
pub fn open(store: MemoryStore) -> (BagFile<MemoryStore>, TempDir) {
    let dir = resources();
    let validator = MetadataValidator::new(Box::new(IsoOnly), Resources::new(dir.path()));
    let bag = BagFile::from_store(store)
        .unwrap()
        .with_crs_engine(Box::new(IdentityCrs))
        .with_validator(validator);
    (bag, dir)
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}
