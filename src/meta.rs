//! Typed view of the ISO-19139 metadata embedded in a BAG.
//!
//! Each field is located through an ordered table of [`Query`] strategies:
//! the current ISO/BAG profile first, then the legacy `smXML` profile. The
//! first query that yields anything wins. Every extractor is independent:
//! a missing or malformed field is logged and left as `None`.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::crs::CrsEngine;
use crate::error::Result;
use crate::xml::{Document, Element, XPath};

pub const ISO_NS: &[(&str, &str)] = &[
    ("bag", "http://www.opennavsurf.org/schema/bag"),
    ("gco", "http://www.isotc211.org/2005/gco"),
    ("gmd", "http://www.isotc211.org/2005/gmd"),
    ("gmi", "http://www.isotc211.org/2005/gmi"),
    ("gml", "http://www.opengis.net/gml/3.2"),
    ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
];

pub const LEGACY_NS: &[(&str, &str)] = &[
    ("gml", "http://www.opengis.net/gml"),
    ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
    ("smXML", "http://metadata.dgiwg.org/smXML"),
];

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Uncertainty type of product uncertainty, with the spelling emitted by
/// some producers.
const PRODUCT_UNCERTAINTY: [&str; 2] = ["productUncert", "ProductUncert"];

/// One way of locating a metadata field.
#[derive(Debug, Clone, Copy)]
pub struct Query {
    pub path: &'static str,
    pub namespaces: &'static [(&'static str, &'static str)],
}

const fn iso(path: &'static str) -> Query {
    Query {
        path,
        namespaces: ISO_NS,
    }
}

const fn legacy(path: &'static str) -> Query {
    Query {
        path,
        namespaces: LEGACY_NS,
    }
}

pub(crate) const DIMENSION_SIZE: &[Query] = &[
    iso("gmd:spatialRepresentationInfo/gmd:MD_Georectified/gmd:axisDimensionProperties/gmd:MD_Dimension/gmd:dimensionSize/gco:Integer"),
    legacy("spatialRepresentationInfo/smXML:MD_Georectified/axisDimensionProperties/smXML:MD_Dimension/dimensionSize"),
];

pub(crate) const RESOLUTION: &[Query] = &[
    iso("gmd:spatialRepresentationInfo/gmd:MD_Georectified/gmd:axisDimensionProperties/gmd:MD_Dimension/gmd:resolution/gco:Measure"),
    legacy("spatialRepresentationInfo/smXML:MD_Georectified/axisDimensionProperties/smXML:MD_Dimension/resolution/smXML:Measure/smXML:value"),
];

pub(crate) const CORNER_POINTS: &[Query] = &[
    iso("gmd:spatialRepresentationInfo/gmd:MD_Georectified/gmd:cornerPoints/gml:Point/gml:coordinates"),
    legacy("spatialRepresentationInfo/smXML:MD_Georectified/cornerPoints/gml:Point/gml:coordinates"),
];

pub(crate) const CRS_CODE: &[Query] = &[iso(
    "gmd:referenceSystemInfo/gmd:MD_ReferenceSystem/gmd:referenceSystemIdentifier/gmd:RS_Identifier/gmd:code/gco:CharacterString",
)];

pub(crate) const CRS_CODE_SPACE: &[Query] = &[iso(
    "gmd:referenceSystemInfo/gmd:MD_ReferenceSystem/gmd:referenceSystemIdentifier/gmd:RS_Identifier/gmd:codeSpace/gco:CharacterString",
)];

const LEGACY_CRS: &[Query] = &[legacy("referenceSystemInfo/smXML:MD_CRS")];

pub(crate) const WEST_BOUND: &[Query] = &[
    iso("gmd:EX_GeographicBoundingBox/gmd:westBoundLongitude/gco:Decimal"),
    legacy("smXML:EX_GeographicBoundingBox/westBoundLongitude"),
];

pub(crate) const EAST_BOUND: &[Query] = &[
    iso("gmd:EX_GeographicBoundingBox/gmd:eastBoundLongitude/gco:Decimal"),
    legacy("smXML:EX_GeographicBoundingBox/eastBoundLongitude"),
];

pub(crate) const SOUTH_BOUND: &[Query] = &[
    iso("gmd:EX_GeographicBoundingBox/gmd:southBoundLatitude/gco:Decimal"),
    legacy("smXML:EX_GeographicBoundingBox/southBoundLatitude"),
];

pub(crate) const NORTH_BOUND: &[Query] = &[
    iso("gmd:EX_GeographicBoundingBox/gmd:northBoundLatitude/gco:Decimal"),
    legacy("smXML:EX_GeographicBoundingBox/northBoundLatitude"),
];

const ABSTRACT: &[Query] = &[iso("gmd:abstract/gco:CharacterString"), legacy("abstract")];

const DATE: &[Query] = &[
    iso("gmd:CI_Date/gmd:date/gco:Date"),
    legacy("smXML:CI_Date/date"),
    iso("gmd:dateStamp/gco:Date"),
];

const SURVEY_BEGIN: &[Query] = &[
    iso("gmd:identificationInfo/bag:BAG_DataIdentification/gmd:extent/gmd:EX_Extent/gmd:temporalElement/gmd:EX_TemporalExtent/gmd:extent/gml:TimePeriod/gml:beginPosition"),
    legacy("identificationInfo/smXML:BAG_DataIdentification/extent/smXML:EX_Extent/temporalElement/smXML:EX_TemporalExtent/extent/TimePeriod/beginPosition"),
];

const SURVEY_END: &[Query] = &[
    iso("gmd:identificationInfo/bag:BAG_DataIdentification/gmd:extent/gmd:EX_Extent/gmd:temporalElement/gmd:EX_TemporalExtent/gmd:extent/gml:TimePeriod/gml:endPosition"),
    legacy("identificationInfo/smXML:BAG_DataIdentification/extent/smXML:EX_Extent/temporalElement/smXML:EX_TemporalExtent/extent/TimePeriod/endPosition"),
];

const UNCERTAINTY_TYPE: &[Query] = &[
    iso("bag:verticalUncertaintyType/bag:BAG_VertUncertCode/@codeListValue"),
    legacy("verticalUncertaintyType"),
];

const SECURITY_CONSTRAINTS: &[Query] = &[
    iso("gmd:MD_SecurityConstraints/gmd:classification/gmd:MD_ClassificationCode/@codeListValue"),
    legacy("smXML:MD_SecurityConstraints/classification"),
];

/// Matches of the first query in `queries` that finds anything.
pub(crate) fn lookup(root: &Element, queries: &[Query]) -> Vec<String> {
    for query in queries {
        match XPath::compile(query.path, query.namespaces) {
            Ok(xpath) => {
                let values = xpath.values(root);
                if !values.is_empty() {
                    return values;
                }
            }
            Err(e) => warn!("invalid metadata query {}: {e}", query.path),
        }
    }
    Vec::new()
}

fn lookup_elements<'a>(root: &'a Element, queries: &[Query]) -> Vec<&'a Element> {
    for query in queries {
        if let Ok(xpath) = XPath::compile(query.path, query.namespaces) {
            let found = xpath.select(root);
            if !found.is_empty() {
                return found;
            }
        }
    }
    Vec::new()
}

fn parse_pair<T: std::str::FromStr>(values: &[String]) -> Option<(T, T)> {
    let first = values.first()?.trim().parse().ok()?;
    let second = values.get(1)?.trim().parse().ok()?;
    Some((first, second))
}

fn parse_first<T: std::str::FromStr>(values: &[String]) -> Option<T> {
    values.first()?.trim().parse().ok()
}

fn parse_point(token: &str) -> Option<[f64; 2]> {
    let mut parts = token.split(',').map(|c| c.trim().parse::<f64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Some([x, y]),
        _ => None,
    }
}

/// Parse a date in any of the common layouts and normalize it.
pub fn normalize_date(text: &str) -> Option<String> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local().format(DATE_FORMAT).to_string());
    }

    const OFFSET_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
    for layout in OFFSET_LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(text, layout) {
            return Some(dt.naive_local().format(DATE_FORMAT).to_string());
        }
    }

    const DATETIME_LAYOUTS: [&str; 6] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y%m%dT%H%M%S",
    ];
    for layout in DATETIME_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(dt.format(DATE_FORMAT).to_string());
        }
    }

    const DATE_LAYOUTS: [&str; 6] = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%Y%m%d",
        "%m/%d/%Y",
        "%d %B %Y",
        "%B %d, %Y",
    ];
    let date_text = strip_zone(text);
    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(date_text, layout) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.format(DATE_FORMAT).to_string());
        }
    }

    None
}

/// Drop a trailing `Z` or `±HH:MM` zone from an XSD date.
fn strip_zone(text: &str) -> &str {
    if let Some(head) = text.strip_suffix('Z') {
        return head;
    }
    let bytes = text.as_bytes();
    if bytes.len() > 6 {
        let zone = &bytes[bytes.len() - 6..];
        let is_offset = matches!(zone[0], b'+' | b'-')
            && zone[1].is_ascii_digit()
            && zone[2].is_ascii_digit()
            && zone[3] == b':'
            && zone[4].is_ascii_digit()
            && zone[5].is_ascii_digit();
        if is_offset {
            return &text[..text.len() - 6];
        }
    }
    text
}

/// Only elide strings longer than `max_len` characters.
pub fn elide(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let head: String = text.chars().take(max_len).collect();
        format!("{head}[..]")
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub rows: Option<usize>,
    pub cols: Option<usize>,
    pub res_x: Option<f64>,
    pub res_y: Option<f64>,
    pub sw: Option<[f64; 2]>,
    pub ne: Option<[f64; 2]>,

    pub wkt_srs: Option<String>,
    pub wkt_srs_epsg_code: Option<u32>,
    pub xml_srs: Option<String>,
    pub wkt_vertical_datum: Option<String>,
    pub wkt_vertical_datum_epsg_code: Option<u32>,
    pub xml_vertical_datum: Option<String>,

    pub lon_min: Option<f64>,
    pub lon_max: Option<f64>,
    pub lat_min: Option<f64>,
    pub lat_max: Option<f64>,

    pub abstract_text: Option<String>,
    pub date: Option<String>,
    pub survey_start_date: Option<String>,
    pub survey_end_date: Option<String>,
    pub uncertainty_type: Option<String>,
    pub security_constraints: Option<String>,
}

impl Metadata {
    /// Parse a metadata blob. Only an unparseable document is an error.
    pub fn from_xml(bytes: &[u8], crs: &dyn CrsEngine) -> Result<Self> {
        let doc = Document::parse(bytes)?;
        Ok(Self::from_document(&doc, crs))
    }

    pub fn from_document(doc: &Document, crs: &dyn CrsEngine) -> Self {
        let root = &doc.root;
        let mut meta = Metadata::default();

        meta.read_rows_and_cols(root);
        meta.read_resolution(root);
        meta.read_corners(root);
        meta.read_reference_systems(root, crs);
        meta.read_bbox(root);

        meta.abstract_text = lookup(root, ABSTRACT).into_iter().next();
        if meta.abstract_text.is_none() {
            warn!("unable to read the abstract string");
        }

        meta.date = read_date(root, DATE, "date");
        meta.survey_start_date = read_date(root, SURVEY_BEGIN, "survey begin date");
        meta.survey_end_date = read_date(root, SURVEY_END, "survey end date");

        meta.uncertainty_type = lookup(root, UNCERTAINTY_TYPE).into_iter().next();
        if meta.uncertainty_type.is_none() {
            warn!("unable to read the uncertainty type");
        }
        meta.security_constraints = lookup(root, SECURITY_CONSTRAINTS).into_iter().next();
        if meta.security_constraints.is_none() {
            warn!("unable to read the security constraints");
        }

        debug!("parsed metadata: {meta}");
        meta
    }

    fn read_rows_and_cols(&mut self, root: &Element) {
        match parse_pair::<usize>(&lookup(root, DIMENSION_SIZE)) {
            Some((rows, cols)) => {
                self.rows = Some(rows);
                self.cols = Some(cols);
            }
            None => warn!("unable to read rows and cols"),
        }
    }

    fn read_resolution(&mut self, root: &Element) {
        match parse_pair::<f64>(&lookup(root, RESOLUTION)) {
            Some((x, y)) => {
                self.res_x = Some(x);
                self.res_y = Some(y);
            }
            None => warn!("unable to read res x and y"),
        }
    }

    fn read_corners(&mut self, root: &Element) {
        let text = lookup(root, CORNER_POINTS).into_iter().next().unwrap_or_default();
        let mut tokens = text.split_whitespace();
        match (
            tokens.next().and_then(parse_point),
            tokens.next().and_then(parse_point),
        ) {
            (Some(sw), Some(ne)) => {
                self.sw = Some(sw);
                self.ne = Some(ne);
            }
            _ => warn!("unable to read corners SW and NE"),
        }
    }

    fn read_reference_systems(&mut self, root: &Element, crs: &dyn CrsEngine) {
        let codes = lookup(root, CRS_CODE);
        if codes.is_empty() {
            if let Some(block) = lookup_elements(root, LEGACY_CRS).first() {
                warn!("unsupported method to describe CRS and vertical datum");
                let xml = block.to_pretty_string().ok();
                self.xml_srs = xml.clone();
                self.xml_vertical_datum = xml;
            } else {
                warn!("unable to read the reference systems");
            }
            return;
        }

        let spaces = lookup(root, CRS_CODE_SPACE);
        match resolve_reference_system(&codes, &spaces, 0, crs) {
            Some((wkt, epsg)) => {
                self.wkt_srs = wkt;
                self.wkt_srs_epsg_code = epsg;
            }
            None => warn!("unable to read the WKT projection string"),
        }
        match resolve_reference_system(&codes, &spaces, 1, crs) {
            Some((wkt, epsg)) => {
                self.wkt_vertical_datum = wkt;
                self.wkt_vertical_datum_epsg_code = epsg;
            }
            None => warn!("unable to read the WKT vertical datum string"),
        }
    }

    fn read_bbox(&mut self, root: &Element) {
        let west = parse_first::<f64>(&lookup(root, WEST_BOUND));
        let east = parse_first::<f64>(&lookup(root, EAST_BOUND));
        match (west, east) {
            (Some(w), Some(e)) => {
                self.lon_min = Some(w);
                self.lon_max = Some(e);
            }
            _ => warn!("unable to read the bbox's longitude values"),
        }

        let south = parse_first::<f64>(&lookup(root, SOUTH_BOUND));
        let north = parse_first::<f64>(&lookup(root, NORTH_BOUND));
        match (south, north) {
            (Some(s), Some(n)) => {
                self.lat_min = Some(s);
                self.lat_max = Some(n);
            }
            _ => warn!("unable to read the bbox's latitude values"),
        }
    }

    pub fn valid_bbox(&self) -> bool {
        self.lon_min.is_some()
            && self.lon_max.is_some()
            && self.lat_min.is_some()
            && self.lat_max.is_some()
    }

    /// `(lon_min, lon_max, lat_min, lat_max)` when the bounding box is complete.
    pub fn geo_extent(&self) -> Option<(f64, f64, f64, f64)> {
        Some((self.lon_min?, self.lon_max?, self.lat_min?, self.lat_max?))
    }

    /// Closed ring around the geographic bounding box.
    pub fn wkt_bbox(&self) -> Option<String> {
        let (x0, x1, y0, y1) = self.geo_extent()?;
        Some(format!(
            "LINESTRING Z({x0:.6} {y0:.6} 0, {x0:.6} {y1:.6} 0, {x1:.6} {y1:.6} 0, {x1:.6} {y0:.6} 0, {x0:.6} {y0:.6} 0)"
        ))
    }

    pub fn is_product_uncertainty(&self) -> bool {
        self.uncertainty_type
            .as_deref()
            .is_some_and(|t| PRODUCT_UNCERTAINTY.contains(&t))
    }
}

/// WKT and EPSG code of the `index`-th reference system entry.
///
/// Returns `None` when the entry is missing or its EPSG code is not an
/// integer. An EPSG code the CRS engine cannot resolve keeps the code and
/// leaves the WKT empty.
fn resolve_reference_system(
    codes: &[String],
    spaces: &[String],
    index: usize,
    crs: &dyn CrsEngine,
) -> Option<(Option<String>, Option<u32>)> {
    let code = codes.get(index)?;
    let space = spaces.get(index)?;
    if space.trim() != "EPSG" {
        return Some((Some(code.clone()), None));
    }

    let epsg: u32 = code.trim().parse().ok()?;
    match crs.wkt_from_epsg(epsg) {
        Ok(wkt) => Some((Some(wkt), Some(epsg))),
        Err(e) => {
            warn!("unable to resolve EPSG:{epsg}: {e}");
            Some((None, Some(epsg)))
        }
    }
}

fn read_date(root: &Element, queries: &[Query], label: &str) -> Option<String> {
    let Some(text) = lookup(root, queries).into_iter().next() else {
        warn!("unable to read the {label} string");
        return None;
    };
    match normalize_date(&text) {
        Some(date) => Some(date),
        None => {
            warn!("unable to handle the {label} string: {text}");
            Some(text)
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<metadata>")?;
        if let (Some(rows), Some(cols)) = (self.rows, self.cols) {
            write!(f, "\n    <shape rows={rows}, cols={cols}>")?;
        }
        if let (Some(x), Some(y)) = (self.res_x, self.res_y) {
            write!(f, "\n    <resolution x={x:.6}, y={y:.6}>")?;
        }
        if let (Some(sw), Some(ne)) = (self.sw, self.ne) {
            write!(f, "\n    <corners SW={sw:?}, NE={ne:?}>")?;
        }
        if let Some(wkt) = &self.wkt_srs {
            write!(f, "\n    <projection={}>", elide(wkt, 60))?;
        }
        if let Some(date) = &self.date {
            write!(f, "\n    <date={date}>")?;
        }
        if let Some(text) = &self.abstract_text {
            write!(f, "\n    <abstract={text}>")?;
        }
        write!(f, "\n    <bbox>")?;
        if let (Some(min), Some(max)) = (self.lon_min, self.lon_max) {
            write!(f, "\n        <x min={min}, max={max}>")?;
        }
        if let (Some(min), Some(max)) = (self.lat_min, self.lat_max) {
            write!(f, "\n        <y min={min}, max={max}>")?;
        }
        if let Some(t) = &self.uncertainty_type {
            write!(f, "\n    <uncertainty type={t}>")?;
        }
        if let Some(s) = &self.security_constraints {
            write!(f, "\n    <security constraints={s}>")?;
        }
        Ok(())
    }
}
