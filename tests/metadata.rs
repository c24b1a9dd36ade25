mod common;

use bag_tools::store::layout;
use bag_tools::{BagError, BagFile, Grid, MemoryStore};
use common::{iso_metadata, open, store_with};
use tempfile::TempDir;

fn fixture_bag(uncertainty_type: &str) -> (BagFile<MemoryStore>, TempDir) {
    let grid = Grid::filled(3, 3, -5.0);
    open(store_with(grid.clone(), grid, &iso_metadata(uncertainty_type)))
}

#[test]
fn test_populate_is_cached_until_replaced() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    assert!(bag.meta().is_none());

    let meta = bag.populate_metadata().unwrap().clone();
    assert_eq!(meta.rows, Some(3));
    assert_eq!(meta.sw, Some([100.0, 200.0]));
    assert_eq!(meta.wkt_srs_epsg_code, Some(32619));
    assert_eq!(bag.meta(), Some(&meta));
    assert_eq!(bag.reparse_metadata().unwrap(), meta);

    let xml = iso_metadata("productUncert");
    bag.replace_metadata_blob(xml.as_bytes()).unwrap();
    assert!(bag.meta().is_none());
    assert_eq!(
        bag.populate_metadata().unwrap().uncertainty_type.as_deref(),
        Some("productUncert")
    );
}

#[test]
fn test_cache_survives_external_mutation() {
    use bag_tools::Store;

    let (mut bag, _res) = fixture_bag("rawStdDev");
    let first = bag.populate_metadata().unwrap().clone();

    let store = bag.store_mut();
    store.delete(layout::METADATA).unwrap();
    store
        .create_chars(layout::METADATA, iso_metadata("ProductUncert").as_bytes())
        .unwrap();

    assert_eq!(bag.populate_metadata().unwrap(), &first);
    assert_eq!(
        bag.reparse_metadata().unwrap().uncertainty_type.as_deref(),
        Some("ProductUncert")
    );
}

#[test]
fn test_product_uncertainty_spellings() {
    for (kind, expected) in [
        ("productUncert", true),
        ("ProductUncert", true),
        ("rawStdDev", false),
        ("product", false),
    ] {
        let (mut bag, _res) = fixture_bag(kind);
        assert_eq!(bag.has_product_uncertainty(), expected, "{kind}");
    }
}

#[test]
fn test_product_uncertainty_needs_the_layer() {
    let mut store = MemoryStore::new();
    store.insert_group(layout::ROOT);
    store.insert_chars(layout::METADATA, iso_metadata("productUncert").as_bytes());
    let (mut bag, _res) = open(store);
    assert!(!bag.has_uncertainty());
    assert!(!bag.has_product_uncertainty());
}

#[test]
fn test_extract_then_substitute_round_trip() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BAG_metadata.xml");

    bag.extract_metadata(Some(&path)).unwrap();
    let extracted = std::fs::read(&path).unwrap();
    assert_eq!(extracted, bag.metadata_pretty().unwrap().into_bytes());

    assert!(bag.substitute_metadata(&path).unwrap());
    assert!(bag.meta_errors().is_empty());
    assert_eq!(bag.metadata_xml().unwrap(), extracted);
    assert_eq!(bag.populate_metadata().unwrap().rows, Some(3));
}

#[test]
fn test_invalid_substitution_keeps_blob() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    let before = bag.metadata_xml().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("other.xml");
    std::fs::write(&path, "<other/>").unwrap();

    assert!(!bag.substitute_metadata(&path).unwrap());
    assert_eq!(bag.metadata_xml().unwrap(), before);
    assert_eq!(
        bag.meta_errors(),
        &[
            "root element is not gmi:MI_Metadata".to_string(),
            "an abstract is required".to_string()
        ]
    );
}

#[test]
fn test_substitute_missing_file_reports_path() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.xml");
    match bag.substitute_metadata(&path) {
        Err(BagError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_validation_info_reports_outcome() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    assert!(bag.validate_metadata(None).unwrap());
    assert_eq!(
        bag.validation_info().unwrap(),
        "XML input source: BAG_root/metadata\nValidation output: VALID"
    );

    assert!(!bag.validate_metadata(Some(b"<broken>")).unwrap());
    assert_eq!(bag.meta_errors().len(), 1);
    // diagnostics are reset by the next run
    assert!(bag.validate_metadata(None).unwrap());
    assert!(bag.meta_errors().is_empty());
}

#[test]
fn test_modify_bbox_rewrites_bounds() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    bag.modify_bbox(-71.25, -71.0, 41.5, 41.75).unwrap();

    let meta = bag.reparse_metadata().unwrap();
    assert_eq!(meta.geo_extent(), Some((-71.25, -71.0, 41.5, 41.75)));
    assert_eq!(meta.abstract_text.as_deref(), Some("Fixture survey"));

    let xml = String::from_utf8(bag.metadata_xml().unwrap()).unwrap();
    assert!(xml.contains("<gco:Decimal>-71.0</gco:Decimal>"), "{xml}");
    assert!(xml.contains("<gco:Decimal>41.75</gco:Decimal>"), "{xml}");
}

#[test]
fn test_modify_bbox_without_bounds_is_a_no_op() {
    let xml = "<gmi:MI_Metadata xmlns:gmi=\"http://www.isotc211.org/2005/gmi\"/>";
    let grid = Grid::filled(1, 1, 0.0);
    let (mut bag, _res) = open(store_with(grid.clone(), grid, xml));
    bag.modify_bbox(1.0, 2.0, 3.0, 4.0).unwrap();
    assert_eq!(bag.metadata_xml().unwrap(), xml.as_bytes());
}

#[test]
fn test_modify_wkt_prj_rewrites_codes() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    bag.modify_wkt_prj("32618", Some("VERT_CS[\"NAVD88\"]")).unwrap();

    let meta = bag.reparse_metadata().unwrap();
    assert_eq!(meta.wkt_srs_epsg_code, Some(32618));
    assert_eq!(meta.wkt_srs.as_deref(), Some("LOCAL_CS[\"EPSG:32618\"]"));
    assert_eq!(meta.wkt_vertical_datum.as_deref(), Some("VERT_CS[\"NAVD88\"]"));

    bag.modify_wkt_prj("32617", None).unwrap();
    let meta = bag.reparse_metadata().unwrap();
    assert_eq!(meta.wkt_srs_epsg_code, Some(32617));
    assert_eq!(meta.wkt_vertical_datum.as_deref(), Some("VERT_CS[\"NAVD88\"]"));
}

#[test]
fn test_modify_wkt_prj_needs_vertical_entry() {
    let full = iso_metadata("rawStdDev");
    let tag = "  <gmd:referenceSystemInfo>";
    let second = full.rfind(tag).unwrap();
    let end = full[second..].find("</gmd:referenceSystemInfo>\n").unwrap()
        + second
        + "</gmd:referenceSystemInfo>\n".len();
    let xml = format!("{}{}", &full[..second], &full[end..]);

    let grid = Grid::filled(3, 3, -5.0);
    let (mut bag, _res) = open(store_with(grid.clone(), grid, &xml));

    // no vertical entry: nothing is written, not even the horizontal code
    bag.modify_wkt_prj("32618", Some("VERT_CS[\"NAVD88\"]")).unwrap();
    assert_eq!(bag.metadata_xml().unwrap(), xml.as_bytes());

    bag.modify_wkt_prj("32618", None).unwrap();
    let meta = bag.reparse_metadata().unwrap();
    assert_eq!(meta.wkt_srs_epsg_code, Some(32618));
    assert_eq!(meta.wkt_vertical_datum, None);
}

#[test]
fn test_display_includes_populated_metadata() {
    let (mut bag, _res) = fixture_bag("rawStdDev");
    assert!(bag.to_string().contains("<BAG_root/metadata>"));
    bag.populate_metadata().unwrap();
    let text = bag.to_string();
    assert!(text.contains("<metadata>"));
    assert!(text.contains("<shape rows=3, cols=3>"));
    assert!(text.contains("<elevation shape=[3, 3]>"));
}
