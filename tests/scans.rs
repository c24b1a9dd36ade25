mod common;

use bag_tools::store::{layout, VrMetadataEntry, VrRefinement};
use bag_tools::{BagError, ChunkPolicy, GeoSample, Grid, MemoryStore, BAG_NAN};
use common::{assert_close, iso_metadata, open, store_with};

fn assert_sample(sample: &GeoSample, lat: f64, lon: f64, value: f32) {
    assert_close(sample.lat, lat);
    assert_close(sample.lon, lon);
    assert_eq!(sample.value, value);
}

/// Rows are south to north; the fixture grid starts at (100, 200) with
/// 2 x 3 spacing and the identity CRS returns (northing, easting).
fn fixed_store() -> MemoryStore {
    let elevation = Grid::new(
        3,
        3,
        vec![
            -1.0, -2.0, BAG_NAN, //
            -4.0, BAG_NAN, -6.0, //
            -7.0, -8.0, -9.0,
        ],
    );
    let uncertainty = Grid::new(
        3,
        3,
        vec![
            0.1, 0.2, 0.3, //
            BAG_NAN, 0.5, 2.5, //
            0.7, 0.8, BAG_NAN,
        ],
    );
    store_with(elevation, uncertainty, &iso_metadata("rawStdDev"))
}

#[test]
fn test_uncertainty_greater_than_across_chunks() {
    for budget in [1, 8 * 1024 * 1024] {
        let (bag, _res) = open(fixed_store());
        let mut bag = bag.with_chunk_policy(ChunkPolicy::new(budget));
        let samples = bag.uncertainty_greater_than(0.6).unwrap();
        assert_eq!(samples.len(), 3, "budget {budget}");
        assert_sample(&samples[0], 203.0, 104.0, 2.5);
        assert_sample(&samples[1], 206.0, 100.0, 0.7);
        assert_sample(&samples[2], 206.0, 102.0, 0.8);
    }
}

#[test]
fn test_uncertainty_without_depth() {
    let (mut bag, _res) = open(fixed_store());
    let samples = bag.uncertainty_has_depth().unwrap();
    assert_eq!(samples.len(), 2);
    assert_sample(&samples[0], 200.0, 104.0, 0.3);
    assert_sample(&samples[1], 203.0, 102.0, 0.5);
}

#[test]
fn test_depth_without_uncertainty_reports_depth() {
    let (mut bag, _res) = open(fixed_store());
    let samples = bag.depth_has_uncertainty().unwrap();
    assert_eq!(samples.len(), 2);
    assert_sample(&samples[0], 203.0, 100.0, 4.0);
    assert_sample(&samples[1], 206.0, 104.0, 9.0);
}

#[test]
fn test_scan_needs_georeferencing() {
    let grid = Grid::filled(2, 2, 1.0);
    let xml = "<gmi:MI_Metadata xmlns:gmi=\"http://www.isotc211.org/2005/gmi\"/>";
    let (mut bag, _res) = open(store_with(grid.clone(), grid, xml));
    let err = bag.uncertainty_greater_than(0.0).unwrap_err();
    assert!(matches!(err, BagError::MissingMetadata(_)), "{err}");
}

#[test]
fn test_scan_rejects_mismatched_layers() {
    let store = store_with(
        Grid::filled(2, 2, -1.0),
        Grid::filled(3, 2, 0.5),
        &iso_metadata("rawStdDev"),
    );
    let (mut bag, _res) = open(store);
    assert!(matches!(
        bag.depth_has_uncertainty().unwrap_err(),
        BagError::Store(_)
    ));
}

fn cell(dims_x: u32, dims_y: u32, res: f32, sw: (f32, f32)) -> VrMetadataEntry {
    VrMetadataEntry {
        index: 0,
        dimensions_x: dims_x,
        dimensions_y: dims_y,
        resolution_x: res,
        resolution_y: res,
        sw_corner_x: sw.0,
        sw_corner_y: sw.1,
    }
}

/// 2 x 2 coarse grid: (0,0) holds 2 x 1 refinements, (0,1) is empty,
/// (1,0) holds one and (1,1) holds 1 x 2.
fn vr_store() -> MemoryStore {
    let mut store = fixed_store();
    store.insert_vr_metadata(
        layout::VARRES_METADATA,
        Grid::new(
            2,
            2,
            vec![
                cell(2, 1, 0.5, (0.1, 0.2)),
                VrMetadataEntry::default(),
                cell(1, 1, 1.0, (0.0, 0.0)),
                cell(1, 2, 0.25, (0.0, 0.0)),
            ],
        ),
    );
    let refinement = |depth, depth_uncrt| VrRefinement { depth, depth_uncrt };
    store.insert_vr_refinements(
        layout::VARRES_REFINEMENTS,
        vec![
            refinement(-1.0, 0.5),
            refinement(-2.0, 2.0),
            refinement(-5.0, BAG_NAN),
            refinement(BAG_NAN, 3.0),
            refinement(-4.0, 0.1),
        ],
    );
    store
}

#[test]
fn test_vr_statistics() {
    let (bag, _res) = open(vr_store());
    assert!(bag.is_vr());
    assert!(bag.has_varres_metadata());
    assert!(!bag.has_varres_tracking_list());
    assert_eq!(bag.vr_refinements_len().unwrap(), 5);
    assert_eq!(bag.vr_elevation_min_max().unwrap(), Some((-5.0, -1.0)));
    assert_eq!(bag.vr_depth_min_max().unwrap(), Some((1.0, 5.0)));
    assert_eq!(bag.vr_uncertainty_min_max().unwrap(), Some((0.1, 3.0)));
}

#[test]
fn test_vr_uncertainty_greater_than() {
    let (mut bag, _res) = open(vr_store());
    let samples = bag.vr_uncertainty_greater_than(1.0).unwrap();
    assert_eq!(samples.len(), 2);
    // second refinement of cell (0,0): local col 1
    assert_sample(
        &samples[0],
        200.0 - 1.5 + 0.2f32 as f64,
        100.0 - 1.0 + 0.1f32 as f64 + 0.5,
        2.0,
    );
    // first refinement of cell (1,1)
    assert_sample(&samples[1], 201.5, 101.0, 3.0);
}

#[test]
fn test_vr_depth_without_uncertainty_keeps_stored_depth() {
    let (mut bag, _res) = open(vr_store());
    let samples = bag.vr_depth_has_uncertainty().unwrap();
    assert_eq!(samples.len(), 1);
    assert_sample(&samples[0], 201.5, 99.0, -5.0);
}

#[test]
fn test_vr_uncertainty_without_depth() {
    let (mut bag, _res) = open(vr_store());
    let samples = bag.vr_uncertainty_has_depth().unwrap();
    assert_eq!(samples.len(), 1);
    assert_sample(&samples[0], 201.5, 101.0, 3.0);
}
