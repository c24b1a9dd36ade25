mod common;

use bag_tools::store::layout;
use bag_tools::{BagError, ChunkPolicy, Grid, RowRange, TrackingListEntry, BAG_NAN};
use common::{iso_metadata, open, store_with};

fn sample_grid(rows: usize, cols: usize) -> Grid<f32> {
    let values = (0..rows * cols)
        .map(|i| if i % 4 == 1 { BAG_NAN } else { (i as f32) * 1.5 - 10.0 })
        .collect();
    Grid::new(rows, cols, values)
}

#[test]
fn test_sentinel_is_masked_on_request() {
    let elevation = Grid::new(2, 2, vec![-1.0, BAG_NAN, -3.0, -4.0]);
    let store = store_with(elevation.clone(), elevation, &iso_metadata("rawStdDev"));
    let (bag, _res) = open(store);

    let masked = bag.elevation(true, None).unwrap();
    assert!(masked.values[1].is_nan());
    assert_eq!(masked.values[3], -4.0);

    let raw = bag.elevation(false, None).unwrap();
    assert_eq!(raw.values[1], BAG_NAN);
    assert_eq!(raw.unmask_nan().values, masked.unmask_nan().values);
}

#[test]
fn test_chunked_min_max_matches_full_scan() {
    let grid = sample_grid(7, 3);
    let expected = grid
        .values
        .iter()
        .copied()
        .filter(|v| *v != BAG_NAN)
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));

    for budget in [1, 96, 200, 8 * 1024 * 1024] {
        let store = store_with(grid.clone(), grid.clone(), &iso_metadata("rawStdDev"));
        let (bag, _res) = open(store);
        let bag = bag.with_chunk_policy(ChunkPolicy::new(budget));
        assert_eq!(bag.elevation_min_max().unwrap(), Some(expected), "budget {budget}");
        assert_eq!(bag.uncertainty_min_max().unwrap(), Some(expected));
        assert_eq!(
            bag.depth_min_max().unwrap(),
            Some((-expected.1, -expected.0))
        );
    }
}

#[test]
fn test_all_empty_layer_has_no_extrema() {
    let empty = Grid::filled(3, 2, BAG_NAN);
    let (bag, _res) = open(store_with(empty.clone(), empty, &iso_metadata("rawStdDev")));
    let bag = bag.with_chunk_policy(ChunkPolicy::new(1));
    assert_eq!(bag.elevation_min_max().unwrap(), None);
    assert_eq!(bag.depth_min_max().unwrap(), None);
}

#[test]
fn test_row_range_bounds() {
    let grid = sample_grid(4, 2);
    let (bag, _res) = open(store_with(grid.clone(), grid, &iso_metadata("rawStdDev")));

    let full = bag.elevation(false, None).unwrap();
    assert_eq!(bag.elevation(false, Some(0..4)).unwrap(), full);
    assert_eq!(bag.elevation(false, Some(1..3)).unwrap(), full.slice_rows(1..3));
    assert_eq!(bag.elevation(false, Some(2..2)).unwrap().rows, 0);

    for range in [0..5, 5..2, 3..1] {
        let err = bag.uncertainty(true, Some(range)).unwrap_err();
        assert!(matches!(err, BagError::InvalidRowRange { rows: 4, .. }), "{err}");
    }

    let err = RowRange::from_signed(-1, 3).resolve(4).unwrap_err();
    assert!(matches!(
        err,
        BagError::InvalidRowRange {
            start: -1,
            stop: 3,
            rows: 4
        }
    ));
}

#[test]
fn test_density_widens_counts() {
    let grid = sample_grid(2, 2);
    let mut store = store_with(grid.clone(), grid, &iso_metadata("rawStdDev"));
    store.insert_solution(layout::ELEVATION_SOLUTION, Grid::new(2, 2, vec![0, 3, 12, 1]));
    let (bag, _res) = open(store);

    assert!(bag.has_density());
    assert_eq!(bag.density_shape().unwrap(), (2, 2));
    let density = bag.density(false, Some(1..2)).unwrap();
    assert_eq!(density.values, vec![12.0, 1.0]);
}

#[test]
fn test_tracking_list_bounds_checks() {
    let grid = sample_grid(3, 4);
    let mut store = store_with(grid.clone(), grid, &iso_metadata("rawStdDev"));
    let entry = |row, col| TrackingListEntry {
        row,
        col,
        depth: -10.0,
        uncertainty: 0.5,
        track_code: 0,
        list_series: 0,
    };
    store.insert_tracking_list(layout::TRACKING_LIST, vec![entry(0, 0), entry(2, 3)]);
    let (bag, _res) = open(store);
    assert_eq!(bag.tracking_list().unwrap().len(), 2);
    assert!(bag.has_valid_row_in_tracking_list().unwrap());
    assert!(bag.has_valid_col_in_tracking_list().unwrap());

    let grid = sample_grid(3, 4);
    let mut store = store_with(grid.clone(), grid, &iso_metadata("rawStdDev"));
    store.insert_tracking_list(layout::TRACKING_LIST, vec![entry(0, 0), entry(3, 4)]);
    let (bag, _res) = open(store);
    assert!(!bag.has_valid_row_in_tracking_list().unwrap());
    assert!(!bag.has_valid_col_in_tracking_list().unwrap());
}

#[test]
fn test_close_flushes_store() {
    let grid = sample_grid(1, 1);
    let (bag, _res) = open(store_with(grid.clone(), grid, &iso_metadata("rawStdDev")));
    let store = bag.close().unwrap();
    assert_eq!(store.flush_count(), 1);
}
