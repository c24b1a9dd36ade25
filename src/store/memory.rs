use std::collections::BTreeMap;
use std::ops::Range;

use super::{layout, AttrValue, Store, TrackingListEntry, VrMetadataEntry, VrRefinement};
use crate::error::{BagError, Result};
use crate::model::Grid;

#[derive(Debug, Clone)]
enum Data {
    Group,
    Float(Grid<f32>),
    Solution(Grid<u32>),
    Chars(Vec<u8>),
    TrackingList(Vec<TrackingListEntry>),
    VrMetadata(Grid<VrMetadataEntry>),
    VrRefinements(Vec<VrRefinement>),
}

#[derive(Debug, Clone)]
struct Node {
    data: Data,
    attrs: BTreeMap<String, AttrValue>,
}

/// Store kept entirely in memory.
///
/// Used for freshly created templates and for exercising the BAG model
/// without an HDF5 library.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: BTreeMap<String, Node>,
    flushes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty BAG skeleton: root group with version, zero-sized elevation
    /// and uncertainty layers, a 1-byte metadata blob and an empty
    /// tracking list.
    pub fn bag_template() -> Self {
        let mut store = Self::new();
        store.insert_group(layout::ROOT);
        store.set_attr(
            layout::ROOT,
            layout::VERSION_ATTR,
            AttrValue::Text(layout::VERSION.to_string()),
        );

        for (path, min_attr, max_attr) in [
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
            store.insert_float(path, Grid::new(0, 0, Vec::new()));
            store.set_attr(path, min_attr, AttrValue::Float(0.0));
            store.set_attr(path, max_attr, AttrValue::Float(0.0));
        }

        store.insert_chars(layout::METADATA, &[0]);
        store.insert_tracking_list(layout::TRACKING_LIST, Vec::new());
        store
    }

    pub fn insert_group(&mut self, path: &str) {
        self.insert(path, Data::Group);
    }

    pub fn insert_float(&mut self, path: &str, grid: Grid<f32>) {
        self.insert(path, Data::Float(grid));
    }

    /// Elevation-solution layer holding only the sounding counts.
    pub fn insert_solution(&mut self, path: &str, num_soundings: Grid<u32>) {
        self.insert(path, Data::Solution(num_soundings));
    }

    pub fn insert_chars(&mut self, path: &str, bytes: &[u8]) {
        self.insert(path, Data::Chars(bytes.to_vec()));
    }

    pub fn insert_tracking_list(&mut self, path: &str, entries: Vec<TrackingListEntry>) {
        let len = entries.len() as i64;
        self.insert(path, Data::TrackingList(entries));
        self.set_attr(path, layout::TRACKING_LIST_LEN_ATTR, AttrValue::Int(len));
    }

    pub fn insert_vr_metadata(&mut self, path: &str, grid: Grid<VrMetadataEntry>) {
        self.insert(path, Data::VrMetadata(grid));
    }

    pub fn insert_vr_refinements(&mut self, path: &str, refinements: Vec<VrRefinement>) {
        self.insert(path, Data::VrRefinements(refinements));
    }

    pub fn set_attr(&mut self, path: &str, name: &str, value: AttrValue) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.attrs.insert(name.to_string(), value);
        }
    }

    /// Number of times [`Store::flush`] was called.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    fn insert(&mut self, path: &str, data: Data) {
        self.nodes.insert(
            path.to_string(),
            Node {
                data,
                attrs: BTreeMap::new(),
            },
        );
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| BagError::MissingDataset(path.to_string()))
    }

    fn wrong_kind(path: &str, expected: &str) -> BagError {
        BagError::Store(format!("{path} is not a {expected} dataset"))
    }
}

fn check_rows(path: &str, rows: &Range<usize>, available: usize) -> Result<()> {
    if rows.start > rows.end || rows.end > available {
        return Err(BagError::Store(format!(
            "row selection {}..{} out of bounds for {path} ({available} rows)",
            rows.start, rows.end
        )));
    }
    Ok(())
}

impl Store for MemoryStore {
    fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>> {
        Ok(match &self.node(path)?.data {
            Data::Group => Vec::new(),
            Data::Float(g) => vec![g.rows, g.cols],
            Data::Solution(g) => vec![g.rows, g.cols],
            Data::Chars(b) => vec![b.len()],
            Data::TrackingList(l) => vec![l.len()],
            Data::VrMetadata(g) => vec![g.rows, g.cols],
            Data::VrRefinements(r) => vec![1, r.len()],
        })
    }

    fn fields(&self, path: &str) -> Vec<String> {
        let names: &[&str] = match self.nodes.get(path).map(|n| &n.data) {
            Some(Data::Solution(_)) => &[layout::NUM_SOUNDINGS],
            Some(Data::TrackingList(_)) => &TrackingListEntry::FIELDS,
            Some(Data::VrMetadata(_)) => &[
                "index",
                "dimensions_x",
                "dimensions_y",
                "resolution_x",
                "resolution_y",
                "sw_corner_x",
                "sw_corner_y",
            ],
            Some(Data::VrRefinements(_)) => &["depth", "depth_uncrt"],
            _ => &[],
        };
        names.iter().map(|s| s.to_string()).collect()
    }

    fn read_f32_rows(&self, path: &str, rows: Range<usize>) -> Result<Grid<f32>> {
        match &self.node(path)?.data {
            Data::Float(g) => {
                check_rows(path, &rows, g.rows)?;
                Ok(g.slice_rows(rows))
            }
            _ => Err(Self::wrong_kind(path, "float")),
        }
    }

    fn read_u32_rows(&self, path: &str, field: &str, rows: Range<usize>) -> Result<Grid<u32>> {
        match &self.node(path)?.data {
            Data::Solution(g) if field == layout::NUM_SOUNDINGS => {
                check_rows(path, &rows, g.rows)?;
                Ok(g.slice_rows(rows))
            }
            Data::Solution(_) => Err(BagError::Store(format!("{path} has no member {field}"))),
            _ => Err(Self::wrong_kind(path, "compound")),
        }
    }

    fn read_chars(&self, path: &str) -> Result<Vec<u8>> {
        match &self.node(path)?.data {
            Data::Chars(b) => Ok(b.clone()),
            _ => Err(Self::wrong_kind(path, "character")),
        }
    }

    fn read_attr(&self, path: &str, name: &str) -> Result<AttrValue> {
        self.node(path)?
            .attrs
            .get(name)
            .cloned()
            .ok_or_else(|| BagError::Store(format!("{path} has no attribute {name:?}")))
    }

    fn attr_names(&self, path: &str) -> Vec<String> {
        self.nodes
            .get(path)
            .map(|n| n.attrs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read_tracking_list(&self, path: &str) -> Result<Vec<TrackingListEntry>> {
        match &self.node(path)?.data {
            Data::TrackingList(l) => Ok(l.clone()),
            _ => Err(Self::wrong_kind(path, "tracking list")),
        }
    }

    fn read_vr_metadata(&self, path: &str) -> Result<Grid<VrMetadataEntry>> {
        match &self.node(path)?.data {
            Data::VrMetadata(g) => Ok(g.clone()),
            _ => Err(Self::wrong_kind(path, "VR metadata")),
        }
    }

    fn read_vr_refinements(&self, path: &str) -> Result<Vec<VrRefinement>> {
        match &self.node(path)?.data {
            Data::VrRefinements(r) => Ok(r.clone()),
            _ => Err(Self::wrong_kind(path, "VR refinements")),
        }
    }

    fn create_chars(&mut self, path: &str, data: &[u8]) -> Result<()> {
        if self.nodes.contains_key(path) {
            return Err(BagError::Store(format!("{path} already exists")));
        }
        self.insert_chars(path, data);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        self.nodes
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BagError::MissingDataset(path.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_layout() {
        let store = MemoryStore::bag_template();
        assert!(store.exists(layout::ROOT));
        assert!(store.exists(layout::TRACKING_LIST));
        assert_eq!(store.shape(layout::ELEVATION).unwrap(), vec![0, 0]);
        assert_eq!(store.read_chars(layout::METADATA).unwrap(), vec![0]);
        assert_eq!(
            store
                .read_attr(layout::UNCERTAINTY, layout::UNCERTAINTY_MAX_ATTR)
                .unwrap(),
            AttrValue::Float(0.0)
        );
        assert_eq!(
            store.read_attr(layout::ROOT, layout::VERSION_ATTR).unwrap(),
            AttrValue::Text("1.6.3".to_string())
        );
        assert_eq!(
            store
                .read_attr(layout::TRACKING_LIST, layout::TRACKING_LIST_LEN_ATTR)
                .unwrap(),
            AttrValue::Int(0)
        );
    }

    #[test]
    fn test_row_reads_are_bounded() {
        let mut store = MemoryStore::new();
        store.insert_float(layout::ELEVATION, Grid::new(3, 1, vec![1.0, 2.0, 3.0]));
        assert_eq!(
            store.read_f32_rows(layout::ELEVATION, 1..3).unwrap().values,
            vec![2.0, 3.0]
        );
        assert!(store.read_f32_rows(layout::ELEVATION, 2..4).is_err());
        assert!(store.read_chars(layout::ELEVATION).is_err());
    }

    #[test]
    fn test_chars_create_and_delete() {
        let mut store = MemoryStore::bag_template();
        store.delete(layout::METADATA).unwrap();
        store.create_chars(layout::METADATA, b"<a/>").unwrap();
        assert!(store.create_chars(layout::METADATA, b"<b/>").is_err());
        assert_eq!(store.shape(layout::METADATA).unwrap(), vec![4]);
        store.delete(layout::METADATA).unwrap();
        assert!(!store.exists(layout::METADATA));
        assert!(store.delete(layout::METADATA).is_err());
    }
}
