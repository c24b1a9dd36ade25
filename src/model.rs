use std::ops::Range;

/// Value stored in BAG float layers in place of NaN.
pub const BAG_NAN: f32 = 1_000_000.0;

/// Row-major 2D raster as read from a BAG layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<T>,
}

impl<T: Copy> Grid<T> {
    pub fn new(rows: usize, cols: usize, values: Vec<T>) -> Self {
        debug_assert_eq!(rows * cols, values.len());
        Self { rows, cols, values }
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::new(rows, cols, vec![value; rows * cols])
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.cols {
            Some(self.values[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy of a half-open row range.
    pub fn slice_rows(&self, rows: Range<usize>) -> Grid<T> {
        let values = self.values[rows.start * self.cols..rows.end * self.cols].to_vec();
        Grid::new(rows.end - rows.start, self.cols, values)
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Grid<U> {
        Grid::new(self.rows, self.cols, self.values.iter().map(|&v| f(v)).collect())
    }

    /// Rows in reverse order (BAG row 0 is the southernmost row).
    pub fn flipped_rows(&self) -> Grid<T> {
        let mut values = Vec::with_capacity(self.values.len());
        for r in (0..self.rows).rev() {
            values.extend_from_slice(self.row(r));
        }
        Grid::new(self.rows, self.cols, values)
    }
}

pub fn sentinel_to_nan(value: f32) -> f32 {
    if value == BAG_NAN {
        f32::NAN
    } else {
        value
    }
}

pub fn nan_to_sentinel(value: f32) -> f32 {
    if value.is_nan() {
        BAG_NAN
    } else {
        value
    }
}

impl Grid<f32> {
    pub fn mask_sentinel(&self) -> Grid<f32> {
        self.map(sentinel_to_nan)
    }

    pub fn unmask_nan(&self) -> Grid<f32> {
        self.map(nan_to_sentinel)
    }

    /// NaN-ignoring minimum and maximum; `None` if every cell is NaN.
    pub fn nan_min_max(&self) -> Option<(f32, f32)> {
        let mut acc = MinMax::default();
        acc.extend(self.values.iter().copied());
        acc.get()
    }
}

/// Running NaN-ignoring extrema.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinMax {
    range: Option<(f32, f32)>,
}

impl MinMax {
    pub fn push(&mut self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.range = Some(match self.range {
            None => (value, value),
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
        });
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = f32>) {
        for v in values {
            self.push(v);
        }
    }

    pub fn merge(&mut self, other: MinMax) {
        if let Some((lo, hi)) = other.range {
            self.push(lo);
            self.push(hi);
        }
    }

    pub fn get(&self) -> Option<(f32, f32)> {
        self.range
    }
}

/// A flagged grid location reprojected to geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoSample {
    pub lat: f64,
    pub lon: f64,
    pub value: f32,
}
