//! Decoded array values.
//!
//! Reads produce one typed vector per dtype class rather than per-element
//! boxing; everything downstream (stats, sanitization) works off these.

/// Flat value storage for a decoded selection.
#[derive(Clone, Debug, PartialEq)]
pub enum Values {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
    /// (re, im) pairs.
    Complex(Vec<(f64, f64)>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::Int(v) => v.len(),
            Values::UInt(v) => v.len(),
            Values::Float(v) => v.len(),
            Values::Bool(v) => v.len(),
            Values::Text(v) => v.len(),
            Values::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view as f64, or `None` for text/complex storage. Booleans map
    /// to 0.0/1.0 the way numpy treats them.
    pub fn as_f64(&self, index: usize) -> Option<f64> {
        match self {
            Values::Int(v) => Some(v[index] as f64),
            Values::UInt(v) => Some(v[index] as f64),
            Values::Float(v) => Some(v[index]),
            Values::Bool(v) => Some(if v[index] { 1.0 } else { 0.0 }),
            Values::Text(_) | Values::Complex(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Values::Text(_) | Values::Complex(_))
    }
}

/// An N-D decoded selection: row-major flat values plus the output shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    pub shape: Vec<usize>,
    pub values: Values,
}

impl Array {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Iterator over the numeric values, skipping nothing. `None` when the
    /// storage is not numeric.
    pub fn numeric_iter(&self) -> Option<impl Iterator<Item = f64> + '_> {
        if !self.values.is_numeric() {
            return None;
        }
        Some((0..self.values.len()).map(|i| self.values.as_f64(i).unwrap()))
    }

    /// Transpose a 2-D array in place. Used when the display row axis is the
    /// later dataset axis, so output rows track the requested row dimension.
    pub fn transpose_2d(&mut self) {
        assert_eq!(self.shape.len(), 2, "transpose_2d requires a 2-D array");
        let (rows, cols) = (self.shape[0], self.shape[1]);
        self.values = match std::mem::replace(&mut self.values, Values::Int(Vec::new())) {
            Values::Int(v) => Values::Int(transpose_vec(v, rows, cols)),
            Values::UInt(v) => Values::UInt(transpose_vec(v, rows, cols)),
            Values::Float(v) => Values::Float(transpose_vec(v, rows, cols)),
            Values::Bool(v) => Values::Bool(transpose_vec(v, rows, cols)),
            Values::Text(v) => Values::Text(transpose_vec(v, rows, cols)),
            Values::Complex(v) => Values::Complex(transpose_vec(v, rows, cols)),
        };
        self.shape = vec![cols, rows];
    }
}

fn transpose_vec<T: Clone>(v: Vec<T>, rows: usize, cols: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(v.len());
    for c in 0..cols {
        for r in 0..rows {
            out.push(v[r * cols + c].clone());
        }
    }
    out
}
