//! Read planning (C5).
//!
//! Turns a validated selection plus mode parameters into a concrete slice
//! plan, enforcing every element ceiling before any byte is read. The planner
//! clamps where the contract allows (heatmap target size) and rejects where
//! the client asked for something the caps cannot honor (exact line windows,
//! oversized matrix limits).

use std::collections::BTreeMap;

use crate::error::AppError;
use crate::hfile::Selector;
use crate::selection::{LineDim, LineQuality, Selection};
use crate::types::{
    MAX_ELEMENTS, MAX_HEATMAP_SIZE, MAX_JSON_ELEMENTS, MAX_LINE_EXACT_POINTS, MAX_MATRIX_COLS,
    MAX_MATRIX_ROWS,
};

/// Reject element counts beyond the JSON and absolute ceilings.
pub fn enforce_element_limits(count: usize) -> Result<(), AppError> {
    if count > MAX_JSON_ELEMENTS {
        return Err(AppError::CapExceeded(format!(
            "Selection too large for JSON ({count} > {MAX_JSON_ELEMENTS} elements)"
        )));
    }
    if count > MAX_ELEMENTS {
        return Err(AppError::CapExceeded(format!(
            "Selection exceeds max_elements ({count} > {MAX_ELEMENTS} elements)"
        )));
    }
    Ok(())
}

fn div_ceil(a: usize, b: usize) -> usize {
    a.div_ceil(b.max(1))
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Raw matrix window parameters after defaulting.
#[derive(Clone, Copy, Debug)]
pub struct MatrixParams {
    pub row_offset: usize,
    pub col_offset: usize,
    pub row_limit: usize,
    pub col_limit: usize,
    pub row_step: usize,
    pub col_step: usize,
}

#[derive(Clone, Debug)]
pub struct MatrixPlan {
    pub row_dim: usize,
    pub col_dim: usize,
    pub row_offset: usize,
    pub col_offset: usize,
    pub row_limit: usize,
    pub col_limit: usize,
    pub row_step: usize,
    pub col_step: usize,
    pub out_rows: usize,
    pub out_cols: usize,
    /// Set when `row_dim > col_dim`: the raw read comes back axis-swapped and
    /// must be transposed so output rows track `row_dim`.
    pub needs_transpose: bool,
}

pub fn plan_matrix(
    shape: &[usize],
    selection: &Selection,
    params: MatrixParams,
) -> Result<MatrixPlan, AppError> {
    let (row_dim, col_dim) = selection
        .display_dims
        .ok_or_else(|| AppError::Internal("matrix plan without display dims".into()))?;
    let rows = shape[row_dim];
    let cols = shape[col_dim];

    let row_offset = params.row_offset.min(rows);
    let col_offset = params.col_offset.min(cols);
    let row_limit = params.row_limit.min(rows - row_offset);
    let col_limit = params.col_limit.min(cols - col_offset);

    if row_limit > MAX_MATRIX_ROWS || col_limit > MAX_MATRIX_COLS {
        return Err(AppError::CapExceeded(format!(
            "Matrix limits exceed {MAX_MATRIX_ROWS}x{MAX_MATRIX_COLS}"
        )));
    }

    let out_rows = if row_limit > 0 { div_ceil(row_limit, params.row_step) } else { 0 };
    let out_cols = if col_limit > 0 { div_ceil(col_limit, params.col_step) } else { 0 };
    enforce_element_limits(out_rows * out_cols)?;

    Ok(MatrixPlan {
        row_dim,
        col_dim,
        row_offset,
        col_offset,
        row_limit,
        col_limit,
        row_step: params.row_step,
        col_step: params.col_step,
        out_rows,
        out_cols,
        needs_transpose: row_dim > col_dim,
    })
}

// ---------------------------------------------------------------------------
// Heatmap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct HeatmapPlan {
    pub row_dim: usize,
    pub col_dim: usize,
    pub requested_max_size: usize,
    pub effective_max_size: usize,
    pub max_size_clamped: bool,
    pub target_rows: usize,
    pub target_cols: usize,
    pub row_step: usize,
    pub col_step: usize,
    pub sampled: bool,
    pub needs_transpose: bool,
}

/// Largest per-axis size whose projected cell count stays under the JSON
/// ceiling. Binary search over `min(rows,s) * min(cols,s)`.
pub fn safe_heatmap_size(rows: usize, cols: usize, requested: usize) -> usize {
    if requested == 0 {
        return 1;
    }
    let cap = MAX_JSON_ELEMENTS.min(MAX_ELEMENTS);
    let projected = |size: usize| rows.min(size) * cols.min(size);
    if projected(requested) <= cap {
        return requested;
    }

    let (mut low, mut high, mut best) = (1usize, requested, 1usize);
    while low <= high {
        let mid = (low + high) / 2;
        if projected(mid) <= cap {
            best = mid;
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }
    best
}

pub fn plan_heatmap(
    shape: &[usize],
    selection: &Selection,
    requested_max_size: usize,
) -> Result<HeatmapPlan, AppError> {
    if requested_max_size > MAX_HEATMAP_SIZE {
        return Err(AppError::CapExceeded(format!("max_size exceeds {MAX_HEATMAP_SIZE}")));
    }
    let (row_dim, col_dim) = selection
        .display_dims
        .ok_or_else(|| AppError::Internal("heatmap plan without display dims".into()))?;
    let rows = shape[row_dim];
    let cols = shape[col_dim];

    let effective_max_size = safe_heatmap_size(rows, cols, requested_max_size);
    let target_rows = rows.min(effective_max_size);
    let target_cols = cols.min(effective_max_size);
    enforce_element_limits(target_rows * target_cols)?;

    let row_step = if target_rows > 0 { div_ceil(rows, target_rows).max(1) } else { 1 };
    let col_step = if target_cols > 0 { div_ceil(cols, target_cols).max(1) } else { 1 };

    Ok(HeatmapPlan {
        row_dim,
        col_dim,
        requested_max_size,
        effective_max_size,
        max_size_clamped: effective_max_size != requested_max_size,
        target_rows,
        target_cols,
        row_step,
        col_step,
        sampled: row_step > 1 || col_step > 1,
        needs_transpose: row_dim > col_dim,
    })
}

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// Raw line window parameters after defaulting.
#[derive(Clone, Copy, Debug)]
pub struct LineParams {
    pub line_dim: Option<LineDim>,
    pub line_index: Option<usize>,
    pub line_offset: usize,
    pub line_limit: Option<usize>,
    pub quality: LineQuality,
    /// Already clamped to `MAX_LINE_POINTS` by the caller.
    pub max_points: usize,
}

#[derive(Clone, Debug)]
pub struct LinePlan {
    /// Dataset axis the line runs along.
    pub vary_dim: usize,
    /// `dim`, `row`, or `col` — echoed in the response.
    pub axis: &'static str,
    /// Pinned display-plane index for row/col lines.
    pub index: Option<usize>,
    pub offset: usize,
    pub limit: usize,
    pub step: usize,
    pub out_count: usize,
    pub quality_requested: LineQuality,
    pub quality_applied: &'static str,
    pub requested_points: usize,
    /// Axis → index for every non-vary axis, row/col pin included. The reader
    /// builds its selectors from this.
    pub reader_fixed: BTreeMap<usize, usize>,
    /// Fixed indices as the response reports them (no row/col pin).
    pub response_fixed: BTreeMap<usize, usize>,
    /// Display dims as resolved for this request (defaulted when absent).
    pub display_dims: Option<(usize, usize)>,
}

pub fn plan_line(
    shape: &[usize],
    selection: &Selection,
    params: LineParams,
) -> Result<LinePlan, AppError> {
    let ndim = shape.len();
    let display_dims = selection.display_dims;
    let mut response_fixed = selection.fixed_indices.clone();

    // An explicit dataset axis pins every other axis, display ones included.
    if let Some(LineDim::Dim(dim)) = params.line_dim {
        for (axis, &size) in shape.iter().enumerate() {
            if axis != dim {
                response_fixed.entry(axis).or_insert(crate::selection::default_index(size));
            }
        }
    }

    let (vary_dim, axis, index) = if ndim == 1 {
        (0, "dim", None)
    } else if let Some(LineDim::Dim(dim)) = params.line_dim {
        (dim, "dim", None)
    } else {
        // Row/col lines only make sense against a display plane, which the
        // normalizer produces for rank >= 2 alone.
        let Some((row_dim, col_dim)) = display_dims else {
            return Err(AppError::InvalidSelection(
                "display_dims required for row/col line".into(),
            ));
        };
        let rows = shape[row_dim];
        let cols = shape[col_dim];
        match params.line_dim {
            Some(LineDim::Col) => {
                let index = params.line_index.unwrap_or(cols / 2);
                if index >= cols {
                    return Err(AppError::InvalidSelection("line_index out of range".into()));
                }
                (row_dim, "col", Some(index))
            }
            _ => {
                let index = params.line_index.unwrap_or(rows / 2);
                if index >= rows {
                    return Err(AppError::InvalidSelection("line_index out of range".into()));
                }
                (col_dim, "row", Some(index))
            }
        }
    };

    let line_length = shape[vary_dim];
    let available = line_length.saturating_sub(params.line_offset);
    let limit = match params.line_limit {
        None => available,
        Some(requested) => requested.min(available),
    };

    let requested_points = limit;
    let quality_applied = match params.quality {
        LineQuality::Exact => {
            if requested_points > MAX_LINE_EXACT_POINTS {
                return Err(AppError::CapExceeded(format!(
                    "Exact line window exceeds {MAX_LINE_EXACT_POINTS} points. \
                     Reduce line_limit/zoom window or use quality=overview."
                )));
            }
            "exact"
        }
        LineQuality::Overview => "overview",
        LineQuality::Auto => {
            if requested_points <= MAX_LINE_EXACT_POINTS {
                "exact"
            } else {
                "overview"
            }
        }
    };

    let step = if quality_applied == "overview" && requested_points > 0 {
        div_ceil(requested_points, params.max_points).max(1)
    } else {
        1
    };
    let out_count = if requested_points > 0 { div_ceil(requested_points, step) } else { 0 };
    enforce_element_limits(out_count)?;

    let mut reader_fixed = response_fixed.clone();
    reader_fixed.remove(&vary_dim);
    match (axis, display_dims) {
        ("row", Some((row_dim, _))) => {
            reader_fixed.insert(row_dim, index.unwrap_or(0));
        }
        ("col", Some((_, col_dim))) => {
            reader_fixed.insert(col_dim, index.unwrap_or(0));
        }
        _ => {}
    }

    Ok(LinePlan {
        vary_dim,
        axis,
        index,
        offset: params.line_offset,
        limit,
        step,
        out_count,
        quality_requested: params.quality,
        quality_applied,
        requested_points,
        reader_fixed,
        response_fixed,
        display_dims,
    })
}

// ---------------------------------------------------------------------------
// Selector assembly
// ---------------------------------------------------------------------------

/// Per-axis selectors for a 2-D plane read: slices on the display axes,
/// scalar indices everywhere else.
pub fn plane_selectors(
    ndim: usize,
    row_dim: usize,
    col_dim: usize,
    fixed: &BTreeMap<usize, usize>,
    row_sel: Selector,
    col_sel: Selector,
) -> Vec<Selector> {
    (0..ndim)
        .map(|axis| {
            if axis == row_dim {
                row_sel
            } else if axis == col_dim {
                col_sel
            } else {
                Selector::Index(fixed.get(&axis).copied().unwrap_or(0))
            }
        })
        .collect()
}

/// Per-axis selectors for a line read along `vary_dim`.
pub fn line_selectors(
    ndim: usize,
    vary_dim: usize,
    fixed: &BTreeMap<usize, usize>,
    line_sel: Selector,
) -> Vec<Selector> {
    (0..ndim)
        .map(|axis| {
            if axis == vary_dim {
                line_sel
            } else {
                Selector::Index(fixed.get(&axis).copied().unwrap_or(0))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stats sampling strides
// ---------------------------------------------------------------------------

/// Uniform per-axis stride so that a strided sample lands near `target`
/// elements: `ceil((total/target)^(1/ndim))` on every axis.
pub fn stats_strides(shape: &[usize], target: usize) -> Vec<usize> {
    let total: usize = shape.iter().product();
    if total == 0 || total <= target {
        return vec![1; shape.len()];
    }
    let ndim = shape.len().max(1);
    let base = (total as f64 / target as f64).powf(1.0 / ndim as f64).ceil();
    vec![(base as usize).max(1); shape.len()]
}
