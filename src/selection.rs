//! Selection parsing and normalization (C4).
//!
//! Two-step pipeline: surface parsing of the raw query strings into typed
//! records, then semantic validation against the dataset's shape. This module
//! is the sole gatekeeper of selection legality; everything downstream
//! assumes the invariants hold (display axes distinct and in range, every
//! non-display axis carrying an in-range index).

use std::collections::BTreeMap;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Tagged variants
// ---------------------------------------------------------------------------

/// Mode of a /data request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataMode {
    Matrix,
    Heatmap,
    Line,
}

impl DataMode {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "matrix" => Ok(DataMode::Matrix),
            "heatmap" => Ok(DataMode::Heatmap),
            "line" => Ok(DataMode::Line),
            _ => Err(AppError::InvalidSelection("Invalid mode parameter".into())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataMode::Matrix => "matrix",
            DataMode::Heatmap => "heatmap",
            DataMode::Line => "line",
        }
    }
}

/// Mode hint of a /preview request. Unknown values fall back to `Auto`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewMode {
    Auto,
    Line,
    Table,
    Heatmap,
}

impl PreviewMode {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("line") => PreviewMode::Line,
            Some("table") => PreviewMode::Table,
            Some("heatmap") => PreviewMode::Heatmap,
            _ => PreviewMode::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewMode::Auto => "auto",
            PreviewMode::Line => "line",
            PreviewMode::Table => "table",
            PreviewMode::Heatmap => "heatmap",
        }
    }
}

/// Line read quality policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineQuality {
    Auto,
    Exact,
    Overview,
}

impl LineQuality {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") => Ok(LineQuality::Auto),
            Some("auto") => Ok(LineQuality::Auto),
            Some("exact") => Ok(LineQuality::Exact),
            Some("overview") => Ok(LineQuality::Overview),
            Some(_) => Err(AppError::InvalidSelection("Invalid quality parameter".into())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineQuality::Auto => "auto",
            LineQuality::Exact => "exact",
            LineQuality::Overview => "overview",
        }
    }
}

/// Preview detail level. `Full` turns stats on by default, `Fast` off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewDetail {
    Fast,
    Full,
}

impl PreviewDetail {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") => Ok(PreviewDetail::Full),
            Some("full") => Ok(PreviewDetail::Full),
            Some("fast") => Ok(PreviewDetail::Fast),
            Some(_) => Err(AppError::InvalidSelection("Invalid detail parameter".into())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewDetail::Fast => "fast",
            PreviewDetail::Full => "full",
        }
    }
}

/// Which axis a line request runs along: an explicit dataset dimension, or a
/// row/col of the current display plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineDim {
    Dim(usize),
    Row,
    Col,
}

pub fn parse_line_dim(raw: &str, ndim: usize) -> Result<LineDim, AppError> {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "row" => return Ok(LineDim::Row),
        "col" => return Ok(LineDim::Col),
        _ => {}
    }
    let dim: i64 = lowered
        .parse()
        .map_err(|_| AppError::InvalidSelection("Invalid line_dim parameter".into()))?;
    let resolved = resolve_axis(dim, ndim)
        .ok_or_else(|| AppError::InvalidSelection("line_dim out of range".into()))?;
    Ok(LineDim::Dim(resolved))
}

// ---------------------------------------------------------------------------
// Canonical selection
// ---------------------------------------------------------------------------

/// A validated selection: which axes are displayed and what index every other
/// axis is pinned to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// `(row_dim, col_dim)`; `None` for 1-D datasets.
    pub display_dims: Option<(usize, usize)>,
    /// Every non-display axis → in-range scalar index.
    pub fixed_indices: BTreeMap<usize, usize>,
}

/// Resolve a possibly negative axis number against `ndim`.
fn resolve_axis(dim: i64, ndim: usize) -> Option<usize> {
    let resolved = if dim < 0 { dim + ndim as i64 } else { dim };
    (0..ndim as i64).contains(&resolved).then_some(resolved as usize)
}

/// Parse `display_dims`: two distinct comma-separated axes, negatives
/// resolving against `ndim`. Defaults to the last two axes; always `None`
/// below rank 2.
pub fn parse_display_dims(
    param: Option<&str>,
    ndim: usize,
) -> Result<Option<(usize, usize)>, AppError> {
    if ndim < 2 {
        return Ok(None);
    }
    let Some(param) = param.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Some((ndim - 2, ndim - 1)));
    };

    let parts: Vec<&str> = param.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if parts.len() != 2 {
        return Err(AppError::InvalidSelection("display_dims must include two distinct dims".into()));
    }
    let mut dims = [0usize; 2];
    for (slot, part) in dims.iter_mut().zip(&parts) {
        let dim: i64 = part
            .parse()
            .map_err(|_| AppError::InvalidSelection("Invalid display_dims parameter".into()))?;
        *slot = resolve_axis(dim, ndim)
            .ok_or_else(|| AppError::InvalidSelection("display_dims out of range".into()))?;
    }
    if dims[0] == dims[1] {
        return Err(AppError::InvalidSelection("display_dims must include two distinct dims".into()));
    }
    Ok(Some((dims[0], dims[1])))
}

/// Parse `fixed_indices` (`dim=idx` or `dim:idx`, comma separated) into a raw
/// map. Axis numbers resolve immediately; index values stay signed until
/// normalization knows the shape.
pub fn parse_fixed_indices(
    param: Option<&str>,
    ndim: usize,
) -> Result<BTreeMap<usize, i64>, AppError> {
    let mut indices = BTreeMap::new();
    let Some(param) = param.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(indices);
    };
    for part in param.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (dim_str, idx_str) = part
            .split_once('=')
            .or_else(|| part.split_once(':'))
            .ok_or_else(|| AppError::InvalidSelection("Invalid fixed_indices parameter".into()))?;
        let dim: i64 = dim_str
            .trim()
            .parse()
            .map_err(|_| AppError::InvalidSelection("Invalid fixed_indices parameter".into()))?;
        let idx: i64 = idx_str
            .trim()
            .parse()
            .map_err(|_| AppError::InvalidSelection("Invalid fixed_indices parameter".into()))?;
        let dim = resolve_axis(dim, ndim)
            .ok_or_else(|| AppError::InvalidSelection("fixed_indices dim out of range".into()))?;
        indices.insert(dim, idx);
    }
    Ok(indices)
}

/// Parse and validate a full selection against a dataset shape.
///
/// Display axes are dropped from the fixed map; remaining indices normalize
/// (negative → from the end) and must land in `[0, size)`; every other
/// non-display axis defaults to its midpoint.
pub fn normalize_selection(
    shape: &[usize],
    display_param: Option<&str>,
    fixed_param: Option<&str>,
) -> Result<Selection, AppError> {
    let ndim = shape.len();
    let display_dims = parse_display_dims(display_param, ndim)?;
    let raw = parse_fixed_indices(fixed_param, ndim)?;

    let is_display = |dim: usize| match display_dims {
        Some((r, c)) => dim == r || dim == c,
        None => false,
    };

    let mut fixed_indices = BTreeMap::new();
    for (dim, idx) in raw {
        if is_display(dim) {
            continue;
        }
        let size = shape[dim];
        if size == 0 {
            fixed_indices.insert(dim, 0);
            continue;
        }
        let normalized = if idx < 0 { idx + size as i64 } else { idx };
        if !(0..size as i64).contains(&normalized) {
            return Err(AppError::InvalidSelection(format!(
                "fixed_indices index out of range for dim {dim}"
            )));
        }
        fixed_indices.insert(dim, normalized as usize);
    }

    for (dim, &size) in shape.iter().enumerate() {
        if is_display(dim) {
            continue;
        }
        fixed_indices.entry(dim).or_insert(default_index(size));
    }

    Ok(Selection { display_dims, fixed_indices })
}

/// Midpoint default for an unpinned axis.
pub fn default_index(size: usize) -> usize {
    size / 2
}
