//! Preview engine (C6).
//!
//! Builds the combined table + plot + profile + stats payload for a dataset:
//! a leading-values table, a downsampled line or heatmap plot, a middle-row
//! profile for 2-D views, and strided-sample statistics. Shapes are bounded
//! by the preview limits regardless of dataset size.

use serde_json::{json, Value as JsonValue};

use crate::error::AppError;
use crate::hfile::format::{DatasetNode, DtypeClass};
use crate::hfile::{HFile, Selector};
use crate::plan::{plane_selectors, stats_strides};
use crate::sanitize::{array_to_json, safe_number};
use crate::selection::{normalize_selection, PreviewDetail, PreviewMode, Selection};
use crate::types::{
    MAX_HEATMAP_ELEMENTS, MAX_LINE_POINTS, MAX_PREVIEW_ELEMENTS, MAX_STATS_SAMPLE,
    MIN_LINE_POINTS, PREVIEW_HEATMAP_SIZE, TABLE_1D_MAX, TABLE_2D_MAX,
};

/// Knobs of a preview request after surface parsing.
#[derive(Clone, Copy, Debug)]
pub struct PreviewOptions {
    pub mode: PreviewMode,
    pub detail: PreviewDetail,
    pub include_stats: bool,
    pub max_size: Option<usize>,
}

/// Line plots downsample toward this many points.
fn line_target() -> usize {
    MAX_LINE_POINTS.min(MIN_LINE_POINTS.max(3000))
}

/// Build the full preview payload for a dataset path.
pub async fn build_preview(
    hfile: &HFile,
    path: &str,
    display_param: Option<&str>,
    fixed_param: Option<&str>,
    opts: &PreviewOptions,
) -> Result<JsonValue, AppError> {
    let node = hfile.dataset(path).await?;
    let shape = node.shape();
    let ndim = node.ndim();
    let numeric = node.dtype.is_numeric();
    let preview_type = match ndim {
        0 => "scalar",
        1 => "1d",
        2 => "2d",
        _ => "nd",
    };
    let max_heatmap_size = opts.max_size.unwrap_or(PREVIEW_HEATMAP_SIZE).min(PREVIEW_HEATMAP_SIZE);

    let stats = if opts.include_stats {
        compute_stats(hfile, &node, &shape).await?
    } else {
        JsonValue::Null
    };

    let (table, plot, profile, display_out, fixed_out);
    if ndim == 0 {
        // Rank-0 datasets hold a single value; there is nothing to plot.
        let value = hfile.read(&node, &[]).await?;
        table = json!({ "kind": "scalar", "value": array_to_json(&value) });
        plot = json!({ "supported": false, "reason": "scalar" });
        profile = JsonValue::Null;
        display_out = JsonValue::Null;
        fixed_out = json!({});
    } else if ndim == 1 {
        let (t, p) = preview_1d(hfile, &node, numeric).await?;
        table = t;
        plot = p;
        profile = JsonValue::Null;
        display_out = JsonValue::Null;
        fixed_out = json!({});
    } else {
        let selection = normalize_selection(&shape, display_param, fixed_param)?;
        let (t, p, pr) =
            preview_2d(hfile, &node, &shape, &selection, max_heatmap_size, numeric).await?;
        table = t;
        plot = p;
        profile = pr;
        let (row_dim, col_dim) = selection.display_dims.expect("rank >= 2 has display dims");
        display_out = json!([row_dim, col_dim]);
        fixed_out = fixed_to_json(&selection);
    }

    Ok(json!({
        "key": hfile.key(),
        "path": path,
        "dtype": node.dtype.type_str(),
        "shape": shape,
        "ndim": ndim,
        "preview_type": preview_type,
        "mode": opts.mode.as_str(),
        "display_dims": display_out,
        "fixed_indices": fixed_out,
        "stats": stats,
        "table": table,
        "plot": plot,
        "profile": profile,
        "limits": {
            "max_elements": MAX_PREVIEW_ELEMENTS,
            "max_heatmap_size": max_heatmap_size,
            "max_line_points": MAX_LINE_POINTS,
            "table_1d_max": TABLE_1D_MAX,
            "table_2d_max": TABLE_2D_MAX,
        },
    }))
}

fn fixed_to_json(selection: &Selection) -> JsonValue {
    let map: serde_json::Map<String, JsonValue> = selection
        .fixed_indices
        .iter()
        .map(|(dim, idx)| (dim.to_string(), JsonValue::from(*idx)))
        .collect();
    JsonValue::Object(map)
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Strided-sample statistics: numeric datasets report min/max/mean/std over
/// up to `MAX_STATS_SAMPLE` elements; everything else reports why not.
async fn compute_stats(
    hfile: &HFile,
    node: &DatasetNode,
    shape: &[usize],
) -> Result<JsonValue, AppError> {
    if matches!(node.dtype.class, DtypeClass::String) {
        return Ok(json!({ "supported": false, "reason": "non-numeric" }));
    }
    let total: usize = shape.iter().product();
    if total == 0 {
        return Ok(json!({ "supported": false, "reason": "empty" }));
    }
    if matches!(node.dtype.class, DtypeClass::Complex) {
        return Ok(json!({ "supported": false, "reason": "complex" }));
    }

    let strides = stats_strides(shape, MAX_STATS_SAMPLE);
    let selectors: Vec<Selector> = shape
        .iter()
        .zip(&strides)
        .map(|(&dim, &stride)| Selector::Slice { start: 0, stop: dim, step: stride })
        .collect();
    let sample = hfile.read(node, &selectors).await?;

    let sample_size = sample.element_count().min(MAX_STATS_SAMPLE);
    let sampled = sample_size < total;

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut finite = 0usize;
    let values: Vec<f64> = sample
        .numeric_iter()
        .expect("numeric dtype yields numeric storage")
        .take(sample_size)
        .collect();
    for &v in &values {
        if v.is_finite() {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            finite += 1;
        }
    }
    if finite == 0 {
        return Ok(json!({
            "supported": true,
            "min": null,
            "max": null,
            "mean": null,
            "std": null,
            "sample_size": sample_size,
            "sampled": sampled,
            "method": "strided",
        }));
    }

    let mean = sum / finite as f64;
    let variance = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / finite as f64;

    Ok(json!({
        "supported": true,
        "min": safe_number(min),
        "max": safe_number(max),
        "mean": safe_number(mean),
        "std": safe_number(variance.sqrt()),
        "sample_size": sample_size,
        "sampled": sampled,
        "method": "strided",
    }))
}

// ---------------------------------------------------------------------------
// 1-D preview
// ---------------------------------------------------------------------------

async fn preview_1d(
    hfile: &HFile,
    node: &DatasetNode,
    numeric: bool,
) -> Result<(JsonValue, JsonValue), AppError> {
    let length = node.shape().first().copied().unwrap_or(0);

    let table_n = TABLE_1D_MAX.min(length);
    let table_values =
        hfile.read(node, &[Selector::Slice { start: 0, stop: table_n, step: 1 }]).await?;
    let count = table_values.element_count();
    let table = json!({
        "kind": "1d",
        "values": array_to_json(&table_values),
        "count": count,
        "start": 0,
        "step": 1,
    });

    if !numeric {
        return Ok((table, json!({ "supported": false, "reason": "non-numeric" })));
    }

    let step = if length <= MAX_LINE_POINTS {
        1
    } else {
        length.div_ceil(line_target()).max(1)
    };
    let mut y = hfile.read(node, &[Selector::Slice { start: 0, stop: length, step }]).await?;
    if y.element_count() > MAX_LINE_POINTS {
        truncate_1d(&mut y, MAX_LINE_POINTS);
    }
    let count = y.element_count();
    let x: Vec<usize> = (0..count).map(|i| i * step).collect();

    let plot = json!({
        "type": "line",
        "x": x,
        "y": array_to_json(&y),
        "count": count,
        "x_start": 0,
        "x_step": step,
    });
    Ok((table, plot))
}

fn truncate_1d(arr: &mut crate::hfile::Array, keep: usize) {
    use crate::hfile::Values;
    match &mut arr.values {
        Values::Int(v) => v.truncate(keep),
        Values::UInt(v) => v.truncate(keep),
        Values::Float(v) => v.truncate(keep),
        Values::Bool(v) => v.truncate(keep),
        Values::Text(v) => v.truncate(keep),
        Values::Complex(v) => v.truncate(keep),
    }
    arr.shape = vec![arr.values.len()];
}

// ---------------------------------------------------------------------------
// 2-D / N-D preview
// ---------------------------------------------------------------------------

async fn preview_2d(
    hfile: &HFile,
    node: &DatasetNode,
    shape: &[usize],
    selection: &Selection,
    max_heatmap_size: usize,
    numeric: bool,
) -> Result<(JsonValue, JsonValue, JsonValue), AppError> {
    let (row_dim, col_dim) = selection.display_dims.expect("rank >= 2 has display dims");
    let rows = shape[row_dim];
    let cols = shape[col_dim];
    let needs_transpose = row_dim > col_dim;
    let ndim = shape.len();

    // Leading table window, unstrided.
    let table_rows = TABLE_2D_MAX.min(rows);
    let table_cols = TABLE_2D_MAX.min(cols);
    let table_data = if table_rows > 0 && table_cols > 0 {
        let selectors = plane_selectors(
            ndim,
            row_dim,
            col_dim,
            &selection.fixed_indices,
            Selector::Slice { start: 0, stop: table_rows, step: 1 },
            Selector::Slice { start: 0, stop: table_cols, step: 1 },
        );
        let mut arr = hfile.read(node, &selectors).await?;
        if needs_transpose {
            arr.transpose_2d();
        }
        array_to_json(&arr)
    } else {
        json!([])
    };
    let table = json!({
        "kind": "2d",
        "data": table_data,
        "shape": [table_rows, table_cols],
        "row_start": 0,
        "col_start": 0,
        "row_step": 1,
        "col_step": 1,
    });

    if !numeric || rows == 0 || cols == 0 {
        let reason = if numeric { "empty" } else { "non-numeric" };
        return Ok((table, json!({ "supported": false, "reason": reason }), JsonValue::Null));
    }

    // Heatmap plane, strided to the preview ceilings.
    let mut target_rows = rows.min(max_heatmap_size);
    let mut target_cols = cols.min(max_heatmap_size);
    if target_rows * target_cols > MAX_HEATMAP_ELEMENTS {
        let scale = ((target_rows * target_cols) as f64 / MAX_HEATMAP_ELEMENTS as f64).sqrt();
        target_rows = ((target_rows as f64 / scale).floor() as usize).max(1);
        target_cols = ((target_cols as f64 / scale).floor() as usize).max(1);
    }
    let step_r = rows.div_ceil(target_rows).max(1);
    let step_c = cols.div_ceil(target_cols).max(1);

    let selectors = plane_selectors(
        ndim,
        row_dim,
        col_dim,
        &selection.fixed_indices,
        Selector::Slice { start: 0, stop: rows, step: step_r },
        Selector::Slice { start: 0, stop: cols, step: step_c },
    );
    let mut heatmap = hfile.read(node, &selectors).await?;
    if needs_transpose {
        heatmap.transpose_2d();
    }
    let plot = json!({
        "type": "heatmap",
        "data": array_to_json(&heatmap),
        "shape": heatmap.shape,
        "row_start": 0,
        "col_start": 0,
        "row_step": step_r,
        "col_step": step_c,
    });

    // Middle-row line profile.
    let row_index = rows / 2;
    let step_line = cols.div_ceil(line_target()).max(1);
    let selectors = plane_selectors(
        ndim,
        row_dim,
        col_dim,
        &selection.fixed_indices,
        Selector::Index(row_index),
        Selector::Slice { start: 0, stop: cols, step: step_line },
    );
    let mut line = hfile.read(node, &selectors).await?;
    if line.element_count() > MAX_LINE_POINTS {
        truncate_1d(&mut line, MAX_LINE_POINTS);
    }
    let count = line.element_count();
    let x: Vec<usize> = (0..count).map(|i| i * step_line).collect();
    let profile = json!({
        "type": "row",
        "index": row_index,
        "x": x,
        "y": array_to_json(&line),
        "count": count,
        "x_start": 0,
        "x_step": step_line,
        "dim_row": row_dim,
        "dim_col": col_dim,
    });

    Ok((table, plot, profile))
}
