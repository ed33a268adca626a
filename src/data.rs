//! Data engine (C7).
//!
//! Executes slice plans against an H-file handle and shapes the bounded
//! window payloads for the /data endpoint, plus the CSV rendering used by
//! /export. All array content passes through the sanitization layer; stats
//! are computed over the raw sample before sanitization.

use serde_json::{json, Value as JsonValue};

use crate::error::AppError;
use crate::hfile::format::DatasetNode;
use crate::hfile::{HFile, Selector, Values};
use crate::plan::{line_selectors, plane_selectors, HeatmapPlan, LinePlan, MatrixPlan};
use crate::sanitize::{array_to_json, safe_number};
use crate::selection::Selection;

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Read a strided matrix window. Returns the engine fields of the response
/// (`data`, `shape`, `dtype`, offsets, `downsample_info`).
pub async fn matrix_window(
    hfile: &HFile,
    node: &DatasetNode,
    selection: &Selection,
    plan: &MatrixPlan,
) -> Result<JsonValue, AppError> {
    let data = if plan.row_limit == 0 || plan.col_limit == 0 {
        json!([])
    } else {
        let selectors = plane_selectors(
            node.ndim(),
            plan.row_dim,
            plan.col_dim,
            &selection.fixed_indices,
            Selector::Slice {
                start: plan.row_offset,
                stop: plan.row_offset + plan.row_limit,
                step: plan.row_step,
            },
            Selector::Slice {
                start: plan.col_offset,
                stop: plan.col_offset + plan.col_limit,
                step: plan.col_step,
            },
        );
        let mut arr = hfile.read(node, &selectors).await?;
        if plan.needs_transpose {
            arr.transpose_2d();
        }
        array_to_json(&arr)
    };

    Ok(json!({
        "data": data,
        "shape": [plan.out_rows, plan.out_cols],
        "dtype": node.dtype.type_str(),
        "row_offset": plan.row_offset,
        "col_offset": plan.col_offset,
        "downsample_info": { "row_step": plan.row_step, "col_step": plan.col_step },
    }))
}

// ---------------------------------------------------------------------------
// Heatmap
// ---------------------------------------------------------------------------

/// Read a downsampled heatmap plane. Min/max are taken over the raw sample
/// when the dataset is numeric and stats were requested.
pub async fn heatmap_window(
    hfile: &HFile,
    node: &DatasetNode,
    selection: &Selection,
    plan: &HeatmapPlan,
    include_stats: bool,
) -> Result<JsonValue, AppError> {
    let rows = node.shape()[plan.row_dim];
    let cols = node.shape()[plan.col_dim];

    let selectors = plane_selectors(
        node.ndim(),
        plan.row_dim,
        plan.col_dim,
        &selection.fixed_indices,
        Selector::Slice { start: 0, stop: rows, step: plan.row_step },
        Selector::Slice { start: 0, stop: cols, step: plan.col_step },
    );
    let mut arr = hfile.read(node, &selectors).await?;
    if plan.needs_transpose {
        arr.transpose_2d();
    }

    let stats = if include_stats && node.dtype.is_numeric() {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut any = false;
        for v in arr.numeric_iter().expect("numeric dtype yields numeric storage") {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
                any = true;
            }
        }
        if any {
            json!({ "min": safe_number(min), "max": safe_number(max) })
        } else {
            json!({ "min": null, "max": null })
        }
    } else {
        json!({ "min": null, "max": null })
    };

    Ok(json!({
        "data": array_to_json(&arr),
        "shape": arr.shape,
        "dtype": node.dtype.type_str(),
        "stats": stats,
        "row_offset": 0,
        "col_offset": 0,
        "downsample_info": { "row_step": plan.row_step, "col_step": plan.col_step },
        "sampled": plan.sampled,
    }))
}

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// Read a strided 1-D window along the plan's vary axis.
pub async fn line_window(
    hfile: &HFile,
    node: &DatasetNode,
    plan: &LinePlan,
) -> Result<JsonValue, AppError> {
    let (data, returned) = if plan.limit == 0 {
        (json!([]), 0)
    } else {
        let selectors = line_selectors(
            node.ndim(),
            plan.vary_dim,
            &plan.reader_fixed,
            Selector::Slice {
                start: plan.offset,
                stop: plan.offset + plan.limit,
                step: plan.step,
            },
        );
        let arr = hfile.read(node, &selectors).await?;
        let returned = arr.element_count();
        (array_to_json(&arr), returned)
    };

    Ok(json!({
        "data": data,
        "shape": [plan.out_count],
        "dtype": node.dtype.type_str(),
        "axis": plan.axis,
        "index": plan.index,
        "returned_points": returned,
        "downsample_info": { "step": plan.step },
    }))
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Render a matrix window as CSV. Non-finite values become empty fields;
/// the optional header row names source column indices.
pub async fn matrix_csv(
    hfile: &HFile,
    node: &DatasetNode,
    selection: &Selection,
    plan: &MatrixPlan,
    header: bool,
) -> Result<String, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    if header {
        let mut fields = Vec::with_capacity(plan.out_cols);
        for c in 0..plan.out_cols {
            fields.push(format!("col_{}", plan.col_offset + c * plan.col_step));
        }
        writer
            .write_record(&fields)
            .map_err(|e| AppError::Internal(format!("CSV encoding failed: {e}")))?;
    }

    if plan.out_rows > 0 && plan.out_cols > 0 {
        let selectors = plane_selectors(
            node.ndim(),
            plan.row_dim,
            plan.col_dim,
            &selection.fixed_indices,
            Selector::Slice {
                start: plan.row_offset,
                stop: plan.row_offset + plan.row_limit,
                step: plan.row_step,
            },
            Selector::Slice {
                start: plan.col_offset,
                stop: plan.col_offset + plan.col_limit,
                step: plan.col_step,
            },
        );
        let mut arr = hfile.read(node, &selectors).await?;
        if plan.needs_transpose {
            arr.transpose_2d();
        }

        let cols = arr.shape[1];
        for r in 0..arr.shape[0] {
            let mut record = Vec::with_capacity(cols);
            for c in 0..cols {
                record.push(csv_field(&arr.values, r * cols + c));
            }
            writer
                .write_record(&record)
                .map_err(|e| AppError::Internal(format!("CSV encoding failed: {e}")))?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV encoding failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV encoding failed: {e}")))
}

fn csv_field(values: &Values, index: usize) -> String {
    match values {
        Values::Int(v) => v[index].to_string(),
        Values::UInt(v) => v[index].to_string(),
        Values::Float(v) => {
            if v[index].is_finite() {
                v[index].to_string()
            } else {
                String::new()
            }
        }
        Values::Bool(v) => v[index].to_string(),
        Values::Text(v) => v[index].clone(),
        Values::Complex(v) => {
            let (re, im) = v[index];
            format!("({re}{im:+}j)")
        }
    }
}
