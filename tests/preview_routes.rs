//! Preview endpoint tests.

mod helpers;

use axum::http::StatusCode;
use helpers::{flat_len, TestHarness};
use serde_json::json;

#[tokio::test]
async fn preview_1d_combines_table_plot_and_stats() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/preview?path=/array_1d").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["preview_type"], "1d");
    assert_eq!(body["dtype"], "float64");
    assert_eq!(body["shape"], json!([100]));
    assert!(body["display_dims"].is_null());
    assert_eq!(body["fixed_indices"], json!({}));

    let table = &body["table"];
    assert_eq!(table["kind"], "1d");
    assert_eq!(table["count"], 100);
    assert_eq!(table["values"][5], 5.0);

    let plot = &body["plot"];
    assert_eq!(plot["type"], "line");
    assert_eq!(plot["count"], 100);
    assert_eq!(plot["x_step"], 1);
    assert_eq!(plot["y"][99], 99.0);

    let stats = &body["stats"];
    assert_eq!(stats["supported"], true);
    assert_eq!(stats["min"], 0.0);
    assert_eq!(stats["max"], 99.0);
    assert_eq!(stats["mean"], 49.5);
    assert_eq!(stats["sample_size"], 100);
    assert_eq!(stats["sampled"], false);
    assert_eq!(stats["method"], "strided");

    assert!(body["profile"].is_null());
    assert_eq!(body["limits"]["max_line_points"], 5000);
}

#[tokio::test]
async fn preview_2d_has_heatmap_and_middle_row_profile() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/preview?path=/plane").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preview_type"], "2d");
    assert_eq!(body["display_dims"], json!([0, 1]));

    let table = &body["table"];
    assert_eq!(table["kind"], "2d");
    assert_eq!(table["shape"], json!([6, 8]));
    // The NaN corner sanitizes to null.
    assert!(table["data"][0][0].is_null());
    assert_eq!(table["data"][1][2], 12.0);

    let plot = &body["plot"];
    assert_eq!(plot["type"], "heatmap");
    assert_eq!(plot["shape"], json!([6, 8]));
    assert_eq!(plot["row_step"], 1);
    assert_eq!(flat_len(&plot["data"]), 48);

    let profile = &body["profile"];
    assert_eq!(profile["type"], "row");
    assert_eq!(profile["index"], 3);
    assert_eq!(profile["y"], json!([30.0, 31.0, 32.0, 33.0, 34.0, 35.0, 36.0, 37.0]));

    // NaN is excluded from min/max.
    assert_eq!(body["stats"]["min"], 1.0);
    assert_eq!(body["stats"]["max"], 57.0);
}

#[tokio::test]
async fn preview_nd_defaults_to_last_two_dims_and_middle_indices() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/preview?path=/matrix_3d").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preview_type"], "nd");
    assert_eq!(body["display_dims"], json!([1, 2]));
    assert_eq!(body["fixed_indices"], json!({ "0": 5 }));
    assert_eq!(body["table"]["shape"], json!([20, 30]));
    // Plane at dim0=5: value = 5*600 + r*30 + c.
    assert_eq!(body["table"]["data"][0][0], 3000);
    assert_eq!(body["table"]["data"][1][2], 3032);
}

#[tokio::test]
async fn preview_honors_display_dims_and_fixed_indices() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness
        .get("/files/sample.hfv/preview?path=/matrix_3d&display_dims=0,1&fixed_indices=2=7")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_dims"], json!([0, 1]));
    assert_eq!(body["fixed_indices"], json!({ "2": 7 }));
    assert_eq!(body["table"]["shape"], json!([10, 20]));
    // Value = r*600 + c*30 + 7.
    assert_eq!(body["table"]["data"][0][0], 7);
    assert_eq!(body["table"]["data"][2][1], 1237);
}

#[tokio::test]
async fn fast_detail_skips_stats_unless_overridden() {
    let harness = TestHarness::with_sample();
    let (_, body) = harness.get("/files/sample.hfv/preview?path=/array_1d&detail=fast").await;
    assert!(body["stats"].is_null());

    let (_, body) = harness
        .get("/files/sample.hfv/preview?path=/array_1d&detail=fast&include_stats=true")
        .await;
    assert_eq!(body["stats"]["supported"], true);
}

#[tokio::test]
async fn non_numeric_dataset_has_no_plot_or_stats() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/preview?path=/text_1d").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"], json!({ "supported": false, "reason": "non-numeric" }));
    assert_eq!(body["plot"], json!({ "supported": false, "reason": "non-numeric" }));
    assert_eq!(body["table"]["values"], json!(["alpha", "beta", "gamma", "delta"]));
}

#[tokio::test]
async fn complex_and_empty_datasets_report_reasons() {
    let harness = TestHarness::with_sample();
    let (_, body) = harness.get("/files/sample.hfv/preview?path=/complex_1d").await;
    assert_eq!(body["stats"], json!({ "supported": false, "reason": "complex" }));
    // Complex values stringify in the table.
    assert_eq!(body["table"]["values"][0], "(1+2j)");

    let (_, body) = harness.get("/files/sample.hfv/preview?path=/empty_1d").await;
    assert_eq!(body["stats"], json!({ "supported": false, "reason": "empty" }));
    assert_eq!(body["table"]["count"], 0);
}

#[tokio::test]
async fn scalar_dataset_previews_without_a_plot() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/preview?path=/scalar").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preview_type"], "scalar");
    assert_eq!(body["shape"], json!([]));
    assert_eq!(body["ndim"], 0);
    assert!(body["display_dims"].is_null());
    assert_eq!(body["table"], json!({ "kind": "scalar", "value": 42.5 }));
    assert_eq!(body["plot"], json!({ "supported": false, "reason": "scalar" }));
    assert!(body["profile"].is_null());
    assert_eq!(body["stats"]["min"], 42.5);
    assert_eq!(body["stats"]["max"], 42.5);
    assert_eq!(body["stats"]["sample_size"], 1);
}

#[tokio::test]
async fn preview_runs_on_ttl_cache_version_without_head() {
    let harness = TestHarness::with_sample();
    let (_, first) = harness.get("/files/sample.hfv/preview?path=/array_1d").await;
    assert_eq!(first["cached"], false);
    assert_eq!(first["cache_version"], "ttl");
    assert_eq!(harness.store.head_calls(), 0);

    let range_after_first = harness.store.range_calls();
    let (_, second) = harness.get("/files/sample.hfv/preview?path=/array_1d").await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["cache_version"], "ttl");
    assert_eq!(harness.store.head_calls(), 0);
    assert_eq!(harness.store.range_calls(), range_after_first);
}

#[tokio::test]
async fn client_etag_hint_sharpens_the_cache_version() {
    let harness = TestHarness::with_sample();
    let (_, body) = harness.get("/files/sample.hfv/preview?path=/array_1d&etag=abc123").await;
    assert_eq!(body["cache_version"], "abc123");

    // A different tag is a different cache entry.
    let (_, body) = harness.get("/files/sample.hfv/preview?path=/array_1d&etag=def456").await;
    assert_eq!(body["cached"], false);
}

#[tokio::test]
async fn preview_cache_keys_include_selection_shape() {
    let harness = TestHarness::with_sample();
    harness.get("/files/sample.hfv/preview?path=/plane").await;
    let (_, body) = harness.get("/files/sample.hfv/preview?path=/plane&max_size=64").await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["limits"]["max_heatmap_size"], 64);
}

#[tokio::test]
async fn preview_of_missing_path_is_404() {
    let harness = TestHarness::with_sample();
    let (status, _) = harness.get("/files/sample.hfv/preview?path=/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preview_of_group_is_rejected() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/preview?path=/grp").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not a dataset"));
}

#[tokio::test]
async fn preview_rejects_bad_selections() {
    let harness = TestHarness::with_sample();
    let (status, _) = harness.get("/files/sample.hfv/preview?path=/plane&display_dims=1,1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = harness.get("/files/sample.hfv/preview?path=/plane&max_size=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("max_size"));
}
