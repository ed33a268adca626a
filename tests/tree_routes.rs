//! Children and metadata endpoint tests.

mod helpers;

use axum::http::StatusCode;
use helpers::TestHarness;
use serde_json::Value;

fn child_named<'a>(body: &'a Value, name: &str) -> &'a Value {
    body["children"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == name)
        .unwrap_or_else(|| panic!("no child named {name}"))
}

#[tokio::test]
async fn children_of_root_list_groups_and_datasets() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/children?path=/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["key"], "sample.hfv");
    assert_eq!(body["children"].as_array().unwrap().len(), 10);

    let grp = child_named(&body, "grp");
    assert_eq!(grp["type"], "group");
    assert_eq!(grp["num_children"], 1);
    assert_eq!(grp["path"], "/grp");
    assert!(grp.get("shape").is_none());

    let plane = child_named(&body, "plane");
    assert_eq!(plane["type"], "dataset");
    assert_eq!(plane["shape"], serde_json::json!([6, 8]));
    assert_eq!(plane["dtype"], "float64");
    assert_eq!(plane["size"], 48);
    assert_eq!(plane["ndim"], 2);

    let chunked = child_named(&body, "chunked_2d");
    assert_eq!(chunked["chunks"], serde_json::json!([32, 32]));
    assert_eq!(chunked["compression"], "gzip");
    assert_eq!(chunked["attributes"]["source"], "sensor-7");
}

#[tokio::test]
async fn children_walk_nested_groups() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/children?path=/grp/inner").await;
    assert_eq!(status, StatusCode::OK);
    let deep = child_named(&body, "deep");
    assert_eq!(deep["path"], "/grp/inner/deep");
    assert_eq!(deep["shape"], serde_json::json!([5]));
}

#[tokio::test]
async fn children_of_missing_path_are_empty_not_an_error() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/children?path=/no/such/group").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["children"], serde_json::json!([]));
}

#[tokio::test]
async fn children_of_missing_object_is_404() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/nope.hfv/children?path=/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn children_attributes_are_capped_at_ten() {
    let harness = TestHarness::with_sample();
    let (_, body) = harness.get("/files/sample.hfv/children?path=/").await;
    let flagged = child_named(&body, "flagged");
    assert_eq!(flagged["num_attributes"], 12);
    assert_eq!(flagged["attributes"].as_object().unwrap().len(), 10);
    assert_eq!(flagged["attributes_truncated"], true);
}

#[tokio::test]
async fn children_consult_head_each_request_and_cache_by_etag() {
    let harness = TestHarness::with_sample();
    let (_, first) = harness.get("/files/sample.hfv/children?path=/").await;
    assert_eq!(first["cached"], false);
    let head_after_first = harness.store.head_calls();
    let range_after_first = harness.store.range_calls();

    let (_, second) = harness.get("/files/sample.hfv/children?path=/").await;
    assert_eq!(second["cached"], true);
    // HEAD runs again to resolve the etag; the tree itself is not re-read.
    assert_eq!(harness.store.head_calls(), head_after_first + 1);
    assert_eq!(harness.store.range_calls(), range_after_first);
    assert_eq!(second["children"], first["children"]);
}

#[tokio::test]
async fn metadata_for_dataset_carries_types_and_filters() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/meta?path=/chunked_2d").await;
    assert_eq!(status, StatusCode::OK);
    let meta = &body["metadata"];
    assert_eq!(meta["kind"], "dataset");
    assert_eq!(meta["name"], "chunked_2d");
    assert_eq!(meta["dtype"], "int32");
    assert_eq!(meta["shape"], serde_json::json!([100, 80]));
    assert_eq!(meta["type"]["class"], "Integer");
    assert_eq!(meta["type"]["signed"], true);
    assert_eq!(meta["type"]["endianness"], "little-endian");
    assert_eq!(meta["type"]["size"], 32);

    let filters = meta["filters"].as_array().unwrap();
    let names: Vec<&str> = filters.iter().map(|f| f["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["shuffle", "gzip", "fletcher32"]);
    let ids: Vec<u64> = filters.iter().map(|f| f["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![2, 1, 3]);
    assert_eq!(filters[1]["level"], 6);

    assert_eq!(meta["chunks"], serde_json::json!([32, 32]));
    assert_eq!(meta["compression"], "gzip");
    assert_eq!(meta["compression_opts"], 6);
}

#[tokio::test]
async fn metadata_for_group_counts_children() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/meta?path=/grp").await;
    assert_eq!(status, StatusCode::OK);
    let meta = &body["metadata"];
    assert_eq!(meta["kind"], "group");
    assert_eq!(meta["num_children"], 1);
    let attrs = meta["attributes"].as_array().unwrap();
    assert_eq!(attrs[0]["name"], "purpose");
    assert_eq!(attrs[0]["value"], "nesting");
}

#[tokio::test]
async fn metadata_reports_unreadable_attributes() {
    let harness = TestHarness::with_sample();
    let (_, body) = harness.get("/files/sample.hfv/meta?path=/flagged").await;
    let attrs = body["metadata"]["attributes"].as_array().unwrap();
    assert_eq!(attrs.len(), 12);
    let broken = attrs.iter().find(|a| a["name"] == "broken").unwrap();
    assert_eq!(broken["value"], "<unreadable>");
}

#[tokio::test]
async fn metadata_requires_path_param() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/meta").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("path"));
}

#[tokio::test]
async fn metadata_for_missing_path_is_404() {
    let harness = TestHarness::with_sample();
    let (status, body) = harness.get("/files/sample.hfv/meta?path=/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn unknown_action_is_404() {
    let harness = TestHarness::with_sample();
    let (status, _) = harness.get("/files/sample.hfv/peek?path=/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn keys_with_slashes_resolve() {
    let harness = TestHarness::new();
    harness.put("runs/2024/sample.hfv", helpers::fixtures::sample_file());
    let (status, body) = harness.get("/files/runs/2024/sample.hfv/children?path=/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "runs/2024/sample.hfv");
    assert!(!body["children"].as_array().unwrap().is_empty());
}
