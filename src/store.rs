//! Object store adapter (C1).
//!
//! The H-file parser treats a remote object as a random-access byte source,
//! so the adapter's contract is exact HTTP Range reads plus HEAD and listing.
//! Production talks to any S3-compatible store via `aws-sdk-s3` (SigV4,
//! path-style addressing for MinIO); tests and local development use the
//! in-memory backend.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::Config;
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// One listing entry: a real object or a virtual folder derived from key
/// prefixes. Folder entries carry size 0 and null timestamps.
#[derive(Clone, Debug, Serialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub is_folder: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Folder,
}

/// Result of a listing call. `truncated` is set when `max_items` stopped
/// pagination early.
#[derive(Clone, Debug)]
pub struct ListResult {
    pub entries: Vec<ObjectDescriptor>,
    pub truncated: bool,
}

/// HEAD response for a single object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<String>,
    /// ETag with surrounding quotes stripped.
    pub etag: String,
    pub content_type: String,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Minimal object-store surface the service needs: list, HEAD, and precise
/// inclusive byte-range reads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under `prefix`, up to `max_items` file entries. When
    /// `include_folders`, virtual folder descriptors are derived from the
    /// parent prefixes of listed keys and appended after files, sorted
    /// lexicographically.
    async fn list(
        &self,
        prefix: &str,
        include_folders: bool,
        max_items: usize,
    ) -> Result<ListResult, AppError>;

    /// HEAD a single object. `NotFound` when the key is absent.
    async fn head(&self, key: &str) -> Result<ObjectMeta, AppError>;

    /// Read the inclusive byte range `[start, end]`. Returns exactly
    /// `end - start + 1` bytes on success.
    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<Bytes, AppError>;
}

/// Normalize a logical folder prefix for key matching: strip whitespace and
/// any leading slash (keys are stored without one).
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_start_matches('/').to_string()
}

/// Parent folder paths of `key` (each ending with `/`), filtered to those
/// beginning with `prefix`.
fn derive_parent_folders(key: &str, prefix: &str, out: &mut BTreeSet<String>) {
    let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= 1 {
        return;
    }
    let mut running = String::new();
    for part in &parts[..parts.len() - 1] {
        running.push_str(part);
        running.push('/');
        if !prefix.is_empty() && !running.starts_with(prefix) {
            continue;
        }
        out.insert(running.clone());
    }
}

fn folder_descriptor(key: String) -> ObjectDescriptor {
    ObjectDescriptor {
        key,
        size: 0,
        last_modified: None,
        etag: None,
        kind: ObjectKind::Folder,
        is_folder: true,
    }
}

// ---------------------------------------------------------------------------
// S3 backend
// ---------------------------------------------------------------------------

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Build the S3 client from explicit configuration. Uses SigV4 with
    /// path-style addressing, which MinIO requires.
    pub fn new(config: &Config) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.s3_access_key.clone(),
            config.s3_secret_key.clone(),
            None,
            None,
            "environment",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .endpoint_url(&config.s3_endpoint)
            .region(aws_sdk_s3::config::Region::new(config.s3_region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);
        tracing::info!(endpoint = %config.s3_endpoint, bucket = %config.s3_bucket, "S3 client initialized");
        Self { client, bucket: config.s3_bucket.clone() }
    }
}

fn format_timestamp(dt: &aws_sdk_s3::primitives::DateTime) -> Option<String> {
    dt.fmt(aws_sdk_s3::primitives::DateTimeFormat::DateTime).ok()
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(
        &self,
        prefix: &str,
        include_folders: bool,
        max_items: usize,
    ) -> Result<ListResult, AppError> {
        let normalized = normalize_prefix(prefix);
        tracing::info!(
            bucket = %self.bucket,
            prefix = %normalized,
            include_folders,
            max_items,
            "listing objects"
        );

        let mut files: Vec<ObjectDescriptor> = Vec::new();
        let mut folders: BTreeSet<String> = BTreeSet::new();
        let mut truncated = false;

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&normalized)
            .into_paginator()
            .send();

        'pages: while let Some(page) = pages.next().await {
            let page = page.map_err(|e| AppError::Backend(e.to_string()))?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                if key.ends_with('/') {
                    // Zero-byte folder marker objects.
                    if include_folders {
                        folders.insert(key.to_string());
                    }
                    continue;
                }

                files.push(ObjectDescriptor {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj.last_modified().and_then(format_timestamp),
                    etag: obj.e_tag().map(|t| t.trim_matches('"').to_string()),
                    kind: ObjectKind::File,
                    is_folder: false,
                });

                if include_folders {
                    derive_parent_folders(key, &normalized, &mut folders);
                }

                if files.len() >= max_items {
                    truncated = true;
                    break 'pages;
                }
            }
        }

        let mut entries = files;
        if include_folders {
            entries.extend(folders.into_iter().map(folder_descriptor));
        }

        tracing::info!(entries = entries.len(), truncated, "listing complete");
        Ok(ListResult { entries, truncated })
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, AppError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_not_found() {
                    AppError::NotFound(format!("Object '{key}' not found"))
                } else {
                    AppError::Backend(service.to_string())
                }
            })?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response.last_modified().and_then(format_timestamp),
            etag: response.e_tag().map(|t| t.trim_matches('"').to_string()).unwrap_or_default(),
            content_type: response
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
        })
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<Bytes, AppError> {
        if start > end {
            return Err(AppError::Internal(format!("invalid range: {start}-{end}")));
        }
        let range = format!("bytes={start}-{end}");
        tracing::debug!(key = %key, range = %range, "range read");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(&range)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    AppError::NotFound(format!("Object '{key}' not found"))
                } else {
                    AppError::Backend(service.to_string())
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| AppError::Backend(e.to_string()))?
            .into_bytes();

        let expected = (end - start + 1) as usize;
        if data.len() != expected {
            return Err(AppError::Backend(format!(
                "range read returned {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (tests, local development)
// ---------------------------------------------------------------------------

/// In-memory object store. Keys map to byte blobs; etags are content hashes.
/// Call counters let tests assert how many HEAD/range requests an endpoint
/// actually issued.
#[derive(Default)]
pub struct MemoryStore {
    objects: std::sync::Mutex<std::collections::BTreeMap<String, Bytes>>,
    head_calls: std::sync::atomic::AtomicUsize,
    range_calls: std::sync::atomic::AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn etag_of(data: &[u8]) -> String {
        // FNV-1a; stable content hash is all an etag needs to be here.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in data {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("{hash:016x}")
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        include_folders: bool,
        max_items: usize,
    ) -> Result<ListResult, AppError> {
        let normalized = normalize_prefix(prefix);
        let objects = self.objects.lock().unwrap();

        let mut files = Vec::new();
        let mut folders = BTreeSet::new();
        let mut truncated = false;
        for (key, data) in objects.iter() {
            if !key.starts_with(&normalized) {
                continue;
            }
            files.push(ObjectDescriptor {
                key: key.clone(),
                size: data.len() as u64,
                last_modified: None,
                etag: Some(Self::etag_of(data)),
                kind: ObjectKind::File,
                is_folder: false,
            });
            if include_folders {
                derive_parent_folders(key, &normalized, &mut folders);
            }
            if files.len() >= max_items {
                truncated = true;
                break;
            }
        }

        let mut entries = files;
        if include_folders {
            entries.extend(folders.into_iter().map(folder_descriptor));
        }
        Ok(ListResult { entries, truncated })
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, AppError> {
        self.head_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| AppError::NotFound(format!("Object '{key}' not found")))?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: None,
            etag: Self::etag_of(data),
            content_type: "application/octet-stream".to_string(),
        })
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<Bytes, AppError> {
        self.range_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| AppError::NotFound(format!("Object '{key}' not found")))?;
        if start > end || end >= data.len() as u64 {
            return Err(AppError::Internal(format!(
                "invalid range {start}-{end} for object of {} bytes",
                data.len()
            )));
        }
        Ok(data.slice(start as usize..=end as usize))
    }
}
