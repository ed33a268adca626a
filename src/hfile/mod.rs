//! H-file handle (C3).
//!
//! Opens a group/dataset view over a remote object. Every access goes through
//! the object-store adapter's range reads; nothing is downloaded whole.
//! Handles are cheap and per-request: `open` fetches only the superblock, and
//! tree walks fetch exactly the nodes on the path.

pub mod format;
pub mod read;
pub mod value;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::AppError;
use crate::store::ObjectStore;
use format::{AttrValue, DatasetNode, DecodeError, Node, Superblock, SUPERBLOCK_LEN};
pub use read::Selector;
pub use value::{Array, Values};

/// Attribute cap for children listings.
const CHILD_ATTR_CAP: usize = 10;
/// Attribute cap for full metadata.
const META_ATTR_CAP: usize = 20;

/// Initial window for node fetches; grows when a node outruns it.
const NODE_WINDOW: u64 = 8192;

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// Lightweight dataset info, cached per object version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub shape: Vec<usize>,
    pub ndim: usize,
    pub dtype: String,
}

/// One entry of a children listing.
#[derive(Clone, Debug, Serialize)]
pub struct ChildNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_children: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndim: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_attributes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes_truncated: Option<bool>,
}

/// Dtype classification for the metadata payload.
#[derive(Clone, Debug, Serialize)]
pub struct TypeInfo {
    pub class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed: Option<bool>,
    pub endianness: &'static str,
    /// Element width in bits.
    pub size: usize,
}

/// One filter pipeline entry, in file order.
#[derive(Clone, Debug, Serialize)]
pub struct FilterInfo {
    pub name: &'static str,
    pub id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AttrEntry {
    pub name: String,
    pub value: JsonValue,
}

/// Full metadata for a single tree node.
#[derive(Clone, Debug, Serialize)]
pub struct NodeMetadata {
    pub name: String,
    pub path: String,
    pub kind: &'static str,
    pub attributes: Vec<AttrEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_children: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndim: Option<usize>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_info: Option<TypeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FilterInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_opts: Option<u8>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct HFile {
    store: Arc<dyn ObjectStore>,
    key: String,
    superblock: Superblock,
}

impl HFile {
    /// Open an object as an H-file. Fetches only the superblock.
    pub async fn open(store: Arc<dyn ObjectStore>, key: &str) -> Result<Self, AppError> {
        let header = store.read_range(key, 0, SUPERBLOCK_LEN - 1).await?;
        let superblock = Superblock::decode(&header).map_err(|e| corrupt(key, e))?;
        Ok(Self { store, key: key.to_string(), superblock })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetch and decode the node at `offset`, growing the read window until
    /// the node fits.
    async fn fetch_node(&self, offset: u64) -> Result<Node, AppError> {
        let file_len = self.superblock.file_len;
        if offset >= file_len {
            return Err(AppError::Internal(format!(
                "node offset {offset} beyond end of '{}'",
                self.key
            )));
        }
        let mut window = NODE_WINDOW.min(file_len - offset);
        loop {
            let buf = self.store.read_range(&self.key, offset, offset + window - 1).await?;
            match Node::decode(&buf) {
                Ok(node) => return Ok(node),
                Err(DecodeError::Incomplete) if offset + window < file_len => {
                    window = (window * 4).min(file_len - offset);
                }
                Err(e) => return Err(corrupt(&self.key, e)),
            }
        }
    }

    /// Walk the tree to `path`. `Ok(None)` when any segment is missing or the
    /// walk crosses a dataset.
    async fn resolve(&self, path: &str) -> Result<Option<Node>, AppError> {
        let mut node = self.fetch_node(self.superblock.root_offset).await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let Node::Group(ref group) = node else {
                return Ok(None);
            };
            let Some((_, offset)) = group.children.iter().find(|(name, _)| name == segment)
            else {
                return Ok(None);
            };
            node = self.fetch_node(*offset).await?;
        }
        Ok(Some(node))
    }

    /// Children at one tree level. Missing paths (and dataset paths) yield an
    /// empty list rather than an error; lazy tree navigation relies on that.
    pub async fn children(&self, path: &str) -> Result<Vec<ChildNode>, AppError> {
        let Some(Node::Group(group)) = self.resolve(path).await? else {
            tracing::warn!(key = %self.key, path = %path, "no group at children path");
            return Ok(Vec::new());
        };

        let mut children = Vec::with_capacity(group.children.len());
        for (name, offset) in &group.children {
            let child_path = join_path(path, name);
            let child = match self.fetch_node(*offset).await? {
                Node::Group(g) => ChildNode {
                    name: name.clone(),
                    path: child_path,
                    kind: "group",
                    num_children: Some(g.children.len()),
                    shape: None,
                    dtype: None,
                    size: None,
                    ndim: None,
                    chunks: None,
                    compression: None,
                    attributes: None,
                    num_attributes: None,
                    attributes_truncated: None,
                },
                Node::Dataset(d) => {
                    let (attributes, num_attributes, truncated) =
                        attr_snapshot(&d.attrs, CHILD_ATTR_CAP);
                    ChildNode {
                        name: name.clone(),
                        path: child_path,
                        kind: "dataset",
                        num_children: None,
                        shape: Some(d.shape()),
                        dtype: Some(d.dtype.type_str()),
                        size: Some(d.element_count()),
                        ndim: Some(d.ndim()),
                        chunks: d.chunk_shape(),
                        compression: d.compression().map(str::to_string),
                        attributes,
                        num_attributes,
                        attributes_truncated: truncated,
                    }
                }
            };
            children.push(child);
        }
        tracing::info!(key = %self.key, path = %path, count = children.len(), "listed children");
        Ok(children)
    }

    /// Full metadata for a node, filter pipeline included.
    pub async fn metadata(&self, path: &str) -> Result<NodeMetadata, AppError> {
        let node = self
            .resolve(path)
            .await?
            .ok_or_else(|| self.path_not_found(path))?;

        let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string();
        let attributes = |attrs: &[(String, AttrValue)]| {
            attrs
                .iter()
                .take(META_ATTR_CAP)
                .map(|(n, v)| AttrEntry { name: n.clone(), value: attr_to_json(v) })
                .collect::<Vec<_>>()
        };

        Ok(match node {
            Node::Group(group) => NodeMetadata {
                name,
                path: path.to_string(),
                kind: "group",
                attributes: attributes(&group.attrs),
                num_children: Some(group.children.len()),
                shape: None,
                dtype: None,
                size: None,
                ndim: None,
                type_info: None,
                filters: None,
                chunks: None,
                compression: None,
                compression_opts: None,
            },
            Node::Dataset(d) => NodeMetadata {
                name,
                path: path.to_string(),
                kind: "dataset",
                attributes: attributes(&d.attrs),
                num_children: None,
                shape: Some(d.shape()),
                dtype: Some(d.dtype.type_str()),
                size: Some(d.element_count()),
                ndim: Some(d.ndim()),
                type_info: Some(TypeInfo {
                    class: d.dtype.class_str(),
                    signed: (d.dtype.class == format::DtypeClass::Integer)
                        .then_some(d.dtype.signed),
                    endianness: d.dtype.endianness_str(),
                    size: d.dtype.itemsize() * 8,
                }),
                filters: Some(
                    d.filters()
                        .iter()
                        .map(|f| FilterInfo {
                            name: f.name(),
                            id: f.id,
                            level: (f.id == format::FILTER_GZIP).then_some(f.level),
                        })
                        .collect(),
                ),
                chunks: d.chunk_shape(),
                compression: d.compression().map(str::to_string),
                compression_opts: d.compression_level(),
            },
        })
    }

    /// Shape/ndim/dtype for a dataset path. `Kind` error for groups.
    pub async fn dataset_info(&self, path: &str) -> Result<DatasetInfo, AppError> {
        let node = self.dataset(path).await?;
        Ok(DatasetInfo {
            shape: node.shape(),
            ndim: node.ndim(),
            dtype: node.dtype.type_str(),
        })
    }

    /// Resolve a path that must be a dataset.
    pub async fn dataset(&self, path: &str) -> Result<DatasetNode, AppError> {
        match self.resolve(path).await? {
            None => Err(self.path_not_found(path)),
            Some(Node::Group(_)) => {
                Err(AppError::Kind(format!("Path '{path}' is not a dataset")))
            }
            Some(Node::Dataset(d)) => Ok(d),
        }
    }

    /// Execute a strided selection against a dataset node.
    pub async fn read(
        &self,
        node: &DatasetNode,
        selectors: &[Selector],
    ) -> Result<Array, AppError> {
        read::read_selection(self.store.as_ref(), &self.key, node, selectors).await
    }

    fn path_not_found(&self, path: &str) -> AppError {
        AppError::NotFound(format!("Path '{path}' not found in '{}'", self.key))
    }
}

fn corrupt(key: &str, err: DecodeError) -> AppError {
    AppError::Internal(format!("'{key}' is not a readable H-file: {err}"))
}

fn join_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Bounded attribute snapshot for children listings: `(attributes,
/// num_attributes, truncated)`, all `None` when the node has no attributes.
fn attr_snapshot(
    attrs: &[(String, AttrValue)],
    cap: usize,
) -> (Option<serde_json::Map<String, JsonValue>>, Option<usize>, Option<bool>) {
    if attrs.is_empty() {
        return (None, None, None);
    }
    let mut map = serde_json::Map::new();
    for (name, value) in attrs.iter().take(cap) {
        map.insert(name.clone(), attr_to_json(value));
    }
    let truncated = attrs.len() > cap;
    (Some(map), Some(attrs.len()), truncated.then_some(true))
}

/// JSON-safe attribute conversion: bytes decode as UTF-8 (errors ignored),
/// arrays become lists, non-finite floats become null, unreadable payloads
/// become the `<unreadable>` marker.
fn attr_to_json(value: &AttrValue) -> JsonValue {
    match value {
        AttrValue::Int(v) => JsonValue::from(*v),
        AttrValue::Float(v) => crate::sanitize::safe_number(*v),
        AttrValue::Str(s) => JsonValue::from(s.clone()),
        AttrValue::Bytes(b) => JsonValue::from(String::from_utf8_lossy(b).into_owned()),
        AttrValue::IntArray(vs) => JsonValue::from(vs.clone()),
        AttrValue::FloatArray(vs) => {
            JsonValue::Array(vs.iter().map(|v| crate::sanitize::safe_number(*v)).collect())
        }
        AttrValue::Unreadable => JsonValue::from("<unreadable>"),
    }
}
