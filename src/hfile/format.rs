//! On-disk structures of the H-file container format.
//!
//! An H-file is a self-describing tree: a fixed superblock points at the root
//! group node; group nodes name their children by absolute file offset;
//! dataset nodes carry dtype, dims, and either a contiguous extent or a chunk
//! index with a filter pipeline. All framing integers are little-endian;
//! element payloads follow the dtype's own endianness flag.
//!
//! Decoding is incremental-window friendly: every decoder returns
//! [`DecodeError::Incomplete`] when the buffer ends mid-structure, so callers
//! can fetch a larger window and retry.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

pub const MAGIC: [u8; 4] = *b"HFV1";
pub const FORMAT_VERSION: u16 = 1;
/// Fixed superblock size in bytes.
pub const SUPERBLOCK_LEN: u64 = 24;

pub const FILTER_GZIP: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_LZF: u16 = 32000;

const NODE_TAG_GROUP: u8 = 1;
const NODE_TAG_DATASET: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ended before the structure did; fetch more bytes and retry.
    #[error("incomplete buffer")]
    Incomplete,
    #[error("corrupt container: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            DecodeError::Incomplete
        } else {
            DecodeError::Corrupt(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Superblock
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct Superblock {
    pub root_offset: u64,
    pub file_len: u64,
}

impl Superblock {
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = buf;
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(DecodeError::Corrupt("bad magic".into()));
        }
        let version = r.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::Corrupt(format!("unsupported format version {version}")));
        }
        let _reserved = r.read_u16::<LittleEndian>()?;
        let root_offset = r.read_u64::<LittleEndian>()?;
        let file_len = r.read_u64::<LittleEndian>()?;
        Ok(Self { root_offset, file_len })
    }
}

// ---------------------------------------------------------------------------
// Dtype
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DtypeClass {
    Integer,
    Float,
    String,
    Boolean,
    Complex,
}

const DTYPE_FLAG_SIGNED: u8 = 0b0000_0001;
const DTYPE_FLAG_BIG_ENDIAN: u8 = 0b0000_0010;

/// Element type of a dataset. `size` is the element width in bytes (for
/// strings, the fixed field width).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dtype {
    pub class: DtypeClass,
    pub size: u8,
    pub signed: bool,
    pub big_endian: bool,
}

impl Dtype {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let class = match r.read_u8()? {
            0 => DtypeClass::Integer,
            1 => DtypeClass::Float,
            2 => DtypeClass::String,
            3 => DtypeClass::Boolean,
            4 => DtypeClass::Complex,
            other => return Err(DecodeError::Corrupt(format!("unknown dtype class {other}"))),
        };
        let size = r.read_u8()?;
        let flags = r.read_u8()?;
        let dtype = Dtype {
            class,
            size,
            signed: flags & DTYPE_FLAG_SIGNED != 0,
            big_endian: flags & DTYPE_FLAG_BIG_ENDIAN != 0,
        };
        dtype.validate()?;
        Ok(dtype)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let ok = match self.class {
            DtypeClass::Integer => matches!(self.size, 1 | 2 | 4 | 8),
            DtypeClass::Float => matches!(self.size, 4 | 8),
            DtypeClass::Boolean => self.size == 1,
            DtypeClass::Complex => matches!(self.size, 8 | 16),
            DtypeClass::String => self.size > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(DecodeError::Corrupt(format!("invalid dtype size {} for {:?}", self.size, self.class)))
        }
    }

    /// Element width in bytes.
    pub fn itemsize(&self) -> usize {
        self.size as usize
    }

    /// True for classes that participate in stats and plotting. Complex is
    /// detected but treated as non-numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self.class, DtypeClass::Integer | DtypeClass::Float | DtypeClass::Boolean)
    }

    /// numpy-style dtype string: `int32`, `uint8`, `float64`, `bool`,
    /// `|S16`, `complex128`.
    pub fn type_str(&self) -> String {
        match self.class {
            DtypeClass::Integer if self.signed => format!("int{}", self.size as usize * 8),
            DtypeClass::Integer => format!("uint{}", self.size as usize * 8),
            DtypeClass::Float => format!("float{}", self.size as usize * 8),
            DtypeClass::Boolean => "bool".to_string(),
            DtypeClass::String => format!("|S{}", self.size),
            DtypeClass::Complex => format!("complex{}", self.size as usize * 8),
        }
    }

    pub fn class_str(&self) -> &'static str {
        match self.class {
            DtypeClass::Integer => "Integer",
            DtypeClass::Float => "Float",
            DtypeClass::String => "String",
            DtypeClass::Boolean => "Boolean",
            DtypeClass::Complex => "Unknown",
        }
    }

    pub fn endianness_str(&self) -> &'static str {
        match self.class {
            // Single-byte and text payloads have no byte order.
            DtypeClass::String | DtypeClass::Boolean => "not-applicable",
            _ if self.size == 1 => "not-applicable",
            _ if self.big_endian => "big-endian",
            _ => "little-endian",
        }
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Decoded attribute value. `Unreadable` stands in for payloads whose tag the
/// reader does not understand; the surrounding node still parses.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    Unreadable,
}

fn decode_lenstr<R: Read>(r: &mut R) -> Result<String, DecodeError> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn decode_attrs<R: Read>(r: &mut R) -> Result<Vec<(String, AttrValue)>, DecodeError> {
    let count = r.read_u16::<LittleEndian>()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name = decode_lenstr(r)?;
        let tag = r.read_u8()?;
        let payload_len = r.read_u32::<LittleEndian>()? as usize;
        let mut payload = vec![0u8; payload_len];
        r.read_exact(&mut payload)?;
        let value = decode_attr_value(tag, &payload).unwrap_or_else(|| {
            tracing::warn!(attribute = %name, tag, "could not read attribute");
            AttrValue::Unreadable
        });
        attrs.push((name, value));
    }
    Ok(attrs)
}

fn decode_attr_value(tag: u8, payload: &[u8]) -> Option<AttrValue> {
    let mut r = payload;
    match tag {
        0 => r.read_i64::<LittleEndian>().ok().map(AttrValue::Int),
        1 => r.read_f64::<LittleEndian>().ok().map(AttrValue::Float),
        2 => Some(AttrValue::Str(String::from_utf8_lossy(payload).into_owned())),
        3 => {
            if payload.len() % 8 != 0 {
                return None;
            }
            let mut vals = Vec::with_capacity(payload.len() / 8);
            while let Ok(v) = r.read_i64::<LittleEndian>() {
                vals.push(v);
            }
            Some(AttrValue::IntArray(vals))
        }
        4 => {
            if payload.len() % 8 != 0 {
                return None;
            }
            let mut vals = Vec::with_capacity(payload.len() / 8);
            while let Ok(v) = r.read_f64::<LittleEndian>() {
                vals.push(v);
            }
            Some(AttrValue::FloatArray(vals))
        }
        5 => Some(AttrValue::Bytes(payload.to_vec())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// One entry in a dataset's filter pipeline, in write order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    pub id: u16,
    pub level: u8,
}

impl FilterSpec {
    pub fn name(&self) -> &'static str {
        match self.id {
            FILTER_GZIP => "gzip",
            FILTER_SHUFFLE => "shuffle",
            FILTER_FLETCHER32 => "fletcher32",
            FILTER_SZIP => "szip",
            FILTER_LZF => "lzf",
            _ => "unknown",
        }
    }

    pub fn is_compression(&self) -> bool {
        matches!(self.id, FILTER_GZIP | FILTER_SZIP | FILTER_LZF)
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
}

#[derive(Clone, Debug)]
pub struct GroupNode {
    pub attrs: Vec<(String, AttrValue)>,
    /// Child name → node offset, in file order.
    pub children: Vec<(String, u64)>,
}

#[derive(Clone, Debug)]
pub struct DatasetNode {
    pub attrs: Vec<(String, AttrValue)>,
    pub dtype: Dtype,
    pub dims: Vec<u64>,
    pub layout: Layout,
}

#[derive(Clone, Debug)]
pub enum Layout {
    Contiguous {
        offset: u64,
        nbytes: u64,
    },
    Chunked {
        chunk_dims: Vec<u32>,
        filters: Vec<FilterSpec>,
        /// Row-major over the chunk grid.
        chunks: Vec<ChunkRef>,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkRef {
    pub offset: u64,
    pub stored_len: u32,
}

impl DatasetNode {
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| *d as usize).collect()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product::<u64>() as usize
    }

    pub fn chunk_shape(&self) -> Option<Vec<usize>> {
        match &self.layout {
            Layout::Chunked { chunk_dims, .. } => {
                Some(chunk_dims.iter().map(|d| *d as usize).collect())
            }
            Layout::Contiguous { .. } => None,
        }
    }

    pub fn filters(&self) -> &[FilterSpec] {
        match &self.layout {
            Layout::Chunked { filters, .. } => filters,
            Layout::Contiguous { .. } => &[],
        }
    }

    /// Name of the compression filter, if the pipeline has one.
    pub fn compression(&self) -> Option<&'static str> {
        self.filters().iter().find(|f| f.is_compression()).map(|f| f.name())
    }

    /// Level of the compression filter, when meaningful (gzip only).
    pub fn compression_level(&self) -> Option<u8> {
        self.filters()
            .iter()
            .find(|f| f.id == FILTER_GZIP)
            .map(|f| f.level)
    }
}

impl Node {
    /// Decode one node from a buffer starting at the node's first byte.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = buf;
        let tag = r.read_u8()?;
        let attrs = decode_attrs(&mut r)?;
        match tag {
            NODE_TAG_GROUP => {
                let count = r.read_u32::<LittleEndian>()? as usize;
                let mut children = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = decode_lenstr(&mut r)?;
                    let offset = r.read_u64::<LittleEndian>()?;
                    children.push((name, offset));
                }
                Ok(Node::Group(GroupNode { attrs, children }))
            }
            NODE_TAG_DATASET => {
                let dtype = Dtype::decode(&mut r)?;
                let ndim = r.read_u8()? as usize;
                let mut dims = Vec::with_capacity(ndim);
                for _ in 0..ndim {
                    dims.push(r.read_u64::<LittleEndian>()?);
                }
                let layout = match r.read_u8()? {
                    0 => {
                        let offset = r.read_u64::<LittleEndian>()?;
                        let nbytes = r.read_u64::<LittleEndian>()?;
                        Layout::Contiguous { offset, nbytes }
                    }
                    1 => {
                        let mut chunk_dims = Vec::with_capacity(ndim);
                        for _ in 0..ndim {
                            chunk_dims.push(r.read_u32::<LittleEndian>()?);
                        }
                        if chunk_dims.iter().any(|d| *d == 0) {
                            return Err(DecodeError::Corrupt("zero-sized chunk dimension".into()));
                        }
                        let filter_count = r.read_u8()? as usize;
                        let mut filters = Vec::with_capacity(filter_count);
                        for _ in 0..filter_count {
                            let id = r.read_u16::<LittleEndian>()?;
                            let level = r.read_u8()?;
                            filters.push(FilterSpec { id, level });
                        }
                        let chunk_count = r.read_u32::<LittleEndian>()? as usize;
                        let mut chunks = Vec::with_capacity(chunk_count);
                        for _ in 0..chunk_count {
                            let offset = r.read_u64::<LittleEndian>()?;
                            let stored_len = r.read_u32::<LittleEndian>()?;
                            chunks.push(ChunkRef { offset, stored_len });
                        }
                        Layout::Chunked { chunk_dims, filters, chunks }
                    }
                    other => {
                        return Err(DecodeError::Corrupt(format!("unknown layout tag {other}")))
                    }
                };
                Ok(Node::Dataset(DatasetNode { attrs, dtype, dims, layout }))
            }
            other => Err(DecodeError::Corrupt(format!("unknown node tag {other}"))),
        }
    }
}
