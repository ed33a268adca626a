//! Test-side H-file writer: the encoding mirror of the reader in
//! `src/hfile/format.rs`. Builds complete container images in memory for the
//! in-memory object store.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

pub const CLASS_INTEGER: u8 = 0;
pub const CLASS_FLOAT: u8 = 1;
pub const CLASS_STRING: u8 = 2;
pub const CLASS_BOOLEAN: u8 = 3;
pub const CLASS_COMPLEX: u8 = 4;

pub const FLAG_SIGNED: u8 = 0b01;
pub const FLAG_BIG_ENDIAN: u8 = 0b10;

pub const FILTER_GZIP: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// `(class, itemsize, flags)`.
pub type DtypeSpec = (u8, u8, u8);

pub const DT_F64: DtypeSpec = (CLASS_FLOAT, 8, 0);
pub const DT_F32: DtypeSpec = (CLASS_FLOAT, 4, 0);
pub const DT_I32: DtypeSpec = (CLASS_INTEGER, 4, FLAG_SIGNED);
pub const DT_U8: DtypeSpec = (CLASS_INTEGER, 1, 0);
pub const DT_BOOL: DtypeSpec = (CLASS_BOOLEAN, 1, 0);
pub const DT_C128: DtypeSpec = (CLASS_COMPLEX, 16, 0);

/// Attribute payloads the builder can encode. `Unknown` writes a tag the
/// reader does not understand, for `<unreadable>` coverage.
pub enum Attr<'a> {
    Int(i64),
    Float(f64),
    Str(&'a str),
    Bytes(&'a [u8]),
    IntArray(&'a [i64]),
    FloatArray(&'a [f64]),
    Unknown,
}

pub struct HFileBuilder {
    buf: Vec<u8>,
}

impl HFileBuilder {
    pub fn new() -> Self {
        // Superblock patched in finish().
        Self { buf: vec![0u8; 24] }
    }

    fn offset(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Append a raw blob (dataset payload), returning its offset.
    pub fn blob(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.offset();
        self.buf.extend_from_slice(bytes);
        offset
    }

    fn write_lenstr(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u16).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    fn write_attrs(out: &mut Vec<u8>, attrs: &[(&str, Attr)]) {
        out.extend_from_slice(&(attrs.len() as u16).to_le_bytes());
        for (name, value) in attrs {
            Self::write_lenstr(out, name);
            let (tag, payload): (u8, Vec<u8>) = match value {
                Attr::Int(v) => (0, v.to_le_bytes().to_vec()),
                Attr::Float(v) => (1, v.to_le_bytes().to_vec()),
                Attr::Str(s) => (2, s.as_bytes().to_vec()),
                Attr::IntArray(vs) => {
                    (3, vs.iter().flat_map(|v| v.to_le_bytes()).collect())
                }
                Attr::FloatArray(vs) => {
                    (4, vs.iter().flat_map(|v| v.to_le_bytes()).collect())
                }
                Attr::Bytes(b) => (5, b.to_vec()),
                Attr::Unknown => (99, b"???".to_vec()),
            };
            out.push(tag);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&payload);
        }
    }

    /// Write a group node, returning its offset.
    pub fn group(&mut self, attrs: &[(&str, Attr)], children: &[(&str, u64)]) -> u64 {
        let offset = self.offset();
        let mut node = vec![1u8];
        Self::write_attrs(&mut node, attrs);
        node.extend_from_slice(&(children.len() as u32).to_le_bytes());
        for (name, child_offset) in children {
            Self::write_lenstr(&mut node, name);
            node.extend_from_slice(&child_offset.to_le_bytes());
        }
        self.buf.extend_from_slice(&node);
        offset
    }

    /// Write element bytes and a contiguous dataset node pointing at them.
    pub fn contiguous_dataset(
        &mut self,
        dtype: DtypeSpec,
        dims: &[u64],
        elements: &[u8],
        attrs: &[(&str, Attr)],
    ) -> u64 {
        let data_offset = self.blob(elements);
        let offset = self.offset();
        let mut node = vec![2u8];
        Self::write_attrs(&mut node, attrs);
        node.push(dtype.0);
        node.push(dtype.1);
        node.push(dtype.2);
        node.push(dims.len() as u8);
        for dim in dims {
            node.extend_from_slice(&dim.to_le_bytes());
        }
        node.push(0u8); // contiguous
        node.extend_from_slice(&data_offset.to_le_bytes());
        node.extend_from_slice(&(elements.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(&node);
        offset
    }

    /// Split a row-major array into chunks, run the forward filter pipeline
    /// over each, and write the chunk blobs plus the dataset node.
    pub fn chunked_dataset(
        &mut self,
        dtype: DtypeSpec,
        dims: &[u64],
        chunk_dims: &[u32],
        filters: &[(u16, u8)],
        elements: &[u8],
        attrs: &[(&str, Attr)],
    ) -> u64 {
        let itemsize = dtype.1 as usize;
        let dims_us: Vec<usize> = dims.iter().map(|d| *d as usize).collect();
        let chunk_us: Vec<usize> = chunk_dims.iter().map(|d| *d as usize).collect();
        let grid: Vec<usize> =
            dims_us.iter().zip(&chunk_us).map(|(d, c)| d.div_ceil(*c).max(1)).collect();
        let grid_total: usize = grid.iter().product();

        let mut chunk_refs = Vec::with_capacity(grid_total);
        for grid_linear in 0..grid_total {
            let grid_coord = decompose(grid_linear, &grid);
            let plain = extract_chunk(elements, &dims_us, &chunk_us, &grid_coord, itemsize);
            let stored = apply_filters(&plain, filters, itemsize);
            let chunk_offset = self.blob(&stored);
            chunk_refs.push((chunk_offset, stored.len() as u32));
        }

        let offset = self.offset();
        let mut node = vec![2u8];
        Self::write_attrs(&mut node, attrs);
        node.push(dtype.0);
        node.push(dtype.1);
        node.push(dtype.2);
        node.push(dims.len() as u8);
        for dim in dims {
            node.extend_from_slice(&dim.to_le_bytes());
        }
        node.push(1u8); // chunked
        for chunk_dim in chunk_dims {
            node.extend_from_slice(&chunk_dim.to_le_bytes());
        }
        node.push(filters.len() as u8);
        for (id, level) in filters {
            node.extend_from_slice(&id.to_le_bytes());
            node.push(*level);
        }
        node.extend_from_slice(&(chunk_refs.len() as u32).to_le_bytes());
        for (chunk_offset, stored_len) in chunk_refs {
            node.extend_from_slice(&chunk_offset.to_le_bytes());
            node.extend_from_slice(&stored_len.to_le_bytes());
        }
        self.buf.extend_from_slice(&node);
        offset
    }

    /// Patch the superblock and return the finished image.
    pub fn finish(mut self, root_offset: u64) -> Vec<u8> {
        let file_len = self.buf.len() as u64;
        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(b"HFV1");
        header.extend_from_slice(&1u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&root_offset.to_le_bytes());
        header.extend_from_slice(&file_len.to_le_bytes());
        self.buf[..24].copy_from_slice(&header);
        self.buf
    }
}

fn decompose(mut linear: usize, dims: &[usize]) -> Vec<usize> {
    let mut coord = vec![0usize; dims.len()];
    for axis in (0..dims.len()).rev() {
        coord[axis] = linear % dims[axis];
        linear /= dims[axis];
    }
    coord
}

/// Copy one chunk out of a row-major array, zero-padding past the edges.
fn extract_chunk(
    elements: &[u8],
    dims: &[usize],
    chunk_dims: &[usize],
    grid_coord: &[usize],
    itemsize: usize,
) -> Vec<u8> {
    let chunk_total: usize = chunk_dims.iter().product();
    let strides = {
        let mut strides = vec![1usize; dims.len()];
        for axis in (0..dims.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * dims[axis + 1].max(1);
        }
        strides
    };

    let mut out = vec![0u8; chunk_total * itemsize];
    for within_linear in 0..chunk_total {
        let within = decompose(within_linear, chunk_dims);
        let mut in_bounds = true;
        let mut src_linear = 0usize;
        for axis in 0..dims.len() {
            let coord = grid_coord[axis] * chunk_dims[axis] + within[axis];
            if coord >= dims[axis] {
                in_bounds = false;
                break;
            }
            src_linear += coord * strides[axis];
        }
        if in_bounds {
            let src = src_linear * itemsize;
            let dst = within_linear * itemsize;
            out[dst..dst + itemsize].copy_from_slice(&elements[src..src + itemsize]);
        }
    }
    out
}

/// Forward filter pipeline, in file order.
fn apply_filters(plain: &[u8], filters: &[(u16, u8)], itemsize: usize) -> Vec<u8> {
    let mut data = plain.to_vec();
    for (id, level) in filters {
        data = match *id {
            FILTER_SHUFFLE => {
                if itemsize <= 1 {
                    data
                } else {
                    let n = data.len() / itemsize;
                    let mut out = vec![0u8; data.len()];
                    for byte in 0..itemsize {
                        for elem in 0..n {
                            out[byte * n + elem] = data[elem * itemsize + byte];
                        }
                    }
                    out
                }
            }
            FILTER_GZIP => {
                let mut encoder =
                    ZlibEncoder::new(Vec::new(), Compression::new(u32::from(*level)));
                encoder.write_all(&data).unwrap();
                encoder.finish().unwrap()
            }
            FILTER_FLETCHER32 => {
                let checksum = fletcher32(&data);
                data.extend_from_slice(&checksum.to_le_bytes());
                data
            }
            other => panic!("builder does not implement filter {other}"),
        };
    }
    data
}

fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum1 = (sum1 + u32::from(u16::from_le_bytes([w[0], w[1]]))) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    if let [b] = words.remainder() {
        sum1 = (sum1 + u32::from(*b)) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    (sum2 << 16) | sum1
}

// ---------------------------------------------------------------------------
// Element encoding helpers
// ---------------------------------------------------------------------------

pub fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn complex128_bytes(values: &[(f64, f64)]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|(re, im)| {
            re.to_le_bytes().into_iter().chain(im.to_le_bytes())
        })
        .collect()
}

/// Fixed-width byte strings, NUL padded.
pub fn fixed_str_bytes(values: &[&str], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * width);
    for v in values {
        let bytes = v.as_bytes();
        assert!(bytes.len() <= width, "string wider than field");
        out.extend_from_slice(bytes);
        out.extend(std::iter::repeat(0u8).take(width - bytes.len()));
    }
    out
}
