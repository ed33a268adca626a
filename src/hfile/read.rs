//! Strided selection execution against a remote object.
//!
//! A selection is one selector per dataset axis: a scalar index (axis
//! collapses) or a half-open stride. Execution turns the selection into a
//! bounded set of byte ranges: contiguous layouts coalesce nearby element
//! runs into few Range GETs; chunked layouts fetch each intersecting chunk
//! exactly once and run its filter pipeline in reverse.

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::io::Read;

use super::format::{
    DatasetNode, Dtype, DtypeClass, FilterSpec, Layout, FILTER_FLETCHER32, FILTER_GZIP,
    FILTER_SHUFFLE,
};
use super::value::{Array, Values};
use crate::error::AppError;
use crate::store::ObjectStore;

/// Two element runs closer than this many bytes are fetched as one range.
const COALESCE_GAP: u64 = 4096;

/// Per-axis selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Scalar index; the axis collapses out of the result.
    Index(usize),
    /// Half-open `[start, stop)` with a positive step.
    Slice { start: usize, stop: usize, step: usize },
}

impl Selector {
    /// Output length along this axis; `None` for collapsed axes.
    pub fn out_len(&self) -> Option<usize> {
        match self {
            Selector::Index(_) => None,
            Selector::Slice { start, stop, step } => {
                Some(if stop > start { (stop - start).div_ceil(*step) } else { 0 })
            }
        }
    }
}

/// Execute a selection and decode the result into typed storage.
pub async fn read_selection(
    store: &dyn ObjectStore,
    key: &str,
    node: &DatasetNode,
    selectors: &[Selector],
) -> Result<Array, AppError> {
    let dims = node.shape();
    if selectors.len() != dims.len() {
        return Err(AppError::Internal(format!(
            "selection rank {} does not match dataset rank {}",
            selectors.len(),
            dims.len()
        )));
    }
    for (axis, (sel, &dim)) in selectors.iter().zip(&dims).enumerate() {
        match sel {
            Selector::Index(i) => {
                if *i >= dim && dim > 0 {
                    return Err(AppError::Internal(format!(
                        "index {i} out of bounds for axis {axis} of size {dim}"
                    )));
                }
            }
            Selector::Slice { start, stop, step } => {
                if *step == 0 || start > stop || *stop > dim {
                    return Err(AppError::Internal(format!(
                        "invalid slice {start}..{stop} step {step} for axis {axis} of size {dim}"
                    )));
                }
            }
        }
    }

    let out_shape: Vec<usize> = selectors.iter().filter_map(Selector::out_len).collect();
    let total: usize = out_shape.iter().product();
    // Empty selections (or index selectors on empty axes) read nothing.
    let degenerate = total == 0 || selectors.iter().zip(&dims).any(|(sel, &dim)| {
        dim == 0 && matches!(sel, Selector::Index(_))
    });
    if degenerate {
        return Ok(Array { shape: out_shape, values: new_builder(&node.dtype, 0) });
    }

    let mut builder = new_builder(&node.dtype, total);
    match &node.layout {
        Layout::Contiguous { offset, nbytes } => {
            read_contiguous(store, key, node, selectors, &dims, total, *offset, *nbytes, &mut builder)
                .await?;
        }
        Layout::Chunked { .. } => {
            read_chunked(store, key, node, selectors, &dims, total, &mut builder).await?;
        }
    }

    Ok(Array { shape: out_shape, values: builder })
}

// ---------------------------------------------------------------------------
// Source coordinate iteration
// ---------------------------------------------------------------------------

/// Row-major odometer over the output grid, yielding per-axis source
/// coordinates for every output element.
struct CoordIter<'a> {
    selectors: &'a [Selector],
    out_dims: Vec<usize>,
    counters: Vec<usize>,
    coords: Vec<usize>,
    done: bool,
}

impl<'a> CoordIter<'a> {
    fn new(selectors: &'a [Selector]) -> Self {
        let out_dims: Vec<usize> = selectors.iter().filter_map(Selector::out_len).collect();
        let coords = selectors
            .iter()
            .map(|sel| match sel {
                Selector::Index(i) => *i,
                Selector::Slice { start, .. } => *start,
            })
            .collect();
        Self {
            selectors,
            counters: vec![0; out_dims.len()],
            out_dims,
            coords,
            done: false,
        }
    }

    fn advance(&mut self) {
        // Increment the innermost output counter, carrying outward; refresh
        // the per-axis source coordinates for the slice axes that moved.
        let mut pos = self.counters.len();
        loop {
            if pos == 0 {
                self.done = true;
                return;
            }
            pos -= 1;
            self.counters[pos] += 1;
            if self.counters[pos] < self.out_dims[pos] {
                break;
            }
            self.counters[pos] = 0;
        }
        let mut out_axis = 0;
        for (axis, sel) in self.selectors.iter().enumerate() {
            if let Selector::Slice { start, step, .. } = sel {
                self.coords[axis] = start + self.counters[out_axis] * step;
                out_axis += 1;
            }
        }
    }
}

fn element_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1].max(1);
    }
    strides
}

// ---------------------------------------------------------------------------
// Contiguous layout
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn read_contiguous(
    store: &dyn ObjectStore,
    key: &str,
    node: &DatasetNode,
    selectors: &[Selector],
    dims: &[usize],
    total: usize,
    data_offset: u64,
    nbytes: u64,
    builder: &mut Values,
) -> Result<(), AppError> {
    let itemsize = node.dtype.itemsize() as u64;
    let strides = element_strides(dims);

    let mut offsets = Vec::with_capacity(total);
    let mut iter = CoordIter::new(selectors);
    while !iter.done {
        let linear: usize =
            iter.coords.iter().zip(&strides).map(|(c, s)| c * s).sum();
        let offset = data_offset + linear as u64 * itemsize;
        if offset + itemsize > data_offset + nbytes {
            return Err(AppError::Internal("selection exceeds dataset extent".into()));
        }
        offsets.push(offset);
        iter.advance();
    }

    // Offsets are ascending by construction; merge nearby runs.
    let mut ranges: Vec<(u64, u64)> = Vec::new();
    for &offset in &offsets {
        let end = offset + itemsize - 1;
        match ranges.last_mut() {
            Some((_, last_end)) if offset <= *last_end + 1 + COALESCE_GAP => {
                *last_end = (*last_end).max(end);
            }
            _ => ranges.push((offset, end)),
        }
    }

    let mut blocks: Vec<(u64, Bytes)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        blocks.push((start, store.read_range(key, start, end).await?));
    }

    let mut block_idx = 0usize;
    for offset in offsets {
        while offset >= blocks[block_idx].0 + blocks[block_idx].1.len() as u64 {
            block_idx += 1;
        }
        let (block_start, data) = &blocks[block_idx];
        let at = (offset - block_start) as usize;
        push_element(builder, &node.dtype, &data[at..at + itemsize as usize]);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Chunked layout
// ---------------------------------------------------------------------------

async fn read_chunked(
    store: &dyn ObjectStore,
    key: &str,
    node: &DatasetNode,
    selectors: &[Selector],
    dims: &[usize],
    _total: usize,
    builder: &mut Values,
) -> Result<(), AppError> {
    let Layout::Chunked { chunk_dims, filters, chunks } = &node.layout else {
        unreachable!("read_chunked called on contiguous layout");
    };
    let chunk_dims: Vec<usize> = chunk_dims.iter().map(|d| *d as usize).collect();
    let itemsize = node.dtype.itemsize();
    let chunk_elems: usize = chunk_dims.iter().product();
    let raw_chunk_len = chunk_elems * itemsize;

    let grid_dims: Vec<usize> =
        dims.iter().zip(&chunk_dims).map(|(d, c)| d.div_ceil(*c).max(1)).collect();
    let grid_strides = element_strides(&grid_dims);
    let within_strides = element_strides(&chunk_dims);

    let mut decoded: HashMap<usize, Vec<u8>> = HashMap::new();
    let mut iter = CoordIter::new(selectors);
    while !iter.done {
        let mut grid_linear = 0usize;
        let mut within_linear = 0usize;
        for (axis, &coord) in iter.coords.iter().enumerate() {
            grid_linear += (coord / chunk_dims[axis]) * grid_strides[axis];
            within_linear += (coord % chunk_dims[axis]) * within_strides[axis];
        }

        if !decoded.contains_key(&grid_linear) {
            let chunk_ref = chunks.get(grid_linear).ok_or_else(|| {
                AppError::Internal(format!("chunk {grid_linear} missing from chunk index"))
            })?;
            let raw = store
                .read_range(
                    key,
                    chunk_ref.offset,
                    chunk_ref.offset + u64::from(chunk_ref.stored_len) - 1,
                )
                .await?;
            let bytes = decode_chunk(&raw, filters, itemsize, raw_chunk_len)?;
            decoded.insert(grid_linear, bytes);
        }

        let chunk = &decoded[&grid_linear];
        let at = within_linear * itemsize;
        push_element(builder, &node.dtype, &chunk[at..at + itemsize]);
        iter.advance();
    }
    Ok(())
}

/// Run the filter pipeline in reverse over a stored chunk.
pub fn decode_chunk(
    raw: &[u8],
    filters: &[FilterSpec],
    itemsize: usize,
    expected_len: usize,
) -> Result<Vec<u8>, AppError> {
    let mut data = raw.to_vec();
    for filter in filters.iter().rev() {
        data = match filter.id {
            FILTER_FLETCHER32 => {
                if data.len() < 4 {
                    return Err(AppError::Internal("fletcher32 block too short".into()));
                }
                let (payload, tail) = data.split_at(data.len() - 4);
                let stored = u32::from_le_bytes(tail.try_into().unwrap());
                let computed = fletcher32(payload);
                if stored != computed {
                    return Err(AppError::Internal(format!(
                        "fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
                    )));
                }
                payload.to_vec()
            }
            FILTER_GZIP => {
                let mut out = Vec::with_capacity(expected_len);
                ZlibDecoder::new(&data[..])
                    .read_to_end(&mut out)
                    .map_err(|e| AppError::Internal(format!("gzip filter failed: {e}")))?;
                out
            }
            FILTER_SHUFFLE => unshuffle(&data, itemsize)?,
            other => {
                return Err(AppError::Internal(format!(
                    "filter '{}' (id {other}) is not supported for reads",
                    filter.name()
                )))
            }
        };
    }
    if data.len() != expected_len {
        return Err(AppError::Internal(format!(
            "chunk decoded to {} bytes, expected {expected_len}",
            data.len()
        )));
    }
    Ok(data)
}

/// Reverse the byte shuffle: stored data groups byte 0 of every element,
/// then byte 1, and so on.
fn unshuffle(data: &[u8], itemsize: usize) -> Result<Vec<u8>, AppError> {
    if itemsize <= 1 {
        return Ok(data.to_vec());
    }
    if data.len() % itemsize != 0 {
        return Err(AppError::Internal("shuffle block not a multiple of item size".into()));
    }
    let n = data.len() / itemsize;
    let mut out = vec![0u8; data.len()];
    for byte in 0..itemsize {
        for elem in 0..n {
            out[elem * itemsize + byte] = data[byte * n + elem];
        }
    }
    Ok(out)
}

/// Fletcher-32 over little-endian 16-bit words, odd trailing byte included
/// as-is.
pub fn fletcher32(data: &[u8]) -> u32 {
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
// Element decoding
// ---------------------------------------------------------------------------

fn new_builder(dtype: &Dtype, capacity: usize) -> Values {
    match dtype.class {
        DtypeClass::Integer if dtype.signed => Values::Int(Vec::with_capacity(capacity)),
        DtypeClass::Integer => Values::UInt(Vec::with_capacity(capacity)),
        DtypeClass::Float => Values::Float(Vec::with_capacity(capacity)),
        DtypeClass::Boolean => Values::Bool(Vec::with_capacity(capacity)),
        DtypeClass::String => Values::Text(Vec::with_capacity(capacity)),
        DtypeClass::Complex => Values::Complex(Vec::with_capacity(capacity)),
    }
}

fn push_element(builder: &mut Values, dtype: &Dtype, bytes: &[u8]) {
    match builder {
        Values::Int(v) => v.push(read_signed(bytes, dtype.big_endian)),
        Values::UInt(v) => v.push(read_unsigned(bytes, dtype.big_endian)),
        Values::Float(v) => v.push(read_float(bytes, dtype.big_endian)),
        Values::Bool(v) => v.push(bytes[0] != 0),
        Values::Text(v) => {
            v.push(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
        }
        Values::Complex(v) => v.push(read_complex(bytes, dtype.big_endian)),
    }
}

fn read_signed(bytes: &[u8], big: bool) -> i64 {
    match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => {
            let raw: [u8; 2] = bytes.try_into().unwrap();
            if big { i16::from_be_bytes(raw) as i64 } else { i16::from_le_bytes(raw) as i64 }
        }
        4 => {
            let raw: [u8; 4] = bytes.try_into().unwrap();
            if big { i32::from_be_bytes(raw) as i64 } else { i32::from_le_bytes(raw) as i64 }
        }
        _ => {
            let raw: [u8; 8] = bytes.try_into().unwrap();
            if big { i64::from_be_bytes(raw) } else { i64::from_le_bytes(raw) }
        }
    }
}

fn read_unsigned(bytes: &[u8], big: bool) -> u64 {
    match bytes.len() {
        1 => u64::from(bytes[0]),
        2 => {
            let raw: [u8; 2] = bytes.try_into().unwrap();
            u64::from(if big { u16::from_be_bytes(raw) } else { u16::from_le_bytes(raw) })
        }
        4 => {
            let raw: [u8; 4] = bytes.try_into().unwrap();
            u64::from(if big { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) })
        }
        _ => {
            let raw: [u8; 8] = bytes.try_into().unwrap();
            if big { u64::from_be_bytes(raw) } else { u64::from_le_bytes(raw) }
        }
    }
}

fn read_float(bytes: &[u8], big: bool) -> f64 {
    match bytes.len() {
        4 => {
            let raw: [u8; 4] = bytes.try_into().unwrap();
            f64::from(if big { f32::from_be_bytes(raw) } else { f32::from_le_bytes(raw) })
        }
        _ => {
            let raw: [u8; 8] = bytes.try_into().unwrap();
            if big { f64::from_be_bytes(raw) } else { f64::from_le_bytes(raw) }
        }
    }
}

fn read_complex(bytes: &[u8], big: bool) -> (f64, f64) {
    let half = bytes.len() / 2;
    (read_float(&bytes[..half], big), read_float(&bytes[half..], big))
}
