//! Hard limits and shared application state.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::CacheRegistry;
use crate::store::ObjectStore;

// ---------------------------------------------------------------------------
// Element ceilings (enforced by the planner before any reads)
// ---------------------------------------------------------------------------

/// Absolute per-selection element ceiling.
pub const MAX_ELEMENTS: usize = 1_000_000;
/// Ceiling on the `data` field of any JSON payload.
pub const MAX_JSON_ELEMENTS: usize = 500_000;
/// Matrix window bounds after striding.
pub const MAX_MATRIX_ROWS: usize = 2000;
pub const MAX_MATRIX_COLS: usize = 2000;
/// Default line cap under overview quality.
pub const MAX_LINE_POINTS: usize = 5000;
/// Hard ceiling for exact line quality.
pub const MAX_LINE_EXACT_POINTS: usize = 20_000;
/// Per-axis heatmap ceiling for the /data endpoint.
pub const MAX_HEATMAP_SIZE: usize = 1024;

pub const DEFAULT_ROW_LIMIT: usize = 100;
pub const DEFAULT_COL_LIMIT: usize = 100;
pub const DEFAULT_MAX_SIZE: usize = 512;

// ---------------------------------------------------------------------------
// Preview limits (looser shapes, tighter sizes)
// ---------------------------------------------------------------------------

pub const MAX_PREVIEW_ELEMENTS: usize = 250_000;
/// Per-axis heatmap ceiling inside preview payloads.
pub const PREVIEW_HEATMAP_SIZE: usize = 512;
pub const MAX_HEATMAP_ELEMENTS: usize = 200_000;
pub const MIN_LINE_POINTS: usize = 2000;
pub const TABLE_1D_MAX: usize = 1000;
pub const TABLE_2D_MAX: usize = 200;
/// Upper bound on elements drawn for preview statistics.
pub const MAX_STATS_SAMPLE: usize = 100_000;

// ---------------------------------------------------------------------------
// Application state (explicit, constructed once at startup)
// ---------------------------------------------------------------------------

/// Axum application state: the object-store client, the cache registry, and
/// the start instant for uptime reporting. One instance per process; cloned
/// per request.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn ObjectStore>,
    pub caches: Arc<CacheRegistry>,
    pub start_time: Instant,
}

impl AppContext {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, caches: Arc::new(CacheRegistry::new()), start_time: Instant::now() }
    }
}
