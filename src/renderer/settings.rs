//! Render System Settings
//!
//! Tunables of the frame pipeline. Everything here has a sensible default,
//! so most applications only override single fields:
//!
//! ```rust,ignore
//! use prism::renderer::{DrawDispatch, RenderSystemSettings};
//!
//! let settings = RenderSystemSettings {
//!     dispatch: DrawDispatch::Immediate,
//!     ..Default::default()
//! };
//! ```
//!
//! Settings are serializable so tools can persist them next to the rest of
//! the graphics configuration.

use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DrawDispatch
// ---------------------------------------------------------------------------

/// How the draw phase distributes render nodes over command lists.
///
/// | Mode        | Behaviour                                              |
/// |-------------|--------------------------------------------------------|
/// | `Auto`      | Deferred when the backend supports it, else immediate  |
/// | `Immediate` | Everything on the caller's command list                |
/// | `Deferred`  | Parallel batches on per-thread command lists           |
///
/// `Deferred` falls back to immediate recording on backends without
/// deferred command-list support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawDispatch {
    #[default]
    Auto,
    Immediate,
    Deferred,
}

// ---------------------------------------------------------------------------
// RenderSystemSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSystemSettings {
    /// Delay before an effect that failed to compile is tried again.
    ///
    /// While waiting, the object renders with its fallback effect (or is
    /// skipped when none is provided).
    pub effect_retry_interval: Duration,

    /// Draw-phase command list strategy.
    pub dispatch: DrawDispatch,

    /// Upper bound on parallel draw batches.
    ///
    /// `None` uses the size of the rayon thread pool.
    pub max_draw_batches: Option<usize>,

    /// Thread-local batch capacity of the concurrent collectors used while
    /// extracting. Larger batches mean fewer lock acquisitions.
    pub extract_batch_size: usize,
}

impl Default for RenderSystemSettings {
    fn default() -> Self {
        Self {
            effect_retry_interval: Duration::from_secs(5),
            dispatch: DrawDispatch::Auto,
            max_draw_batches: None,
            extract_batch_size: 64,
        }
    }
}

impl RenderSystemSettings {
    /// Whether draws are split over per-thread command lists on a backend
    /// with the given capability.
    #[inline]
    #[must_use]
    pub fn use_deferred(&self, backend_supports_deferred: bool) -> bool {
        match self.dispatch {
            DrawDispatch::Immediate => false,
            DrawDispatch::Auto | DrawDispatch::Deferred => backend_supports_deferred,
        }
    }

    /// Number of draw batches for `node_count` render nodes.
    #[must_use]
    pub fn draw_batch_count(&self, node_count: usize) -> usize {
        let processors = self
            .max_draw_batches
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);
        processors.min(node_count)
    }

    /// Splits `node_count` render nodes into exactly
    /// [`draw_batch_count`](Self::draw_batch_count) contiguous, non-empty
    /// ranges whose sizes differ by at most one.
    #[must_use]
    pub fn draw_batch_ranges(&self, node_count: usize) -> Vec<Range<usize>> {
        let batch_count = self.draw_batch_count(node_count);
        (0..batch_count)
            .map(|batch| batch * node_count / batch_count..(batch + 1) * node_count / batch_count)
            .collect()
    }
}
