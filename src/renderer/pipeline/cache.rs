//! Pipeline State Cache
//!
//! Owner of every finalized [`PipelineState`]. Descriptions are deduplicated
//! by their full content ([`PipelineStateKey`]), so two render effects that
//! end up with identical state share one backend object.
//!
//! The cache is read concurrently during the prepare phase; a miss takes the
//! write lock and re-checks before creating, so each key is created at most
//! once.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::renderer::backend::{GraphicsBackend, PipelineState};
use crate::renderer::pipeline::description::PipelineStateDescription;
use crate::renderer::pipeline::pipeline_key::PipelineStateKey;

/// Content-keyed pipeline state storage.
#[derive(Default)]
pub struct PipelineStateCache {
    states: RwLock<FxHashMap<PipelineStateKey, Arc<PipelineState>>>,
}

impl PipelineStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the pipeline state matching `description`.
    pub fn get_or_create(
        &self,
        backend: &dyn GraphicsBackend,
        description: &PipelineStateDescription,
    ) -> Arc<PipelineState> {
        let key = description.key();
        if let Some(state) = self.states.read().get(&key) {
            return state.clone();
        }

        let mut states = self.states.write();
        let created = states.len();
        states
            .entry(key)
            .or_insert_with(|| {
                log::debug!(
                    "PipelineStateCache: creating pipeline state #{created} (blend: {}, polygon: {:?})",
                    description.blend_state.is_some(),
                    description.rasterizer_state.polygon_mode
                );
                backend.create_pipeline_state(description)
            })
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Drops every cached state (output formats changed, device lost, ...).
    pub fn clear(&self) {
        self.states.write().clear();
    }
}

impl std::fmt::Debug for PipelineStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStateCache")
            .field("states", &self.len())
            .finish()
    }
}
