//! Render Effects
//!
//! One [`RenderEffect`] exists per (static object node, effect permutation
//! slot). It survives across frames and tracks which permutation the object
//! asked for, whether it compiled, and what to render meanwhile.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────────── ShouldSkip ─────────────┐
//!            ▼                                      │
//!          Skip ── next un-skipped frame ──► (compile request)
//!                                                   │
//!   (compile request) ──ready──► Normal             │
//!          │  ├──pending──► Compiling ──ok──► Normal
//!          │  │                  └──fault──► Error
//!          └──error───────────────────────► Error ──retry time reached──► (compile request)
//! ```
//!
//! There is no terminal state: the transition is re-evaluated every frame
//! the effect is used.

use std::sync::Arc;
use std::time::Instant;

use crate::renderer::backend::PipelineState;
use crate::renderer::effect::compiler::{Effect, PendingEffect};
use crate::renderer::effect::reflection::{FallbackLayouts, RenderEffectReflection};
use crate::renderer::effect::validator::EffectValidator;
use crate::renderer::object::EffectSelector;
use crate::renderer::parameters::ParameterCollection;
use crate::renderer::resource_group::{BufferPoolAllocationType, ResourceGroup, ResourceGroupAllocator};

/// Compilation status of a render effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderEffectState {
    /// The requested permutation is compiled and in use.
    #[default]
    Normal,
    /// Compiling asynchronously; a fallback (if any) renders meanwhile.
    Compiling,
    /// Compilation failed; a fallback (if any) renders until the retry time.
    Error,
    /// The object opted out of this slot for the frame.
    Skip,
}

/// Compiled-or-compiling shader variant of one object for one slot.
#[derive(Debug)]
pub struct RenderEffect {
    pub effect_selector: EffectSelector,
    pub state: RenderEffectState,
    /// Earliest frame time at which a failed compile is retried.
    pub retry_time: Option<Instant>,
    pub effect: Option<Arc<Effect>>,
    pub reflection: Option<Arc<RenderEffectReflection>>,
    pub effect_validator: EffectValidator,
    pub pending_effect: Option<PendingEffect>,
    pub pipeline_state: Option<Arc<PipelineState>>,

    /// Parameters bound through the fallback updater while not `Normal`.
    pub fallback_parameters: Option<ParameterCollection>,
    pub(crate) fallback_parameter_updater: FallbackParameterUpdater,

    last_frame_used: Option<u64>,
    pub(crate) is_reflection_update_required: bool,
}

impl RenderEffect {
    #[must_use]
    pub fn new(effect_selector: EffectSelector) -> Self {
        Self {
            effect_selector,
            state: RenderEffectState::Normal,
            retry_time: None,
            effect: None,
            reflection: None,
            effect_validator: EffectValidator::new(),
            pending_effect: None,
            pipeline_state: None,
            fallback_parameters: None,
            fallback_parameter_updater: FallbackParameterUpdater::default(),
            last_frame_used: None,
            is_reflection_update_required: false,
        }
    }

    /// Marks the effect as used in `frame`. Returns `true` for the first
    /// call of the frame.
    pub fn mark_as_used(&mut self, frame: u64) -> bool {
        if self.last_frame_used == Some(frame) {
            return false;
        }
        self.last_frame_used = Some(frame);
        true
    }

    #[inline]
    #[must_use]
    pub fn is_used_during_frame(&self, frame: u64) -> bool {
        self.last_frame_used == Some(frame)
    }

    #[inline]
    #[must_use]
    pub fn is_reflection_update_required(&self) -> bool {
        self.is_reflection_update_required
    }

    /// `true` once an `Error` effect has reached its retry time.
    #[must_use]
    pub fn is_retry_due(&self, now: Instant) -> bool {
        self.state == RenderEffectState::Error && self.retry_time.is_some_and(|t| now >= t)
    }

    pub fn clear_fallback_parameters(&mut self) {
        self.fallback_parameters = None;
        self.fallback_parameter_updater = FallbackParameterUpdater::default();
    }
}

/// Resource groups bound for fallback rendering.
#[derive(Debug, Default)]
pub struct FallbackParameterUpdater {
    resource_groups: Vec<Option<Arc<ResourceGroup>>>,
    updated_frame: Option<u64>,
}

impl FallbackParameterUpdater {
    /// Prepares one resource group per fallback layout for `frame`. Repeated
    /// calls within a frame keep the groups already prepared.
    pub fn update(
        &mut self,
        frame: u64,
        allocator: &ResourceGroupAllocator,
        layouts: &FallbackLayouts,
        parameters: &ParameterCollection,
    ) {
        if self.updated_frame == Some(frame) {
            return;
        }
        self.updated_frame = Some(frame);

        let parameters_hash = parameters.content_hash();
        self.resource_groups = layouts
            .layouts
            .iter()
            .map(|layout| {
                layout.as_ref().map(|layout| {
                    let group = allocator.allocate_resource_group();
                    allocator.prepare_resource_group(
                        layout,
                        BufferPoolAllocationType::UsedOnce,
                        &group,
                    );
                    group.set_parameters_hash(parameters_hash);
                    group
                })
            })
            .collect();
    }

    #[must_use]
    pub fn resource_groups(&self) -> &[Option<Arc<ResourceGroup>>] {
        &self.resource_groups
    }
}
