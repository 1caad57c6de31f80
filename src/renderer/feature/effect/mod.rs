//! Effect Render Feature
//!
//! [`RootEffectRenderFeature`] is the root render feature for objects drawn
//! with compiled effects. On top of the node bookkeeping of every feature it:
//!
//! - maps render stages to effect permutation slots (one per distinct
//!   `effect_slot_name`, at most [`MAX_EFFECT_PERMUTATION_SLOTS`]);
//! - keeps one [`RenderEffect`] per (static object node, slot) and drives its
//!   compile state machine each frame;
//! - instantiates reflections and caches PerFrame/PerView layouts;
//! - allocates resource groups and finalizes pipeline states in Prepare.
//!
//! Per-payload behavior plugs in through [`EffectFeatureHooks`].
//!
//! # Prepare Effect Permutations
//!
//! ```text
//!  (sequential)  visible render nodes ──► create/replace RenderEffect, mark used, begin validation
//!  (parallel)    per object × slot    ──► hooks, render-target extensions, compile transition
//!  (sequential)  effects flagged      ──► sort key, reflection, layouts, fallback layouts
//! ```

pub mod layouts;

use std::any::{Any, TypeId};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::errors::{RenderError, Result};
use crate::renderer::backend::{DrawCommand, PipelineState};
use crate::renderer::context::RenderDrawContext;
use crate::renderer::data::{DataType, RenderDataKey};
use crate::renderer::effect::reflection::FrameResourceGroupLayout;
use crate::renderer::effect::{
    Effect, EffectCompiler, EffectLoad, PendingEffect, RenderEffect, RenderEffectReflection,
    RenderEffectState,
};
use crate::renderer::feature::{FeatureContext, RenderFeatureCore, RootRenderFeature};
use crate::renderer::nodes::{
    EffectObjectNode, EffectObjectNodeReference, ObjectNodeReference, RenderNode, RenderNodeReference,
};
use crate::renderer::object::{RenderObject, RenderObjects};
use crate::renderer::parameters::{ParameterCollection, ParameterKey};
use crate::renderer::pipeline::{PipelineProcessor, PipelineStateDescription};
use crate::renderer::resource_group::{BufferPoolAllocationType, ResourceGroup};
use crate::renderer::stage::{RenderStage, RenderStageSelector};
use crate::renderer::view::{RenderView, RenderViewStage};
use crate::utils::ConcurrentCollector;

pub use layouts::{
    ConstantBufferOffsetReference, EffectLayouts, LogicalGroupReference, PER_DRAW, PER_FRAME,
    PER_VIEW, WELL_KNOWN_DESCRIPTOR_SETS,
};

/// Most effect permutation slots one feature can hold.
pub const MAX_EFFECT_PERMUTATION_SLOTS: usize = 32;

/// Permutation parameter carrying the render-target extension mixins of a
/// stage's output.
pub static RENDER_TARGET_EXTENSIONS: LazyLock<ParameterKey> =
    LazyLock::new(|| ParameterKey::new("Effect.RenderTargetExtensions"));

/// Picks the effect rendered while the requested permutation is compiling
/// or failed, with the parameters to bind for it. `None` draws nothing.
pub type ComputeFallbackEffect = dyn Fn(&RenderObject, &RenderEffect, RenderEffectState) -> Option<(Arc<Effect>, ParameterCollection)>
    + Send
    + Sync;

/// Called once for every reflection the feature instantiates.
pub type EffectCompiledCallback = dyn Fn(&Effect, &RenderEffectReflection) + Send + Sync;

// ─── Hooks ────────────────────────────────────────────────────────────────────

/// Payload-specific behavior of an effect render feature.
///
/// `prepare_effect_permutations` and `invalidate_effect_permutation` run on
/// worker threads, several objects at once.
pub trait EffectFeatureHooks: Send + Sync + 'static {
    /// Validates the permutation parameters of a used effect. Set
    /// `effect.effect_validator.should_skip` to opt the object out of the
    /// slot this frame.
    fn prepare_effect_permutations(&self, _object: &RenderObject, _slot: usize, _effect: &mut RenderEffect) {}

    /// Called when an effect keeps its permutation for the frame.
    fn invalidate_effect_permutation(&self, _object: &RenderObject, _effect: &mut RenderEffect) {}

    /// Last feature-specific edit of a node's pipeline description, before
    /// the registered pipeline processors.
    fn process_pipeline_state(
        &self,
        _render_node: &RenderNode,
        _object: &RenderObject,
        _pipeline_state: &mut PipelineStateDescription,
    ) {
    }

    /// Records one render node.
    fn draw_node(
        &self,
        ctx: &mut RenderDrawContext<'_>,
        object: &RenderObject,
        render_node: &RenderNode,
        pipeline_state: &Arc<PipelineState>,
        resource_groups: &[Option<Arc<ResourceGroup>>],
    ) {
        ctx.command_list.set_pipeline_state(pipeline_state);
        ctx.command_list.set_resource_groups(resource_groups);
        ctx.command_list.draw(DrawCommand {
            object_index: object.index(),
            view: render_node.view,
            render_stage: render_node.render_stage,
        });
    }
}

impl EffectFeatureHooks for () {}

// ─── Compile Transition ───────────────────────────────────────────────────────

/// Per-frame inputs of the compile state machine.
struct EffectCompileStep<'a> {
    compiler: &'a dyn EffectCompiler,
    fallback: Option<&'a ComputeFallbackEffect>,
    now: Instant,
    retry_interval: Duration,
}

impl EffectCompileStep<'_> {
    /// Advances `effect` by one frame. Sets `is_reflection_update_required`
    /// when its effect or state may have changed.
    fn advance(&self, hooks: &dyn EffectFeatureHooks, object: &RenderObject, effect: &mut RenderEffect) {
        if effect.effect_validator.should_skip {
            effect.effect = None;
            effect.state = RenderEffectState::Skip;
            effect.is_reflection_update_required = true;
            return;
        }

        let unchanged = effect.effect_validator.end_effect_validation();
        let source_changed = effect.effect.as_ref().is_some_and(|e| e.source_changed());

        if unchanged
            && !source_changed
            && effect.state != RenderEffectState::Skip
            && !effect.is_retry_due(self.now)
        {
            hooks.invalidate_effect_permutation(object, effect);

            let Some(outcome) = effect.pending_effect.as_ref().and_then(PendingEffect::poll) else {
                return;
            };
            effect.clear_fallback_parameters();
            match outcome {
                Ok(compiled) => {
                    effect.state = RenderEffectState::Normal;
                    effect.effect = Some(compiled);
                }
                Err(error) => {
                    log::warn!("Effect '{}' failed to compile: {error}", effect.effect_selector.effect_name());
                    self.fail(object, effect);
                }
            }
            effect.pending_effect = None;
        } else {
            effect.pending_effect = None;
            effect.state = RenderEffectState::Normal;

            let parameters = effect.effect_validator.compiler_parameters();
            match self.compiler.load_effect(effect.effect_selector.effect_name(), &parameters) {
                Ok(EffectLoad::Ready(compiled)) => {
                    effect.clear_fallback_parameters();
                    effect.effect = Some(compiled);
                }
                Ok(EffectLoad::Pending(pending)) => {
                    log::trace!("Effect '{}' is compiling", pending.effect_name());
                    effect.clear_fallback_parameters();
                    effect.pending_effect = Some(pending);
                    effect.state = RenderEffectState::Compiling;
                    self.apply_fallback(object, effect);
                }
                Err(error) => {
                    log::warn!("Effect '{}' failed to compile: {error}", effect.effect_selector.effect_name());
                    effect.clear_fallback_parameters();
                    self.fail(object, effect);
                }
            }
        }

        effect.is_reflection_update_required = true;
    }

    /// Enters `Error`, schedules the retry and switches to the fallback.
    fn fail(&self, object: &RenderObject, effect: &mut RenderEffect) {
        effect.state = RenderEffectState::Error;
        effect.retry_time = Some(self.now + self.retry_interval);
        self.apply_fallback(object, effect);
    }

    fn apply_fallback(&self, object: &RenderObject, effect: &mut RenderEffect) {
        let fallback = self.fallback.and_then(|compute| compute(object, effect, effect.state));
        match fallback {
            Some((fallback_effect, parameters)) => {
                effect.effect = Some(fallback_effect);
                effect.fallback_parameters = Some(parameters);
            }
            None => effect.effect = None,
        }
    }
}

// ─── Feature ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct EffectSlots {
    names: Vec<Arc<str>>,
    by_stage: Vec<Option<usize>>,
}

impl EffectSlots {
    #[inline]
    fn for_stage(&self, stage: usize) -> Option<usize> {
        self.by_stage.get(stage).copied().flatten()
    }

    #[inline]
    fn count(&self) -> usize {
        self.names.len()
    }
}

/// Root render feature whose objects render through compiled effects.
pub struct RootEffectRenderFeature<H> {
    core: RenderFeatureCore,
    name: String,
    supported_type: TypeId,
    hooks: H,

    render_effect_key: RenderDataKey<Option<RenderEffect>>,
    slots: EffectSlots,
    layouts: EffectLayouts,

    pipeline_processors: Vec<Box<dyn PipelineProcessor>>,
    compute_fallback_effect: Option<Arc<ComputeFallbackEffect>>,
    effect_compiled: Option<Arc<EffectCompiledCallback>>,

    effect_object_nodes: ConcurrentCollector<EffectObjectNode>,
    used_frame_layouts: ConcurrentCollector<Arc<FrameResourceGroupLayout>>,
    /// `resource_group_stride` bound groups per render node, by descriptor
    /// set slot.
    resource_group_pool: Vec<Option<Arc<ResourceGroup>>>,
    resource_group_stride: usize,
}

impl<H: EffectFeatureHooks> RootEffectRenderFeature<H> {
    /// Feature claiming render objects whose payload is `T`.
    pub fn with_hooks<T: Any>(name: impl Into<String>, hooks: H) -> Self {
        let mut core = RenderFeatureCore::new();
        let render_effect_key = core
            .render_data
            .create_key_with_multiplier(DataType::StaticEffectObject, 0);
        Self {
            core,
            name: name.into(),
            supported_type: TypeId::of::<T>(),
            hooks,
            render_effect_key,
            slots: EffectSlots::default(),
            layouts: EffectLayouts::new(),
            pipeline_processors: Vec::new(),
            compute_fallback_effect: None,
            effect_compiled: None,
            effect_object_nodes: ConcurrentCollector::new(),
            used_frame_layouts: ConcurrentCollector::new(),
            resource_group_pool: Vec::new(),
            resource_group_stride: WELL_KNOWN_DESCRIPTOR_SETS.len(),
        }
    }

    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn add_render_stage_selector(&mut self, selector: impl RenderStageSelector + 'static) {
        self.core.render_stage_selectors.push(Box::new(selector));
    }

    /// Processors run in registration order; the last write wins.
    pub fn add_pipeline_processor(&mut self, processor: impl PipelineProcessor + 'static) {
        self.pipeline_processors.push(Box::new(processor));
    }

    pub fn set_compute_fallback_effect(
        &mut self,
        compute: impl Fn(&RenderObject, &RenderEffect, RenderEffectState) -> Option<(Arc<Effect>, ParameterCollection)>
        + Send
        + Sync
        + 'static,
    ) {
        self.compute_fallback_effect = Some(Arc::new(compute));
    }

    pub fn on_effect_compiled(&mut self, callback: impl Fn(&Effect, &RenderEffectReflection) + Send + Sync + 'static) {
        self.effect_compiled = Some(Arc::new(callback));
    }

    // ─── Slots ────────────────────────────────────────────────────────────────

    /// Slot of `effect_slot_name`, created on first request.
    ///
    /// # Errors
    ///
    /// [`RenderError::TooManyEffectSlots`] once [`MAX_EFFECT_PERMUTATION_SLOTS`]
    /// slots exist.
    pub fn create_effect_permutation_slot(&mut self, effect_slot_name: &str) -> Result<usize> {
        if let Some(slot) = self.slots.names.iter().position(|name| &**name == effect_slot_name) {
            return Ok(slot);
        }
        let count = self.slots.count();
        if count >= MAX_EFFECT_PERMUTATION_SLOTS {
            return Err(RenderError::TooManyEffectSlots {
                requested: count + 1,
                max: MAX_EFFECT_PERMUTATION_SLOTS,
            });
        }

        self.slots.names.push(effect_slot_name.into());
        self.core
            .render_data
            .change_data_multiplier(self.render_effect_key, count + 1);
        log::debug!("{}: effect slot {count} = '{effect_slot_name}'", self.name);
        Ok(count)
    }

    #[must_use]
    pub fn effect_permutation_slot_count(&self) -> usize {
        self.slots.count()
    }

    #[must_use]
    pub fn effect_permutation_slot(&self, render_stage: usize) -> Option<usize> {
        self.slots.for_stage(render_stage)
    }

    #[must_use]
    pub fn layouts(&self) -> &EffectLayouts {
        &self.layouts
    }

    /// Descriptor set slot named `name`, appended after the well-known
    /// sets on first request.
    pub fn create_descriptor_set_slot(&mut self, name: &str) -> usize {
        self.layouts.get_or_create_descriptor_set_slot(name)
    }

    pub fn create_frame_cbuffer_offset_slot(&mut self, variable: ParameterKey) -> ConstantBufferOffsetReference {
        self.layouts.create_frame_cbuffer_offset_slot(variable)
    }

    pub fn create_view_cbuffer_offset_slot(&mut self, variable: ParameterKey) -> ConstantBufferOffsetReference {
        self.layouts.create_view_cbuffer_offset_slot(variable)
    }

    pub fn create_draw_cbuffer_offset_slot(&mut self, variable: ParameterKey) -> ConstantBufferOffsetReference {
        self.layouts.create_draw_cbuffer_offset_slot(variable)
    }

    pub fn create_view_logical_group(&mut self, name: &str) -> LogicalGroupReference {
        self.layouts.create_view_logical_group(name)
    }

    pub fn create_draw_logical_group(&mut self, name: &str) -> LogicalGroupReference {
        self.layouts.create_draw_logical_group(name)
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    /// Render effect of `object` for `render_stage`, if one was created.
    #[must_use]
    pub fn render_effect(&self, object: &RenderObject, render_stage: usize) -> Option<&RenderEffect> {
        let slot = self.slots.for_stage(render_stage)?;
        let static_node = object.static_object_node();
        if !static_node.is_valid() || object.render_feature() != Some(self.core.index) {
            return None;
        }
        self.core
            .render_data
            .get(self.render_effect_key)
            .get(static_node.index() * self.slots.count() + slot)?
            .as_ref()
    }

    /// Groups bound for `render_node`, by descriptor set slot. Valid after
    /// Prepare.
    #[must_use]
    pub fn resource_groups(&self, render_node: RenderNodeReference) -> &[Option<Arc<ResourceGroup>>] {
        let start = render_node.index() * self.resource_group_stride;
        self.resource_group_pool
            .get(start..start + self.resource_group_stride)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn effect_object_nodes(&self) -> &[EffectObjectNode] {
        self.effect_object_nodes.items()
    }

    /// PerFrame layouts prepared this frame.
    #[must_use]
    pub fn used_frame_layouts(&self) -> &[Arc<FrameResourceGroupLayout>] {
        self.used_frame_layouts.items()
    }
}

impl<H: EffectFeatureHooks> RootRenderFeature for RootEffectRenderFeature<H> {
    fn core(&self) -> &RenderFeatureCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RenderFeatureCore {
        &mut self.core
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_render_object_type(&self) -> TypeId {
        self.supported_type
    }

    fn initialize(&mut self, ctx: &FeatureContext<'_>) -> Result<()> {
        log::debug!(
            "{}: initialized on '{}' ({} stages)",
            self.name,
            ctx.backend.name(),
            ctx.render_stages.len()
        );
        Ok(())
    }

    fn unload(&mut self) {
        self.layouts = EffectLayouts::new();
    }

    fn on_render_stage_added(&mut self, stage: &RenderStage) -> Result<()> {
        let slot = self.create_effect_permutation_slot(&stage.effect_slot_name)?;
        if self.slots.by_stage.len() <= stage.index() {
            self.slots.by_stage.resize(stage.index() + 1, None);
        }
        self.slots.by_stage[stage.index()] = Some(slot);
        Ok(())
    }

    fn prepare_effect_permutations(&mut self, ctx: &FeatureContext<'_>) {
        let slot_count = self.slots.count();
        if slot_count == 0 {
            return;
        }
        let key = self.render_effect_key;
        let feature_index = self.core.index;

        // Create or replace the effects visible render nodes ask for.
        {
            let render_nodes = self.core.render_nodes.items();
            let effects = self.core.render_data.get_mut(key);
            for view in ctx.views {
                let Some(view_feature) = view.features.get(feature_index) else {
                    continue;
                };
                for reference in view_feature.render_nodes.items() {
                    let Some(node) = render_nodes.get(reference.index()) else {
                        continue;
                    };
                    let (Some(object), Some(slot)) =
                        (ctx.objects.get(node.render_object), self.slots.for_stage(node.render_stage))
                    else {
                        continue;
                    };
                    let Some(selector) = object
                        .active_render_stages
                        .get(node.render_stage)
                        .and_then(|stage| stage.effect_selector.as_ref())
                    else {
                        continue;
                    };
                    let Some(entry) = effects.get_mut(node.static_object_node.index() * slot_count + slot) else {
                        continue;
                    };

                    if entry.as_ref().is_none_or(|effect| effect.effect_selector != *selector) {
                        *entry = Some(RenderEffect::new(selector.clone()));
                    }
                    if let Some(effect) = entry
                        && effect.mark_as_used(ctx.frame)
                    {
                        effect.effect_validator.begin_effect_validation();
                    }
                }
            }
        }

        let step = EffectCompileStep {
            compiler: ctx.compiler,
            fallback: self.compute_fallback_effect.as_deref(),
            now: ctx.render_context.now,
            retry_interval: ctx.settings.effect_retry_interval,
        };

        // Permutation hooks and compile transitions, one object per task.
        {
            let hooks = &self.hooks;
            let slots = &self.slots;
            let owners = &self.core.render_objects;
            let effects = self.core.render_data.get_mut(key);
            effects
                .par_chunks_mut(slot_count)
                .zip(owners.par_iter())
                .for_each(|(chunk, owner)| {
                    let Some(object) = (*owner).and_then(|key| ctx.objects.get(key)) else {
                        return;
                    };
                    for (slot, entry) in chunk.iter_mut().enumerate() {
                        let Some(effect) = entry else {
                            continue;
                        };
                        effect.is_reflection_update_required = false;
                        if !effect.is_used_during_frame(ctx.frame) {
                            continue;
                        }
                        hooks.prepare_effect_permutations(object, slot, effect);
                        validate_render_target_extensions(ctx.render_stages, slots, object, slot, effect);
                        step.advance(hooks, object, effect);
                    }
                });
        }

        // Reflections, sequentially.
        let layouts = &self.layouts;
        let effect_compiled = self.effect_compiled.as_deref();
        let owners = &self.core.render_objects;
        let effects = self.core.render_data.get_mut(key);
        for (chunk, owner) in effects.chunks_mut(slot_count).zip(owners) {
            let Some(object) = (*owner).and_then(|key| ctx.objects.get(key)) else {
                continue;
            };
            for effect in chunk.iter_mut().flatten() {
                if !effect.is_reflection_update_required {
                    continue;
                }
                update_reflection(ctx, &step, layouts, effect_compiled, object, effect);
            }
        }
    }

    fn prepare(&mut self, ctx: &FeatureContext<'_>) {
        self.effect_object_nodes.clear();
        self.used_frame_layouts.clear();

        let stride = self.layouts.descriptor_set_slots().len();
        self.resource_group_stride = stride;
        self.resource_group_pool.clear();
        self.resource_group_pool
            .resize(self.core.render_nodes.len() * stride, None);

        let slot_count = self.slots.count();
        let key = self.render_effect_key;

        // Fallback parameters.
        for effect in self.core.render_data.get_mut(key).iter_mut().flatten() {
            if effect.state == RenderEffectState::Normal || !effect.is_used_during_frame(ctx.frame) {
                continue;
            }
            let (Some(parameters), Some(reflection)) = (&effect.fallback_parameters, &effect.reflection) else {
                continue;
            };
            let Some(fallback_layouts) = reflection.fallback_layouts() else {
                continue;
            };
            effect
                .fallback_parameter_updater
                .update(ctx.frame, ctx.allocator, fallback_layouts, parameters);
        }

        // Resource groups and effect object nodes, one render node per task.
        if slot_count > 0 {
            let feature_index = self.core.index;
            let view_count = ctx.views.len();
            let slots = &self.slots;
            let effect_object_nodes = &self.effect_object_nodes;
            let used_frame_layouts = &self.used_frame_layouts;
            let effects = self.core.render_data.get(key);
            let view_object_nodes = self.core.view_object_nodes.items();
            let render_nodes = self.core.render_nodes.items_mut();

            render_nodes
                .par_iter_mut()
                .zip(self.resource_group_pool.par_chunks_mut(stride))
                .for_each(|(node, groups)| {
                    node.render_effect = None;
                    node.effect_object_node = EffectObjectNodeReference::INVALID;
                    node.resources = None;

                    let Some(slot) = slots.for_stage(node.render_stage) else {
                        return;
                    };
                    let index = node.static_object_node.index() * slot_count + slot;
                    node.render_effect = Some(index);

                    let Some(effect) = effects.get(index).and_then(Option::as_ref) else {
                        return;
                    };
                    let Some(reflection) = effect.reflection.as_ref().filter(|_| effect.effect.is_some()) else {
                        return;
                    };

                    if let Some(layout) = &reflection.per_view_layout {
                        layout.ensure_view_count(view_count);
                        if let Some(entry) = layout.entry(node.view) {
                            if entry.mark_as_used(ctx.frame) {
                                ctx.allocator.prepare_resource_group(
                                    &layout.base.layout,
                                    BufferPoolAllocationType::UsedMultipleTime,
                                    &entry.resources,
                                );
                                if let Some(view_feature) =
                                    ctx.views.get(node.view).and_then(|view| view.features.get(feature_index))
                                {
                                    view_feature.layouts.add(layout.clone());
                                }
                            }
                            groups[PER_VIEW] = Some(entry.resources.clone());
                        }
                    }

                    if let Some(layout) = &reflection.per_frame_layout {
                        if layout.entry.mark_as_used(ctx.frame) {
                            ctx.allocator.prepare_resource_group(
                                &layout.base.layout,
                                BufferPoolAllocationType::UsedMultipleTime,
                                &layout.entry.resources,
                            );
                            used_frame_layouts.add(layout.clone());
                        }
                        groups[PER_FRAME] = Some(layout.entry.resources.clone());
                    }

                    if let Some(layout) = &reflection.per_draw_layout {
                        let group = ctx.allocator.allocate_resource_group();
                        ctx.allocator
                            .prepare_resource_group(&layout.layout, BufferPoolAllocationType::UsedOnce, &group);
                        node.resources = Some(group.clone());
                        groups[PER_DRAW] = Some(group);
                    }

                    let object_node = view_object_nodes
                        .get(node.view_object_node.index())
                        .map_or(ObjectNodeReference::INVALID, |n| n.object_node);
                    node.effect_object_node =
                        EffectObjectNodeReference::new(effect_object_nodes.add(EffectObjectNode { object_node }));

                    if effect.state != RenderEffectState::Normal
                        && let Some(fallback) = reflection.fallback_layouts()
                    {
                        let fallback_groups = effect.fallback_parameter_updater.resource_groups();
                        for (group, &descriptor_set) in fallback_groups.iter().zip(&fallback.mapping) {
                            if let Some(target) = groups.get_mut(descriptor_set) {
                                target.clone_from(group);
                            }
                        }
                    }
                });
        }

        // Pipeline states.
        {
            let render_nodes = self.core.render_nodes.items();
            let effects = self.core.render_data.get_mut(key);
            let mut description = PipelineStateDescription::default();
            for node in render_nodes {
                let Some(effect) = node.render_effect.and_then(|index| effects.get_mut(index)).and_then(Option::as_mut)
                else {
                    continue;
                };
                if effect.pipeline_state.is_some() {
                    continue;
                }
                let (Some(compiled), Some(reflection)) = (&effect.effect, &effect.reflection) else {
                    continue;
                };
                let Some(object) = ctx.objects.get(node.render_object) else {
                    continue;
                };

                description.set_defaults();
                description.effect_bytecode = Some(compiled.bytecode().clone());
                description.root_signature = reflection.root_signature.clone();
                if let Some(stage) = ctx.render_stages.get(node.render_stage) {
                    description.output = stage.output().clone();
                    description.rasterizer_state.multisample_count = stage.output().multisample_count;
                }

                self.hooks.process_pipeline_state(node, object, &mut description);
                for processor in &self.pipeline_processors {
                    processor.process(node, object, &mut description);
                }

                effect.pipeline_state = Some(ctx.pipeline_cache.get_or_create(ctx.backend, &description));
            }
        }

        self.effect_object_nodes.close();
        self.used_frame_layouts.close();
        self.prepare_data_arrays();
    }

    fn draw(
        &self,
        ctx: &mut RenderDrawContext<'_>,
        objects: &RenderObjects,
        _view: &RenderView,
        view_stage: &RenderViewStage,
        start: usize,
        end: usize,
    ) {
        let effects = self.core.render_data.get(self.render_effect_key);
        let references = view_stage.sorted_render_nodes().get(start..end).unwrap_or(&[]);
        for reference in references {
            let Some(node) = self.core.render_node(reference.render_node) else {
                continue;
            };
            let Some(effect) = node.render_effect.and_then(|index| effects.get(index)).and_then(Option::as_ref) else {
                continue;
            };
            let (Some(pipeline_state), Some(object)) = (&effect.pipeline_state, objects.get(node.render_object)) else {
                continue;
            };
            let groups = self.resource_groups(reference.render_node);
            self.hooks.draw_node(ctx, object, node, pipeline_state, groups);
        }
    }

    fn reset(&mut self) {
        self.core.reset();
        self.effect_object_nodes.clear();
        self.used_frame_layouts.clear();
    }

    fn compute_data_array_expected_size(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::EffectObject => self.effect_object_nodes.len(),
            _ => self.core.data_array_size(data_type),
        }
    }
}

/// Validates the render-target extensions of the first active stage, in
/// stage order, that renders through `slot`.
fn validate_render_target_extensions(
    render_stages: &[RenderStage],
    slots: &EffectSlots,
    object: &RenderObject,
    slot: usize,
    effect: &mut RenderEffect,
) {
    let stage = render_stages
        .iter()
        .find(|stage| slots.for_stage(stage.index()) == Some(slot) && object.is_active_in(stage.index()));
    if let Some(source) = stage.and_then(|stage| stage.output_validator().shader_source()) {
        effect
            .effect_validator
            .validate_parameter(*RENDER_TARGET_EXTENSIONS, source.clone());
    }
}

fn update_reflection(
    ctx: &FeatureContext<'_>,
    step: &EffectCompileStep<'_>,
    layouts: &EffectLayouts,
    effect_compiled: Option<&EffectCompiledCallback>,
    object: &RenderObject,
    effect: &mut RenderEffect,
) {
    // Nothing to render yet: block on the compile.
    if effect.effect.is_none()
        && effect.state == RenderEffectState::Compiling
        && let Some(pending) = effect.pending_effect.take()
    {
        match pending.wait() {
            Ok(compiled) => {
                effect.effect = Some(compiled);
                effect.state = RenderEffectState::Normal;
            }
            Err(error) => {
                log::warn!("Effect '{}' failed to compile: {error}", effect.effect_selector.effect_name());
                effect.clear_fallback_parameters();
                step.fail(object, effect);
            }
        }
    }

    let effect_hash = effect.effect.as_ref().map_or(0, |e| e.sort_hash());
    object.set_state_sort_key((object.state_sort_key() & 0xFFFF_0000) | (effect_hash & 0xFFFF));

    effect.pipeline_state = None;
    effect.reflection = Some(match &effect.effect {
        Some(compiled) => {
            let reflection = layouts.instantiate(ctx.backend, compiled, effect.state, effect_compiled);
            if effect.state != RenderEffectState::Normal {
                layouts.fallback_layouts(ctx.backend, &reflection);
            }
            reflection
        }
        None => RenderEffectReflection::empty(),
    });
}
