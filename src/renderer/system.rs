//! Render System
//!
//! [`RenderSystem`] drives every root render feature through the frame:
//!
//! ```text
//!  reset ─► (add views) ─► collect ─► extract ─► prepare ─► draw(view, stage)* ─► flush
//! ```
//!
//! | Phase     | Work                                                                     |
//! |-----------|--------------------------------------------------------------------------|
//! | `reset`   | bump the frame counter, clear nodes, return pooled lists, drop views     |
//! | `collect` | fill `collect_all_objects` views, feature `collect` hooks                |
//! | `extract` | parallel over views and objects: object, view object and render nodes    |
//! | `prepare` | effect permutations, resource groups, pipeline states, then sort         |
//! | `draw`    | contiguous same-feature runs, optionally split over worker command lists |
//!
//! Node lists inside a view stage are grouped by owning feature after
//! Extract, in object creation order within a feature. Sorting may
//! interleave features; Draw recomputes the runs.

use std::any::Any;
use std::sync::Arc;

use rayon::prelude::*;

use crate::errors::{RenderError, Result};
use crate::renderer::backend::{CommandList, CompiledCommandList, GraphicsBackend};
use crate::renderer::context::{RenderContext, RenderDrawContext};
use crate::renderer::effect::EffectCompiler;
use crate::renderer::feature::{FeatureContext, RootRenderFeature};
use crate::renderer::nodes::{
    ObjectNodeReference, RenderNodeFeatureReference, RenderNodeReference, ViewObjectNodeReference,
};
use crate::renderer::object::{RenderObject, RenderObjectKey, RenderObjects};
use crate::renderer::pipeline::PipelineStateCache;
use crate::renderer::resource_group::ResourceGroupAllocator;
use crate::renderer::settings::RenderSystemSettings;
use crate::renderer::sort::SortKey;
use crate::renderer::stage::RenderStage;
use crate::renderer::view::{RenderView, RenderViewFeature, RenderViewStage};
use crate::utils::{CollectorCache, ConcurrentCollector, ConcurrentPool};

/// Shared services every feature phase reads.
pub struct RenderServices {
    pub backend: Arc<dyn GraphicsBackend>,
    pub compiler: Arc<dyn EffectCompiler>,
    pub settings: RenderSystemSettings,
    pub allocator: ResourceGroupAllocator,
    pub pipeline_cache: PipelineStateCache,
}

impl RenderServices {
    fn context<'a>(
        &'a self,
        render_stages: &'a [RenderStage],
        views: &'a [RenderView],
        objects: &'a RenderObjects,
        frame: u64,
        render_context: RenderContext,
    ) -> FeatureContext<'a> {
        FeatureContext {
            render_stages,
            views,
            objects,
            backend: self.backend.as_ref(),
            compiler: self.compiler.as_ref(),
            allocator: &self.allocator,
            pipeline_cache: &self.pipeline_cache,
            settings: &self.settings,
            frame,
            render_context,
        }
    }
}

type StageNodeList = ConcurrentCollector<RenderNodeFeatureReference>;

/// Frame pipeline over render features, objects, stages and views.
pub struct RenderSystem {
    services: RenderServices,

    render_stages: Vec<RenderStage>,
    features: Vec<Box<dyn RootRenderFeature>>,
    objects: RenderObjects,
    views: Vec<RenderView>,

    render_node_pool: ConcurrentPool<StageNodeList>,
    sorted_render_node_pool: ConcurrentPool<Vec<RenderNodeFeatureReference>>,
    command_list_pool: ConcurrentPool<Box<dyn CommandList>>,

    frame_counter: u64,
}

impl RenderSystem {
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        compiler: Arc<dyn EffectCompiler>,
        settings: RenderSystemSettings,
    ) -> Self {
        log::info!(
            "RenderSystem: backend '{}' (deferred command lists: {})",
            backend.name(),
            backend.supports_deferred_command_lists()
        );
        let command_list_backend = backend.clone();
        Self {
            services: RenderServices {
                backend,
                compiler,
                settings,
                allocator: ResourceGroupAllocator::new(),
                pipeline_cache: PipelineStateCache::new(),
            },
            render_stages: Vec::new(),
            features: Vec::new(),
            objects: RenderObjects::with_key(),
            views: Vec::new(),
            render_node_pool: ConcurrentPool::default(),
            sorted_render_node_pool: ConcurrentPool::default(),
            command_list_pool: ConcurrentPool::new(move || command_list_backend.create_command_list()),
            frame_counter: 0,
        }
    }

    // ─── Configuration ────────────────────────────────────────────────────────

    /// Registers a render stage and returns its index. Every feature maps
    /// it to an effect permutation slot.
    pub fn add_render_stage(&mut self, mut stage: RenderStage) -> Result<usize> {
        let index = self.render_stages.len();
        stage.index = index;
        for feature in &mut self.features {
            feature.on_render_stage_added(&stage)?;
        }
        log::debug!("RenderSystem: render stage #{index} '{}' (slot '{}')", stage.name, stage.effect_slot_name);
        self.render_stages.push(stage);

        let stage_count = self.render_stages.len();
        for object in self.objects.values_mut() {
            object.ensure_stage_count(stage_count);
        }
        self.refresh_render_stages();
        Ok(index)
    }

    /// Render stages are additive only.
    pub fn remove_render_stage(&mut self, index: usize) -> Result<()> {
        let stage = self
            .render_stages
            .get(index)
            .ok_or(RenderError::InvalidRenderStage(index))?;
        log::error!("RenderSystem: attempted to remove render stage '{}'", stage.name);
        Err(RenderError::RenderStageRemovalUnsupported(stage.name.clone()))
    }

    /// Registers a root render feature and claims the objects no other
    /// feature owns.
    pub fn add_render_feature(&mut self, mut feature: Box<dyn RootRenderFeature>) -> Result<usize> {
        let index = self.features.len();
        feature.core_mut().index = index;

        let ctx = self.services.context(
            &self.render_stages,
            &self.views,
            &self.objects,
            self.frame_counter,
            RenderContext::new(),
        );
        feature.initialize(&ctx)?;
        for stage in &self.render_stages {
            feature.on_render_stage_added(stage)?;
        }

        let mut claimed = 0usize;
        for (key, object) in &mut self.objects {
            if object.render_feature.is_none() && feature.try_add_render_object(key, object) {
                claimed += 1;
            }
        }

        log::info!("RenderSystem: feature #{index} '{}' ({claimed} objects claimed)", feature.name());
        self.features.push(feature);
        Ok(index)
    }

    /// Re-runs the stage selectors of every claimed object.
    pub fn refresh_render_stages(&mut self) {
        for object in self.objects.values_mut() {
            if let Some(feature) = object.render_feature.and_then(|index| self.features.get(index)) {
                feature.core().process_render_stage_selectors(object);
            }
        }
    }

    /// Inserts `object` and hands it to the first feature supporting its
    /// payload. Unsupported objects are kept but never extracted.
    pub fn add_render_object(&mut self, object: RenderObject) -> RenderObjectKey {
        let key = self.objects.insert(object);
        let stage_count = self.render_stages.len();
        if let Some(object) = self.objects.get_mut(key) {
            object.ensure_stage_count(stage_count);
            let claimed = self
                .features
                .iter_mut()
                .any(|feature| feature.try_add_render_object(key, object));
            if !claimed {
                log::warn!(
                    "RenderSystem: no render feature supports '{}'; the object will not render",
                    object.data_type_name()
                );
            }
        }
        key
    }

    /// Removes `key` and releases its static node.
    pub fn remove_render_object(&mut self, key: RenderObjectKey) -> Result<RenderObject> {
        let mut object = self.objects.remove(key).ok_or(RenderError::InvalidRenderObject)?;
        if let Some(feature) = object.render_feature.and_then(|index| self.features.get_mut(index)) {
            feature.remove_render_object(&mut object);
        }
        Ok(object)
    }

    /// Adds a view for the current frame and returns its index.
    pub fn add_view(&mut self, mut view: RenderView) -> usize {
        let index = self.views.len();
        view.index = index;
        self.views.push(view);
        index
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn object(&self, key: RenderObjectKey) -> Option<&RenderObject> {
        self.objects.get(key)
    }

    pub fn object_mut(&mut self, key: RenderObjectKey) -> Option<&mut RenderObject> {
        self.objects.get_mut(key)
    }

    #[must_use]
    pub fn objects(&self) -> &RenderObjects {
        &self.objects
    }

    #[must_use]
    pub fn render_stages(&self) -> &[RenderStage] {
        &self.render_stages
    }

    pub fn render_stage_mut(&mut self, index: usize) -> Option<&mut RenderStage> {
        self.render_stages.get_mut(index)
    }

    #[must_use]
    pub fn views(&self) -> &[RenderView] {
        &self.views
    }

    pub fn view_mut(&mut self, index: usize) -> Option<&mut RenderView> {
        self.views.get_mut(index)
    }

    #[must_use]
    pub fn features(&self) -> &[Box<dyn RootRenderFeature>] {
        &self.features
    }

    /// Feature `index` as its concrete type.
    #[must_use]
    pub fn feature<T: RootRenderFeature>(&self, index: usize) -> Option<&T> {
        let feature: &dyn Any = &**self.features.get(index)?;
        feature.downcast_ref()
    }

    pub fn feature_mut<T: RootRenderFeature>(&mut self, index: usize) -> Option<&mut T> {
        let feature: &mut dyn Any = &mut **self.features.get_mut(index)?;
        feature.downcast_mut()
    }

    #[must_use]
    pub fn settings(&self) -> &RenderSystemSettings {
        &self.services.settings
    }

    pub fn settings_mut(&mut self) -> &mut RenderSystemSettings {
        &mut self.services.settings
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.services.backend
    }

    #[must_use]
    pub fn allocator(&self) -> &ResourceGroupAllocator {
        &self.services.allocator
    }

    #[must_use]
    pub fn pipeline_cache(&self) -> &PipelineStateCache {
        &self.services.pipeline_cache
    }

    #[inline]
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    // ─── Frame Phases ─────────────────────────────────────────────────────────

    /// Starts a new frame. Views must be added again afterwards.
    pub fn reset(&mut self) {
        self.frame_counter += 1;

        for feature in &mut self.features {
            feature.reset();
        }
        self.services.allocator.reset(self.frame_counter);

        for object in self.objects.values_mut() {
            *object.object_node.get_mut() = ObjectNodeReference::INVALID;
        }

        for mut view in self.views.drain(..) {
            for stage in &mut view.render_stages {
                if let Some(mut nodes) = stage.render_nodes.take() {
                    nodes.clear();
                    self.render_node_pool.release(nodes);
                }
                if let Some(mut sorted) = stage.sorted_render_nodes.take() {
                    sorted.clear();
                    self.sorted_render_node_pool.release(sorted);
                }
            }
        }
    }

    pub fn collect(&mut self, render_context: RenderContext) {
        let objects = &self.objects;
        for view in &mut self.views {
            if !view.collect_all_objects {
                continue;
            }
            let mask = view.culling_mask;
            view.render_objects.clear();
            view.render_objects.extend(
                objects
                    .iter()
                    .filter(|(_, object)| {
                        object.enabled
                            && object.render_feature.is_some()
                            && mask.contains_group(object.render_group)
                    })
                    .map(|(key, _)| key),
            );
        }

        let ctx = self.services.context(
            &self.render_stages,
            &self.views,
            &self.objects,
            self.frame_counter,
            render_context,
        );
        for feature in &mut self.features {
            feature.collect(&ctx);
        }
    }

    pub fn extract(&mut self, render_context: RenderContext) {
        let feature_count = self.features.len();
        for view in &mut self.views {
            while view.features.len() < feature_count {
                let feature = view.features.len();
                view.features.push(RenderViewFeature::new(feature));
            }
            for stage in &mut view.render_stages {
                if stage.render_nodes.is_none() {
                    stage.render_nodes = Some(self.render_node_pool.acquire());
                }
            }
        }

        let objects = &self.objects;
        self.views.par_iter_mut().for_each(|view| {
            view.render_objects.retain(|&key| {
                objects
                    .get(key)
                    .is_some_and(|object| object.enabled && object.render_feature.is_some())
            });
            view.render_objects.par_sort_unstable_by_key(|&key| {
                objects
                    .get(key)
                    .map_or((usize::MAX, u64::MAX), |object| {
                        (object.render_feature.unwrap_or(usize::MAX), object.index())
                    })
            });
        });

        let features = &self.features;
        let render_stages = &self.render_stages;
        let batch_size = self.services.settings.extract_batch_size;
        self.views.par_iter().for_each(|view| {
            view.render_objects.par_iter().for_each_init(
                || ExtractCaches::new(view, batch_size),
                |caches, &key| {
                    let Some(object) = objects.get(key) else {
                        return;
                    };
                    let Some((feature_index, feature)) = object
                        .render_feature
                        .and_then(|index| features.get(index).map(|feature| (index, feature)))
                    else {
                        return;
                    };
                    let core = feature.core();

                    let object_node = core.get_or_create_object_node(key, object);
                    let view_object_node = core.create_view_object_node(view.index, key, object_node);
                    caches.add_view_object_node(feature_index, view_object_node);

                    for (position, view_stage) in view.render_stages.iter().enumerate() {
                        if !object.is_active_in(view_stage.index) {
                            continue;
                        }
                        let filter = render_stages
                            .get(view_stage.index)
                            .and_then(|stage| stage.filter.as_ref());
                        if filter.is_some_and(|filter| !filter.is_visible(object, view, view_stage)) {
                            continue;
                        }

                        let render_node =
                            core.create_render_node(key, object, view.index, view_stage.index, view_object_node);
                        caches.add_render_node(
                            feature_index,
                            position,
                            RenderNodeFeatureReference {
                                root_render_feature: feature_index,
                                render_node,
                                render_object: key,
                            },
                        );
                    }
                },
            );
        });

        self.views.par_iter_mut().for_each(|view| {
            for view_feature in &mut view.features {
                view_feature.view_object_nodes.close();
                view_feature.render_nodes.close();
            }
            for stage in &mut view.render_stages {
                if let Some(nodes) = &mut stage.render_nodes {
                    nodes.close();
                    nodes.items_mut().par_sort_unstable_by_key(|node| {
                        let object_index = objects.get(node.render_object).map_or(u64::MAX, RenderObject::index);
                        (node.root_render_feature, object_index)
                    });
                }
            }
        });

        for feature in &mut self.features {
            feature.core_mut().close_node_collectors();
            feature.prepare_data_arrays();
        }

        let ctx = self.services.context(
            &self.render_stages,
            &self.views,
            &self.objects,
            self.frame_counter,
            render_context,
        );
        for feature in &mut self.features {
            feature.extract(&ctx);
            feature.prepare_data_arrays();
        }
    }

    pub fn prepare(&mut self, render_context: RenderContext) {
        {
            let ctx = self.services.context(
                &self.render_stages,
                &self.views,
                &self.objects,
                self.frame_counter,
                render_context,
            );
            for feature in &mut self.features {
                feature.prepare_effect_permutations(&ctx);
            }
            for feature in &mut self.features {
                feature.prepare(&ctx);
            }
        }

        let objects = &self.objects;
        let render_stages = &self.render_stages;
        let pool = &self.sorted_render_node_pool;
        let sorted: Vec<Vec<Vec<RenderNodeFeatureReference>>> = self
            .views
            .par_iter()
            .map(|view| {
                view.render_stages
                    .iter()
                    .map(|view_stage| sort_render_nodes(view, view_stage, render_stages, objects, pool))
                    .collect()
            })
            .collect();

        for (view, stages) in self.views.iter_mut().zip(sorted) {
            for (view_stage, nodes) in view.render_stages.iter_mut().zip(stages) {
                view_stage.sorted_render_nodes = Some(nodes);
            }
            for view_feature in &mut view.features {
                view_feature.layouts.close();
            }
        }

        let stats = self.services.allocator.flush();
        log::trace!(
            "RenderSystem: frame {} prepared {} resource groups ({} constant buffer bytes)",
            stats.frame,
            stats.prepared_groups,
            stats.constant_buffer_bytes
        );
    }

    /// Records the sorted render nodes of (`view`, `stage`).
    ///
    /// # Errors
    ///
    /// [`RenderError::MissingRenderViewStage`] when the view did not register
    /// the stage.
    pub fn draw(&self, ctx: &mut RenderDrawContext<'_>, view: usize, stage: usize) -> Result<()> {
        let (render_view, view_stage) = self
            .views
            .get(view)
            .and_then(|render_view| Some((render_view, render_view.render_stage(stage)?)))
            .ok_or(RenderError::MissingRenderViewStage { view, stage })?;

        for feature in &self.features {
            feature.draw_view(ctx, render_view, view_stage);
        }

        let node_count = view_stage.sorted_render_nodes().len();
        if node_count == 0 {
            return Ok(());
        }

        let backend = self.services.backend.as_ref();
        if !self
            .services
            .settings
            .use_deferred(backend.supports_deferred_command_lists())
        {
            self.draw_nodes(ctx, render_view, view_stage, 0, node_count);
            return Ok(());
        }

        let batches = self.services.settings.draw_batch_ranges(node_count);
        let batch_count = batches.len();

        let state = ctx.command_list.render_target_state();
        let main = ctx.command_list.close();
        let render_context = ctx.render_context;

        let batches: Vec<CompiledCommandList> = batches
            .into_par_iter()
            .map(|range| {
                let mut command_list = self.command_list_pool.acquire();
                command_list.reset();
                command_list.clear_state();
                command_list.set_render_target_state(&state);

                {
                    let mut batch_ctx = RenderDrawContext::new(render_context, command_list.as_mut());
                    self.draw_nodes(&mut batch_ctx, render_view, view_stage, range.start, range.end);
                }

                let compiled = command_list.close();
                self.command_list_pool.release(command_list);
                compiled
            })
            .collect();

        log::trace!("RenderSystem: {node_count} nodes over {batch_count} command lists");
        let mut submission = Vec::with_capacity(batch_count + 1);
        submission.push(main);
        submission.extend(batches);
        backend.execute_command_lists(submission);

        ctx.command_list.reset();
        ctx.command_list.clear_state();
        ctx.command_list.set_render_target_state(&state);
        Ok(())
    }

    /// Draws `[start, end)` of the sorted list as runs of nodes sharing a
    /// feature.
    fn draw_nodes(
        &self,
        ctx: &mut RenderDrawContext<'_>,
        view: &RenderView,
        view_stage: &RenderViewStage,
        start: usize,
        end: usize,
    ) {
        let nodes = view_stage.sorted_render_nodes();
        let end = end.min(nodes.len());
        let mut run_start = start;
        while run_start < end {
            let feature_index = nodes[run_start].root_render_feature;
            let run_end = nodes[run_start..end]
                .iter()
                .position(|node| node.root_render_feature != feature_index)
                .map_or(end, |offset| run_start + offset);

            if let Some(feature) = self.features.get(feature_index) {
                feature.draw(ctx, &self.objects, view, view_stage, run_start, run_end);
            }
            run_start = run_end;
        }
    }

    pub fn flush(&mut self, render_context: RenderContext) {
        let ctx = self.services.context(
            &self.render_stages,
            &self.views,
            &self.objects,
            self.frame_counter,
            render_context,
        );
        for feature in &mut self.features {
            feature.flush(&ctx);
        }
    }
}

impl std::fmt::Debug for RenderSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSystem")
            .field("backend", &self.services.backend.name())
            .field("render_stages", &self.render_stages.len())
            .field("features", &self.features.len())
            .field("objects", &self.objects.len())
            .field("views", &self.views.len())
            .field("frame_counter", &self.frame_counter)
            .finish_non_exhaustive()
    }
}

/// Thread-local staging of one view's node lists during Extract.
struct ExtractCaches<'a> {
    view_object_nodes: Vec<CollectorCache<'a, ViewObjectNodeReference>>,
    render_nodes: Vec<CollectorCache<'a, RenderNodeReference>>,
    stage_nodes: Vec<Option<CollectorCache<'a, RenderNodeFeatureReference>>>,
}

impl<'a> ExtractCaches<'a> {
    fn new(view: &'a RenderView, capacity: usize) -> Self {
        Self {
            view_object_nodes: view
                .features
                .iter()
                .map(|f| CollectorCache::new(&f.view_object_nodes, capacity))
                .collect(),
            render_nodes: view
                .features
                .iter()
                .map(|f| CollectorCache::new(&f.render_nodes, capacity))
                .collect(),
            stage_nodes: view
                .render_stages
                .iter()
                .map(|stage| stage.render_nodes.as_ref().map(|nodes| CollectorCache::new(nodes, capacity)))
                .collect(),
        }
    }

    fn add_view_object_node(&mut self, feature: usize, node: ViewObjectNodeReference) {
        if let Some(cache) = self.view_object_nodes.get_mut(feature) {
            cache.add(node);
        }
    }

    fn add_render_node(&mut self, feature: usize, stage_position: usize, node: RenderNodeFeatureReference) {
        if let Some(cache) = self.render_nodes.get_mut(feature) {
            cache.add(node.render_node);
        }
        if let Some(Some(cache)) = self.stage_nodes.get_mut(stage_position) {
            cache.add(node);
        }
    }
}

/// Draw order of one view stage, in a pooled list.
fn sort_render_nodes(
    view: &RenderView,
    view_stage: &RenderViewStage,
    render_stages: &[RenderStage],
    objects: &RenderObjects,
    pool: &ConcurrentPool<Vec<RenderNodeFeatureReference>>,
) -> Vec<RenderNodeFeatureReference> {
    let mut sorted = pool.acquire();
    sorted.clear();

    let nodes = view_stage.render_nodes();
    let sort_mode = render_stages
        .get(view_stage.index)
        .and_then(|stage| stage.sort_mode.as_deref());
    match sort_mode {
        None => sorted.extend_from_slice(nodes),
        Some(sort_mode) => {
            let mut keys = vec![SortKey::default(); nodes.len()];
            sort_mode.generate_sort_keys(view, view_stage, objects, &mut keys);
            keys.par_sort_unstable();
            sorted.extend(keys.iter().filter_map(|key| nodes.get(key.index as usize).copied()));
        }
    }
    sorted
}
