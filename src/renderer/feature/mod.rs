//! Root Render Features
//!
//! A root render feature owns every render object of one payload type (all
//! meshes, all sprites, ...) and runs its part of each frame phase. The
//! [`RootRenderFeature`] trait is the phase interface the render system
//! drives; [`RenderFeatureCore`] holds the bookkeeping every feature shares.
//!
//! # Node Bookkeeping
//!
//! ```text
//!  render_objects[static node]      stable from add to remove (free-list reuse)
//!        │
//!        ├─► object_nodes           one per object visible this frame
//!        ├─► view_object_nodes      one per (view, object)
//!        └─► render_nodes           one per (view, stage, object): one draw
//! ```
//!
//! Per-frame node lists are [`ConcurrentCollector`]s: Extract appends from
//! worker threads through `&self`, then the render system closes them.
//!
//! - [`effect`]: [`RootEffectRenderFeature`](effect::RootEffectRenderFeature), the
//!   feature that compiles effect permutations and binds resource groups

pub mod effect;

use std::any::{Any, TypeId};

use crate::errors::Result;
use crate::renderer::backend::GraphicsBackend;
use crate::renderer::context::{RenderContext, RenderDrawContext};
use crate::renderer::data::{DataType, RenderDataHolder};
use crate::renderer::effect::EffectCompiler;
use crate::renderer::nodes::{
    ObjectNode, ObjectNodeReference, RenderNode, RenderNodeReference, StaticObjectNodeReference,
    ViewObjectNode, ViewObjectNodeReference,
};
use crate::renderer::object::{ActiveRenderStage, RenderObject, RenderObjectKey, RenderObjects};
use crate::renderer::pipeline::PipelineStateCache;
use crate::renderer::resource_group::ResourceGroupAllocator;
use crate::renderer::settings::RenderSystemSettings;
use crate::renderer::stage::{RenderStage, RenderStageSelector};
use crate::renderer::view::{RenderView, RenderViewStage};
use crate::utils::ConcurrentCollector;

/// Read-only frame state handed to every feature phase.
#[derive(Clone, Copy)]
pub struct FeatureContext<'a> {
    pub render_stages: &'a [RenderStage],
    pub views: &'a [RenderView],
    pub objects: &'a RenderObjects,
    pub backend: &'a dyn GraphicsBackend,
    pub compiler: &'a dyn EffectCompiler,
    pub allocator: &'a ResourceGroupAllocator,
    pub pipeline_cache: &'a PipelineStateCache,
    pub settings: &'a RenderSystemSettings,
    /// Frame counter, the "used this frame" marker value.
    pub frame: u64,
    pub render_context: RenderContext,
}

// ============================================================================
// RenderFeatureCore
// ============================================================================

/// Node lists and static object slots shared by all root render features.
#[derive(Default)]
pub struct RenderFeatureCore {
    pub(crate) index: usize,

    /// Claimed objects by static node; `None` marks a free slot.
    pub render_objects: Vec<Option<RenderObjectKey>>,
    free_static_nodes: Vec<StaticObjectNodeReference>,

    pub object_nodes: ConcurrentCollector<ObjectNode>,
    pub view_object_nodes: ConcurrentCollector<ViewObjectNode>,
    pub render_nodes: ConcurrentCollector<RenderNode>,

    /// Run in order on every added object to fill its active stages.
    pub render_stage_selectors: Vec<Box<dyn RenderStageSelector>>,
    pub render_data: RenderDataHolder,
}

impl RenderFeatureCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position in the render system's feature list.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of claimed objects.
    #[must_use]
    pub fn render_object_count(&self) -> usize {
        self.render_objects.len() - self.free_static_nodes.len()
    }

    /// Object node of `object` for this frame, created on first request.
    /// Safe to call from several threads for the same object.
    pub fn get_or_create_object_node(&self, key: RenderObjectKey, object: &RenderObject) -> ObjectNodeReference {
        let mut object_node = object.object_node.lock();
        if !object_node.is_valid() {
            let index = self.object_nodes.add(ObjectNode {
                render_object: key,
                static_object_node: object.static_object_node,
            });
            *object_node = ObjectNodeReference::new(index);
        }
        *object_node
    }

    pub fn create_view_object_node(
        &self,
        view: usize,
        key: RenderObjectKey,
        object_node: ObjectNodeReference,
    ) -> ViewObjectNodeReference {
        ViewObjectNodeReference::new(self.view_object_nodes.add(ViewObjectNode {
            render_object: key,
            view,
            object_node,
        }))
    }

    pub fn create_render_node(
        &self,
        key: RenderObjectKey,
        object: &RenderObject,
        view: usize,
        render_stage: usize,
        view_object_node: ViewObjectNodeReference,
    ) -> RenderNodeReference {
        RenderNodeReference::new(self.render_nodes.add(RenderNode::new(
            key,
            object.static_object_node,
            view,
            render_stage,
            view_object_node,
        )))
    }

    #[must_use]
    pub fn render_node(&self, reference: RenderNodeReference) -> Option<&RenderNode> {
        self.render_nodes.items().get(reference.index())
    }

    #[must_use]
    pub fn view_object_node(&self, reference: ViewObjectNodeReference) -> Option<&ViewObjectNode> {
        self.view_object_nodes.items().get(reference.index())
    }

    /// Publishes the nodes appended during Extract.
    pub fn close_node_collectors(&mut self) {
        self.object_nodes.close();
        self.view_object_nodes.close();
        self.render_nodes.close();
    }

    /// Clears the per-frame nodes and data arrays.
    pub fn reset(&mut self) {
        self.object_nodes.clear();
        self.view_object_nodes.clear();
        self.render_nodes.clear();
        self.render_data.clear_frame_arrays();
    }

    /// Re-runs the stage selectors on `object`.
    pub fn process_render_stage_selectors(&self, object: &mut RenderObject) {
        for stage in &mut object.active_render_stages {
            *stage = ActiveRenderStage::default();
        }
        for selector in &self.render_stage_selectors {
            selector.process(object);
        }
    }

    /// Size of the arrays indexed by `data_type`, effect objects excluded.
    #[must_use]
    pub fn data_array_size(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::StaticObject | DataType::StaticEffectObject => self.render_objects.len(),
            DataType::Object => self.object_nodes.len(),
            DataType::ViewObject => self.view_object_nodes.len(),
            DataType::Render => self.render_nodes.len(),
            DataType::EffectObject => 0,
        }
    }

    fn add_render_object(&mut self, key: RenderObjectKey, object: &mut RenderObject) {
        let static_node = match self.free_static_nodes.pop() {
            Some(node) => {
                self.render_objects[node.index()] = Some(key);
                node
            }
            None => {
                self.render_objects.push(Some(key));
                StaticObjectNodeReference::new(self.render_objects.len() - 1)
            }
        };
        object.render_feature = Some(self.index);
        object.static_object_node = static_node;
        self.process_render_stage_selectors(object);
    }

    fn remove_render_object(&mut self, object: &mut RenderObject) {
        let static_node = object.static_object_node;
        if let Some(slot) = self.render_objects.get_mut(static_node.index()) {
            *slot = None;
            self.render_data.reset_static_node(static_node.index());
            self.free_static_nodes.push(static_node);
        }
        object.render_feature = None;
        object.static_object_node = StaticObjectNodeReference::INVALID;
    }
}

// ============================================================================
// RootRenderFeature
// ============================================================================

/// Phase interface of a root render feature.
///
/// The render system calls the phases in frame order: `collect`, `extract`,
/// `prepare_effect_permutations`, `prepare`, then `draw_view`/`draw` for
/// each drawn (view, stage), `flush`, and `reset` before the next frame.
/// Features run in registration order and must not depend on each other.
pub trait RootRenderFeature: Any + Send + Sync {
    fn core(&self) -> &RenderFeatureCore;

    fn core_mut(&mut self) -> &mut RenderFeatureCore;

    fn name(&self) -> &str;

    /// Payload type of the render objects this feature claims.
    fn supported_render_object_type(&self) -> TypeId;

    fn initialize(&mut self, _ctx: &FeatureContext<'_>) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self) {}

    fn is_render_object_supported(&self, object: &RenderObject) -> bool {
        object.data_type() == self.supported_render_object_type()
    }

    /// Claims `object` if supported.
    fn try_add_render_object(&mut self, key: RenderObjectKey, object: &mut RenderObject) -> bool {
        if !self.is_render_object_supported(object) {
            return false;
        }
        self.core_mut().add_render_object(key, object);
        self.on_add_render_object(object);
        true
    }

    fn remove_render_object(&mut self, object: &mut RenderObject) {
        self.on_remove_render_object(object);
        self.core_mut().remove_render_object(object);
    }

    fn on_add_render_object(&mut self, _object: &RenderObject) {}

    fn on_remove_render_object(&mut self, _object: &RenderObject) {}

    /// Called for every render stage, existing ones included when the
    /// feature is registered.
    fn on_render_stage_added(&mut self, _stage: &RenderStage) -> Result<()> {
        Ok(())
    }

    fn collect(&mut self, _ctx: &FeatureContext<'_>) {}

    /// Runs after the node lists are built and closed.
    fn extract(&mut self, _ctx: &FeatureContext<'_>) {}

    fn prepare_effect_permutations(&mut self, _ctx: &FeatureContext<'_>) {}

    fn prepare(&mut self, _ctx: &FeatureContext<'_>) {}

    /// Once per drawn (view, stage), before any node is drawn.
    fn draw_view(&self, _ctx: &mut RenderDrawContext<'_>, _view: &RenderView, _view_stage: &RenderViewStage) {}

    /// Draws `view_stage.sorted_render_nodes()[start..end]`, which all belong
    /// to this feature. May run on several threads at once.
    fn draw(
        &self,
        ctx: &mut RenderDrawContext<'_>,
        objects: &RenderObjects,
        view: &RenderView,
        view_stage: &RenderViewStage,
        start: usize,
        end: usize,
    );

    fn flush(&mut self, _ctx: &FeatureContext<'_>) {}

    fn reset(&mut self) {
        self.core_mut().reset();
    }

    fn compute_data_array_expected_size(&self, data_type: DataType) -> usize {
        self.core().data_array_size(data_type)
    }

    /// Grows the data arrays to the current node counts.
    fn prepare_data_arrays(&mut self) {
        let sizes = DataType::ALL.map(|data_type| self.compute_data_array_expected_size(data_type));
        self.core_mut()
            .render_data
            .prepare_data_arrays(|data_type| sizes[data_type as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::stage::SimpleGroupToRenderStageSelector;

    struct Marker;

    struct CountingFeature {
        core: RenderFeatureCore,
    }

    impl RootRenderFeature for CountingFeature {
        fn core(&self) -> &RenderFeatureCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut RenderFeatureCore {
            &mut self.core
        }

        fn name(&self) -> &str {
            "Counting"
        }

        fn supported_render_object_type(&self) -> TypeId {
            TypeId::of::<Marker>()
        }

        fn draw(&self, _: &mut RenderDrawContext<'_>, _: &RenderObjects, _: &RenderView, _: &RenderViewStage, _: usize, _: usize) {}
    }

    fn feature() -> CountingFeature {
        let mut core = RenderFeatureCore::new();
        core.render_stage_selectors
            .push(Box::new(SimpleGroupToRenderStageSelector::new(1, "Test")));
        CountingFeature { core }
    }

    #[test]
    fn static_nodes_are_reused_after_removal() {
        let mut objects = RenderObjects::with_key();
        let mut feature = feature();

        let a = objects.insert(RenderObject::new(Marker));
        let b = objects.insert(RenderObject::new(Marker));
        assert!(feature.try_add_render_object(a, &mut objects[a]));
        assert!(feature.try_add_render_object(b, &mut objects[b]));
        assert_eq!(objects[b].static_object_node().index(), 1);
        assert!(objects[a].is_active_in(1));

        feature.remove_render_object(&mut objects[a]);
        assert!(!objects[a].static_object_node().is_valid());
        assert_eq!(feature.core().render_object_count(), 1);

        let c = objects.insert(RenderObject::new(Marker));
        feature.try_add_render_object(c, &mut objects[c]);
        assert_eq!(objects[c].static_object_node().index(), 0);
        assert_eq!(objects[b].static_object_node().index(), 1);
    }

    #[test]
    fn unsupported_payload_is_refused() {
        let mut feature = feature();
        let mut objects = RenderObjects::with_key();
        let key = objects.insert(RenderObject::new(5u8));
        assert!(!feature.try_add_render_object(key, &mut objects[key]));
        assert!(objects[key].render_feature().is_none());
    }

    #[test]
    fn object_node_is_created_once_per_frame() {
        let mut feature = feature();
        let mut objects = RenderObjects::with_key();
        let key = objects.insert(RenderObject::new(Marker));
        feature.try_add_render_object(key, &mut objects[key]);

        let object = &objects[key];
        let first = feature.core().get_or_create_object_node(key, object);
        let second = feature.core().get_or_create_object_node(key, object);
        assert_eq!(first, second);

        feature.core_mut().close_node_collectors();
        assert_eq!(feature.core().object_nodes.items().len(), 1);
        assert_eq!(feature.compute_data_array_expected_size(DataType::Object), 1);

        feature.reset();
        assert!(feature.core().object_nodes.is_empty());
    }
}
