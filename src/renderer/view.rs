//! Render Views
//!
//! A [`RenderView`] is one viewpoint rendered this frame (a camera, a shadow
//! cascade, a reflection probe face). Views are added after
//! [`RenderSystem::reset`](crate::renderer::system::RenderSystem::reset) and
//! cleared by the next reset.
//!
//! ```text
//!  RenderView
//!   ├─ render_objects          visible objects, sorted by feature in Extract
//!   ├─ features[feature]       RenderViewFeature: view object nodes, render nodes, PerView layouts
//!   └─ render_stages[i]        RenderViewStage: pooled unsorted + sorted node lists
//! ```

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::renderer::effect::reflection::ViewResourceGroupLayout;
use crate::renderer::nodes::{RenderNodeFeatureReference, RenderNodeReference, ViewObjectNodeReference};
use crate::renderer::object::{RenderGroupMask, RenderObjectKey};
use crate::utils::ConcurrentCollector;

/// Nodes of one root render feature seen from one view.
#[derive(Debug, Default)]
pub struct RenderViewFeature {
    /// Index of the root render feature.
    pub root_feature: usize,
    pub view_object_nodes: ConcurrentCollector<ViewObjectNodeReference>,
    pub render_nodes: ConcurrentCollector<RenderNodeReference>,
    /// PerView layouts prepared for this view this frame.
    pub layouts: ConcurrentCollector<Arc<ViewResourceGroupLayout>>,
}

impl RenderViewFeature {
    #[must_use]
    pub fn new(root_feature: usize) -> Self {
        Self {
            root_feature,
            ..Self::default()
        }
    }
}

/// A render stage as rendered from one view.
#[derive(Debug)]
pub struct RenderViewStage {
    /// Index of the render stage.
    pub index: usize,
    /// Render nodes in extraction order, grouped by feature.
    pub render_nodes: Option<ConcurrentCollector<RenderNodeFeatureReference>>,
    /// Render nodes in draw order.
    pub sorted_render_nodes: Option<Vec<RenderNodeFeatureReference>>,
}

impl RenderViewStage {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            render_nodes: None,
            sorted_render_nodes: None,
        }
    }

    /// Extracted nodes; empty before Extract.
    #[must_use]
    pub fn render_nodes(&self) -> &[RenderNodeFeatureReference] {
        self.render_nodes
            .as_ref()
            .map(ConcurrentCollector::items)
            .unwrap_or(&[])
    }

    /// Nodes in draw order; empty before Prepare.
    #[must_use]
    pub fn sorted_render_nodes(&self) -> &[RenderNodeFeatureReference] {
        self.sorted_render_nodes.as_deref().unwrap_or(&[])
    }
}

/// One viewpoint rendered this frame.
#[derive(Debug)]
pub struct RenderView {
    pub(crate) index: usize,
    pub view_matrix: Mat4,
    pub projection: Mat4,
    /// Render groups this view renders.
    pub culling_mask: RenderGroupMask,
    /// When set, Collect adds every enabled object in `culling_mask`.
    /// Otherwise the caller fills `render_objects`.
    pub collect_all_objects: bool,
    pub render_objects: Vec<RenderObjectKey>,
    pub features: Vec<RenderViewFeature>,
    pub render_stages: Vec<RenderViewStage>,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            index: usize::MAX,
            view_matrix: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            culling_mask: RenderGroupMask::all(),
            collect_all_objects: true,
            render_objects: Vec::new(),
            features: Vec::new(),
            render_stages: Vec::new(),
        }
    }
}

impl RenderView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// View looking from `eye` at `target` (right-handed, Y up).
    #[must_use]
    pub fn look_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            view_matrix: Mat4::look_at_rh(eye, target, Vec3::Y),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_render_stages(mut self, stages: impl IntoIterator<Item = usize>) -> Self {
        for stage in stages {
            self.add_render_stage(stage);
        }
        self
    }

    #[must_use]
    pub fn with_culling_mask(mut self, mask: RenderGroupMask) -> Self {
        self.culling_mask = mask;
        self
    }

    /// Position in the render system's view list.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Registers `stage` for this view. Registering twice is a no-op.
    pub fn add_render_stage(&mut self, stage: usize) {
        if self.render_stage(stage).is_none() {
            self.render_stages.push(RenderViewStage::new(stage));
        }
    }

    /// Adds an object explicitly (views with `collect_all_objects` off).
    pub fn add_render_object(&mut self, key: RenderObjectKey) {
        self.render_objects.push(key);
    }

    /// Linear lookup of the view stage rendering `stage`.
    #[must_use]
    pub fn render_stage(&self, stage: usize) -> Option<&RenderViewStage> {
        self.render_stages.iter().find(|s| s.index == stage)
    }

    /// View-space depth of a world position (distance along the view
    /// direction).
    #[inline]
    #[must_use]
    pub fn view_depth(&self, position: Vec3) -> f32 {
        -self.view_matrix.transform_point3(position).z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_depth_grows_along_the_view_direction() {
        let view = RenderView::look_at(Vec3::ZERO, Vec3::NEG_Z);
        assert!((view.view_depth(Vec3::new(0.0, 0.0, -5.0)) - 5.0).abs() < 1e-5);
        assert!(view.view_depth(Vec3::new(0.0, 0.0, 2.0)) < 0.0);
    }

    #[test]
    fn stages_register_once() {
        let mut view = RenderView::new().with_render_stages([0, 2, 0]);
        view.add_render_stage(2);
        assert_eq!(view.render_stages.len(), 2);
        assert!(view.render_stage(1).is_none());
        assert!(view.render_stage(2).unwrap().render_nodes().is_empty());
    }
}
