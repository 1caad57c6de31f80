//! Pipeline Processors
//!
//! Cross-cutting mutators applied to every render node's pipeline
//! description right before it is finalized. Processors run in registration
//! order and may overwrite anything a previous processor set; the last write
//! wins.

use crate::renderer::nodes::RenderNode;
use crate::renderer::object::RenderObject;
use crate::renderer::pipeline::description::PipelineStateDescription;

/// Mutates the pipeline description of one render node.
pub trait PipelineProcessor: Send + Sync {
    fn process(
        &self,
        render_node: &RenderNode,
        render_object: &RenderObject,
        pipeline_state: &mut PipelineStateDescription,
    );
}

/// Alpha blending and read-only depth for one stage.
#[derive(Debug, Clone, Copy)]
pub struct TransparentPipelineProcessor {
    pub render_stage: usize,
    pub blend_state: wgpu::BlendState,
}

impl TransparentPipelineProcessor {
    #[must_use]
    pub fn new(render_stage: usize) -> Self {
        Self {
            render_stage,
            blend_state: wgpu::BlendState::ALPHA_BLENDING,
        }
    }
}

impl PipelineProcessor for TransparentPipelineProcessor {
    fn process(&self, render_node: &RenderNode, _: &RenderObject, pipeline_state: &mut PipelineStateDescription) {
        if render_node.render_stage == self.render_stage {
            pipeline_state.blend_state = Some(self.blend_state);
            pipeline_state.depth_stencil_state.depth_write_enable = false;
        }
    }
}

/// Shadow-map rasterizer overrides.
#[derive(Debug, Clone, Copy)]
pub struct ShadowPipelineProcessor {
    pub shadow_map_render_stage: usize,
    /// Cull mode forced in the shadow stage; `None` renders both faces.
    pub cull_mode: Option<wgpu::Face>,
    pub depth_bias: wgpu::DepthBiasState,
    /// Disabling clipping pancakes casters behind the near plane.
    pub depth_clipping: bool,
}

impl ShadowPipelineProcessor {
    #[must_use]
    pub fn new(shadow_map_render_stage: usize) -> Self {
        Self {
            shadow_map_render_stage,
            cull_mode: None,
            depth_bias: wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            },
            depth_clipping: false,
        }
    }
}

impl PipelineProcessor for ShadowPipelineProcessor {
    fn process(&self, render_node: &RenderNode, _: &RenderObject, pipeline_state: &mut PipelineStateDescription) {
        if render_node.render_stage != self.shadow_map_render_stage {
            return;
        }
        let rasterizer = &mut pipeline_state.rasterizer_state;
        rasterizer.cull_mode = self.cull_mode;
        rasterizer.depth_bias = self.depth_bias;
        rasterizer.depth_clip_enable = self.depth_clipping;
    }
}

/// Line rasterization for one stage.
#[derive(Debug, Clone, Copy)]
pub struct WireframePipelineProcessor {
    pub render_stage: usize,
}

impl PipelineProcessor for WireframePipelineProcessor {
    fn process(&self, render_node: &RenderNode, _: &RenderObject, pipeline_state: &mut PipelineStateDescription) {
        if render_node.render_stage == self.render_stage {
            pipeline_state.rasterizer_state.polygon_mode = wgpu::PolygonMode::Line;
            pipeline_state.rasterizer_state.cull_mode = None;
        }
    }
}
