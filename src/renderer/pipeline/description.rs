//! Mutable pipeline state description.

use std::sync::Arc;

use crate::renderer::backend::RootSignature;
use crate::renderer::effect::EffectBytecode;
use crate::renderer::pipeline::pipeline_key::PipelineStateKey;
use crate::renderer::stage::RenderOutputDescription;

/// Rasterizer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub polygon_mode: wgpu::PolygonMode,
    pub depth_bias: wgpu::DepthBiasState,
    pub depth_clip_enable: bool,
    pub multisample_count: u32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            polygon_mode: wgpu::PolygonMode::Fill,
            depth_bias: wgpu::DepthBiasState::default(),
            depth_clip_enable: true,
            multisample_count: 1,
        }
    }
}

/// Depth test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare: wgpu::CompareFunction,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write_enable: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
        }
    }
}

/// Everything that identifies a pipeline state object.
#[derive(Debug, Clone)]
pub struct PipelineStateDescription {
    pub effect_bytecode: Option<Arc<EffectBytecode>>,
    pub root_signature: Option<Arc<RootSignature>>,
    /// `None` is opaque (blending disabled).
    pub blend_state: Option<wgpu::BlendState>,
    pub color_write_mask: wgpu::ColorWrites,
    pub sample_mask: u32,
    pub rasterizer_state: RasterizerState,
    pub depth_stencil_state: DepthStencilState,
    pub primitive_topology: wgpu::PrimitiveTopology,
    pub output: RenderOutputDescription,
}

impl Default for PipelineStateDescription {
    fn default() -> Self {
        Self {
            effect_bytecode: None,
            root_signature: None,
            blend_state: None,
            color_write_mask: wgpu::ColorWrites::ALL,
            sample_mask: u32::MAX,
            rasterizer_state: RasterizerState::default(),
            depth_stencil_state: DepthStencilState::default(),
            primitive_topology: wgpu::PrimitiveTopology::TriangleList,
            output: RenderOutputDescription::default(),
        }
    }
}

impl PipelineStateDescription {
    /// Restores every field to its default.
    pub fn set_defaults(&mut self) {
        *self = Self::default();
    }

    /// Hashable identity of the description.
    #[must_use]
    pub fn key(&self) -> PipelineStateKey {
        PipelineStateKey::from(self)
    }
}
