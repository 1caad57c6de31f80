//! Strongly-typed pipeline cache keys.
//!
//! Some `wgpu` state types (`DepthBiasState` with its `f32` fields) do not
//! implement `Hash` / `Eq`. This module defines *mirror* types that extract the
//! fields relevant for pipeline identity and derive the correct trait impls.
//!
//! [`PipelineStateKey`] is the full identity of a
//! [`PipelineStateDescription`]: the effect bytecode and root signature by
//! content/handle, plus every fixed-function state.

use crate::renderer::backend::GpuHandle;
use crate::renderer::pipeline::description::PipelineStateDescription;
use crate::renderer::stage::RenderOutputDescription;

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

/// Hashable mirror of `wgpu::DepthBiasState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthBiasKey {
    pub constant: i32,
    pub slope_scale_bits: u32,
    pub clamp_bits: u32,
}

impl From<wgpu::DepthBiasState> for DepthBiasKey {
    fn from(b: wgpu::DepthBiasState) -> Self {
        Self {
            constant: b.constant,
            slope_scale_bits: b.slope_scale.to_bits(),
            clamp_bits: b.clamp.to_bits(),
        }
    }
}

// ─── Pipeline Key ─────────────────────────────────────────────────────────────

/// Cache key of a finalized pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineStateKey {
    /// Content hash of the effect bytecode, `0` without an effect.
    pub bytecode_hash: u64,
    pub root_signature: Option<GpuHandle>,
    pub blend_state: Option<BlendStateKey>,
    pub color_write_mask: u32, // wgpu::ColorWrites bits
    pub sample_mask: u32,
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub polygon_mode: wgpu::PolygonMode,
    pub depth_bias: DepthBiasKey,
    pub depth_clip_enable: bool,
    pub multisample_count: u32,
    pub depth_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub topology: wgpu::PrimitiveTopology,
    pub output: RenderOutputDescription,
}

impl From<&PipelineStateDescription> for PipelineStateKey {
    fn from(d: &PipelineStateDescription) -> Self {
        let rasterizer = &d.rasterizer_state;
        let depth = &d.depth_stencil_state;
        Self {
            bytecode_hash: d.effect_bytecode.as_ref().map_or(0, |b| b.hash),
            root_signature: d.root_signature.as_ref().map(|r| r.handle),
            blend_state: d.blend_state.map(Into::into),
            color_write_mask: d.color_write_mask.bits(),
            sample_mask: d.sample_mask,
            cull_mode: rasterizer.cull_mode,
            front_face: rasterizer.front_face,
            polygon_mode: rasterizer.polygon_mode,
            depth_bias: rasterizer.depth_bias.into(),
            depth_clip_enable: rasterizer.depth_clip_enable,
            multisample_count: rasterizer.multisample_count,
            depth_enable: depth.depth_enable,
            depth_write_enable: depth.depth_write_enable,
            depth_compare: depth.depth_compare,
            topology: d.primitive_topology,
            output: d.output.clone(),
        }
    }
}
