//! Render Stages
//!
//! A [`RenderStage`] is a named rendering pass ("Opaque", "Transparent",
//! "ShadowMap", ...). Stages are registered once with the render system and
//! addressed by their index everywhere afterwards; they can be added but
//! never removed.
//!
//! Each stage names the effect permutation slot its objects compile into,
//! may sort its render nodes ([`SortMode`]) and filter them
//! ([`RenderStageFilter`]), and describes its output targets. Extra render
//! targets (normals, velocity, ...) are declared as extensions, which also
//! drive a shader permutation parameter of every effect rendered in the
//! stage.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::renderer::object::{RenderGroupMask, RenderObject};
use crate::renderer::parameters::ShaderSource;
use crate::renderer::sort::SortMode;
use crate::renderer::view::{RenderView, RenderViewStage};

/// Formats and sample count of a stage's render targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderOutputDescription {
    pub render_target_formats: SmallVec<[wgpu::TextureFormat; 4]>,
    pub depth_stencil_format: Option<wgpu::TextureFormat>,
    pub multisample_count: u32,
    pub scissor_test_enable: bool,
}

impl Default for RenderOutputDescription {
    fn default() -> Self {
        Self {
            render_target_formats: SmallVec::new(),
            depth_stencil_format: None,
            multisample_count: 1,
            scissor_test_enable: false,
        }
    }
}

impl RenderOutputDescription {
    #[must_use]
    pub fn new(
        color_format: wgpu::TextureFormat,
        depth_stencil_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let mut render_target_formats = SmallVec::new();
        render_target_formats.push(color_format);
        Self {
            render_target_formats,
            depth_stencil_format,
            ..Self::default()
        }
    }

    /// Depth-only output (shadow maps, prepasses).
    #[must_use]
    pub fn depth_only(depth_stencil_format: wgpu::TextureFormat) -> Self {
        Self {
            depth_stencil_format: Some(depth_stencil_format),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_multisample_count(mut self, count: u32) -> Self {
        self.multisample_count = count;
        self
    }
}

/// An additional render target written by every effect in a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTargetExtension {
    /// Semantic name, e.g. "Normal" or "Velocity".
    pub semantic: Arc<str>,
    pub format: wgpu::TextureFormat,
    /// Shader mixin computing the target's value.
    pub shader_class: Arc<str>,
}

/// Collects render-target extensions and derives the shader source that
/// computes them.
#[derive(Debug, Clone, Default)]
pub struct RenderOutputValidator {
    extensions: Vec<RenderTargetExtension>,
    shader_source: Option<ShaderSource>,
}

impl RenderOutputValidator {
    /// Adds an extension. Adding the same semantic twice is a no-op.
    pub fn add(&mut self, extension: RenderTargetExtension) {
        if self.extensions.iter().any(|e| e.semantic == extension.semantic) {
            return;
        }
        self.extensions.push(extension);
        self.rebuild_shader_source();
    }

    #[must_use]
    pub fn extensions(&self) -> &[RenderTargetExtension] {
        &self.extensions
    }

    /// Mixins for the extension targets, `None` without extensions.
    #[must_use]
    pub fn shader_source(&self) -> Option<&ShaderSource> {
        self.shader_source.as_ref()
    }

    /// Output of `base` extended with one target per extension.
    #[must_use]
    pub fn validate(&self, base: &RenderOutputDescription) -> RenderOutputDescription {
        let mut output = base.clone();
        output
            .render_target_formats
            .extend(self.extensions.iter().map(|e| e.format));
        output
    }

    fn rebuild_shader_source(&mut self) {
        let mut source = ShaderSource::default();
        for extension in &self.extensions {
            source.push(extension.shader_class.clone());
        }
        self.shader_source = (!source.is_empty()).then_some(source);
    }
}

/// Per-object visibility test of a stage.
pub trait RenderStageFilter: Send + Sync {
    fn is_visible(&self, render_object: &RenderObject, view: &RenderView, view_stage: &RenderViewStage) -> bool;
}

/// A named rendering pass.
pub struct RenderStage {
    pub name: String,
    pub effect_slot_name: String,
    pub sort_mode: Option<Arc<dyn SortMode>>,
    pub filter: Option<Arc<dyn RenderStageFilter>>,
    output: RenderOutputDescription,
    base_output: RenderOutputDescription,
    output_validator: RenderOutputValidator,
    pub(crate) index: usize,
}

impl RenderStage {
    pub fn new(name: impl Into<String>, effect_slot_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            effect_slot_name: effect_slot_name.into(),
            sort_mode: None,
            filter: None,
            output: RenderOutputDescription::default(),
            base_output: RenderOutputDescription::default(),
            output_validator: RenderOutputValidator::default(),
            index: usize::MAX,
        }
    }

    #[must_use]
    pub fn with_sort_mode(mut self, sort_mode: Arc<dyn SortMode>) -> Self {
        self.sort_mode = Some(sort_mode);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn RenderStageFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: RenderOutputDescription) -> Self {
        self.set_output(output);
        self
    }

    pub fn set_output(&mut self, output: RenderOutputDescription) {
        self.base_output = output;
        self.output = self.output_validator.validate(&self.base_output);
    }

    /// Declares an extra render target written by every effect of the stage.
    pub fn add_render_target_extension(&mut self, extension: RenderTargetExtension) {
        self.output_validator.add(extension);
        self.output = self.output_validator.validate(&self.base_output);
    }

    /// Position in the render system's stage list.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Output including extension targets.
    #[inline]
    #[must_use]
    pub fn output(&self) -> &RenderOutputDescription {
        &self.output
    }

    #[inline]
    #[must_use]
    pub fn output_validator(&self) -> &RenderOutputValidator {
        &self.output_validator
    }
}

impl std::fmt::Debug for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStage")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("effect_slot_name", &self.effect_slot_name)
            .field("sorted", &self.sort_mode.is_some())
            .field("filtered", &self.filter.is_some())
            .field("output", &self.output)
            .finish()
    }
}

// ─── Stage Selectors ──────────────────────────────────────────────────────────

/// Decides which stages an object is active in, and with which effect.
pub trait RenderStageSelector: Send + Sync {
    fn process(&self, render_object: &mut RenderObject);
}

/// Activates one stage for every object in the selected render groups.
#[derive(Debug, Clone)]
pub struct SimpleGroupToRenderStageSelector {
    pub render_stage: usize,
    pub effect_name: Arc<str>,
    pub render_group: RenderGroupMask,
}

impl SimpleGroupToRenderStageSelector {
    pub fn new(render_stage: usize, effect_name: impl Into<Arc<str>>) -> Self {
        Self {
            render_stage,
            effect_name: effect_name.into(),
            render_group: RenderGroupMask::all(),
        }
    }
}

impl RenderStageSelector for SimpleGroupToRenderStageSelector {
    fn process(&self, render_object: &mut RenderObject) {
        if self.render_group.contains_group(render_object.render_group) {
            render_object.activate_stage(self.render_stage, self.effect_name.clone());
        }
    }
}
