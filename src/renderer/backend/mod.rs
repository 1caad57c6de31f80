//! GPU Backend Abstraction
//!
//! The render core never talks to a graphics API directly. It creates GPU
//! objects and records commands through two traits:
//!
//! - [`GraphicsBackend`]: object creation, command-list creation and
//!   submission, capability queries
//! - [`CommandList`]: command recording on one thread
//!
//! GPU objects are returned as plain handles ([`DescriptorSetLayout`],
//! [`RootSignature`], [`PipelineState`]) shared through `Arc`.
//!
//! # Available Backends
//!
//! - [`headless`]: records every call for tests and tooling; can pretend to
//!   support deferred command lists

pub mod headless;

use std::any::Any;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::renderer::effect::reflection::{DescriptorSetLayoutBuilder, EffectDescriptorSetReflection};
use crate::renderer::pipeline::PipelineStateDescription;
use crate::renderer::resource_group::ResourceGroup;

pub use headless::{HeadlessBackend, HeadlessCommandList, RecordedCommand, RecordedCommandList};

/// Opaque backend object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(pub u64);

/// Handle of a render target or depth-stencil texture view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

// ─── GPU Objects ──────────────────────────────────────────────────────────────

/// Backend descriptor set layout.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    pub handle: GpuHandle,
    hash: u64,
    entry_count: usize,
}

impl DescriptorSetLayout {
    #[must_use]
    pub fn new(handle: GpuHandle, builder: &DescriptorSetLayoutBuilder) -> Self {
        Self {
            handle,
            hash: builder.hash(),
            entry_count: builder.entries().len(),
        }
    }

    /// Content hash of the builder this layout was created from.
    #[inline]
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}

/// Backend root signature (pipeline layout).
#[derive(Debug)]
pub struct RootSignature {
    pub handle: GpuHandle,
    pub descriptor_set_count: usize,
}

/// Finalized, immutable pipeline state object.
#[derive(Debug)]
pub struct PipelineState {
    pub handle: GpuHandle,
    pub description: PipelineStateDescription,
}

// ─── Render Target State ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Output state a command list does not share with other command lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderTargetState {
    pub depth_stencil: Option<TextureHandle>,
    pub render_targets: SmallVec<[TextureHandle; 4]>,
    pub viewports: SmallVec<[Viewport; 1]>,
    pub scissors: SmallVec<[ScissorRect; 1]>,
}

/// One draw call emitted by a render feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    /// Creation index of the render object.
    pub object_index: u64,
    pub view: usize,
    pub render_stage: usize,
}

/// Closed command list ready for submission. The payload is backend
/// specific.
pub struct CompiledCommandList(Box<dyn Any + Send>);

impl CompiledCommandList {
    pub fn new<T: Any + Send>(payload: T) -> Self {
        Self(Box::new(payload))
    }

    /// Recovers the backend payload.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.0.downcast().ok().map(|b| *b)
    }
}

impl std::fmt::Debug for CompiledCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCommandList").finish_non_exhaustive()
    }
}

// ─── Traits ───────────────────────────────────────────────────────────────────

/// Command recording on one thread.
pub trait CommandList: Send {
    /// Starts a new recording after [`close`](Self::close).
    fn reset(&mut self);

    /// Drops bound state (targets, viewports, pipeline, resources).
    fn clear_state(&mut self);

    fn set_render_targets(&mut self, depth_stencil: Option<TextureHandle>, render_targets: &[TextureHandle]);

    fn set_viewports(&mut self, viewports: &[Viewport]);

    fn set_scissor_rectangles(&mut self, scissors: &[ScissorRect]);

    /// Currently bound output state.
    fn render_target_state(&self) -> RenderTargetState;

    fn set_pipeline_state(&mut self, pipeline_state: &Arc<PipelineState>);

    /// Binds resource groups by descriptor set index. `None` leaves a set
    /// unbound.
    fn set_resource_groups(&mut self, resource_groups: &[Option<Arc<ResourceGroup>>]);

    fn draw(&mut self, command: DrawCommand);

    /// Ends recording and hands back the commands for submission.
    fn close(&mut self) -> CompiledCommandList;

    /// Re-applies a captured output state.
    fn set_render_target_state(&mut self, state: &RenderTargetState) {
        self.set_render_targets(state.depth_stencil, &state.render_targets);
        self.set_viewports(&state.viewports);
        if !state.scissors.is_empty() {
            self.set_scissor_rectangles(&state.scissors);
        }
    }
}

/// Graphics device facade.
pub trait GraphicsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether command lists can be recorded on worker threads and submitted
    /// together.
    fn supports_deferred_command_lists(&self) -> bool;

    fn create_descriptor_set_layout(&self, builder: &DescriptorSetLayoutBuilder) -> Arc<DescriptorSetLayout>;

    fn create_root_signature(&self, reflection: &EffectDescriptorSetReflection) -> Arc<RootSignature>;

    fn create_pipeline_state(&self, description: &PipelineStateDescription) -> Arc<PipelineState>;

    fn create_command_list(&self) -> Box<dyn CommandList>;

    /// Submits closed command lists in order.
    fn execute_command_lists(&self, command_lists: Vec<CompiledCommandList>);
}
