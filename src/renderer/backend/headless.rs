//! Headless recording backend.
//!
//! This backend doesn't talk to a GPU. It hands out unique handles, counts
//! every object it creates and records command lists, so the frame pipeline
//! can be run and inspected without graphics hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::renderer::backend::{
    CommandList, CompiledCommandList, DescriptorSetLayout, DrawCommand, GpuHandle, GraphicsBackend,
    PipelineState, RenderTargetState, RootSignature, ScissorRect, TextureHandle, Viewport,
};
use crate::renderer::effect::reflection::{DescriptorSetLayoutBuilder, EffectDescriptorSetReflection};
use crate::renderer::pipeline::PipelineStateDescription;
use crate::renderer::resource_group::ResourceGroup;

static NEXT_COMMAND_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// One recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Reset,
    ClearState,
    SetRenderTargets {
        depth_stencil: Option<TextureHandle>,
        render_targets: Vec<TextureHandle>,
    },
    SetViewports(Vec<Viewport>),
    SetScissorRectangles(Vec<ScissorRect>),
    SetPipelineState(GpuHandle),
    /// Resource group ids by descriptor set index.
    SetResourceGroups(Vec<Option<u64>>),
    Draw(DrawCommand),
}

/// Closed headless command list.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommandList {
    pub id: u64,
    pub commands: Vec<RecordedCommand>,
}

impl RecordedCommandList {
    /// Draw commands in recording order.
    pub fn draws(&self) -> impl Iterator<Item = DrawCommand> + '_ {
        self.commands.iter().filter_map(|c| match c {
            RecordedCommand::Draw(draw) => Some(*draw),
            _ => None,
        })
    }
}

/// Recording command list.
#[derive(Debug)]
pub struct HeadlessCommandList {
    id: u64,
    commands: Vec<RecordedCommand>,
    state: RenderTargetState,
}

impl HeadlessCommandList {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_COMMAND_LIST_ID.fetch_add(1, Ordering::Relaxed),
            commands: Vec::new(),
            state: RenderTargetState::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Commands recorded since the last reset or close.
    #[must_use]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn draws(&self) -> impl Iterator<Item = DrawCommand> + '_ {
        self.commands.iter().filter_map(|c| match c {
            RecordedCommand::Draw(draw) => Some(*draw),
            _ => None,
        })
    }
}

impl Default for HeadlessCommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandList for HeadlessCommandList {
    fn reset(&mut self) {
        self.commands.clear();
        self.commands.push(RecordedCommand::Reset);
    }

    fn clear_state(&mut self) {
        self.state = RenderTargetState::default();
        self.commands.push(RecordedCommand::ClearState);
    }

    fn set_render_targets(&mut self, depth_stencil: Option<TextureHandle>, render_targets: &[TextureHandle]) {
        self.state.depth_stencil = depth_stencil;
        self.state.render_targets = render_targets.iter().copied().collect();
        self.commands.push(RecordedCommand::SetRenderTargets {
            depth_stencil,
            render_targets: render_targets.to_vec(),
        });
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.state.viewports = viewports.iter().copied().collect();
        self.commands.push(RecordedCommand::SetViewports(viewports.to_vec()));
    }

    fn set_scissor_rectangles(&mut self, scissors: &[ScissorRect]) {
        self.state.scissors = scissors.iter().copied().collect();
        self.commands
            .push(RecordedCommand::SetScissorRectangles(scissors.to_vec()));
    }

    fn render_target_state(&self) -> RenderTargetState {
        self.state.clone()
    }

    fn set_pipeline_state(&mut self, pipeline_state: &Arc<PipelineState>) {
        self.commands
            .push(RecordedCommand::SetPipelineState(pipeline_state.handle));
    }

    fn set_resource_groups(&mut self, resource_groups: &[Option<Arc<ResourceGroup>>]) {
        self.commands.push(RecordedCommand::SetResourceGroups(
            resource_groups
                .iter()
                .map(|group| group.as_ref().map(|g| g.id()))
                .collect(),
        ));
    }

    fn draw(&mut self, command: DrawCommand) {
        self.commands.push(RecordedCommand::Draw(command));
    }

    fn close(&mut self) -> CompiledCommandList {
        log::trace!(
            "HeadlessBackend: closing command list #{} ({} commands)",
            self.id,
            self.commands.len()
        );
        CompiledCommandList::new(RecordedCommandList {
            id: self.id,
            commands: std::mem::take(&mut self.commands),
        })
    }
}

/// Counts of created backend objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub descriptor_set_layouts: usize,
    pub root_signatures: usize,
    pub pipeline_states: usize,
    pub command_lists: usize,
}

/// Recording backend.
#[derive(Debug)]
pub struct HeadlessBackend {
    deferred: bool,
    next_handle: AtomicU64,
    descriptor_set_layouts: AtomicUsize,
    root_signatures: AtomicUsize,
    pipeline_states: AtomicUsize,
    command_lists: AtomicUsize,
    submissions: Mutex<Vec<Vec<RecordedCommandList>>>,
}

impl HeadlessBackend {
    /// Backend without deferred command-list support.
    #[must_use]
    pub fn new() -> Self {
        Self::with_deferred(false)
    }

    #[must_use]
    pub fn with_deferred(deferred: bool) -> Self {
        Self {
            deferred,
            next_handle: AtomicU64::new(1),
            descriptor_set_layouts: AtomicUsize::new(0),
            root_signatures: AtomicUsize::new(0),
            pipeline_states: AtomicUsize::new(0),
            command_lists: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeadlessStats {
        HeadlessStats {
            descriptor_set_layouts: self.descriptor_set_layouts.load(Ordering::Acquire),
            root_signatures: self.root_signatures.load(Ordering::Acquire),
            pipeline_states: self.pipeline_states.load(Ordering::Acquire),
            command_lists: self.command_lists.load(Ordering::Acquire),
        }
    }

    /// Every `execute_command_lists` call so far, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<Vec<RecordedCommandList>> {
        self.submissions.lock().clone()
    }

    pub fn take_submissions(&self) -> Vec<Vec<RecordedCommandList>> {
        std::mem::take(&mut *self.submissions.lock())
    }

    fn next_handle(&self) -> GpuHandle {
        GpuHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless Backend"
    }

    fn supports_deferred_command_lists(&self) -> bool {
        self.deferred
    }

    fn create_descriptor_set_layout(&self, builder: &DescriptorSetLayoutBuilder) -> Arc<DescriptorSetLayout> {
        self.descriptor_set_layouts.fetch_add(1, Ordering::AcqRel);
        let handle = self.next_handle();
        log::trace!(
            "HeadlessBackend: creating descriptor set layout {handle:?} ({} entries)",
            builder.entries().len()
        );
        Arc::new(DescriptorSetLayout::new(handle, builder))
    }

    fn create_root_signature(&self, reflection: &EffectDescriptorSetReflection) -> Arc<RootSignature> {
        self.root_signatures.fetch_add(1, Ordering::AcqRel);
        let handle = self.next_handle();
        log::trace!("HeadlessBackend: creating root signature {handle:?}");
        Arc::new(RootSignature {
            handle,
            descriptor_set_count: reflection.layouts.len(),
        })
    }

    fn create_pipeline_state(&self, description: &PipelineStateDescription) -> Arc<PipelineState> {
        self.pipeline_states.fetch_add(1, Ordering::AcqRel);
        let handle = self.next_handle();
        log::trace!("HeadlessBackend: creating pipeline state {handle:?}");
        Arc::new(PipelineState {
            handle,
            description: description.clone(),
        })
    }

    fn create_command_list(&self) -> Box<dyn CommandList> {
        self.command_lists.fetch_add(1, Ordering::AcqRel);
        Box::new(HeadlessCommandList::new())
    }

    fn execute_command_lists(&self, command_lists: Vec<CompiledCommandList>) {
        let recorded: Vec<RecordedCommandList> = command_lists
            .into_iter()
            .filter_map(CompiledCommandList::into_inner::<RecordedCommandList>)
            .collect();
        log::trace!(
            "HeadlessBackend: executing {} command lists",
            recorded.len()
        );
        self.submissions.lock().push(recorded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_hands_over_commands() {
        let mut list = HeadlessCommandList::new();
        list.set_viewports(&[Viewport::new(64.0, 64.0)]);
        list.draw(DrawCommand {
            object_index: 3,
            view: 0,
            render_stage: 1,
        });

        let closed = list.close().into_inner::<RecordedCommandList>().unwrap();
        assert_eq!(closed.draws().count(), 1);
        assert!(list.commands().is_empty());
        assert_eq!(list.render_target_state().viewports.len(), 1);
    }

    #[test]
    fn render_target_state_replays() {
        let mut source = HeadlessCommandList::new();
        source.set_render_targets(Some(TextureHandle(1)), &[TextureHandle(2)]);
        source.set_viewports(&[Viewport::new(32.0, 16.0)]);
        let state = source.render_target_state();

        let mut target = HeadlessCommandList::new();
        target.set_render_target_state(&state);
        assert_eq!(target.render_target_state(), state);
    }
}
