//! Per-frame contexts handed to render features.

use std::time::Instant;

use crate::renderer::backend::CommandList;

/// Frame-wide values shared by every phase.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    /// Time the frame started; drives compile retry deadlines.
    pub now: Instant,
}

impl RenderContext {
    #[must_use]
    pub fn new() -> Self {
        Self::at(Instant::now())
    }

    #[must_use]
    pub fn at(now: Instant) -> Self {
        Self { now }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw-phase context: the frame context plus the command list being
/// recorded.
pub struct RenderDrawContext<'a> {
    pub render_context: RenderContext,
    pub command_list: &'a mut dyn CommandList,
}

impl<'a> RenderDrawContext<'a> {
    pub fn new(render_context: RenderContext, command_list: &'a mut dyn CommandList) -> Self {
        Self {
            render_context,
            command_list,
        }
    }
}
