//! Pipeline State
//!
//! Render features describe the GPU pipeline of a render node with a mutable
//! [`PipelineStateDescription`]. The description starts from defaults, is
//! filled from the effect and the stage output, then every registered
//! [`PipelineProcessor`] mutates it in registration order (last write wins).
//! The finished description is deduplicated by content in a
//! [`PipelineStateCache`].
//!
//! - [`description`]: the mutable description and its sub-states
//! - [`pipeline_key`]: hashable mirrors of `wgpu` state used as cache keys
//! - [`processors`]: the processor trait and stock processors
//! - [`cache`]: content-keyed pipeline state cache

pub mod cache;
pub mod description;
pub mod pipeline_key;
pub mod processors;

pub use cache::PipelineStateCache;
pub use description::{DepthStencilState, PipelineStateDescription, RasterizerState};
pub use pipeline_key::PipelineStateKey;
pub use processors::{
    PipelineProcessor, ShadowPipelineProcessor, TransparentPipelineProcessor,
    WireframePipelineProcessor,
};
