//! Render Pipeline Core
//!
//! - [`system`]: the frame driver (Reset → Collect → Extract → Prepare → Draw → Flush)
//! - [`feature`]: root render features and the effect feature
//! - [`features`]: concrete features (meshes)
//! - [`object`], [`view`], [`stage`]: what is rendered, from where, in which pass
//! - [`nodes`]: dense per-frame node indices
//! - [`data`]: per-node data arrays owned by features
//! - [`effect`]: permutation validation, the compile state machine, reflection
//! - [`parameters`]: parameter keys and collections
//! - [`resource_group`]: per-frame resource group allocation
//! - [`pipeline`]: pipeline state descriptions, processors and cache
//! - [`sort`]: render node sort modes
//! - [`backend`]: graphics backend seam and a headless implementation
//! - [`settings`], [`context`]: configuration and per-frame contexts

pub mod backend;
pub mod context;
pub mod data;
pub mod effect;
pub mod feature;
pub mod features;
pub mod nodes;
pub mod object;
pub mod parameters;
pub mod pipeline;
pub mod resource_group;
pub mod settings;
pub mod sort;
pub mod stage;
pub mod system;
pub mod view;

pub use backend::{CommandList, GraphicsBackend, HeadlessBackend};
pub use context::{RenderContext, RenderDrawContext};
pub use data::{DataType, RenderDataHolder, RenderDataKey};
pub use effect::{Effect, EffectCompiler, EffectLoad, EffectValidator, RenderEffect, RenderEffectState};
pub use feature::effect::{EffectFeatureHooks, RootEffectRenderFeature};
pub use feature::{FeatureContext, RenderFeatureCore, RootRenderFeature};
pub use features::{MeshRenderFeature, MeshRenderObject, MeshTransparentRenderStageSelector};
pub use nodes::{
    EffectObjectNodeReference, ObjectNodeReference, RenderNodeFeatureReference, RenderNodeReference,
    StaticObjectNodeReference, ViewObjectNodeReference,
};
pub use object::{RenderGroup, RenderGroupMask, RenderObject, RenderObjectKey};
pub use parameters::{ParameterCollection, ParameterKey, ParameterValue};
pub use pipeline::{PipelineProcessor, PipelineStateDescription};
pub use settings::{DrawDispatch, RenderSystemSettings};
pub use sort::{BackToFrontSortMode, FrontToBackSortMode, SortKey, SortMode, StateChangeSortMode};
pub use stage::{RenderStage, RenderStageFilter, RenderStageSelector, SimpleGroupToRenderStageSelector};
pub use system::RenderSystem;
pub use view::{RenderView, RenderViewStage};
