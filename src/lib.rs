#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod renderer;
pub mod utils;

pub use errors::{EffectCompileError, RenderError, Result};
pub use renderer::{
    MeshRenderFeature, MeshRenderObject, RenderContext, RenderObject, RenderStage, RenderSystem,
    RenderSystemSettings, RenderView, RootEffectRenderFeature, RootRenderFeature,
};
