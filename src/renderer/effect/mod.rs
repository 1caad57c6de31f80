//! Effect Permutations
//!
//! - [`validator`]: positional diff of permutation parameters
//! - [`render_effect`]: per (object, slot) compile state machine
//! - [`compiler`]: compiler service interface and pending compiles
//! - [`reflection`]: resource reflection and resource group layouts

pub mod compiler;
pub mod reflection;
pub mod render_effect;
pub mod validator;

pub use compiler::{
    Effect, EffectBytecode, EffectCompiler, EffectCompletion, EffectId, EffectLoad, PendingEffect,
};
pub use reflection::{
    EffectConstantBuffer, EffectReflection, EffectResourceBinding, EffectValueMember,
    LogicalGroup, RenderEffectReflection, ResourceClass,
};
pub use render_effect::{RenderEffect, RenderEffectState};
pub use validator::EffectValidator;
