//! Concrete render features.
//!
//! - [`mesh`]: meshes with material-driven permutations and state sort keys

pub mod mesh;

pub use mesh::{MeshFeatureHooks, MeshRenderFeature, MeshRenderObject, MeshTransparentRenderStageSelector};
