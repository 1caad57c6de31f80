//! Mesh Render Feature
//!
//! [`MeshRenderFeature`] is the effect render feature for [`MeshRenderObject`]
//! payloads. Per used effect it:
//!
//! - skips the slot while the mesh material is still loading;
//! - validates the skinning and velocity-output permutation flags;
//! - stores the material hash in the upper 16 bits of the state sort key
//!   (the effect owns the lower 16).
//!
//! [`MeshTransparentRenderStageSelector`] routes each mesh to the opaque or
//! the transparent stage depending on its material.

use std::sync::{Arc, LazyLock};

use crate::renderer::effect::RenderEffect;
use crate::renderer::feature::effect::{EffectFeatureHooks, RootEffectRenderFeature};
use crate::renderer::object::{RenderGroupMask, RenderObject};
use crate::renderer::parameters::ParameterKey;
use crate::renderer::stage::RenderStageSelector;

/// Permutation flag: vertices are skinned.
pub static SKINNED: LazyLock<ParameterKey> = LazyLock::new(|| ParameterKey::new("Mesh.Skinned"));

/// Permutation flag: the effect writes screen-space velocity.
pub static VELOCITY_OUTPUT: LazyLock<ParameterKey> = LazyLock::new(|| ParameterKey::new("Mesh.VelocityOutput"));

/// Render object payload of a mesh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRenderObject {
    pub skinned: bool,
    pub velocity_output: bool,
    /// Blended material; selects the transparent stage.
    pub transparent: bool,
    /// `false` while the material's resources are loading.
    pub material_ready: bool,
    pub material_hash: u32,
}

impl Default for MeshRenderObject {
    fn default() -> Self {
        Self {
            skinned: false,
            velocity_output: false,
            transparent: false,
            material_ready: true,
            material_hash: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeshFeatureHooks;

impl EffectFeatureHooks for MeshFeatureHooks {
    fn prepare_effect_permutations(&self, object: &RenderObject, _slot: usize, effect: &mut RenderEffect) {
        let Some(mesh) = object.data::<MeshRenderObject>() else {
            return;
        };
        if !mesh.material_ready {
            effect.effect_validator.should_skip = true;
            return;
        }

        effect.effect_validator.validate_parameter(*SKINNED, mesh.skinned);
        effect
            .effect_validator
            .validate_parameter(*VELOCITY_OUTPUT, mesh.velocity_output);

        object.set_state_sort_key((object.state_sort_key() & 0xFFFF) | (mesh.material_hash << 16));
    }
}

pub type MeshRenderFeature = RootEffectRenderFeature<MeshFeatureHooks>;

impl MeshRenderFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::with_hooks::<MeshRenderObject>("MeshRenderFeature", MeshFeatureHooks)
    }
}

impl Default for MeshRenderFeature {
    fn default() -> Self {
        Self::new()
    }
}

/// Activates the opaque or the transparent stage of a mesh depending on its
/// material.
#[derive(Debug, Clone)]
pub struct MeshTransparentRenderStageSelector {
    pub opaque_stage: Option<usize>,
    pub transparent_stage: Option<usize>,
    pub effect_name: Arc<str>,
    pub render_group: RenderGroupMask,
}

impl MeshTransparentRenderStageSelector {
    pub fn new(opaque_stage: usize, transparent_stage: usize, effect_name: impl Into<Arc<str>>) -> Self {
        Self {
            opaque_stage: Some(opaque_stage),
            transparent_stage: Some(transparent_stage),
            effect_name: effect_name.into(),
            render_group: RenderGroupMask::all(),
        }
    }
}

impl RenderStageSelector for MeshTransparentRenderStageSelector {
    fn process(&self, render_object: &mut RenderObject) {
        if !self.render_group.contains_group(render_object.render_group) {
            return;
        }
        let transparent = render_object
            .data::<MeshRenderObject>()
            .is_some_and(|mesh| mesh.transparent);
        let stage = if transparent { self.transparent_stage } else { self.opaque_stage };
        if let Some(stage) = stage {
            render_object.activate_stage(stage, self.effect_name.clone());
        }
    }
}
