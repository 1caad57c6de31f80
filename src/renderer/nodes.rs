//! Render Node Indices
//!
//! Every per-object record inside a root render feature is addressed by a
//! dense, zero-based index instead of a pointer:
//!
//! | Reference                    | Identifies                      | Lifetime          |
//! |------------------------------|---------------------------------|-------------------|
//! | [`StaticObjectNodeReference`]| object within its feature       | add → remove      |
//! | [`ObjectNodeReference`]      | object visible this frame       | one frame         |
//! | [`ViewObjectNodeReference`]  | (view, object)                  | one frame         |
//! | [`RenderNodeReference`]      | (view, stage, object): one draw | one frame         |
//! | [`EffectObjectNodeReference`]| render node with a live effect  | one frame         |
//!
//! Every reference has an `INVALID` sentinel. The static effect index of an
//! object's slot is `static_node * effect_slot_count + slot`.

use std::sync::Arc;

use crate::renderer::object::RenderObjectKey;
use crate::renderer::resource_group::ResourceGroup;

macro_rules! node_reference {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel for "no node".
            pub const INVALID: Self = Self(u32::MAX);

            #[inline]
            #[must_use]
            pub fn new(index: usize) -> Self {
                debug_assert!(index < u32::MAX as usize);
                Self(index as u32)
            }

            /// Raw index into the node array.
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            #[must_use]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

node_reference!(
    /// Stable identity of a render object inside one root render feature.
    StaticObjectNodeReference
);
node_reference!(
    /// Per-frame identity of a visible render object.
    ObjectNodeReference
);
node_reference!(
    /// Per-frame (view, object) pair.
    ViewObjectNodeReference
);
node_reference!(
    /// Per-frame (view, stage, object) triple; the unit of a draw call.
    RenderNodeReference
);
node_reference!(
    /// Per-frame render node that resolved a compiled effect.
    EffectObjectNodeReference
);

/// Object visible in at least one view this frame.
#[derive(Debug, Clone, Copy)]
pub struct ObjectNode {
    pub render_object: RenderObjectKey,
    pub static_object_node: StaticObjectNodeReference,
}

/// A render object as seen from one view.
#[derive(Debug, Clone, Copy)]
pub struct ViewObjectNode {
    pub render_object: RenderObjectKey,
    pub view: usize,
    pub object_node: ObjectNodeReference,
}

/// One draw of one object in one (view, stage).
#[derive(Debug, Clone)]
pub struct RenderNode {
    pub render_object: RenderObjectKey,
    pub static_object_node: StaticObjectNodeReference,
    pub view: usize,
    pub render_stage: usize,
    pub view_object_node: ViewObjectNodeReference,

    /// Static effect index (`static_node * slot_count + slot`) of the render
    /// effect driving this node, set during Prepare.
    pub render_effect: Option<usize>,
    pub effect_object_node: EffectObjectNodeReference,

    /// PerDraw resource group allocated for this frame.
    pub resources: Option<Arc<ResourceGroup>>,
}

impl RenderNode {
    #[must_use]
    pub fn new(
        render_object: RenderObjectKey,
        static_object_node: StaticObjectNodeReference,
        view: usize,
        render_stage: usize,
        view_object_node: ViewObjectNodeReference,
    ) -> Self {
        Self {
            render_object,
            static_object_node,
            view,
            render_stage,
            view_object_node,
            render_effect: None,
            effect_object_node: EffectObjectNodeReference::INVALID,
            resources: None,
        }
    }
}

/// Render node which resolved an effect this frame.
#[derive(Debug, Clone, Copy)]
pub struct EffectObjectNode {
    pub object_node: ObjectNodeReference,
}

/// Render node tagged with its owning feature, as stored in view lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderNodeFeatureReference {
    /// Index of the owning root render feature.
    pub root_render_feature: usize,
    pub render_node: RenderNodeReference,
    pub render_object: RenderObjectKey,
}
