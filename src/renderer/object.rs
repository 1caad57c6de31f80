//! Render Objects
//!
//! A [`RenderObject`] is the scene-facing description of one renderable
//! instance. Scene logic creates it with a typed payload (for example a
//! [`MeshRenderObject`](crate::renderer::features::mesh::MeshRenderObject)),
//! registers it with the [`RenderSystem`](crate::renderer::system::RenderSystem)
//! and mutates it between frames. The payload type decides which root render
//! feature claims the object.
//!
//! Per-frame node references live behind interior mutability so that
//! Extract can assign them from worker threads while objects are shared.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use glam::Vec3;
use parking_lot::Mutex;

use crate::renderer::nodes::{ObjectNodeReference, StaticObjectNodeReference};

slotmap::new_key_type! {
    /// Handle of a render object registered with a render system.
    pub struct RenderObjectKey;
}

/// Render objects registered with a render system.
pub type RenderObjects = slotmap::SlotMap<RenderObjectKey, RenderObject>;

static NEXT_RENDER_OBJECT_INDEX: AtomicU64 = AtomicU64::new(0);

// ─── Render Groups ────────────────────────────────────────────────────────────

/// One of 32 render groups an object can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderGroup(u8);

impl RenderGroup {
    pub const GROUP_0: Self = Self(0);
    pub const GROUP_1: Self = Self(1);

    #[must_use]
    pub fn new(index: u8) -> Self {
        debug_assert!(index < 32, "render group out of range: {index}");
        Self(index & 31)
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn mask(self) -> RenderGroupMask {
        RenderGroupMask::from_bits_retain(1u32 << self.0)
    }
}

bitflags! {
    /// Set of render groups, used by views and stage selectors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderGroupMask: u32 {
        const GROUP_0 = 1 << 0;
        const GROUP_1 = 1 << 1;
        const _ = !0;
    }
}

impl Default for RenderGroupMask {
    fn default() -> Self {
        Self::all()
    }
}

impl RenderGroupMask {
    #[inline]
    #[must_use]
    pub fn contains_group(self, group: RenderGroup) -> bool {
        self.intersects(group.mask())
    }
}

// ─── Stage Activation ─────────────────────────────────────────────────────────

/// Names the shader family an object wants for a render stage.
///
/// Two selectors are the same permutation family when their effect names
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectSelector {
    effect_name: Arc<str>,
}

impl EffectSelector {
    pub fn new(effect_name: impl Into<Arc<str>>) -> Self {
        Self {
            effect_name: effect_name.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn effect_name(&self) -> &str {
        &self.effect_name
    }
}

/// Per-stage activation of a render object. Active when it carries a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveRenderStage {
    pub effect_selector: Option<EffectSelector>,
}

impl ActiveRenderStage {
    #[must_use]
    pub fn new(effect_name: impl Into<Arc<str>>) -> Self {
        Self {
            effect_selector: Some(EffectSelector::new(effect_name)),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.effect_selector.is_some()
    }
}

// ─── Bounds ───────────────────────────────────────────────────────────────────

/// Axis-aligned bounds in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn from_center(center: Vec3, extent: Vec3) -> Self {
        Self {
            min: center - extent,
            max: center + extent,
        }
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

// ─── Render Object ────────────────────────────────────────────────────────────

/// A renderable instance with a typed payload.
pub struct RenderObject {
    pub enabled: bool,
    pub render_group: RenderGroup,
    pub bounding_box: BoundingBox,

    /// One entry per render stage, indexed by stage index.
    pub active_render_stages: Vec<ActiveRenderStage>,

    pub(crate) render_feature: Option<usize>,
    pub(crate) static_object_node: StaticObjectNodeReference,
    pub(crate) object_node: Mutex<ObjectNodeReference>,

    index: u64,
    state_sort_key: AtomicU32,

    data_type: TypeId,
    data_type_name: &'static str,
    data: Box<dyn Any + Send + Sync>,
}

impl RenderObject {
    pub fn new<T: Any + Send + Sync>(data: T) -> Self {
        Self {
            enabled: true,
            render_group: RenderGroup::default(),
            bounding_box: BoundingBox::default(),
            active_render_stages: Vec::new(),
            render_feature: None,
            static_object_node: StaticObjectNodeReference::INVALID,
            object_node: Mutex::new(ObjectNodeReference::INVALID),
            index: NEXT_RENDER_OBJECT_INDEX.fetch_add(1, Ordering::Relaxed),
            state_sort_key: AtomicU32::new(0),
            data_type: TypeId::of::<T>(),
            data_type_name: std::any::type_name::<T>(),
            data: Box::new(data),
        }
    }

    #[must_use]
    pub fn with_render_group(mut self, group: RenderGroup) -> Self {
        self.render_group = group;
        self
    }

    #[must_use]
    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = bounding_box;
        self
    }

    /// Activates `stage` with the given effect family.
    pub fn activate_stage(&mut self, stage: usize, effect_name: impl Into<Arc<str>>) {
        if self.active_render_stages.len() <= stage {
            self.active_render_stages
                .resize_with(stage + 1, ActiveRenderStage::default);
        }
        self.active_render_stages[stage] = ActiveRenderStage::new(effect_name);
    }

    /// Process-unique, monotonically increasing creation index.
    #[inline]
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Index of the root render feature that claimed this object.
    #[inline]
    #[must_use]
    pub fn render_feature(&self) -> Option<usize> {
        self.render_feature
    }

    #[inline]
    #[must_use]
    pub fn static_object_node(&self) -> StaticObjectNodeReference {
        self.static_object_node
    }

    /// Object node of the current frame, `INVALID` before Extract.
    #[must_use]
    pub fn object_node(&self) -> ObjectNodeReference {
        *self.object_node.lock()
    }

    /// Lower 16 bits identify the compiled effect, upper 16 are free for
    /// features (materials use them).
    #[inline]
    #[must_use]
    pub fn state_sort_key(&self) -> u32 {
        self.state_sort_key.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_state_sort_key(&self, key: u32) {
        self.state_sort_key.store(key, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn is_active_in(&self, stage: usize) -> bool {
        self.active_render_stages
            .get(stage)
            .is_some_and(ActiveRenderStage::is_active)
    }

    #[inline]
    #[must_use]
    pub fn data_type(&self) -> TypeId {
        self.data_type
    }

    #[inline]
    #[must_use]
    pub fn data_type_name(&self) -> &'static str {
        self.data_type_name
    }

    #[must_use]
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }

    pub(crate) fn ensure_stage_count(&mut self, count: usize) {
        if self.active_render_stages.len() < count {
            self.active_render_stages
                .resize_with(count, ActiveRenderStage::default);
        }
    }
}

impl std::fmt::Debug for RenderObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderObject")
            .field("index", &self.index)
            .field("type", &self.data_type_name)
            .field("enabled", &self.enabled)
            .field("render_feature", &self.render_feature)
            .field("static_object_node", &self.static_object_node)
            .finish_non_exhaustive()
    }
}
