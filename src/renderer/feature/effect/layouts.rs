//! Layout caches of the effect render feature.
//!
//! ```text
//!  Effect ──(EffectId)──► instantiated_effects ──► RenderEffectReflection
//!                                                     │
//!        ResourceGroupDescription.hash ⊕ state ──► frame_layouts / view_layouts
//!        DescriptorSetLayoutBuilder.hash       ──► descriptor_set_layouts
//! ```
//!
//! Every cache is insert-if-absent under its write lock: the read lock is
//! tried first, a miss re-checks and builds while holding the write lock, so
//! a key is built exactly once and never published half-built.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::renderer::backend::{DescriptorSetLayout, GraphicsBackend};
use crate::renderer::effect::reflection::{
    DescriptorSetLayoutBuilder, EffectDescriptorSetReflection, EffectResourceGroupLayout,
    FallbackLayouts, FrameResourceGroupLayout, RenderEffectReflection, ResourceGroupDescription,
    ResourceGroupLayout, ViewResourceGroupLayout,
};
use crate::renderer::effect::{Effect, EffectId, RenderEffectState};
use crate::renderer::parameters::ParameterKey;
use crate::renderer::resource_group::ResourceGroupEntry;

/// Descriptor set slot of the PerFrame group.
pub const PER_FRAME: usize = 0;
/// Descriptor set slot of the PerView group.
pub const PER_VIEW: usize = 1;
/// Descriptor set slot of the PerDraw group.
pub const PER_DRAW: usize = 2;

/// Names of the descriptor sets every effect feature binds itself.
pub const WELL_KNOWN_DESCRIPTOR_SETS: [&str; 3] = ["PerFrame", "PerView", "PerDraw"];

/// Slot of a constant-buffer variable resolved in every layout of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantBufferOffsetReference(usize);

impl ConstantBufferOffsetReference {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Slot of a named logical group resolved in every layout of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalGroupReference(usize);

impl LogicalGroupReference {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

type EffectNotification<'a> = Option<&'a (dyn Fn(&Effect, &RenderEffectReflection) + Send + Sync)>;

fn layout_cache_hash(description_hash: u64, state: RenderEffectState) -> u64 {
    let mut hasher = xxhash_rust::xxh3::Xxh3::new();
    description_hash.hash(&mut hasher);
    state.hash(&mut hasher);
    hasher.finish()
}

/// Descriptor set slots, offset slots and layout caches.
pub struct EffectLayouts {
    descriptor_set_slots: Vec<Arc<str>>,

    frame_cbuffer_offset_slots: Vec<ParameterKey>,
    view_cbuffer_offset_slots: Vec<ParameterKey>,
    draw_cbuffer_offset_slots: Vec<ParameterKey>,
    view_logical_groups: Vec<Arc<str>>,
    draw_logical_groups: Vec<Arc<str>>,

    instantiated_effects: RwLock<FxHashMap<EffectId, Arc<RenderEffectReflection>>>,
    frame_layouts: RwLock<FxHashMap<u64, Arc<FrameResourceGroupLayout>>>,
    view_layouts: RwLock<FxHashMap<u64, Arc<ViewResourceGroupLayout>>>,
    descriptor_set_layouts: RwLock<FxHashMap<u64, Arc<DescriptorSetLayout>>>,
}

impl Default for EffectLayouts {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectLayouts {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor_set_slots: WELL_KNOWN_DESCRIPTOR_SETS.iter().map(|&name| name.into()).collect(),
            frame_cbuffer_offset_slots: Vec::new(),
            view_cbuffer_offset_slots: Vec::new(),
            draw_cbuffer_offset_slots: Vec::new(),
            view_logical_groups: Vec::new(),
            draw_logical_groups: Vec::new(),
            instantiated_effects: RwLock::default(),
            frame_layouts: RwLock::default(),
            view_layouts: RwLock::default(),
            descriptor_set_layouts: RwLock::default(),
        }
    }

    // ─── Slots ───────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn descriptor_set_slots(&self) -> &[Arc<str>] {
        &self.descriptor_set_slots
    }

    #[must_use]
    pub fn descriptor_set_slot(&self, name: &str) -> Option<usize> {
        self.descriptor_set_slots.iter().position(|slot| &**slot == name)
    }

    pub fn get_or_create_descriptor_set_slot(&mut self, name: &str) -> usize {
        if let Some(slot) = self.descriptor_set_slot(name) {
            return slot;
        }
        self.descriptor_set_slots.push(name.into());
        self.descriptor_set_slots.len() - 1
    }

    pub fn create_frame_cbuffer_offset_slot(&mut self, variable: ParameterKey) -> ConstantBufferOffsetReference {
        let slot = self.frame_cbuffer_offset_slots.len();
        self.frame_cbuffer_offset_slots.push(variable);
        for layout in self.frame_layouts.read().values() {
            layout.resolve_cbuffer_offset(slot, variable);
        }
        ConstantBufferOffsetReference(slot)
    }

    pub fn create_view_cbuffer_offset_slot(&mut self, variable: ParameterKey) -> ConstantBufferOffsetReference {
        let slot = self.view_cbuffer_offset_slots.len();
        self.view_cbuffer_offset_slots.push(variable);
        for layout in self.view_layouts.read().values() {
            layout.resolve_cbuffer_offset(slot, variable);
        }
        ConstantBufferOffsetReference(slot)
    }

    pub fn create_draw_cbuffer_offset_slot(&mut self, variable: ParameterKey) -> ConstantBufferOffsetReference {
        let slot = self.draw_cbuffer_offset_slots.len();
        self.draw_cbuffer_offset_slots.push(variable);
        for reflection in self.instantiated_effects.read().values() {
            if let Some(layout) = &reflection.per_draw_layout {
                layout.resolve_cbuffer_offset(slot, variable);
            }
        }
        ConstantBufferOffsetReference(slot)
    }

    pub fn create_view_logical_group(&mut self, name: &str) -> LogicalGroupReference {
        let index = self.view_logical_groups.len();
        self.view_logical_groups.push(name.into());
        for layout in self.view_layouts.read().values() {
            layout.resolve_logical_group(index, name);
        }
        LogicalGroupReference(index)
    }

    pub fn create_draw_logical_group(&mut self, name: &str) -> LogicalGroupReference {
        let index = self.draw_logical_groups.len();
        self.draw_logical_groups.push(name.into());
        for reflection in self.instantiated_effects.read().values() {
            if let Some(layout) = &reflection.per_draw_layout {
                layout.resolve_logical_group(index, name);
            }
        }
        LogicalGroupReference(index)
    }

    // ─── Layouts ─────────────────────────────────────────────────────────────────

    /// Backend layout shared by every builder with the same content hash.
    pub fn create_unique_descriptor_set_layout(
        &self,
        backend: &dyn GraphicsBackend,
        builder: &DescriptorSetLayoutBuilder,
    ) -> Arc<DescriptorSetLayout> {
        let hash = builder.hash();
        if let Some(layout) = self.descriptor_set_layouts.read().get(&hash) {
            return layout.clone();
        }
        self.descriptor_set_layouts
            .write()
            .entry(hash)
            .or_insert_with(|| backend.create_descriptor_set_layout(builder))
            .clone()
    }

    fn build_layout(
        backend: &dyn GraphicsBackend,
        description: &ResourceGroupDescription,
        state: RenderEffectState,
        hash: u64,
        cbuffer_offset_slots: &[ParameterKey],
        logical_groups: &[Arc<str>],
    ) -> EffectResourceGroupLayout {
        let descriptor_set_layout = backend.create_descriptor_set_layout(&description.descriptor_set_layout);
        let layout = EffectResourceGroupLayout::new(
            ResourceGroupLayout::new(description, descriptor_set_layout),
            state,
            hash,
        );
        for (slot, variable) in cbuffer_offset_slots.iter().enumerate() {
            layout.resolve_cbuffer_offset(slot, *variable);
        }
        for (index, name) in logical_groups.iter().enumerate() {
            layout.resolve_logical_group(index, name);
        }
        layout
    }

    /// PerFrame layout shared by every description with the same content
    /// and effect state.
    pub fn create_frame_resource_group_layout(
        &self,
        backend: &dyn GraphicsBackend,
        description: &ResourceGroupDescription,
        state: RenderEffectState,
    ) -> Arc<FrameResourceGroupLayout> {
        let hash = layout_cache_hash(description.hash, state);
        if let Some(layout) = self.frame_layouts.read().get(&hash) {
            return layout.clone();
        }
        self.frame_layouts
            .write()
            .entry(hash)
            .or_insert_with(|| {
                log::debug!("EffectLayouts: new PerFrame layout {hash:016x} ({state:?})");
                let base = Self::build_layout(
                    backend,
                    description,
                    state,
                    hash,
                    &self.frame_cbuffer_offset_slots,
                    &[],
                );
                Arc::new(FrameResourceGroupLayout {
                    base,
                    entry: ResourceGroupEntry::new(hash),
                })
            })
            .clone()
    }

    /// PerView layout shared by every description with the same content
    /// and effect state.
    pub fn create_view_resource_group_layout(
        &self,
        backend: &dyn GraphicsBackend,
        description: &ResourceGroupDescription,
        state: RenderEffectState,
    ) -> Arc<ViewResourceGroupLayout> {
        let hash = layout_cache_hash(description.hash, state);
        if let Some(layout) = self.view_layouts.read().get(&hash) {
            return layout.clone();
        }
        self.view_layouts
            .write()
            .entry(hash)
            .or_insert_with(|| {
                log::debug!("EffectLayouts: new PerView layout {hash:016x} ({state:?})");
                let base = Self::build_layout(
                    backend,
                    description,
                    state,
                    hash,
                    &self.view_cbuffer_offset_slots,
                    &self.view_logical_groups,
                );
                Arc::new(ViewResourceGroupLayout::new(base, 0))
            })
            .clone()
    }

    /// PerDraw layout, private to one reflection.
    pub fn create_draw_resource_group_layout(
        &self,
        backend: &dyn GraphicsBackend,
        description: &ResourceGroupDescription,
        state: RenderEffectState,
    ) -> Arc<EffectResourceGroupLayout> {
        Arc::new(Self::build_layout(
            backend,
            description,
            state,
            layout_cache_hash(description.hash, state),
            &self.draw_cbuffer_offset_slots,
            &self.draw_logical_groups,
        ))
    }

    // ─── Reflections ─────────────────────────────────────────────────────────────

    /// Reflection of `effect`, built on first use. `on_created` runs once per
    /// new reflection.
    pub fn instantiate(
        &self,
        backend: &dyn GraphicsBackend,
        effect: &Effect,
        state: RenderEffectState,
        on_created: EffectNotification<'_>,
    ) -> Arc<RenderEffectReflection> {
        if let Some(reflection) = self.instantiated_effects.read().get(&effect.id()) {
            return reflection.clone();
        }

        let mut instantiated = self.instantiated_effects.write();
        if let Some(reflection) = instantiated.get(&effect.id()) {
            return reflection.clone();
        }

        let bytecode = effect.bytecode();
        let descriptor_reflection = EffectDescriptorSetReflection::new(
            &bytecode.reflection,
            &self.descriptor_set_slots,
            WELL_KNOWN_DESCRIPTOR_SETS[PER_FRAME],
        );
        let resource_group_descriptions: Vec<Option<ResourceGroupDescription>> = descriptor_reflection
            .layouts
            .iter()
            .map(|set| {
                set.layout.as_ref().map(|layout| {
                    let constant_buffer = bytecode
                        .reflection
                        .constant_buffers
                        .iter()
                        .find(|cb| cb.name == set.name)
                        .cloned();
                    ResourceGroupDescription::new(layout.clone(), constant_buffer)
                })
            })
            .collect();

        let description = |slot: usize| resource_group_descriptions.get(slot).and_then(Option::as_ref);
        let per_draw_layout = description(PER_DRAW)
            .map(|d| self.create_draw_resource_group_layout(backend, d, state));
        let per_frame_layout = description(PER_FRAME)
            .map(|d| self.create_frame_resource_group_layout(backend, d, state));
        let per_view_layout = description(PER_VIEW)
            .map(|d| self.create_view_resource_group_layout(backend, d, state));

        let reflection = Arc::new(RenderEffectReflection {
            root_signature: Some(backend.create_root_signature(&descriptor_reflection)),
            descriptor_reflection,
            resource_group_descriptions,
            per_frame_layout,
            per_view_layout,
            per_draw_layout,
            fallback: OnceLock::new(),
        });

        log::debug!(
            "EffectLayouts: instantiated effect '{}' #{} ({} descriptor sets)",
            effect.name(),
            effect.id().raw(),
            reflection.descriptor_reflection.layouts.len()
        );
        instantiated.insert(effect.id(), reflection.clone());
        drop(instantiated);

        if let Some(callback) = on_created {
            callback(effect, &reflection);
        }
        reflection
    }

    /// Layouts of every descriptor set that is not PerFrame, PerView or
    /// PerDraw, built once per reflection.
    pub fn fallback_layouts<'r>(
        &self,
        backend: &dyn GraphicsBackend,
        reflection: &'r RenderEffectReflection,
    ) -> &'r FallbackLayouts {
        reflection.fallback.get_or_init(|| {
            let mut layouts = Vec::new();
            let mut mapping = Vec::new();
            for (index, set) in reflection.descriptor_reflection.layouts.iter().enumerate() {
                if WELL_KNOWN_DESCRIPTOR_SETS.contains(&&*set.name) {
                    continue;
                }
                let layout = reflection
                    .resource_group_descriptions
                    .get(index)
                    .and_then(Option::as_ref)
                    .map(|description| {
                        let descriptor_set_layout = self
                            .create_unique_descriptor_set_layout(backend, &description.descriptor_set_layout);
                        Arc::new(ResourceGroupLayout::new(description, descriptor_set_layout))
                    });
                layouts.push(layout);
                mapping.push(index);
            }
            FallbackLayouts { layouts, mapping }
        })
    }

    #[must_use]
    pub fn instantiated_effect_count(&self) -> usize {
        self.instantiated_effects.read().len()
    }

    #[must_use]
    pub fn frame_layout_count(&self) -> usize {
        self.frame_layouts.read().len()
    }

    #[must_use]
    pub fn view_layout_count(&self) -> usize {
        self.view_layouts.read().len()
    }
}

impl std::fmt::Debug for EffectLayouts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectLayouts")
            .field("descriptor_set_slots", &self.descriptor_set_slots)
            .field("instantiated_effects", &self.instantiated_effect_count())
            .field("frame_layouts", &self.frame_layout_count())
            .field("view_layouts", &self.view_layout_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::renderer::effect::reflection::{EffectConstantBuffer, EffectValueMember, ResourceClass};

    fn description() -> ResourceGroupDescription {
        let mut builder = DescriptorSetLayoutBuilder::new();
        builder.add_binding(ParameterKey::new("Layouts.Globals"), ResourceClass::ConstantBuffer, 1, None);
        ResourceGroupDescription::new(
            builder,
            Some(EffectConstantBuffer {
                name: "PerFrame".into(),
                size: 32,
                members: vec![EffectValueMember {
                    key: ParameterKey::new("Layouts.Time"),
                    offset: 16,
                    size: 4,
                    logical_group: None,
                }],
            }),
        )
    }

    #[test]
    fn concurrent_requests_build_one_layout() {
        let backend = HeadlessBackend::new();
        let layouts = EffectLayouts::new();
        let description = description();

        let created: Vec<_> = (0..64)
            .into_par_iter()
            .map(|_| layouts.create_frame_resource_group_layout(&backend, &description, RenderEffectState::Normal))
            .collect();

        assert!(created.iter().all(|layout| Arc::ptr_eq(layout, &created[0])));
        assert_eq!(backend.stats().descriptor_set_layouts, 1);
        assert_eq!(layouts.frame_layout_count(), 1);
    }

    #[test]
    fn state_separates_cached_layouts() {
        let backend = HeadlessBackend::new();
        let layouts = EffectLayouts::new();
        let description = description();

        let normal = layouts.create_view_resource_group_layout(&backend, &description, RenderEffectState::Normal);
        let error = layouts.create_view_resource_group_layout(&backend, &description, RenderEffectState::Error);
        assert!(!Arc::ptr_eq(&normal, &error));
        assert_eq!(layouts.view_layout_count(), 2);
    }

    #[test]
    fn late_offset_slot_updates_existing_layouts() {
        let backend = HeadlessBackend::new();
        let mut layouts = EffectLayouts::new();
        let layout = layouts.create_frame_resource_group_layout(&backend, &description(), RenderEffectState::Normal);

        let time = layouts.create_frame_cbuffer_offset_slot(ParameterKey::new("Layouts.Time"));
        let missing = layouts.create_frame_cbuffer_offset_slot(ParameterKey::new("Layouts.Missing"));
        assert_eq!(layout.cbuffer_offset(time.index()), 16);
        assert_eq!(layout.cbuffer_offset(missing.index()), -1);
    }

    #[test]
    fn descriptor_set_slots_start_with_well_known_sets() {
        let mut layouts = EffectLayouts::new();
        assert_eq!(layouts.descriptor_set_slot("PerView"), Some(PER_VIEW));
        assert_eq!(layouts.get_or_create_descriptor_set_slot("PerMaterial"), 3);
        assert_eq!(layouts.get_or_create_descriptor_set_slot("PerMaterial"), 3);
        assert_eq!(layouts.get_or_create_descriptor_set_slot("PerDraw"), PER_DRAW);
    }
}
