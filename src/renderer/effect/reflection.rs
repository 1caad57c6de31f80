//! Effect Reflection & Resource Group Layouts
//!
//! A compiled effect describes its GPU resources through an
//! [`EffectReflection`]: resource bindings grouped into named descriptor
//! sets, and constant buffers with member offsets. The effect render feature
//! turns that into a [`RenderEffectReflection`]:
//!
//! ```text
//!  EffectReflection ──► EffectDescriptorSetReflection  (one layout per feature slot)
//!                            │
//!                            ├─► ResourceGroupDescription[slot]  (layout + cbuffer)
//!                            │        │
//!                            │        ├─► PerFrame  → FrameResourceGroupLayout (cached by hash+state)
//!                            │        ├─► PerView   → ViewResourceGroupLayout  (cached by hash+state)
//!                            │        └─► PerDraw   → EffectResourceGroupLayout (per reflection)
//!                            └─► RootSignature
//! ```
//!
//! Layouts are immutable once published, except for the constant-buffer
//! offset and logical-group tables, which grow when a feature registers new
//! slots after layouts already exist.

use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, LazyLock, OnceLock};

use parking_lot::RwLock;

use crate::renderer::backend::{DescriptorSetLayout, RootSignature};
use crate::renderer::effect::render_effect::RenderEffectState;
use crate::renderer::parameters::ParameterKey;
use crate::renderer::resource_group::ResourceGroupEntry;

// ─── Compiler Reflection ──────────────────────────────────────────────────────

/// Kind of a bound GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

/// One resource binding declared by an effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectResourceBinding {
    pub key: ParameterKey,
    pub class: ResourceClass,
    /// Descriptor set name; `None` lands in the feature's default set.
    pub resource_group: Option<Arc<str>>,
    pub logical_group: Option<Arc<str>>,
}

impl EffectResourceBinding {
    #[must_use]
    pub fn new(key: ParameterKey, class: ResourceClass, resource_group: &str) -> Self {
        Self {
            key,
            class,
            resource_group: Some(resource_group.into()),
            logical_group: None,
        }
    }

    #[must_use]
    pub fn with_logical_group(mut self, group: &str) -> Self {
        self.logical_group = Some(group.into());
        self
    }
}

/// A variable inside a constant buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectValueMember {
    pub key: ParameterKey,
    pub offset: u32,
    pub size: u32,
    pub logical_group: Option<Arc<str>>,
}

/// A constant buffer declared by an effect; named like its descriptor set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectConstantBuffer {
    pub name: Arc<str>,
    pub size: u32,
    pub members: Vec<EffectValueMember>,
}

impl EffectConstantBuffer {
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        self.size.hash(&mut hasher);
        for member in &self.members {
            member.key.name().hash(&mut hasher);
            member.offset.hash(&mut hasher);
            member.size.hash(&mut hasher);
            member.logical_group.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Resource reflection of compiled bytecode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReflection {
    pub resource_bindings: Vec<EffectResourceBinding>,
    pub constant_buffers: Vec<EffectConstantBuffer>,
}

// ─── Descriptor Set Layouts ───────────────────────────────────────────────────

/// Entry of a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutEntry {
    pub key: ParameterKey,
    pub class: ResourceClass,
    pub array_size: u32,
    pub logical_group: Option<Arc<str>>,
}

/// Content description of a descriptor set layout, hashed incrementally.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorSetLayoutBuilder {
    entries: Vec<DescriptorSetLayoutEntry>,
    hash: u64,
}

impl DescriptorSetLayoutBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(
        &mut self,
        key: ParameterKey,
        class: ResourceClass,
        array_size: u32,
        logical_group: Option<Arc<str>>,
    ) {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        self.hash.hash(&mut hasher);
        key.name().hash(&mut hasher);
        class.hash(&mut hasher);
        array_size.hash(&mut hasher);
        logical_group.hash(&mut hasher);
        self.hash = hasher.finish();

        self.entries.push(DescriptorSetLayoutEntry {
            key,
            class,
            array_size,
            logical_group,
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[DescriptorSetLayoutEntry] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// One named descriptor set of an effect.
#[derive(Debug, Clone)]
pub struct DescriptorSetLayoutReflection {
    pub name: Arc<str>,
    /// `None` when the effect binds nothing in this set.
    pub layout: Option<DescriptorSetLayoutBuilder>,
}

/// Descriptor sets of an effect, ordered like the feature's slots.
#[derive(Debug, Clone, Default)]
pub struct EffectDescriptorSetReflection {
    pub layouts: Vec<DescriptorSetLayoutReflection>,
}

impl EffectDescriptorSetReflection {
    /// Groups the effect's bindings by the feature's descriptor set slots.
    /// Bindings naming no known set go to `default_set`.
    #[must_use]
    pub fn new(reflection: &EffectReflection, slots: &[Arc<str>], default_set: &str) -> Self {
        let mut builders: Vec<Option<DescriptorSetLayoutBuilder>> = vec![None; slots.len()];
        let default_index = slots.iter().position(|s| &**s == default_set);

        for binding in &reflection.resource_bindings {
            let target = binding
                .resource_group
                .as_deref()
                .and_then(|group| slots.iter().position(|s| &**s == group))
                .or(default_index);
            let Some(index) = target else {
                log::warn!(
                    "Resource '{}' has no descriptor set slot and no default set",
                    binding.key.name()
                );
                continue;
            };
            builders[index]
                .get_or_insert_with(DescriptorSetLayoutBuilder::new)
                .add_binding(binding.key, binding.class, 1, binding.logical_group.clone());
        }

        let layouts = slots
            .iter()
            .zip(builders)
            .map(|(name, layout)| DescriptorSetLayoutReflection {
                name: name.clone(),
                layout,
            })
            .collect();
        Self { layouts }
    }

    #[must_use]
    pub fn layout_index(&self, name: &str) -> Option<usize> {
        self.layouts.iter().position(|l| &*l.name == name)
    }
}

/// Layout plus constant buffer of one descriptor set.
#[derive(Debug, Clone)]
pub struct ResourceGroupDescription {
    pub descriptor_set_layout: DescriptorSetLayoutBuilder,
    pub constant_buffer: Option<EffectConstantBuffer>,
    /// Combined hash of the layout and the constant buffer.
    pub hash: u64,
}

impl ResourceGroupDescription {
    #[must_use]
    pub fn new(
        descriptor_set_layout: DescriptorSetLayoutBuilder,
        constant_buffer: Option<EffectConstantBuffer>,
    ) -> Self {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        descriptor_set_layout.hash().hash(&mut hasher);
        constant_buffer
            .as_ref()
            .map(EffectConstantBuffer::content_hash)
            .hash(&mut hasher);
        Self {
            descriptor_set_layout,
            constant_buffer,
            hash: hasher.finish(),
        }
    }
}

// ─── Resource Group Layouts ───────────────────────────────────────────────────

/// Descriptor and constant-buffer ranges of a named logical group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalGroup {
    pub descriptor_entry_start: usize,
    pub descriptor_entry_count: usize,
    /// Byte offset of the first member, `-1` when the group has none.
    pub constant_buffer_offset: i32,
    pub constant_buffer_size: u32,
}

impl LogicalGroup {
    pub const EMPTY: Self = Self {
        descriptor_entry_start: 0,
        descriptor_entry_count: 0,
        constant_buffer_offset: -1,
        constant_buffer_size: 0,
    };
}

/// GPU layout of one resource group.
#[derive(Debug)]
pub struct ResourceGroupLayout {
    pub descriptor_set_layout_builder: DescriptorSetLayoutBuilder,
    pub descriptor_set_layout: Arc<DescriptorSetLayout>,
    pub constant_buffer_reflection: Option<EffectConstantBuffer>,
    pub constant_buffer_size: u32,
    pub constant_buffer_hash: u64,
}

impl ResourceGroupLayout {
    #[must_use]
    pub fn new(
        description: &ResourceGroupDescription,
        descriptor_set_layout: Arc<DescriptorSetLayout>,
    ) -> Self {
        let constant_buffer = description.constant_buffer.clone();
        Self {
            descriptor_set_layout_builder: description.descriptor_set_layout.clone(),
            descriptor_set_layout,
            constant_buffer_size: constant_buffer.as_ref().map_or(0, |cb| cb.size),
            constant_buffer_hash: constant_buffer
                .as_ref()
                .map_or(0, EffectConstantBuffer::content_hash),
            constant_buffer_reflection: constant_buffer,
        }
    }
}

/// Resource group layout owned by an effect render feature, with resolved
/// constant-buffer offsets and logical groups.
#[derive(Debug)]
pub struct EffectResourceGroupLayout {
    pub layout: ResourceGroupLayout,
    pub state: RenderEffectState,
    /// Cache hash (description hash combined with state).
    pub hash: u64,
    cbuffer_offsets: RwLock<Vec<i32>>,
    logical_groups: RwLock<Vec<LogicalGroup>>,
}

impl EffectResourceGroupLayout {
    #[must_use]
    pub fn new(layout: ResourceGroupLayout, state: RenderEffectState, hash: u64) -> Self {
        Self {
            layout,
            state,
            hash,
            cbuffer_offsets: RwLock::new(Vec::new()),
            logical_groups: RwLock::new(Vec::new()),
        }
    }

    /// Offset of the variable bound to cbuffer slot `slot`, `-1` if the
    /// effect does not declare it.
    #[must_use]
    pub fn cbuffer_offset(&self, slot: usize) -> i32 {
        self.cbuffer_offsets.read().get(slot).copied().unwrap_or(-1)
    }

    #[must_use]
    pub fn logical_group(&self, group: usize) -> LogicalGroup {
        self.logical_groups
            .read()
            .get(group)
            .copied()
            .unwrap_or(LogicalGroup::EMPTY)
    }

    /// Resolves `variable` into cbuffer slot `slot`.
    pub fn resolve_cbuffer_offset(&self, slot: usize, variable: ParameterKey) {
        let offset = self
            .layout
            .constant_buffer_reflection
            .as_ref()
            .and_then(|cb| cb.members.iter().find(|m| m.key == variable))
            .map_or(-1, |m| m.offset as i32);

        let mut offsets = self.cbuffer_offsets.write();
        if offsets.len() <= slot {
            offsets.resize(slot + 1, -1);
        }
        offsets[slot] = offset;
    }

    /// Resolves the logical group `name` into group index `index`.
    pub fn resolve_logical_group(&self, index: usize, name: &str) {
        let mut group = LogicalGroup::EMPTY;

        let entries = self.layout.descriptor_set_layout_builder.entries();
        let mut matching = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.logical_group.as_deref() == Some(name));
        if let Some((start, _)) = matching.next() {
            group.descriptor_entry_start = start;
            group.descriptor_entry_count = 1 + matching.count();
        }

        if let Some(cb) = &self.layout.constant_buffer_reflection {
            let members: Vec<_> = cb
                .members
                .iter()
                .filter(|m| m.logical_group.as_deref() == Some(name))
                .collect();
            if let (Some(first), Some(last)) = (members.first(), members.last()) {
                group.constant_buffer_offset = first.offset as i32;
                group.constant_buffer_size = last.offset + last.size - first.offset;
            }
        }

        let mut groups = self.logical_groups.write();
        if groups.len() <= index {
            groups.resize(index + 1, LogicalGroup::EMPTY);
        }
        groups[index] = group;
    }
}

/// Shared PerFrame layout with its single resource group entry.
#[derive(Debug)]
pub struct FrameResourceGroupLayout {
    pub base: EffectResourceGroupLayout,
    pub entry: ResourceGroupEntry,
}

impl Deref for FrameResourceGroupLayout {
    type Target = EffectResourceGroupLayout;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Shared PerView layout with one resource group entry per view.
#[derive(Debug)]
pub struct ViewResourceGroupLayout {
    pub base: EffectResourceGroupLayout,
    entries: RwLock<Vec<Arc<ResourceGroupEntry>>>,
}

impl ViewResourceGroupLayout {
    #[must_use]
    pub fn new(base: EffectResourceGroupLayout, view_count: usize) -> Self {
        let layout = Self {
            base,
            entries: RwLock::new(Vec::new()),
        };
        layout.ensure_view_count(view_count);
        layout
    }

    /// Grows the entry table to `view_count`, double-checked under the
    /// write lock.
    pub fn ensure_view_count(&self, view_count: usize) {
        if self.entries.read().len() >= view_count {
            return;
        }
        let mut entries = self.entries.write();
        while entries.len() < view_count {
            entries.push(Arc::new(ResourceGroupEntry::new(self.base.hash)));
        }
    }

    #[must_use]
    pub fn entry(&self, view: usize) -> Option<Arc<ResourceGroupEntry>> {
        self.entries.read().get(view).cloned()
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl Deref for ViewResourceGroupLayout {
    type Target = EffectResourceGroupLayout;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

// ─── Render Effect Reflection ─────────────────────────────────────────────────

/// Layouts used to bind fallback parameters for every descriptor set that is
/// not PerFrame, PerView or PerDraw.
#[derive(Debug)]
pub struct FallbackLayouts {
    pub layouts: Vec<Option<Arc<ResourceGroupLayout>>>,
    /// Descriptor set index of each entry of `layouts`.
    pub mapping: Vec<usize>,
}

/// GPU-side layout information of a compiled effect, shared by every
/// render effect using that effect.
#[derive(Debug, Default)]
pub struct RenderEffectReflection {
    pub descriptor_reflection: EffectDescriptorSetReflection,
    pub resource_group_descriptions: Vec<Option<ResourceGroupDescription>>,
    pub root_signature: Option<Arc<RootSignature>>,
    pub per_frame_layout: Option<Arc<FrameResourceGroupLayout>>,
    pub per_view_layout: Option<Arc<ViewResourceGroupLayout>>,
    pub per_draw_layout: Option<Arc<EffectResourceGroupLayout>>,
    pub(crate) fallback: OnceLock<FallbackLayouts>,
}

static EMPTY_REFLECTION: LazyLock<Arc<RenderEffectReflection>> =
    LazyLock::new(|| Arc::new(RenderEffectReflection::default()));

impl RenderEffectReflection {
    /// Reflection of a render effect without a compiled effect.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        EMPTY_REFLECTION.clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root_signature.is_none()
    }

    #[must_use]
    pub fn fallback_layouts(&self) -> Option<&FallbackLayouts> {
        self.fallback.get()
    }
}
