//! Effect Parameters
//!
//! [`ParameterKey`]s name shader-defining properties (skinning, velocity
//! output, render-target extensions, ...). Keys are interned, so comparing
//! two keys is an integer comparison. A [`ParameterCollection`] is an ordered
//! key/value list used both as the compiler request and as the parameter
//! set bound for fallback rendering.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::utils::interner::{self, Symbol};

/// Interned name of a shader permutation parameter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterKey(Symbol);

impl ParameterKey {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(interner::intern(name))
    }

    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        interner::resolve(self.0)
    }
}

impl std::fmt::Debug for ParameterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParameterKey({})", self.name())
    }
}

/// Composition of shader mixin class names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShaderSource {
    mixins: SmallVec<[Arc<str>; 2]>,
}

impl ShaderSource {
    #[must_use]
    pub fn mixin(class_name: impl Into<Arc<str>>) -> Self {
        let mut mixins = SmallVec::new();
        mixins.push(class_name.into());
        Self { mixins }
    }

    pub fn push(&mut self, class_name: impl Into<Arc<str>>) {
        self.mixins.push(class_name.into());
    }

    #[must_use]
    pub fn mixins(&self) -> &[Arc<str>] {
        &self.mixins
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mixins.is_empty()
    }
}

/// Value of a permutation parameter.
///
/// Floats compare and hash by bit pattern, so `NaN` equals itself and
/// `0.0` differs from `-0.0`.
#[derive(Debug, Clone)]
pub enum ParameterValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    String(Arc<str>),
    ShaderSource(ShaderSource),
}

impl PartialEq for ParameterValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::ShaderSource(a), Self::ShaderSource(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParameterValue {}

impl Hash for ParameterValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
            Self::ShaderSource(v) => v.hash(state),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for ParameterValue {
    fn from(v: u32) -> Self {
        Self::UInt(v)
    }
}

impl From<f32> for ParameterValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<ShaderSource> for ParameterValue {
    fn from(v: ShaderSource) -> Self {
        Self::ShaderSource(v)
    }
}

/// Ordered key/value list. Setting an existing key replaces its value in
/// place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterCollection {
    entries: Vec<(ParameterKey, ParameterValue)>,
}

/// Parameters sent to the effect compiler.
pub type CompilerParameters = ParameterCollection;

impl ParameterCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: ParameterKey, value: impl Into<ParameterValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: ParameterKey) -> Option<&ParameterValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (*k == key).then_some(v))
    }

    #[must_use]
    pub fn contains(&self, key: ParameterKey) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParameterKey, &ParameterValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Order-sensitive content hash of names and values.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        for (key, value) in &self.entries {
            key.name().hash(&mut hasher);
            value.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl FromIterator<(ParameterKey, ParameterValue)> for ParameterCollection {
    fn from_iter<I: IntoIterator<Item = (ParameterKey, ParameterValue)>>(iter: I) -> Self {
        let mut collection = Self::new();
        for (key, value) in iter {
            collection.set(key, value);
        }
        collection
    }
}
