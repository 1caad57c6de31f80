//! Per-Node Data Arrays
//!
//! Root render features attach typed data to their nodes through a
//! [`RenderDataHolder`]. Each array is addressed by a typed
//! [`RenderDataKey`] and indexed by one kind of node ([`DataType`]).
//!
//! Static arrays survive across frames. Per-frame arrays are emptied by
//! [`RenderDataHolder::clear_frame_arrays`] and regrown by
//! [`RenderDataHolder::prepare_data_arrays`] once the node counts are known.
//!
//! # Multipliers
//!
//! Static-effect arrays hold `multiplier` entries per static object node,
//! stored flat: the entry of node `s`, slot `i` lives at `s * multiplier + i`.
//! [`RenderDataHolder::change_data_multiplier`] moves every entry to its
//! position under the new multiplier.

use std::any::Any;
use std::marker::PhantomData;

/// Node kind an array is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    StaticObject,
    /// Static object node times effect slot.
    StaticEffectObject,
    Object,
    ViewObject,
    Render,
    EffectObject,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::StaticObject,
        DataType::StaticEffectObject,
        DataType::Object,
        DataType::ViewObject,
        DataType::Render,
        DataType::EffectObject,
    ];

    /// Whether the array survives across frames.
    #[inline]
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(self, DataType::StaticObject | DataType::StaticEffectObject)
    }
}

/// Type-erased growable array.
trait DataArray: Send + Sync {
    fn len(&self) -> usize;
    fn resize(&mut self, len: usize);
    fn clear(&mut self);
    fn reset_range(&mut self, start: usize, count: usize);
    fn change_multiplier(&mut self, items: usize, old: usize, new: usize);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Default + Send + Sync + 'static> DataArray for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn resize(&mut self, len: usize) {
        if Vec::len(self) < len {
            self.resize_with(len, T::default);
        }
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn reset_range(&mut self, start: usize, count: usize) {
        let end = (start + count).min(Vec::len(self));
        for item in self.iter_mut().take(end).skip(start) {
            *item = T::default();
        }
    }

    fn change_multiplier(&mut self, items: usize, old: usize, new: usize) {
        let mut previous = std::mem::take(self);
        let mut remapped = Vec::with_capacity(items * new);
        remapped.resize_with(items * new, T::default);

        let kept = old.min(new);
        for s in 0..items {
            for i in 0..kept {
                if let Some(value) = previous.get_mut(s * old + i) {
                    remapped[s * new + i] = std::mem::take(value);
                }
            }
        }
        *self = remapped;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle of an array in a [`RenderDataHolder`].
pub struct RenderDataKey<T> {
    index: usize,
    data_type: DataType,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RenderDataKey<T> {
    #[inline]
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

impl<T> Clone for RenderDataKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RenderDataKey<T> {}

impl<T> std::fmt::Debug for RenderDataKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDataKey")
            .field("index", &self.index)
            .field("data_type", &self.data_type)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

struct DataArrayEntry {
    data_type: DataType,
    multiplier: usize,
    array: Box<dyn DataArray>,
}

/// Typed per-node arrays of one root render feature.
#[derive(Default)]
pub struct RenderDataHolder {
    arrays: Vec<DataArrayEntry>,
}

impl RenderDataHolder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an array indexed by `data_type`.
    pub fn create_key<T: Default + Send + Sync + 'static>(&mut self, data_type: DataType) -> RenderDataKey<T> {
        self.create_key_with_multiplier(data_type, 1)
    }

    /// Creates an array holding `multiplier` entries per node.
    pub fn create_key_with_multiplier<T: Default + Send + Sync + 'static>(
        &mut self,
        data_type: DataType,
        multiplier: usize,
    ) -> RenderDataKey<T> {
        self.arrays.push(DataArrayEntry {
            data_type,
            multiplier,
            array: Box::new(Vec::<T>::new()),
        });
        RenderDataKey {
            index: self.arrays.len() - 1,
            data_type,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn get<T: 'static>(&self, key: RenderDataKey<T>) -> &[T] {
        self.arrays
            .get(key.index)
            .and_then(|entry| entry.array.as_any().downcast_ref::<Vec<T>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get_mut<T: 'static>(&mut self, key: RenderDataKey<T>) -> &mut [T] {
        match self
            .arrays
            .get_mut(key.index)
            .and_then(|entry| entry.array.as_any_mut().downcast_mut::<Vec<T>>())
        {
            Some(array) => array.as_mut_slice(),
            None => &mut [],
        }
    }

    #[must_use]
    pub fn multiplier<T>(&self, key: RenderDataKey<T>) -> usize {
        self.arrays.get(key.index).map_or(0, |entry| entry.multiplier)
    }

    /// Grows every array to `node_count(data_type) * multiplier`. Arrays
    /// never shrink here.
    pub fn prepare_data_arrays(&mut self, node_count: impl Fn(DataType) -> usize) {
        for entry in &mut self.arrays {
            let len = node_count(entry.data_type) * entry.multiplier;
            entry.array.resize(len);
        }
    }

    /// Changes the per-node entry count of `key`, moving `s * old + i` to
    /// `s * new + i`. Entries beyond the new multiplier are dropped.
    pub fn change_data_multiplier<T>(&mut self, key: RenderDataKey<T>, multiplier: usize) {
        let Some(entry) = self.arrays.get_mut(key.index) else {
            return;
        };
        if entry.multiplier == multiplier {
            return;
        }
        let items = if entry.multiplier == 0 {
            0
        } else {
            entry.array.len().div_ceil(entry.multiplier)
        };
        entry.array.change_multiplier(items, entry.multiplier, multiplier);
        entry.multiplier = multiplier;
    }

    /// Restores the default of every static entry of node `node`.
    pub fn reset_static_node(&mut self, node: usize) {
        for entry in self.arrays.iter_mut().filter(|e| e.data_type.is_static()) {
            entry
                .array
                .reset_range(node * entry.multiplier, entry.multiplier);
        }
    }

    /// Empties every per-frame array.
    pub fn clear_frame_arrays(&mut self) {
        for entry in self.arrays.iter_mut().filter(|e| !e.data_type.is_static()) {
            entry.array.clear();
        }
    }
}

impl std::fmt::Debug for RenderDataHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.arrays
                    .iter()
                    .map(|e| (e.data_type, e.multiplier, e.array.len())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_change_keeps_every_entry_in_place() {
        let mut holder = RenderDataHolder::new();
        let key = holder.create_key_with_multiplier::<u32>(DataType::StaticEffectObject, 2);
        holder.prepare_data_arrays(|_| 3);

        for (flat, value) in holder.get_mut(key).iter_mut().enumerate() {
            *value = 100 + flat as u32;
        }

        holder.change_data_multiplier(key, 3);
        let data = holder.get(key);
        assert_eq!(data.len(), 9);
        for s in 0..3 {
            for i in 0..2 {
                assert_eq!(data[s * 3 + i], 100 + (s * 2 + i) as u32);
            }
            assert_eq!(data[s * 3 + 2], 0);
        }
    }

    #[test]
    fn growing_from_zero_slots() {
        let mut holder = RenderDataHolder::new();
        let key = holder.create_key_with_multiplier::<Option<String>>(DataType::StaticEffectObject, 0);
        holder.prepare_data_arrays(|_| 4);
        assert!(holder.get(key).is_empty());

        holder.change_data_multiplier(key, 1);
        holder.prepare_data_arrays(|_| 4);
        assert_eq!(holder.get(key).len(), 4);
    }

    #[test]
    fn frame_arrays_clear_static_arrays_persist() {
        let mut holder = RenderDataHolder::new();
        let static_key = holder.create_key::<u8>(DataType::StaticObject);
        let frame_key = holder.create_key::<u8>(DataType::Render);
        holder.prepare_data_arrays(|t| if t == DataType::Render { 5 } else { 2 });
        holder.get_mut(static_key)[1] = 7;

        holder.clear_frame_arrays();
        assert!(holder.get(frame_key).is_empty());
        assert_eq!(holder.get(static_key), &[0, 7]);

        holder.reset_static_node(1);
        assert_eq!(holder.get(static_key), &[0, 0]);
    }
}
