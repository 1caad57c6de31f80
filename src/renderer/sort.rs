//! Render Node Sorting
//!
//! A render stage with a [`SortMode`] gets its nodes reordered after
//! Prepare. The mode writes one [`SortKey`] per node; keys are sorted
//! ascending and the node list is permuted to match.
//!
//! Every key carries the node's position, and `Ord` compares it after the
//! value. Keys are therefore unique and an unstable parallel sort yields the
//! same order as a stable one.

use crate::renderer::object::{RenderObject, RenderObjects};
use crate::renderer::view::{RenderView, RenderViewStage};

/// Sort key of one render node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SortKey {
    pub value: u64,
    /// Position of the node in the unsorted list.
    pub index: u32,
}

/// Fills the sort keys of a view stage.
pub trait SortMode: Send + Sync {
    /// `keys[i]` receives the key of `view_stage.render_nodes()[i]`; its
    /// `index` must be set to `i`.
    fn generate_sort_keys(
        &self,
        view: &RenderView,
        view_stage: &RenderViewStage,
        objects: &RenderObjects,
        keys: &mut [SortKey],
    );
}

/// Maps a float onto a `u32` with the same ordering.
#[inline]
#[must_use]
pub fn sortable_float(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 { !bits } else { bits | 0x8000_0000 }
}

fn generate_with(
    view_stage: &RenderViewStage,
    objects: &RenderObjects,
    keys: &mut [SortKey],
    value: impl Fn(&RenderObject) -> u64,
) {
    for (i, (node, key)) in view_stage.render_nodes().iter().zip(keys.iter_mut()).enumerate() {
        *key = SortKey {
            value: objects.get(node.render_object).map_or(u64::MAX, &value),
            index: i as u32,
        };
    }
}

/// Farthest first, for blended geometry. Equal depths group by state.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackToFrontSortMode;

impl SortMode for BackToFrontSortMode {
    fn generate_sort_keys(
        &self,
        view: &RenderView,
        view_stage: &RenderViewStage,
        objects: &RenderObjects,
        keys: &mut [SortKey],
    ) {
        generate_with(view_stage, objects, keys, |object| {
            let depth = view.view_depth(object.bounding_box.center());
            (u64::from(!sortable_float(depth)) << 32) | u64::from(object.state_sort_key())
        });
    }
}

/// Nearest first, to make the most of early depth rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontToBackSortMode;

impl SortMode for FrontToBackSortMode {
    fn generate_sort_keys(
        &self,
        view: &RenderView,
        view_stage: &RenderViewStage,
        objects: &RenderObjects,
        keys: &mut [SortKey],
    ) {
        generate_with(view_stage, objects, keys, |object| {
            let depth = view.view_depth(object.bounding_box.center());
            (u64::from(sortable_float(depth)) << 32) | u64::from(object.state_sort_key())
        });
    }
}

/// Groups nodes by pipeline state, nearest first within a state.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateChangeSortMode;

impl SortMode for StateChangeSortMode {
    fn generate_sort_keys(
        &self,
        view: &RenderView,
        view_stage: &RenderViewStage,
        objects: &RenderObjects,
        keys: &mut [SortKey],
    ) {
        generate_with(view_stage, objects, keys, |object| {
            let depth = view.view_depth(object.bounding_box.center());
            (u64::from(object.state_sort_key()) << 32) | u64::from(sortable_float(depth))
        });
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::renderer::nodes::{RenderNodeFeatureReference, RenderNodeReference};
    use crate::renderer::object::BoundingBox;
    use crate::utils::ConcurrentCollector;

    #[test]
    fn sortable_float_preserves_order() {
        let values = [-10.0f32, -0.5, 0.0, 0.25, 3.0, 1.0e6];
        for pair in values.windows(2) {
            assert!(sortable_float(pair[0]) < sortable_float(pair[1]));
        }
    }

    #[test]
    fn ties_break_on_position() {
        let mut keys = vec![
            SortKey { value: 7, index: 2 },
            SortKey { value: 7, index: 0 },
            SortKey { value: 1, index: 1 },
        ];
        keys.sort_unstable();
        assert_eq!(keys.iter().map(|k| k.index).collect::<Vec<_>>(), [1, 0, 2]);
    }

    fn stage_with(objects: &mut RenderObjects, depths: &[f32]) -> RenderViewStage {
        let mut nodes = ConcurrentCollector::new();
        for (i, depth) in depths.iter().enumerate() {
            let object = RenderObject::new(()).with_bounding_box(BoundingBox::from_center(
                Vec3::new(0.0, 0.0, -depth),
                Vec3::ONE,
            ));
            let key = objects.insert(object);
            nodes.add(RenderNodeFeatureReference {
                root_render_feature: 0,
                render_node: RenderNodeReference::new(i),
                render_object: key,
            });
        }
        nodes.close();
        let mut stage = RenderViewStage::new(0);
        stage.render_nodes = Some(nodes);
        stage
    }

    fn order(mode: &dyn SortMode, depths: &[f32]) -> Vec<u32> {
        let mut objects = RenderObjects::with_key();
        let stage = stage_with(&mut objects, depths);
        let view = RenderView::look_at(Vec3::ZERO, Vec3::NEG_Z);
        let mut keys = vec![SortKey::default(); depths.len()];
        mode.generate_sort_keys(&view, &stage, &objects, &mut keys);
        keys.sort_unstable();
        keys.iter().map(|k| k.index).collect()
    }

    #[test]
    fn depth_modes() {
        let depths = [5.0, 1.0, 20.0];
        assert_eq!(order(&BackToFrontSortMode, &depths), [2, 0, 1]);
        assert_eq!(order(&FrontToBackSortMode, &depths), [1, 0, 2]);
    }

    #[test]
    fn state_change_groups_by_state_key() {
        let mut objects = RenderObjects::with_key();
        let stage = stage_with(&mut objects, &[1.0, 2.0, 3.0]);
        let keys_by_node: Vec<_> = stage.render_nodes().iter().map(|n| n.render_object).collect();
        objects[keys_by_node[0]].set_state_sort_key(9);
        objects[keys_by_node[1]].set_state_sort_key(3);
        objects[keys_by_node[2]].set_state_sort_key(3);

        let view = RenderView::look_at(Vec3::ZERO, Vec3::NEG_Z);
        let mut keys = vec![SortKey::default(); 3];
        StateChangeSortMode.generate_sort_keys(&view, &stage, &objects, &mut keys);
        keys.sort_unstable();
        assert_eq!(keys.iter().map(|k| k.index).collect::<Vec<_>>(), [1, 2, 0]);
    }
}
