//! Binary AABB tree for frustum culling and point containment
//!
//! Built bottom-up from a flat list of `(object, box)` pairs by recursive
//! longest-axis median splits, and rebuilt wholesale when objects are added.
//! There is no incremental insertion; the owning scene manager calls
//! [`BoundsTree::build`] again after a batch of additions.

use crate::foundation::math::Mat4;
use crate::scene::bounds::{BoundingBox, CullResult};
use crate::scene::camera::Camera;

/// Maximum objects per leaf before a node splits
pub const DEFAULT_LEAF_CAPACITY: usize = 4;

#[derive(Debug)]
enum NodeKind<T> {
    /// Interior node with exactly two children
    Branch(Box<Node<T>>, Box<Node<T>>),
    /// Leaf holding a bounded list of objects with their own tighter boxes
    Leaf(Vec<(T, BoundingBox)>),
}

#[derive(Debug)]
struct Node<T> {
    bounds: BoundingBox,
    kind: NodeKind<T>,
}

/// Binary tree of axis-aligned bounding boxes over placed objects
#[derive(Debug)]
pub struct BoundsTree<T> {
    root: Option<Node<T>>,
    object_count: usize,
}

impl<T: Copy> BoundsTree<T> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            root: None,
            object_count: 0,
        }
    }

    /// Build a tree from a flat list of objects and their boxes
    pub fn build(items: Vec<(T, BoundingBox)>, leaf_capacity: usize) -> Self {
        let leaf_capacity = leaf_capacity.max(1);
        let object_count = items.len();
        let root = if items.is_empty() {
            None
        } else {
            Some(Self::build_node(items, leaf_capacity))
        };
        Self { root, object_count }
    }

    fn build_node(mut items: Vec<(T, BoundingBox)>, leaf_capacity: usize) -> Node<T> {
        let mut bounds = BoundingBox::empty();
        for (_, item_box) in &items {
            bounds.union(item_box);
        }

        if items.len() <= leaf_capacity {
            return Node {
                bounds,
                kind: NodeKind::Leaf(items),
            };
        }

        // Partition at the median along the longest axis of the node bounds
        let extent = bounds.max() - bounds.min();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| {
            a.1.center()[axis].total_cmp(&b.1.center()[axis])
        });
        let upper = items.split_off(mid);

        Node {
            bounds,
            kind: NodeKind::Branch(
                Box::new(Self::build_node(items, leaf_capacity)),
                Box::new(Self::build_node(upper, leaf_capacity)),
            ),
        }
    }

    /// Total number of objects in the tree
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Frustum-cull the tree.
    ///
    /// `on_visible` fires for every object whose box survives culling.
    /// `on_released` fires for every object under a node classified
    /// completely outside (the pruned subtree is walked for collection only,
    /// with no further classification), and for objects failing their
    /// individual re-test in a partially visible leaf; it is the hook the
    /// scene manager uses to free cached impostor resources.
    pub fn cull(
        &self,
        camera: &Camera,
        on_visible: &mut dyn FnMut(T),
        on_released: &mut dyn FnMut(T),
    ) {
        if let Some(root) = &self.root {
            Self::cull_node(root, camera, on_visible, on_released);
        }
    }

    fn cull_node(
        node: &Node<T>,
        camera: &Camera,
        on_visible: &mut dyn FnMut(T),
        on_released: &mut dyn FnMut(T),
    ) {
        let identity = Mat4::identity();
        match node.bounds.view_frustum_cull(camera, &identity) {
            CullResult::CompleteOut => Self::release_subtree(node, on_released),
            CullResult::CompleteIn => Self::accept_subtree(node, on_visible),
            CullResult::Partial => match &node.kind {
                NodeKind::Branch(left, right) => {
                    Self::cull_node(left, camera, on_visible, on_released);
                    Self::cull_node(right, camera, on_visible, on_released);
                }
                NodeKind::Leaf(items) => {
                    for (id, item_box) in items {
                        if item_box.view_frustum_cull(camera, &identity) == CullResult::CompleteOut
                        {
                            on_released(*id);
                        } else {
                            on_visible(*id);
                        }
                    }
                }
            },
        }
    }

    fn release_subtree(node: &Node<T>, on_released: &mut dyn FnMut(T)) {
        match &node.kind {
            NodeKind::Branch(left, right) => {
                Self::release_subtree(left, on_released);
                Self::release_subtree(right, on_released);
            }
            NodeKind::Leaf(items) => {
                for (id, _) in items {
                    on_released(*id);
                }
            }
        }
    }

    fn accept_subtree(node: &Node<T>, on_visible: &mut dyn FnMut(T)) {
        match &node.kind {
            NodeKind::Branch(left, right) => {
                Self::accept_subtree(left, on_visible);
                Self::accept_subtree(right, on_visible);
            }
            NodeKind::Leaf(items) => {
                for (id, _) in items {
                    on_visible(*id);
                }
            }
        }
    }

    /// Collect the objects whose own box contains `point`, descending only
    /// through nodes whose box contains it.
    pub fn containing(&self, point: crate::foundation::math::Vec3) -> Vec<T> {
        let mut results = Vec::new();
        if let Some(root) = &self.root {
            Self::containing_node(root, point, &mut results);
        }
        results
    }

    fn containing_node(node: &Node<T>, point: crate::foundation::math::Vec3, results: &mut Vec<T>) {
        if !node.bounds.contains_point(point) {
            return;
        }
        match &node.kind {
            NodeKind::Branch(left, right) => {
                Self::containing_node(left, point, results);
                Self::containing_node(right, point, results);
            }
            NodeKind::Leaf(items) => {
                for (id, item_box) in items {
                    if item_box.contains_point(point) {
                        results.push(*id);
                    }
                }
            }
        }
    }
}

impl<T: Copy> Default for BoundsTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    fn test_camera() -> Camera {
        Camera::perspective(Vec3::zeros(), 60.0, 1.0, 0.5, 5000.0, 800, 600)
            .looking_along(-Vec3::z_axis().into_inner(), Vec3::y_axis().into_inner())
    }

    fn unit_box_at(center: Vec3) -> BoundingBox {
        BoundingBox::from_center_extents(center, Vec3::repeat(0.5))
    }

    // Small deterministic LCG so the stress test needs no external crates
    struct Lcg(u64);
    impl Lcg {
        fn next_f32(&mut self, lo: f32, hi: f32) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let unit = ((self.0 >> 33) as f32) / ((1u64 << 31) as f32);
            lo + unit * (hi - lo)
        }
    }

    #[test]
    fn test_build_shape() {
        let items: Vec<(usize, BoundingBox)> = (0..32)
            .map(|i| (i, unit_box_at(Vec3::new(i as f32 * 3.0, 0.0, -10.0))))
            .collect();
        let tree = BoundsTree::build(items, 4);
        assert_eq!(tree.object_count(), 32);
    }

    #[test]
    fn test_no_false_negative_culling() {
        let camera = test_camera();
        let mut rng = Lcg(0x5eed);

        let items: Vec<(usize, BoundingBox)> = (0..200)
            .map(|i| {
                let center = Vec3::new(
                    rng.next_f32(-300.0, 300.0),
                    rng.next_f32(-300.0, 300.0),
                    rng.next_f32(-600.0, 100.0),
                );
                (i, unit_box_at(center))
            })
            .collect();

        let tree = BoundsTree::build(items.clone(), 4);

        let mut visible = Vec::new();
        tree.cull(&camera, &mut |id| visible.push(id), &mut |_| {});

        let identity = Mat4::identity();
        for (id, item_box) in &items {
            if item_box.view_frustum_cull(&camera, &identity) != CullResult::CompleteOut {
                assert!(
                    visible.contains(id),
                    "box {id} intersects the frustum but was culled"
                );
            }
        }
    }

    #[test]
    fn test_complete_in_accepts_without_retest() {
        let camera = test_camera();
        // Tight cluster straight ahead, well inside the frustum
        let items: Vec<(usize, BoundingBox)> = (0..8)
            .map(|i| (i, unit_box_at(Vec3::new(i as f32 * 0.1, 0.0, -50.0))))
            .collect();
        let tree = BoundsTree::build(items, 2);

        let mut visible = Vec::new();
        tree.cull(&camera, &mut |id| visible.push(id), &mut |_| {});
        assert_eq!(visible.len(), 8);
    }

    #[test]
    fn test_release_fires_for_culled_leaf_objects() {
        let camera = test_camera();
        let items = vec![
            (0usize, unit_box_at(Vec3::new(0.0, 0.0, -100.0))),
            (1, unit_box_at(Vec3::new(1000.0, 0.0, -100.0))),
            (2, unit_box_at(Vec3::new(-1000.0, 0.0, -100.0))),
        ];
        let tree = BoundsTree::build(items, 4);

        let mut visible = Vec::new();
        let mut released = Vec::new();
        tree.cull(&camera, &mut |id| visible.push(id), &mut |id| {
            released.push(id)
        });

        assert_eq!(visible, vec![0]);
        released.sort_unstable();
        assert_eq!(released, vec![1, 2]);
    }

    #[test]
    fn test_release_fires_through_interior_nodes() {
        let camera = test_camera();
        // All behind the camera; leaf capacity 2 forces interior nodes, so
        // the whole tree is pruned at a branch, not a leaf
        let items: Vec<(usize, BoundingBox)> = (0..16)
            .map(|i| (i, unit_box_at(Vec3::new(i as f32 * 10.0, 0.0, 500.0))))
            .collect();
        let tree = BoundsTree::build(items, 2);

        let mut visible = Vec::new();
        let mut released = Vec::new();
        tree.cull(&camera, &mut |id| visible.push(id), &mut |id| {
            released.push(id)
        });

        assert!(visible.is_empty());
        released.sort_unstable();
        assert_eq!(released, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_containing_descends_to_matching_objects() {
        let items = vec![
            (0usize, unit_box_at(Vec3::new(0.0, 0.0, 0.0))),
            (1, unit_box_at(Vec3::new(10.0, 0.0, 0.0))),
            (2, unit_box_at(Vec3::new(20.0, 0.0, 0.0))),
        ];
        let tree = BoundsTree::build(items, 1);

        assert_eq!(tree.containing(Vec3::new(10.1, 0.2, 0.0)), vec![1]);
        assert!(tree.containing(Vec3::new(5.0, 0.0, 0.0)).is_empty());
    }

    #[test]
    fn test_empty_tree_queries() {
        let tree: BoundsTree<usize> = BoundsTree::new();
        let mut visible = Vec::new();
        tree.cull(&test_camera(), &mut |id| visible.push(id), &mut |_| {});
        assert!(visible.is_empty());
        assert!(tree.containing(Vec3::zeros()).is_empty());
    }
}
