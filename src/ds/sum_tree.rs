use std::ops::Index;

use log::{debug, trace, warn};
use rand::Rng;

use crate::error::{Result, SumTreeError};

/// A binary tree data structure where each parent node is the sum of its child nodes
///
/// The tree is stored in a flat `Vec` in level order: the root sits at index `0` and the children of node `i`
/// sit at `2i + 1` and `2i + 2`. The last `capacity` nodes are the leaves, which hold the priorities.
///
/// Priorities are expected to be non-negative. Negative values are stored as given, but sampling is only
/// proportional when every leaf is non-negative.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawSumTree"))]
pub struct SumTree {
    tree: Vec<f64>,
    max: f64,
    capacity: usize,
}

impl SumTree {
    /// Initialize a new `SumTree` with room for at least `capacity` leaves
    ///
    /// The capacity is rounded up to the next power of two, so `SumTree::new(3)` holds 4 leaves.
    ///
    /// **Errors** with [`SumTreeError::InvalidArgument`] if `capacity` is 0
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 1 {
            return Err(SumTreeError::InvalidArgument(format!(
                "`capacity` must be at least 1, got {capacity}"
            )));
        }

        let requested = capacity;
        let capacity = capacity.next_power_of_two();
        let size = 2 * capacity - 1;
        debug!("sum tree created: requested {requested}, capacity {capacity}, size {size}");

        Ok(Self {
            tree: vec![0.0; size],
            max: 0.0,
            capacity,
        })
    }

    /// Number of leaves
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of nodes, `2 * capacity - 1`
    pub fn size(&self) -> usize {
        self.tree.len()
    }

    /// Get the sum of all priorities stored
    pub fn total(&self) -> f64 {
        self.tree[0]
    }

    /// Get the largest priority ever set, or 0 if nothing has been set yet
    ///
    /// Overwriting the maximum leaf with a smaller value does not lower this.
    pub fn max_priority(&self) -> f64 {
        self.max
    }

    /// Get a slice view of the leaves, in leaf index order
    pub fn leaves(&self) -> &[f64] {
        &self.tree[self.first_leaf()..]
    }

    /// Get the priority stored at leaf `ix`
    pub fn get(&self, ix: usize) -> Result<f64> {
        self.check_leaf(ix)?;
        Ok(self.tree[self.first_leaf() + ix])
    }

    /// Set the priority at leaf `ix`, overwriting the previous value, and update every ancestor
    ///
    /// Ancestors are adjusted by the difference between the new and old value, so the cost is proportional to
    /// the height of the tree.
    ///
    /// **Errors** with [`SumTreeError::IndexOutOfRange`] if `ix` is not less than the capacity, or
    /// [`SumTreeError::InvalidArgument`] if `priority` is NaN or infinite. The tree is untouched on error.
    pub fn set(&mut self, ix: usize, priority: f64) -> Result<()> {
        self.check_leaf(ix)?;
        if !priority.is_finite() {
            return Err(SumTreeError::InvalidArgument(format!(
                "`priority` must be finite, got {priority} at leaf {ix}"
            )));
        }
        if priority < 0.0 {
            warn!("setting priority {priority} at leaf {ix}, sampling is undefined for negative priorities");
        }

        let mut node = self.first_leaf() + ix;
        let old = self.tree[node];
        let change = priority - old;

        self.tree[node] = priority;

        while node > 0 {
            node = (node - 1) / 2;
            self.tree[node] += change;
        }

        if priority > self.max {
            self.max = priority;
        }

        trace!("leaf {ix}: {old} -> {priority}, total {}", self.total());
        Ok(())
    }

    /// Probability of sampling leaf `ix`, i.e. its share of the total priority
    ///
    /// Returns 0 when the tree is empty.
    pub fn probability(&self, ix: usize) -> Result<f64> {
        let priority = self.get(ix)?;
        let total = self.total();
        Ok(if total == 0.0 { 0.0 } else { priority / total })
    }

    /// Reset every priority to 0, keeping the capacity
    pub fn clear(&mut self) {
        self.tree.fill(0.0);
        self.max = 0.0;
    }

    /// Find the node holding the fraction `weight` of the total priority, where `weight` is in `[0, 1)`
    ///
    /// Returns the node's position in the flat tree, which is always a leaf. Use
    /// [`leaf_index`](SumTree::leaf_index) to convert it to a leaf index.
    ///
    /// A value landing exactly on the boundary between two subtrees goes right. If every priority is 0 the
    /// rightmost leaf is returned.
    pub fn locate(&self, weight: f64) -> usize {
        self.descend(weight * self.total())
    }

    /// Find the leaf `i` and its priority `v` where the sum of the priorities of leaves `0..=i` first exceeds
    /// `mass`, with `mass` in `[0, total)`
    pub fn find(&self, mass: f64) -> (usize, f64) {
        let node = self.descend(mass);
        (self.leaf_index(node), self.tree[node])
    }

    /// Convert the position of a leaf node in the flat tree to its leaf index
    ///
    /// **Panics** if `node` is not a leaf
    pub fn leaf_index(&self, node: usize) -> usize {
        assert!(
            (self.first_leaf()..self.size()).contains(&node),
            "node {node} is not a leaf"
        );
        node - self.first_leaf()
    }

    /// Sample `batch_size` leaf indices in proportion to their priorities, drawing uniform values in `[0, 1)`
    /// from `rng`
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<usize> {
        self.sample_with(batch_size, || rng.gen::<f64>())
    }

    /// Sample `batch_size` leaf indices in proportion to their priorities, calling `draw` once per index for a
    /// uniform value in `[0, 1)`
    ///
    /// Indices are returned in the order the values were drawn and may repeat.
    pub fn sample_with(&self, batch_size: usize, mut draw: impl FnMut() -> f64) -> Vec<usize> {
        if batch_size > 0 && self.total() == 0.0 {
            trace!("sampling {batch_size} from a sum tree with no priority, every draw is the last leaf");
        }

        (0..batch_size)
            .map(|_| self.leaf_index(self.locate(draw())))
            .collect()
    }

    fn first_leaf(&self) -> usize {
        self.capacity - 1
    }

    fn check_leaf(&self, ix: usize) -> Result<()> {
        if ix < self.capacity {
            Ok(())
        } else {
            Err(SumTreeError::IndexOutOfRange {
                index: ix,
                capacity: self.capacity,
            })
        }
    }

    fn descend(&self, mass: f64) -> usize {
        let mut ix = 0;
        let mut val = mass;
        while ix < self.first_leaf() {
            let left = 2 * ix + 1;
            let right = left + 1;
            ix = if val < self.tree[left] {
                left
            } else {
                val -= self.tree[left];
                right
            }
        }
        ix
    }
}

/// Unchecked form of a deserialized [`SumTree`]
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawSumTree {
    tree: Vec<f64>,
    max: f64,
    capacity: usize,
}

#[cfg(feature = "serde")]
impl TryFrom<RawSumTree> for SumTree {
    type Error = SumTreeError;

    fn try_from(raw: RawSumTree) -> Result<Self> {
        let RawSumTree {
            tree,
            max,
            capacity,
        } = raw;
        let invalid =
            |msg: String| -> Result<Self> { Err(SumTreeError::InvalidArgument(msg)) };

        if !capacity.is_power_of_two() {
            return invalid(format!("`capacity` must be a power of two, got {capacity}"));
        }
        if tree.len() != 2 * capacity - 1 {
            return invalid(format!(
                "expected {} nodes for capacity {capacity}, got {}",
                2 * capacity - 1,
                tree.len()
            ));
        }
        if !max.is_finite() || tree.iter().any(|v| !v.is_finite()) {
            return invalid(String::from("priorities must be finite"));
        }
        for node in 0..capacity - 1 {
            let (left, right) = (tree[2 * node + 1], tree[2 * node + 2]);
            let sum = left + right;
            if (tree[node] - sum).abs() > 1e-9 * (1.0 + left.abs() + right.abs()) {
                return invalid(format!(
                    "node {node} holds {} but its children sum to {sum}",
                    tree[node]
                ));
            }
        }

        Ok(Self {
            tree,
            max,
            capacity,
        })
    }
}

impl Index<usize> for SumTree {
    type Output = f64;

    /// **Panics** if `index` is not less than the capacity
    fn index(&self, index: usize) -> &Self::Output {
        &self.leaves()[index]
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::SumTree;

    fn assert_sums(tree: &SumTree) -> Result<(), TestCaseError> {
        for node in 0..tree.capacity() - 1 {
            let children = tree.tree[2 * node + 1] + tree.tree[2 * node + 2];
            prop_assert!(
                (tree.tree[node] - children).abs() <= 1e-9 * (1.0 + children),
                "node {} holds {} but its children sum to {}",
                node,
                tree.tree[node],
                children
            );
        }
        let leaf_sum: f64 = tree.leaves().iter().sum();
        prop_assert!((tree.total() - leaf_sum).abs() <= 1e-9 * (1.0 + leaf_sum));
        Ok(())
    }

    proptest! {
        #[test]
        fn sum_invariant_holds_after_every_set(
            requested in 1usize..64,
            writes in prop::collection::vec((any::<prop::sample::Index>(), 0.0f64..100.0), 0..128),
        ) {
            let mut tree = SumTree::new(requested).unwrap();
            for (ix, priority) in writes {
                let leaf = ix.index(tree.capacity());
                tree.set(leaf, priority).unwrap();
                prop_assert_eq!(tree.get(leaf).unwrap(), priority);
                assert_sums(&tree)?;
            }
        }

        #[test]
        fn sampled_leaves_have_priority(
            priorities in prop::collection::vec(0.0f64..10.0, 1..32),
            draws in prop::collection::vec(0.0f64..1.0, 1..32),
        ) {
            let mut tree = SumTree::new(priorities.len()).unwrap();
            for (ix, &p) in priorities.iter().enumerate() {
                tree.set(ix, p).unwrap();
            }
            prop_assume!(tree.total() > 0.0);

            let mut it = draws.iter().copied();
            let batch = tree.sample_with(draws.len(), || it.next().unwrap());
            prop_assert_eq!(batch.len(), draws.len());
            for ix in batch {
                prop_assert!(ix < priorities.len());
                prop_assert!(tree.get(ix).unwrap() > 0.0);
            }
        }
    }
}
