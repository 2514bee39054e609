//! A fixed-capacity sum tree for sampling indices in proportion to their priority.
//!
//! ```
//! use rand::{rngs::StdRng, SeedableRng};
//! use sumtree::SumTree;
//!
//! let mut tree = SumTree::new(4).unwrap();
//! for (ix, priority) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
//!     tree.set(ix, priority).unwrap();
//! }
//! assert_eq!(tree.total(), 10.0);
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let batch = tree.sample(8, &mut rng);
//! assert_eq!(batch.len(), 8);
//! assert!(batch.iter().all(|&ix| ix < tree.capacity()));
//! ```

/// Data structures
pub mod ds;

/// Error types
mod error;

pub use ds::SumTree;
pub use error::{Result, SumTreeError};
