mod sum_tree;

pub use sum_tree::SumTree;
