/// Errors returned by [`SumTree`](crate::SumTree) operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SumTreeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Leaf index {index} is out of range for capacity {capacity}")]
    IndexOutOfRange { index: usize, capacity: usize },
}

pub type Result<T> = std::result::Result<T, SumTreeError>;
