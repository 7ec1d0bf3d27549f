use eg_tensor::{DType, TensorError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: isize, rank: usize },
    #[error("{op}: shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("invalid permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },
    #[error("{op}: expected {expected} operand, got {got}")]
    DTypeMismatch {
        op: &'static str,
        expected: DType,
        got: DType,
    },
    #[error("{op}: expected {expected} operands, got {got}")]
    Arity {
        op: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("node {0} has no value")]
    MissingValue(String),
    #[error("expression graph has been dropped")]
    GraphDropped,
    #[error("operands belong to different expression graphs")]
    ForeignNode,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("tensor error: {0}")]
    Tensor(#[source] TensorError),
    #[error("{0}")]
    Other(String),
}

impl From<TensorError> for GraphError {
    fn from(err: TensorError) -> Self {
        match err {
            TensorError::InvalidAxis { axis, ndim } => GraphError::InvalidAxis { axis, rank: ndim },
            TensorError::InvalidPermutation { perm, ndim } => {
                GraphError::InvalidPermutation { perm, rank: ndim }
            }
            other => GraphError::Tensor(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_errors_keep_their_kind() {
        let err: GraphError = TensorError::InvalidAxis { axis: -3, ndim: 2 }.into();
        assert!(matches!(err, GraphError::InvalidAxis { axis: -3, rank: 2 }));

        let err: GraphError = TensorError::Other("x".to_string()).into();
        assert!(matches!(err, GraphError::Tensor(_)));
    }
}
