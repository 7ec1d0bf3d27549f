//! `eg-tensor` - Host tensors and the reference compute backend for expr-graph.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage (f32 or quantized i16)
//! - A `ComputeBackend` trait for pluggable compute
//! - A reference `CpuBackend` implementation
//! - Shape utilities: axis resolution, rank padding, permutations, broadcasting

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::{BinaryKernel, ComputeBackend, UnaryKernel};
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::{PoolKind, Tensor};
