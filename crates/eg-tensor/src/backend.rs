use std::fmt::Debug;

use crate::error::Result;

/// Elementwise single-operand kernels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryKernel {
    Sigmoid,
    Relu,
    /// Leaky rectifier with the given negative slope.
    PRelu(f32),
    Tanh,
    Exp,
    Log,
    /// x * sigmoid(x)
    Swish,
    Neg,
    Square,
    /// sqrt(x + eps)
    Sqrt(f32),
    /// Clamp to [-c, c].
    Clip(f32),
    /// x + s
    AddScalar(f32),
    /// x * s
    MulScalar(f32),
}

/// Elementwise two-operand kernels over equal-length inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKernel {
    Add,
    Sub,
    Mul,
    Div,
    LogAddExp,
    Maximum,
    Minimum,
}

/// Trait for pluggable compute backends.
///
/// Data is passed in as contiguous row-major slices and returned as owned
/// vectors. Broadcasting and layout changes happen before a kernel is called.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Fixed-point product against a transposed right operand: C = unquant * A @ Bᵀ.
    ///
    /// - `a`: row-major i16 data of shape [m, k]
    /// - `b`: row-major i16 data of shape [n, k]
    /// - Returns: row-major f32 data of shape [m, n]
    fn matmul_i16_nt(
        &self,
        a: &[i16],
        b: &[i16],
        m: usize,
        k: usize,
        n: usize,
        unquant: f32,
    ) -> Result<Vec<f32>>;

    /// Apply a unary kernel to every element.
    fn unary(&self, x: &[f32], kernel: UnaryKernel) -> Result<Vec<f32>>;

    /// Apply a binary kernel pairwise over two equal-length slices.
    fn binary(&self, a: &[f32], b: &[f32], kernel: BinaryKernel) -> Result<Vec<f32>>;

    /// Softmax over consecutive chunks of `n` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Log-softmax over consecutive chunks of `n` elements.
    fn log_softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Layer normalization over consecutive rows of `n` elements.
    ///
    /// For each row:
    ///   mu = mean(x), sigma = sqrt(mean((x - mu)^2) + eps)
    ///   result[i] = gamma[i] * (x[i] - mu) / sigma + beta[i]
    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: Option<&[f32]>,
        eps: f32,
        n: usize,
    ) -> Result<Vec<f32>>;
}
