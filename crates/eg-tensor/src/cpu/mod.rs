pub mod matmul;
pub mod unary;

use crate::backend::{BinaryKernel, ComputeBackend, UnaryKernel};
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_rows(op: &str, len: usize, n: usize) -> Result<usize> {
    if n == 0 {
        return Err(TensorError::Other(format!("{}: row size must be > 0", op)));
    }
    if len % n != 0 {
        return Err(TensorError::Other(format!(
            "{}: x.len()={} is not a multiple of {}",
            op, len, n
        )));
    }
    Ok(len / n)
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        matmul::matmul_f32(a, b, m, k, n)
    }

    fn matmul_i16_nt(
        &self,
        a: &[i16],
        b: &[i16],
        m: usize,
        k: usize,
        n: usize,
        unquant: f32,
    ) -> Result<Vec<f32>> {
        matmul::matmul_i16_nt(a, b, m, k, n, unquant)
    }

    fn unary(&self, x: &[f32], kernel: UnaryKernel) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| unary::apply_unary(kernel, v)).collect())
    }

    fn binary(&self, a: &[f32], b: &[f32], kernel: BinaryKernel) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| unary::apply_binary(kernel, x, y))
            .collect())
    }

    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        let n_chunks = check_rows("softmax", x.len(), n)?;
        let mut result = vec![0.0f32; x.len()];

        for chunk in 0..n_chunks {
            let offset = chunk * n;
            let chunk_data = &x[offset..offset + n];

            // Find max for numerical stability
            let max_val = chunk_data
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for i in 0..n {
                let e = (chunk_data[i] - max_val).exp();
                result[offset + i] = e;
                sum += e;
            }
            for v in &mut result[offset..offset + n] {
                *v /= sum;
            }
        }

        Ok(result)
    }

    fn log_softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        let n_chunks = check_rows("log_softmax", x.len(), n)?;
        let mut result = vec![0.0f32; x.len()];

        for chunk in 0..n_chunks {
            let offset = chunk * n;
            let chunk_data = &x[offset..offset + n];
            let max_val = chunk_data
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            let log_sum = chunk_data
                .iter()
                .map(|v| (v - max_val).exp())
                .sum::<f32>()
                .ln();
            for i in 0..n {
                result[offset + i] = chunk_data[i] - max_val - log_sum;
            }
        }

        Ok(result)
    }

    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: Option<&[f32]>,
        eps: f32,
        n: usize,
    ) -> Result<Vec<f32>> {
        let n_rows = check_rows("layer_norm", x.len(), n)?;
        if gamma.len() != n {
            return Err(TensorError::Other(format!(
                "layer_norm: gamma.len()={} but row size={}",
                gamma.len(),
                n
            )));
        }
        if let Some(beta) = beta {
            if beta.len() != n {
                return Err(TensorError::Other(format!(
                    "layer_norm: beta.len()={} but row size={}",
                    beta.len(),
                    n
                )));
            }
        }

        let mut result = vec![0.0f32; x.len()];
        for row in 0..n_rows {
            let offset = row * n;
            let row_data = &x[offset..offset + n];

            let mean = row_data.iter().sum::<f32>() / n as f32;
            let var = row_data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
            let sigma = (var + eps).sqrt();

            for i in 0..n {
                let shift = beta.map_or(0.0, |b| b[i]);
                result[offset + i] = gamma[i] * (row_data[i] - mean) / sigma + shift;
            }
        }

        Ok(result)
    }
}
