use crate::backend::ComputeBackend;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::{resolve_axis, validate_permutation, Shape};
use crate::storage::CpuStorage;

/// Window reduction used by [`Tensor::pool2d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Avg,
    Max,
}

/// A tensor backed by CPU storage.
///
/// Holds contiguous, row-major data with an associated shape and dtype.
/// Matrix products are dispatched to a `ComputeBackend`; layout operations
/// (broadcast, permute, concat, gather) are implemented here directly.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
    dtype: DType,
}

/// Splits a linear row-major index into per-axis coordinates.
fn unravel(mut index: usize, dims: &[usize], coords: &mut [usize]) {
    for axis in (0..dims.len()).rev() {
        coords[axis] = index % dims[axis];
        index /= dims[axis];
    }
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: CpuStorage::from_f32_vec(data),
            shape,
            dtype: DType::F32,
        }
    }

    /// Fallible variant of [`Tensor::new`].
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor::new(data, shape))
    }

    /// Create an i16 tensor, used for quantized operands.
    pub fn from_i16(data: Vec<i16>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor {
            storage: CpuStorage::from_i16_vec(data),
            shape,
            dtype: DType::I16,
        })
    }

    /// Create a tensor with every element set to `value`.
    pub fn full(shape: Shape, value: f32) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::from_f32_vec(vec![value; n]),
            shape,
            dtype: DType::F32,
        }
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones with the given shape.
    pub fn ones(shape: Shape) -> Self {
        Self::full(shape, 1.0)
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data_f32(&self) -> Result<&[f32]> {
        self.storage.as_f32_slice()
    }

    /// Returns the underlying data as an i16 slice.
    pub fn data_i16(&self) -> Result<&[i16]> {
        self.storage.as_i16_slice()
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
            dtype: self.dtype,
        })
    }

    /// Expand to `target` following numpy broadcasting rules.
    pub fn broadcast_to(&self, target: &Shape) -> Result<Tensor> {
        if &self.shape == target {
            return Ok(self.clone());
        }
        let out_shape = Shape::broadcast_shape(&self.shape, target)?;
        if &out_shape != target {
            return Err(TensorError::BroadcastError {
                a: self.shape.dims().to_vec(),
                b: target.dims().to_vec(),
            });
        }
        let src = self.data_f32()?;
        let src_shape = self.shape.pad_to_rank(target.ndim());
        let src_strides = src_shape.strides();
        let dims = target.dims();

        let mut coords = vec![0usize; dims.len()];
        let mut out = Vec::with_capacity(target.numel());
        for i in 0..target.numel() {
            unravel(i, dims, &mut coords);
            let offset: usize = coords
                .iter()
                .zip(src_shape.dims())
                .zip(&src_strides)
                .map(|((&c, &d), &s)| if d == 1 { 0 } else { c * s })
                .sum();
            out.push(src[offset]);
        }
        Ok(Tensor::new(out, target.clone()))
    }

    /// Reorder axes: output axis `i` is input axis `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Tensor> {
        validate_permutation(perm, self.shape.ndim())?;
        let out_shape = self.shape.permute(perm)?;
        let src = self.data_f32()?;
        let src_strides = self.shape.strides();
        let dims = out_shape.dims();

        let mut coords = vec![0usize; dims.len()];
        let mut out = Vec::with_capacity(src.len());
        for i in 0..out_shape.numel() {
            unravel(i, dims, &mut coords);
            let offset: usize = coords
                .iter()
                .zip(perm)
                .map(|(&c, &p)| c * src_strides[p])
                .sum();
            out.push(src[offset]);
        }
        Ok(Tensor::new(out, out_shape))
    }

    /// Join tensors along `axis`. All other dimensions must agree.
    pub fn concat(parts: &[&Tensor], axis: usize) -> Result<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::Other("concat: no inputs".to_string()))?;
        let rank = first.shape.ndim();
        let axis = resolve_axis(axis as isize, rank)?;

        let mut axis_total = 0;
        for part in parts {
            let same_rank = part.shape.ndim() == rank;
            let compatible = same_rank
                && (0..rank).all(|d| d == axis || part.shape.dim(d) == first.shape.dim(d));
            if !compatible {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.dims().to_vec(),
                    got: part.shape.dims().to_vec(),
                });
            }
            axis_total += part.shape.dim(axis);
        }

        let outer: usize = first.shape.dims()[..axis].iter().product();
        let inner: usize = first.shape.dims()[axis + 1..].iter().product();
        let out_shape = first.shape.with_dim(axis, axis_total);
        let mut out = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            for part in parts {
                let block = part.shape.dim(axis) * inner;
                let data = part.data_f32()?;
                out.extend_from_slice(&data[o * block..(o + 1) * block]);
            }
        }
        Ok(Tensor::new(out, out_shape))
    }

    /// Gather slices along `axis` at the given positions.
    pub fn index_select(&self, axis: usize, indices: &[usize]) -> Result<Tensor> {
        let rank = self.shape.ndim();
        let axis = resolve_axis(axis as isize, rank)?;
        let size = self.shape.dim(axis);
        if let Some(&bad) = indices.iter().find(|&&i| i >= size) {
            return Err(TensorError::IndexOutOfRange { index: bad, size });
        }

        let src = self.data_f32()?;
        let outer: usize = self.shape.dims()[..axis].iter().product();
        let inner: usize = self.shape.dims()[axis + 1..].iter().product();
        let out_shape = self.shape.with_dim(axis, indices.len());
        let mut out = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            for &idx in indices {
                let start = (o * size + idx) * inner;
                out.extend_from_slice(&src[start..start + inner]);
            }
        }
        Ok(Tensor::new(out, out_shape))
    }

    /// Sum along `axis`, keeping it as a dimension of size 1.
    pub fn sum_axis(&self, axis: usize) -> Result<Tensor> {
        let rank = self.shape.ndim();
        let axis = resolve_axis(axis as isize, rank)?;
        let src = self.data_f32()?;
        let size = self.shape.dim(axis);
        let outer: usize = self.shape.dims()[..axis].iter().product();
        let inner: usize = self.shape.dims()[axis + 1..].iter().product();

        let mut out = vec![0.0f32; outer * inner];
        for o in 0..outer {
            for s in 0..size {
                let base = (o * size + s) * inner;
                for i in 0..inner {
                    out[o * inner + i] += src[base + i];
                }
            }
        }
        Ok(Tensor::new(out, self.shape.with_dim(axis, 1)))
    }

    /// Translate contents by `offsets` (one per axis); vacated cells take `pad`.
    pub fn shift(&self, offsets: &[isize], pad: f32) -> Result<Tensor> {
        if offsets.len() != self.shape.ndim() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: vec![offsets.len()],
            });
        }
        let src = self.data_f32()?;
        let dims = self.shape.dims();
        let strides = self.shape.strides();

        let mut coords = vec![0usize; dims.len()];
        let mut out = Vec::with_capacity(src.len());
        for i in 0..self.shape.numel() {
            unravel(i, dims, &mut coords);
            let mut offset = 0usize;
            let mut inside = true;
            for axis in 0..dims.len() {
                let c = coords[axis] as isize - offsets[axis];
                if c < 0 || c >= dims[axis] as isize {
                    inside = false;
                    break;
                }
                offset += c as usize * strides[axis];
            }
            out.push(if inside { src[offset] } else { pad });
        }
        Ok(Tensor::new(out, self.shape.clone()))
    }

    /// 2D pooling over an NCHW tensor with zero padding.
    ///
    /// Padded cells are excluded from both the average and the maximum.
    pub fn pool2d(
        &self,
        kind: PoolKind,
        window: [usize; 2],
        padding: [usize; 2],
        stride: [usize; 2],
    ) -> Result<Tensor> {
        let dims = self.shape.dims();
        if dims.len() != 4 {
            return Err(TensorError::Other(format!(
                "pool2d requires a 4D NCHW tensor, got {}",
                self.shape
            )));
        }
        let (n, c, h, w) = (dims[0], dims[1], dims[2], dims[3]);
        let [kh, kw] = window;
        let [ph, pw] = padding;
        let [sh, sw] = stride;
        if kh == 0 || kw == 0 || sh == 0 || sw == 0 || h + 2 * ph < kh || w + 2 * pw < kw {
            return Err(TensorError::Other(format!(
                "pool2d: window {:?} stride {:?} padding {:?} invalid for {}",
                window, stride, padding, self.shape
            )));
        }
        let oh = (h + 2 * ph - kh) / sh + 1;
        let ow = (w + 2 * pw - kw) / sw + 1;
        let src = self.data_f32()?;

        let mut out = Vec::with_capacity(n * c * oh * ow);
        for plane in 0..n * c {
            let base = plane * h * w;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = match kind {
                        PoolKind::Avg => 0.0f32,
                        PoolKind::Max => f32::NEG_INFINITY,
                    };
                    let mut count = 0usize;
                    for ky in 0..kh {
                        let y = (oy * sh + ky) as isize - ph as isize;
                        if y < 0 || y >= h as isize {
                            continue;
                        }
                        for kx in 0..kw {
                            let x = (ox * sw + kx) as isize - pw as isize;
                            if x < 0 || x >= w as isize {
                                continue;
                            }
                            let v = src[base + y as usize * w + x as usize];
                            acc = match kind {
                                PoolKind::Avg => acc + v,
                                PoolKind::Max => acc.max(v),
                            };
                            count += 1;
                        }
                    }
                    out.push(match kind {
                        PoolKind::Avg if count > 0 => acc / count as f32,
                        PoolKind::Avg => 0.0,
                        PoolKind::Max => acc,
                    });
                }
            }
        }
        Ok(Tensor::new(out, Shape::new(vec![n, c, oh, ow])))
    }

    /// Matrix multiplication of two 2D tensors using the given backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n].
    pub fn matmul(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        if self.shape.ndim() != 2 || other.shape.ndim() != 2 {
            return Err(TensorError::Other(
                "matmul requires 2D tensors".to_string(),
            ));
        }

        let m = self.shape.dim(0);
        let k = self.shape.dim(1);
        let k2 = other.shape.dim(0);
        let n = other.shape.dim(1);

        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let result_data = backend.matmul(self.data_f32()?, other.data_f32()?, m, k, n)?;
        Ok(Tensor::new(result_data, Shape::new(vec![m, n])))
    }
}
