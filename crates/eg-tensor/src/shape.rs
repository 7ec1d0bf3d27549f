use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

/// Resolve a possibly negative axis index against `rank`.
///
/// `-1` names the last axis. The result must lie in `[0, rank)`.
pub fn resolve_axis(axis: isize, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 {
        rank as isize + axis
    } else {
        axis
    };
    if resolved < 0 || resolved >= rank as isize {
        return Err(TensorError::InvalidAxis { axis, ndim: rank });
    }
    Ok(resolved as usize)
}

/// The identity permutation of `rank` axes.
pub fn identity_permutation(rank: usize) -> Vec<usize> {
    (0..rank).collect()
}

/// Default transpose permutation: swaps the last two axes.
///
/// Identity for rank <= 1.
pub fn transpose_permutation(rank: usize) -> Vec<usize> {
    let mut perm = identity_permutation(rank);
    if rank > 1 {
        perm.swap(rank - 1, rank - 2);
    }
    perm
}

/// Permutation that exchanges `axis1` and `axis2` and fixes every other axis.
///
/// Both axes are resolved first; when they name the same axis the identity
/// permutation is returned.
pub fn swap_axes_permutation(rank: usize, axis1: isize, axis2: isize) -> Result<Vec<usize>> {
    let a = resolve_axis(axis1, rank)?;
    let b = resolve_axis(axis2, rank)?;
    let mut perm = identity_permutation(rank);
    perm.swap(a, b);
    Ok(perm)
}

/// Returns true if `perm` maps every axis to itself.
pub fn is_identity_permutation(perm: &[usize]) -> bool {
    perm.iter().enumerate().all(|(i, &p)| i == p)
}

/// Checks that `perm` is a permutation of `[0, rank)`.
pub fn validate_permutation(perm: &[usize], rank: usize) -> Result<()> {
    let invalid = || TensorError::InvalidPermutation {
        perm: perm.to_vec(),
        ndim: rank,
    };
    if perm.len() != rank {
        return Err(invalid());
    }
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return Err(invalid());
        }
        seen[p] = true;
    }
    Ok(())
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Create a shape from a slice of dimensions.
    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Size of a possibly negative axis.
    pub fn dim_at(&self, axis: isize) -> Result<usize> {
        Ok(self.dims[self.axis(axis)?])
    }

    /// Size of the last axis, or 1 for a scalar shape.
    pub fn last_dim(&self) -> usize {
        self.dims.last().copied().unwrap_or(1)
    }

    /// Number of rows when the shape is viewed as a 2D matrix `[numel / last, last]`.
    pub fn rows(&self) -> usize {
        match self.last_dim() {
            0 => 0,
            last => self.numel() / last,
        }
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Resolve a possibly negative axis against this shape's rank.
    pub fn axis(&self, axis: isize) -> Result<usize> {
        resolve_axis(axis, self.ndim())
    }

    /// Returns a copy with dimension `i` replaced by `size`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn with_dim(&self, i: usize, size: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims[i] = size;
        Shape { dims }
    }

    /// Right-align this shape into a shape of at least `min_rank` dimensions,
    /// filling the leading entries with 1.
    pub fn pad_to_rank(&self, min_rank: usize) -> Shape {
        if self.ndim() >= min_rank {
            return self.clone();
        }
        let mut dims = vec![1usize; min_rank - self.ndim()];
        dims.extend_from_slice(&self.dims);
        Shape { dims }
    }

    /// Apply an axis permutation: output dimension `i` is input dimension `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Shape> {
        validate_permutation(perm, self.ndim())?;
        Ok(Shape::new(perm.iter().map(|&p| self.dims[p]).collect()))
    }

    /// Divide every dimension by `factor`, collapsing nearby sizes into one bucket.
    pub fn coarsen(&self, factor: usize) -> Shape {
        Shape::new(self.dims.iter().map(|d| d / factor.max(1)).collect())
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Compute the broadcast shape of `a` and `b` using numpy-style broadcasting rules.
    ///
    /// Rules:
    /// 1. If the shapes have different numbers of dimensions, the shorter shape is
    ///    padded with ones on the left.
    /// 2. For each dimension, sizes must either be equal, or one of them must be 1.
    ///    The output dimension is the maximum of the two.
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
        let max_ndim = a.ndim().max(b.ndim());
        let a = a.pad_to_rank(max_ndim);
        let b = b.pad_to_rank(max_ndim);

        let mut result = Vec::with_capacity(max_ndim);
        for (&da, &db) in a.dims.iter().zip(b.dims.iter()) {
            if da == db || db == 1 {
                result.push(da);
            } else if da == 1 {
                result.push(db);
            } else {
                return Err(TensorError::BroadcastError {
                    a: a.dims.clone(),
                    b: b.dims.clone(),
                });
            }
        }
        Ok(Shape::new(result))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}
