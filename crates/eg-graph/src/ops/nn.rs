use eg_tensor::shape::resolve_axis;
use eg_tensor::{PoolKind, Shape};

use crate::error::{GraphError, Result};
use crate::layers::{dense, Activation};
use crate::node::{Expr, Op, Scalar};
use crate::ops::build;
use crate::ops::elementwise::{add, mul, mul_scalar, scalar_sub};
use crate::ops::index::rows_by;
use crate::ops::shape::{reshape, swap_axes};

/// Additive bias applied to masked-out logits. Large but finite, so it does
/// not fully suppress logits of comparable magnitude.
pub const MASK_BIAS: f32 = -99_999_999.0;

/// Default epsilon for [`layer_norm`].
pub const LAYER_NORM_EPS: f32 = 1e-9;

/// Softmax over `axis`. Axes other than the last are swapped to the end and back.
pub fn softmax(a: &Expr, axis: isize) -> Result<Expr> {
    let rank = a.shape().ndim();
    if rank == 0 {
        return Err(GraphError::InvalidAxis { axis, rank });
    }
    let axis = resolve_axis(axis, rank)? as isize;
    let last = rank as isize - 1;
    if axis == last {
        return build(Op::Softmax, vec![a.clone()]);
    }
    let moved = swap_axes(a, axis, last)?;
    let normalized = build(Op::Softmax, vec![moved])?;
    swap_axes(&normalized, axis, last)
}

/// Softmax with positions where `mask == 0` pushed down by [`MASK_BIAS`].
pub fn masked_softmax(a: &Expr, mask: &Expr, axis: isize) -> Result<Expr> {
    let bias = mul_scalar(&scalar_sub(1.0, mask)?, MASK_BIAS)?;
    softmax(&add(a, &bias)?, axis)
}

/// Log-softmax over the last axis.
pub fn logsoftmax(a: &Expr) -> Result<Expr> {
    build(Op::LogSoftmax, vec![a.clone()])
}

/// Per-row negative log-likelihood of the target class in `indices`.
pub fn cross_entropy(logits: &Expr, indices: &Expr) -> Result<Expr> {
    build(Op::CrossEntropy, vec![logits.clone(), indices.clone()])
}

/// Normalize the last axis, then scale by `gamma` and shift by `beta`.
pub fn layer_norm(x: &Expr, gamma: &Expr, beta: Option<&Expr>, eps: f32) -> Result<Expr> {
    let mut inputs = vec![x.clone(), gamma.clone()];
    inputs.extend(beta.cloned());
    build(Op::LayerNorm { eps: Scalar(eps) }, inputs)
}

/// `y · σ(t) + x · (1 - σ(t))`
pub fn highway(y: &Expr, x: &Expr, t: &Expr) -> Result<Expr> {
    build(Op::Highway, vec![y.clone(), x.clone(), t.clone()])
}

/// Highway block with its own gate and transform layers under `prefix`.
pub fn highway_layer(prefix: &str, x: &Expr) -> Result<Expr> {
    let dim = x.shape().last_dim();
    let gate = dense(x, &format!("{}_highway_d1", prefix), dim, Activation::Sigmoid)?;
    let relued = dense(x, &format!("{}_highway_d2", prefix), dim, Activation::Relu)?;
    let carry = mul(&scalar_sub(1.0, &gate)?, x)?;
    add(&mul(&gate, &relued)?, &carry)
}

fn pooling(
    x: &Expr,
    kind: PoolKind,
    window: [usize; 2],
    padding: [usize; 2],
    stride: [usize; 2],
) -> Result<Expr> {
    build(
        Op::Pooling {
            kind,
            window,
            padding,
            stride,
        },
        vec![x.clone()],
    )
}

/// Average pooling over an NCHW input. Padded cells are not counted.
pub fn avg_pooling(
    x: &Expr,
    height: usize,
    width: usize,
    pad_height: usize,
    pad_width: usize,
    stride_height: usize,
    stride_width: usize,
) -> Result<Expr> {
    pooling(
        x,
        PoolKind::Avg,
        [height, width],
        [pad_height, pad_width],
        [stride_height, stride_width],
    )
}

pub fn max_pooling(
    x: &Expr,
    height: usize,
    width: usize,
    pad_height: usize,
    pad_width: usize,
    stride_height: usize,
    stride_width: usize,
) -> Result<Expr> {
    pooling(
        x,
        PoolKind::Max,
        [height, width],
        [pad_height, pad_width],
        [stride_height, stride_width],
    )
}

fn rank3(x: &Expr, op: &'static str) -> Result<(usize, usize, usize)> {
    match x.shape().dims() {
        [a, b, c] => Ok((*a, *b, *c)),
        dims => Err(GraphError::ShapeMismatch {
            op,
            expected: vec![0, 0, 0],
            got: dims.to_vec(),
        }),
    }
}

/// `[words, batch, emb]` to the NCHW layout `[batch, 1, words, emb]`.
pub fn to_pooling_layout(x: &Expr) -> Result<Expr> {
    let (words, batch, emb) = rank3(x, "to_pooling_layout")?;
    let order: Vec<u32> = (0..batch)
        .flat_map(|b| (0..words).map(move |t| (t * batch + b) as u32))
        .collect();
    let flat = reshape(x, [words * batch, emb])?;
    reshape(&rows_by(&flat, &order)?, [batch, 1, words, emb])
}

/// Inverse of [`to_pooling_layout`]: `[batch, 1, words, emb]` to `[words, batch, emb]`.
pub fn from_pooling_layout(x: &Expr) -> Result<Expr> {
    let (batch, words, emb) = match x.shape().dims() {
        [b, 1, w, e] => (*b, *w, *e),
        dims => {
            return Err(GraphError::ShapeMismatch {
                op: "from_pooling_layout",
                expected: vec![0, 1, 0, 0],
                got: dims.to_vec(),
            })
        }
    };
    let order: Vec<u32> = (0..words)
        .flat_map(|t| (0..batch).map(move |b| (b * words + t) as u32))
        .collect();
    let flat = reshape(x, [batch * words, emb])?;
    reshape(&rows_by(&flat, &order)?, Shape::new(vec![words, batch, emb]))
}
