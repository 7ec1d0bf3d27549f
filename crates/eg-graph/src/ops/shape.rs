use eg_tensor::shape::{
    is_identity_permutation, resolve_axis, swap_axes_permutation, transpose_permutation,
};
use eg_tensor::{Shape, TensorError};

use crate::error::{GraphError, Result};
use crate::inits::NodeInitializer;
use crate::node::{Expr, Op, Scalar};
use crate::ops::{build, graph_of};

pub fn reshape(a: &Expr, shape: impl Into<Shape>) -> Result<Expr> {
    build(Op::Reshape { shape: shape.into() }, vec![a.clone()])
}

/// Right-align `a`'s shape into rank `dims`, padding with leading 1s.
/// Returns `a` itself when it already has at least `dims` axes.
pub fn atleast_nd(a: &Expr, dims: usize) -> Result<Expr> {
    if a.shape().ndim() >= dims {
        return Ok(a.clone());
    }
    reshape(a, a.shape().pad_to_rank(dims))
}

pub fn atleast_1d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 1)
}

pub fn atleast_2d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 2)
}

pub fn atleast_3d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 3)
}

pub fn atleast_4d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 4)
}

pub fn flatten(a: &Expr) -> Result<Expr> {
    reshape(a, [a.shape().numel()])
}

/// Collapse all leading axes into one.
pub fn flatten_2d(a: &Expr) -> Result<Expr> {
    let shape = a.shape();
    reshape(a, [shape.rows(), shape.last_dim()])
}

pub fn concatenate(nodes: &[Expr], axis: isize) -> Result<Expr> {
    let graph = graph_of(nodes, "concatenate")?;
    let axis = resolve_axis(axis, nodes[0].shape().ndim())?;
    graph.expression(Op::Concatenate { axis }, nodes.to_vec())
}

/// `n` copies of `a` joined along `axis`. `n == 1` returns `a` itself.
pub fn repeat(a: &Expr, n: usize, axis: isize) -> Result<Expr> {
    match n {
        0 => Err(GraphError::Other("repeat: count must be at least 1".to_string())),
        1 => Ok(a.clone()),
        _ => concatenate(&vec![a.clone(); n], axis),
    }
}

/// Swap the last two axes.
pub fn transpose(a: &Expr) -> Result<Expr> {
    transpose_axes(a, &transpose_permutation(a.shape().ndim()))
}

/// Output axis `i` is input axis `perm[i]`. `perm` must be a permutation of
/// `0..rank`.
pub fn transpose_axes(a: &Expr, perm: &[usize]) -> Result<Expr> {
    build(
        Op::Transpose {
            perm: perm.to_vec(),
        },
        vec![a.clone()],
    )
}

/// Exchange two axes; returns `a` itself when they resolve to the same axis.
pub fn swap_axes(a: &Expr, axis1: isize, axis2: isize) -> Result<Expr> {
    let perm = swap_axes_permutation(a.shape().ndim(), axis1, axis2)?;
    if is_identity_permutation(&perm) {
        return Ok(a.clone());
    }
    transpose_axes(a, &perm)
}

/// Slice `step` of `axis`, keeping the axis with size 1. Negative values
/// count from the end.
pub fn step(a: &Expr, step: isize, axis: isize) -> Result<Expr> {
    let axis = resolve_axis(axis, a.shape().ndim())?;
    let size = a.shape().dim(axis);
    let index = if step < 0 { step + size as isize } else { step };
    if index < 0 || index as usize >= size {
        return Err(TensorError::IndexOutOfRange {
            index: step.unsigned_abs(),
            size,
        }
        .into());
    }
    build(
        Op::Step {
            index: index as usize,
            axis,
        },
        vec![a.clone()],
    )
}

/// Translate contents by one offset per axis, filling with `pad`.
pub fn shift(a: &Expr, offsets: &[isize], pad: f32) -> Result<Expr> {
    build(
        Op::Shift {
            offsets: offsets.to_vec(),
            pad: Scalar(pad),
        },
        vec![a.clone()],
    )
}

/// New constant with `a`'s shape.
pub fn constant_like(a: &Expr, init: NodeInitializer) -> Result<Expr> {
    a.graph()?.constant(a.shape().clone(), init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Graph;
    use eg_tensor::Tensor;

    fn setup() -> (Graph, Expr) {
        let g = Graph::new(GraphConfig::default());
        let x = g.input(
            "x",
            Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3])),
        );
        (g, x)
    }

    fn values(g: &Graph, e: &Expr) -> Vec<f32> {
        g.forward(e).unwrap().data_f32().unwrap().to_vec()
    }

    #[test]
    fn test_repeat() {
        let (g, x) = setup();
        assert_eq!(repeat(&x, 1, 0).unwrap(), x);

        let r = repeat(&x, 3, 0).unwrap();
        assert_eq!(r.shape().dims(), &[6, 3]);
        assert_eq!(r.inputs().len(), 3);
        assert!(r.inputs().iter().all(|i| i == &x));
        assert_eq!(values(&g, &r)[..6], values(&g, &x)[..]);
        assert!(repeat(&x, 0, 0).is_err());
    }

    #[test]
    fn test_concatenate_negative_axis() {
        let (g, x) = setup();
        let y = concatenate(&[x.clone(), x.clone()], -1).unwrap();
        assert_eq!(y.shape().dims(), &[2, 6]);
        assert_eq!(values(&g, &y), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 4.0, 5.0, 6.0]);
        assert!(concatenate(&[x.clone()], 2).is_err());
        assert!(concatenate(&[], 0).is_err());
    }

    #[test]
    fn test_concatenate_mismatch() {
        let (g, x) = setup();
        let y = g.ones([3, 3]).unwrap();
        assert!(matches!(
            concatenate(&[x, y], 1),
            Err(GraphError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_atleast_nd() {
        let (_g, x) = setup();
        assert_eq!(atleast_2d(&x).unwrap(), x);
        let x4 = atleast_4d(&x).unwrap();
        assert_eq!(x4.shape().dims(), &[1, 1, 2, 3]);
        assert_eq!(atleast_4d(&x4).unwrap(), x4);
    }

    #[test]
    fn test_flatten() {
        let (_g, x) = setup();
        assert_eq!(flatten(&x).unwrap().shape().dims(), &[6]);
        let x3 = reshape(&x, [1, 2, 3]).unwrap();
        assert_eq!(flatten_2d(&x3).unwrap().shape().dims(), &[2, 3]);
        assert!(reshape(&x, [4]).is_err());
    }

    #[test]
    fn test_transpose_forms() {
        let (g, x) = setup();
        let t = transpose(&x).unwrap();
        assert_eq!(t.shape().dims(), &[3, 2]);
        assert_eq!(values(&g, &t), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        assert_eq!(swap_axes(&x, -1, 1).unwrap(), x);
        assert_eq!(swap_axes(&x, 0, 1).unwrap(), t);

        assert!(matches!(
            transpose_axes(&x, &[0, 0]),
            Err(GraphError::InvalidPermutation { .. })
        ));
        assert!(transpose_axes(&x, &[0]).is_err());
    }

    #[test]
    fn test_swap_axes_self_inverse() {
        let (g, _x) = setup();
        let x = g.ones([2, 3, 4]).unwrap();
        let once = swap_axes(&x, 0, 2).unwrap();
        assert_eq!(once.shape().dims(), &[4, 3, 2]);
        let twice = swap_axes(&once, 0, 2).unwrap();
        assert_eq!(twice.shape(), x.shape());
    }

    #[test]
    fn test_step() {
        let (g, x) = setup();
        let last = step(&x, -1, 1).unwrap();
        assert_eq!(last.shape().dims(), &[2, 1]);
        assert_eq!(values(&g, &last), vec![3.0, 6.0]);
        assert!(step(&x, 3, 1).is_err());
        assert!(matches!(step(&x, 0, 2), Err(GraphError::InvalidAxis { .. })));
    }

    #[test]
    fn test_shift() {
        let (g, x) = setup();
        let s = shift(&x, &[0, 1], -1.0).unwrap();
        assert_eq!(values(&g, &s), vec![-1.0, 1.0, 2.0, -1.0, 4.0, 5.0]);
        assert!(shift(&x, &[1], 0.0).is_err());
    }

    #[test]
    fn test_constant_like() {
        let (g, x) = setup();
        let c = constant_like(&x, NodeInitializer::FromValue(2.0)).unwrap();
        assert_eq!(c.shape(), x.shape());
        assert_eq!(values(&g, &c), vec![2.0; 6]);
    }
}
