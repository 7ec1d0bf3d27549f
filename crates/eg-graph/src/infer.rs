//! Output shape and dtype inference for every non-leaf operator.

use eg_tensor::shape::validate_permutation;
use eg_tensor::{DType, Shape, TensorError};

use crate::error::{GraphError, Result};
use crate::node::{Expr, Op};

fn arity(op: &Op, inputs: &[Expr], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(GraphError::Arity {
            op: op.name(),
            expected,
            got: inputs.len(),
        });
    }
    Ok(())
}

fn expect_dtype(op: &Op, input: &Expr, expected: DType) -> Result<()> {
    if input.dtype() != expected {
        return Err(GraphError::DTypeMismatch {
            op: op.name(),
            expected,
            got: input.dtype(),
        });
    }
    Ok(())
}

fn mismatch(op: &Op, expected: &Shape, got: &Shape) -> GraphError {
    GraphError::ShapeMismatch {
        op: op.name(),
        expected: expected.dims().to_vec(),
        got: got.dims().to_vec(),
    }
}

fn broadcast(op: &Op, a: &Shape, b: &Shape) -> Result<Shape> {
    Shape::broadcast_shape(a, b).map_err(|_| mismatch(op, a, b))
}

fn check_axis(axis: usize, shape: &Shape) -> Result<()> {
    if axis >= shape.ndim() {
        return Err(TensorError::InvalidAxis {
            axis: axis as isize,
            ndim: shape.ndim(),
        }
        .into());
    }
    Ok(())
}

/// Last two axes of `shape`, swapped when `trans` is set.
fn matrix_dims(op: &Op, shape: &Shape, trans: bool) -> Result<(usize, usize)> {
    if shape.ndim() < 2 {
        return Err(GraphError::ShapeMismatch {
            op: op.name(),
            expected: vec![0, 0],
            got: shape.dims().to_vec(),
        });
    }
    let rows = shape.dim(shape.ndim() - 2);
    let cols = shape.dim(shape.ndim() - 1);
    Ok(if trans { (cols, rows) } else { (rows, cols) })
}

/// All dims but the last two must be 1, so the operand is a plain matrix.
fn require_matrix(op: &Op, shape: &Shape) -> Result<()> {
    let leading = &shape.dims()[..shape.ndim().saturating_sub(2)];
    if leading.iter().any(|&d| d != 1) {
        return Err(GraphError::ShapeMismatch {
            op: op.name(),
            expected: vec![shape.dim(shape.ndim() - 2), shape.last_dim()],
            got: shape.dims().to_vec(),
        });
    }
    Ok(())
}

/// Output of `a · b` where `a` may carry leading batch axes and `b` is a matrix.
fn product_shape(op: &Op, a: &Shape, b: &Shape, trans_a: bool, trans_b: bool) -> Result<Shape> {
    let (m, k) = matrix_dims(op, a, trans_a)?;
    let (k2, n) = matrix_dims(op, b, trans_b)?;
    require_matrix(op, b)?;
    if k != k2 {
        return Err(GraphError::ShapeMismatch {
            op: op.name(),
            expected: vec![k, n],
            got: vec![k2, n],
        });
    }
    let mut dims = a.dims().to_vec();
    let rank = dims.len();
    dims[rank - 2] = m;
    dims[rank - 1] = n;
    Ok(Shape::new(dims))
}

fn check_bias(op: &Op, out: &Shape, bias: &Shape) -> Result<()> {
    if bias.numel() != out.last_dim() || bias.last_dim() != out.last_dim() {
        return Err(mismatch(op, &Shape::new(vec![1, out.last_dim()]), bias));
    }
    Ok(())
}

fn check_index_vector(op: &Op, indices: &Expr) -> Result<usize> {
    if indices.shape().ndim() != 1 {
        return Err(GraphError::ShapeMismatch {
            op: op.name(),
            expected: vec![indices.shape().numel()],
            got: indices.shape().dims().to_vec(),
        });
    }
    Ok(indices.shape().dim(0))
}

/// Infer the output shape and dtype of `op` applied to `inputs`.
pub(crate) fn infer(op: &Op, inputs: &[Expr]) -> Result<(Shape, DType)> {
    match op {
        Op::Input { .. } | Op::Param { .. } | Op::Constant => Err(GraphError::Other(format!(
            "{} nodes are created through the graph, not inferred",
            op.name()
        ))),

        Op::Sigmoid
        | Op::Relu
        | Op::PRelu { .. }
        | Op::Clip { .. }
        | Op::Log
        | Op::Exp
        | Op::Swish
        | Op::Neg
        | Op::Sqrt { .. }
        | Op::Square
        | Op::ScalarAdd { .. }
        | Op::ScalarMult { .. }
        | Op::Softmax
        | Op::LogSoftmax => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            if matches!(op, Op::Softmax | Op::LogSoftmax) && inputs[0].shape().ndim() == 0 {
                return Err(TensorError::InvalidAxis { axis: -1, ndim: 0 }.into());
            }
            Ok((inputs[0].shape().clone(), DType::F32))
        }

        Op::Tanh => {
            let first = inputs.first().ok_or(GraphError::Arity {
                op: op.name(),
                expected: 1,
                got: 0,
            })?;
            let mut shape = first.shape().clone();
            for input in inputs {
                expect_dtype(op, input, DType::F32)?;
                shape = broadcast(op, &shape, input.shape())?;
            }
            Ok((shape, DType::F32))
        }

        Op::Plus
        | Op::Minus
        | Op::Mult
        | Op::Div
        | Op::LogAddExp
        | Op::Maximum
        | Op::Minimum
        | Op::Highway => {
            let expected = if matches!(op, Op::Highway) { 3 } else { 2 };
            arity(op, inputs, expected)?;
            let mut shape = inputs[0].shape().clone();
            for input in inputs {
                expect_dtype(op, input, DType::F32)?;
                shape = broadcast(op, &shape, input.shape())?;
            }
            Ok((shape, DType::F32))
        }

        Op::Concatenate { axis } => {
            let first = inputs.first().ok_or(GraphError::Arity {
                op: op.name(),
                expected: 1,
                got: 0,
            })?;
            let base = first.shape();
            check_axis(*axis, base)?;
            let mut total = 0;
            for input in inputs {
                expect_dtype(op, input, DType::F32)?;
                let s = input.shape();
                let compatible = s.ndim() == base.ndim()
                    && (0..base.ndim()).all(|d| d == *axis || s.dim(d) == base.dim(d));
                if !compatible {
                    return Err(mismatch(op, base, s));
                }
                total += s.dim(*axis);
            }
            Ok((base.with_dim(*axis, total), DType::F32))
        }

        Op::Reshape { shape } => {
            arity(op, inputs, 1)?;
            let src = inputs[0].shape();
            if src.numel() != shape.numel() {
                return Err(mismatch(op, src, shape));
            }
            Ok((shape.clone(), inputs[0].dtype()))
        }

        Op::Transpose { perm } => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let src = inputs[0].shape();
            validate_permutation(perm, src.ndim())?;
            Ok((src.permute(perm)?, DType::F32))
        }

        Op::Step { index, axis } => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let src = inputs[0].shape();
            check_axis(*axis, src)?;
            if *index >= src.dim(*axis) {
                return Err(TensorError::IndexOutOfRange {
                    index: *index,
                    size: src.dim(*axis),
                }
                .into());
            }
            Ok((src.with_dim(*axis, 1), DType::F32))
        }

        Op::Shift { offsets, .. } => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let src = inputs[0].shape();
            if offsets.len() != src.ndim() {
                return Err(GraphError::ShapeMismatch {
                    op: op.name(),
                    expected: vec![src.ndim()],
                    got: vec![offsets.len()],
                });
            }
            Ok((src.clone(), DType::F32))
        }

        Op::Rows | Op::Cols => {
            arity(op, inputs, 2)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let src = inputs[0].shape();
            let n = check_index_vector(op, &inputs[1])?;
            if src.ndim() != 2 {
                return Err(GraphError::ShapeMismatch {
                    op: op.name(),
                    expected: vec![src.rows(), src.last_dim()],
                    got: src.dims().to_vec(),
                });
            }
            let axis = if matches!(op, Op::Rows) { 0 } else { 1 };
            Ok((src.with_dim(axis, n), DType::F32))
        }

        Op::Select { axis } => {
            arity(op, inputs, 2)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let src = inputs[0].shape();
            check_axis(*axis, src)?;
            let n = check_index_vector(op, &inputs[1])?;
            Ok((src.with_dim(*axis, n), DType::F32))
        }

        Op::Sum { axis } | Op::Mean { axis } => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let src = inputs[0].shape();
            check_axis(*axis, src)?;
            Ok((src.with_dim(*axis, 1), DType::F32))
        }

        Op::ScalarProduct { axis } => {
            arity(op, inputs, 2)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            expect_dtype(op, &inputs[1], DType::F32)?;
            let shape = broadcast(op, inputs[0].shape(), inputs[1].shape())?;
            check_axis(*axis, &shape)?;
            Ok((shape.with_dim(*axis, 1), DType::F32))
        }

        Op::Dot {
            trans_a, trans_b, ..
        } => {
            arity(op, inputs, 2)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            expect_dtype(op, &inputs[1], DType::F32)?;
            let shape = product_shape(op, inputs[0].shape(), inputs[1].shape(), *trans_a, *trans_b)?;
            Ok((shape, DType::F32))
        }

        Op::DotBatched {
            trans_a, trans_b, ..
        } => {
            arity(op, inputs, 2)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            expect_dtype(op, &inputs[1], DType::F32)?;
            let (a, b) = (inputs[0].shape(), inputs[1].shape());
            let (m, k) = matrix_dims(op, a, *trans_a)?;
            let (k2, n) = matrix_dims(op, b, *trans_b)?;
            let batch_a = &a.dims()[..a.ndim() - 2];
            let batch_b = &b.dims()[..b.ndim() - 2];
            if k != k2 || batch_a != batch_b {
                return Err(mismatch(op, a, b));
            }
            let mut dims = batch_a.to_vec();
            dims.extend_from_slice(&[m, n]);
            Ok((Shape::new(dims), DType::F32))
        }

        Op::Affine {
            trans_a, trans_b, ..
        } => {
            arity(op, inputs, 4)?;
            for input in inputs {
                expect_dtype(op, input, DType::F32)?;
            }
            let shape = product_shape(op, inputs[0].shape(), inputs[1].shape(), *trans_a, *trans_b)?;
            check_bias(op, &shape, inputs[2].shape())?;
            let ones = Shape::new(vec![shape.rows(), 1]);
            if inputs[3].shape() != &ones {
                return Err(mismatch(op, &ones, inputs[3].shape()));
            }
            Ok((shape, DType::F32))
        }

        Op::QuantizeInt16 { .. } => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            Ok((inputs[0].shape().clone(), DType::I16))
        }

        Op::DotInt16 { .. } | Op::AffineInt16 { .. } => {
            let expected = if matches!(op, Op::DotInt16 { .. }) { 2 } else { 3 };
            arity(op, inputs, expected)?;
            expect_dtype(op, &inputs[0], DType::I16)?;
            expect_dtype(op, &inputs[1], DType::I16)?;
            // B arrives pre-transposed: the kernel computes A · Bᵀ.
            let shape = product_shape(op, inputs[0].shape(), inputs[1].shape(), false, true)?;
            if expected == 3 {
                expect_dtype(op, &inputs[2], DType::F32)?;
                check_bias(op, &shape, inputs[2].shape())?;
            }
            Ok((shape, DType::F32))
        }

        Op::CrossEntropy => {
            arity(op, inputs, 2)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let logits = inputs[0].shape();
            let n = check_index_vector(op, &inputs[1])?;
            if logits.ndim() == 0 || n != logits.rows() {
                return Err(GraphError::ShapeMismatch {
                    op: op.name(),
                    expected: vec![logits.rows()],
                    got: vec![n],
                });
            }
            Ok((logits.with_dim(logits.ndim() - 1, 1), DType::F32))
        }

        Op::LayerNorm { .. } => {
            if inputs.len() != 2 && inputs.len() != 3 {
                return Err(GraphError::Arity {
                    op: op.name(),
                    expected: 3,
                    got: inputs.len(),
                });
            }
            let x = inputs[0].shape();
            for input in inputs {
                expect_dtype(op, input, DType::F32)?;
            }
            for affine in &inputs[1..] {
                check_bias(op, x, affine.shape())?;
            }
            Ok((x.clone(), DType::F32))
        }

        Op::Pooling {
            window,
            padding,
            stride,
            ..
        } => {
            arity(op, inputs, 1)?;
            expect_dtype(op, &inputs[0], DType::F32)?;
            let x = inputs[0].shape();
            if x.ndim() != 4 {
                return Err(GraphError::ShapeMismatch {
                    op: op.name(),
                    expected: vec![0, 0, 0, 0],
                    got: x.dims().to_vec(),
                });
            }
            let (h, w) = (x.dim(2) + 2 * padding[0], x.dim(3) + 2 * padding[1]);
            if window.contains(&0) || stride.contains(&0) || h < window[0] || w < window[1] {
                return Err(GraphError::ShapeMismatch {
                    op: op.name(),
                    expected: window.to_vec(),
                    got: vec![h, w],
                });
            }
            let oh = (h - window[0]) / stride[0] + 1;
            let ow = (w - window[1]) / stride[1] + 1;
            Ok((Shape::new(vec![x.dim(0), x.dim(1), oh, ow]), DType::F32))
        }
    }
}
