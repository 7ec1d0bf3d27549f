//! Reference forward evaluation of a graph on its compute backend.
//!
//! Nodes are visited in dependency order and each computed value is kept on
//! the node, so shared sub-expressions are evaluated once.

use std::cell::Ref;
use std::collections::HashSet;

use eg_tensor::{BinaryKernel, ComputeBackend, Shape, Tensor, UnaryKernel};
use log::trace;

use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphInner};
use crate::node::{Expr, NodeId, Op};
use crate::quantize::{quantize_value, INT16_QUANT_MULT};

/// Dependencies of `root` that still need a value, in evaluation order.
fn schedule(root: &Expr) -> Vec<Expr> {
    let mut order = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![(root.clone(), false)];
    while let Some((expr, expanded)) = stack.pop() {
        if expanded {
            order.push(expr);
            continue;
        }
        if expr.value().is_some() || !visited.insert(expr.id()) {
            continue;
        }
        stack.push((expr.clone(), true));
        for input in expr.inputs().iter().rev() {
            stack.push((input.clone(), false));
        }
    }
    order
}

pub(crate) fn forward(graph: &Graph, root: &Expr) -> Result<Tensor> {
    let inner = graph.inner();
    let evaluated = evaluate(inner, root);
    // Windows left open belong to tagged nodes whose candidate terminal was not reached.
    inner.tuner.borrow_mut().discard_windows();
    evaluated?;
    let value = root
        .value()
        .map(|v| Tensor::clone(&v))
        .ok_or_else(|| GraphError::MissingValue(format!("{:?}", root)))?;
    Ok(value)
}

fn evaluate(inner: &GraphInner, root: &Expr) -> Result<()> {
    for expr in schedule(root) {
        let tag = expr.tuning_tag();
        if let Some(tag) = tag {
            inner.tuner.borrow_mut().begin(tag.candidate);
        }
        let value = compute(inner.backend.as_ref(), &expr)?;
        trace!("evaluated {:?}", expr);
        expr.set_value(value);
        if let Some(tag) = tag.filter(|t| t.terminal) {
            inner.tuner.borrow_mut().end(tag.candidate);
        }
    }
    Ok(())
}

fn values(expr: &Expr) -> Result<Vec<Ref<'_, Tensor>>> {
    expr.inputs()
        .iter()
        .map(|input| {
            input
                .value()
                .ok_or_else(|| GraphError::MissingValue(format!("{:?}", input)))
        })
        .collect()
}

fn to_tensor(data: Vec<f32>, shape: &Shape) -> Result<Tensor> {
    Ok(Tensor::from_vec(data, shape.clone())?)
}

fn unary(backend: &dyn ComputeBackend, x: &Tensor, kernel: UnaryKernel) -> Result<Tensor> {
    to_tensor(backend.unary(x.data_f32()?, kernel)?, x.shape())
}

fn binary(
    backend: &dyn ComputeBackend,
    a: &Tensor,
    b: &Tensor,
    shape: &Shape,
    kernel: BinaryKernel,
) -> Result<Tensor> {
    let a = a.broadcast_to(shape)?;
    let b = b.broadcast_to(shape)?;
    to_tensor(backend.binary(a.data_f32()?, b.data_f32()?, kernel)?, shape)
}

/// Index vector stored as f32 values.
fn index_list(t: &Tensor) -> Result<Vec<usize>> {
    t.data_f32()?
        .iter()
        .map(|&v| {
            if v >= 0.0 && v.fract() == 0.0 && v.is_finite() {
                Ok(v as usize)
            } else {
                Err(GraphError::Other(format!("invalid index value {}", v)))
            }
        })
        .collect()
}

fn swap_last_two(t: &Tensor) -> Result<Tensor> {
    let rank = t.shape().ndim();
    let mut perm: Vec<usize> = (0..rank).collect();
    perm.swap(rank - 2, rank - 1);
    Ok(t.permute(&perm)?)
}

/// Operand of a product as an `[rows, cols]` matrix, transposed if asked.
fn as_matrix(t: &Tensor, trans: bool) -> Result<Tensor> {
    let t = if trans { swap_last_two(t)? } else { t.clone() };
    let cols = t.shape().last_dim();
    let rows = t.shape().rows();
    Ok(t.reshape(Shape::new(vec![rows, cols]))?)
}

fn product(
    backend: &dyn ComputeBackend,
    a: &Tensor,
    b: &Tensor,
    trans_a: bool,
    trans_b: bool,
    scale: f32,
) -> Result<Vec<f32>> {
    let a = as_matrix(a, trans_a)?;
    let b = as_matrix(b, trans_b)?;
    let (m, k, n) = (a.shape().dim(0), a.shape().dim(1), b.shape().dim(1));
    let out = backend.matmul(a.data_f32()?, b.data_f32()?, m, k, n)?;
    if scale == 1.0 {
        Ok(out)
    } else {
        Ok(backend.unary(&out, UnaryKernel::MulScalar(scale))?)
    }
}

fn batched_product(
    backend: &dyn ComputeBackend,
    a: &Tensor,
    b: &Tensor,
    trans_a: bool,
    trans_b: bool,
    scale: f32,
) -> Result<Vec<f32>> {
    let a = if trans_a { swap_last_two(a)? } else { a.clone() };
    let b = if trans_b { swap_last_two(b)? } else { b.clone() };
    let rank = a.shape().ndim();
    let (m, k, n) = (a.shape().dim(rank - 2), a.shape().dim(rank - 1), b.shape().last_dim());
    let batch = a.shape().numel() / (m * k).max(1);
    let (da, db) = (a.data_f32()?, b.data_f32()?);

    let mut out = Vec::with_capacity(batch * m * n);
    for i in 0..batch {
        let block = backend.matmul(
            &da[i * m * k..(i + 1) * m * k],
            &db[i * k * n..(i + 1) * k * n],
            m,
            k,
            n,
        )?;
        out.extend(block.into_iter().map(|v| v * scale));
    }
    Ok(out)
}

fn add_bias_rows(out: &mut [f32], bias: &[f32]) {
    for row in out.chunks_mut(bias.len()) {
        for (v, b) in row.iter_mut().zip(bias) {
            *v += b;
        }
    }
}

fn compute(backend: &dyn ComputeBackend, expr: &Expr) -> Result<Tensor> {
    let shape = expr.shape();
    let op = expr.op();
    if op.is_leaf() {
        return Err(GraphError::MissingValue(format!("{:?}", expr)));
    }
    let inputs = values(expr)?;
    let x = &inputs[0];

    let unary_kernel = match op {
        Op::Sigmoid => Some(UnaryKernel::Sigmoid),
        Op::Relu => Some(UnaryKernel::Relu),
        Op::PRelu { alpha } => Some(UnaryKernel::PRelu(alpha.0)),
        Op::Clip { c } => Some(UnaryKernel::Clip(c.0)),
        Op::Log => Some(UnaryKernel::Log),
        Op::Exp => Some(UnaryKernel::Exp),
        Op::Swish => Some(UnaryKernel::Swish),
        Op::Neg => Some(UnaryKernel::Neg),
        Op::Sqrt { eps } => Some(UnaryKernel::Sqrt(eps.0)),
        Op::Square => Some(UnaryKernel::Square),
        Op::ScalarAdd { s } => Some(UnaryKernel::AddScalar(s.0)),
        Op::ScalarMult { s } => Some(UnaryKernel::MulScalar(s.0)),
        _ => None,
    };
    if let Some(kernel) = unary_kernel {
        return unary(backend, x, kernel);
    }

    let binary_kernel = match op {
        Op::Plus => Some(BinaryKernel::Add),
        Op::Minus => Some(BinaryKernel::Sub),
        Op::Mult => Some(BinaryKernel::Mul),
        Op::Div => Some(BinaryKernel::Div),
        Op::LogAddExp => Some(BinaryKernel::LogAddExp),
        Op::Maximum => Some(BinaryKernel::Maximum),
        Op::Minimum => Some(BinaryKernel::Minimum),
        _ => None,
    };
    if let Some(kernel) = binary_kernel {
        return binary(backend, x, &inputs[1], shape, kernel);
    }

    match op {
        Op::Tanh => {
            let mut acc = x.broadcast_to(shape)?;
            for other in &inputs[1..] {
                acc = binary(backend, &acc, other, shape, BinaryKernel::Add)?;
            }
            unary(backend, &acc, UnaryKernel::Tanh)
        }
        Op::Softmax => to_tensor(backend.softmax(x.data_f32()?, shape.last_dim())?, shape),
        Op::LogSoftmax => to_tensor(backend.log_softmax(x.data_f32()?, shape.last_dim())?, shape),

        Op::Concatenate { axis } => {
            let parts: Vec<&Tensor> = inputs.iter().map(|t| &**t).collect();
            Ok(Tensor::concat(&parts, *axis)?)
        }
        Op::Reshape { shape } => Ok(x.reshape(shape.clone())?),
        Op::Transpose { perm } => Ok(x.permute(perm)?),
        Op::Step { index, axis } => Ok(x.index_select(*axis, &[*index])?),
        Op::Shift { offsets, pad } => Ok(x.shift(offsets, pad.0)?),

        Op::Rows => Ok(x.index_select(0, &index_list(&inputs[1])?)?),
        Op::Cols => Ok(x.index_select(1, &index_list(&inputs[1])?)?),
        Op::Select { axis } => Ok(x.index_select(*axis, &index_list(&inputs[1])?)?),

        Op::Sum { axis } => Ok(x.sum_axis(*axis)?),
        Op::Mean { axis } => {
            let n = x.shape().dim(*axis) as f32;
            unary(backend, &x.sum_axis(*axis)?, UnaryKernel::MulScalar(1.0 / n))
        }
        Op::ScalarProduct { axis } => {
            let full = Shape::broadcast_shape(x.shape(), inputs[1].shape())?;
            Ok(binary(backend, x, &inputs[1], &full, BinaryKernel::Mul)?.sum_axis(*axis)?)
        }

        Op::Dot {
            trans_a,
            trans_b,
            scale,
        } => to_tensor(product(backend, x, &inputs[1], *trans_a, *trans_b, scale.0)?, shape),
        Op::DotBatched {
            trans_a,
            trans_b,
            scale,
        } => to_tensor(
            batched_product(backend, x, &inputs[1], *trans_a, *trans_b, scale.0)?,
            shape,
        ),
        Op::Affine {
            trans_a,
            trans_b,
            scale,
        } => {
            let mut out = product(backend, x, &inputs[1], *trans_a, *trans_b, scale.0)?;
            let rows = shape.rows();
            let n = shape.last_dim();
            // ones column times bias row
            let bias = backend.matmul(inputs[3].data_f32()?, inputs[2].data_f32()?, rows, 1, n)?;
            out = backend.binary(&out, &bias, BinaryKernel::Add)?;
            to_tensor(out, shape)
        }

        Op::QuantizeInt16 { clip } => {
            let data = x
                .data_f32()?
                .iter()
                .map(|&v| quantize_value(v, clip.0))
                .collect();
            Ok(Tensor::from_i16(data, shape.clone())?)
        }
        Op::DotInt16 { scale } | Op::AffineInt16 { scale } => {
            let k = x.shape().last_dim();
            let m = x.shape().rows();
            let n = inputs[1].shape().rows();
            let unquant = scale.0 / (INT16_QUANT_MULT * INT16_QUANT_MULT);
            let mut out =
                backend.matmul_i16_nt(x.data_i16()?, inputs[1].data_i16()?, m, k, n, unquant)?;
            if matches!(op, Op::AffineInt16 { .. }) {
                add_bias_rows(&mut out, inputs[2].data_f32()?);
            }
            to_tensor(out, shape)
        }

        Op::CrossEntropy => {
            let n = x.shape().last_dim();
            let logprobs = backend.log_softmax(x.data_f32()?, n)?;
            let targets = index_list(&inputs[1])?;
            let mut out = Vec::with_capacity(targets.len());
            for (row, &target) in targets.iter().enumerate() {
                if target >= n {
                    return Err(eg_tensor::TensorError::IndexOutOfRange {
                        index: target,
                        size: n,
                    }
                    .into());
                }
                out.push(-logprobs[row * n + target]);
            }
            to_tensor(out, shape)
        }
        Op::LayerNorm { eps } => {
            let beta = match inputs.get(2) {
                Some(beta) => Some(beta.data_f32()?),
                None => None,
            };
            to_tensor(
                backend.layer_norm(
                    x.data_f32()?,
                    inputs[1].data_f32()?,
                    beta,
                    eps.0,
                    shape.last_dim(),
                )?,
                shape,
            )
        }
        Op::Highway => {
            let gate = unary(backend, &inputs[2].broadcast_to(shape)?, UnaryKernel::Sigmoid)?;
            let carry = unary(backend, &gate, UnaryKernel::Neg)?;
            let carry = unary(backend, &carry, UnaryKernel::AddScalar(1.0))?;
            let y = binary(backend, x, &gate, shape, BinaryKernel::Mul)?;
            let c = binary(backend, &inputs[1], &carry, shape, BinaryKernel::Mul)?;
            binary(backend, &y, &c, shape, BinaryKernel::Add)
        }
        Op::Pooling {
            kind,
            window,
            padding,
            stride,
        } => Ok(x.pool2d(*kind, *window, *padding, *stride)?),

        _ => Err(GraphError::NotImplemented(op.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::node::Scalar;
    use approx::assert_abs_diff_eq;

    fn t(data: &[f32], dims: &[usize]) -> Tensor {
        Tensor::new(data.to_vec(), Shape::from_slice(dims))
    }

    fn assert_close(got: &Tensor, want: &[f32]) {
        let got = got.data_f32().unwrap();
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert_abs_diff_eq!(*g, *w, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_shared_subexpressions_evaluated_once() {
        let g = Graph::new(GraphConfig::default());
        let x = g.input("x", t(&[1.0, 2.0], &[1, 2]));
        let s = g.expression(Op::Square, vec![x]).unwrap();
        let y = g.expression(Op::Plus, vec![s.clone(), s.clone()]).unwrap();
        assert_close(&g.forward(&y).unwrap(), &[2.0, 8.0]);
        assert!(s.value().is_some());
        assert_eq!(schedule(&y).len(), 0);
    }

    #[test]
    fn test_broadcast_binary() {
        let g = Graph::new(GraphConfig::default());
        let a = g.input("a", t(&[1.0, 2.0, 3.0, 4.0], &[2, 2]));
        let b = g.input("b", t(&[10.0, 20.0], &[2]));
        let y = g.expression(Op::Plus, vec![a, b]).unwrap();
        assert_close(&g.forward(&y).unwrap(), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn test_transposed_dot() {
        let g = Graph::new(GraphConfig::default());
        let a = g.input("a", t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]));
        let b = g.input("b", t(&[1.0, 0.0, 0.0, 1.0], &[2, 2]));
        let op = Op::Dot {
            trans_a: true,
            trans_b: false,
            scale: Scalar(2.0),
        };
        let y = g.expression(op, vec![a, b]).unwrap();
        assert_eq!(y.shape().dims(), &[3, 2]);
        assert_close(&g.forward(&y).unwrap(), &[2.0, 8.0, 4.0, 10.0, 6.0, 12.0]);
    }

    #[test]
    fn test_cross_entropy() {
        let g = Graph::new(GraphConfig::default());
        let logits = g.input("logits", t(&[0.0, 0.0, 0.0, 0.0], &[2, 2]));
        let idx = g.indices(&[0, 1]);
        let y = g.expression(Op::CrossEntropy, vec![logits, idx]).unwrap();
        let ln2 = 2.0f32.ln();
        assert_close(&g.forward(&y).unwrap(), &[ln2, ln2]);
    }

    #[test]
    fn test_batched_product() {
        let g = Graph::new(GraphConfig::default());
        let a = g.input("a", t(&[1.0, 2.0, 3.0, 4.0], &[2, 1, 2]));
        let b = g.input("b", t(&[1.0, 1.0, 2.0, 0.0], &[2, 2, 1]));
        let op = Op::DotBatched {
            trans_a: false,
            trans_b: false,
            scale: Scalar(1.0),
        };
        let y = g.expression(op, vec![a, b]).unwrap();
        assert_close(&g.forward(&y).unwrap(), &[3.0, 6.0]);
    }

    #[test]
    fn test_highway_gate() {
        let g = Graph::new(GraphConfig::default());
        let y = g.input("y", t(&[1.0, 1.0], &[1, 2]));
        let x = g.input("x", t(&[3.0, 3.0], &[1, 2]));
        let gate = g.input("t", t(&[0.0, 0.0], &[1, 2]));
        let out = g.expression(Op::Highway, vec![y, x, gate]).unwrap();
        assert_close(&g.forward(&out).unwrap(), &[2.0, 2.0]);
    }

    #[test]
    fn test_unterminated_windows_are_discarded() {
        let g = Graph::new(GraphConfig::default());
        let x = g.input("x", t(&[1.0, -1.0], &[1, 2]));
        let partial = g.expression(Op::Relu, vec![x.clone()]).unwrap().record(5, false);
        g.forward(&partial).unwrap();
        assert_eq!(g.with_tuner(|t| t.open_windows()), 0);

        let whole = g.expression(Op::Neg, vec![partial]).unwrap().record(5, true);
        g.forward(&whole).unwrap();
        assert_eq!(g.with_tuner(|t| t.record(5).map(|r| r.executions)), Some(1));
    }

    #[test]
    fn test_failed_forward_discards_windows() {
        let g = Graph::new(GraphConfig::default());
        let logits = g.input("logits", t(&[0.0, 0.0], &[1, 2]));
        let idx = g.indices(&[7]);
        let y = g
            .expression(Op::CrossEntropy, vec![logits, idx])
            .unwrap()
            .record(5, false);
        assert!(g.forward(&y).is_err());
        assert_eq!(g.with_tuner(|t| t.open_windows()), 0);
    }

    #[test]
    fn test_invalid_index_value() {
        assert!(index_list(&t(&[0.5], &[1])).is_err());
        assert!(index_list(&t(&[-1.0], &[1])).is_err());
        assert_eq!(index_list(&t(&[2.0, 0.0], &[2])).unwrap(), vec![2, 0]);
    }
}
