use eg_tensor::Shape;

use crate::error::{GraphError, Result};
use crate::inits::NodeInitializer;
use crate::node::{Expr, Op, Scalar};
use crate::ops::build;

/// Negative slope used by [`leakyrelu`].
pub const LEAKY_RELU_ALPHA: f32 = 0.01;

fn unary(a: &Expr, op: Op) -> Result<Expr> {
    build(op, vec![a.clone()])
}

fn binary(a: &Expr, b: &Expr, op: Op) -> Result<Expr> {
    build(op, vec![a.clone(), b.clone()])
}

/// Attach a debug label to `a` and return it.
pub fn debug(a: &Expr, label: &str) -> Expr {
    a.set_label(label);
    a.clone()
}

pub fn sigmoid(a: &Expr) -> Result<Expr> {
    unary(a, Op::Sigmoid)
}

pub fn relu(a: &Expr) -> Result<Expr> {
    unary(a, Op::Relu)
}

pub fn leakyrelu(a: &Expr) -> Result<Expr> {
    prelu(a, LEAKY_RELU_ALPHA)
}

pub fn prelu(a: &Expr, alpha: f32) -> Result<Expr> {
    unary(a, Op::PRelu { alpha: Scalar(alpha) })
}

/// Clamp to `[-c, c]`. `c == 0` disables clipping and returns `a` itself.
pub fn clip(a: &Expr, c: f32) -> Result<Expr> {
    if c == 0.0 {
        return Ok(a.clone());
    }
    unary(a, Op::Clip { c: Scalar(c) })
}

pub fn log(a: &Expr) -> Result<Expr> {
    unary(a, Op::Log)
}

pub fn exp(a: &Expr) -> Result<Expr> {
    unary(a, Op::Exp)
}

pub fn swish(a: &Expr) -> Result<Expr> {
    unary(a, Op::Swish)
}

pub fn neg(a: &Expr) -> Result<Expr> {
    unary(a, Op::Neg)
}

/// `sqrt(a + eps)`
pub fn sqrt(a: &Expr, eps: f32) -> Result<Expr> {
    unary(a, Op::Sqrt { eps: Scalar(eps) })
}

pub fn square(a: &Expr) -> Result<Expr> {
    unary(a, Op::Square)
}

pub fn tanh(a: &Expr) -> Result<Expr> {
    unary(a, Op::Tanh)
}

/// tanh of the broadcast sum of `nodes`.
pub fn tanh_nodes(nodes: &[Expr]) -> Result<Expr> {
    build(Op::Tanh, nodes.to_vec())
}

pub fn add(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::Plus)
}

pub fn sub(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::Minus)
}

pub fn mul(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::Mult)
}

pub fn div(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::Div)
}

pub fn logaddexp(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::LogAddExp)
}

pub fn maximum(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::Maximum)
}

pub fn minimum(a: &Expr, b: &Expr) -> Result<Expr> {
    binary(a, b, Op::Minimum)
}

pub fn add_scalar(a: &Expr, s: f32) -> Result<Expr> {
    unary(a, Op::ScalarAdd { s: Scalar(s) })
}

pub fn scalar_add(s: f32, a: &Expr) -> Result<Expr> {
    add_scalar(a, s)
}

pub fn sub_scalar(a: &Expr, s: f32) -> Result<Expr> {
    add_scalar(a, -s)
}

/// `s - a`
pub fn scalar_sub(s: f32, a: &Expr) -> Result<Expr> {
    add_scalar(&neg(a)?, s)
}

pub fn mul_scalar(a: &Expr, s: f32) -> Result<Expr> {
    unary(a, Op::ScalarMult { s: Scalar(s) })
}

pub fn scalar_mul(s: f32, a: &Expr) -> Result<Expr> {
    mul_scalar(a, s)
}

pub fn div_scalar(a: &Expr, s: f32) -> Result<Expr> {
    mul_scalar(a, 1.0 / s)
}

/// `s / a`, through a rank-0 constant holding `s`.
pub fn scalar_div(s: f32, a: &Expr) -> Result<Expr> {
    let numerator = a.graph()?.constant(Shape::new(Vec::new()), NodeInitializer::FromValue(s))?;
    div(&numerator, a)
}

pub fn plus_nodes(_nodes: &[Expr]) -> Result<Expr> {
    Err(GraphError::NotImplemented("plus over a node list"))
}

pub fn swish_nodes(_nodes: &[Expr]) -> Result<Expr> {
    Err(GraphError::NotImplemented("swish over a node list"))
}

pub fn sigmoid_nodes(_nodes: &[Expr]) -> Result<Expr> {
    Err(GraphError::NotImplemented("sigmoid over a node list"))
}

pub fn relu_nodes(_nodes: &[Expr]) -> Result<Expr> {
    Err(GraphError::NotImplemented("relu over a node list"))
}

pub fn leakyrelu_nodes(_nodes: &[Expr]) -> Result<Expr> {
    Err(GraphError::NotImplemented("leakyrelu over a node list"))
}

pub fn prelu_nodes(_nodes: &[Expr], _alpha: f32) -> Result<Expr> {
    Err(GraphError::NotImplemented("prelu over a node list"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Graph;
    use approx::assert_abs_diff_eq;
    use eg_tensor::Tensor;

    fn setup() -> (Graph, Expr) {
        let g = Graph::new(GraphConfig::default());
        let x = g.input(
            "x",
            Tensor::new(vec![-2.0, -0.5, 0.5, 2.0], Shape::new(vec![2, 2])),
        );
        (g, x)
    }

    fn values(g: &Graph, e: &Expr) -> Vec<f32> {
        g.forward(e).unwrap().data_f32().unwrap().to_vec()
    }

    #[test]
    fn test_clip_zero_is_identity() {
        let (g, x) = setup();
        let same = clip(&x, 0.0).unwrap();
        assert_eq!(same, x);
        let n = g.len();

        let clipped = clip(&x, 1.0).unwrap();
        assert_ne!(clipped, x);
        assert_eq!(g.len(), n + 1);
        assert_eq!(values(&g, &clipped), vec![-1.0, -0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_activations() {
        let (g, x) = setup();
        assert_eq!(values(&g, &relu(&x).unwrap()), vec![0.0, 0.0, 0.5, 2.0]);
        let leaky = values(&g, &leakyrelu(&x).unwrap());
        assert_abs_diff_eq!(leaky[0], -0.02, epsilon = 1e-6);
        let s = values(&g, &sigmoid(&x).unwrap());
        assert_abs_diff_eq!(s[1] + s[2], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scalar_arithmetic() {
        let (g, x) = setup();
        assert_eq!(values(&g, &scalar_sub(1.0, &x).unwrap()), vec![3.0, 1.5, 0.5, -1.0]);
        assert_eq!(values(&g, &sub_scalar(&x, 1.0).unwrap()), vec![-3.0, -1.5, -0.5, 1.0]);
        assert_eq!(values(&g, &div_scalar(&x, 2.0).unwrap()), vec![-1.0, -0.25, 0.25, 1.0]);
        assert_eq!(values(&g, &scalar_div(1.0, &x).unwrap()), vec![-0.5, -2.0, 2.0, 0.5]);
    }

    #[test]
    fn test_tanh_of_sum() {
        let (g, x) = setup();
        let y = tanh_nodes(&[x.clone(), x.clone()]).unwrap();
        let got = values(&g, &y);
        assert_abs_diff_eq!(got[3], 4.0f32.tanh(), epsilon = 1e-6);
        assert!(tanh_nodes(&[]).is_err());
    }

    #[test]
    fn test_binary_broadcast_mismatch() {
        let (g, x) = setup();
        let y = g.ones([3]).unwrap();
        assert!(matches!(
            add(&x, &y),
            Err(GraphError::ShapeMismatch { op: "plus", .. })
        ));
    }

    #[test]
    fn test_stubbed_forms() {
        let (_g, x) = setup();
        let nodes = [x.clone(), x];
        assert!(matches!(plus_nodes(&nodes), Err(GraphError::NotImplemented(_))));
        assert!(matches!(prelu_nodes(&nodes, 0.1), Err(GraphError::NotImplemented(_))));
        assert!(matches!(relu_nodes(&nodes), Err(GraphError::NotImplemented(_))));
    }

    #[test]
    fn test_debug_label() {
        let (_g, x) = setup();
        let y = debug(&x, "input");
        assert_eq!(y.label().as_deref(), Some("input"));
    }
}
