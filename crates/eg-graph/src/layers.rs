//! Minimal fully-connected layer builder.

use crate::error::Result;
use crate::inits::NodeInitializer;
use crate::node::Expr;
use crate::ops;
use crate::tuner::hash_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Sigmoid,
    Relu,
    Tanh,
    Swish,
}

impl Activation {
    pub fn apply(self, x: &Expr) -> Result<Expr> {
        match self {
            Activation::Linear => Ok(x.clone()),
            Activation::Sigmoid => ops::sigmoid(x),
            Activation::Relu => ops::relu(x),
            Activation::Tanh => ops::tanh(x),
            Activation::Swish => ops::swish(x),
        }
    }
}

/// `activation(x · W + b)` with parameters `{prefix}_W` and `{prefix}_b`.
///
/// Parameters are created on first use and shared by name afterwards. The
/// weight seed is derived from the parameter name.
pub fn dense(x: &Expr, prefix: &str, dim: usize, activation: Activation) -> Result<Expr> {
    let graph = x.graph()?;
    let input_dim = x.shape().last_dim();

    let w_name = format!("{}_W", prefix);
    let seed = hash_value(w_name.as_str());
    let w = graph.param(&w_name, [input_dim, dim], NodeInitializer::GlorotUniform { seed })?;
    let b = graph.param(&format!("{}_b", prefix), [1, dim], NodeInitializer::Zeros)?;

    let y = ops::affine(x, &w, &b, false, false, 1.0)?;
    activation.apply(&y)
}
