//! Operator builders. Every function validates its operands, creates (or
//! reuses) a node in the operands' graph and returns its handle.

pub mod elementwise;
pub mod index;
pub mod matmul;
pub mod nn;
pub mod reduce;
pub mod shape;

pub use elementwise::*;
pub use index::*;
pub use matmul::*;
pub use nn::*;
pub use reduce::*;
pub use shape::*;

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Expr, Op};

/// Build `op` over `inputs` in the graph of the first operand.
pub(crate) fn build(op: Op, inputs: Vec<Expr>) -> Result<Expr> {
    let graph = graph_of(&inputs, op.name())?;
    graph.expression(op, inputs)
}

pub(crate) fn graph_of(inputs: &[Expr], op: &'static str) -> Result<Graph> {
    inputs
        .first()
        .ok_or(GraphError::Arity {
            op,
            expected: 1,
            got: 0,
        })?
        .graph()
}
