//! Routing of `dot` / `affine` between the int16 path and the general path,
//! and the tuning candidates that compete for `affine`.

use std::rc::Rc;

use log::trace;

use crate::config::DeviceType;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Expr, NodeId, Op, Scalar};
use crate::ops::elementwise::clip;
use crate::ops::shape::transpose;
use crate::quantize::{affine_int16, quantize};
use crate::tuner::{candidate_hash, Candidate};

/// Numeric path chosen for a matrix product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Int16 fixed-point kernels. Only on CPU with `optimized` set.
    Quantized,
    /// f32 kernels on clipped operands.
    General,
}

pub fn route(graph: &Graph) -> Route {
    let device = graph.device_id();
    let route = if graph.is_optimized() && device.kind == DeviceType::Cpu {
        Route::Quantized
    } else {
        Route::General
    };
    trace!("matmul on {} routed to {:?}", device, route);
    route
}

/// Operands of one `affine` call, shared by all of its candidates.
#[derive(Debug, Clone)]
pub struct AffineOperands {
    pub a: Expr,
    pub b: Expr,
    pub bias: Expr,
    pub trans_a: bool,
    pub trans_b: bool,
    pub scale: f32,
    pub clip: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffineAlgorithm {
    Int16,
    Blas,
}

impl AffineAlgorithm {
    /// Appended to the call-context hash to form the candidate's sub-hash.
    pub fn discriminator(self) -> u64 {
        match self {
            AffineAlgorithm::Int16 => 1,
            AffineAlgorithm::Blas => 2,
        }
    }
}

/// One way of building an `affine` node, registered with the graph's tuner.
#[derive(Debug, Clone)]
pub struct AffineCandidate {
    pub algorithm: AffineAlgorithm,
    pub hash: u64,
    pub operands: Rc<AffineOperands>,
}

impl AffineCandidate {
    pub fn new(algorithm: AffineAlgorithm, context: u64, operands: Rc<AffineOperands>) -> Self {
        AffineCandidate {
            algorithm,
            hash: candidate_hash(context, algorithm.discriminator()),
            operands,
        }
    }
}

impl Candidate for AffineCandidate {
    type Output = Expr;

    fn hash(&self) -> u64 {
        self.hash
    }

    fn name(&self) -> &str {
        match self.algorithm {
            AffineAlgorithm::Int16 => "int16",
            AffineAlgorithm::Blas => "blas",
        }
    }

    fn execute(&self) -> Result<Expr> {
        match self.algorithm {
            AffineAlgorithm::Int16 => int16_affine(&self.operands, Some(self.hash)),
            AffineAlgorithm::Blas => general_affine(&self.operands, Some(self.hash)),
        }
    }
}

/// Tags the nodes one candidate builds with its sub-hash.
///
/// Nodes that existed before the candidate started belong to other
/// expressions through deduplication and are left untagged.
#[derive(Debug, Clone, Copy)]
struct Recorder {
    candidate: Option<u64>,
    since: NodeId,
}

impl Recorder {
    fn new(graph: &Graph, candidate: Option<u64>) -> Self {
        Recorder {
            candidate,
            since: graph.watermark(),
        }
    }

    fn tag(&self, expr: Expr, terminal: bool) -> Expr {
        match self.candidate {
            Some(hash) if expr.id() >= self.since => expr.record(hash, terminal),
            _ => expr,
        }
    }
}

/// Quantize both operands and apply the int16 affine kernel.
///
/// The kernel computes `A · Bᵀ`, so B is transposed here unless the caller
/// already asked for it transposed.
pub fn int16_affine(ops: &AffineOperands, candidate: Option<u64>) -> Result<Expr> {
    let recorder = Recorder::new(&ops.a.graph()?, candidate);
    let a = if ops.trans_a {
        recorder.tag(transpose(&ops.a)?, false)
    } else {
        ops.a.clone()
    };
    let qa = recorder.tag(quantize(&a, ops.clip)?, false);

    let bt = if ops.trans_b {
        ops.b.clone()
    } else {
        recorder.tag(transpose(&ops.b)?, false)
    };
    let qb = recorder.tag(quantize(&bt, ops.clip)?, false);

    Ok(recorder.tag(affine_int16(&qa, &qb, &ops.bias, ops.scale)?, true))
}

/// Clip both operands and build an f32 affine node with an explicit ones column.
///
/// The ones column is shared per shape, so repeated calls on the same
/// operands return the same node.
pub fn general_affine(ops: &AffineOperands, candidate: Option<u64>) -> Result<Expr> {
    let graph = ops.a.graph()?;
    let recorder = Recorder::new(&graph, candidate);

    let clipped = |x: &Expr| -> Result<Expr> { Ok(recorder.tag(clip(x, ops.clip)?, false)) };
    let a = clipped(&ops.a)?;
    let b = clipped(&ops.b)?;

    let shape = a.shape();
    if shape.ndim() < 2 {
        return Err(GraphError::ShapeMismatch {
            op: "affine",
            expected: vec![0, 0],
            got: shape.dims().to_vec(),
        });
    }
    let (r, c) = (shape.dim(shape.ndim() - 2), shape.last_dim());
    let m = if ops.trans_a { c } else { r };
    let rows = shape.numel() / (r * c).max(1) * m;
    let ones = graph.shared_ones([rows, 1])?;

    let affine = graph.expression(
        Op::Affine {
            trans_a: ops.trans_a,
            trans_b: ops.trans_b,
            scale: Scalar(ops.scale),
        },
        vec![a, b, ops.bias.clone(), ones],
    )?;
    Ok(recorder.tag(affine, true))
}
