//! Graph nodes and the shared `Expr` handle that callers compose.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use eg_tensor::{DType, PoolKind, Shape, Tensor};

use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphInner};

/// Identifier of a node, unique within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An f32 operator parameter, compared and hashed by bit pattern so that
/// operators can take part in structural deduplication.
#[derive(Debug, Clone, Copy)]
pub struct Scalar(pub f32);

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar(v)
    }
}

/// Closed set of operator kinds a node can carry.
///
/// Axes stored here are already resolved to non-negative indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    // Leaves. These hold their value from construction on.
    Input { name: String },
    Param { name: String },
    Constant,

    // Elementwise, one operand.
    Sigmoid,
    Relu,
    PRelu { alpha: Scalar },
    Clip { c: Scalar },
    Log,
    Exp,
    Swish,
    Neg,
    Sqrt { eps: Scalar },
    Square,
    ScalarAdd { s: Scalar },
    ScalarMult { s: Scalar },
    /// tanh of the broadcast sum of all operands.
    Tanh,

    // Elementwise, two broadcast operands.
    Plus,
    Minus,
    Mult,
    Div,
    LogAddExp,
    Maximum,
    Minimum,

    // Last-axis normalizers.
    Softmax,
    LogSoftmax,

    // Layout.
    Concatenate { axis: usize },
    Reshape { shape: Shape },
    Transpose { perm: Vec<usize> },
    Step { index: usize, axis: usize },
    Shift { offsets: Vec<isize>, pad: Scalar },

    // Gathers: operand 0 is the source, operand 1 an index vector.
    Rows,
    Cols,
    Select { axis: usize },

    // Reductions keep the reduced axis with size 1.
    Sum { axis: usize },
    Mean { axis: usize },
    ScalarProduct { axis: usize },

    // Products.
    Dot { trans_a: bool, trans_b: bool, scale: Scalar },
    DotBatched { trans_a: bool, trans_b: bool, scale: Scalar },
    /// Operands: a, b, bias, ones column.
    Affine { trans_a: bool, trans_b: bool, scale: Scalar },
    QuantizeInt16 { clip: Scalar },
    /// Int16 product of a quantized A and a quantized, pre-transposed B.
    DotInt16 { scale: Scalar },
    AffineInt16 { scale: Scalar },

    // Composite kernels.
    CrossEntropy,
    LayerNorm { eps: Scalar },
    Highway,
    Pooling {
        kind: PoolKind,
        window: [usize; 2],
        padding: [usize; 2],
        stride: [usize; 2],
    },
}

impl Op {
    /// Short operator name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Input { .. } => "input",
            Op::Param { .. } => "param",
            Op::Constant => "constant",
            Op::Sigmoid => "sigmoid",
            Op::Relu => "relu",
            Op::PRelu { .. } => "prelu",
            Op::Clip { .. } => "clip",
            Op::Log => "log",
            Op::Exp => "exp",
            Op::Swish => "swish",
            Op::Neg => "neg",
            Op::Sqrt { .. } => "sqrt",
            Op::Square => "square",
            Op::ScalarAdd { .. } => "scalar_add",
            Op::ScalarMult { .. } => "scalar_mult",
            Op::Tanh => "tanh",
            Op::Plus => "plus",
            Op::Minus => "minus",
            Op::Mult => "mult",
            Op::Div => "div",
            Op::LogAddExp => "logaddexp",
            Op::Maximum => "maximum",
            Op::Minimum => "minimum",
            Op::Softmax => "softmax",
            Op::LogSoftmax => "logsoftmax",
            Op::Concatenate { .. } => "concatenate",
            Op::Reshape { .. } => "reshape",
            Op::Transpose { .. } => "transpose",
            Op::Step { .. } => "step",
            Op::Shift { .. } => "shift",
            Op::Rows => "rows",
            Op::Cols => "cols",
            Op::Select { .. } => "select",
            Op::Sum { .. } => "sum",
            Op::Mean { .. } => "mean",
            Op::ScalarProduct { .. } => "scalar_product",
            Op::Dot { .. } => "dot",
            Op::DotBatched { .. } => "bdot",
            Op::Affine { .. } => "affine",
            Op::QuantizeInt16 { .. } => "quantize_int16",
            Op::DotInt16 { .. } => "dot_int16",
            Op::AffineInt16 { .. } => "affine_int16",
            Op::CrossEntropy => "cross_entropy",
            Op::LayerNorm { .. } => "layer_norm",
            Op::Highway => "highway",
            Op::Pooling { .. } => "pooling",
        }
    }

    /// Leaves carry data and are never deduplicated.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Input { .. } | Op::Param { .. } | Op::Constant)
    }
}

/// Attribution tag attached by [`Expr::record`] while a tuning candidate is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningTag {
    /// Candidate sub-hash the node's execution time is charged to.
    pub candidate: u64,
    /// Last node of the candidate; closes the timing window.
    pub terminal: bool,
}

pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) op: Op,
    pub(crate) inputs: Vec<Expr>,
    pub(crate) shape: Shape,
    pub(crate) dtype: DType,
    pub(crate) graph: Weak<GraphInner>,
    pub(crate) label: RefCell<Option<String>>,
    pub(crate) tuning: Cell<Option<TuningTag>>,
    pub(crate) value: RefCell<Option<Tensor>>,
}

/// Shared handle to a node in an expression graph.
///
/// Cloning is cheap. Two handles compare equal only when they point at the
/// same node.
#[derive(Clone)]
pub struct Expr(pub(crate) Rc<Node>);

impl Expr {
    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn op(&self) -> &Op {
        &self.0.op
    }

    pub fn inputs(&self) -> &[Expr] {
        &self.0.inputs
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    /// The graph that owns this node.
    pub fn graph(&self) -> Result<Graph> {
        self.0
            .graph
            .upgrade()
            .map(Graph::from_inner)
            .ok_or(GraphError::GraphDropped)
    }

    pub(crate) fn belongs_to(&self, graph: &Weak<GraphInner>) -> bool {
        Weak::ptr_eq(&self.0.graph, graph)
    }

    pub fn label(&self) -> Option<String> {
        self.0.label.borrow().clone()
    }

    pub fn set_label(&self, label: &str) {
        *self.0.label.borrow_mut() = Some(label.to_string());
    }

    /// Charge this node's execution to tuning candidate `candidate`.
    ///
    /// Returns the same handle so calls can wrap node construction inline.
    pub fn record(&self, candidate: u64, terminal: bool) -> Expr {
        self.0.tuning.set(Some(TuningTag {
            candidate,
            terminal,
        }));
        self.clone()
    }

    pub fn tuning_tag(&self) -> Option<TuningTag> {
        self.0.tuning.get()
    }

    /// Value computed by the last forward pass, or the data of a leaf.
    pub fn value(&self) -> Option<Ref<'_, Tensor>> {
        Ref::filter_map(self.0.value.borrow(), Option::as_ref).ok()
    }

    pub(crate) fn set_value(&self, value: Tensor) {
        *self.0.value.borrow_mut() = Some(value);
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({} {} {}", self.0.id, self.0.op.name(), self.0.shape)?;
        if let Some(label) = self.0.label.borrow().as_ref() {
            write!(f, " \"{}\"", label)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_scalar_bitwise_identity() {
        assert_eq!(Scalar(1.5), Scalar(1.5));
        assert_ne!(Scalar(0.0), Scalar(-0.0));
        assert_eq!(hash_of(&Scalar(2.0)), hash_of(&Scalar(2.0)));
    }

    #[test]
    fn test_op_structural_equality() {
        let a = Op::Clip { c: Scalar(1.0) };
        let b = Op::Clip { c: Scalar(1.0) };
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, Op::Clip { c: Scalar(2.0) });
        assert!(Op::Constant.is_leaf());
        assert!(!Op::Softmax.is_leaf());
        assert_eq!(Op::DotBatched { trans_a: false, trans_b: false, scale: Scalar(1.0) }.name(), "bdot");
    }
}
