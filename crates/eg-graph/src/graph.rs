//! The expression graph: node arena, structural deduplication, leaf
//! constructors and the per-graph autotuner.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use eg_tensor::{ComputeBackend, CpuBackend, DType, Shape, Tensor};
use log::{debug, trace};

use crate::config::{DeviceId, GraphConfig};
use crate::dispatch::AffineCandidate;
use crate::error::{GraphError, Result};
use crate::eval;
use crate::infer::infer;
use crate::inits::NodeInitializer;
use crate::node::{Expr, Node, NodeId, Op};
use crate::tuner::AutoTuner;

pub struct GraphInner {
    pub(crate) config: GraphConfig,
    pub(crate) backend: Arc<dyn ComputeBackend>,
    next_id: Cell<u64>,
    nodes: RefCell<Vec<Expr>>,
    cache: RefCell<HashMap<u64, Vec<Expr>>>,
    params: RefCell<HashMap<String, Expr>>,
    ones: RefCell<HashMap<Shape, Expr>>,
    pub(crate) tuner: RefCell<AutoTuner<AffineCandidate>>,
}

/// Handle to an expression graph.
///
/// The graph owns every node it creates; `Expr` handles refer back to it
/// weakly. Cloning a `Graph` clones the handle, not the graph.
#[derive(Clone)]
pub struct Graph {
    inner: Rc<GraphInner>,
}

fn structural_hash(op: &Op, inputs: &[Expr]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    op.hash(&mut hasher);
    for input in inputs {
        input.id().hash(&mut hasher);
    }
    hasher.finish()
}

impl Graph {
    /// New graph on the CPU backend.
    pub fn new(config: GraphConfig) -> Self {
        Self::with_backend(config, Arc::new(CpuBackend::new()))
    }

    pub fn with_backend(config: GraphConfig, backend: Arc<dyn ComputeBackend>) -> Self {
        debug!(
            "creating expression graph on {} (backend {}, optimized={}, clip={}, autotune={})",
            config.device,
            backend.name(),
            config.optimized,
            config.clip,
            config.autotune
        );
        Graph {
            inner: Rc::new(GraphInner {
                config,
                backend,
                next_id: Cell::new(0),
                nodes: RefCell::new(Vec::new()),
                cache: RefCell::new(HashMap::new()),
                params: RefCell::new(HashMap::new()),
                ones: RefCell::new(HashMap::new()),
                tuner: RefCell::new(AutoTuner::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<GraphInner>) -> Self {
        Graph { inner }
    }

    pub(crate) fn inner(&self) -> &GraphInner {
        &self.inner
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    pub fn device_id(&self) -> DeviceId {
        self.inner.config.device
    }

    pub fn is_optimized(&self) -> bool {
        self.inner.config.optimized
    }

    pub fn clip(&self) -> f32 {
        self.inner.config.clip
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.inner.backend.as_ref()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id the next created node will get. Nodes with a smaller id already exist.
    pub(crate) fn watermark(&self) -> NodeId {
        NodeId(self.inner.next_id.get())
    }

    fn next_id(&self) -> NodeId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        NodeId(id)
    }

    fn push(&self, op: Op, inputs: Vec<Expr>, shape: Shape, dtype: DType, value: Option<Tensor>) -> Expr {
        let expr = Expr(Rc::new(Node {
            id: self.next_id(),
            op,
            inputs,
            shape,
            dtype,
            graph: Rc::downgrade(&self.inner),
            label: RefCell::new(None),
            tuning: Cell::new(None),
            value: RefCell::new(value),
        }));
        self.inner.nodes.borrow_mut().push(expr.clone());
        expr
    }

    fn weak(&self) -> Weak<GraphInner> {
        Rc::downgrade(&self.inner)
    }

    /// Register a non-leaf node, returning an existing structurally equal
    /// node when there is one.
    pub fn expression(&self, op: Op, inputs: Vec<Expr>) -> Result<Expr> {
        if op.is_leaf() {
            return Err(GraphError::Other(format!(
                "{} nodes are created through the graph's leaf constructors",
                op.name()
            )));
        }
        let weak = self.weak();
        if inputs.iter().any(|input| !input.belongs_to(&weak)) {
            return Err(GraphError::ForeignNode);
        }
        let (shape, dtype) = infer(&op, &inputs)?;

        let key = structural_hash(&op, &inputs);
        if let Some(bucket) = self.inner.cache.borrow().get(&key) {
            if let Some(existing) = bucket
                .iter()
                .find(|e| e.op() == &op && e.inputs() == inputs.as_slice())
            {
                trace!("reusing {:?}", existing);
                return Ok(existing.clone());
            }
        }

        let expr = self.push(op, inputs, shape, dtype, None);
        trace!("created {:?}", expr);
        self.inner
            .cache
            .borrow_mut()
            .entry(key)
            .or_default()
            .push(expr.clone());
        Ok(expr)
    }

    /// Input leaf holding `value`.
    pub fn input(&self, name: &str, value: Tensor) -> Expr {
        let shape = value.shape().clone();
        let dtype = value.dtype();
        self.push(
            Op::Input {
                name: name.to_string(),
            },
            Vec::new(),
            shape,
            dtype,
            Some(value),
        )
    }

    /// Named parameter. Asking again for the same name returns the same node.
    pub fn param(&self, name: &str, shape: impl Into<Shape>, init: NodeInitializer) -> Result<Expr> {
        let shape = shape.into();
        if let Some(existing) = self.inner.params.borrow().get(name) {
            if existing.shape() != &shape {
                return Err(GraphError::ShapeMismatch {
                    op: "param",
                    expected: existing.shape().dims().to_vec(),
                    got: shape.dims().to_vec(),
                });
            }
            return Ok(existing.clone());
        }
        let value = init.materialize(&shape)?;
        debug!("initialized parameter {} {} with {:?}", name, shape, init);
        let expr = self.push(
            Op::Param {
                name: name.to_string(),
            },
            Vec::new(),
            shape,
            DType::F32,
            Some(value),
        );
        self.inner
            .params
            .borrow_mut()
            .insert(name.to_string(), expr.clone());
        Ok(expr)
    }

    /// Previously created parameter by name.
    pub fn get_param(&self, name: &str) -> Option<Expr> {
        self.inner.params.borrow().get(name).cloned()
    }

    pub fn constant(&self, shape: impl Into<Shape>, init: NodeInitializer) -> Result<Expr> {
        let shape = shape.into();
        let value = init.materialize(&shape)?;
        Ok(self.push(Op::Constant, Vec::new(), shape, DType::F32, Some(value)))
    }

    pub fn ones(&self, shape: impl Into<Shape>) -> Result<Expr> {
        self.constant(shape, NodeInitializer::Ones)
    }

    pub fn zeros(&self, shape: impl Into<Shape>) -> Result<Expr> {
        self.constant(shape, NodeInitializer::Zeros)
    }

    /// Ones leaf shared by every caller asking for the same shape.
    pub(crate) fn shared_ones(&self, shape: impl Into<Shape>) -> Result<Expr> {
        let shape = shape.into();
        if let Some(existing) = self.inner.ones.borrow().get(&shape) {
            return Ok(existing.clone());
        }
        let ones = self.ones(shape.clone())?;
        self.inner.ones.borrow_mut().insert(shape, ones.clone());
        Ok(ones)
    }

    /// Index vector for the gather operators.
    pub fn indices(&self, indices: &[u32]) -> Expr {
        let data: Vec<f32> = indices.iter().map(|&i| i as f32).collect();
        let shape = Shape::new(vec![data.len()]);
        self.push(
            Op::Constant,
            Vec::new(),
            shape.clone(),
            DType::F32,
            Some(Tensor::new(data, shape)),
        )
    }

    /// Compute the value of `expr` and every node it depends on.
    pub fn forward(&self, expr: &Expr) -> Result<Tensor> {
        if !expr.belongs_to(&self.weak()) {
            return Err(GraphError::ForeignNode);
        }
        eval::forward(self, expr)
    }

    /// Drop every node except parameters. Tuning decisions are kept.
    pub fn clear(&self) {
        let params = self.inner.params.borrow();
        let mut nodes = self.inner.nodes.borrow_mut();
        nodes.retain(|n| matches!(n.op(), Op::Param { .. }));
        self.inner.cache.borrow_mut().clear();
        self.inner.ones.borrow_mut().clear();
        debug!("cleared graph, {} parameters kept", params.len());
    }

    /// Inspect the graph's autotuner.
    pub fn with_tuner<R>(&self, f: impl FnOnce(&AutoTuner<AffineCandidate>) -> R) -> R {
        f(&self.inner.tuner.borrow())
    }

    /// Register `candidates` for `context` and run the selected one.
    pub(crate) fn autotune(&self, context: u64, candidates: Vec<AffineCandidate>) -> Result<Expr> {
        let mut tuner = self.inner.tuner.borrow_mut();
        tuner.clear();
        for candidate in candidates {
            tuner.insert(candidate);
        }
        tuner.run(context)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("config", &self.inner.config)
            .field("nodes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph {
        Graph::new(GraphConfig::default())
    }

    fn x(g: &Graph) -> Expr {
        g.input(
            "x",
            Tensor::new(vec![1.0, -2.0, 3.0, -4.0], Shape::new(vec![2, 2])),
        )
    }

    #[test]
    fn test_structural_deduplication() {
        let g = graph();
        let a = x(&g);
        let s1 = g.expression(Op::Sigmoid, vec![a.clone()]).unwrap();
        let s2 = g.expression(Op::Sigmoid, vec![a.clone()]).unwrap();
        assert_eq!(s1, s2);
        let r = g.expression(Op::Relu, vec![a]).unwrap();
        assert_ne!(s1, r);
    }

    #[test]
    fn test_leaves_are_not_deduplicated() {
        let g = graph();
        let a = g.ones([2, 2]).unwrap();
        let b = g.ones([2, 2]).unwrap();
        assert_ne!(a, b);
        assert!(g.expression(Op::Constant, vec![]).is_err());
    }

    #[test]
    fn test_shared_ones_reused_per_shape() {
        let g = graph();
        let a = g.shared_ones([3, 1]).unwrap();
        let b = g.shared_ones([3, 1]).unwrap();
        assert_eq!(a, b);
        assert_eq!(g.len(), 1);
        assert_ne!(g.shared_ones([2, 1]).unwrap(), a);

        let mark = g.watermark();
        assert!(a.id() < mark);
        assert!(g.ones([1]).unwrap().id() >= mark);

        g.clear();
        assert_ne!(g.shared_ones([3, 1]).unwrap(), a);
    }

    #[test]
    fn test_params_are_shared_by_name() {
        let g = graph();
        let w = g.param("w", [2, 3], NodeInitializer::Zeros).unwrap();
        let again = g.param("w", [2, 3], NodeInitializer::Ones).unwrap();
        assert_eq!(w, again);
        assert!(g.param("w", [3, 2], NodeInitializer::Zeros).is_err());
        assert_eq!(g.get_param("w"), Some(w));
    }

    #[test]
    fn test_foreign_nodes_rejected() {
        let g1 = graph();
        let g2 = graph();
        let a = x(&g1);
        let err = g2.expression(Op::Relu, vec![a.clone()]).unwrap_err();
        assert!(matches!(err, GraphError::ForeignNode));
        assert!(g2.forward(&a).is_err());
    }

    #[test]
    fn test_dropped_graph() {
        let a = {
            let g = graph();
            x(&g)
        };
        assert!(matches!(a.graph(), Err(GraphError::GraphDropped)));
    }

    #[test]
    fn test_clear_keeps_params() {
        let g = graph();
        let w = g.param("w", [2, 2], NodeInitializer::Ones).unwrap();
        let a = x(&g);
        g.expression(Op::Plus, vec![a, w.clone()]).unwrap();
        assert_eq!(g.len(), 3);
        g.clear();
        assert_eq!(g.len(), 1);
        assert_eq!(g.get_param("w"), Some(w));
    }

    #[test]
    fn test_indices_leaf() {
        let g = graph();
        let idx = g.indices(&[2, 0, 1]);
        assert_eq!(idx.shape().dims(), &[3]);
        assert_eq!(idx.value().unwrap().data_f32().unwrap(), &[2.0, 0.0, 1.0]);
    }
}
