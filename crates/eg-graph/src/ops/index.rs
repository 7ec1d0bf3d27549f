use eg_tensor::shape::resolve_axis;

use crate::error::Result;
use crate::node::{Expr, Op};
use crate::ops::build;

/// Gather rows of a matrix.
pub fn rows(a: &Expr, indices: &Expr) -> Result<Expr> {
    build(Op::Rows, vec![a.clone(), indices.clone()])
}

pub fn rows_by(a: &Expr, indices: &[u32]) -> Result<Expr> {
    let indices = a.graph()?.indices(indices);
    rows(a, &indices)
}

/// Gather columns of a matrix.
pub fn cols(a: &Expr, indices: &Expr) -> Result<Expr> {
    build(Op::Cols, vec![a.clone(), indices.clone()])
}

pub fn cols_by(a: &Expr, indices: &[u32]) -> Result<Expr> {
    let indices = a.graph()?.indices(indices);
    cols(a, &indices)
}

/// Gather slices along any axis.
pub fn select(a: &Expr, indices: &Expr, axis: isize) -> Result<Expr> {
    let axis = resolve_axis(axis, a.shape().ndim())?;
    build(Op::Select { axis }, vec![a.clone(), indices.clone()])
}

pub fn select_by(a: &Expr, indices: &[u32], axis: isize) -> Result<Expr> {
    let indices = a.graph()?.indices(indices);
    select(a, &indices, axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::error::GraphError;
    use crate::graph::Graph;
    use eg_tensor::{Shape, Tensor};

    fn setup() -> (Graph, Expr) {
        let g = Graph::new(GraphConfig::default());
        let x = g.input(
            "x",
            Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![3, 2])),
        );
        (g, x)
    }

    fn values(g: &Graph, e: &Expr) -> Vec<f32> {
        g.forward(e).unwrap().data_f32().unwrap().to_vec()
    }

    #[test]
    fn test_rows_and_cols() {
        let (g, x) = setup();
        let r = rows_by(&x, &[2, 0]).unwrap();
        assert_eq!(r.shape().dims(), &[2, 2]);
        assert_eq!(values(&g, &r), vec![5.0, 6.0, 1.0, 2.0]);

        let c = cols_by(&x, &[1, 1, 0]).unwrap();
        assert_eq!(c.shape().dims(), &[3, 3]);
        assert_eq!(values(&g, &c), vec![2.0, 2.0, 1.0, 4.0, 4.0, 3.0, 6.0, 6.0, 5.0]);
    }

    #[test]
    fn test_select_negative_axis() {
        let (g, x) = setup();
        let s = select_by(&x, &[1], -1).unwrap();
        assert_eq!(s.shape().dims(), &[3, 1]);
        assert_eq!(values(&g, &s), vec![2.0, 4.0, 6.0]);
        assert!(matches!(select_by(&x, &[0], 2), Err(GraphError::InvalidAxis { .. })));
    }

    #[test]
    fn test_out_of_range_index_fails_at_evaluation() {
        let (g, x) = setup();
        let r = rows_by(&x, &[5]).unwrap();
        assert!(g.forward(&r).is_err());
    }
}
