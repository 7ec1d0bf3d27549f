use eg_tensor::shape::resolve_axis;

use crate::error::Result;
use crate::node::{Expr, Op};
use crate::ops::build;
use crate::ops::elementwise::div;

/// Sum over `axis`, keeping it with size 1.
pub fn sum(a: &Expr, axis: isize) -> Result<Expr> {
    let axis = resolve_axis(axis, a.shape().ndim())?;
    build(Op::Sum { axis }, vec![a.clone()])
}

pub fn mean(a: &Expr, axis: isize) -> Result<Expr> {
    let axis = resolve_axis(axis, a.shape().ndim())?;
    build(Op::Mean { axis }, vec![a.clone()])
}

/// `sum(a * b, axis)` over the broadcast operands.
pub fn scalar_product(a: &Expr, b: &Expr, axis: isize) -> Result<Expr> {
    let rank = a.shape().ndim().max(b.shape().ndim());
    let axis = resolve_axis(axis, rank)?;
    build(Op::ScalarProduct { axis }, vec![a.clone(), b.clone()])
}

pub fn weighted_average(a: &Expr, weights: &Expr, axis: isize) -> Result<Expr> {
    let weighted = scalar_product(a, weights, axis)?;
    let total = sum(weights, axis)?;
    div(&weighted, &total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Graph;
    use approx::assert_abs_diff_eq;
    use eg_tensor::{Shape, Tensor};

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
    fn test_sum_and_mean() {
        let (g, x) = setup();
        let s = sum(&x, -1).unwrap();
        assert_eq!(s.shape().dims(), &[2, 1]);
        assert_eq!(values(&g, &s), vec![6.0, 15.0]);

        let m = mean(&x, 0).unwrap();
        assert_eq!(m.shape().dims(), &[1, 3]);
        assert_eq!(values(&g, &m), vec![2.5, 3.5, 4.5]);
        assert!(sum(&x, 2).is_err());
    }

    #[test]
    fn test_scalar_product_broadcasts() {
        let (g, x) = setup();
        let w = g.input("w", Tensor::new(vec![1.0, 0.0, -1.0], Shape::new(vec![3])));
        let p = scalar_product(&x, &w, -1).unwrap();
        assert_eq!(p.shape().dims(), &[2, 1]);
        assert_eq!(values(&g, &p), vec![-2.0, -2.0]);
    }

    #[test]
    fn test_weighted_average() {
        let (g, x) = setup();
        let w = g.input("w", Tensor::new(vec![1.0, 1.0, 2.0], Shape::new(vec![1, 3])));
        let avg = weighted_average(&x, &w, -1).unwrap();
        let got = values(&g, &avg);
        assert_abs_diff_eq!(got[0], 9.0 / 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(got[1], 21.0 / 4.0, epsilon = 1e-6);
    }
}
