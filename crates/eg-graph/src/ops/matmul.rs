use std::rc::Rc;

use crate::dispatch::{
    general_affine, int16_affine, route, AffineAlgorithm, AffineCandidate, AffineOperands, Route,
};
use crate::error::Result;
use crate::node::{Expr, Op, Scalar};
use crate::ops::elementwise::clip;
use crate::ops::shape::transpose;
use crate::ops::build;
use crate::quantize::{dot_int16, quantize};
use crate::tuner::context_hash;

/// `scale · op(a) · op(b)` where `op` optionally swaps the last two axes.
///
/// On an optimized CPU graph both operands are quantized to int16; otherwise
/// they are clipped to the graph's clip value first.
pub fn dot(a: &Expr, b: &Expr, trans_a: bool, trans_b: bool, scale: f32) -> Result<Expr> {
    let graph = a.graph()?;
    let clip_value = graph.clip();
    match route(&graph) {
        Route::Quantized => {
            // The int16 kernel computes A · Bᵀ.
            let a = if trans_a { transpose(a)? } else { a.clone() };
            let bt = if trans_b { b.clone() } else { transpose(b)? };
            dot_int16(&quantize(&a, clip_value)?, &quantize(&bt, clip_value)?, scale)
        }
        Route::General => build(
            Op::Dot {
                trans_a,
                trans_b,
                scale: Scalar(scale),
            },
            vec![clip(a, clip_value)?, clip(b, clip_value)?],
        ),
    }
}

/// Batched product over matching leading axes.
pub fn bdot(a: &Expr, b: &Expr, trans_a: bool, trans_b: bool, scale: f32) -> Result<Expr> {
    build(
        Op::DotBatched {
            trans_a,
            trans_b,
            scale: Scalar(scale),
        },
        vec![a.clone(), b.clone()],
    )
}

/// `scale · op(a) · op(b) + bias`.
///
/// On an optimized CPU graph with autotuning enabled the int16 and f32
/// variants are benchmarked against each other and the faster one is kept
/// for this shape class.
pub fn affine(
    a: &Expr,
    b: &Expr,
    bias: &Expr,
    trans_a: bool,
    trans_b: bool,
    scale: f32,
) -> Result<Expr> {
    let graph = a.graph()?;
    let operands = AffineOperands {
        a: a.clone(),
        b: b.clone(),
        bias: bias.clone(),
        trans_a,
        trans_b,
        scale,
        clip: graph.clip(),
    };
    match route(&graph) {
        Route::Quantized if graph.config().autotune => {
            let context = context_hash(
                &[a.shape(), b.shape(), bias.shape()],
                &[trans_a, trans_b],
            );
            let operands = Rc::new(operands);
            let candidates = vec![
                AffineCandidate::new(AffineAlgorithm::Int16, context, Rc::clone(&operands)),
                AffineCandidate::new(AffineAlgorithm::Blas, context, operands),
            ];
            graph.autotune(context, candidates)
        }
        Route::Quantized => int16_affine(&operands, None),
        Route::General => general_affine(&operands, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Graph;
    use crate::tuner::TuneState;
    use approx::assert_abs_diff_eq;
    use eg_tensor::{Shape, Tensor};

    const X: [f32; 8] = [0.5, 1.0, -0.5, 0.0, 1.0, -1.0, 0.5, 0.25];
    const W: [f32; 12] = [
        1.0, 0.5, -1.0, //
        0.0, 1.0, 0.5, //
        -0.5, 0.0, 1.0, //
        0.25, -0.25, 0.0,
    ];
    const B: [f32; 3] = [0.5, -1.0, 0.25];

    fn operands(g: &Graph) -> (Expr, Expr, Expr) {
        (
            g.input("x", Tensor::new(X.to_vec(), Shape::new(vec![2, 4]))),
            g.param("w", [4, 3], crate::inits::NodeInitializer::FromVector(W.to_vec()))
                .unwrap(),
            g.param("b", [1, 3], crate::inits::NodeInitializer::FromVector(B.to_vec()))
                .unwrap(),
        )
    }

    fn reference(scale: f32) -> Vec<f32> {
        let mut out = Vec::new();
        for i in 0..2 {
            for j in 0..3 {
                let dot: f32 = (0..4).map(|k| X[i * 4 + k] * W[k * 3 + j]).sum();
                out.push(scale * dot + B[j]);
            }
        }
        out
    }

    fn assert_close(got: &Tensor, want: &[f32]) {
        for (g, w) in got.data_f32().unwrap().iter().zip(want) {
            assert_abs_diff_eq!(*g, *w, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_affine_general_path_matches_reference() {
        let g = Graph::new(GraphConfig::default());
        let (x, w, b) = operands(&g);
        let y = affine(&x, &w, &b, false, false, 2.0).unwrap();
        assert!(matches!(y.op(), Op::Affine { .. }));
        assert_eq!(y.shape().dims(), &[2, 3]);
        assert_close(&g.forward(&y).unwrap(), &reference(2.0));
    }

    #[test]
    fn test_affine_int16_without_autotune() {
        let g = Graph::new(
            GraphConfig::default()
                .with_optimized(true)
                .with_autotune(false),
        );
        let (x, w, b) = operands(&g);
        let y = affine(&x, &w, &b, false, false, 2.0).unwrap();
        assert!(matches!(y.op(), Op::AffineInt16 { .. }));
        // Operands are multiples of 1/4 and quantize exactly.
        assert_close(&g.forward(&y).unwrap(), &reference(2.0));
    }

    #[test]
    fn test_affine_autotuned_decision_is_reused() {
        let g = Graph::new(GraphConfig::default().with_optimized(true));
        let (x, w, b) = operands(&g);
        let context = context_hash(&[x.shape(), w.shape(), b.shape()], &[false, false]);
        assert_eq!(g.with_tuner(|t| t.state(context)), TuneState::Unseen);

        let first = affine(&x, &w, &b, false, false, 1.0).unwrap();
        assert_eq!(g.with_tuner(|t| t.state(context)), TuneState::Selected);
        let winner = g.with_tuner(|t| t.decision(context)).unwrap();
        assert_eq!(first.tuning_tag().map(|t| t.candidate), Some(winner));

        let n = g.len();
        let second = affine(&x, &w, &b, false, false, 1.0).unwrap();
        assert_eq!(first, second);
        assert_eq!(g.len(), n);
        assert_close(&g.forward(&second).unwrap(), &reference(1.0));
    }

    #[test]
    fn test_affine_replay_is_stable_for_each_winner() {
        for algorithm in [AffineAlgorithm::Int16, AffineAlgorithm::Blas] {
            let g = Graph::new(GraphConfig::default().with_optimized(true));
            let (x, w, b) = operands(&g);
            let context = context_hash(&[x.shape(), w.shape(), b.shape()], &[false, false]);
            let only = AffineCandidate::new(
                algorithm,
                context,
                Rc::new(AffineOperands {
                    a: x.clone(),
                    b: w.clone(),
                    bias: b.clone(),
                    trans_a: false,
                    trans_b: false,
                    scale: 1.0,
                    clip: g.clip(),
                }),
            );
            let expected = only.hash;
            g.autotune(context, vec![only]).unwrap();
            assert_eq!(g.with_tuner(|t| t.decision(context)), Some(expected));

            let first = affine(&x, &w, &b, false, false, 1.0).unwrap();
            let n = g.len();
            let second = affine(&x, &w, &b, false, false, 1.0).unwrap();
            assert_eq!(first, second, "{:?}", algorithm);
            assert_eq!(g.len(), n, "{:?}", algorithm);
            assert_eq!(first.tuning_tag().map(|t| t.candidate), Some(expected));
            match algorithm {
                AffineAlgorithm::Int16 => assert!(matches!(first.op(), Op::AffineInt16 { .. })),
                AffineAlgorithm::Blas => assert!(matches!(first.op(), Op::Affine { .. })),
            }
            assert_close(&g.forward(&first).unwrap(), &reference(1.0));
        }
    }

    #[test]
    fn test_affine_context_includes_bias_shape() {
        let g = Graph::new(GraphConfig::default().with_optimized(true));
        let (x, w, b) = operands(&g);
        affine(&x, &w, &b, false, false, 1.0).unwrap();
        let without_bias = context_hash(&[x.shape(), w.shape()], &[false, false]);
        assert_eq!(g.with_tuner(|t| t.state(without_bias)), TuneState::Unseen);
    }

    #[test]
    fn test_affine_general_path_is_deduplicated() {
        let g = Graph::new(GraphConfig::default());
        let (x, w, b) = operands(&g);
        let first = affine(&x, &w, &b, false, false, 1.0).unwrap();
        let n = g.len();
        assert_eq!(affine(&x, &w, &b, false, false, 1.0).unwrap(), first);
        assert_eq!(g.len(), n);
    }

    #[test]
    fn test_dot_paths_agree() {
        let plain = Graph::new(GraphConfig::default());
        let (x, w, _) = operands(&plain);
        let y = dot(&x, &w, false, false, 1.0).unwrap();
        let general = plain.forward(&y).unwrap();

        let optimized = Graph::new(GraphConfig::default().with_optimized(true));
        let (x, w, _) = operands(&optimized);
        let y = dot(&x, &w, false, false, 1.0).unwrap();
        assert!(matches!(y.op(), Op::DotInt16 { .. }));
        let quantized = optimized.forward(&y).unwrap();
        assert_close(&quantized, general.data_f32().unwrap());
    }

    #[test]
    fn test_dot_clips_operands() {
        let g = Graph::new(GraphConfig::default().with_clip(0.5));
        let (x, w, _) = operands(&g);
        let y = dot(&x, &w, false, false, 1.0).unwrap();
        assert!(matches!(y.inputs()[0].op(), Op::Clip { .. }));

        let mismatch = dot(&w, &w, false, false, 1.0);
        assert!(mismatch.is_err());
    }

    #[test]
    fn test_bdot() {
        let g = Graph::new(GraphConfig::default());
        let a = g.ones([3, 2, 4]).unwrap();
        let b = g.ones([3, 5, 4]).unwrap();
        let y = bdot(&a, &b, false, true, 0.5).unwrap();
        assert_eq!(y.shape().dims(), &[3, 2, 5]);
        let out = g.forward(&y).unwrap();
        assert!(out.data_f32().unwrap().iter().all(|&v| v == 2.0));
        assert!(bdot(&a, &b, false, false, 1.0).is_err());
    }
}
