//! Int16 fixed-point operators backing the quantized `dot` / `affine` path.
//!
//! Values are clamped, multiplied by [`INT16_QUANT_MULT`] and rounded. The
//! product kernels compute `A · Bᵀ`, so the right operand must already be
//! quantized in transposed layout.

use crate::error::Result;
use crate::node::{Expr, Op, Scalar};

/// Fixed-point multiplier applied before rounding to i16.
pub const INT16_QUANT_MULT: f32 = 1024.0;

/// Quantize an f32 node to i16, clamping to `[-clip, clip]` first when `clip > 0`.
pub fn quantize(a: &Expr, clip: f32) -> Result<Expr> {
    a.graph()?
        .expression(Op::QuantizeInt16 { clip: Scalar(clip) }, vec![a.clone()])
}

/// `scale · qa · qbᵀ`, unquantized back to f32.
pub fn dot_int16(qa: &Expr, qb: &Expr, scale: f32) -> Result<Expr> {
    qa.graph()?.expression(
        Op::DotInt16 {
            scale: Scalar(scale),
        },
        vec![qa.clone(), qb.clone()],
    )
}

/// [`dot_int16`] plus a broadcast bias row.
pub fn affine_int16(qa: &Expr, qb: &Expr, bias: &Expr, scale: f32) -> Result<Expr> {
    qa.graph()?.expression(
        Op::AffineInt16 {
            scale: Scalar(scale),
        },
        vec![qa.clone(), qb.clone(), bias.clone()],
    )
}

/// Quantize one value; out-of-range results saturate.
pub(crate) fn quantize_value(x: f32, clip: f32) -> i16 {
    let x = if clip > 0.0 { x.clamp(-clip, clip) } else { x };
    let q = (x * INT16_QUANT_MULT).round();
    q.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
