use crate::backend::{BinaryKernel, UnaryKernel};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Scalar body of a unary kernel.
pub fn apply_unary(kernel: UnaryKernel, x: f32) -> f32 {
    match kernel {
        UnaryKernel::Sigmoid => sigmoid(x),
        UnaryKernel::Relu => x.max(0.0),
        UnaryKernel::PRelu(alpha) => {
            if x > 0.0 {
                x
            } else {
                alpha * x
            }
        }
        UnaryKernel::Tanh => x.tanh(),
        UnaryKernel::Exp => x.exp(),
        UnaryKernel::Log => x.ln(),
        UnaryKernel::Swish => x * sigmoid(x),
        UnaryKernel::Neg => -x,
        UnaryKernel::Square => x * x,
        UnaryKernel::Sqrt(eps) => (x + eps).sqrt(),
        UnaryKernel::Clip(c) => x.clamp(-c, c),
        UnaryKernel::AddScalar(s) => x + s,
        UnaryKernel::MulScalar(s) => x * s,
    }
}

/// Scalar body of a binary kernel.
pub fn apply_binary(kernel: BinaryKernel, a: f32, b: f32) -> f32 {
    match kernel {
        BinaryKernel::Add => a + b,
        BinaryKernel::Sub => a - b,
        BinaryKernel::Mul => a * b,
        BinaryKernel::Div => a / b,
        BinaryKernel::LogAddExp => {
            // log(exp(a) + exp(b)) without overflow
            let m = a.max(b);
            if m == f32::NEG_INFINITY {
                m
            } else {
                m + ((a - m).exp() + (b - m).exp()).ln()
            }
        }
        BinaryKernel::Maximum => a.max(b),
        BinaryKernel::Minimum => a.min(b),
    }
}
