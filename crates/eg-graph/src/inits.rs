use eg_tensor::{Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{GraphError, Result};

/// How a leaf node's value is filled when it is created.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInitializer {
    Zeros,
    Ones,
    FromValue(f32),
    /// Row-major values; length must equal the shape's element count.
    FromVector(Vec<f32>),
    Uniform { low: f32, high: f32, seed: u64 },
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))` over the last two axes.
    GlorotUniform { seed: u64 },
}

fn uniform(shape: &Shape, low: f32, high: f32, seed: u64) -> Result<Tensor> {
    if low >= high {
        return Err(GraphError::Other(format!(
            "uniform initializer needs low < high, got [{}, {})",
            low, high
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..shape.numel()).map(|_| rng.gen_range(low..high)).collect();
    Ok(Tensor::from_vec(data, shape.clone())?)
}

impl NodeInitializer {
    pub fn materialize(&self, shape: &Shape) -> Result<Tensor> {
        match self {
            NodeInitializer::Zeros => Ok(Tensor::zeros(shape.clone())),
            NodeInitializer::Ones => Ok(Tensor::ones(shape.clone())),
            NodeInitializer::FromValue(v) => Ok(Tensor::full(shape.clone(), *v)),
            NodeInitializer::FromVector(values) => {
                Ok(Tensor::from_vec(values.clone(), shape.clone())?)
            }
            NodeInitializer::Uniform { low, high, seed } => uniform(shape, *low, *high, *seed),
            NodeInitializer::GlorotUniform { seed } => {
                let fan_out = shape.last_dim();
                let fan_in = if shape.ndim() >= 2 {
                    shape.dim(shape.ndim() - 2)
                } else {
                    1
                };
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                uniform(shape, -limit, limit, *seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_initializers() {
        let shape = Shape::new(vec![2, 3]);
        let t = NodeInitializer::FromValue(0.25).materialize(&shape).unwrap();
        assert!(t.data_f32().unwrap().iter().all(|&v| v == 0.25));
        let ones = NodeInitializer::Ones.materialize(&shape).unwrap();
        assert_eq!(ones.data_f32().unwrap().iter().sum::<f32>(), 6.0);
    }

    #[test]
    fn test_from_vector_length_checked() {
        let shape = Shape::new(vec![2, 2]);
        assert!(NodeInitializer::FromVector(vec![1.0, 2.0, 3.0, 4.0])
            .materialize(&shape)
            .is_ok());
        assert!(NodeInitializer::FromVector(vec![1.0]).materialize(&shape).is_err());
    }

    #[test]
    fn test_seeded_uniform_is_reproducible() {
        let shape = Shape::new(vec![4, 4]);
        let init = NodeInitializer::Uniform {
            low: -0.5,
            high: 0.5,
            seed: 42,
        };
        let a = init.materialize(&shape).unwrap();
        let b = init.materialize(&shape).unwrap();
        assert_eq!(a.data_f32().unwrap(), b.data_f32().unwrap());
        assert!(a.data_f32().unwrap().iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn test_glorot_bound() {
        let shape = Shape::new(vec![3, 5]);
        let t = NodeInitializer::GlorotUniform { seed: 1 }
            .materialize(&shape)
            .unwrap();
        let limit = (6.0f32 / 8.0).sqrt();
        assert!(t.data_f32().unwrap().iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_invalid_range() {
        let init = NodeInitializer::Uniform {
            low: 1.0,
            high: 1.0,
            seed: 0,
        };
        assert!(init.materialize(&Shape::new(vec![1])).is_err());
    }
}
