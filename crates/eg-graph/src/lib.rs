//! `eg-graph` - Lazy expression graphs with structural deduplication,
//! an int16 fast path for matrix products and a per-graph kernel autotuner.

pub mod config;
pub mod dispatch;
pub mod error;
mod eval;
pub mod graph;
mod infer;
pub mod inits;
pub mod layers;
pub mod node;
pub mod ops;
pub mod quantize;
pub mod tuner;

pub use config::{DeviceId, DeviceType, GraphConfig};
pub use error::{GraphError, Result};
pub use graph::Graph;
pub use inits::NodeInitializer;
pub use node::{Expr, NodeId, Op, Scalar};
pub use tuner::{AutoTuner, Candidate, TuneState};
