//! Runtime selection among competing implementations of the same operation.
//!
//! Candidates register under a sub-hash derived from a shared call-context
//! hash. The first `run` for a context times every candidate once and keeps
//! the fastest; later runs with the same context replay that candidate only.
//! Context hashes are built from coarsened shapes so that nearby problem
//! sizes share one decision.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use eg_tensor::Shape;
use log::{debug, trace, warn};

use crate::error::{GraphError, Result};

/// Shape dimensions are divided by this before hashing.
pub const SHAPE_COARSENING: usize = 4;

/// Mix `value` into `seed` (boost-style combine).
pub fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Deterministic hash of any hashable value.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Accumulates a call-context hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextHasher {
    hash: u64,
}

impl ContextHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix in a shape after coarsening it by [`SHAPE_COARSENING`].
    pub fn shape(mut self, shape: &Shape) -> Self {
        self.hash = hash_combine(self.hash, hash_value(&shape.coarsen(SHAPE_COARSENING)));
        self
    }

    pub fn flag(mut self, flag: bool) -> Self {
        self.hash = hash_combine(self.hash, u64::from(flag));
        self
    }

    pub fn finish(self) -> u64 {
        self.hash
    }
}

/// Context hash over coarsened operand shapes followed by boolean flags.
pub fn context_hash(shapes: &[&Shape], flags: &[bool]) -> u64 {
    let hasher = shapes
        .iter()
        .fold(ContextHasher::new(), |h, shape| h.shape(shape));
    flags.iter().fold(hasher, |h, &flag| h.flag(flag)).finish()
}

/// Sub-hash owned by one candidate of a context.
pub fn candidate_hash(context: u64, discriminator: u64) -> u64 {
    hash_combine(context, discriminator)
}

/// A deferred computation competing for a context.
pub trait Candidate {
    type Output;

    /// Candidate-specific sub-hash.
    fn hash(&self) -> u64;

    fn name(&self) -> &str;

    fn execute(&self) -> Result<Self::Output>;
}

/// Per-context tuning progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneState {
    Unseen,
    Benchmarking,
    Selected,
}

/// Costs charged to one candidate sub-hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostRecord {
    /// Wall-clock time of the benchmarking run.
    pub benchmark: Option<Duration>,
    /// Completed execution windows reported through [`AutoTuner::begin`] / [`AutoTuner::end`].
    pub executions: u64,
    pub execution_time: Duration,
}

/// Hash-keyed registry of candidates with a persistent cost and decision table.
///
/// Candidates belong to the call in progress and are replaced by `clear`;
/// cost records and decisions persist for the life of the tuner.
pub struct AutoTuner<C: Candidate> {
    candidates: Vec<C>,
    records: HashMap<u64, CostRecord>,
    decisions: HashMap<u64, u64>,
    benchmarking: Option<u64>,
    open_windows: HashMap<u64, Instant>,
}

impl<C: Candidate> AutoTuner<C> {
    pub fn new() -> Self {
        AutoTuner {
            candidates: Vec::new(),
            records: HashMap::new(),
            decisions: HashMap::new(),
            benchmarking: None,
            open_windows: HashMap::new(),
        }
    }

    /// Drop the registered candidates. Records and decisions are kept.
    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn insert(&mut self, candidate: C) {
        self.candidates.push(candidate);
    }

    pub fn candidates(&self) -> &[C] {
        &self.candidates
    }

    pub fn state(&self, context: u64) -> TuneState {
        if self.decisions.contains_key(&context) {
            TuneState::Selected
        } else if self.benchmarking == Some(context) {
            TuneState::Benchmarking
        } else {
            TuneState::Unseen
        }
    }

    /// Winning candidate sub-hash for `context`, if decided.
    pub fn decision(&self, context: u64) -> Option<u64> {
        self.decisions.get(&context).copied()
    }

    pub fn record(&self, candidate: u64) -> Option<&CostRecord> {
        self.records.get(&candidate)
    }

    /// Execute the best candidate for `context`, benchmarking all registered
    /// candidates first if no decision exists yet.
    ///
    /// A failing candidate aborts the call; there is no fallback.
    pub fn run(&mut self, context: u64) -> Result<C::Output> {
        if let Some(winner) = self.decision(context) {
            if let Some(candidate) = self.candidates.iter().find(|c| c.hash() == winner) {
                trace!(
                    "autotuner: context {:#018x} replays {}",
                    context,
                    candidate.name()
                );
                return candidate.execute();
            }
            warn!(
                "autotuner: selected candidate {:#018x} for context {:#018x} is not registered, re-benchmarking",
                winner, context
            );
            self.decisions.remove(&context);
        }

        if self.candidates.is_empty() {
            return Err(GraphError::Other(format!(
                "autotuner: no candidates registered for context {:#018x}",
                context
            )));
        }

        self.benchmarking = Some(context);
        let mut best: Option<(u64, Duration, C::Output)> = None;
        for candidate in &self.candidates {
            let start = Instant::now();
            let output = match candidate.execute() {
                Ok(output) => output,
                Err(err) => {
                    self.benchmarking = None;
                    return Err(err);
                }
            };
            let elapsed = start.elapsed();
            let hash = candidate.hash();
            self.records.entry(hash).or_default().benchmark = Some(elapsed);
            debug!(
                "autotuner: context {:#018x} candidate {} took {:?}",
                context,
                candidate.name(),
                elapsed
            );
            if best.as_ref().map_or(true, |(_, time, _)| elapsed < *time) {
                best = Some((hash, elapsed, output));
            }
        }
        self.benchmarking = None;

        let (winner, elapsed, output) = best.ok_or_else(|| {
            GraphError::Other("autotuner: benchmarking produced no result".to_string())
        })?;
        debug!(
            "autotuner: context {:#018x} selects {:#018x} ({:?})",
            context, winner, elapsed
        );
        self.decisions.insert(context, winner);
        Ok(output)
    }

    /// Open an execution window for `candidate` unless one is already open.
    pub fn begin(&mut self, candidate: u64) {
        self.open_windows.entry(candidate).or_insert_with(Instant::now);
    }

    /// Close the execution window for `candidate` and charge its duration.
    pub fn end(&mut self, candidate: u64) {
        if let Some(start) = self.open_windows.remove(&candidate) {
            let record = self.records.entry(candidate).or_default();
            record.executions += 1;
            record.execution_time += start.elapsed();
        }
    }

    /// Number of execution windows opened but not yet closed.
    pub fn open_windows(&self) -> usize {
        self.open_windows.len()
    }

    /// Drop windows that were opened without a matching `end`.
    pub fn discard_windows(&mut self) {
        if !self.open_windows.is_empty() {
            trace!("autotuner: discarding {} open windows", self.open_windows.len());
            self.open_windows.clear();
        }
    }
}

impl<C: Candidate> Default for AutoTuner<C> {
    fn default() -> Self {
        Self::new()
    }
}
