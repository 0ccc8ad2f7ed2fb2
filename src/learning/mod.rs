//! Learning and recommendation over irrigation history
//!
//! Derives weighted summaries from `PerformanceRecord` and anomaly history:
//! per-run performance predictions, recommended run parameters, and recurring
//! operation patterns. No model training happens here; everything is a
//! windowed statistic over what the runner already recorded.

mod optimizer;
mod patterns;
mod predictor;

pub use predictor::PredictionConditions;

use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{IrrigationRepository, KvCache};

/// Windowed statistics over a field's irrigation history
pub struct Learner {
    repo: Arc<dyn IrrigationRepository>,
    cache: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
}

impl Learner {
    pub fn new(
        repo: Arc<dyn IrrigationRepository>,
        cache: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repo, cache, clock }
    }
}
