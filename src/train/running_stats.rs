use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::train::phase::Phase;

/// Batch-size-weighted running sums for one phase of one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    total_loss: f64,
    total_correct: usize,
    total_count: usize,
    batches: usize,
}

/// Means produced when a phase ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub mean_loss: f64,
    /// Fraction in [0, 1].
    pub accuracy: f64,
    pub samples: usize,
    pub batches: usize,
}

impl RunningStats {
    pub fn new() -> RunningStats {
        RunningStats::default()
    }

    /// `batch_loss` is the batch mean; it is re-weighted by `batch_size` so a
    /// short final batch counts for exactly its samples.
    pub fn record(&mut self, batch_loss: f64, correct: usize, batch_size: usize) {
        self.total_loss += batch_loss * batch_size as f64;
        self.total_correct += correct;
        self.total_count += batch_size;
        self.batches += 1;
    }

    pub fn finish(self, phase: Phase) -> Result<PhaseResult> {
        if self.total_count == 0 {
            return Err(TrainError::EmptyDataset { phase });
        }
        let n = self.total_count as f64;
        Ok(PhaseResult {
            phase,
            mean_loss: self.total_loss / n,
            accuracy: self.total_correct as f64 / n,
            samples: self.total_count,
            batches: self.batches,
        })
    }
}
