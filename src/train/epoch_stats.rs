use serde::{Serialize, Deserialize};

use crate::train::running_stats::PhaseResult;

/// Per-epoch summary emitted by `TrainingDriver::run`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the driver
/// sends one `EpochStats` value at the end of every completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Sample-weighted mean training loss.
    pub train_loss: f64,
    /// Training accuracy as a fraction in [0, 1].
    pub train_accuracy: f64,
    pub eval_loss: f64,
    pub eval_accuracy: f64,
    pub train_samples: usize,
    pub eval_samples: usize,
    /// Wall-clock duration of this epoch (both phases) in milliseconds.
    pub elapsed_ms: u64,
}

impl EpochStats {
    pub fn from_phases(
        epoch: usize,
        total_epochs: usize,
        train: &PhaseResult,
        eval: &PhaseResult,
        elapsed_ms: u64,
    ) -> EpochStats {
        EpochStats {
            epoch,
            total_epochs,
            train_loss: train.mean_loss,
            train_accuracy: train.accuracy,
            eval_loss: eval.mean_loss,
            eval_accuracy: eval.accuracy,
            train_samples: train.samples,
            eval_samples: eval.samples,
            elapsed_ms,
        }
    }
}
