use std::sync::mpsc;

use crate::checkpoint::CheckpointPolicy;
use crate::error::{Result, TrainError};
use crate::train::epoch_stats::EpochStats;

/// Configuration for a `TrainingDriver` run.
///
/// # Fields
/// - `experiment`        — run name; prefixes checkpoint file names
/// - `epochs`            — number of train + eval cycles
/// - `save_model`        — write a checkpoint after every epoch
/// - `checkpoint_policy` — whether a failed save stops the run
/// - `progress_tx`       — optional channel sender; one `EpochStats` is sent
///                         per completed epoch. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub experiment: String,
    pub epochs: usize,
    pub save_model: bool,
    pub checkpoint_policy: CheckpointPolicy,
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
}

impl TrainConfig {
    /// Creates a minimal `TrainConfig`: no checkpoints, no progress channel.
    pub fn new(experiment: impl Into<String>, epochs: usize) -> Self {
        TrainConfig {
            experiment: experiment.into(),
            epochs,
            save_model: false,
            checkpoint_policy: CheckpointPolicy::default(),
            progress_tx: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(TrainError::Config("epochs must be at least 1".into()));
        }
        if self.experiment.trim().is_empty() {
            return Err(TrainError::Config("experiment name must not be empty".into()));
        }
        Ok(())
    }
}
