use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::checkpoint::{CheckpointDir, CheckpointPolicy};
use crate::data::batch::BatchSource;
use crate::error::{Result, TrainError};
use crate::loss::{Criterion, ScoreKind};
use crate::metrics::{MetricsLogger, MetricsSink};
use crate::network::model::Model;
use crate::optim::optimizer::Optimizer;
use crate::train::epoch::{run_epoch, EpochMode};
use crate::train::epoch_stats::EpochStats;
use crate::train::running_stats::PhaseResult;
use crate::train::train_config::TrainConfig;

/// A checkpoint that could not be written; training went on without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFailure {
    /// 0-based epoch index.
    pub epoch: usize,
    pub message: String,
}

/// Everything a finished run reports, in epoch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochStats>,
    pub checkpoints: Vec<PathBuf>,
    pub checkpoint_failures: Vec<CheckpointFailure>,
}

impl TrainingHistory {
    pub fn train_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }

    pub fn train_accuracies(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_accuracy).collect()
    }

    pub fn eval_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.eval_loss).collect()
    }

    pub fn eval_accuracies(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.eval_accuracy).collect()
    }

    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| TrainError::io(path, e))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Rejects loss/head pairings that would normalize twice or never.
pub fn check_score_kind(output: ScoreKind, criterion: &dyn Criterion) -> Result<()> {
    match criterion.expects() {
        Some(expected) if expected != output => Err(TrainError::Config(format!(
            "loss expects {expected:?} but the model produces {output:?}"
        ))),
        _ => Ok(()),
    }
}

/// Alternates a training pass and an evaluation pass for a fixed number of
/// epochs, reporting metrics and saving checkpoints along the way.
pub struct TrainingDriver<M> {
    config: TrainConfig,
    model: M,
    optimizer: Box<dyn Optimizer>,
    criterion: Box<dyn Criterion>,
    metrics: MetricsLogger,
    checkpoints: Option<CheckpointDir>,
    history: TrainingHistory,
}

impl<M: Model + Serialize> TrainingDriver<M> {
    pub fn new(
        config: TrainConfig,
        model: M,
        optimizer: Box<dyn Optimizer>,
        criterion: Box<dyn Criterion>,
    ) -> Result<Self> {
        config.validate()?;
        check_score_kind(model.output_kind(), criterion.as_ref())?;
        Ok(TrainingDriver {
            config,
            model,
            optimizer,
            criterion,
            metrics: MetricsLogger::disabled(),
            checkpoints: None,
            history: TrainingHistory::default(),
        })
    }

    pub fn with_metrics(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.metrics = MetricsLogger::new(sink);
        self
    }

    pub fn with_checkpoints(mut self, dir: CheckpointDir) -> Self {
        self.checkpoints = Some(dir);
        self
    }

    pub fn metrics(&self) -> &MetricsLogger {
        &self.metrics
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Epochs completed by the latest `run`. Still populated when that run
    /// returned an error part way through.
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Runs `config.epochs` epochs. Each epoch replays `train` once with
    /// parameter updates, then `eval` once without.
    ///
    /// Per-batch metric steps are cumulative across epochs; per-epoch
    /// metrics use the 0-based epoch index. On error, `history()` keeps the
    /// epochs finished before it.
    pub fn run<T, E>(&mut self, train: &mut T, eval: &mut E) -> Result<TrainingHistory>
    where
        T: BatchSource + ?Sized,
        E: BatchSource + ?Sized,
    {
        if self.config.save_model && self.checkpoints.is_none() {
            return Err(TrainError::Config("save_model requires a checkpoint directory".into()));
        }

        let total = self.config.epochs;
        self.history = TrainingHistory::default();
        let (mut train_step, mut eval_step) = (0u64, 0u64);

        info!(
            experiment = %self.config.experiment,
            epochs = total,
            optimizer = self.optimizer.name(),
            lr = self.optimizer.learning_rate(),
            "starting training"
        );

        for epoch in 0..total {
            let started = Instant::now();

            let train_result = run_epoch(
                EpochMode::Train { model: &mut self.model, optimizer: self.optimizer.as_mut() },
                train.batches(),
                self.criterion.as_ref(),
                &mut self.metrics,
                train_step,
            )?;
            train_step += train_result.batches as u64;

            let eval_result = run_epoch(
                EpochMode::Eval { model: &self.model },
                eval.batches(),
                self.criterion.as_ref(),
                &mut self.metrics,
                eval_step,
            )?;
            eval_step += eval_result.batches as u64;

            for result in [&train_result, &eval_result] {
                self.log_phase(result, epoch as u64);
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            let stats = EpochStats::from_phases(epoch + 1, total, &train_result, &eval_result, elapsed_ms);
            info!(
                epoch = epoch + 1,
                total,
                train_loss = stats.train_loss,
                train_accuracy = stats.train_accuracy,
                eval_loss = stats.eval_loss,
                eval_accuracy = stats.eval_accuracy,
                elapsed_ms,
                "epoch complete"
            );

            if let Some(tx) = &self.config.progress_tx {
                if tx.send(stats.clone()).is_err() {
                    debug!(epoch = epoch + 1, "progress receiver dropped");
                }
            }
            self.history.epochs.push(stats);

            if self.config.save_model {
                self.save_checkpoint(epoch, train_result.accuracy)?;
            }
        }

        self.metrics.flush();
        Ok(self.history.clone())
    }

    fn log_phase(&mut self, result: &PhaseResult, step: u64) {
        let phase = result.phase;
        self.metrics.scalar(&format!("{phase}/per_epoch/loss"), result.mean_loss, step);
        self.metrics.scalar(&format!("{phase}/per_epoch/accuracy"), result.accuracy, step);
    }

    fn save_checkpoint(&mut self, epoch: usize, accuracy: f64) -> Result<()> {
        let Some(dir) = &self.checkpoints else {
            return Ok(());
        };
        self.model.record_progress(epoch, accuracy);
        let name = CheckpointDir::file_name(&self.config.experiment, epoch, accuracy);
        match dir.save(&self.model, &name) {
            Ok(path) => {
                info!(path = %path.display(), "checkpoint saved");
                self.history.checkpoints.push(path);
                Ok(())
            }
            Err(e) => match self.config.checkpoint_policy {
                CheckpointPolicy::Abort => Err(e),
                CheckpointPolicy::Continue => {
                    error!(epoch, error = %e, "checkpoint failed, training continues");
                    self.history.checkpoint_failures.push(CheckpointFailure { epoch, message: e.to_string() });
                    Ok(())
                }
            },
        }
    }
}
