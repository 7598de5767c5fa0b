use tracing::debug;

use crate::data::batch::Batch;
use crate::error::Result;
use crate::loss::Criterion;
use crate::math::matrix::Matrix;
use crate::metrics::MetricsLogger;
use crate::network::model::Model;
use crate::optim::optimizer::Optimizer;
use crate::train::phase::Phase;
use crate::train::running_stats::{PhaseResult, RunningStats};

/// How a pass treats the model.
///
/// `Eval` only holds a shared borrow, so an evaluation pass cannot update
/// parameters or accumulate gradients.
pub enum EpochMode<'a, M: Model + ?Sized> {
    Train { model: &'a mut M, optimizer: &'a mut dyn Optimizer },
    Eval { model: &'a M },
}

impl<M: Model + ?Sized> EpochMode<'_, M> {
    pub fn phase(&self) -> Phase {
        match self {
            EpochMode::Train { .. } => Phase::Train,
            EpochMode::Eval { .. } => Phase::Eval,
        }
    }
}

/// Runs one pass over `batches` and returns sample-weighted mean loss and
/// accuracy.
///
/// In `Train` mode every batch performs forward, loss, backward, one
/// optimizer step and a gradient reset. Each batch's loss is reported to `logger` as
/// `"<phase>/per_batch/loss"` at step `step_offset + batch_index`.
///
/// Fails with `EmptyDataset` when `batches` yields no samples.
pub fn run_epoch<M, C, I>(
    mut mode: EpochMode<'_, M>,
    batches: I,
    criterion: &C,
    logger: &mut MetricsLogger,
    step_offset: u64,
) -> Result<PhaseResult>
where
    M: Model + ?Sized,
    C: Criterion + ?Sized,
    I: IntoIterator<Item = Batch>,
{
    let phase = mode.phase();
    let tag = format!("{phase}/per_batch/loss");
    let mut stats = RunningStats::new();

    for (index, batch) in batches.into_iter().enumerate() {
        let (loss, scores) = match &mut mode {
            EpochMode::Train { model, optimizer } => {
                train_step(&mut **model, &mut **optimizer, criterion, &batch)?
            }
            EpochMode::Eval { model } => eval_step(&**model, criterion, &batch)?,
        };
        let correct = count_correct(&scores, &batch.labels);
        stats.record(loss, correct, batch.len());

        let step = step_offset + index as u64;
        logger.scalar(&tag, loss, step);
        debug!(%phase, batch = index, loss, correct, size = batch.len(), "batch done");
    }

    stats.finish(phase)
}

fn train_step<M, C>(
    model: &mut M,
    optimizer: &mut dyn Optimizer,
    criterion: &C,
    batch: &Batch,
) -> Result<(f64, Matrix)>
where
    M: Model + ?Sized,
    C: Criterion + ?Sized,
{
    let scores = model.forward_train(&batch.inputs)?;
    let (loss, grad) = criterion.loss_and_grad(&scores, &batch.labels)?;
    model.backward(&grad)?;
    optimizer.step(&mut model.params_mut());
    model.zero_grad();
    Ok((loss, scores))
}

fn eval_step<M, C>(model: &M, criterion: &C, batch: &Batch) -> Result<(f64, Matrix)>
where
    M: Model + ?Sized,
    C: Criterion + ?Sized,
{
    let scores = model.predict(&batch.inputs)?;
    let loss = criterion.loss(&scores, &batch.labels)?;
    Ok((loss, scores))
}

/// Rows whose arg-max matches the label. Ties go to the lowest index.
pub fn count_correct(scores: &Matrix, labels: &[usize]) -> usize {
    labels.iter()
        .enumerate()
        .filter(|&(i, &y)| i < scores.rows && scores.argmax_row(i) == y)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    use crate::data::{DataLoader, InMemoryDataset};
    use crate::error::TrainError;
    use crate::layers::param::{Param, ParamRole};
    use crate::layers::{Dense, Layer};
    use crate::loss::{LossType, ScoreKind};
    use crate::metrics::MetricsSink;
    use crate::network::network::Network;
    use crate::optim::sgd::Sgd;

    /// Scores one-hot on the class stored in column 0 of each input row, so
    /// every prediction is correct.
    struct Oracle {
        classes: usize,
        bias: Param,
        train_calls: usize,
    }

    impl Oracle {
        fn new(classes: usize) -> Oracle {
            Oracle { classes, bias: Param::zeros(ParamRole::Bias, 1, 1, classes), train_calls: 0 }
        }
    }

    impl Model for Oracle {
        fn predict(&self, inputs: &Matrix) -> Result<Matrix> {
            let mut out = Matrix::zeros(inputs.rows, self.classes);
            for (row, x) in out.data.iter_mut().zip(&inputs.data) {
                row[x[0] as usize] = 1.0;
            }
            Ok(out)
        }

        fn forward_train(&mut self, inputs: &Matrix) -> Result<Matrix> {
            self.train_calls += 1;
            self.predict(inputs)
        }

        fn backward(&mut self, _grad: &Matrix) -> Result<()> {
            Ok(())
        }

        fn params_mut(&mut self) -> Vec<&mut Param> {
            vec![&mut self.bias]
        }

        fn output_kind(&self) -> ScoreKind {
            ScoreKind::Logits
        }
    }

    /// Reports a scripted loss per batch, in call order.
    struct Scripted {
        losses: Vec<f64>,
        next: Cell<usize>,
    }

    impl Scripted {
        fn new(losses: Vec<f64>) -> Scripted {
            Scripted { losses, next: Cell::new(0) }
        }

        fn take(&self) -> f64 {
            let i = self.next.get();
            self.next.set(i + 1);
            self.losses[i]
        }
    }

    impl Criterion for Scripted {
        fn expects(&self) -> Option<ScoreKind> {
            None
        }

        fn loss(&self, _scores: &Matrix, _labels: &[usize]) -> Result<f64> {
            Ok(self.take())
        }

        fn loss_and_grad(&self, scores: &Matrix, _labels: &[usize]) -> Result<(f64, Matrix)> {
            Ok((self.take(), Matrix::zeros(scores.rows, scores.cols)))
        }
    }

    struct Recording(Arc<Mutex<Vec<(String, f64, u64)>>>);

    impl MetricsSink for Recording {
        fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
            self.0.lock().unwrap().push((tag.to_string(), value, step));
            Ok(())
        }
    }

    fn labelled(n: usize, classes: usize, batch_size: usize) -> DataLoader {
        let labels: Vec<usize> = (0..n).map(|i| i % classes).collect();
        let inputs = labels.iter().map(|&y| vec![y as f64, 1.0]).collect();
        let names = (0..classes).map(|c| format!("c{c}")).collect();
        let dataset = InMemoryDataset::new(inputs, labels, names).unwrap();
        DataLoader::new(dataset, batch_size, false, 0).unwrap()
    }

    #[test]
    fn short_final_batch_is_weighted_by_its_size() {
        let mut model = Oracle::new(3);
        let mut optimizer = Sgd::new(0.1);
        let mut loader = labelled(30, 3, 8);
        let criterion = Scripted::new(vec![1.0, 2.0, 3.0, 4.0]);
        let mut logger = MetricsLogger::disabled();

        let r = run_epoch(
            EpochMode::Train { model: &mut model, optimizer: &mut optimizer },
            loader.iter(),
            &criterion,
            &mut logger,
            0,
        ).unwrap();

        assert_relative_eq!(r.mean_loss, 92.0 / 30.0, epsilon = 1e-12);
        assert_eq!(r.accuracy, 1.0);
        assert_eq!((r.samples, r.batches), (30, 4));
        assert_eq!(model.train_calls, 4);
    }

    #[test]
    fn per_batch_losses_are_tagged_with_offset_steps() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut logger = MetricsLogger::new(Box::new(Recording(events.clone())));
        let model = Oracle::new(2);
        let mut loader = labelled(5, 2, 2);
        let criterion = Scripted::new(vec![0.5, 0.25, 0.125]);

        run_epoch(EpochMode::Eval { model: &model }, loader.iter(), &criterion, &mut logger, 10).unwrap();

        let got = events.lock().unwrap().clone();
        assert_eq!(got, vec![
            ("eval/per_batch/loss".to_string(), 0.5, 10),
            ("eval/per_batch/loss".to_string(), 0.25, 11),
            ("eval/per_batch/loss".to_string(), 0.125, 12),
        ]);
    }

    #[test]
    fn eval_is_repeatable_and_leaves_parameters_alone() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = Network::new(2, vec![Layer::Dense(Dense::new(2, 3, &mut rng))]).unwrap();
        let before = serde_json::to_string(&net).unwrap();
        let mut loader = labelled(11, 3, 4);
        let mut logger = MetricsLogger::disabled();

        let a = run_epoch(EpochMode::Eval { model: &net }, loader.iter(), &LossType::CrossEntropy, &mut logger, 0).unwrap();
        let b = run_epoch(EpochMode::Eval { model: &net }, loader.iter(), &LossType::CrossEntropy, &mut logger, 0).unwrap();

        assert_eq!(a.mean_loss.to_bits(), b.mean_loss.to_bits());
        assert_eq!(a.accuracy.to_bits(), b.accuracy.to_bits());
        assert_eq!(a.samples, 11);
        assert_eq!(serde_json::to_string(&net).unwrap(), before);
    }

    #[test]
    fn training_pass_moves_parameters() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut net = Network::new(2, vec![Layer::Dense(Dense::new(2, 3, &mut rng))]).unwrap();
        let before = serde_json::to_string(&net).unwrap();
        let mut optimizer = Sgd::new(0.5);
        let mut loader = labelled(9, 3, 3);
        let mut logger = MetricsLogger::disabled();

        let r = run_epoch(
            EpochMode::Train { model: &mut net, optimizer: &mut optimizer },
            loader.iter(),
            &LossType::CrossEntropy,
            &mut logger,
            0,
        ).unwrap();

        assert!(r.mean_loss.is_finite() && r.mean_loss >= 0.0);
        assert_ne!(serde_json::to_string(&net).unwrap(), before);
    }

    #[test]
    fn empty_batch_sequence_is_rejected() {
        let model = Oracle::new(2);
        let mut logger = MetricsLogger::disabled();
        let err = run_epoch(
            EpochMode::Eval { model: &model },
            Vec::<Batch>::new(),
            &LossType::CrossEntropy,
            &mut logger,
            0,
        ).unwrap_err();
        assert!(matches!(err, TrainError::EmptyDataset { phase: Phase::Eval }));
    }

    #[test]
    fn argmax_ties_resolve_to_first_class() {
        let scores = Matrix::from_rows(vec![vec![0.5, 0.5], vec![0.1, 0.9]]).unwrap();
        assert_eq!(count_correct(&scores, &[0, 1]), 2);
        assert_eq!(count_correct(&scores, &[1, 0]), 0);
    }
}
