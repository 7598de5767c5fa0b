use std::fs;

use ferrite_fit::error::TrainError;
use ferrite_fit::layers::{Dense, Layer};
use ferrite_fit::metrics::{CsvScalarWriter, MetricsSink, NullSink};
use ferrite_fit::{
    CheckpointDir, CheckpointPolicy, DataLoader, InMemoryDataset, LossType, Matrix, Model, Network,
    Sgd, TrainConfig, TrainingDriver,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Two classes split by the sign of the first feature, with a margin of 1.
fn separable() -> InMemoryDataset {
    let mut inputs = Vec::new();
    let mut labels = Vec::new();
    for i in 0..24 {
        let offset = 1.0 + (i / 2) as f64 * 0.1;
        let noise = (i as f64 * 0.37).sin();
        if i % 2 == 0 {
            inputs.push(vec![offset, noise]);
            labels.push(1);
        } else {
            inputs.push(vec![-offset, noise]);
            labels.push(0);
        }
    }
    InMemoryDataset::new(inputs, labels, vec!["neg".into(), "pos".into()]).unwrap()
}

fn loaders(seed: u64) -> (DataLoader, DataLoader) {
    (
        DataLoader::new(separable(), 5, true, seed).unwrap(),
        DataLoader::new(separable(), 8, false, seed).unwrap(),
    )
}

fn linear_model(seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    Network::new(2, vec![Layer::Dense(Dense::new(2, 2, &mut rng))]).unwrap()
}

fn driver(config: TrainConfig) -> TrainingDriver<Network> {
    TrainingDriver::new(config, linear_model(11), Box::new(Sgd::new(0.5)), Box::new(LossType::CrossEntropy)).unwrap()
}

struct Failing;

impl MetricsSink for Failing {
    fn add_scalar(&mut self, _: &str, _: f64, _: u64) -> ferrite_fit::Result<()> {
        Err(TrainError::Metrics("sink offline".into()))
    }

    fn flush(&mut self) -> ferrite_fit::Result<()> {
        Err(TrainError::Metrics("sink offline".into()))
    }
}

#[test]
fn separable_classes_are_learned() {
    let (mut train, mut eval) = loaders(1);
    let mut d = driver(TrainConfig::new("toy", 40));
    let history = d.run(&mut train, &mut eval).unwrap();

    assert_eq!(history.epochs.len(), 40);
    let last = history.last().unwrap();
    assert_eq!(last.train_accuracy, 1.0);
    assert_eq!(last.eval_accuracy, 1.0);
    assert!(history.train_losses()[39] < history.train_losses()[0]);
    for e in &history.epochs {
        assert_eq!(e.train_samples, 24);
        assert_eq!(e.eval_samples, 24);
    }

    let model = d.into_model();
    let far_points = Matrix::from_rows(vec![vec![3.0, 0.5], vec![-3.0, -0.5]]).unwrap();
    let scores = model.predict(&far_points).unwrap();
    assert_eq!((scores.argmax_row(0), scores.argmax_row(1)), (1, 0));
}

#[test]
fn failing_sink_does_not_change_results() {
    let (mut train_a, mut eval_a) = loaders(3);
    let (mut train_b, mut eval_b) = loaders(3);

    let mut quiet = driver(TrainConfig::new("a", 5)).with_metrics(Box::new(NullSink));
    let mut broken = driver(TrainConfig::new("b", 5)).with_metrics(Box::new(Failing));
    let a = quiet.run(&mut train_a, &mut eval_a).unwrap();
    let b = broken.run(&mut train_b, &mut eval_b).unwrap();

    assert_eq!(a.train_losses(), b.train_losses());
    assert_eq!(a.train_accuracies(), b.train_accuracies());
    assert_eq!(a.eval_losses(), b.eval_losses());
    assert_eq!(a.eval_accuracies(), b.eval_accuracies());
    assert!(broken.metrics().dropped() > 0);
    assert_eq!(quiet.metrics().dropped(), 0);
}

#[test]
fn csv_sink_receives_batch_and_epoch_scalars() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut train, mut eval) = loaders(4);
    let mut d = driver(TrainConfig::new("csv", 2))
        .with_metrics(Box::new(CsvScalarWriter::create(tmp.path()).unwrap()));
    d.run(&mut train, &mut eval).unwrap();

    let text = fs::read_to_string(tmp.path().join(CsvScalarWriter::FILE_NAME)).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "tag,step,value");
    // 5 train batches and 3 eval batches per epoch; steps keep counting.
    assert!(lines.iter().any(|l| l.starts_with("train/per_batch/loss,9,")));
    assert!(lines.iter().any(|l| l.starts_with("eval/per_batch/loss,5,")));
    assert!(lines.iter().any(|l| l.starts_with("train/per_epoch/loss,1,")));
    assert!(lines.iter().any(|l| l.starts_with("eval/per_epoch/accuracy,0,")));
    assert_eq!(lines.len(), 1 + 2 * (5 + 3 + 4));
}

#[test]
fn checkpoints_are_written_each_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = TrainConfig::new("toy", 2);
    config.save_model = true;
    let (mut train, mut eval) = loaders(5);
    let mut d = driver(config).with_checkpoints(CheckpointDir::new(tmp.path().join("ckpt")));
    let history = d.run(&mut train, &mut eval).unwrap();

    assert_eq!(history.checkpoints.len(), 2);
    assert!(history.checkpoint_failures.is_empty());
    for (epoch, path) in history.checkpoints.iter().enumerate() {
        let name = path.file_name().unwrap().to_str().unwrap();
        let expected = CheckpointDir::file_name("toy", epoch, history.epochs[epoch].train_accuracy);
        assert_eq!(name, expected);
        let saved = Network::load_json(path).unwrap();
        assert_eq!(saved.metadata.epoch, Some(epoch));
    }
}

#[test]
fn continue_policy_records_failures_and_keeps_training() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    fs::write(&blocker, b"occupied").unwrap();

    let mut config = TrainConfig::new("toy", 3);
    config.save_model = true;
    let (mut train, mut eval) = loaders(6);
    let mut d = driver(config).with_checkpoints(CheckpointDir::new(blocker.join("ckpt")));
    let history = d.run(&mut train, &mut eval).unwrap();

    assert_eq!(history.epochs.len(), 3);
    let failed: Vec<usize> = history.checkpoint_failures.iter().map(|f| f.epoch).collect();
    assert_eq!(failed, vec![0, 1, 2]);
    assert!(history.checkpoints.is_empty());
}

#[test]
fn abort_policy_stops_on_first_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    fs::write(&blocker, b"occupied").unwrap();

    let mut config = TrainConfig::new("toy", 3);
    config.save_model = true;
    config.checkpoint_policy = CheckpointPolicy::Abort;
    let (mut train, mut eval) = loaders(7);
    let mut d = driver(config).with_checkpoints(CheckpointDir::new(blocker.join("ckpt")));
    let err = d.run(&mut train, &mut eval).unwrap_err();
    assert!(matches!(err, TrainError::Checkpoint { .. }));

    // The epoch that finished before the failed save is still reported.
    let partial = d.history();
    assert_eq!(partial.epochs.len(), 1);
    assert_eq!(partial.epochs[0].epoch, 1);
    assert!(partial.checkpoints.is_empty());
}

#[test]
fn history_serializes_to_json() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut train, mut eval) = loaders(8);
    let history = driver(TrainConfig::new("json", 2)).run(&mut train, &mut eval).unwrap();
    let path = tmp.path().join("history.json");
    history.save_json(&path).unwrap();
    let back: ferrite_fit::TrainingHistory = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(back.epochs.len(), 2);
    for (a, b) in back.eval_accuracies().iter().zip(history.eval_accuracies()) {
        assert!((a - b).abs() < 1e-12);
    }
}
