pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod data;
pub mod metrics;
pub mod checkpoint;
pub mod train;
pub mod cli;

// Convenience re-exports
pub use error::{Result, TrainError};
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::layer::Layer;
pub use network::model::Model;
pub use network::network::Network;
pub use network::spec::NetworkSpec;
pub use loss::{Criterion, LossType, ScoreKind};
pub use optim::{Adam, Optimizer, Sgd};
pub use data::{Batch, BatchSource, DataLoader, ImageFolder, InMemoryDataset};
pub use metrics::{CsvScalarWriter, MetricsLogger, MetricsSink, NullSink};
pub use checkpoint::{CheckpointDir, CheckpointPolicy};
pub use train::{run_epoch, EpochMode, EpochStats, Phase, PhaseResult, TrainConfig, TrainingDriver, TrainingHistory};
