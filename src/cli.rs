use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::checkpoint::{CheckpointDir, CheckpointPolicy};
use crate::data::{DataLoader, ImageFolder, Normalization};
use crate::error::TrainError;
use crate::loss::LossType;
use crate::metrics::CsvScalarWriter;
use crate::network::spec::NetworkSpec;
use crate::optim::{Adam, Optimizer, Sgd};
use crate::train::{check_score_kind, TrainConfig, TrainingDriver, TrainingHistory};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Arch {
    /// Four stride-2 conv blocks, global average pool, dense head.
    Strided,
    /// Two conv + max-pool blocks, dense head.
    Baseline,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossKind {
    CrossEntropy,
    Nll,
    Mse,
}

impl From<LossKind> for LossType {
    fn from(kind: LossKind) -> LossType {
        match kind {
            LossKind::CrossEntropy => LossType::CrossEntropy,
            LossKind::Nll => LossType::Nll,
            LossKind::Mse => LossType::Mse,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferrite-fit",
    about = "Train an image classifier on a <data>/train, <data>/test folder tree"
)]
pub struct Cli {
    /// Run name; outputs go to <out-dir>/<exp-name>.
    #[arg(long, default_value = "baseline")]
    pub exp_name: String,
    /// Dataset root containing train/ and test/ class folders.
    #[arg(long)]
    pub data_path: PathBuf,
    #[arg(long, default_value_t = 5)]
    pub max_epochs: usize,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// Images are resized to IMAGE_SIZE × IMAGE_SIZE.
    #[arg(long, default_value_t = 64)]
    pub image_size: u32,
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Threads used to decode images.
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
    /// Write a checkpoint after every epoch.
    #[arg(long)]
    pub save_model: bool,
    /// Write scalars.csv.
    #[arg(long)]
    pub metrics: bool,
    #[arg(long, value_enum, default_value_t = Arch::Strided)]
    pub arch: Arch,
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,
    /// SGD momentum; ignored by Adam.
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    /// Defaults to the loss the architecture pairs with.
    #[arg(long, value_enum)]
    pub loss: Option<LossKind>,
    /// End the baseline network in a softmax layer (pairs with nll).
    #[arg(long)]
    pub softmax_head: bool,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value = "runs")]
    pub out_dir: PathBuf,
    /// Stop on the first failed checkpoint instead of logging it.
    #[arg(long)]
    pub abort_on_checkpoint_error: bool,
}

/// Fully resolved settings for one run; saved as `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub exp_name: String,
    pub data_path: PathBuf,
    pub max_epochs: usize,
    pub lr: f64,
    pub image_size: u32,
    pub batch_size: usize,
    pub num_workers: usize,
    pub save_model: bool,
    pub metrics: bool,
    pub arch: Arch,
    pub optimizer: OptimizerKind,
    pub momentum: f64,
    pub loss: Option<LossKind>,
    pub softmax_head: bool,
    pub seed: u64,
    pub out_dir: PathBuf,
    pub checkpoint_policy: CheckpointPolicy,
}

impl From<Cli> for RunConfig {
    fn from(cli: Cli) -> RunConfig {
        RunConfig {
            exp_name: cli.exp_name,
            data_path: cli.data_path,
            max_epochs: cli.max_epochs,
            lr: cli.lr,
            image_size: cli.image_size,
            batch_size: cli.batch_size,
            num_workers: cli.num_workers,
            save_model: cli.save_model,
            metrics: cli.metrics,
            arch: cli.arch,
            optimizer: cli.optimizer,
            momentum: cli.momentum,
            loss: cli.loss,
            softmax_head: cli.softmax_head,
            seed: cli.seed,
            out_dir: cli.out_dir,
            checkpoint_policy: if cli.abort_on_checkpoint_error {
                CheckpointPolicy::Abort
            } else {
                CheckpointPolicy::Continue
            },
        }
    }
}

impl RunConfig {
    pub fn train_dir(&self) -> PathBuf {
        self.data_path.join("train")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.data_path.join("test")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.out_dir.join(&self.exp_name)
    }

    /// Rejects settings that would otherwise fail only after data loading:
    /// bad numbers, an image size the architecture cannot shrink, and a loss
    /// that does not match the network head.
    pub fn validate(&self) -> Result<(), TrainError> {
        let config = |msg: String| -> Result<(), TrainError> { Err(TrainError::Config(msg)) };

        if self.exp_name.trim().is_empty() || self.exp_name.contains(|c: char| c == '/' || c == '\\') {
            return config(format!("invalid experiment name {:?}", self.exp_name));
        }
        for dir in [self.data_path.clone(), self.train_dir(), self.test_dir()] {
            if !dir.is_dir() {
                return config(format!("{} is not a directory", dir.display()));
            }
        }
        for (name, value) in [
            ("max-epochs", self.max_epochs),
            ("batch-size", self.batch_size),
            ("image-size", self.image_size as usize),
            ("num-workers", self.num_workers),
        ] {
            if value == 0 {
                return config(format!("--{name} must be at least 1"));
            }
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return config(format!("--lr must be a positive number, got {}", self.lr));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return config(format!("--momentum must be in [0, 1), got {}", self.momentum));
        }
        if self.softmax_head && self.arch != Arch::Baseline {
            return config("--softmax-head only applies to --arch baseline".into());
        }

        // Layer geometry does not depend on the class count.
        let spec = self.network_spec(1);
        let head = match spec.dry_run() {
            Ok(head) => head,
            Err(e) => {
                return config(format!(
                    "--image-size {} does not fit --arch {:?}: {e}",
                    self.image_size, self.arch
                ))
            }
        };
        check_score_kind(head, &self.loss_type(&spec))
    }

    /// `--loss` when given, otherwise the architecture's own pairing.
    pub fn loss_type(&self, spec: &NetworkSpec) -> LossType {
        self.loss.map(LossType::from).unwrap_or(spec.loss)
    }

    pub fn network_spec(&self, classes: usize) -> NetworkSpec {
        let size = self.image_size as usize;
        match self.arch {
            Arch::Strided => NetworkSpec::strided_cnn(size, classes),
            Arch::Baseline => NetworkSpec::baseline_cnn(size, classes, self.softmax_head),
        }
    }

    pub fn build_optimizer(&self) -> Box<dyn Optimizer> {
        match self.optimizer {
            OptimizerKind::Adam => Box::new(Adam::new(self.lr)),
            OptimizerKind::Sgd => Box::new(Sgd::with_momentum(self.lr, self.momentum)),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Loads both splits, builds the network and trains it. Writes
/// `config.json` and `history.json` (plus `scalars.csv` and checkpoints when
/// enabled) under `<out-dir>/<exp-name>/`.
pub fn run(config: &RunConfig) -> anyhow::Result<TrainingHistory> {
    config.validate()?;

    let run_dir = config.run_dir();
    fs::create_dir_all(&run_dir).with_context(|| format!("creating {}", run_dir.display()))?;
    write_json(&run_dir.join("config.json"), config)?;

    let folder = ImageFolder::new(config.image_size, Normalization::default(), config.num_workers);
    let train_set = folder
        .load(&config.train_dir())
        .with_context(|| format!("loading {}", config.train_dir().display()))?;
    let classes = train_set.class_names().to_vec();
    let test_set = folder
        .load_split(&config.test_dir(), &classes)
        .with_context(|| format!("loading {}", config.test_dir().display()))?;
    info!(train = train_set.len(), test = test_set.len(), classes = classes.len(), "datasets ready");

    let spec = config.network_spec(classes.len());
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut network = spec.build(&mut rng).with_context(|| format!("building {} network", spec.name))?;
    network.metadata.class_names = classes;
    let loss = config.loss_type(&spec);
    info!(arch = %spec.name, parameters = network.parameter_count(), loss = ?loss, "network built");

    let train_config = TrainConfig {
        experiment: config.exp_name.clone(),
        epochs: config.max_epochs,
        save_model: config.save_model,
        checkpoint_policy: config.checkpoint_policy,
        progress_tx: None,
    };
    let mut driver = TrainingDriver::new(train_config, network, config.build_optimizer(), Box::new(loss))?;
    if config.metrics {
        driver = driver.with_metrics(Box::new(CsvScalarWriter::create(&run_dir)?));
    }
    if config.save_model {
        driver = driver.with_checkpoints(CheckpointDir::new(run_dir.join("checkpoints")));
    }

    let mut train_loader = DataLoader::new(train_set, config.batch_size, true, config.seed)?;
    let mut test_loader = DataLoader::new(test_set, config.batch_size, false, config.seed)?;
    let history_path = run_dir.join("history.json");
    let history = match driver.run(&mut train_loader, &mut test_loader) {
        Ok(history) => history,
        Err(e) => {
            let partial = driver.history();
            partial.save_json(&history_path)?;
            error!(completed = partial.epochs.len(), history = %history_path.display(), "training stopped early");
            return Err(e.into());
        }
    };
    history.save_json(&history_path)?;
    if let Some(last) = history.last() {
        info!(
            train_accuracy = last.train_accuracy,
            eval_accuracy = last.eval_accuracy,
            history = %history_path.display(),
            "training finished"
        );
    }
    Ok(history)
}
