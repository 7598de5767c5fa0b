pub mod phase;
pub mod running_stats;
pub mod epoch;
pub mod epoch_stats;
pub mod train_config;
pub mod driver;

pub use phase::Phase;
pub use running_stats::{PhaseResult, RunningStats};
pub use epoch::{count_correct, run_epoch, EpochMode};
pub use epoch_stats::EpochStats;
pub use train_config::TrainConfig;
pub use driver::{check_score_kind, CheckpointFailure, TrainingDriver, TrainingHistory};
