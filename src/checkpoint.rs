use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// What the training driver does when saving a checkpoint fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Log the failure, record it in the history and keep training.
    #[default]
    Continue,
    /// Stop the run and return the error.
    Abort,
}

/// Directory of JSON parameter snapshots.
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    dir: PathBuf,
}

impl CheckpointDir {
    pub fn new(dir: impl Into<PathBuf>) -> CheckpointDir {
        CheckpointDir { dir: dir.into() }
    }

    /// `{experiment}_epoch{epoch}_acc{accuracy:.4}.json`
    pub fn file_name(experiment: &str, epoch: usize, accuracy: f64) -> String {
        format!("{experiment}_epoch{epoch}_acc{accuracy:.4}.json")
    }

    /// Writes `model` as pretty JSON to `<dir>/<file_name>`, creating the
    /// directory if needed.
    pub fn save<M: Serialize>(&self, model: &M, file_name: &str) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let fail = |message: String| TrainError::Checkpoint { path: path.clone(), message };

        fs::create_dir_all(&self.dir).map_err(|e| fail(e.to_string()))?;
        let file = File::create(&path).map_err(|e| fail(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, model).map_err(|e| fail(e.to_string()))?;
        writer.flush().map_err(|e| fail(e.to_string()))?;
        Ok(path)
    }
}
