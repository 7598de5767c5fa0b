use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainError};
use crate::metrics::sink::MetricsSink;

/// Appends scalar events as `tag,step,value` rows to `<dir>/scalars.csv`.
pub struct CsvScalarWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.csv";

    pub fn create(dir: impl AsRef<Path>) -> Result<CsvScalarWriter> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| TrainError::io(dir, e))?;
        let path = dir.join(Self::FILE_NAME);
        let fresh = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        if fresh {
            writeln!(writer, "tag,step,value").map_err(|e| TrainError::io(&path, e))?;
        }
        Ok(CsvScalarWriter { path, writer })
    }
}

impl MetricsSink for CsvScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        if tag.contains(',') || tag.contains('\n') {
            return Err(TrainError::Metrics(format!("tag {tag:?} cannot be written as CSV")));
        }
        writeln!(self.writer, "{tag},{step},{value}").map_err(|e| TrainError::io(&self.path, e))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| TrainError::io(&self.path, e))
    }
}

impl Drop for CsvScalarWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
