use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::batch::{Batch, BatchSource};
use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;

/// Labelled samples held in memory, one flattened row per sample.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    inputs: Vec<Vec<f64>>,
    labels: Vec<usize>,
    class_names: Vec<String>,
    feature_len: usize,
}

impl InMemoryDataset {
    /// Validates equal lengths, uniform row width and labels within
    /// `class_names`.
    pub fn new(inputs: Vec<Vec<f64>>, labels: Vec<usize>, class_names: Vec<String>) -> Result<Self> {
        if inputs.len() != labels.len() {
            return Err(TrainError::shape("dataset labels", inputs.len(), labels.len()));
        }
        let feature_len = inputs.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = inputs.iter().enumerate().find(|(_, r)| r.len() != feature_len) {
            return Err(TrainError::shape(format!("dataset sample {i}"), feature_len, row.len()));
        }
        if let Some(&bad) = labels.iter().find(|&&y| y >= class_names.len()) {
            return Err(TrainError::LabelOutOfRange { label: bad, classes: class_names.len() });
        }
        Ok(InMemoryDataset { inputs, labels, class_names, feature_len })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        let rows = indices.iter().map(|&i| self.inputs[i].clone()).collect();
        let labels = indices.iter().map(|&i| self.labels[i]).collect();
        Batch {
            inputs: Matrix { rows: indices.len(), cols: self.feature_len, data: rows },
            labels,
        }
    }
}

/// Restartable batch producer over an `InMemoryDataset`.
///
/// Every call to `iter` walks the whole dataset once. With `shuffle` the
/// order is redrawn per call from a seeded generator, so a run is
/// reproducible end to end.
pub struct DataLoader {
    dataset: InMemoryDataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(dataset: InMemoryDataset, batch_size: usize, shuffle: bool, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainError::Config("batch_size must be at least 1".into()));
        }
        Ok(DataLoader { dataset, batch_size, shuffle, rng: StdRng::seed_from_u64(seed) })
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per pass; the last one may be short.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn iter(&mut self) -> impl Iterator<Item = Batch> + '_ {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let dataset = &self.dataset;
        let batch_size = self.batch_size;
        (0..order.len())
            .step_by(batch_size)
            .map(move |start| {
                let end = (start + batch_size).min(order.len());
                dataset.gather(&order[start..end])
            })
    }
}

impl BatchSource for DataLoader {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter())
    }
}
