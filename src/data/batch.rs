use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;

/// A group of samples processed as one unit: one input row per label.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Matrix,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn new(inputs: Matrix, labels: Vec<usize>) -> Result<Batch> {
        if inputs.rows != labels.len() {
            return Err(TrainError::shape("batch", format!("{} input rows", labels.len()), inputs.rows));
        }
        Ok(Batch { inputs, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Anything that can replay an epoch's worth of batches, once per call.
pub trait BatchSource {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

/// Fixed batches, replayed in the same order every pass.
impl BatchSource for Vec<Batch> {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter().cloned())
    }
}
