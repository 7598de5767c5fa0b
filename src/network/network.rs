use std::path::Path;

use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};
use crate::layers::layer::Layer;
use crate::layers::param::{Initializer, Param, ParamRole};
use crate::loss::loss_type::ScoreKind;
use crate::math::matrix::Matrix;
use crate::network::metadata::ModelMetadata;
use crate::network::model::Model;

/// A sequential stack of layers over flattened `(C, H, W)` input rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub input_len: usize,
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

impl Network {
    /// Builds a network, checking each layer's own geometry and that it
    /// accepts the width the previous one produces.
    pub fn new(input_len: usize, layers: Vec<Layer>) -> Result<Network> {
        let mut width = input_len;
        for (i, layer) in layers.iter().enumerate() {
            layer.validate()?;
            if let Some(expected) = layer.input_len() {
                if expected != width {
                    return Err(TrainError::shape(
                        format!("layer {i} ({})", layer.name()),
                        format!("{expected} inputs"),
                        width,
                    ));
                }
            }
            width = layer.output_len(width);
        }
        Ok(Network { input_len, layers, metadata: ModelMetadata::default() })
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Network {
        self.metadata = metadata;
        self
    }

    pub fn output_len(&self) -> usize {
        self.layers.iter().fold(self.input_len, |w, l| l.output_len(w))
    }

    pub fn params(&self) -> Vec<&Param> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    /// Re-initializes every parameter whose role satisfies `predicate`.
    /// Returns how many tensors were touched.
    pub fn init_params<P, R>(&mut self, predicate: P, init: Initializer, rng: &mut R) -> usize
    where
        P: Fn(&ParamRole) -> bool,
        R: Rng + ?Sized,
    {
        let mut touched = 0;
        for param in self.params_mut() {
            if predicate(&param.role) {
                init.apply(param, rng);
                touched += 1;
            }
        }
        touched
    }

    /// Serializes the network weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| TrainError::io(path, e))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a network from a JSON file previously written by `save_json`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Network> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| TrainError::io(path, e))?;
        let reader = std::io::BufReader::new(file);
        let network: Network = serde_json::from_reader(reader)?;
        Network::new(network.input_len, network.layers).map(|n| n.with_metadata(network.metadata))
    }
}

impl Model for Network {
    fn predict(&self, inputs: &Matrix) -> Result<Matrix> {
        let mut current = inputs.clone();
        for layer in &self.layers {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    fn forward_train(&mut self, inputs: &Matrix) -> Result<Matrix> {
        let mut current = inputs.clone();
        for layer in &mut self.layers {
            current = layer.forward_train(&current)?;
        }
        Ok(current)
    }

    fn backward(&mut self, grad_scores: &Matrix) -> Result<()> {
        let mut delta = grad_scores.clone();
        for layer in self.layers.iter_mut().rev() {
            delta = layer.backward(&delta)?;
        }
        Ok(())
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }

    fn output_kind(&self) -> ScoreKind {
        match self.layers.last() {
            Some(Layer::Softmax(_)) => ScoreKind::Probabilities,
            _ => ScoreKind::Logits,
        }
    }

    fn record_progress(&mut self, epoch: usize, train_accuracy: f64) {
        self.metadata.epoch = Some(epoch);
        self.metadata.train_accuracy = Some(train_accuracy);
    }
}
