use serde::{Deserialize, Serialize};

/// Shape of one input sample, stored channel-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn rgb(size: usize) -> InputShape {
        InputShape { channels: 3, height: size, width: size }
    }

    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Optional annotations attached to a saved Network.
/// All fields default, so bare checkpoints deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelMetadata {
    pub description: Option<String>,
    pub input_shape: Option<InputShape>,
    /// Human-readable class labels for the output layer, index = label.
    #[serde(default)]
    pub class_names: Vec<String>,
    /// Last completed epoch (0-based) when the snapshot was taken.
    pub epoch: Option<usize>,
    pub train_accuracy: Option<f64>,
}
