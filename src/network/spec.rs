use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, TrainError};
use crate::layers::{
    ActivationLayer, BatchNorm2d, Conv2d, Conv2dShape, Dense, GlobalAvgPool, Initializer, Layer, MaxPool2d,
    Softmax,
};
use crate::loss::loss_type::{LossType, ScoreKind};
use crate::network::metadata::{InputShape, ModelMetadata};
use crate::network::network::Network;

/// Describes one layer in a network specification. Spatial sizes are
/// derived while building, so a spec only names what a human would choose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        bias: bool,
    },
    MaxPool2d { size: usize },
    /// Per-channel normalization; keeps the spatial shape.
    BatchNorm2d,
    GlobalAvgPool,
    /// Flattens any spatial input implicitly.
    Dense { size: usize },
    Activation { function: ActivationFunction },
    Softmax,
}

/// A fully serializable description of a network architecture plus its
/// training loss type and the initializer for convolution weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Human-readable name used as the model file stem.
    pub name: String,
    pub input: InputShape,
    /// Ordered list of layer descriptions (input → output).
    pub layers: Vec<LayerSpec>,
    /// Loss function to pair with this network during training.
    pub loss: LossType,
    /// Applied to every convolution weight after construction.
    pub conv_init: Initializer,
}

#[derive(Debug, Clone, Copy)]
enum Flow {
    Spatial { channels: usize, height: usize, width: usize },
    Flat(usize),
}

impl Flow {
    fn len(&self) -> usize {
        match *self {
            Flow::Spatial { channels, height, width } => channels * height * width,
            Flow::Flat(n) => n,
        }
    }
}

impl NetworkSpec {
    /// Two valid 3×3 convolutions with 2×2 max pooling, then a dense
    /// classifier. Conv weights get Xavier init.
    ///
    /// With `softmax_head` the network emits probabilities and is paired
    /// with `Nll`; without it, logits and `CrossEntropy`.
    pub fn baseline_cnn(image_size: usize, classes: usize, softmax_head: bool) -> NetworkSpec {
        let relu = LayerSpec::Activation { function: ActivationFunction::ReLU };
        let mut layers = vec![
            LayerSpec::Conv2d { out_channels: 64, kernel: 3, stride: 1, padding: 0, bias: true },
            relu.clone(),
            LayerSpec::MaxPool2d { size: 2 },
            LayerSpec::Conv2d { out_channels: 32, kernel: 3, stride: 1, padding: 0, bias: true },
            relu,
            LayerSpec::MaxPool2d { size: 2 },
            LayerSpec::Dense { size: classes },
        ];
        if softmax_head {
            layers.push(LayerSpec::Softmax);
        }
        NetworkSpec {
            name: "baseline".into(),
            input: InputShape::rgb(image_size),
            layers,
            loss: if softmax_head { LossType::Nll } else { LossType::CrossEntropy },
            conv_init: Initializer::XavierNormal,
        }
    }

    /// Four stride-2 conv blocks (3→32→64→128→256, no bias, batch norm,
    /// ReLU), global average pooling and a dense head. Conv weights get He
    /// init.
    pub fn strided_cnn(image_size: usize, classes: usize) -> NetworkSpec {
        let mut layers = Vec::new();
        for out_channels in [32, 64, 128, 256] {
            layers.push(LayerSpec::Conv2d { out_channels, kernel: 3, stride: 2, padding: 1, bias: false });
            layers.push(LayerSpec::BatchNorm2d);
            layers.push(LayerSpec::Activation { function: ActivationFunction::ReLU });
        }
        layers.push(LayerSpec::GlobalAvgPool);
        layers.push(LayerSpec::Dense { size: classes });
        NetworkSpec {
            name: "strided".into(),
            input: InputShape::rgb(image_size),
            layers,
            loss: LossType::CrossEntropy,
            conv_init: Initializer::HeNormal,
        }
    }

    fn input_flow(&self) -> Flow {
        Flow::Spatial {
            channels: self.input.channels,
            height: self.input.height,
            width: self.input.width,
        }
    }

    fn needs_spatial(&self, i: usize, spec: &LayerSpec) -> TrainError {
        TrainError::Config(format!(
            "{}: layer {i} ({spec:?}) needs spatial input but follows a flat layer",
            self.name
        ))
    }

    /// Output of layer `i` given its input, checking geometry only.
    fn step(&self, i: usize, spec: &LayerSpec, flow: Flow) -> Result<Flow> {
        match (spec, flow) {
            (&LayerSpec::Conv2d { out_channels, kernel, stride, padding, .. }, Flow::Spatial { channels, height, width }) => {
                let shape = Conv2dShape {
                    in_channels: channels,
                    out_channels,
                    kernel,
                    stride,
                    padding,
                    in_height: height,
                    in_width: width,
                };
                shape.validate()?;
                Ok(Flow::Spatial { channels: out_channels, height: shape.out_height(), width: shape.out_width() })
            }
            (&LayerSpec::MaxPool2d { size }, Flow::Spatial { channels, height, width }) => {
                let pool = MaxPool2d::new(channels, height, width, size)?;
                Ok(Flow::Spatial { channels, height: pool.out_height(), width: pool.out_width() })
            }
            (LayerSpec::BatchNorm2d, spatial @ Flow::Spatial { .. }) => Ok(spatial),
            (LayerSpec::GlobalAvgPool, Flow::Spatial { channels, height, width }) => {
                GlobalAvgPool::new(channels, height, width)?;
                Ok(Flow::Flat(channels))
            }
            (&LayerSpec::Dense { size }, _) => Ok(Flow::Flat(size)),
            (LayerSpec::Activation { .. } | LayerSpec::Softmax, f) => Ok(f),
            (spatial_only, Flow::Flat(_)) => Err(self.needs_spatial(i, spatial_only)),
        }
    }

    /// Walks the layer shapes without allocating any weights. Returns what
    /// the built network would emit.
    pub fn dry_run(&self) -> Result<ScoreKind> {
        let mut flow = self.input_flow();
        for (i, spec) in self.layers.iter().enumerate() {
            flow = self.step(i, spec, flow)?;
        }
        Ok(match self.layers.last() {
            Some(LayerSpec::Softmax) => ScoreKind::Probabilities,
            _ => ScoreKind::Logits,
        })
    }

    /// Instantiates the layers with fresh weights.
    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Network> {
        let mut flow = self.input_flow();
        let mut layers = Vec::with_capacity(self.layers.len());

        for (i, spec) in self.layers.iter().enumerate() {
            let next = self.step(i, spec, flow)?;
            let layer = match (spec, flow) {
                (
                    &LayerSpec::Conv2d { out_channels, kernel, stride, padding, bias },
                    Flow::Spatial { channels, height, width },
                ) => {
                    let shape = Conv2dShape {
                        in_channels: channels,
                        out_channels,
                        kernel,
                        stride,
                        padding,
                        in_height: height,
                        in_width: width,
                    };
                    Layer::Conv2d(Conv2d::new(shape, bias, rng)?)
                }
                (&LayerSpec::MaxPool2d { size }, Flow::Spatial { channels, height, width }) => {
                    Layer::MaxPool2d(MaxPool2d::new(channels, height, width, size)?)
                }
                (LayerSpec::BatchNorm2d, Flow::Spatial { channels, height, width }) => {
                    Layer::BatchNorm2d(BatchNorm2d::new(channels, height, width)?)
                }
                (LayerSpec::GlobalAvgPool, Flow::Spatial { channels, height, width }) => {
                    Layer::GlobalAvgPool(GlobalAvgPool::new(channels, height, width)?)
                }
                (&LayerSpec::Dense { size }, f) => Layer::Dense(Dense::new(f.len(), size, rng)),
                (&LayerSpec::Activation { function }, _) => Layer::Activation(ActivationLayer::new(function)),
                (LayerSpec::Softmax, _) => Layer::Softmax(Softmax::new()),
                (spatial_only, Flow::Flat(_)) => return Err(self.needs_spatial(i, spatial_only)),
            };
            layers.push(layer);
            flow = next;
        }

        let mut network = Network::new(self.input.len(), layers)?.with_metadata(ModelMetadata {
            description: Some(self.name.clone()),
            input_shape: Some(self.input),
            ..ModelMetadata::default()
        });
        network.init_params(|role| role.is_convolution_weight(), self.conv_init, rng);
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::matrix::Matrix;
    use crate::network::model::Model;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn baseline_builds_for_small_images() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = NetworkSpec::baseline_cnn(16, 8, false).build(&mut rng).unwrap();
        // 16 → conv 14 → pool 7 → conv 5 → pool 2; 32·2·2 = 128 into the head.
        match &net.layers[6] {
            Layer::Dense(d) => assert_eq!((d.input_size, d.size), (128, 8)),
            other => panic!("expected dense head, got {}", other.name()),
        }
        assert_eq!(net.output_len(), 8);
        assert_eq!(net.output_kind(), ScoreKind::Logits);
    }

    #[test]
    fn baseline_rejects_tiny_images() {
        let mut rng = StdRng::seed_from_u64(0);
        let spec = NetworkSpec::baseline_cnn(8, 8, false);
        assert!(spec.build(&mut rng).is_err());
        // 8 → conv 6 → pool 3 → conv 1 → pool needs 2.
        assert!(matches!(spec.dry_run(), Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn dry_run_reports_the_head_without_building() {
        assert_eq!(NetworkSpec::strided_cnn(8, 3).dry_run().unwrap(), ScoreKind::Logits);
        assert_eq!(NetworkSpec::baseline_cnn(16, 3, true).dry_run().unwrap(), ScoreKind::Probabilities);

        let mut spec = NetworkSpec::strided_cnn(8, 3);
        spec.layers[0] = LayerSpec::Conv2d { out_channels: 4, kernel: 3, stride: 0, padding: 1, bias: false };
        assert!(matches!(spec.dry_run(), Err(TrainError::Config(_))));
    }

    #[test]
    fn strided_cnn_normalizes_after_every_conv() {
        let mut rng = StdRng::seed_from_u64(2);
        let net = NetworkSpec::strided_cnn(16, 4).build(&mut rng).unwrap();
        let names: Vec<&str> = net.layers.iter().map(|l| l.name()).collect();
        assert_eq!(&names[..3], &["conv2d", "batch_norm2d", "activation"]);
        assert_eq!(names.iter().filter(|n| **n == "batch_norm2d").count(), 4);
        // 16 → 8 → 4 → 2 → 1; the last norm sees 256 channels of 1×1.
        match &net.layers[10] {
            Layer::BatchNorm2d(bn) => assert_eq!((bn.channels, bn.height, bn.width), (256, 1, 1)),
            other => panic!("expected batch norm, got {}", other.name()),
        }
    }

    #[test]
    fn softmax_head_pairs_with_nll() {
        let spec = NetworkSpec::baseline_cnn(16, 4, true);
        assert_eq!(spec.loss, LossType::Nll);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(spec.build(&mut rng).unwrap().output_kind(), ScoreKind::Probabilities);
    }

    #[test]
    fn strided_cnn_predicts_one_row_per_sample() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = NetworkSpec::strided_cnn(8, 3).build(&mut rng).unwrap();
        let x = Matrix::he(2, 3 * 8 * 8, 1, &mut rng);
        assert_eq!(net.predict(&x).unwrap().shape(), (2, 3));
    }

    #[test]
    fn conv_after_flat_is_a_config_error() {
        let spec = NetworkSpec {
            name: "bad".into(),
            input: InputShape::rgb(4),
            layers: vec![
                LayerSpec::Dense { size: 4 },
                LayerSpec::MaxPool2d { size: 2 },
            ],
            loss: LossType::CrossEntropy,
            conv_init: Initializer::HeNormal,
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(spec.build(&mut rng), Err(TrainError::Config(_))));
    }
}
