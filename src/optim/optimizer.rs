use crate::layers::param::Param;

/// Applies one update to a model's parameters from their accumulated
/// gradients.
///
/// `params` must be passed in the same order on every call: stateful
/// optimizers keep their per-parameter buffers by slot.
pub trait Optimizer {
    fn step(&mut self, params: &mut [&mut Param]);

    fn learning_rate(&self) -> f64;

    fn name(&self) -> &'static str;
}
