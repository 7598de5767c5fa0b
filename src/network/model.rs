use crate::error::Result;
use crate::layers::param::Param;
use crate::loss::loss_type::ScoreKind;
use crate::math::matrix::Matrix;

/// Anything the epoch trainer can fit: maps an input batch to class scores.
///
/// Inference goes through `predict(&self)`, so an evaluation pass holding
/// only a shared borrow cannot touch parameters or gradient state.
pub trait Model {
    /// Scores for a batch, without caching anything.
    fn predict(&self, inputs: &Matrix) -> Result<Matrix>;

    /// Scores for a batch, caching what `backward` needs.
    fn forward_train(&mut self, inputs: &Matrix) -> Result<Matrix>;

    /// Back-propagates `∂L/∂scores` from the last `forward_train`, adding
    /// into each parameter's gradient.
    fn backward(&mut self, grad_scores: &Matrix) -> Result<()>;

    /// Every trainable parameter, in a stable order.
    fn params_mut(&mut self) -> Vec<&mut Param>;

    fn output_kind(&self) -> ScoreKind;

    /// Called before a checkpoint is written. No-op by default.
    fn record_progress(&mut self, _epoch: usize, _train_accuracy: f64) {}

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }
}
