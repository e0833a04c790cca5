/// Data loading for MNIST training
pub mod mnist;

pub use mnist::{Batches, Mnist};

use candle_core::{Device, Result, Tensor};

/// Generic batch source trait
pub trait BatchLoader {
    /// Get next batch of (image, label) tensors
    fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;

    /// Get total number of examples
    fn num_examples(&self) -> usize;
}
