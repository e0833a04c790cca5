/// The MNIST classifier: two fully-connected layers
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{ops, Dropout, Linear, Module, VarBuilder};
use std::path::Path;

/// Flattened 28x28 input dimension
pub const IMAGE_DIM: usize = 784;
/// Hidden layer width
pub const HIDDEN_DIM: usize = 512;
/// Number of digit classes
pub const NUM_CLASSES: usize = 10;

const DROPOUT_RATE: f32 = 0.2;

/// Two-layer MNIST network: 784 -> 512 -> ReLU -> Dropout(0.2) -> 10,
/// with log-softmax output.
///
/// All peers must build identical parameter layouts, so the layers live
/// under the fixed variable paths `dense` and `dense1`.
pub struct MnistNet {
    dense: Linear,
    dropout: Dropout,
    dense1: Linear,
}

impl MnistNet {
    /// Create the network under the given variable builder
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let dense = candle_nn::linear(IMAGE_DIM, HIDDEN_DIM, vb.pp("dense"))?;
        let dense1 = candle_nn::linear(HIDDEN_DIM, NUM_CLASSES, vb.pp("dense1"))?;

        Ok(Self {
            dense,
            dropout: Dropout::new(DROPOUT_RATE),
            dense1,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `xs` - Input images `[batch, 784]`
    /// * `train` - Enables dropout when true
    ///
    /// # Returns
    /// Log-probabilities `[batch, 10]`
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.dense.forward(xs)?;
        let xs = xs.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.dense1.forward(&xs)?;
        ops::log_softmax(&xs, D::Minus1)
    }

    /// Load the network from a safetensors file written by
    /// `VarMap::save`
    pub fn load<P: AsRef<Path>>(weights_path: P, device: &Device) -> crate::Result<Self> {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.as_ref()], DType::F32, device)?
        };
        Ok(Self::new(vb)?)
    }
}
