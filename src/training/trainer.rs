/// Training loop for the MNIST classifier
use candle_core::{DType, Device, D};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};

use crate::data::BatchLoader;
use crate::model::MnistNet;
use crate::swarm::SwarmCallback;

/// Result of one pass over an evaluation set
#[derive(Debug, Clone, Copy)]
pub struct EvalReport {
    /// Summed negative log likelihood divided by the example count
    pub avg_loss: f32,
    /// Correctly classified examples
    pub correct: usize,
    /// Examples evaluated
    pub total: usize,
}

impl EvalReport {
    /// Accuracy in percent
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f32 / self.total as f32
    }
}

/// Owns the model, its variables and the optimizer for one training run
pub struct Trainer {
    varmap: VarMap,
    model: MnistNet,
    optimizer: AdamW,
    device: Device,
    log_every: usize,
    step: usize,
}

impl Trainer {
    /// Build a fresh model on `device`, logging progress every
    /// `log_every` batches
    pub fn new(device: Device, log_every: usize) -> crate::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = MnistNet::new(vb)?;

        let optimizer_params = ParamsAdamW {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(varmap.all_vars(), optimizer_params)?;

        Ok(Self {
            varmap,
            model,
            optimizer,
            device,
            log_every: log_every.max(1),
            step: 0,
        })
    }

    /// Variables shared with the swarm callback and saved at the end
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Optimizer steps taken so far
    pub fn step(&self) -> usize {
        self.step
    }

    /// One pass over the training data, returning the mean batch loss.
    ///
    /// When a swarm callback is given, its `on_batch_end` hook runs after
    /// every optimizer step so merges land between batches.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        loader: &mut impl BatchLoader,
        mut swarm: Option<&mut SwarmCallback>,
    ) -> crate::Result<f32> {
        loader.reset();
        let num_batches = loader.num_batches();
        let num_examples = loader.num_examples();

        let mut total_loss = 0.0f32;
        let mut batch_idx = 0;
        let mut seen = 0;
        while let Some((images, labels)) = loader.next_batch(&self.device)? {
            let batch_len = images.dim(0)?;
            let log_probs = self.model.forward(&images, true)?;
            let loss = loss::nll(&log_probs, &labels)?;
            self.optimizer.backward_step(&loss)?;
            self.step += 1;

            let loss_val = loss.to_scalar::<f32>()?;
            total_loss += loss_val;

            if batch_idx % self.log_every == 0 {
                log::info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                    epoch,
                    seen,
                    num_examples,
                    100.0 * batch_idx as f32 / num_batches as f32,
                    loss_val
                );
            }
            seen += batch_len;
            batch_idx += 1;

            if let Some(callback) = swarm.as_deref_mut() {
                callback.on_batch_end()?;
            }
        }

        if batch_idx == 0 {
            return Err(crate::SwarmError::Data(
                "no batches in training loader".to_string(),
            ));
        }
        Ok(total_loss / batch_idx as f32)
    }

    /// Score the model on an evaluation set without touching gradients
    pub fn evaluate(&self, loader: &mut impl BatchLoader) -> crate::Result<EvalReport> {
        loader.reset();
        let mut sum_loss = 0.0f32;
        let mut correct = 0;
        let mut total = 0;
        while let Some((images, labels)) = loader.next_batch(&self.device)? {
            let batch_len = images.dim(0)?;
            let log_probs = self.model.forward(&images, false)?;
            let loss = loss::nll(&log_probs, &labels)?;
            sum_loss += loss.to_scalar::<f32>()? * batch_len as f32;

            let hits = log_probs
                .argmax(D::Minus1)?
                .eq(&labels)?
                .to_dtype(DType::F32)?
                .sum_all()?
                .to_scalar::<f32>()?;
            correct += hits as usize;
            total += batch_len;
        }

        if total == 0 {
            return Err(crate::SwarmError::Data(
                "no batches in evaluation loader".to_string(),
            ));
        }
        Ok(EvalReport {
            avg_loss: sum_loss / total as f32,
            correct,
            total,
        })
    }
}
