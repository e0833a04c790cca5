/// Saving the trained model and its run summary
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use candle_nn::VarMap;

/// Weights file name inside the model directory
pub const WEIGHTS_FILE: &str = "saved_model.safetensors";
/// Run summary file name inside the model directory
pub const METADATA_FILE: &str = "run.json";

/// Summary of a finished training run, stored next to the weights
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunMetadata {
    /// Epochs trained
    pub epochs: usize,
    /// Mean training loss of the final epoch
    pub final_loss: f32,
    /// Test-set accuracy in percent
    pub test_accuracy: f32,
    /// Weight merges performed across the run
    pub merge_rounds: u64,
    /// Unix timestamp of completion
    pub completed_unix: u64,
}

impl RunMetadata {
    pub fn new(epochs: usize, final_loss: f32, test_accuracy: f32, merge_rounds: u64) -> Self {
        let completed_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            epochs,
            final_loss,
            test_accuracy,
            merge_rounds,
            completed_unix,
        }
    }
}

/// Write the weights and run summary under `scratch_dir/name`, returning
/// the path of the weights file
pub fn save_model(
    varmap: &VarMap,
    scratch_dir: &Path,
    name: &str,
    metadata: &RunMetadata,
) -> crate::Result<PathBuf> {
    let model_dir = scratch_dir.join(name);
    std::fs::create_dir_all(&model_dir)?;

    let weights_path = model_dir.join(WEIGHTS_FILE);
    varmap.save(&weights_path)?;

    let metadata_path = model_dir.join(METADATA_FILE);
    let file = std::fs::File::create(&metadata_path)?;
    serde_json::to_writer_pretty(file, metadata)?;

    log::info!("Saved model to {:?}", weights_path);
    Ok(weights_path)
}
