/// Training loop and model persistence
pub mod checkpoint;
pub mod trainer;

pub use checkpoint::{save_model, RunMetadata};
pub use trainer::{EvalReport, Trainer};
