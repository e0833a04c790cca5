//! Swarm-learning MNIST training demo
//!
//! Trains the classic two-layer MNIST classifier with candle while
//! periodically averaging its weights with peer nodes, in the style of
//! decentralized swarm learning: no parameter server, every node serves
//! its latest weights over TCP and pulls the others' at sync points.
//!
//! # Layout
//!
//! - [`config`]: environment-variable driven run configuration
//! - [`data`]: MNIST loading and a shuffling batch iterator
//! - [`model`]: the 784 -> 512 -> 10 classifier
//! - [`training`]: optimizer loop, evaluation, model persistence
//! - [`swarm`]: the synchronization callback and its TCP transport
//! - [`gpu`]: AMD GPU discovery and VRAM telemetry via sysfs
//!
//! # Example
//!
//! ```ignore
//! use swarm_mnist::{RunConfig, SwarmCallback, Trainer};
//!
//! let config = RunConfig::from_env()?;
//! let mut trainer = Trainer::new(candle_core::Device::Cpu, config.log_every)?;
//! let mut swarm = SwarmCallback::new(config.swarm.clone(), trainer.varmap())?;
//! swarm.on_train_begin()?;
//! ```

pub mod config;
pub mod data;
pub mod gpu;
pub mod model;
pub mod swarm;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::RunConfig;
pub use model::MnistNet;
pub use swarm::{SwarmCallback, SwarmConfig};
pub use training::Trainer;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
