/// Swarm-learning MNIST training run, driven entirely by environment
/// variables so every node in a swarm runs the same binary.
use candle_core::Device;
use swarm_mnist::data::Mnist;
use swarm_mnist::gpu::{self, AmdGpu};
use swarm_mnist::training::{save_model, RunMetadata, Trainer};
use swarm_mnist::utils;
use swarm_mnist::{RunConfig, SwarmCallback};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RunConfig::from_env()?;
    config.validate()?;

    log::info!("=== Swarm MNIST ===");
    log::info!("Scratch dir: {:?}", config.scratch_dir);
    log::info!("Epochs: {}", config.max_epochs);
    log::info!("Batch size: {}", config.batch_size);
    if config.swarm.is_standalone() {
        log::info!("Swarm: standalone, no peers configured");
    } else {
        log::info!(
            "Swarm: node {} of {}, min peers {}, sync every {} steps{}",
            config.swarm.node_id,
            config.swarm.peers.len(),
            config.swarm.min_peers,
            config.swarm.sync_interval,
            if config.swarm.adaptive_sync {
                " (adaptive)"
            } else {
                ""
            }
        );
    }

    let dataset = Mnist::load(&config.data_dir)?;
    log::info!(
        "Dataset loaded: {} train / {} test examples",
        dataset.train_len()?,
        dataset.test_len()?
    );

    let device = if candle_core::utils::cuda_is_available() {
        log::info!("Cuda is accessible");
        Device::new_cuda(0)?
    } else {
        log::info!("Cuda is not accessible, training on CPU");
        Device::Cpu
    };

    let gpu = find_gpu(&config);

    let mut trainer = Trainer::new(device, config.log_every)?;
    log::info!(
        "Model parameters: {}",
        utils::count_parameters(trainer.varmap())
    );

    // batches are visited in the same fixed order on every node
    let mut train_loader = dataset.train_batches(config.batch_size, false)?;
    let mut test_loader = dataset.test_batches(config.batch_size)?;

    let mut swarm = SwarmCallback::new(config.swarm.clone(), trainer.varmap())?;
    swarm.on_train_begin()?;

    let mut final_loss = 0.0;
    let mut last_report = None;
    for epoch in 1..=config.max_epochs {
        final_loss = trainer.train_epoch(epoch, &mut train_loader, Some(&mut swarm))?;

        let report = trainer.evaluate(&mut test_loader)?;
        log::info!(
            "Test set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
            report.avg_loss,
            report.correct,
            report.total,
            report.accuracy()
        );
        swarm.on_epoch_end(epoch, report.avg_loss);
        last_report = Some(report);

        if let Some(gpu) = &gpu {
            log_vram(epoch, gpu);
        }
    }

    swarm.on_train_end()?;

    let test_accuracy = last_report.map(|r| r.accuracy()).unwrap_or(0.0);
    let metadata = RunMetadata::new(
        config.max_epochs,
        final_loss,
        test_accuracy,
        swarm.merge_rounds(),
    );
    save_model(trainer.varmap(), &config.scratch_dir, "mnist", &metadata)?;
    log::info!("Saved the trained model!");

    Ok(())
}

/// Pick the card the run was pointed at, tolerating hosts without AMD
/// GPUs or without the sysfs files
fn find_gpu(config: &RunConfig) -> Option<AmdGpu> {
    match gpu::detect_gpus() {
        Ok(gpus) => {
            log::info!("AMD GPU devices available on this host: {}", gpus.len());
            let found = gpus.into_iter().find(|g| g.index() == config.gpu_index);
            if found.is_none() {
                log::info!("No AMD card with index {}", config.gpu_index);
            }
            found
        }
        Err(e) => {
            log::warn!("AMD GPU detection failed: {}", e);
            None
        }
    }
}

fn log_vram(epoch: usize, gpu: &AmdGpu) {
    match (gpu.vram_used(), gpu.is_active()) {
        (Ok(used), Ok(active)) => {
            log::info!(
                "Epoch {}: VRAM usage {} on card {}, AMD GPU used: {}",
                epoch,
                utils::format_bytes(used),
                gpu.index(),
                active
            );
        }
        (Err(e), _) | (_, Err(e)) => log::warn!("VRAM query failed: {}", e),
    }
}
