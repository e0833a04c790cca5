/// Decentralized weight averaging between training peers
pub mod transport;
pub mod wire;

pub use transport::{Listener, Published};
pub use wire::ParamsMsg;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use candle_core::{DType, Tensor};
use candle_nn::VarMap;
use log::{debug, info, warn};

use crate::swarm::transport::{CONNECT_TIMEOUT, IO_TIMEOUT};
use crate::SwarmError;

const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Swarm topology and sync behavior for one node.
///
/// The peer list is shared by every node; `node_id` selects the entry
/// this node listens on. An empty peer list means standalone training.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Index of this node in `peers`
    pub node_id: usize,
    /// Listen addresses of all nodes, in a fixed order shared swarm-wide
    pub peers: Vec<SocketAddr>,
    /// Nodes (including this one) that must be reachable before training starts
    pub min_peers: usize,
    /// Merge every this many optimizer steps
    pub sync_interval: u64,
    /// Let validation loss speed up or relax the sync cadence
    pub adaptive_sync: bool,
    /// How long to wait for the quorum at startup
    pub sync_timeout: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            peers: Vec::new(),
            min_peers: 2,
            sync_interval: 256,
            adaptive_sync: false,
            sync_timeout: Duration::from_secs(120),
        }
    }
}

impl SwarmConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.sync_interval == 0 {
            return Err(SwarmError::Config(
                "sync interval must be at least 1".to_string(),
            ));
        }
        if self.peers.is_empty() {
            return Ok(());
        }
        if self.node_id >= self.peers.len() {
            return Err(SwarmError::Config(format!(
                "node id {} out of range for {} peers",
                self.node_id,
                self.peers.len()
            )));
        }
        if self.min_peers > self.peers.len() {
            return Err(SwarmError::Config(format!(
                "minimum of {} nodes cannot be met by a swarm of {}",
                self.min_peers,
                self.peers.len()
            )));
        }
        Ok(())
    }

    /// True when no peer list was configured and training runs alone
    pub fn is_standalone(&self) -> bool {
        self.peers.is_empty()
    }

    /// The address this node serves its weights on
    pub fn listen_addr(&self) -> crate::Result<SocketAddr> {
        self.peers.get(self.node_id).copied().ok_or_else(|| {
            SwarmError::Config(format!(
                "node id {} out of range for {} peers",
                self.node_id,
                self.peers.len()
            ))
        })
    }

    /// Every peer address except this node's own
    pub fn peer_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        let own = self.node_id;
        self.peers
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != own)
            .map(|(_, addr)| *addr)
    }
}

/// Flatten every variable into one f32 vector, in sorted-name order.
///
/// Sorted-name order is the canonical layout peers exchange; both sides
/// of a merge must flatten identically for averaging to make sense.
pub fn flatten_params(varmap: &VarMap) -> crate::Result<Vec<f32>> {
    let data = varmap.data().lock().unwrap();
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut flat = Vec::new();
    for name in names {
        let values = data[name]
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        flat.extend_from_slice(&values);
    }
    Ok(flat)
}

/// Write a flat vector produced by [`flatten_params`] back into the
/// variables, preserving each variable's shape, dtype and device.
pub fn write_back(varmap: &VarMap, flat: &[f32]) -> crate::Result<()> {
    let data = varmap.data().lock().unwrap();
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut offset = 0;
    for name in names {
        let var = &data[name];
        let len = var.elem_count();
        if offset + len > flat.len() {
            return Err(SwarmError::Sync(format!(
                "flat parameter vector of {} values is too short for the model",
                flat.len()
            )));
        }
        let tensor = Tensor::from_vec(
            flat[offset..offset + len].to_vec(),
            var.shape().clone(),
            var.device(),
        )?
        .to_dtype(var.dtype())?;
        var.set(&tensor)?;
        offset += len;
    }
    if offset != flat.len() {
        return Err(SwarmError::Sync(format!(
            "flat parameter vector has {} values, model expects {}",
            flat.len(),
            offset
        )));
    }
    Ok(())
}

/// Training hooks that keep a node's weights in sync with its swarm.
///
/// The training loop calls `on_train_begin` once, `on_batch_end` after
/// every optimizer step, `on_epoch_end` after validation and
/// `on_train_end` when done. The callback shares the trainer's [`VarMap`],
/// so merged weights are visible to the model without copying.
pub struct SwarmCallback {
    config: SwarmConfig,
    params: VarMap,
    published: Published,
    listener: Option<Listener>,
    step: u64,
    merges: u64,
    sync_interval: u64,
    best_val_loss: Option<f32>,
}

impl SwarmCallback {
    pub fn new(config: SwarmConfig, params: &VarMap) -> crate::Result<Self> {
        config.validate()?;
        let sync_interval = config.sync_interval;
        Ok(Self {
            config,
            params: params.clone(),
            published: Published::default(),
            listener: None,
            step: 0,
            merges: 0,
            sync_interval,
            best_val_loss: None,
        })
    }

    /// Optimizer steps seen so far
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Merge rounds completed so far
    pub fn merge_rounds(&self) -> u64 {
        self.merges
    }

    /// Current sync cadence in optimizer steps
    pub fn sync_interval(&self) -> u64 {
        self.sync_interval
    }

    /// Publish the initial weights, start serving them, wait for the
    /// quorum and run the first merge so all nodes start close together.
    pub fn on_train_begin(&mut self) -> crate::Result<()> {
        if self.config.is_standalone() {
            info!("no peers configured, training standalone");
            return Ok(());
        }

        self.publish()?;
        let listener = Listener::bind(
            self.config.listen_addr()?,
            Published::clone(&self.published),
            IO_TIMEOUT,
        )?;
        info!(
            "node {} serving weights on {}",
            self.config.node_id,
            listener.local_addr()
        );
        self.listener = Some(listener);

        self.await_quorum()?;
        self.merge_round()
    }

    /// Count a finished optimizer step and merge when the cadence is due
    pub fn on_batch_end(&mut self) -> crate::Result<()> {
        self.step += 1;
        if self.config.is_standalone() {
            return Ok(());
        }
        if self.step % self.sync_interval == 0 {
            self.merge_round()?;
        }
        Ok(())
    }

    /// Adjust the sync cadence from the epoch's validation loss.
    ///
    /// A regression against the best loss seen so far halves the interval
    /// so the node pulls back toward the swarm sooner; an improvement
    /// doubles it again, never past the configured interval.
    pub fn on_epoch_end(&mut self, epoch: usize, val_loss: f32) {
        if !self.config.adaptive_sync {
            return;
        }
        match self.best_val_loss {
            None => self.best_val_loss = Some(val_loss),
            Some(best) if val_loss < best => {
                self.best_val_loss = Some(val_loss);
                let relaxed = (self.sync_interval * 2).min(self.config.sync_interval);
                if relaxed != self.sync_interval {
                    info!(
                        "epoch {}: validation loss improved to {:.6}, sync interval {} -> {}",
                        epoch, val_loss, self.sync_interval, relaxed
                    );
                }
                self.sync_interval = relaxed;
            }
            Some(best) => {
                let tightened = (self.sync_interval / 2).max(1);
                if tightened != self.sync_interval {
                    info!(
                        "epoch {}: validation loss {:.6} regressed from {:.6}, sync interval {} -> {}",
                        epoch, val_loss, best, self.sync_interval, tightened
                    );
                }
                self.sync_interval = tightened;
            }
        }
    }

    /// Run a last merge and stop serving weights
    pub fn on_train_end(&mut self) -> crate::Result<()> {
        if !self.config.is_standalone() {
            self.merge_round()?;
        }
        if let Some(mut listener) = self.listener.take() {
            listener.shutdown();
        }
        Ok(())
    }

    fn publish(&self) -> crate::Result<()> {
        let values = flatten_params(&self.params)?;
        *self.published.lock().unwrap() = Some(ParamsMsg {
            node_id: self.config.node_id as u32,
            step: self.step,
            values,
        });
        Ok(())
    }

    fn await_quorum(&self) -> crate::Result<()> {
        let required = self.config.min_peers;
        let deadline = Instant::now() + self.config.sync_timeout;
        loop {
            let mut reachable = 1;
            for addr in self.config.peer_addrs() {
                if transport::ping(addr, CONNECT_TIMEOUT, IO_TIMEOUT).is_ok() {
                    reachable += 1;
                }
            }
            if reachable >= required {
                info!("quorum reached: {} of {} required nodes up", reachable, required);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SwarmError::Sync(format!(
                    "quorum not reached within {:?}: {} of {} required nodes up",
                    self.config.sync_timeout, reachable, required
                )));
            }
            debug!("waiting for quorum: {} of {} nodes up", reachable, required);
            std::thread::sleep(RETRY_DELAY);
        }
    }

    /// One merge: publish the local snapshot, pull every peer's, and
    /// replace the local weights with the elementwise mean.
    ///
    /// The published snapshot is only updated here, at the start of the
    /// round, so concurrent peers always average against pre-merge
    /// values and every node lands on the same result.
    fn merge_round(&mut self) -> crate::Result<()> {
        let local = flatten_params(&self.params)?;
        *self.published.lock().unwrap() = Some(ParamsMsg {
            node_id: self.config.node_id as u32,
            step: self.step,
            values: local.clone(),
        });

        let mut sum = local;
        let mut contributors = 1;
        for addr in self.config.peer_addrs() {
            match transport::pull(addr, CONNECT_TIMEOUT, IO_TIMEOUT) {
                Ok(Some(msg)) => {
                    if msg.values.len() != sum.len() {
                        warn!(
                            "peer {} sent {} values, expected {}, skipping",
                            addr,
                            msg.values.len(),
                            sum.len()
                        );
                        continue;
                    }
                    for (acc, v) in sum.iter_mut().zip(msg.values.iter()) {
                        *acc += v;
                    }
                    contributors += 1;
                }
                Ok(None) => debug!("peer {} has not published yet", addr),
                Err(e) => warn!("pull from {} failed: {}", addr, e),
            }
        }

        if contributors > 1 {
            let scale = 1.0 / contributors as f32;
            for v in sum.iter_mut() {
                *v *= scale;
            }
            write_back(&self.params, &sum)?;
            info!(
                "step {}: merged weights from {} of {} nodes",
                self.step,
                contributors,
                self.config.peers.len()
            );
        } else {
            info!("step {}: no peer snapshots available, keeping local weights", self.step);
        }
        self.merges += 1;
        Ok(())
    }
}
