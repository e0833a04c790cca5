/// AMD GPU detection and VRAM queries over sysfs
use std::path::{Path, PathBuf};

use crate::SwarmError;

const AMD_VENDOR: &str = "0x1002";
const DRM_ROOT: &str = "/sys/class/drm";

/// VRAM usage above this marks the card as actively used; an idle card
/// sits around 2 MB.
pub const ACTIVE_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

/// One AMD card found under the DRM sysfs tree.
#[derive(Debug, Clone)]
pub struct AmdGpu {
    index: usize,
    device_dir: PathBuf,
}

impl AmdGpu {
    /// DRM card index, the `N` in `cardN`
    pub fn index(&self) -> usize {
        self.index
    }

    /// VRAM currently allocated, in bytes
    pub fn vram_used(&self) -> crate::Result<u64> {
        read_u64(&self.device_dir.join("mem_info_vram_used"))
    }

    /// Total VRAM on the card, in bytes
    pub fn vram_total(&self) -> crate::Result<u64> {
        read_u64(&self.device_dir.join("mem_info_vram_total"))
    }

    /// True when VRAM usage shows the card is doing real work
    pub fn is_active(&self) -> crate::Result<bool> {
        Ok(self.vram_used()? > ACTIVE_THRESHOLD_BYTES)
    }
}

fn read_u64(path: &Path) -> crate::Result<u64> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SwarmError::Gpu(format!("failed to read {:?}: {}", path, e)))?;
    raw.trim()
        .parse()
        .map_err(|e| SwarmError::Gpu(format!("bad value in {:?}: {}", path, e)))
}

/// All AMD cards visible on this host, sorted by card index
pub fn detect_gpus() -> crate::Result<Vec<AmdGpu>> {
    scan(Path::new(DRM_ROOT))
}

fn scan(root: &Path) -> crate::Result<Vec<AmdGpu>> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| SwarmError::Gpu(format!("failed to read {:?}: {}", root, e)))?;

    let mut gpus = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| SwarmError::Gpu(format!("failed to scan {:?}: {}", root, e)))?;
        let name = entry.file_name();
        let index = match parse_card_index(&name.to_string_lossy()) {
            Some(index) => index,
            None => continue,
        };
        let device_dir = entry.path().join("device");
        // unreadable vendor file: skip the entry
        match std::fs::read_to_string(device_dir.join("vendor")) {
            Ok(vendor) if vendor.trim() == AMD_VENDOR => gpus.push(AmdGpu { index, device_dir }),
            _ => {}
        }
    }
    gpus.sort_by_key(|gpu| gpu.index);
    Ok(gpus)
}

/// `card0` yields 0; connector entries like `card0-DP-1` and render
/// nodes yield nothing
fn parse_card_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("card")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
