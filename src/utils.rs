/// Small helpers shared across the crate
use candle_nn::VarMap;

/// Total number of trainable parameters held by a [`VarMap`]
pub fn count_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}

/// Render a byte count the way humans read VRAM sizes
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::Init;

    #[test]
    fn test_count_parameters_sums_all_vars() -> crate::Result<()> {
        let varmap = VarMap::new();
        varmap.get((3, 4), "w", Init::Const(0.0), DType::F32, &Device::Cpu)?;
        varmap.get(4, "b", Init::Const(0.0), DType::F32, &Device::Cpu)?;
        assert_eq!(count_parameters(&varmap), 16);
        Ok(())
    }

    #[test]
    fn test_count_parameters_empty_varmap() {
        assert_eq!(count_parameters(&VarMap::new()), 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(format_bytes(16 * 1024 * 1024 * 1024), "16.00 GiB");
        assert_eq!(format_bytes(1536), "1.50 KiB");
    }
}
