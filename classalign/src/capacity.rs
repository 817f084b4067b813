//! Reference batch sizing under a device memory budget.

use crate::config::CapacityConfig;
use crate::device::MemoryInfo;
use crate::error::DeviceError;

const SAMPLE_BYTES: f64 = std::mem::size_of::<f64>() as f64;

/// How many reference images may be resident at once.
///
/// Starts from the full reference count. If copying every reference would take
/// more than `free_memory_fraction` of free memory, the batch shrinks to fit
/// that fraction. The padded working set (`2W x 2H x batch`) is further capped
/// at `grid_fraction` of the per-dimension grid limit.
///
/// Never returns 0: a budget that cannot hold one image is an error.
pub fn plan_batch_size(
    (width, height): (usize, usize),
    reference_count: usize,
    memory: MemoryInfo,
    max_grid_dim: usize,
    config: &CapacityConfig,
) -> Result<usize, DeviceError> {
    let image_bytes = (width * height) as f64 * SAMPLE_BYTES;
    let free = memory.free as f64;
    let mut batch = reference_count;

    if free <= 0.0 || image_bytes * reference_count as f64 / free > config.free_memory_fraction {
        batch = (free * config.free_memory_fraction / image_bytes).floor() as usize;
    }

    let padded_footprint = 4 * width * height;
    if padded_footprint * reference_count > max_grid_dim {
        let grid_cap =
            ((max_grid_dim as f64 * config.grid_fraction).round() / padded_footprint as f64)
                .floor() as usize;
        batch = batch.min(grid_cap);
    }

    let batch = batch.min(reference_count);
    if batch == 0 {
        return Err(DeviceError::InsufficientMemory {
            width,
            height,
            free: memory.free,
        });
    }

    tracing::info!(
        "Reference batch size {} of {} ({} bytes free, grid limit {})",
        batch,
        reference_count,
        memory.free,
        max_grid_dim
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(free: usize) -> MemoryInfo {
        MemoryInfo {
            total: free,
            free,
        }
    }

    const GRID: usize = i32::MAX as usize;

    #[test]
    fn test_everything_fits() {
        let batch =
            plan_batch_size((64, 64), 10, memory(1 << 30), GRID, &CapacityConfig::default());
        assert_eq!(batch, Ok(10));
    }

    #[test]
    fn test_memory_fraction_shrinks_batch() {
        // 32x32 f64 = 8192 bytes; 2.4% of 1_000_000 holds 2 images.
        let batch =
            plan_batch_size((32, 32), 10, memory(1_000_000), GRID, &CapacityConfig::default());
        assert_eq!(batch, Ok(2));
    }

    #[test]
    fn test_grid_limit_caps_batch() {
        // Padded footprint 4*16*16 = 1024 per image; 90% of 5000 holds 4.
        let batch =
            plan_batch_size((16, 16), 10, memory(1 << 30), 5000, &CapacityConfig::default());
        assert_eq!(batch, Ok(4));
    }

    #[test]
    fn test_too_little_memory_fails_fast() {
        let err = plan_batch_size((64, 64), 3, memory(1000), GRID, &CapacityConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            DeviceError::InsufficientMemory {
                width: 64,
                height: 64,
                free: 1000
            }
        );
    }

    #[test]
    fn test_never_exceeds_reference_count() {
        let batch = plan_batch_size((8, 8), 1, memory(1 << 30), GRID, &CapacityConfig::default());
        assert_eq!(batch, Ok(1));
    }
}
