//! Device memory capability and the host-backed implementation.
//!
//! The pipeline never holds raw device pointers. It allocates move-only
//! [`DeviceBuffer`] handles, copies sample data in and out, and releases the
//! handles explicitly when a batch is done.

use crate::error::DeviceError;
use crate::image::ImageBatch;

const SAMPLE_BYTES: usize = std::mem::size_of::<f64>();

/// Memory reported by a device, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: usize,
    pub free: usize,
}

impl MemoryInfo {
    pub fn used(&self) -> usize {
        self.total - self.free
    }
}

/// Handle to a device allocation of `len` f64 samples.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    slot: usize,
    len: usize,
}

impl DeviceBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Capability interface of a compute device's memory.
pub trait Device {
    fn memory_info(&self) -> MemoryInfo;

    /// Hardware per-dimension grid limit, in elements.
    fn max_grid_dim(&self) -> usize;

    fn allocate(&mut self, len: usize) -> Result<DeviceBuffer, DeviceError>;

    fn copy_in(&mut self, buffer: &DeviceBuffer, data: &[f64]) -> Result<(), DeviceError>;

    fn copy_out(&self, buffer: &DeviceBuffer, out: &mut [f64]) -> Result<(), DeviceError>;

    fn release(&mut self, buffer: DeviceBuffer);
}

/// Device backed by host memory with an explicit byte budget.
#[derive(Debug)]
pub struct HostDevice {
    total_bytes: usize,
    used_bytes: usize,
    max_grid_dim: usize,
    slots: Vec<Option<Vec<f64>>>,
    free_slots: Vec<usize>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MEMORY, Self::DEFAULT_GRID_DIM)
    }
}

impl HostDevice {
    pub const DEFAULT_MEMORY: usize = 4 << 30;
    pub const DEFAULT_GRID_DIM: usize = i32::MAX as usize;

    pub fn new(total_bytes: usize, max_grid_dim: usize) -> Self {
        Self {
            total_bytes,
            used_bytes: 0,
            max_grid_dim,
            slots: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    pub fn with_memory(total_bytes: usize) -> Self {
        Self::new(total_bytes, Self::DEFAULT_GRID_DIM)
    }

    /// Number of live allocations.
    pub fn live_buffers(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    fn slot(&self, buffer: &DeviceBuffer) -> Result<&Vec<f64>, DeviceError> {
        self.slots
            .get(buffer.slot)
            .and_then(Option::as_ref)
            .ok_or(DeviceError::InvalidBuffer(buffer.slot))
    }
}

impl Device for HostDevice {
    fn memory_info(&self) -> MemoryInfo {
        MemoryInfo {
            total: self.total_bytes,
            free: self.total_bytes - self.used_bytes,
        }
    }

    fn max_grid_dim(&self) -> usize {
        self.max_grid_dim
    }

    fn allocate(&mut self, len: usize) -> Result<DeviceBuffer, DeviceError> {
        let requested = len * SAMPLE_BYTES;
        let free = self.total_bytes - self.used_bytes;
        if requested > free {
            return Err(DeviceError::OutOfMemory { requested, free });
        }
        self.used_bytes += requested;

        let storage = vec![0.0; len];
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(storage);
                slot
            }
            None => {
                self.slots.push(Some(storage));
                self.slots.len() - 1
            }
        };
        Ok(DeviceBuffer { slot, len })
    }

    fn copy_in(&mut self, buffer: &DeviceBuffer, data: &[f64]) -> Result<(), DeviceError> {
        if data.len() != buffer.len {
            return Err(DeviceError::LengthMismatch {
                expected: buffer.len,
                actual: data.len(),
            });
        }
        let storage = self
            .slots
            .get_mut(buffer.slot)
            .and_then(Option::as_mut)
            .ok_or(DeviceError::InvalidBuffer(buffer.slot))?;
        storage.copy_from_slice(data);
        Ok(())
    }

    fn copy_out(&self, buffer: &DeviceBuffer, out: &mut [f64]) -> Result<(), DeviceError> {
        if out.len() != buffer.len {
            return Err(DeviceError::LengthMismatch {
                expected: buffer.len,
                actual: out.len(),
            });
        }
        out.copy_from_slice(self.slot(buffer)?);
        Ok(())
    }

    fn release(&mut self, buffer: DeviceBuffer) {
        if let Some(slot) = self.slots.get_mut(buffer.slot) {
            if slot.take().is_some() {
                self.used_bytes -= buffer.len * SAMPLE_BYTES;
                self.free_slots.push(buffer.slot);
            }
        }
    }
}

/// An image batch copied into device memory.
#[derive(Debug)]
pub struct ResidentBatch {
    buffer: DeviceBuffer,
    width: usize,
    height: usize,
    count: usize,
}

impl ResidentBatch {
    pub fn upload(device: &mut dyn Device, batch: &ImageBatch) -> Result<Self, DeviceError> {
        let buffer = device.allocate(batch.data().len())?;
        if let Err(e) = device.copy_in(&buffer, batch.data()) {
            device.release(buffer);
            return Err(e);
        }
        Ok(Self {
            buffer,
            width: batch.width(),
            height: batch.height(),
            count: batch.count(),
        })
    }

    /// Host copy of the resident images.
    pub fn download(&self, device: &dyn Device) -> Result<ImageBatch, DeviceError> {
        let mut batch = ImageBatch::zeros(self.width, self.height, self.count);
        device.copy_out(&self.buffer, batch.data_mut())?;
        Ok(batch)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn release(self, device: &mut dyn Device) {
        device.release(self.buffer);
    }
}
