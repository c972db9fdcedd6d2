//! Device-resident frame buffers (RAII wrappers around cudarc slices).

use std::sync::Arc;

use cudarc::driver::safe::{CudaSlice, CudaStream, DevicePtr};
use tracing::debug;

use fl_common::{FrameLayout, TransferResult};

use crate::context::driver_err;

/// One video frame in a linear CUDA device allocation.
///
/// Planes live back to back inside a single allocation, at the offsets and
/// pitches described by the frame layout. Freed on drop via cudarc's
/// `CudaSlice` drop impl.
#[derive(Debug)]
pub struct DeviceFrameBuffer {
    /// The underlying device allocation.
    slice: CudaSlice<u8>,
    /// Stream the allocation belongs to (kept for memory ops).
    stream: Arc<CudaStream>,
    /// Plane geometry of the frame stored here.
    layout: FrameLayout,
}

impl DeviceFrameBuffer {
    /// Allocate a zero-initialized device frame for `layout`.
    pub fn alloc(stream: &Arc<CudaStream>, layout: FrameLayout) -> TransferResult<Self> {
        let size = layout.byte_size();
        let slice = stream.alloc_zeros::<u8>(size).map_err(driver_err)?;

        debug!(size, format = ?layout.format, "Allocated device frame buffer");
        Ok(Self {
            slice,
            stream: stream.clone(),
            layout,
        })
    }

    /// Frame layout of this buffer.
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Total allocation size in bytes.
    pub fn size(&self) -> usize {
        self.layout.byte_size()
    }

    /// Device ordinal this buffer lives on.
    pub fn ordinal(&self) -> usize {
        self.stream.context().ordinal()
    }

    /// Raw device pointer to the start of the allocation.
    pub fn base_ptr(&self) -> u64 {
        // The SyncOnDrop is dropped immediately, which is fine for just
        // reading the pointer value.
        let (ptr, _sync) = self.slice.device_ptr(&self.stream);
        ptr
    }

    /// Raw device pointer to the start of one plane.
    ///
    /// # Panics
    ///
    /// Panics if `plane` is out of range for the layout.
    pub fn plane_ptr(&self, plane: usize) -> u64 {
        self.base_ptr() + self.layout.plane(plane).offset as u64
    }

    /// Copy the whole allocation to host memory (readback). Blocks until
    /// the copy has completed.
    pub fn copy_to_host(&self, dst: &mut [u8]) -> TransferResult<()> {
        self.stream
            .memcpy_dtoh(&self.slice, dst)
            .map_err(driver_err)?;
        self.stream.synchronize().map_err(driver_err)
    }

    /// Copy host memory into the whole allocation. Blocks until the copy
    /// has completed.
    pub fn copy_from_host(&mut self, src: &[u8]) -> TransferResult<()> {
        self.stream
            .memcpy_htod(src, &mut self.slice)
            .map_err(driver_err)?;
        self.stream.synchronize().map_err(driver_err)
    }
}
