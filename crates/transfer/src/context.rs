//! CUDA context and stream management for the transfer engine.
//!
//! Wraps cudarc's `CudaContext` with device selection and adds the scoped
//! current-context guard every device-call block runs under. The guard
//! captures whatever context was bound on entry and restores it on drop,
//! so early-error returns cannot leak our context to unrelated callers.

use std::sync::Arc;

use cudarc::driver::safe::{CudaContext, CudaStream};
use cudarc::driver::sys;
use tracing::{debug, info};

use fl_common::{TransferError, TransferResult};

/// Convert a cudarc driver error into the engine error type.
pub(crate) fn driver_err(e: cudarc::driver::DriverError) -> TransferError {
    TransferError::Driver(e.to_string())
}

/// Managed CUDA context plus the execution stream all plane copies are
/// issued on.
#[derive(Debug)]
pub struct TransferContext {
    /// The underlying cudarc context.
    ctx: Arc<CudaContext>,
    /// Stream used for async plane copies (one per engine instance).
    stream: Arc<CudaStream>,
    /// Device ordinal this context was created on.
    ordinal: usize,
    /// Cached device name.
    name: String,
}

impl TransferContext {
    /// Create a context on the given device ordinal with a dedicated
    /// copy stream.
    pub fn new(ordinal: usize) -> TransferResult<Self> {
        let device_count = CudaContext::device_count().map_err(driver_err)?;
        if device_count == 0 {
            return Err(TransferError::Driver("no CUDA devices found".into()));
        }
        if ordinal >= device_count as usize {
            return Err(TransferError::Driver(format!(
                "invalid CUDA device ordinal {ordinal} (found {device_count} devices)"
            )));
        }

        let ctx = CudaContext::new(ordinal).map_err(driver_err)?;
        let name = ctx.name().map_err(driver_err)?;
        let stream = ctx.new_stream().map_err(driver_err)?;

        info!(device = %name, ordinal, "Transfer context initialized");

        Ok(Self {
            ctx,
            stream,
            ordinal,
            name,
        })
    }

    /// The underlying cudarc context.
    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    /// The copy stream.
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    /// Device ordinal this context targets.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Device name.
    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// Block until all copies issued on the stream have completed.
    pub fn synchronize(&self) -> TransferResult<()> {
        self.stream.synchronize().map_err(driver_err)?;
        debug!(device = %self.name, "Copy stream synchronized");
        Ok(())
    }

    /// Bind this context on the calling thread for a scoped block of
    /// device calls. The previously bound context is restored when the
    /// returned guard drops, on every exit path.
    pub fn bind_scoped(&self) -> TransferResult<ScopedContext> {
        ScopedContext::enter(&self.ctx)
    }
}

/// Guard that keeps a CUDA context current for its lifetime and restores
/// the previously bound context on drop.
#[derive(Debug)]
pub struct ScopedContext {
    /// Raw handle of the context that was current before we entered.
    prev: sys::CUcontext,
}

impl ScopedContext {
    fn enter(ctx: &Arc<CudaContext>) -> TransferResult<Self> {
        let mut prev: sys::CUcontext = std::ptr::null_mut();
        // SAFETY: cuCtxGetCurrent writes the current (possibly null) context
        // handle into a valid pointer; cuInit has already run via
        // CudaContext::new.
        unsafe { sys::cuCtxGetCurrent(&mut prev) }
            .result()
            .map_err(driver_err)?;

        ctx.bind_to_thread().map_err(driver_err)?;

        Ok(Self { prev })
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        // SAFETY: prev is either null (no context was bound) or a handle
        // obtained from cuCtxGetCurrent on this thread; both are valid
        // arguments for cuCtxSetCurrent. Errors on restore cannot be
        // propagated from Drop and are ignored.
        let _ = unsafe { sys::cuCtxSetCurrent(self.prev) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_on_machine_without_gpu_is_an_error_not_a_panic() {
        // On CI machines without a GPU this returns Err; with a GPU it
        // succeeds. Either way it must not panic.
        match TransferContext::new(0) {
            Ok(ctx) => assert!(!ctx.device_name().is_empty()),
            Err(e) => assert!(matches!(e, TransferError::Driver(_))),
        }
    }

    #[test]
    #[ignore = "requires an NVIDIA GPU"]
    fn scoped_bind_restores_previous_context() {
        let ctx = TransferContext::new(0).unwrap();
        {
            let _guard = ctx.bind_scoped().unwrap();
        }
        // Bind again after restore; must still work.
        let _guard = ctx.bind_scoped().unwrap();
    }
}
