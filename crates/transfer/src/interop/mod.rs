//! GL-interop transfer path.
//!
//! GL buffer objects live in a foreign API whose calls are only valid on
//! the thread owning the GL context. The [`InteropContext`] owns that
//! dedicated worker thread; a transfer is submitted to it as one unit of
//! work and the calling thread blocks until it completes (one round trip
//! per transfer, no pipelining).
//!
//! Before CUDA can copy against a GL buffer object the object must be
//! registered with the driver's graphics-interop API. Registration is
//! expensive and happens once per object (see [`GlBufferPlane`]); mapping
//! and unmapping happen around every single transfer.

pub mod ffi;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fl_common::{MemoryDomain, TransferError, TransferResult};

use self::ffi::{check, CudaGlLibrary};
use crate::buffer::TransferBuffer;
use crate::context::TransferContext;
use crate::copy::launch_plane_copy;
use crate::descriptor::{build_descriptors, CopyLocation, MappedPlanes, PlaneView};

// ---------------------------------------------------------------------------
// Registration binding
// ---------------------------------------------------------------------------

/// A GL buffer object's registration with the CUDA graphics-interop API.
///
/// Created lazily on first transfer of the owning plane object and
/// destroyed with it; it is not tracked by the engine. Registration makes
/// the object mappable; it does not by itself yield a device pointer.
pub struct GraphicsResourceBinding {
    resource: ffi::CUgraphicsResource,
    lib: Option<Arc<CudaGlLibrary>>,
}

// SAFETY: the resource handle is a driver-side token, valid from any
// thread; all calls against it happen on the interop worker thread.
unsafe impl Send for GraphicsResourceBinding {}
unsafe impl Sync for GraphicsResourceBinding {}

impl GraphicsResourceBinding {
    /// Register `gl_buffer` with the driver.
    pub(crate) fn register(lib: &Arc<CudaGlLibrary>, gl_buffer: u32) -> TransferResult<Self> {
        let mut resource: ffi::CUgraphicsResource = std::ptr::null_mut();
        // SAFETY: resource is a valid out-pointer and gl_buffer names a GL
        // buffer object owned by the context current on this thread.
        let ret = unsafe {
            (lib.fns.cuGraphicsGLRegisterBuffer)(
                &mut resource,
                gl_buffer,
                ffi::CU_GRAPHICS_REGISTER_FLAGS_NONE,
            )
        };
        check(ret, "cuGraphicsGLRegisterBuffer")?;

        debug!(gl_buffer, "Registered GL buffer for device copy");
        Ok(Self {
            resource,
            lib: Some(lib.clone()),
        })
    }

    /// The raw resource handle.
    pub(crate) fn resource(&self) -> ffi::CUgraphicsResource {
        self.resource
    }

    /// A binding with no driver registration behind it. Lets unit tests
    /// exercise the caching logic without a GPU.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            resource: std::ptr::null_mut(),
            lib: None,
        }
    }
}

impl Drop for GraphicsResourceBinding {
    fn drop(&mut self) {
        if let Some(lib) = &self.lib {
            // SAFETY: resource came from a successful register call and is
            // unmapped by the time the owning plane object is destroyed.
            let ret = unsafe { (lib.fns.cuGraphicsUnregisterResource)(self.resource) };
            if ret != ffi::CUDA_SUCCESS {
                warn!(ret, "cuGraphicsUnregisterResource failed");
            }
        }
    }
}

impl std::fmt::Debug for GraphicsResourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsResourceBinding")
            .field("registered", &self.lib.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Plane objects
// ---------------------------------------------------------------------------

/// One plane of an interop frame: a GL buffer object plus its lazily
/// created registration and host/device content flags.
///
/// The CPU-visible staging mirrors the buffer object's host mapping; it is
/// what the engine copies against when the interop path is unavailable and
/// the transfer degrades to host access.
#[derive(Debug)]
pub struct GlBufferPlane {
    /// GL buffer object name.
    id: u32,
    /// CPU-visible shadow of the buffer object.
    staging: Vec<u8>,
    /// Registration cache; set on first interop transfer, dropped with us.
    binding: OnceLock<GraphicsResourceBinding>,
    /// Texture holds newer content than the buffer object.
    texture_dirty: AtomicBool,
    /// Buffer object holds newer content than the texture.
    buffer_dirty: AtomicBool,
}

impl GlBufferPlane {
    /// Wrap GL buffer object `id` of `size` bytes.
    pub fn new(id: u32, size: usize) -> Self {
        Self {
            id,
            staging: vec![0u8; size],
            binding: OnceLock::new(),
            texture_dirty: AtomicBool::new(false),
            buffer_dirty: AtomicBool::new(false),
        }
    }

    /// GL buffer object name.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Size of the buffer object in bytes.
    pub fn size(&self) -> usize {
        self.staging.len()
    }

    /// CPU-visible content.
    pub fn staging(&self) -> &[u8] {
        &self.staging
    }

    /// Mutable CPU-visible content.
    pub fn staging_mut(&mut self) -> &mut [u8] {
        &mut self.staging
    }

    /// Whether this plane has been registered for device copy.
    pub fn is_registered(&self) -> bool {
        self.binding.get().is_some()
    }

    /// Get the registration, creating it on first use. The same binding is
    /// reused for every later transfer of this plane.
    pub(crate) fn ensure_binding(
        &self,
        create: impl FnOnce() -> TransferResult<GraphicsResourceBinding>,
    ) -> TransferResult<&GraphicsResourceBinding> {
        if let Some(binding) = self.binding.get() {
            return Ok(binding);
        }
        let binding = create()?;
        // A plane object is never transferred from two threads at once, so
        // this set cannot race a competing registration.
        let _ = self.binding.set(binding);
        Ok(self.binding.get().expect("binding just stored"))
    }

    /// The cached registration, if one exists.
    pub(crate) fn registered_binding(&self) -> Option<&GraphicsResourceBinding> {
        self.binding.get()
    }

    /// Mark the content flags around a device copy. Reading from GL flushes
    /// pending texture content into the buffer object; writing from the
    /// device leaves the buffer newer than the texture.
    pub fn mark_sync_flags(&self, device_writes: bool) {
        if device_writes {
            self.buffer_dirty.store(true, Ordering::Release);
        } else {
            self.texture_dirty.store(false, Ordering::Release);
        }
    }

    /// Whether the buffer object holds content the texture has not seen.
    pub fn buffer_dirty(&self) -> bool {
        self.buffer_dirty.load(Ordering::Acquire)
    }

    /// Whether the texture holds content the buffer object has not seen.
    pub fn texture_dirty(&self) -> bool {
        self.texture_dirty.load(Ordering::Acquire)
    }

    /// Note that the texture was updated outside the engine.
    pub fn mark_texture_updated(&self) {
        self.texture_dirty.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Worker context
// ---------------------------------------------------------------------------

type WorkerJob = Box<dyn FnOnce() + Send + 'static>;

/// Owns the thread that stands in for the GL context's execution thread.
///
/// All interop driver calls run on this thread; callers submit one unit of
/// work per transfer via [`run`](Self::run) and block on its completion.
pub struct InteropContext {
    lib: Arc<CudaGlLibrary>,
    sender: Option<Sender<WorkerJob>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// One-time interop capability probe; permanent for this context.
    probe: OnceLock<Result<(), String>>,
}

impl std::fmt::Debug for InteropContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteropContext")
            .field("probed", &self.probe.get().is_some())
            .field(
                "capable",
                &self.probe.get().map(|p| p.is_ok()).unwrap_or(false),
            )
            .finish()
    }
}

impl InteropContext {
    /// Load the driver's interop entry points and spawn the worker.
    pub fn new() -> TransferResult<Self> {
        let lib = Arc::new(CudaGlLibrary::load()?);
        Self::with_library(lib)
    }

    /// Build a context around an already loaded driver library.
    pub fn with_library(lib: Arc<CudaGlLibrary>) -> TransferResult<Self> {
        let (sender, receiver) = channel::unbounded::<WorkerJob>();

        let worker = std::thread::Builder::new()
            .name("fl-gl-interop".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .map_err(|e| TransferError::InteropCapability {
                reason: format!("failed to spawn interop worker: {e}"),
            })?;

        info!("Interop worker started");
        Ok(Self {
            lib,
            sender: Some(sender),
            worker: Mutex::new(Some(worker)),
            probe: OnceLock::new(),
        })
    }

    /// The loaded interop function table.
    pub(crate) fn library(&self) -> &Arc<CudaGlLibrary> {
        &self.lib
    }

    /// Execute `f` on the worker thread and block until it returns.
    ///
    /// This is a single call-and-wait round trip, not a queue of pending
    /// work: the submitting thread does nothing until the result arrives.
    pub fn run<R, F>(&self, f: F) -> TransferResult<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        let (tx, rx) = channel::bounded::<R>(1);
        let job = move || {
            let _ = tx.send(f());
        };

        let boxed: Box<dyn FnOnce() + Send + '_> = Box::new(job);
        // SAFETY: we block on rx.recv() below until the job has finished
        // executing, so every borrow captured by `f` outlives its use on
        // the worker thread. The transmute only erases that lifetime.
        let boxed: WorkerJob = unsafe { std::mem::transmute(boxed) };

        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TransferError::InteropCapability {
                reason: "interop worker is shut down".into(),
            })?;
        sender
            .send(boxed)
            .map_err(|_| TransferError::InteropCapability {
                reason: "interop worker is gone".into(),
            })?;

        rx.recv().map_err(|_| TransferError::InteropCapability {
            reason: "interop worker dropped the job".into(),
        })
    }

    /// One-time interop capability probe, executed on the worker thread.
    ///
    /// Enumerates the devices usable by the GL context. The outcome --
    /// success or failure -- is cached permanently for this context; a
    /// failed probe makes every later interop attempt skip straight to its
    /// fallback.
    pub fn ensure_interop(&self) -> TransferResult<()> {
        let outcome = self.probe.get_or_init(|| {
            let lib = self.lib.clone();
            let probed = self.run(move || {
                let mut count = 0u32;
                let mut devices = [0 as ffi::CUdevice; 1];
                // SAFETY: out-pointers are valid and sized per max_devices.
                let ret = unsafe {
                    (lib.fns.cuGLGetDevices)(
                        &mut count,
                        devices.as_mut_ptr(),
                        1,
                        ffi::CU_GL_DEVICE_LIST_ALL,
                    )
                };
                if ret == ffi::CUDA_SUCCESS && count > 0 {
                    Ok(())
                } else {
                    Err(format!("cuGLGetDevices: CUresult {ret}, {count} devices"))
                }
            });
            match probed {
                Ok(inner) => inner,
                Err(e) => Err(e.to_string()),
            }
        });

        outcome
            .clone()
            .map_err(|reason| TransferError::InteropCapability { reason })
    }

    /// Whether the capability probe has run and succeeded.
    pub fn is_interop_capable(&self) -> bool {
        matches!(self.probe.get(), Some(Ok(())))
    }
}

impl Drop for InteropContext {
    fn drop(&mut self) {
        // Close the channel so the worker loop exits, then join it.
        self.sender.take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Interop transfer strategy
// ---------------------------------------------------------------------------

/// Run one interop transfer: exactly one of `input`/`output` is an Interop
/// buffer, the other requires device involvement.
///
/// The entire critical section -- registration, sync-flag marking, map,
/// per-plane copy, unmap -- executes as one unit of work on the worker
/// thread; the calling thread blocks until it completes.
pub(crate) fn transfer_gl(
    ictx: &InteropContext,
    tctx: &TransferContext,
    input: &TransferBuffer,
    output: &mut TransferBuffer,
    gl_is_input: bool,
) -> TransferResult<()> {
    ictx.ensure_interop()?;

    let lib = ictx.library().clone();
    ictx.run(move || transfer_gl_on_worker(&lib, tctx, input, output, gl_is_input))?
}

/// Body of the interop transfer, running on the worker thread.
fn transfer_gl_on_worker(
    lib: &Arc<CudaGlLibrary>,
    tctx: &TransferContext,
    input: &TransferBuffer,
    output: &mut TransferBuffer,
    gl_is_input: bool,
) -> TransferResult<()> {
    // Map the CUDA-side buffer and collect the GL planes.
    let (gl_buf, cuda_planes): (_, MappedPlanes<'_>) = if gl_is_input {
        let TransferBuffer::Interop(gl) = input else {
            return Err(TransferError::Mapping(fl_common::MappingError::MapFailed {
                domain: MemoryDomain::Interop,
                access: "read",
                reason: "input buffer is not an interop buffer".into(),
            }));
        };
        (gl, output.map_write()?)
    } else {
        let TransferBuffer::Interop(gl) = &*output else {
            return Err(TransferError::Mapping(fl_common::MappingError::MapFailed {
                domain: MemoryDomain::Interop,
                access: "write",
                reason: "output buffer is not an interop buffer".into(),
            }));
        };
        (gl, input.map_read()?)
    };

    let layout = gl_buf.layout().clone();
    if layout.plane_count() != cuda_planes.planes().len() {
        return Err(TransferError::GeometryMismatch {
            what: "plane count",
            src: layout.plane_count(),
            dst: cuda_planes.planes().len(),
        });
    }

    let _ctx_guard = tctx.bind_scoped()?;
    let raw_stream = tctx.stream().cu_stream();

    // Register every plane up front (cached for the object's lifetime)
    // and mark its content flags for this direction.
    for plane in gl_buf.planes() {
        plane.ensure_binding(|| GraphicsResourceBinding::register(lib, plane.id()))?;
        plane.mark_sync_flags(!gl_is_input);
    }

    let mut result = Ok(());
    for (i, plane) in gl_buf.planes().iter().enumerate() {
        result = copy_one_gl_plane(lib, &cuda_planes, &layout, plane, i, gl_is_input, raw_stream);
        if result.is_err() {
            break;
        }
    }

    // Synchronize once after all planes, also on the failure path, so no
    // copy is still in flight when the mappings go away.
    let sync = tctx.synchronize();
    result.and(sync)
}

/// Map one registered plane, issue its 2D copy, and unmap it again.
/// Mapping brackets every transfer; only registration is cached.
fn copy_one_gl_plane(
    lib: &Arc<CudaGlLibrary>,
    cuda_planes: &MappedPlanes<'_>,
    layout: &fl_common::FrameLayout,
    plane: &GlBufferPlane,
    index: usize,
    gl_is_input: bool,
    raw_stream: cudarc::driver::sys::CUstream,
) -> TransferResult<()> {
    let binding = plane
        .registered_binding()
        .ok_or_else(|| TransferError::InteropCapability {
            reason: "plane object lost its registration".into(),
        })?;
    let mut resource = binding.resource();
    let ffi_stream = raw_stream as ffi::CUstream;

    let map_flags = if gl_is_input {
        ffi::CU_GRAPHICS_MAP_RESOURCE_FLAGS_READ_ONLY
    } else {
        ffi::CU_GRAPHICS_MAP_RESOURCE_FLAGS_WRITE_DISCARD
    };

    // SAFETY: resource is a live registration; flags/stream are valid.
    let ret = unsafe { (lib.fns.cuGraphicsResourceSetMapFlags)(resource, map_flags) };
    check(ret, "cuGraphicsResourceSetMapFlags")?;

    // SAFETY: as above; count matches the single resource passed.
    let ret = unsafe { (lib.fns.cuGraphicsMapResources)(1, &mut resource, ffi_stream) };
    check(ret, "cuGraphicsMapResources")?;

    let copy_result = (|| {
        let mut dev_ptr: ffi::CUdeviceptr = 0;
        let mut mapped_size: usize = 0;
        // SAFETY: resource was just mapped on this stream.
        let ret = unsafe {
            (lib.fns.cuGraphicsResourceGetMappedPointer)(&mut dev_ptr, &mut mapped_size, resource)
        };
        check(ret, "cuGraphicsResourceGetMappedPointer")?;

        let plane_layout = layout.plane(index);
        let gl_view = PlaneView {
            location: CopyLocation::Device(dev_ptr),
            pitch: plane_layout.stride,
            width_bytes: plane_layout.width_bytes,
            rows: plane_layout.rows,
        };

        let descriptor = if gl_is_input {
            build_descriptors(&[gl_view], &cuda_planes.planes()[index..=index])?
        } else {
            build_descriptors(&cuda_planes.planes()[index..=index], &[gl_view])?
        }
        .remove(0);

        launch_plane_copy(&descriptor, raw_stream)
            .map_err(|reason| TransferError::DeviceCopy {
                plane: index,
                reason,
            })
    })();

    // Unmap regardless of the copy outcome.
    // SAFETY: resource is mapped; unmapping on the same stream.
    let ret = unsafe { (lib.fns.cuGraphicsUnmapResources)(1, &mut resource, ffi_stream) };
    let unmap_result = check(ret, "cuGraphicsUnmapResources");

    copy_result.and(unmap_result)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Plane object / binding cache ─────────────────────────────

    #[test]
    fn plane_starts_unregistered() {
        let plane = GlBufferPlane::new(7, 4096);
        assert!(!plane.is_registered());
        assert_eq!(plane.id(), 7);
        assert_eq!(plane.size(), 4096);
    }

    #[test]
    fn binding_is_created_once_and_reused() {
        let plane = GlBufferPlane::new(3, 64);
        let mut created = 0;

        for _ in 0..3 {
            plane
                .ensure_binding(|| {
                    created += 1;
                    Ok(GraphicsResourceBinding::detached())
                })
                .unwrap();
        }

        assert_eq!(created, 1, "registration must happen exactly once");
        assert!(plane.is_registered());
    }

    #[test]
    fn failed_registration_is_not_cached() {
        let plane = GlBufferPlane::new(3, 64);

        let err = plane.ensure_binding(|| {
            Err(TransferError::InteropCapability {
                reason: "no driver".into(),
            })
        });
        assert!(err.is_err());
        assert!(!plane.is_registered());

        // A later successful registration still goes through.
        plane
            .ensure_binding(|| Ok(GraphicsResourceBinding::detached()))
            .unwrap();
        assert!(plane.is_registered());
    }

    // ── Sync flags ───────────────────────────────────────────────

    #[test]
    fn device_write_marks_buffer_dirty() {
        let plane = GlBufferPlane::new(1, 16);
        plane.mark_sync_flags(true);
        assert!(plane.buffer_dirty());
    }

    #[test]
    fn device_read_clears_texture_dirty() {
        let plane = GlBufferPlane::new(1, 16);
        plane.mark_texture_updated();
        assert!(plane.texture_dirty());

        plane.mark_sync_flags(false);
        assert!(!plane.texture_dirty());
    }

    // ── Worker round trip ────────────────────────────────────────

    #[test]
    fn worker_runs_jobs_and_returns_results() {
        // The worker itself needs no driver; only build one if the driver
        // library is present on this machine.
        let Ok(ictx) = InteropContext::new() else {
            return;
        };

        let out = ictx.run(|| 21 * 2).unwrap();
        assert_eq!(out, 42);

        // Borrowing captures work because run blocks until completion.
        let data = vec![1u8, 2, 3];
        let sum = ictx.run(|| data.iter().map(|&b| b as u32).sum::<u32>()).unwrap();
        assert_eq!(sum, 6);
    }
}
