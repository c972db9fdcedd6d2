//! Raw FFI bindings for the CUDA driver's GL-interop entry points.
//!
//! cudarc binds the core driver API but not the GL-interop surface
//! (`cuGL*` / `cuGraphics*` registration), so those functions are loaded
//! dynamically at runtime via `libloading` from the driver library itself.
//!
//! Reference: CUDA driver API -- `cudaGL.h` / `cuda.h`.

use std::ffi::c_void;
use std::path::Path;

use libloading::Library;
use tracing::info;

use fl_common::{TransferError, TransferResult};

// ---------------------------------------------------------------------------
// Driver types we reference
// ---------------------------------------------------------------------------

/// CUDA driver status code.
pub type CUresult = i32;

/// Success return code.
pub const CUDA_SUCCESS: CUresult = 0;

/// CUDA device ordinal handle.
pub type CUdevice = i32;

/// CUDA device pointer (GPU virtual address).
pub type CUdeviceptr = u64;

/// Opaque graphics-interop resource handle.
pub type CUgraphicsResource = *mut c_void;

/// Opaque stream handle.
pub type CUstream = *mut c_void;

/// `CU_GL_DEVICE_LIST_ALL` -- enumerate every device usable by the
/// current GL context.
pub const CU_GL_DEVICE_LIST_ALL: u32 = 1;

/// `CU_GRAPHICS_REGISTER_FLAGS_NONE`.
pub const CU_GRAPHICS_REGISTER_FLAGS_NONE: u32 = 0;

/// `CU_GRAPHICS_MAP_RESOURCE_FLAGS_READ_ONLY`.
pub const CU_GRAPHICS_MAP_RESOURCE_FLAGS_READ_ONLY: u32 = 1;

/// `CU_GRAPHICS_MAP_RESOURCE_FLAGS_WRITE_DISCARD`.
pub const CU_GRAPHICS_MAP_RESOURCE_FLAGS_WRITE_DISCARD: u32 = 2;

// ---------------------------------------------------------------------------
// Function table
// ---------------------------------------------------------------------------

/// GL-interop driver functions, loaded by name.
#[allow(non_snake_case)]
pub struct GlInteropFns {
    /// Enumerate CUDA devices compatible with the current GL context.
    pub cuGLGetDevices: unsafe extern "C" fn(
        device_count: *mut u32,
        devices: *mut CUdevice,
        max_devices: u32,
        device_list: u32,
    ) -> CUresult,

    /// Register a GL buffer object for CUDA access.
    pub cuGraphicsGLRegisterBuffer: unsafe extern "C" fn(
        resource: *mut CUgraphicsResource,
        gl_buffer: u32,
        flags: u32,
    ) -> CUresult,

    /// Release a registration.
    pub cuGraphicsUnregisterResource:
        unsafe extern "C" fn(resource: CUgraphicsResource) -> CUresult,

    /// Set access intent before mapping.
    pub cuGraphicsResourceSetMapFlags:
        unsafe extern "C" fn(resource: CUgraphicsResource, flags: u32) -> CUresult,

    /// Map registered resources for device access.
    pub cuGraphicsMapResources: unsafe extern "C" fn(
        count: u32,
        resources: *mut CUgraphicsResource,
        stream: CUstream,
    ) -> CUresult,

    /// Unmap previously mapped resources.
    pub cuGraphicsUnmapResources: unsafe extern "C" fn(
        count: u32,
        resources: *mut CUgraphicsResource,
        stream: CUstream,
    ) -> CUresult,

    /// Obtain the device pointer backing a mapped resource.
    pub cuGraphicsResourceGetMappedPointer: unsafe extern "C" fn(
        dev_ptr: *mut CUdeviceptr,
        size: *mut usize,
        resource: CUgraphicsResource,
    ) -> CUresult,
}

// SAFETY: the function pointers reference GPU driver entry points, which
// are callable from any thread. The Library handle that keeps them valid
// is stored alongside the table.
unsafe impl Send for GlInteropFns {}
unsafe impl Sync for GlInteropFns {}

impl std::fmt::Debug for GlInteropFns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlInteropFns").field("loaded", &true).finish()
    }
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

/// Dynamically loaded CUDA driver library restricted to the GL-interop
/// function table.
pub struct CudaGlLibrary {
    /// The loaded library handle -- must live as long as we use any symbol.
    _lib: Library,
    /// GL-interop function pointers.
    pub fns: GlInteropFns,
}

// SAFETY: see `GlInteropFns`; the Library keeps the driver loaded.
unsafe impl Send for CudaGlLibrary {}
unsafe impl Sync for CudaGlLibrary {}

impl std::fmt::Debug for CudaGlLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaGlLibrary").field("loaded", &true).finish()
    }
}

impl CudaGlLibrary {
    /// Load the driver library from the default system path.
    pub fn load() -> TransferResult<Self> {
        let lib_name = Self::library_name();
        info!(library = %lib_name, "Loading CUDA GL-interop entry points");

        // SAFETY: loading the system CUDA driver library, whose
        // constructors only register driver state.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            TransferError::InteropCapability {
                reason: format!("failed to load {lib_name}: {e}"),
            }
        })?;

        Self::load_functions(lib)
    }

    /// Load from a specific path (testing or non-standard installs).
    pub fn load_from(path: &Path) -> TransferResult<Self> {
        // SAFETY: loading a user-specified driver library; the caller
        // asserts it is a CUDA driver build.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            TransferError::InteropCapability {
                reason: format!("failed to load {}: {e}", path.display()),
            }
        })?;

        Self::load_functions(lib)
    }

    fn library_name() -> &'static str {
        if cfg!(windows) {
            "nvcuda.dll"
        } else {
            "libcuda.so.1"
        }
    }

    /// Resolve one symbol, preferring the `_v2` export where the driver
    /// provides one.
    ///
    /// # Safety
    ///
    /// `T` must match the C signature of the named function.
    unsafe fn symbol<T: Copy>(lib: &Library, names: &[&[u8]]) -> TransferResult<T> {
        for name in names {
            if let Ok(sym) = lib.get::<T>(name) {
                return Ok(*sym);
            }
        }
        let shown = String::from_utf8_lossy(names[0]);
        Err(TransferError::InteropCapability {
            reason: format!("driver is missing symbol {}", shown.trim_end_matches('\0')),
        })
    }

    fn load_functions(lib: Library) -> TransferResult<Self> {
        // SAFETY: all lookups below are for well-known CUDA driver API
        // functions and the declared signatures match the official headers.
        let fns = unsafe {
            GlInteropFns {
                cuGLGetDevices: Self::symbol(
                    &lib,
                    &[b"cuGLGetDevices_v2\0", b"cuGLGetDevices\0"],
                )?,
                cuGraphicsGLRegisterBuffer: Self::symbol(
                    &lib,
                    &[b"cuGraphicsGLRegisterBuffer\0"],
                )?,
                cuGraphicsUnregisterResource: Self::symbol(
                    &lib,
                    &[b"cuGraphicsUnregisterResource\0"],
                )?,
                cuGraphicsResourceSetMapFlags: Self::symbol(
                    &lib,
                    &[
                        b"cuGraphicsResourceSetMapFlags_v2\0",
                        b"cuGraphicsResourceSetMapFlags\0",
                    ],
                )?,
                cuGraphicsMapResources: Self::symbol(&lib, &[b"cuGraphicsMapResources\0"])?,
                cuGraphicsUnmapResources: Self::symbol(&lib, &[b"cuGraphicsUnmapResources\0"])?,
                cuGraphicsResourceGetMappedPointer: Self::symbol(
                    &lib,
                    &[
                        b"cuGraphicsResourceGetMappedPointer_v2\0",
                        b"cuGraphicsResourceGetMappedPointer\0",
                    ],
                )?,
            }
        };

        Ok(Self { _lib: lib, fns })
    }
}

/// Map a raw driver status to the engine error type.
pub(crate) fn check(ret: CUresult, what: &'static str) -> TransferResult<()> {
    if ret == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(TransferError::Driver(format!("{what} failed: CUresult {ret}")))
    }
}
