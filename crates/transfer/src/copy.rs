//! Same-domain and device-path copy strategies.
//!
//! Both strategies are state-free: they map the two buffers, build fresh
//! per-plane descriptors, execute, and release the mappings. The device
//! path issues one async 2D copy per plane on the engine's stream and
//! synchronizes once before returning; a plane failure aborts the
//! remaining planes and leaves the destination contents undefined.

use std::ffi::c_void;

use cudarc::driver::sys;
use tracing::{debug, trace};

use fl_common::{MappingError, TransferError, TransferResult};

use crate::buffer::TransferBuffer;
use crate::context::TransferContext;
use crate::descriptor::{build_descriptors, CopyDescriptor, CopyLocation};

/// Host-to-host planar copy, respecting differing pitches on each side.
///
/// Fails if either side cannot be reached from host code or the
/// geometries disagree.
pub fn copy_system(src: &TransferBuffer, dst: &mut TransferBuffer) -> TransferResult<()> {
    let src_map = src.map_read()?;
    let dst_map = dst.map_write()?;
    let descriptors = build_descriptors(src_map.planes(), dst_map.planes())?;

    for (i, desc) in descriptors.iter().enumerate() {
        let (CopyLocation::Host(src_ptr), CopyLocation::Host(dst_ptr)) = (desc.src, desc.dst)
        else {
            let (domain, access) = if desc.src.is_host() {
                (dst_map.domain(), "write")
            } else {
                (src_map.domain(), "read")
            };
            return Err(MappingError::MapFailed {
                domain,
                access,
                reason: format!("plane {i} is not host-accessible"),
            }
            .into());
        };

        // SAFETY: both pointers come from live mappings whose planes span
        // at least `pitch * rows` bytes; rows never overlap between two
        // distinct buffers, and width_bytes <= both pitches by descriptor
        // construction.
        unsafe {
            for row in 0..desc.rows {
                std::ptr::copy_nonoverlapping(
                    src_ptr.add(row * desc.src_pitch),
                    dst_ptr.add(row * desc.dst_pitch),
                    desc.width_bytes,
                );
            }
        }
    }

    trace!(planes = descriptors.len(), "Host copy complete");
    Ok(())
}

/// Device-path copy: per-plane async strided 2D copies on the engine's
/// stream, synchronized once at the end.
///
/// Used whenever at least one side requires device involvement. On a
/// plane failure the remaining planes are not attempted and the
/// destination must be treated as undefined; already-copied planes are
/// not rolled back.
pub fn copy_device(
    ctx: &TransferContext,
    src: &TransferBuffer,
    dst: &mut TransferBuffer,
) -> TransferResult<()> {
    let src_map = src.map_read()?;
    let dst_map = dst.map_write()?;
    let descriptors = build_descriptors(src_map.planes(), dst_map.planes())?;

    let _ctx_guard = ctx.bind_scoped()?;
    let raw_stream = ctx.stream().cu_stream();

    let mut result = Ok(());
    for (i, desc) in descriptors.iter().enumerate() {
        if let Err(reason) = launch_plane_copy(desc, raw_stream) {
            result = Err(TransferError::DeviceCopy { plane: i, reason });
            break;
        }
    }

    // One synchronization for all planes, also on the failure path so no
    // copy is still in flight when the mappings are released.
    let sync = ctx.synchronize();

    if result.is_ok() && sync.is_ok() {
        debug!(
            planes = descriptors.len(),
            src = %src_map.domain(),
            dst = %dst_map.domain(),
            "Device copy complete"
        );
    }
    result.and(sync)
}

/// Issue one asynchronous 2D strided copy on `stream`.
///
/// Returns the failure reason on error so callers can attach the plane
/// index they were copying.
pub(crate) fn launch_plane_copy(
    desc: &CopyDescriptor,
    stream: sys::CUstream,
) -> Result<(), String> {
    // SAFETY: an all-zero CUDA_MEMCPY2D is the documented baseline; every
    // field the driver reads for our memory types is filled in below.
    let mut params: sys::CUDA_MEMCPY2D = unsafe { std::mem::zeroed() };

    match desc.src {
        CopyLocation::Host(ptr) => {
            params.srcMemoryType = sys::CUmemorytype_enum::CU_MEMORYTYPE_HOST;
            params.srcHost = ptr as *const c_void;
        }
        CopyLocation::Device(ptr) => {
            params.srcMemoryType = sys::CUmemorytype_enum::CU_MEMORYTYPE_DEVICE;
            params.srcDevice = ptr;
        }
        CopyLocation::Unified(ptr) => {
            params.srcMemoryType = sys::CUmemorytype_enum::CU_MEMORYTYPE_UNIFIED;
            params.srcDevice = ptr;
        }
    }
    params.srcPitch = desc.src_pitch;

    match desc.dst {
        CopyLocation::Host(ptr) => {
            params.dstMemoryType = sys::CUmemorytype_enum::CU_MEMORYTYPE_HOST;
            params.dstHost = ptr as *mut c_void;
        }
        CopyLocation::Device(ptr) => {
            params.dstMemoryType = sys::CUmemorytype_enum::CU_MEMORYTYPE_DEVICE;
            params.dstDevice = ptr;
        }
        CopyLocation::Unified(ptr) => {
            params.dstMemoryType = sys::CUmemorytype_enum::CU_MEMORYTYPE_UNIFIED;
            params.dstDevice = ptr;
        }
    }
    params.dstPitch = desc.dst_pitch;

    params.WidthInBytes = desc.width_bytes;
    params.Height = desc.rows;

    // SAFETY: params describes live mappings held by the caller for the
    // duration of the transfer; the stream belongs to the context bound
    // on this thread.
    unsafe { sys::cuMemcpy2DAsync_v2(&params, stream) }
        .result()
        .map_err(|e| e.to_string())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SystemBuffer;
    use crate::surface::SurfaceBuffer;
    use fl_common::{FrameLayout, PixelFormat, Resolution, SurfacePlacement};

    fn nv12_layout() -> FrameLayout {
        FrameLayout::new(PixelFormat::Nv12, Resolution::new(64, 48))
    }

    /// Fill a system buffer's planes with a deterministic pattern, leaving
    /// stride padding untouched.
    fn fill_pattern(buf: &mut SystemBuffer) {
        let layout = buf.layout().clone();
        for (p, plane) in layout.planes().iter().enumerate() {
            for row in 0..plane.rows {
                for col in 0..plane.width_bytes {
                    let v = (p * 31 + row * 7 + col) as u8;
                    buf.data_mut()[plane.offset + row * plane.stride + col] = v;
                }
            }
        }
    }

    /// Assert two buffers hold identical pixels, normalizing pitches.
    fn assert_pixels_equal(a: &SystemBuffer, b: &SystemBuffer) {
        assert!(a.layout().matches_geometry(b.layout()));
        for (pa, pb) in a.layout().planes().iter().zip(b.layout().planes()) {
            for row in 0..pa.rows {
                let ra = &a.data()[pa.offset + row * pa.stride..][..pa.width_bytes];
                let rb = &b.data()[pb.offset + row * pb.stride..][..pb.width_bytes];
                assert_eq!(ra, rb, "row {row} differs");
            }
        }
    }

    // ── Host copy ────────────────────────────────────────────────

    #[test]
    fn host_copy_same_strides() {
        let mut src = SystemBuffer::alloc(nv12_layout());
        fill_pattern(&mut src);
        let src_buf = TransferBuffer::System(src);
        let mut dst_buf = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));

        copy_system(&src_buf, &mut dst_buf).unwrap();

        let (TransferBuffer::System(a), TransferBuffer::System(b)) = (&src_buf, &dst_buf) else {
            unreachable!()
        };
        assert_pixels_equal(a, b);
    }

    #[test]
    fn host_copy_normalizes_differing_pitches() {
        let mut src = SystemBuffer::alloc(nv12_layout());
        fill_pattern(&mut src);
        let src_buf = TransferBuffer::System(src);

        let wide =
            FrameLayout::with_strides(PixelFormat::Nv12, Resolution::new(64, 48), &[128, 96])
                .unwrap();
        let mut dst_buf = TransferBuffer::System(SystemBuffer::alloc(wide));

        copy_system(&src_buf, &mut dst_buf).unwrap();

        let (TransferBuffer::System(a), TransferBuffer::System(b)) = (&src_buf, &dst_buf) else {
            unreachable!()
        };
        assert_pixels_equal(a, b);
    }

    #[test]
    fn host_copy_into_host_pinned_surface() {
        let mut src = SystemBuffer::alloc(nv12_layout());
        fill_pattern(&mut src);
        let src_buf = TransferBuffer::System(src);
        let mut dst_buf = TransferBuffer::Surface(SurfaceBuffer::host_backed(nv12_layout()));

        copy_system(&src_buf, &mut dst_buf).unwrap();

        let TransferBuffer::Surface(surface) = &dst_buf else {
            unreachable!()
        };
        let TransferBuffer::System(sys) = &src_buf else {
            unreachable!()
        };
        // Both sides used the tight layout, so the raw bytes line up.
        assert_eq!(surface.host_data().unwrap(), sys.data());
    }

    #[test]
    fn host_copy_rejects_geometry_mismatch() {
        let src_buf = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let mut dst_buf = TransferBuffer::System(SystemBuffer::alloc(FrameLayout::new(
            PixelFormat::Nv12,
            Resolution::new(128, 96),
        )));

        let err = copy_system(&src_buf, &mut dst_buf).unwrap_err();
        assert!(matches!(err, TransferError::GeometryMismatch { .. }));
    }

    #[test]
    fn host_copy_rejects_device_placed_surface() {
        let src_buf = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let mut dst_buf = TransferBuffer::Surface(SurfaceBuffer::host_backed_with_placement(
            nv12_layout(),
            SurfacePlacement::Device,
        ));

        let err = copy_system(&src_buf, &mut dst_buf).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Mapping(MappingError::MapFailed { .. })
        ));
    }

    // ── Device copy (hardware required) ──────────────────────────

    #[test]
    #[ignore = "requires an NVIDIA GPU"]
    fn device_copy_roundtrip_system_device_system() {
        use crate::memory::DeviceFrameBuffer;

        let ctx = TransferContext::new(0).unwrap();
        let layout = nv12_layout();

        let mut src = SystemBuffer::alloc(layout.clone());
        fill_pattern(&mut src);
        let src_buf = TransferBuffer::System(src);

        let mut dev_buf = TransferBuffer::Device(
            DeviceFrameBuffer::alloc(ctx.stream(), layout.clone()).unwrap(),
        );
        copy_device(&ctx, &src_buf, &mut dev_buf).unwrap();

        let mut back_buf = TransferBuffer::System(SystemBuffer::alloc(layout));
        copy_device(&ctx, &dev_buf, &mut back_buf).unwrap();

        let (TransferBuffer::System(a), TransferBuffer::System(b)) = (&src_buf, &back_buf) else {
            unreachable!()
        };
        assert_pixels_equal(a, b);
    }
}
