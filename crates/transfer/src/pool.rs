//! Buffer pools, negotiated per output domain.
//!
//! Pool negotiation follows the validate-or-replace rule: a proposed pool
//! is reused only when it already targets the matching device/context
//! identity and frame geometry; surface pools are always rebuilt so their
//! domain-specific configuration (placement hint, device index, batch
//! size) can be applied. Replacement happens only at format-change
//! boundaries, never while transfers are in flight.

use std::sync::Arc;

use cudarc::driver::safe::CudaStream;
use tracing::debug;

use fl_common::{
    FrameLayout, MemoryDomain, NegotiationError, SurfacePoolConfig, TransferResult,
};

use crate::buffer::SystemBuffer;
use crate::context::TransferContext;
use crate::memory::DeviceFrameBuffer;
use crate::surface::SurfaceHeader;

/// Final pool parameters reported back to the proposing peer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoolDecision {
    /// Per-buffer byte size.
    pub buffer_size: usize,
    /// Minimum buffers kept alive (0 = none reserved).
    pub min_buffers: u32,
    /// Maximum buffers allowed (0 = unlimited).
    pub max_buffers: u32,
}

/// Idle buffers a pool keeps for reuse before freeing excess ones.
const MAX_IDLE: usize = 4;

/// Pool of device frame buffers on one CUDA context.
#[derive(Debug)]
pub struct DeviceBufferPool {
    ordinal: usize,
    stream: Arc<CudaStream>,
    layout: FrameLayout,
    free: Vec<DeviceFrameBuffer>,
}

impl DeviceBufferPool {
    pub fn new(ctx: &TransferContext, layout: FrameLayout) -> Self {
        Self {
            ordinal: ctx.ordinal(),
            stream: ctx.stream().clone(),
            layout,
            free: Vec::new(),
        }
    }

    /// Device ordinal this pool allocates on (its context identity).
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Buffers currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.free.len()
    }

    /// Take an idle buffer or allocate a fresh one.
    pub fn acquire(&mut self) -> TransferResult<DeviceFrameBuffer> {
        if let Some(buf) = self.free.pop() {
            return Ok(buf);
        }
        DeviceFrameBuffer::alloc(&self.stream, self.layout.clone())
    }

    /// Return a buffer. Buffers of foreign geometry or beyond the idle
    /// cap are dropped (freed) instead.
    pub fn release(&mut self, buf: DeviceFrameBuffer) {
        if self.free.len() < MAX_IDLE && buf.layout() == &self.layout {
            self.free.push(buf);
        }
    }
}

/// Configuration record for a platform surface pool.
///
/// The surface allocator itself lives in the platform runtime; the engine
/// only fixes the per-buffer byte size (the surface header) and the
/// domain-specific options the allocator needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfacePool {
    config: SurfacePoolConfig,
    layout: FrameLayout,
}

impl SurfacePool {
    pub fn new(config: SurfacePoolConfig, layout: FrameLayout) -> Result<Self, NegotiationError> {
        if config.batch_size == 0 {
            return Err(NegotiationError::PoolRejected(
                "surface batch size must be at least 1".into(),
            ));
        }
        Ok(Self { config, layout })
    }

    pub fn config(&self) -> &SurfacePoolConfig {
        &self.config
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Per-buffer size: one surface header, regardless of frame size.
    pub fn buffer_size(&self) -> usize {
        std::mem::size_of::<SurfaceHeader>()
    }
}

/// Pool of host frame buffers.
#[derive(Debug)]
pub struct SystemBufferPool {
    layout: FrameLayout,
    free: Vec<Vec<u8>>,
}

impl SystemBufferPool {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            free: Vec::new(),
        }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn idle_count(&self) -> usize {
        self.free.len()
    }

    pub fn acquire(&mut self) -> SystemBuffer {
        match self.free.pop() {
            Some(mut data) => {
                data.fill(0);
                SystemBuffer::from_vec(data, self.layout.clone())
                    .unwrap_or_else(|| SystemBuffer::alloc(self.layout.clone()))
            }
            None => SystemBuffer::alloc(self.layout.clone()),
        }
    }

    pub fn release(&mut self, buf: SystemBuffer) {
        if self.free.len() < MAX_IDLE && buf.layout() == &self.layout {
            self.free.push(buf.into_data());
        }
    }
}

/// A negotiated pool for the contract's output domain.
#[derive(Debug)]
pub enum NegotiatedPool {
    Device(DeviceBufferPool),
    Surface(SurfacePool),
    System(SystemBufferPool),
}

impl NegotiatedPool {
    pub fn domain(&self) -> MemoryDomain {
        match self {
            Self::Device(_) => MemoryDomain::Device,
            Self::Surface(_) => MemoryDomain::Surface,
            Self::System(_) => MemoryDomain::System,
        }
    }
}

/// Validate a proposed pool for `domain` or replace it with a new one.
///
/// Reuse rules:
/// - a Device pool is reused only when it targets the same device ordinal
///   and frame geometry as the new contract;
/// - a Surface pool is always rebuilt so its config options are applied;
/// - a System pool is reused when the geometry matches;
/// - Interop buffers are allocated by the GL stack, never pooled here.
pub fn decide_pool(
    ctx: &TransferContext,
    domain: MemoryDomain,
    layout: &FrameLayout,
    surface_config: &SurfacePoolConfig,
    proposed: Option<NegotiatedPool>,
) -> Result<(NegotiatedPool, PoolDecision), NegotiationError> {
    let pool = match domain {
        MemoryDomain::Device => match proposed {
            Some(NegotiatedPool::Device(pool))
                if pool.ordinal() == ctx.ordinal() && pool.layout() == layout =>
            {
                debug!(ordinal = pool.ordinal(), "Reusing device pool");
                NegotiatedPool::Device(pool)
            }
            _ => {
                debug!(ordinal = ctx.ordinal(), "Creating device pool");
                NegotiatedPool::Device(DeviceBufferPool::new(ctx, layout.clone()))
            }
        },

        MemoryDomain::Surface => {
            // Always rebuild so placement/device/batch options take hold.
            debug!(device = surface_config.device, "Creating surface pool");
            NegotiatedPool::Surface(SurfacePool::new(*surface_config, layout.clone())?)
        }

        MemoryDomain::System => match proposed {
            Some(NegotiatedPool::System(pool)) if pool.layout() == layout => {
                debug!("Reusing system pool");
                NegotiatedPool::System(pool)
            }
            _ => {
                debug!("Creating system pool");
                NegotiatedPool::System(SystemBufferPool::new(layout.clone()))
            }
        },

        MemoryDomain::Interop => {
            return Err(NegotiationError::PoolRejected(
                "interop buffers are allocated by the GL stack".into(),
            ));
        }
    };

    let decision = match &pool {
        NegotiatedPool::Surface(p) => PoolDecision {
            buffer_size: p.buffer_size(),
            min_buffers: 0,
            max_buffers: p.config().batch_size.max(1),
        },
        _ => PoolDecision {
            buffer_size: layout.byte_size(),
            min_buffers: 0,
            max_buffers: 0,
        },
    };

    Ok((pool, decision))
}

// ── Tests ────────────────────────────────────────────────────────────
