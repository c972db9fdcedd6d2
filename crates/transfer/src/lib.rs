//! `fl-transfer` -- Zero-copy cross-domain video buffer transfers.
//!
//! Relocates video frames between four memory domains -- host system
//! memory, CUDA device memory, platform hardware surfaces, and GL-interop
//! buffer objects -- with per-plane strided copies, capability
//! negotiation, and layered fallback when a fast path fails at runtime.
//!
//! # Architecture
//!
//! - [`engine::TransferEngine`] is the entry point: one instance per
//!   direction ([`TransferEngine::uploader`] / [`TransferEngine::downloader`]),
//!   negotiated once per format via [`TransferEngine::set_format`], then
//!   invoked once per buffer pair via [`TransferEngine::transfer`].
//! - [`buffer`] tags storage with its [`MemoryDomain`] and classifies it.
//! - [`descriptor`] maps buffers and builds fresh per-plane 2D copy
//!   descriptions for every attempt.
//! - [`copy`] holds the host and device copy strategies.
//! - [`interop`] runs GL-side transfers on the context's worker thread,
//!   with registration cached per buffer object.
//! - [`negotiate`] / [`pool`] advertise domain sets and validate or
//!   replace buffer pools during format changes.
//! - [`context`] wraps the CUDA context/stream and the scoped
//!   current-context guard.
//!
//! # Example
//!
//! ```ignore
//! use fl_common::{EngineConfig, FrameLayout, MemoryDomain, PixelFormat, Resolution};
//! use fl_transfer::{SystemBuffer, TransferBuffer, TransferEngine};
//!
//! let mut engine = TransferEngine::uploader(EngineConfig::default())?;
//! let layout = FrameLayout::new(PixelFormat::Nv12, Resolution::HD);
//! engine.set_format(layout.clone(), MemoryDomain::Device)?;
//!
//! let frame = TransferBuffer::System(SystemBuffer::alloc(layout));
//! let Some(NegotiatedPool::Device(pool)) = engine.pool_mut() else {
//!     unreachable!("contract negotiated a device pool");
//! };
//! let mut out = TransferBuffer::Device(pool.acquire()?);
//! engine.transfer(&frame, &mut out)?;
//! ```

pub mod buffer;
pub mod context;
pub mod copy;
pub mod descriptor;
pub mod engine;
pub mod interop;
pub mod memory;
pub mod negotiate;
pub mod pool;
pub mod surface;

// Re-export the public surface at crate root
pub use buffer::{classify, InteropBuffer, SystemBuffer, TransferBuffer};
pub use context::{ScopedContext, TransferContext};
pub use descriptor::{build_descriptors, CopyDescriptor, CopyLocation, MappedPlanes, PlaneView};
pub use engine::{plan, DomainContract, Strategy, TransferEngine, TransferPlan};
pub use interop::{GlBufferPlane, GraphicsResourceBinding, InteropContext};
pub use memory::DeviceFrameBuffer;
pub use negotiate::{accepted_domains, DomainSupport, Side, TransferDirection};
pub use pool::{DeviceBufferPool, NegotiatedPool, PoolDecision, SurfacePool, SystemBufferPool};
pub use surface::{surface_runtime_available, SurfaceBuffer, SurfaceHeader};

pub use fl_common::MemoryDomain;
