//! `fl-common` -- Shared types and errors for the framelift transfer engine.
//!
//! This crate is the foundation the transfer crate depends on. It defines
//! the core abstractions:
//!
//! - **Types**: `Resolution`, `Rect` (newtypes for safety)
//! - **Color**: `PixelFormat` with per-plane geometry queries
//! - **Frame**: `FrameLayout` / `PlaneLayout` (plane-by-plane copy geometry)
//! - **Domain**: `MemoryDomain`, `SurfacePlacement` (where pixel data lives)
//! - **Errors**: `TransferError`, `NegotiationError`, `MappingError`
//!   (thiserror-based)
//! - **Config**: `EngineConfig`, `SurfacePoolConfig`
//! - **Sink**: `FrameSink` (downstream presentation collaborator surface)

pub mod color;
pub mod config;
pub mod domain;
pub mod error;
pub mod frame;
pub mod sink;
pub mod types;

// Re-export commonly used items at crate root
pub use color::PixelFormat;
pub use config::{EngineConfig, SurfacePoolConfig};
pub use domain::{MemoryDomain, SurfacePlacement};
pub use error::{MappingError, NegotiationError, TransferError, TransferResult};
pub use frame::{FrameLayout, PlaneLayout, MAX_PLANES};
pub use sink::{FrameSink, Rect};
pub use types::Resolution;
