//! Capability negotiation: which memory domains each pad side may use.
//!
//! The engine comes in two directions distinguished only by which side
//! prefers device-like domains. For a given side the negotiator returns
//! the acceptable domain set in priority order (device-native first,
//! system last); the peer picks the first entry it can satisfy. The set
//! only includes domains whose runtime support has actually been probed:
//! the surface runtime once per process, the interop context once per
//! context.

use tracing::debug;

use fl_common::{EngineConfig, MemoryDomain};

use crate::interop::InteropContext;
use crate::surface::surface_runtime_available;

/// Transfer direction of an engine instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    /// System-like input, device-like output.
    Upload,
    /// Device-like input, system-like output.
    Download,
}

/// Which pad of the engine a domain set is being negotiated for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

/// Probed availability of the optional domains.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainSupport {
    /// Surface runtime initialized (process-wide, permanent).
    pub surface: bool,
    /// Interop context obtained and its capability probe succeeded.
    pub interop: bool,
}

impl DomainSupport {
    /// Probe the optional domains for an engine configuration.
    pub fn detect(config: &EngineConfig, interop: Option<&InteropContext>) -> Self {
        let surface = config.enable_surface && surface_runtime_available();
        let interop = config.enable_interop
            && interop.map(|ctx| ctx.ensure_interop().is_ok()).unwrap_or(false);

        debug!(surface, interop, "Detected domain support");
        Self { surface, interop }
    }

    /// Everything available (for negotiation-logic tests).
    pub fn full() -> Self {
        Self {
            surface: true,
            interop: true,
        }
    }
}

/// Acceptable domains for one side, broadest/fastest first.
///
/// Device is always offered, Surface only with the surface runtime,
/// Interop only on the system-like side of the element and only with a
/// capable interop context, System always as the universal fallback.
pub fn accepted_domains(
    direction: TransferDirection,
    side: Side,
    support: DomainSupport,
) -> Vec<MemoryDomain> {
    // Interop buffers appear where system-memory buffers do: upstream of
    // an upload, downstream of a download.
    let system_like = matches!(
        (direction, side),
        (TransferDirection::Upload, Side::Input) | (TransferDirection::Download, Side::Output)
    );

    let mut domains = vec![MemoryDomain::Device];
    if support.surface {
        domains.push(MemoryDomain::Surface);
    }
    if system_like && support.interop {
        domains.push(MemoryDomain::Interop);
    }
    domains.push(MemoryDomain::System);
    domains
}

// ── Tests ────────────────────────────────────────────────────────────
