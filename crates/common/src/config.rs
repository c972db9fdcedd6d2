//! Configuration structs for the transfer engine.

use serde::{Deserialize, Serialize};

use crate::domain::SurfacePlacement;

/// Top-level engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// CUDA device ordinal to run transfers on.
    pub device_ordinal: usize,
    /// Offer the platform hardware-surface domain during negotiation.
    pub enable_surface: bool,
    /// Offer the GL-interop domain during negotiation.
    pub enable_interop: bool,
    /// Pool parameters for hardware-surface pools.
    pub surface_pool: SurfacePoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_ordinal: 0,
            enable_surface: true,
            enable_interop: true,
            surface_pool: SurfacePoolConfig::default(),
        }
    }
}

/// Domain-specific configuration applied to hardware-surface pools.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacePoolConfig {
    /// Placement hint for surface allocations.
    pub placement: SurfacePlacement,
    /// Device index the surfaces are created on.
    pub device: u32,
    /// Surfaces per batch; transfers always use single-frame batches.
    pub batch_size: u32,
}

impl Default for SurfacePoolConfig {
    fn default() -> Self {
        Self {
            placement: SurfacePlacement::Device,
            device: 0,
            batch_size: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_first_device() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.device_ordinal, 0);
        assert!(cfg.enable_surface);
        assert!(cfg.enable_interop);
        assert_eq!(cfg.surface_pool.batch_size, 1);
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = EngineConfig {
            device_ordinal: 1,
            enable_surface: false,
            enable_interop: true,
            surface_pool: SurfacePoolConfig {
                placement: SurfacePlacement::HostPinned,
                device: 1,
                batch_size: 4,
            },
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device_ordinal, 1);
        assert_eq!(back.surface_pool.placement, SurfacePlacement::HostPinned);
    }
}
