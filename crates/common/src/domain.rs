//! Memory domains a video buffer can occupy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The memory/address space a buffer's pixel data currently lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryDomain {
    /// Plain host (CPU) memory.
    System,
    /// CUDA device memory (linear allocation).
    Device,
    /// Platform hardware surface (opaque descriptor, device-managed).
    Surface,
    /// GL buffer objects registered into CUDA on demand.
    Interop,
}

impl MemoryDomain {
    /// Whether a copy touching this domain must go through the device
    /// copy engine. Interop buffers do not by themselves force a device
    /// copy; they only join one when the other side requires it.
    pub fn requires_device_copy(self) -> bool {
        matches!(self, Self::Device | Self::Surface)
    }
}

impl fmt::Display for MemoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "SYSTEM",
            Self::Device => "DEVICE",
            Self::Surface => "SURFACE",
            Self::Interop => "INTEROP",
        };
        write!(f, "{name}")
    }
}

/// Where a hardware surface's pixel data actually resides.
///
/// Matches the placement field of the fixed surface header layout; values
/// outside this set are a mapping failure, not a fallback trigger.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfacePlacement {
    /// Device-resident allocation.
    #[default]
    Device,
    /// Page-locked host memory, device-addressable.
    HostPinned,
    /// Unified (managed) memory visible to both sides.
    Unified,
}

impl SurfacePlacement {
    /// Raw header encoding of this placement.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Device => 0,
            Self::HostPinned => 1,
            Self::Unified => 2,
        }
    }

    /// Decode a raw header placement value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Device),
            1 => Some(Self::HostPinned),
            2 => Some(Self::Unified),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_involvement() {
        assert!(MemoryDomain::Device.requires_device_copy());
        assert!(MemoryDomain::Surface.requires_device_copy());
        assert!(!MemoryDomain::System.requires_device_copy());
        assert!(!MemoryDomain::Interop.requires_device_copy());
    }

    #[test]
    fn placement_raw_roundtrip() {
        for p in [
            SurfacePlacement::Device,
            SurfacePlacement::HostPinned,
            SurfacePlacement::Unified,
        ] {
            assert_eq!(SurfacePlacement::from_raw(p.as_raw()), Some(p));
        }
        assert_eq!(SurfacePlacement::from_raw(7), None);
    }

    #[test]
    fn domain_display() {
        assert_eq!(MemoryDomain::System.to_string(), "SYSTEM");
        assert_eq!(MemoryDomain::Interop.to_string(), "INTEROP");
    }
}
