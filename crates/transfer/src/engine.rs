//! Transfer orchestrator: classify, select a strategy, fall back.
//!
//! One engine instance covers one direction (upload or download); the two
//! differ only in which domains each pad side advertises. Per transfer the
//! engine classifies both buffers, picks a strategy for the domain pair,
//! and retries once on a lower tier where the policy permits:
//!
//! - fast path: interop copy on the GL worker, or a device 2D copy
//! - degraded device path: interop side host-degraded, device copy
//! - host fallback: pitch-aware planar copy
//!
//! Hardware surfaces are opaque to host code, so when either side is a
//! surface a failed device path is terminal; falling back would silently
//! corrupt output instead of relocating it.

use tracing::{debug, info, warn};

use fl_common::{
    EngineConfig, FrameLayout, MemoryDomain, NegotiationError, TransferError, TransferResult,
};

use crate::buffer::{classify, TransferBuffer};
use crate::context::TransferContext;
use crate::copy::{copy_device, copy_system};
use crate::interop::{transfer_gl, InteropContext};
use crate::negotiate::{accepted_domains, DomainSupport, Side, TransferDirection};
use crate::pool::{decide_pool, NegotiatedPool, PoolDecision};

/// A transfer strategy the orchestrator can run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Host-to-host planar copy.
    System,
    /// Per-plane 2D copies on the device stream.
    Device,
    /// Copy through the GL worker against registered buffer objects.
    Interop,
}

/// Primary strategy plus the one permitted retry for a domain pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferPlan {
    pub primary: Strategy,
    pub fallback: Option<Strategy>,
}

/// Decide the strategy ladder for a classified domain pair.
///
/// Pure function of the two domains; every reachable pair terminates in
/// at most two strategy runs.
pub fn plan(input: MemoryDomain, output: MemoryDomain) -> TransferPlan {
    use MemoryDomain::*;

    let device_involved = input.requires_device_copy() || output.requires_device_copy();
    if !device_involved {
        // Also covers interop pairs without a device side: their host
        // staging is directly copyable.
        return TransferPlan {
            primary: Strategy::System,
            fallback: None,
        };
    }

    if input == Interop || output == Interop {
        let other = if input == Interop { output } else { input };
        // No software fallback exists for opaque surfaces; degrade the
        // interop side and stay on the device path instead.
        let fallback = if other == Surface {
            Strategy::Device
        } else {
            Strategy::System
        };
        return TransferPlan {
            primary: Strategy::Interop,
            fallback: Some(fallback),
        };
    }

    if input == Surface || output == Surface {
        TransferPlan {
            primary: Strategy::Device,
            fallback: None,
        }
    } else {
        TransferPlan {
            primary: Strategy::Device,
            fallback: Some(Strategy::System),
        }
    }
}

/// The negotiated domain contract an engine operates under, fixed per
/// format change and reused for every transfer until renegotiation.
#[derive(Debug)]
pub struct DomainContract {
    /// Frame geometry both sides must present.
    pub layout: FrameLayout,
    /// Domains acceptable on the input side, in priority order.
    pub input_domains: Vec<MemoryDomain>,
    /// Domains acceptable on the output side, in priority order.
    pub output_domains: Vec<MemoryDomain>,
    /// Domain the output pool serves.
    pub output_domain: MemoryDomain,
    /// Final pool parameters.
    pub pool_decision: PoolDecision,
}

/// Cross-domain transfer engine; see the module docs for the policy.
#[derive(Debug)]
pub struct TransferEngine {
    ctx: TransferContext,
    direction: TransferDirection,
    config: EngineConfig,
    interop: Option<InteropContext>,
    support: DomainSupport,
    pool: Option<NegotiatedPool>,
    contract: Option<DomainContract>,
}

impl TransferEngine {
    /// Engine preferring device-like domains on its output.
    pub fn uploader(config: EngineConfig) -> TransferResult<Self> {
        Self::new(config, TransferDirection::Upload)
    }

    /// Engine preferring system memory on its output.
    pub fn downloader(config: EngineConfig) -> TransferResult<Self> {
        Self::new(config, TransferDirection::Download)
    }

    fn new(config: EngineConfig, direction: TransferDirection) -> TransferResult<Self> {
        let ctx = TransferContext::new(config.device_ordinal)?;

        let interop = if config.enable_interop {
            match InteropContext::new() {
                Ok(ictx) => Some(ictx),
                Err(e) => {
                    warn!(error = %e, "Interop unavailable; domain disabled");
                    None
                }
            }
        } else {
            None
        };

        let support = DomainSupport::detect(&config, interop.as_ref());
        info!(
            device = ctx.device_name(),
            ?direction,
            surface = support.surface,
            interop = support.interop,
            "Transfer engine ready"
        );

        Ok(Self {
            ctx,
            direction,
            config,
            interop,
            support,
            pool: None,
            contract: None,
        })
    }

    /// Transfer direction of this engine.
    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// The CUDA context and stream transfers run on.
    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Probed domain support.
    pub fn support(&self) -> DomainSupport {
        self.support
    }

    /// Acceptable domains for one pad side, in priority order.
    pub fn accepted_domains(&self, side: Side) -> Vec<MemoryDomain> {
        accepted_domains(self.direction, side, self.support)
    }

    /// Establish the domain contract for a new format: validate the chosen
    /// output domain against the advertised set and negotiate the pool,
    /// reusing the previous pool only when its identity still matches.
    ///
    /// Must succeed before any transfer; a failure here is hard and leaves
    /// the engine without a contract.
    pub fn set_format(
        &mut self,
        layout: FrameLayout,
        output_domain: MemoryDomain,
    ) -> Result<&DomainContract, NegotiationError> {
        let input_domains = self.accepted_domains(Side::Input);
        let output_domains = self.accepted_domains(Side::Output);

        if !output_domains.contains(&output_domain) {
            self.contract = None;
            return Err(NegotiationError::NoCommonDomain { side: "output" });
        }

        // The old pool reference is dropped here if it fails validation.
        let proposed = self.pool.take();
        let (pool, pool_decision) = match decide_pool(
            &self.ctx,
            output_domain,
            &layout,
            &self.config.surface_pool,
            proposed,
        ) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                self.contract = None;
                return Err(e);
            }
        };

        debug!(
            %output_domain,
            size = pool_decision.buffer_size,
            "Negotiated domain contract"
        );

        self.pool = Some(pool);
        self.contract = Some(DomainContract {
            layout,
            input_domains,
            output_domains,
            output_domain,
            pool_decision,
        });
        Ok(self.contract.as_ref().expect("contract just set"))
    }

    /// Build a pool offer for a peer's side without touching the engine's
    /// negotiated state; the peer is free to discard it.
    pub fn propose_pool(
        &self,
        domain: MemoryDomain,
        layout: &FrameLayout,
    ) -> Result<(NegotiatedPool, PoolDecision), NegotiationError> {
        decide_pool(&self.ctx, domain, layout, &self.config.surface_pool, None)
    }

    /// The current domain contract, if negotiated.
    pub fn contract(&self) -> Option<&DomainContract> {
        self.contract.as_ref()
    }

    /// The negotiated output pool, if any.
    pub fn pool_mut(&mut self) -> Option<&mut NegotiatedPool> {
        self.pool.as_mut()
    }

    /// Move one frame between domains.
    ///
    /// Both buffers must match the contract's plane count; geometry below
    /// that is checked per plane during descriptor construction. On
    /// failure the destination contents are undefined; there is no
    /// partial-success reporting below whole-transfer granularity.
    pub fn transfer(
        &self,
        input: &TransferBuffer,
        output: &mut TransferBuffer,
    ) -> TransferResult<()> {
        let contract = self
            .contract
            .as_ref()
            .ok_or(NegotiationError::NotNegotiated)?;

        let expected = contract.layout.plane_count();
        if input.layout().plane_count() != expected {
            return Err(TransferError::GeometryMismatch {
                what: "input plane count",
                src: input.layout().plane_count(),
                dst: expected,
            });
        }
        if output.layout().plane_count() != expected {
            return Err(TransferError::GeometryMismatch {
                what: "output plane count",
                src: output.layout().plane_count(),
                dst: expected,
            });
        }

        let interop_active = self.support.interop && self.interop.is_some();
        let in_domain = classify(input, interop_active);
        let out_domain = classify(output, interop_active);
        let plan = plan(in_domain, out_domain);

        debug!(%in_domain, %out_domain, primary = ?plan.primary, "Transfer");

        match self.run_strategy(plan.primary, input, output, in_domain) {
            Ok(()) => Ok(()),
            Err(primary_err) => match plan.fallback {
                Some(fallback) => {
                    debug!(
                        error = %primary_err,
                        ?fallback,
                        "Primary strategy failed, trying fallback"
                    );
                    self.run_strategy(fallback, input, output, in_domain)
                }
                None => Err(primary_err),
            },
        }
    }

    fn run_strategy(
        &self,
        strategy: Strategy,
        input: &TransferBuffer,
        output: &mut TransferBuffer,
        in_domain: MemoryDomain,
    ) -> TransferResult<()> {
        match strategy {
            Strategy::System => copy_system(input, output),
            Strategy::Device => copy_device(&self.ctx, input, output),
            Strategy::Interop => {
                let ictx =
                    self.interop
                        .as_ref()
                        .ok_or_else(|| TransferError::InteropCapability {
                            reason: "no interop context".into(),
                        })?;
                let gl_is_input = in_domain == MemoryDomain::Interop;
                transfer_gl(ictx, &self.ctx, input, output, gl_is_input)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use MemoryDomain::*;

    // ── Strategy planning: fast paths ────────────────────────────

    #[test]
    fn host_pairs_use_host_copy_only() {
        let p = plan(System, System);
        assert_eq!(p.primary, Strategy::System);
        assert_eq!(p.fallback, None);
    }

    #[test]
    fn interop_pair_without_device_side_is_host_copy() {
        for (a, b) in [(Interop, System), (System, Interop), (Interop, Interop)] {
            let p = plan(a, b);
            assert_eq!(p.primary, Strategy::System, "{a} -> {b}");
            assert_eq!(p.fallback, None);
        }
    }

    #[test]
    fn device_pairs_fall_back_to_host() {
        for (a, b) in [(System, Device), (Device, System), (Device, Device)] {
            let p = plan(a, b);
            assert_eq!(p.primary, Strategy::Device, "{a} -> {b}");
            assert_eq!(p.fallback, Some(Strategy::System));
        }
    }

    // ── Strategy planning: no fallback for opaque surfaces ───────

    #[test]
    fn surface_pairs_have_no_fallback() {
        for (a, b) in [
            (Surface, System),
            (System, Surface),
            (Surface, Device),
            (Device, Surface),
            (Surface, Surface),
        ] {
            let p = plan(a, b);
            assert_eq!(p.primary, Strategy::Device, "{a} -> {b}");
            assert_eq!(p.fallback, None, "{a} -> {b} must not fall back");
        }
    }

    #[test]
    fn interop_with_surface_degrades_to_device_path() {
        for (a, b) in [(Interop, Surface), (Surface, Interop)] {
            let p = plan(a, b);
            assert_eq!(p.primary, Strategy::Interop, "{a} -> {b}");
            assert_eq!(p.fallback, Some(Strategy::Device));
        }
    }

    #[test]
    fn interop_with_device_falls_back_to_host() {
        for (a, b) in [(Interop, Device), (Device, Interop)] {
            let p = plan(a, b);
            assert_eq!(p.primary, Strategy::Interop, "{a} -> {b}");
            assert_eq!(p.fallback, Some(Strategy::System));
        }
    }

    // ── Domain coverage ──────────────────────────────────────────

    #[test]
    fn every_domain_pair_terminates() {
        let domains = [System, Device, Surface, Interop];
        for a in domains {
            for b in domains {
                let p = plan(a, b);
                // At most one retry; fallback never repeats the primary.
                if let Some(fb) = p.fallback {
                    assert_ne!(fb, p.primary, "{a} -> {b} would loop");
                }
            }
        }
    }
}
