//! Address-space reservation strategies.
//!
//! Three mutually exclusive tiers, chosen once per build: a deterministic
//! bump-cursor mode for reproducible testing, an extended reservation that
//! carries an explicit alignment, and a plain reservation at OS-default
//! alignment. The choice never varies per call.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::caps::CapabilitySet;
use crate::config;
use crate::region::VirtualRegion;
use crate::sys::SysVm;

#[cfg(feature = "debug")]
use std::println;

/// The reservation tier a build uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReservationStrategy {
    /// Deterministic bump-cursor reservations (`systematic` feature).
    Simulated,
    /// One extended OS call carrying an explicit alignment.
    ExtendedAligned,
    /// One OS call at default alignment.
    Plain,
}

impl ReservationStrategy {
    /// Resolve the strategy for a backend's capability set. The
    /// `systematic` feature wins outright; otherwise the aligned tier is
    /// used whenever the build supports it.
    pub const fn select(features: CapabilitySet) -> Self {
        if cfg!(feature = "systematic") {
            Self::Simulated
        } else if features.contains(CapabilitySet::ALIGNED_RESERVATION) {
            Self::ExtendedAligned
        } else {
            Self::Plain
        }
    }
}

/// Cursor for the simulated tier. Process-wide: every attempt advances it
/// by the requested size whether or not the reservation succeeded, so the
/// address sequence is reproducible across runs.
static SYSTEMATIC_CURSOR: AtomicUsize = AtomicUsize::new(config::SYSTEMATIC_BASE);

/// Reserve at the bump cursor, retrying at successive cursor positions.
///
/// Exhaustion is reported to the caller as `None`, not to the fatal
/// handler: test harnesses lean on this to simulate allocation pressure
/// without killing the process. Every other tier aborts instead.
pub(crate) fn systematic<S: SysVm>(
    sys: &S,
    size: usize,
    committed: bool,
) -> Option<VirtualRegion> {
    let mut retries = config::SYSTEMATIC_RETRIES;
    loop {
        let addr = SYSTEMATIC_CURSOR.fetch_add(size, Ordering::Relaxed);
        let p = sys.reserve_at(addr, size, committed);
        if !p.is_null() {
            return Some(VirtualRegion::new(p, size));
        }
        #[cfg(feature = "debug")]
        println!("[reserve] retry past {addr:#x}");
        retries -= 1;
        if retries == 0 {
            return None;
        }
    }
}

/// Reserve with an explicit alignment in a single extended OS call.
/// Fatal on failure.
pub(crate) fn extended<S: SysVm>(
    sys: &S,
    size: usize,
    align: usize,
    committed: bool,
) -> VirtualRegion {
    assert!(align.is_power_of_two());
    // The platform refuses alignments below its reservation granularity;
    // silently raise small requests to the floor.
    let align = if align < config::RESERVATION_GRANULARITY {
        config::RESERVATION_GRANULARITY
    } else {
        align
    };
    let p = sys.reserve_aligned(size, align, committed);
    if p.is_null() {
        sys.error("virtual address reservation failed");
    }
    VirtualRegion::new(p, size)
}

/// Reserve at OS-default alignment. Fatal on failure.
pub(crate) fn plain<S: SysVm>(sys: &S, size: usize, committed: bool) -> VirtualRegion {
    let p = sys.reserve(size, committed);
    if p.is_null() {
        sys.error("virtual address reservation failed");
    }
    VirtualRegion::new(p, size)
}
