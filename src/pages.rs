//! Page commit control and zero-filling.
//!
//! Commit and decommit are page-granular; misaligned regions are a
//! programming error in the allocator core, checked here rather than
//! recovered from. OS failure on either path is fatal.

use crate::region::VirtualRegion;
use crate::sys::SysVm;

/// Whether the caller requires the pages it is about to use to read as
/// zero.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ZeroMem {
    NoZero,
    YesZero,
}

/// Commit `region`, making it read-write and physically backed.
///
/// Alignment is required unless the caller waives zeroed memory: only the
/// decommit/recommit zeroing trick needs page granularity.
///
/// # Safety
/// `region` must lie within a live reservation owned by the caller, with no
/// concurrent operation on an overlapping range.
pub(crate) unsafe fn notify_using<S: SysVm>(sys: &S, region: VirtualRegion, zero: ZeroMem) {
    assert!(region.is_page_aligned() || zero == ZeroMem::NoZero);

    stat_inc!(commit_count);
    stat_add!(commit_bytes, region.len());
    let ok = unsafe { sys.commit(region.base(), region.len()) };
    if !ok {
        sys.error("page commit failed");
    }
}

/// Decommit `region`, releasing its physical backing. The address range
/// stays reserved. Alignment is required unconditionally.
///
/// # Safety
/// Same contract as [`notify_using`].
pub(crate) unsafe fn notify_not_using<S: SysVm>(sys: &S, region: VirtualRegion) {
    assert!(region.is_page_aligned());

    stat_inc!(decommit_count);
    stat_add!(decommit_bytes, region.len());
    let ok = unsafe { sys.decommit(region.base(), region.len()) };
    if !ok {
        sys.error("page decommit failed");
    }
}

/// Zero every byte of `region`.
///
/// Page-aligned regions (asserted when `page_aligned` says so, detected
/// otherwise) are decommitted and immediately recommitted: the OS lazily
/// backs the pages with zeroed memory on first touch, which beats writing
/// every byte. Anything else is zero-filled directly. Both paths produce
/// the same bytes over exactly `[base, base + len)`.
///
/// # Safety
/// `region` must be committed and writable, within a live reservation, with
/// no concurrent operation on an overlapping range.
pub(crate) unsafe fn zero<S: SysVm>(sys: &S, region: VirtualRegion, page_aligned: bool) {
    if page_aligned || region.is_page_aligned() {
        assert!(region.is_page_aligned());
        stat_inc!(zero_recommit_count);
        unsafe {
            notify_not_using(sys, region);
            notify_using(sys, region, ZeroMem::YesZero);
        }
    } else {
        stat_inc!(zero_fill_count);
        unsafe { core::ptr::write_bytes(region.base(), 0, region.len()) };
    }
}
