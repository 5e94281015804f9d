//! Raw OS seam for virtual memory and memory-pressure primitives.
//!
//! Each platform provides one implementation of [`SysVm`] (VirtualAlloc and
//! friends on Windows, mmap and friends on Unix). The reservation
//! strategies, page commit controller, zero filler, and notification
//! registry are all generic over this trait, which is also what lets tests
//! drive them against the instrumented [`emulated`] stand-in.

use core::ffi::c_void;

use crate::caps::CapabilitySet;

/// OS handle used to poll the current memory-pressure state.
pub type PressureHandle = *mut c_void;

/// One platform's raw virtual-memory calls.
///
/// All pointer-returning calls report failure as null; the policy of what a
/// failure means (retry, abort, propagate) lives a layer up. `error` is the
/// process-wide fatal sink: it never returns.
pub trait SysVm: Send + Sync {
    /// Capabilities this build of the backend supports.
    const FEATURES: CapabilitySet;

    /// Reserve `size` bytes anywhere, at OS-default alignment.
    fn reserve(&self, size: usize, committed: bool) -> *mut u8;

    /// Reserve `size` bytes exactly at `addr`, or fail.
    fn reserve_at(&self, addr: usize, size: usize, committed: bool) -> *mut u8;

    /// Reserve `size` bytes at a base that is a multiple of `align`.
    /// `align` must be a power of two.
    fn reserve_aligned(&self, size: usize, align: usize, committed: bool) -> *mut u8;

    /// Back `[base, base + size)` with read-write physical memory.
    ///
    /// # Safety
    /// The range must lie within a live reservation owned by the caller.
    unsafe fn commit(&self, base: *mut u8, size: usize) -> bool;

    /// Release the physical backing of `[base, base + size)`; the address
    /// range stays reserved.
    ///
    /// # Safety
    /// The range must lie within a live reservation owned by the caller.
    unsafe fn decommit(&self, base: *mut u8, size: usize) -> bool;

    /// Emit `msg` and terminate the process. No unwinding, no cleanup.
    fn error(&self, msg: &str) -> !;

    /// Subscribe to the OS low-memory notification, binding `dispatch` to
    /// run with `ctx` on an OS-owned thread whenever pressure is signaled.
    /// Returns the pollable handle, or `None` when the platform has no such
    /// primitive (or the subscription could not be established).
    ///
    /// # Safety
    /// `ctx` must stay valid for the remainder of the process: the binding
    /// is never released.
    unsafe fn pressure_subscribe(
        &self,
        dispatch: unsafe fn(*const ()),
        ctx: *const (),
    ) -> Option<PressureHandle>;

    /// Synchronously query the current pressure state.
    fn pressure_query(&self, handle: PressureHandle) -> bool;
}

#[cfg(any(test, feature = "testing", miri))]
pub mod emulated;

cfg_if::cfg_if! {
    if #[cfg(miri)] {
        /// Miri cannot execute real OS syscalls; the instrumented stand-in
        /// doubles as the host backend so the pointer logic stays checkable.
        pub type HostSys = emulated::Emulated;
    } else if #[cfg(windows)] {
        pub mod windows;
        pub type HostSys = windows::WindowsSys;
    } else if #[cfg(unix)] {
        pub mod unix;
        pub type HostSys = unix::UnixSys;
    }
}
