//! Instrumented OS stand-in backed by the system allocator.
//!
//! Serves two jobs: under Miri it replaces the real syscalls (which Miri
//! cannot execute) so the pointer logic stays checkable, and in tests it
//! records every seam call so behavior like "exactly one commit over this
//! range" or "the fatal sink fired once" is observable. Failure injection
//! and a simulated pressure event round out the picture of an OS that
//! tests can steer.
//!
//! Commit state is tracked in a ledger: recommitting a decommitted range
//! zero-fills it, mirroring how the OS lazily zero-backs recommitted pages.
//! `error` panics instead of aborting so the fatal path is testable.

use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::string::String;
use std::sync::{Arc, Mutex};
use std::thread;
use std::vec::Vec;

use super::{PressureHandle, SysVm};
use crate::caps::CapabilitySet;
use crate::config::RESERVATION_GRANULARITY;

/// One recorded call through the OS seam.
#[derive(Clone, Debug, PartialEq)]
pub enum SysCall {
    Reserve { size: usize, committed: bool },
    ReserveAt { addr: usize, size: usize, committed: bool },
    ReserveAligned { size: usize, align: usize, committed: bool },
    Commit { base: usize, size: usize },
    Decommit { base: usize, size: usize },
    Error { msg: String },
    PressureSubscribe,
    PressureQuery,
}

struct Backing {
    base: usize,
    size: usize,
    layout: Layout,
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<SysCall>>,
    backings: Mutex<Vec<Backing>>,
    /// Ranges currently decommitted, as (start, end) pairs.
    decommitted: Mutex<Vec<(usize, usize)>>,
    fail_reserve: AtomicBool,
    fail_commit: AtomicBool,
    fail_decommit: AtomicBool,
    /// Number of upcoming `reserve_at` calls that should fail.
    fail_reserve_at: AtomicUsize,
    pressure: AtomicBool,
    subscription: Mutex<Option<(unsafe fn(*const ()), usize)>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for b in self.backings.lock().unwrap().drain(..) {
            unsafe { dealloc(b.base as *mut u8, b.layout) };
        }
    }
}

#[derive(Clone, Default)]
pub struct Emulated {
    inner: Arc<Inner>,
}

impl Emulated {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: SysCall) {
        self.inner.calls.lock().unwrap().push(call);
    }

    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        let layout = Layout::from_size_align(size, align).unwrap();
        let p = unsafe { alloc_zeroed(layout) };
        if !p.is_null() {
            self.inner.backings.lock().unwrap().push(Backing {
                base: p as usize,
                size,
                layout,
            });
        }
        p
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<SysCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().unwrap().clear();
    }

    /// Make `reserve` and `reserve_aligned` fail until reset.
    pub fn set_fail_reserve(&self, fail: bool) {
        self.inner.fail_reserve.store(fail, Ordering::Relaxed);
    }

    /// Make the next `n` `reserve_at` calls fail.
    pub fn fail_next_reserve_at(&self, n: usize) {
        self.inner.fail_reserve_at.store(n, Ordering::Relaxed);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.inner.fail_commit.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_decommit(&self, fail: bool) {
        self.inner.fail_decommit.store(fail, Ordering::Relaxed);
    }

    /// Set the state reported by `pressure_query`.
    pub fn set_pressure(&self, low: bool) {
        self.inner.pressure.store(low, Ordering::Relaxed);
    }

    /// Fire the bound low-memory dispatcher once, from a thread this layer
    /// does not own, as the OS would. No-op if nothing ever subscribed.
    pub fn simulate_low_memory(&self) {
        let subscription = *self.inner.subscription.lock().unwrap();
        if let Some((dispatch, ctx)) = subscription {
            thread::spawn(move || unsafe { dispatch(ctx as *const ()) })
                .join()
                .unwrap();
        }
    }
}

impl SysVm for Emulated {
    const FEATURES: CapabilitySet = if cfg!(feature = "systematic") {
        CapabilitySet::LOW_MEMORY_NOTIFICATION
    } else {
        CapabilitySet::LOW_MEMORY_NOTIFICATION.union(CapabilitySet::ALIGNED_RESERVATION)
    };

    fn reserve(&self, size: usize, committed: bool) -> *mut u8 {
        self.record(SysCall::Reserve { size, committed });
        if self.inner.fail_reserve.load(Ordering::Relaxed) {
            return core::ptr::null_mut();
        }
        self.allocate(size, RESERVATION_GRANULARITY)
    }

    fn reserve_at(&self, addr: usize, size: usize, committed: bool) -> *mut u8 {
        self.record(SysCall::ReserveAt { addr, size, committed });
        let fail = self
            .inner
            .fail_reserve_at
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return core::ptr::null_mut();
        }
        // The fixed-address tier only ever inspects addresses and sizes, so
        // the requested address is handed straight back. It is not
        // dereferenceable through this stand-in.
        addr as *mut u8
    }

    fn reserve_aligned(&self, size: usize, align: usize, committed: bool) -> *mut u8 {
        self.record(SysCall::ReserveAligned { size, align, committed });
        if self.inner.fail_reserve.load(Ordering::Relaxed) {
            return core::ptr::null_mut();
        }
        self.allocate(size, align)
    }

    unsafe fn commit(&self, base: *mut u8, size: usize) -> bool {
        self.record(SysCall::Commit { base: base as usize, size });
        if self.inner.fail_commit.load(Ordering::Relaxed) {
            return false;
        }
        let start = base as usize;
        let end = start + size;
        let backings = self.inner.backings.lock().unwrap();
        let mut decommitted = self.inner.decommitted.lock().unwrap();
        let mut remaining = Vec::new();
        for &(dstart, dend) in decommitted.iter() {
            let istart = dstart.max(start);
            let iend = dend.min(end);
            if istart >= iend {
                remaining.push((dstart, dend));
                continue;
            }
            // Recommitted pages read as zero, as the OS lazily zero-backs
            // them on first touch. Only write through memory the stand-in
            // actually owns.
            if backings
                .iter()
                .any(|b| b.base <= istart && iend <= b.base + b.size)
            {
                unsafe { core::ptr::write_bytes(istart as *mut u8, 0, iend - istart) };
            }
            if dstart < istart {
                remaining.push((dstart, istart));
            }
            if iend < dend {
                remaining.push((iend, dend));
            }
        }
        *decommitted = remaining;
        true
    }

    unsafe fn decommit(&self, base: *mut u8, size: usize) -> bool {
        self.record(SysCall::Decommit { base: base as usize, size });
        if self.inner.fail_decommit.load(Ordering::Relaxed) {
            return false;
        }
        let start = base as usize;
        self.inner
            .decommitted
            .lock()
            .unwrap()
            .push((start, start + size));
        true
    }

    fn error(&self, msg: &str) -> ! {
        self.record(SysCall::Error {
            msg: String::from(msg),
        });
        panic!("pal fatal error: {msg}");
    }

    unsafe fn pressure_subscribe(
        &self,
        dispatch: unsafe fn(*const ()),
        ctx: *const (),
    ) -> Option<PressureHandle> {
        self.record(SysCall::PressureSubscribe);
        *self.inner.subscription.lock().unwrap() = Some((dispatch, ctx as usize));
        Some(Arc::as_ptr(&self.inner) as *mut c_void)
    }

    fn pressure_query(&self, _handle: PressureHandle) -> bool {
        self.record(SysCall::PressureQuery);
        self.inner.pressure.load(Ordering::Relaxed)
    }
}
