//! The platform services context: the one surface the allocator core sees.
//!
//! A `Pal` is explicitly constructed and hands out the build's
//! capabilities, the reservation operations, page commit control,
//! zero-filling, and the low-memory notification surface. State that must
//! be process-wide (the subscription flag, the fan-out list) lives in a
//! [`NotificationRegistry`] the context is bound to: the host constructor
//! binds the one process-wide registry, tests bind their own.

use crate::caps::CapabilitySet;
use crate::config;
use crate::notify::{LowMemoryCallback, NotificationRegistry};
use crate::pages::{self, ZeroMem};
use crate::region::VirtualRegion;
use crate::reserve::{self, ReservationStrategy};
use crate::sys::{HostSys, SysVm};

/// Registry behind every [`Pal::new`] instance. Process-lifetime by
/// design: the OS handle it ends up owning is never released.
static GLOBAL_REGISTRY: NotificationRegistry = NotificationRegistry::new();

/// Platform abstraction layer context.
///
/// Cheap to construct and to copy around by reference; constructing any
/// number of them performs at most one OS notification subscription per
/// registry. Operations may be called concurrently as long as no two
/// threads touch overlapping regions; that invariant belongs to the
/// caller, and nothing here locks.
pub struct Pal<S: SysVm = HostSys> {
    sys: S,
    registry: &'static NotificationRegistry,
}

impl Pal<HostSys> {
    /// Host PAL bound to the process-wide notification registry.
    pub fn new() -> Self {
        Self::with_registry(HostSys::default(), &GLOBAL_REGISTRY)
    }
}

impl Default for Pal<HostSys> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SysVm> Pal<S> {
    /// Capabilities of this build. Fixed at compile time; never probed.
    pub const FEATURES: CapabilitySet = S::FEATURES;

    /// Reservation tier of this build. Fixed at compile time.
    pub const STRATEGY: ReservationStrategy = ReservationStrategy::select(S::FEATURES);

    /// Explicit initialization point: bind a backend to a registry.
    ///
    /// When the backend supports low-memory notification, the first
    /// construction against a given registry performs the one-time OS
    /// subscription; later constructions are no-ops.
    pub fn with_registry(sys: S, registry: &'static NotificationRegistry) -> Self {
        if S::FEATURES.contains(CapabilitySet::LOW_MEMORY_NOTIFICATION) {
            registry.subscribe_once(&sys);
        }
        Self { sys, registry }
    }

    pub fn features(&self) -> CapabilitySet {
        Self::FEATURES
    }

    /// Reserve `size` bytes of address space, pre-committed when
    /// `committed` is set.
    ///
    /// Returns `None` only when the Simulated tier exhausts its retry
    /// budget; the other tiers terminate the process instead of failing.
    pub fn reserve(&self, size: usize, committed: bool) -> Option<VirtualRegion> {
        stat_inc!(reserve_count);
        stat_add!(reserve_bytes, size);
        match Self::STRATEGY {
            ReservationStrategy::Simulated => reserve::systematic(&self.sys, size, committed),
            ReservationStrategy::ExtendedAligned => Some(reserve::extended(
                &self.sys,
                size,
                config::PAGE_SIZE,
                committed,
            )),
            ReservationStrategy::Plain => Some(reserve::plain(&self.sys, size, committed)),
        }
    }

    /// Reserve `size` bytes at a base that is a multiple of `align`
    /// (raised to the platform's 64 KiB floor when smaller).
    ///
    /// Requires the `ALIGNED_RESERVATION` capability. Callers are expected
    /// to check the flags first; asking without it is a contract violation
    /// and goes through the fatal handler.
    pub fn reserve_aligned(&self, size: usize, align: usize, committed: bool) -> VirtualRegion {
        if !Self::FEATURES.contains(CapabilitySet::ALIGNED_RESERVATION) {
            self.sys
                .error("aligned reservation requested without capability");
        }
        stat_inc!(reserve_count);
        stat_add!(reserve_bytes, size);
        reserve::extended(&self.sys, size, align, committed)
    }

    /// Notify the platform these pages are in use: commit them read-write.
    ///
    /// # Safety
    /// `region` must come from a reservation made through this layer, and
    /// no other thread may operate on an overlapping range concurrently.
    pub unsafe fn notify_using(&self, region: VirtualRegion, zero: ZeroMem) {
        unsafe { pages::notify_using(&self.sys, region, zero) }
    }

    /// Notify the platform these pages are no longer in use: decommit them,
    /// keeping the address range reserved.
    ///
    /// # Safety
    /// Same contract as [`Pal::notify_using`].
    pub unsafe fn notify_not_using(&self, region: VirtualRegion) {
        unsafe { pages::notify_not_using(&self.sys, region) }
    }

    /// Zero every byte of `region`, by decommit/recommit when page-aligned
    /// and by direct fill otherwise.
    ///
    /// # Safety
    /// `region` must be committed and writable, and no other thread may
    /// operate on an overlapping range concurrently.
    pub unsafe fn zero(&self, region: VirtualRegion, page_aligned: bool) {
        unsafe { pages::zero(&self.sys, region, page_aligned) }
    }

    /// Add `callback` to the low-memory fan-out list. The node is
    /// caller-owned and must live for the rest of the process; see
    /// [`LowMemoryCallback`] for the delivery contract.
    pub fn register_for_low_memory_callback(&self, callback: &'static LowMemoryCallback) {
        self.registry.register(callback);
    }

    /// Synchronously poll the OS for the current pressure state.
    ///
    /// Expensive: meant for periodic or diagnostic use, never per
    /// allocation.
    pub fn expensive_low_memory_check(&self) -> bool {
        stat_inc!(pressure_checks);
        self.registry.query(&self.sys)
    }

    /// Report an unrecoverable condition and terminate the process.
    pub fn error(&self, msg: &str) -> ! {
        self.sys.error(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::PressureHandle;
    use crate::sys::emulated::{Emulated, SysCall};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Mutex;
    use std::thread;
    use std::vec::Vec;

    /// Emulated backend stripped of every capability, for exercising the
    /// Plain tier and the capability gate.
    #[derive(Clone, Default)]
    struct BareSys(Emulated);

    impl SysVm for BareSys {
        const FEATURES: CapabilitySet = CapabilitySet::NONE;

        fn reserve(&self, size: usize, committed: bool) -> *mut u8 {
            self.0.reserve(size, committed)
        }
        fn reserve_at(&self, addr: usize, size: usize, committed: bool) -> *mut u8 {
            self.0.reserve_at(addr, size, committed)
        }
        fn reserve_aligned(&self, size: usize, align: usize, committed: bool) -> *mut u8 {
            self.0.reserve_aligned(size, align, committed)
        }
        unsafe fn commit(&self, base: *mut u8, size: usize) -> bool {
            unsafe { self.0.commit(base, size) }
        }
        unsafe fn decommit(&self, base: *mut u8, size: usize) -> bool {
            unsafe { self.0.decommit(base, size) }
        }
        fn error(&self, msg: &str) -> ! {
            self.0.error(msg)
        }
        unsafe fn pressure_subscribe(
            &self,
            dispatch: unsafe fn(*const ()),
            ctx: *const (),
        ) -> Option<PressureHandle> {
            unsafe { self.0.pressure_subscribe(dispatch, ctx) }
        }
        fn pressure_query(&self, handle: PressureHandle) -> bool {
            self.0.pressure_query(handle)
        }
    }

    fn subscribe_count(sys: &Emulated) -> usize {
        sys.calls()
            .iter()
            .filter(|c| matches!(c, SysCall::PressureSubscribe))
            .count()
    }

    #[test]
    fn test_many_contexts_subscribe_once() {
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        let sys = Emulated::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sys = sys.clone();
                thread::spawn(move || {
                    for _ in 0..4 {
                        let _pal = Pal::with_registry(sys.clone(), &REGISTRY);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(subscribe_count(&sys), 1);
    }

    #[test]
    fn test_low_memory_event_fans_out_from_foreign_thread() {
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        static HITS: AtomicUsize = AtomicUsize::new(0);
        static DELIVERY_THREAD: Mutex<Option<thread::ThreadId>> = Mutex::new(None);
        fn on_low_memory() {
            HITS.fetch_add(1, Ordering::SeqCst);
            *DELIVERY_THREAD.lock().unwrap() = Some(thread::current().id());
        }
        static NODE: LowMemoryCallback = LowMemoryCallback::new(on_low_memory);

        let sys = Emulated::new();
        let pal = Pal::with_registry(sys.clone(), &REGISTRY);
        pal.register_for_low_memory_callback(&NODE);

        sys.simulate_low_memory();

        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        let delivered_on = DELIVERY_THREAD.lock().unwrap().unwrap();
        assert_ne!(delivered_on, thread::current().id());
    }

    #[test]
    fn test_expensive_check_tracks_pressure_state() {
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        let sys = Emulated::new();
        let pal = Pal::with_registry(sys.clone(), &REGISTRY);

        assert!(!pal.expensive_low_memory_check());
        sys.set_pressure(true);
        assert!(pal.expensive_low_memory_check());
        sys.set_pressure(false);
        assert!(!pal.expensive_low_memory_check());
    }

    #[cfg(not(feature = "systematic"))]
    #[test]
    fn test_reserve_uses_the_extended_tier() {
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        let sys = Emulated::new();
        let pal = Pal::with_registry(sys.clone(), &REGISTRY);
        assert_eq!(
            Pal::<Emulated>::STRATEGY,
            ReservationStrategy::ExtendedAligned
        );

        let region = pal.reserve(1 << 20, false).unwrap();
        assert_eq!(region.len(), 1 << 20);
        assert!(sys.calls().iter().any(|c| matches!(
            c,
            SysCall::ReserveAligned {
                align: crate::config::RESERVATION_GRANULARITY,
                ..
            }
        )));
    }

    #[cfg(not(feature = "systematic"))]
    #[test]
    fn test_bare_backend_uses_the_plain_tier() {
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        let sys = BareSys::default();
        let inner = sys.0.clone();
        let pal = Pal::with_registry(sys, &REGISTRY);
        assert_eq!(Pal::<BareSys>::STRATEGY, ReservationStrategy::Plain);

        let region = pal.reserve(1 << 16, true).unwrap();
        assert_eq!(region.len(), 1 << 16);
        assert!(matches!(
            inner.calls()[..],
            [SysCall::Reserve {
                size: 0x10000,
                committed: true,
            }]
        ));
    }

    #[test]
    fn test_reserve_aligned_without_capability_is_fatal() {
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        let sys = BareSys::default();
        let inner = sys.0.clone();
        let pal = Pal::with_registry(sys, &REGISTRY);

        let result =
            catch_unwind(AssertUnwindSafe(|| pal.reserve_aligned(1 << 20, 1 << 16, false)));
        assert!(result.is_err());
        assert!(matches!(inner.calls()[..], [SysCall::Error { .. }]));
    }
}
