//! Low-memory notification: one process-wide OS subscription fanned out to
//! any number of registered callbacks.
//!
//! The subscription happens at most once, guarded by an atomic flag rather
//! than a lock: the critical section runs once for the whole process. The
//! fan-out list is an intrusive singly-linked list of caller-owned nodes,
//! appended with a CAS and walked without any lock so delivery never blocks
//! the OS's notification thread.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::sys::SysVm;

/// A low-memory callback registration.
///
/// Caller-owned and `'static`: the registry keeps a non-owning pointer for
/// the rest of the process, and no unregistration exists. The callback runs
/// on a thread the OS owns, so it must be reentrancy-safe and must not
/// block.
///
/// A node is its own list link, so each node may be registered at most
/// once. Register separate nodes to have a callback invoked more than once
/// per event; there is no deduplication.
pub struct LowMemoryCallback {
    next: AtomicPtr<LowMemoryCallback>,
    callback: fn(),
}

impl LowMemoryCallback {
    pub const fn new(callback: fn()) -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            callback,
        }
    }
}

/// Process-wide low-memory subscription state: the one-shot registration
/// flag, the OS notification handle, and the fan-out list head.
///
/// Lives until process exit once subscribed; the handle and the wait
/// binding behind it are deliberately never released.
pub struct NotificationRegistry {
    subscribed: AtomicBool,
    handle: AtomicPtr<c_void>,
    head: AtomicPtr<LowMemoryCallback>,
}

impl NotificationRegistry {
    pub const fn new() -> Self {
        Self {
            subscribed: AtomicBool::new(false),
            handle: AtomicPtr::new(ptr::null_mut()),
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The thread that flips the flag performs the OS subscription; every
    /// other caller is a no-op. Even if the subscription itself fails there
    /// is no second attempt: more memory pressure is the only consequence,
    /// and there is nothing sensible to do about it here.
    pub(crate) fn subscribe_once<S: SysVm>(&'static self, sys: &S) {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ctx = self as *const Self as *const ();
        // SAFETY: self is 'static, so the context outlives the binding.
        if let Some(handle) = unsafe { sys.pressure_subscribe(Self::dispatch, ctx) } {
            self.handle.store(handle, Ordering::Release);
        }
    }

    /// Entry point the OS wait binding invokes on its own thread.
    unsafe fn dispatch(ctx: *const ()) {
        let registry = unsafe { &*(ctx as *const NotificationRegistry) };
        registry.notify_all();
    }

    /// Append `callback` to the fan-out list.
    ///
    /// Lock-free, so it may race with an in-flight delivery: an append that
    /// has returned is seen by any delivery that starts after it, and that
    /// is the only ordering promised.
    pub fn register(&self, callback: &'static LowMemoryCallback) {
        callback.next.store(ptr::null_mut(), Ordering::Relaxed);
        let node = callback as *const LowMemoryCallback as *mut LowMemoryCallback;
        let mut prev = &self.head;
        let mut curr = prev.load(Ordering::Acquire);
        loop {
            while !curr.is_null() {
                prev = unsafe { &(*curr).next };
                curr = prev.load(Ordering::Acquire);
            }
            match prev.compare_exchange_weak(
                ptr::null_mut(),
                node,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => curr = actual,
            }
        }
    }

    /// Invoke every registered callback, in registration order.
    ///
    /// Runs on whatever thread delivers the notification; no lock is taken.
    pub fn notify_all(&self) {
        stat_inc!(low_memory_events);
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            (node.callback)();
            curr = node.next.load(Ordering::Acquire);
        }
    }

    /// Poll the OS for the current pressure state. `false` when this build
    /// never subscribed (or has no notification capability).
    pub(crate) fn query<S: SysVm>(&self, sys: &S) -> bool {
        let handle = self.handle.load(Ordering::Acquire);
        if handle.is_null() {
            return false;
        }
        sys.pressure_query(handle)
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::vec::Vec;

    #[test]
    fn test_fan_out_runs_in_registration_order() {
        static EVENTS: Mutex<Vec<u8>> = Mutex::new(Vec::new());
        fn first() {
            EVENTS.lock().unwrap().push(1);
        }
        fn second() {
            EVENTS.lock().unwrap().push(2);
        }
        static NODE_A: LowMemoryCallback = LowMemoryCallback::new(first);
        static NODE_B: LowMemoryCallback = LowMemoryCallback::new(second);

        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        REGISTRY.register(&NODE_A);
        REGISTRY.register(&NODE_B);
        REGISTRY.notify_all();

        assert_eq!(*EVENTS.lock().unwrap(), [1, 2]);
    }

    #[test]
    fn test_no_deduplication_across_nodes() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn bump() {
            HITS.fetch_add(1, Ordering::SeqCst);
        }
        // The same callback behind two registrations fires twice per event.
        static NODE_A: LowMemoryCallback = LowMemoryCallback::new(bump);
        static NODE_B: LowMemoryCallback = LowMemoryCallback::new(bump);

        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        REGISTRY.register(&NODE_A);
        REGISTRY.notify_all();
        assert_eq!(HITS.load(Ordering::SeqCst), 1);

        REGISTRY.register(&NODE_B);
        REGISTRY.notify_all();
        assert_eq!(HITS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_registration_loses_no_nodes() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn bump() {
            HITS.fetch_add(1, Ordering::SeqCst);
        }
        const NODES: usize = 16;
        static REGISTRY: NotificationRegistry = NotificationRegistry::new();
        static NODE_SLOTS: [LowMemoryCallback; NODES] =
            [const { LowMemoryCallback::new(bump) }; NODES];

        let handles: Vec<_> = NODE_SLOTS
            .iter()
            .map(|node| std::thread::spawn(move || REGISTRY.register(node)))
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        REGISTRY.notify_all();
        assert_eq!(HITS.load(Ordering::SeqCst), NODES);
    }
}
