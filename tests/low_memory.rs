//! Host-OS behavior of the low-memory notification surface.

use rtpal::{CapabilitySet, LowMemoryCallback, Pal};

fn never_called() {}

#[test]
fn test_constructing_contexts_is_idempotent() {
    // Any number of contexts across any number of threads share one
    // process-wide subscription; none of this should observably differ
    // from constructing a single context.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(|| {
                for _ in 0..8 {
                    let _pal = Pal::new();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_register_and_poll() {
    static NODE: LowMemoryCallback = LowMemoryCallback::new(never_called);

    let pal = Pal::new();
    pal.register_for_low_memory_callback(&NODE);
    let pressured = pal.expensive_low_memory_check();

    // Builds without the notification primitive never report pressure.
    #[cfg(all(unix, not(miri)))]
    {
        assert!(
            !pal.features()
                .contains(CapabilitySet::LOW_MEMORY_NOTIFICATION)
        );
        assert!(!pressured);
    }
    #[cfg(not(all(unix, not(miri))))]
    {
        let _ = pressured;
        let _ = &pal;
    }
}
