#![no_std]

//! rtpal: the platform abstraction layer beneath a user-space allocator.
//!
//! This crate is the only place allocator logic touches OS virtual-memory
//! primitives: reserving address ranges, committing and decommitting
//! physical backing, zero-filling pages, and fanning out the OS's
//! low-memory notification. One target platform per build; dispatch is a
//! compile-time choice via `cfg_if`, never a runtime one.
//!
//! # Usage
//!
//! ```ignore
//! let pal = rtpal::Pal::new();
//! if let Some(region) = pal.reserve(2 * rtpal::config::PAGE_SIZE, false) {
//!     unsafe { pal.notify_using(region, rtpal::ZeroMem::YesZero) };
//!     // ... use the pages ...
//!     unsafe { pal.notify_not_using(region) };
//! }
//! ```

#[cfg(any(test, feature = "std", feature = "testing", miri))]
extern crate std;

#[macro_use]
mod macros;

pub mod caps;
pub mod config;
pub mod notify;
pub mod pages;
pub mod pal;
pub mod region;
pub mod reserve;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sys;

// Re-export the PAL surface at crate root for convenience
pub use caps::CapabilitySet;
pub use notify::{LowMemoryCallback, NotificationRegistry};
pub use pages::ZeroMem;
pub use pal::Pal;
pub use region::VirtualRegion;
pub use reserve::ReservationStrategy;
