//! Build-time configuration constants.
//!
//! Generated by `build.rs` from `rtpal.toml` (or the file named by the
//! `RTPAL_CONFIG` environment variable). The rest of the crate treats these
//! as fixed: there is no runtime probing of page size or granularity.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
