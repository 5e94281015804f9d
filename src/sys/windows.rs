//! Windows backend using the VirtualAlloc family and the memory resource
//! notification API.
//!
//! Aligned reservations go through `VirtualAlloc2`, which is assumed
//! present (post-RS5 SDK). The `systematic` feature drops that capability
//! bit so deterministic test builds never take the extended path.

use core::ffi::c_void;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::{PressureHandle, SysVm};
use crate::caps::CapabilitySet;

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_DECOMMIT: u32 = 0x4000;
const PAGE_READWRITE: u32 = 0x04;

const LOW_MEMORY_RESOURCE_NOTIFICATION: u32 = 0;
const INFINITE: u32 = 0xFFFF_FFFF;
const WT_EXECUTEDEFAULT: u32 = 0;
const STD_ERROR_HANDLE: u32 = -12i32 as u32;

const MEM_EXTENDED_PARAMETER_ADDRESS_REQUIREMENTS: u64 = 1;

#[repr(C)]
struct MemAddressRequirements {
    lowest_starting_address: *mut c_void,
    highest_ending_address: *mut c_void,
    alignment: usize,
}

/// Layout-compatible with MEM_EXTENDED_PARAMETER: a 64-bit type/reserved
/// bitfield followed by an 8-byte union, of which only the pointer arm is
/// used here.
#[repr(C)]
struct MemExtendedParameter {
    type_and_reserved: u64,
    pointer: *mut c_void,
}

unsafe extern "system" {
    fn VirtualAlloc(
        lp_address: *mut c_void,
        dw_size: usize,
        fl_allocation_type: u32,
        fl_protect: u32,
    ) -> *mut c_void;

    fn VirtualFree(lp_address: *mut c_void, dw_size: usize, dw_free_type: u32) -> i32;

    fn CreateMemoryResourceNotification(notification_type: u32) -> *mut c_void;

    fn QueryMemoryResourceNotification(
        notification_handle: *mut c_void,
        resource_state: *mut i32,
    ) -> i32;

    fn RegisterWaitForSingleObject(
        ph_new_wait_object: *mut *mut c_void,
        h_object: *mut c_void,
        callback: unsafe extern "system" fn(*mut c_void, u8),
        context: *mut c_void,
        dw_milliseconds: u32,
        dw_flags: u32,
    ) -> i32;

    fn GetStdHandle(n_std_handle: u32) -> *mut c_void;

    fn WriteFile(
        h_file: *mut c_void,
        lp_buffer: *const c_void,
        n_bytes_to_write: u32,
        lp_bytes_written: *mut u32,
        lp_overlapped: *mut c_void,
    ) -> i32;
}

#[link(name = "kernelbase")]
unsafe extern "system" {
    fn VirtualAlloc2(
        process: *mut c_void,
        base_address: *mut c_void,
        size: usize,
        allocation_type: u32,
        page_protection: u32,
        extended_parameters: *mut MemExtendedParameter,
        parameter_count: u32,
    ) -> *mut c_void;
}

unsafe extern "C" {
    fn abort() -> !;
}

/// Dispatcher bound by the one-time subscription. Stored as a usize so the
/// OS-thread trampoline can pick it up; written exactly once, before the
/// wait object exists.
static DISPATCH: AtomicUsize = AtomicUsize::new(0);

unsafe extern "system" fn low_memory_trampoline(context: *mut c_void, _timed_out: u8) {
    let f = DISPATCH.load(Ordering::Acquire);
    if f != 0 {
        let dispatch: unsafe fn(*const ()) = unsafe { mem::transmute(f) };
        unsafe { dispatch(context as *const ()) };
    }
}

const fn reserve_flags(committed: bool) -> u32 {
    if committed {
        MEM_RESERVE | MEM_COMMIT
    } else {
        MEM_RESERVE
    }
}

#[derive(Clone, Copy, Default)]
pub struct WindowsSys;

impl SysVm for WindowsSys {
    const FEATURES: CapabilitySet = if cfg!(feature = "systematic") {
        CapabilitySet::LOW_MEMORY_NOTIFICATION
    } else {
        CapabilitySet::LOW_MEMORY_NOTIFICATION.union(CapabilitySet::ALIGNED_RESERVATION)
    };

    fn reserve(&self, size: usize, committed: bool) -> *mut u8 {
        let p = unsafe {
            VirtualAlloc(ptr::null_mut(), size, reserve_flags(committed), PAGE_READWRITE)
        };
        p as *mut u8
    }

    fn reserve_at(&self, addr: usize, size: usize, committed: bool) -> *mut u8 {
        let p = unsafe {
            VirtualAlloc(addr as *mut c_void, size, reserve_flags(committed), PAGE_READWRITE)
        };
        p as *mut u8
    }

    fn reserve_aligned(&self, size: usize, align: usize, committed: bool) -> *mut u8 {
        let mut reqs = MemAddressRequirements {
            lowest_starting_address: ptr::null_mut(),
            highest_ending_address: ptr::null_mut(),
            alignment: align,
        };
        let mut param = MemExtendedParameter {
            type_and_reserved: MEM_EXTENDED_PARAMETER_ADDRESS_REQUIREMENTS,
            pointer: (&mut reqs as *mut MemAddressRequirements) as *mut c_void,
        };
        let p = unsafe {
            VirtualAlloc2(
                ptr::null_mut(),
                ptr::null_mut(),
                size,
                reserve_flags(committed),
                PAGE_READWRITE,
                &mut param,
                1,
            )
        };
        p as *mut u8
    }

    unsafe fn commit(&self, base: *mut u8, size: usize) -> bool {
        let p = unsafe { VirtualAlloc(base as *mut c_void, size, MEM_COMMIT, PAGE_READWRITE) };
        !p.is_null()
    }

    unsafe fn decommit(&self, base: *mut u8, size: usize) -> bool {
        unsafe { VirtualFree(base as *mut c_void, size, MEM_DECOMMIT) != 0 }
    }

    fn error(&self, msg: &str) -> ! {
        unsafe {
            let stderr = GetStdHandle(STD_ERROR_HANDLE);
            let mut written = 0u32;
            WriteFile(
                stderr,
                msg.as_ptr() as *const c_void,
                msg.len() as u32,
                &mut written,
                ptr::null_mut(),
            );
            WriteFile(
                stderr,
                "\n".as_ptr() as *const c_void,
                1,
                &mut written,
                ptr::null_mut(),
            );
            abort()
        }
    }

    unsafe fn pressure_subscribe(
        &self,
        dispatch: unsafe fn(*const ()),
        ctx: *const (),
    ) -> Option<PressureHandle> {
        let handle =
            unsafe { CreateMemoryResourceNotification(LOW_MEMORY_RESOURCE_NOTIFICATION) };
        if handle.is_null() {
            return None;
        }
        DISPATCH.store(dispatch as usize, Ordering::Release);
        // The wait object is deliberately leaked: it is needed until the
        // process exits. If binding it fails the handle still supports
        // synchronous polling, and there is nothing better to do.
        let mut wait: *mut c_void = ptr::null_mut();
        unsafe {
            RegisterWaitForSingleObject(
                &mut wait,
                handle,
                low_memory_trampoline,
                ctx as *mut c_void,
                INFINITE,
                WT_EXECUTEDEFAULT,
            )
        };
        Some(handle)
    }

    fn pressure_query(&self, handle: PressureHandle) -> bool {
        let mut state: i32 = 0;
        let ok = unsafe { QueryMemoryResourceNotification(handle, &mut state) };
        ok != 0 && state != 0
    }
}
