use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dispatch_core::table::GetProcFn;
use dispatch_core::RawProc;

pub static V0_CALLS: AtomicU64 = AtomicU64::new(0);
pub static V1_CALLS: AtomicU64 = AtomicU64::new(0);
pub static V2_CALLS: AtomicU64 = AtomicU64::new(0);

unsafe extern "C" fn v0_f() {
    V0_CALLS.fetch_add(1, Ordering::Relaxed);
}
unsafe extern "C" fn v1_f() {
    V1_CALLS.fetch_add(1, Ordering::Relaxed);
}
unsafe extern "C" fn v2_f() {
    V2_CALLS.fetch_add(1, Ordering::Relaxed);
}

/// A `get_proc` that resolves `name` to this vendor's instrumented
/// function for exactly one name, nothing else.
pub fn vendor_get_proc(vendor: u32, supported_name: &'static str) -> GetProcFn {
    let f: RawProc = match vendor {
        0 => v0_f,
        1 => v1_f,
        2 => v2_f,
        _ => panic!("fixture only instruments vendors 0..=2"),
    };
    Box::new(move |name| if name == supported_name { Some(f) } else { None })
}

pub fn call_counts() -> (u64, u64, u64) {
    (
        V0_CALLS.load(Ordering::Relaxed),
        V1_CALLS.load(Ordering::Relaxed),
        V2_CALLS.load(Ordering::Relaxed),
    )
}

pub fn reset_call_counts() {
    V0_CALLS.store(0, Ordering::Relaxed);
    V1_CALLS.store(0, Ordering::Relaxed);
    V2_CALLS.store(0, Ordering::Relaxed);
}

pub fn new_controller() -> dispatch_runtime::Controller {
    let provider = dispatch_backend::X8664SysvProvider::new(dispatch_core::StubProviderId(99))
        .expect("failed to set up the stub arena for a test fixture");
    dispatch_runtime::Controller::new(Arc::new(provider))
}

pub fn call(f: RawProc) {
    unsafe { f() }
}
