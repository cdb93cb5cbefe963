//! Demonstrates two vendors sharing one dispatch core: each gets its own
//! table, each thread makes a different vendor current, and a dynamic
//! extension is looked up and dispatched after both are already running.

use std::sync::Arc;
use std::thread;

use dispatch_backend::X8664SysvProvider;
use dispatch_core::table::GetProcFn;
use dispatch_core::{RawProc, StubProviderId};
use dispatch_runtime::Controller;

unsafe extern "C" fn vendor_a_clear() {
    log::info!("vendor A: glClear");
}

unsafe extern "C" fn vendor_b_clear() {
    log::info!("vendor B: glClear");
}

unsafe extern "C" fn vendor_a_ext() {
    log::info!("vendor A: glSuperFastExt");
}

fn vendor_get_proc(clear: RawProc, ext: Option<RawProc>) -> GetProcFn {
    Box::new(move |name| match name {
        "glClear" => Some(clear),
        "glSuperFastExt" => ext,
        _ => None,
    })
}

fn main() {
    env_logger::init();

    let provider =
        X8664SysvProvider::new(StubProviderId(1)).expect("failed to set up the stub arena");
    let controller = Arc::new(Controller::new(Arc::new(provider)));

    let vendor_a = controller.new_vendor_id();
    let vendor_b = controller.new_vendor_id();
    let table_a = controller.create_table(vendor_a, vendor_get_proc(vendor_a_clear, Some(vendor_a_ext)));
    let table_b = controller.create_table(vendor_b, vendor_get_proc(vendor_b_clear, None));

    log::info!("vendor A is {vendor_a}, vendor B is {vendor_b}");

    let clear_slot = controller.slot_for("glClear").expect("glClear is a static slot");

    let ctl_a = controller.clone();
    let handle_a = thread::spawn(move || {
        let state = ctl_a.make_current(vendor_a, table_a, None).expect("make_current A");
        unsafe { (ctl_a.dispatch(&state, clear_slot))() };
        ctl_a.lose_current(&state);
    });

    let ctl_b = controller.clone();
    let handle_b = thread::spawn(move || {
        let state = ctl_b.make_current(vendor_b, table_b, None).expect("make_current B");
        unsafe { (ctl_b.dispatch(&state, clear_slot))() };
        ctl_b.lose_current(&state);
    });

    handle_a.join().unwrap();
    handle_b.join().unwrap();

    // A dynamic extension, looked up after both vendors have already run.
    // Only vendor A implements it; making A current again and dispatching
    // the assigned slot reaches it, the way an application would after
    // calling get_proc_address for an extension it discovered at runtime.
    let ext_slot = controller.slot_for("glSuperFastExt").expect("dynamic slot registry has room");
    let state = controller.make_current(vendor_a, table_a, None).expect("make_current A again");
    unsafe { (controller.dispatch(&state, ext_slot))() };
    controller.lose_current(&state);

    log::info!("multithreaded latch: {}", controller.is_multithreaded());

    controller.destroy_table(table_a);
    controller.destroy_table(table_b);
}
