//! Error taxonomy for the dispatch core.
//!
//! Nothing here ever escapes the fast call-site path: `DispatchError` is
//! only returned from table-lifecycle and make-current boundaries. Patch
//! refusal and ambient-fault reporting are deliberately *not* represented
//! here — they are expected outcomes, not errors.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum DispatchError {
    #[snafu(display("executable arena exhausted"))]
    ArenaExhausted,

    #[snafu(display("this thread already has a current dispatch state"))]
    AlreadyCurrent,

    #[snafu(display("get_proc_address callback must not be null"))]
    NullGetProc,

    #[snafu(display("unknown stub provider id {id}"))]
    UnknownProvider { id: u32 },

    #[snafu(display("dynamic slot registry exhausted its configured maximum"))]
    DynamicSlotsExhausted,

    #[snafu(display(
        "stub ownership belongs to vendor {owner}, but vendor {vendor_id} tried to make current"
    ))]
    StubOwnershipConflict { owner: i32, vendor_id: i32 },

    #[snafu(display("set_dispatch called with no current thread state"))]
    NoCurrentThreadState,

    #[snafu(display(
        "set_dispatch table belongs to vendor {table_vendor}, current thread is vendor {thread_vendor}"
    ))]
    VendorMismatch { table_vendor: i32, thread_vendor: i32 },
}

pub type Result<T> = core::result::Result<T, DispatchError>;
