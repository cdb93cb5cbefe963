//! Data model for the vendor-neutral dispatch core.
//!
//! This crate has no knowledge of threads, TLS, or executable memory — it
//! defines the pure bookkeeping types (`Slot`, `SlotRegistry`,
//! `DispatchTable`, `ThreadState`, the `StubProvider` trait and the patch
//! arbitration state machine) that `dispatch-runtime` wires together under
//! a single lock. See `dispatch-backend` for the concrete executable-memory
//! arena and stub family, and `dispatch-runtime` for the controller that
//! owns all of this at process scope.

pub mod config;
pub mod error;
pub mod patch;
pub mod proc_address;
pub mod registry;
pub mod stub;
pub mod table;
pub mod thread_state;

pub use config::EnvConfig;
pub use error::DispatchError;
pub use patch::{PatchCallbacks, PatchOwner};
pub use proc_address::{noop_proc, RawProc};
pub use registry::{Slot, SlotEntry, SlotRegistry};
pub use stub::{StubProvider, StubProviderId};
pub use table::{DispatchTable, GetProcFn, TableId};
pub use thread_state::{ThreadState, ThreadTag};
