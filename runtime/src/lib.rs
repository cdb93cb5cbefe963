//! Dispatch runtime — the process-wide controller and the public
//! operation surface built on top of it.
//!
//! `dispatch-core` defines the bookkeeping types; `dispatch-backend`
//! supplies a concrete stub family and executable-memory arena. This
//! crate is where they come together: [`controller::Controller`] owns
//! every live table and the slot registry behind a single lock, `tls`
//! holds the one thing each thread reads without that lock — its current
//! table — and `api` is the thin function surface everything else calls.

pub mod api;
pub mod controller;
pub mod tls;

pub use api::*;
pub use controller::Controller;

pub use dispatch_core::{DispatchError, RawProc};
