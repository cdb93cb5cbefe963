//! The per-thread "current" slot.
//!
//! Mirrors the single pthread-key-per-process design of the system this is
//! modeled on: one real thread-local holds whichever [`ThreadState`] this
//! thread has made current, read without any lock on the fast path. The
//! controller never reaches into another thread's slot directly — cross-
//! thread teardown (fork reset, thread-exit) instead walks a roster it
//! keeps under its own lock, using each `ThreadState`'s methods rather than
//! this thread-local.

use dispatch_core::ThreadState;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

struct TlsSlot {
    state: RefCell<Option<Arc<ThreadState>>>,
}

impl Drop for TlsSlot {
    fn drop(&mut self) {
        if let Some(state) = self.state.borrow_mut().take() {
            log::trace!("thread exiting with dispatch state tag={:?} still current", state.tag);
            crate::controller::notify_thread_exit(&state);
        }
    }
}

thread_local! {
    static SLOT: Rc<TlsSlot> = Rc::new(TlsSlot { state: RefCell::new(None) });
}

/// Returns this thread's current dispatch state, if any.
pub fn current() -> Option<Arc<ThreadState>> {
    SLOT.with(|slot| slot.state.borrow().clone())
}

/// Installs `state` as this thread's current dispatch state, replacing
/// (and returning) whatever was there before.
pub fn set_current(state: Option<Arc<ThreadState>>) -> Option<Arc<ThreadState>> {
    SLOT.with(|slot| slot.state.replace(state))
}
