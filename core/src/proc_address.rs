//! The raw entrypoint pointer type and the no-op fallback.
//!
//! Every dispatch-table slot that has no vendor function resolves to
//! [`noop_proc`] rather than a null pointer, so a racing reader that
//! observes a freshly-fixed-up table always has something callable to jump
//! to, even before the corresponding vendor function is known.

use crate::config::env_config;
use std::sync::atomic::{AtomicU64, Ordering};

/// A raw, untyped dispatch entrypoint. The core never calls through this
/// with arguments — it only stores and forwards the address. Argument
/// marshaling is left to the windowing-system glue layer above this crate.
pub type RawProc = unsafe extern "C" fn();

/// Number of times [`noop_proc`] has run. Exposed for the no-current-context
/// fault test scenarios; not part of the public ABI surface.
static NOOP_CALLS: AtomicU64 = AtomicU64::new(0);

/// The callable no-op every unresolved slot points to.
///
/// If `__GLVND_APP_ERROR_CHECKING` is set, emits a diagnostic; if
/// `__GLVND_ABORT_ON_APP_ERROR` is also set, aborts the process. Both are
/// optional — by default this is a silent no-op.
pub unsafe extern "C" fn noop_proc() {
    NOOP_CALLS.fetch_add(1, Ordering::Relaxed);

    let cfg = env_config();
    if cfg.app_error_checking {
        log::warn!("dispatch entrypoint called with no current context");
        if cfg.abort_on_app_error {
            std::process::abort();
        }
    }
}

/// Number of times the no-op fallback has run. Monotonic, process-wide.
pub fn noop_call_count() -> u64 {
    NOOP_CALLS.load(Ordering::Relaxed)
}
