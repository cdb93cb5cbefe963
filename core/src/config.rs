//! Environment-variable configuration governing patching and app-error
//! checking.
//!
//! Read once and cached, the same way the original implementation memoizes
//! `getenv("__GLVND_DISALLOW_PATCHING")` behind a static `inited` flag. We
//! use `once_cell` rather than hand-rolled double-checked locking for it, in
//! keeping with the rest of the pack's preference for that crate over raw
//! `static mut`.

use once_cell::sync::OnceCell;

/// Snapshot of the three environment variables that govern patching and
/// ambient-fault checking. Immutable for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct EnvConfig {
    pub disallow_patching: bool,
    pub app_error_checking: bool,
    pub abort_on_app_error: bool,
}

impl EnvConfig {
    fn from_env() -> Self {
        let app_error_checking = env_flag("__GLVND_APP_ERROR_CHECKING");
        let disallow_patching = env_flag("__GLVND_DISALLOW_PATCHING") || app_error_checking;
        let abort_on_app_error = env_flag("__GLVND_ABORT_ON_APP_ERROR");
        Self {
            disallow_patching,
            app_error_checking,
            abort_on_app_error,
        }
    }

    /// Patching must never be attempted while ambient-fault checking is
    /// enabled: patching skips the indirect dispatch that hosts the check.
    pub fn patching_allowed(&self) -> bool {
        !self.disallow_patching
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(val) => val.trim().parse::<i64>().map(|n| n != 0).unwrap_or(false),
        Err(_) => false,
    }
}

static CONFIG: OnceCell<EnvConfig> = OnceCell::new();

/// Returns the process-wide environment snapshot, reading it lazily on
/// first use and caching it thereafter.
pub fn env_config() -> &'static EnvConfig {
    CONFIG.get_or_init(EnvConfig::from_env)
}
