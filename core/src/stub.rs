//! The stub-provider abstraction.
//!
//! A `StubProvider` is a family of dispatch stubs for one calling
//! convention: it knows how to synthesize a stub whose body reads a thread's
//! current table, indexes it by slot, and tail-calls through the result.
//! `dispatch-core` only needs the trait shape; `dispatch-backend` supplies
//! the concrete x86-64 SysV implementation and the executable-memory arena
//! it allocates into.
//!
//! Beyond synthesis, a provider is also the live-patching surface: arbitration
//! in `patch.rs` drives `patch_begin`/`patch_commit`/`patch_abort`/
//! `restore_all` on every registered provider to rewrite (or restore) stub
//! bodies in place, rather than only ever indirecting through a table read.

use crate::error::Result;
use crate::proc_address::RawProc;

/// Identifies a stub family so a table can record which one synthesized
/// its static entrypoints, and so `release` can be routed back to the
/// provider that owns a given address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StubProviderId(pub u32);

/// A family of dispatch stubs for one ABI.
///
/// Implementors are expected to be cheap to share (`Arc<dyn StubProvider>`)
/// and internally synchronized, since the controller calls into them while
/// holding its own lock.
pub trait StubProvider: Send + Sync {
    fn id(&self) -> StubProviderId;

    /// A tag identifying this provider's calling convention/stub shape, so
    /// a vendor's `PatchCallbacks::is_supported` can decide whether it knows
    /// how to patch this family without inspecting concrete machine code.
    fn family_tag(&self) -> u32;

    /// Fixed size in bytes of one stub body in this family.
    fn stub_size(&self) -> usize;

    /// Returns the stable entrypoint address for `slot`, synthesizing one
    /// if this is the first time the slot has been requested from this
    /// provider. The returned address never changes for the life of the
    /// process: callers cache it freely.
    fn stub_for_slot(&self, slot: u32) -> Result<RawProc>;

    /// Number of stubs already synthesized. Exposed for diagnostics and
    /// tests, not part of the dispatch-time path.
    fn stub_count(&self) -> usize;

    /// Prepares this provider for a patch attempt. Returning `Err` aborts
    /// the attempt for this provider before any stub body is touched.
    fn patch_begin(&self) -> Result<()>;

    /// Commits a patch attempt this provider already agreed to via
    /// `patch_begin`, after the vendor's `initiate_patch` has successfully
    /// rewritten whatever stubs it wanted to.
    fn patch_commit(&self);

    /// Aborts a patch attempt this provider already agreed to via
    /// `patch_begin`, leaving the provider's stubs exactly as they were.
    fn patch_abort(&self);

    /// Rewrites every already-synthesized stub back to its default
    /// (unpatched) body and clears `is_patched`.
    fn restore_all(&self);

    /// Whether this provider's stubs are currently rewritten by some
    /// vendor's patch.
    fn is_patched(&self) -> bool;

    /// Returns `(writable, executable)` addresses for `slot`'s stub body,
    /// synthesizing it first if necessary, so a vendor's `initiate_patch`
    /// has somewhere to write its own code.
    fn lookup_patch_addr(&self, slot: u32) -> Option<(*mut u8, *const u8)>;
}
