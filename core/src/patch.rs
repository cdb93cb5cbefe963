//! Patch ownership arbitration.
//!
//! Live entrypoint patching lets a vendor rewrite stub bodies to jump
//! directly to its own functions, skipping the indirect table read on the
//! hot path. Because the rewrite is process-wide (every stub provider's
//! bytes are shared by every thread), only one vendor may hold it at a
//! time; this module is the state machine that arbitrates that ownership
//! and drives every registered `StubProvider` through a patch attempt.

use crate::stub::StubProvider;
use std::sync::Arc;

/// Current owner of the patched entrypoints, if any. Carries the owning
/// vendor's callbacks so a later handoff to a different vendor can release
/// them without the caller having to supply the old vendor's object again.
#[derive(Clone)]
pub enum PatchOwner {
    Unowned,
    Owned(i32, Arc<dyn PatchCallbacks>),
}

impl std::fmt::Debug for PatchOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOwner::Unowned => f.write_str("Unowned"),
            PatchOwner::Owned(v, _) => write!(f, "Owned({v})"),
        }
    }
}

impl PatchOwner {
    pub fn is_owned_by(&self, vendor_id: i32) -> bool {
        matches!(self, PatchOwner::Owned(v, _) if *v == vendor_id)
    }

    pub fn is_unowned(&self) -> bool {
        matches!(self, PatchOwner::Unowned)
    }

    pub fn vendor_id(&self) -> Option<i32> {
        match self {
            PatchOwner::Unowned => None,
            PatchOwner::Owned(v, _) => Some(*v),
        }
    }
}

impl Default for PatchOwner {
    fn default() -> Self {
        PatchOwner::Unowned
    }
}

/// Vendor-supplied hooks invoked around a patch attempt, mirroring the
/// real ABI surface a vendor library exports for this purpose.
pub trait PatchCallbacks: Send + Sync {
    /// Whether this vendor knows how to patch a stub family identified by
    /// `family_tag` with stubs of `stub_size` bytes.
    fn is_supported(&self, family_tag: u32, stub_size: usize) -> bool;

    /// Attempts to rewrite `provider`'s stubs to jump to this vendor's own
    /// functions. Called once arbitration has confirmed `is_supported` and
    /// the provider has agreed via `patch_begin`. A `false` return aborts
    /// the attempt for this provider before `patch_commit`.
    fn initiate_patch(&self, family_tag: u32, stub_size: usize, provider: &dyn StubProvider) -> bool;

    /// Called when this vendor's patch ownership is being released, either
    /// because a different vendor is taking over or because the process is
    /// tearing the dispatch core down.
    fn release(&self);
}

/// Attempts to transition `owner` to `Owned(vendor_id, callbacks)`.
///
/// If a different set of callbacks currently holds ownership, they are
/// released first — patch ownership moves between vendors rather than
/// refusing the handoff, matching the real dispatch core's unconditional
/// `releasePatch()` call before attempting a new vendor. Every provider in
/// `providers` is then offered the new vendor: providers that support the
/// new callbacks' family are patched, providers that don't but were
/// previously patched are restored to their default bodies. Ownership
/// lands on `vendor_id` only if at least one provider's patch attempt
/// actually succeeded; otherwise `owner` collapses to `Unowned`.
pub fn try_acquire(
    owner: &mut PatchOwner,
    vendor_id: i32,
    callbacks: Arc<dyn PatchCallbacks>,
    providers: &[Arc<dyn StubProvider>],
) -> bool {
    if let PatchOwner::Owned(_, existing) = owner {
        if Arc::ptr_eq(existing, &callbacks) {
            return true;
        }
    }

    if let PatchOwner::Owned(_, existing) = std::mem::replace(owner, PatchOwner::Unowned) {
        existing.release();
    }

    let mut any_patched = false;
    for provider in providers {
        let supported = callbacks.is_supported(provider.family_tag(), provider.stub_size());
        if supported {
            if provider.patch_begin().is_ok() {
                if callbacks.initiate_patch(provider.family_tag(), provider.stub_size(), provider.as_ref()) {
                    provider.patch_commit();
                    any_patched = true;
                } else {
                    provider.patch_abort();
                }
            }
        } else if provider.is_patched() {
            provider.restore_all();
        }
    }

    *owner = if any_patched {
        PatchOwner::Owned(vendor_id, callbacks)
    } else {
        PatchOwner::Unowned
    };
    any_patched
}

/// Releases whoever currently holds `owner` and restores every provider's
/// default stub bodies, regardless of which vendor (if any) is asking.
/// Matches the real dispatch core's "losing current always attempts to
/// restore the defaults" behavior: a best-effort collapse to `Unowned`,
/// harmless to call when nothing is patched.
pub fn release_all(owner: &mut PatchOwner, providers: &[Arc<dyn StubProvider>]) {
    if let PatchOwner::Owned(_, existing) = std::mem::replace(owner, PatchOwner::Unowned) {
        existing.release();
    }
    for provider in providers {
        if provider.is_patched() {
            provider.restore_all();
        }
    }
}
