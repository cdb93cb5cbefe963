//! The process-wide controller.
//!
//! Owns the slot registry, the live table set, the registered stub
//! providers, and patch ownership behind a single mutex — the same "one
//! lock guards everything but the fast read path" shape as the rest of
//! this workspace's shared state, just applied to dispatch tables instead
//! of a translation cache. A thread's own current-table/vendor fields are
//! read without this lock at all (see `tls`); dispatching through that
//! table still takes a brief lock to look the table up by id.

use dispatch_core::registry::SlotRegistry;
use dispatch_core::table::{DispatchTable, GetProcFn, TableId};
use dispatch_core::thread_state::ThreadState;
use dispatch_core::patch::{self, PatchCallbacks, PatchOwner};
use dispatch_core::{DispatchError, RawProc, StubProvider, StubProviderId};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Entrypoints every vendor's table is seeded with at creation, resolved
/// eagerly rather than waiting for a fixup pass. A real windowing-system
/// build would generate this list from the API's function registry;
/// here it stands in for whatever the core API defines as always-present.
pub const STATIC_ENTRYPOINTS: &[&str] = &[
    "glGetError",
    "glFlush",
    "glFinish",
    "glEnable",
    "glDisable",
    "glViewport",
    "glClear",
    "glDrawArrays",
];

struct Inner {
    registry: SlotRegistry,
    tables: HashMap<TableId, DispatchTable>,
    next_table_id: u64,
    next_vendor_id: i32,
    providers: Vec<Arc<dyn StubProvider>>,
    patch_owner: PatchOwner,
    num_current_contexts: u32,
    is_multithreaded: bool,
    first_thread_tag: Option<dispatch_core::thread_state::ThreadTag>,
    threads: HashMap<dispatch_core::thread_state::ThreadTag, std::sync::Weak<ThreadState>>,
    client_refcount: u32,
}

impl Inner {
    fn new() -> Self {
        let mut registry = SlotRegistry::new();
        registry.register_static(STATIC_ENTRYPOINTS);
        Self {
            registry,
            tables: HashMap::new(),
            next_table_id: 1,
            next_vendor_id: 1,
            providers: Vec::new(),
            patch_owner: PatchOwner::Unowned,
            num_current_contexts: 0,
            is_multithreaded: false,
            first_thread_tag: None,
            threads: HashMap::new(),
            client_refcount: 0,
        }
    }

    /// Allocates (on first call) or extends `id`'s `slots` array to match
    /// the registry's current generation. A table's first bind resolves
    /// every entry the registry knows about, static and dynamic alike,
    /// since `entries_since` strictly excludes the static range.
    fn ensure_fixed_up(&mut self, id: TableId) {
        let latest = self.registry.latest_generation();
        let Some(table) = self.tables.get_mut(&id) else { return };
        if !table.is_allocated() {
            let all: Vec<(u32, &str)> = self.registry.all_entries().map(|e| (e.slot, e.name.as_str())).collect();
            table.fixup(&all, latest);
        } else if table.generation() < latest {
            let entries: Vec<(u32, &str)> = self
                .registry
                .entries_since(table.generation())
                .map(|e| (e.slot, e.name.as_str()))
                .collect();
            table.fixup(&entries, latest);
        }
    }

    fn fixup_all_current(&mut self) {
        let latest = self.registry.latest_generation();
        let stale: Vec<TableId> = self
            .tables
            .iter()
            .filter(|(_, t)| t.refcount() > 0 && t.is_allocated() && t.generation() < latest)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.ensure_fixed_up(id);
        }
    }

    fn check_delete(&mut self, id: TableId, orphaned: &std::collections::HashSet<TableId>) -> bool {
        if let Some(table) = self.tables.get(&id) {
            if table.refcount() == 0 && orphaned.contains(&id) {
                self.tables.remove(&id);
                return true;
            }
        }
        false
    }

    fn patch_safe_for(&self, vendor_id: i32) -> bool {
        match self.patch_owner.vendor_id() {
            None => true,
            Some(owner) => owner == vendor_id,
        }
    }
}

/// Owns every dispatch table, the slot registry, the registered stub
/// providers, and patch ownership for one process. Applications are
/// expected to use [`global`] rather than constructing their own —
/// mirroring the single process-wide instance the rest of this module's
/// design assumes — but tests are free to build isolated instances with
/// [`Controller::new`].
pub struct Controller {
    inner: Mutex<Inner>,
    orphaned_tables: Mutex<std::collections::HashSet<TableId>>,
}

impl Controller {
    /// Builds a controller seeded with one stub provider. Additional
    /// providers can be registered later through
    /// [`register_stub_provider`](Self::register_stub_provider).
    pub fn new(stub_provider: Arc<dyn StubProvider>) -> Self {
        let mut inner = Inner::new();
        inner.providers.push(stub_provider);
        Self {
            inner: Mutex::new(inner),
            orphaned_tables: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Increments the process-wide client refcount. Mirrors a windowing
    /// layer's "first client to attach initializes the library" contract;
    /// returns the refcount after incrementing.
    pub fn init(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        inner.client_refcount += 1;
        inner.client_refcount
    }

    /// Decrements the process-wide client refcount. On the last client,
    /// unregisters every stub provider, frees all tables, resets the slot
    /// registry to just its static range, releases patch ownership, and
    /// clears the thread roster — everything short of destroying the
    /// singleton itself, which `OnceCell` doesn't support.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.client_refcount == 0 {
            return;
        }
        inner.client_refcount -= 1;
        if inner.client_refcount == 0 {
            log::debug!("last client finalized: tearing down dispatch state");
            patch::release_all(&mut inner.patch_owner, &inner.providers);
            inner.providers.clear();
            inner.tables.clear();
            inner.registry = SlotRegistry::new();
            inner.registry.register_static(STATIC_ENTRYPOINTS);
            inner.num_current_contexts = 0;
            inner.threads.clear();
            inner.is_multithreaded = false;
            inner.first_thread_tag = None;
        }
    }

    /// Registers `provider` as an additional stub family participating in
    /// `get_proc_address`/patch arbitration. Providers are pluggable: more
    /// than one may be registered at a time.
    pub fn register_stub_provider(&self, provider: Arc<dyn StubProvider>) -> StubProviderId {
        let mut inner = self.inner.lock().unwrap();
        let id = provider.id();
        inner.providers.push(provider);
        id
    }

    /// Removes `id` from the registered provider set. A no-op if no
    /// provider with that id is currently registered.
    pub fn unregister_stub_provider(&self, id: StubProviderId) {
        let mut inner = self.inner.lock().unwrap();
        inner.providers.retain(|p| p.id() != id);
    }

    pub fn new_vendor_id(&self) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_vendor_id;
        inner.next_vendor_id += 1;
        id
    }

    /// Registers a new table for `vendor_id`. Does not allocate the
    /// table's `slots` array or call `get_proc` — that happens the first
    /// time the table is bound to a thread, via [`set_dispatch`](Self::set_dispatch).
    pub fn create_table(&self, vendor_id: i32, get_proc: GetProcFn) -> TableId {
        let mut inner = self.inner.lock().unwrap();
        let id = TableId(inner.next_table_id);
        inner.next_table_id += 1;
        let table = DispatchTable::new(id, vendor_id, get_proc);
        inner.tables.insert(id, table);
        id
    }

    /// Marks a table for destruction. If no thread currently holds it, it
    /// is dropped immediately; otherwise it's dropped the next time its
    /// refcount reaches zero.
    pub fn destroy_table(&self, id: TableId) {
        let mut inner = self.inner.lock().unwrap();
        let still_current = inner.tables.get(&id).map(|t| t.refcount() > 0).unwrap_or(false);
        if still_current {
            self.orphaned_tables.lock().unwrap().insert(id);
        } else {
            inner.tables.remove(&id);
        }
    }

    pub fn destroy_vendor_tables(&self, vendor_id: i32) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<TableId> = inner
            .tables
            .iter()
            .filter(|(_, t)| t.vendor_id == vendor_id)
            .map(|(id, _)| *id)
            .collect();
        drop(inner);
        for id in ids {
            self.destroy_table(id);
        }
    }

    /// Registers `name` as a dynamic entrypoint if this is the first time
    /// it's been seen, fixes up every table currently bound to a thread,
    /// and returns its slot index. Fails once the dynamic slot range has
    /// hit its configured maximum.
    ///
    /// Distinct from [`get_proc_address`](Self::get_proc_address): this
    /// returns the raw slot rather than a stub address, for callers that
    /// already hold a [`ThreadState`] and want to dispatch through
    /// [`Self::dispatch`] directly instead of going through synthesized
    /// stub code.
    pub fn slot_for(&self, name: &str) -> Result<u32, DispatchError> {
        let mut inner = self.inner.lock().unwrap();
        let (slot, _created) = inner.registry.get_or_create(name)?;
        inner.fixup_all_current();
        Ok(slot)
    }

    /// Registers `name` as a dynamic entrypoint if this is the first time
    /// it's been seen, fixes up every table currently bound to a thread,
    /// and returns the stable stub address callers should cache.
    pub fn get_proc_address(&self, name: &str) -> Result<RawProc, DispatchError> {
        let slot = self.slot_for(name)?;
        let provider = {
            let inner = self.inner.lock().unwrap();
            inner
                .providers
                .first()
                .cloned()
                .ok_or(DispatchError::UnknownProvider { id: 0 })?
        };
        provider.stub_for_slot(slot)
    }

    pub fn is_multithreaded(&self) -> bool {
        self.inner.lock().unwrap().is_multithreaded
    }

    /// Records that the calling OS thread has taken part in dispatch, and
    /// flips the multithreaded latch the first time a second distinct
    /// thread shows up. Once flipped, it never flips back.
    pub fn note_thread_activity(&self, tag: dispatch_core::thread_state::ThreadTag) {
        let mut inner = self.inner.lock().unwrap();
        match inner.first_thread_tag {
            None => inner.first_thread_tag = Some(tag),
            Some(first) if first != tag => inner.is_multithreaded = true,
            _ => {}
        }
    }

    /// Makes `table_id` (owned by `vendor_id`) current for the calling
    /// thread, allocating a fresh [`ThreadState`] for it. Fails if the
    /// calling thread already has a current dispatch state, or if a
    /// different vendor currently owns patched entrypoints.
    ///
    /// If `patch_callbacks` is supplied, a patch transition is attempted
    /// first, under the same lock as the ownership safety check: if a
    /// different vendor currently holds the patched stubs, they're
    /// released and every registered provider is offered to the new
    /// vendor before the safety check below decides whether make-current
    /// may proceed.
    pub fn make_current(
        &self,
        vendor_id: i32,
        table_id: TableId,
        patch_callbacks: Option<Arc<dyn PatchCallbacks>>,
    ) -> Result<Arc<ThreadState>, DispatchError> {
        if crate::tls::current().is_some() {
            return Err(DispatchError::AlreadyCurrent);
        }

        let state = Arc::new(ThreadState::new());

        {
            let mut inner = self.inner.lock().unwrap();

            if let Some(cb) = patch_callbacks {
                if dispatch_core::config::env_config().patching_allowed() {
                    patch::try_acquire(&mut inner.patch_owner, vendor_id, cb, &inner.providers);
                } else {
                    log::debug!("patching skipped for vendor {vendor_id}: ambient-fault checking or __GLVND_DISALLOW_PATCHING is active");
                }
            }

            if !inner.patch_safe_for(vendor_id) {
                let owner = inner.patch_owner.vendor_id().unwrap_or(0);
                return Err(DispatchError::StubOwnershipConflict { owner, vendor_id });
            }

            inner.num_current_contexts += 1;
            inner.threads.insert(state.tag, Arc::downgrade(&state));
        }

        self.note_thread_activity(state.tag);
        crate::tls::set_current(Some(state.clone()));
        self.set_dispatch(&state, Some((vendor_id, table_id)))?;
        Ok(state)
    }

    /// Changes which table is current for `thread` without releasing the
    /// thread's overall current-context status. Passing `None` clears the
    /// thread's table (but not its make-current status).
    pub fn set_dispatch(
        &self,
        thread: &Arc<ThreadState>,
        target: Option<(i32, TableId)>,
    ) -> Result<(), DispatchError> {
        let prev = thread.current_table().zip(thread.current_vendor());

        if let Some((vendor_id, table_id)) = target {
            let mut inner = self.inner.lock().unwrap();
            let table_vendor = inner
                .tables
                .get(&table_id)
                .map(|t| t.vendor_id)
                .ok_or(DispatchError::UnknownProvider { id: table_id.0 as u32 })?;
            if table_vendor != vendor_id {
                return Err(DispatchError::VendorMismatch {
                    table_vendor,
                    thread_vendor: vendor_id,
                });
            }
            self_fixup_and_ref(&mut inner, table_id);
            thread.set_current(vendor_id, table_id);
        } else {
            thread.clear_current();
        }

        if let Some((prev_table, _)) = prev {
            let mut inner = self.inner.lock().unwrap();
            if let Some(table) = inner.tables.get(&prev_table) {
                table.decref();
            }
            let orphaned = self.orphaned_tables.lock().unwrap().clone();
            inner.check_delete(prev_table, &orphaned);
            self.orphaned_tables.lock().unwrap().remove(&prev_table);
        }
        Ok(())
    }

    /// Reads the entrypoint address for `slot` out of whatever table is
    /// current for `thread`, falling back to the no-op if nothing is
    /// current. The thread's own current-table read is lock-free; only the
    /// table lookup itself takes the controller lock, briefly.
    pub fn dispatch(&self, thread: &ThreadState, slot: u32) -> RawProc {
        match thread.current_table() {
            Some(table_id) => {
                let inner = self.inner.lock().unwrap();
                inner
                    .tables
                    .get(&table_id)
                    .map(|t| t.read_slot(slot))
                    .unwrap_or(dispatch_core::proc_address::noop_proc as RawProc)
            }
            None => dispatch_core::proc_address::noop_proc as RawProc,
        }
    }

    /// Releases `thread`'s current dispatch state. Distinct from
    /// `thread_destroyed` only in that it clears the thread-local slot;
    /// thread-exit teardown has nothing left to clear.
    pub fn lose_current(&self, thread: &Arc<ThreadState>) {
        self.lose_current_internal(thread);
        crate::tls::set_current(None);
    }

    pub(crate) fn thread_destroyed(&self, thread: &Arc<ThreadState>) {
        self.lose_current_internal(thread);
    }

    /// Under the controller lock, unconditionally attempts to restore the
    /// default (unpatched) stub state, regardless of which vendor (if any)
    /// `thread` belonged to — matching the real dispatch core, which makes
    /// this same best-effort release attempt on every lose-current, not
    /// only when the losing thread happens to be the patch owner.
    fn lose_current_internal(&self, thread: &Arc<ThreadState>) {
        let _ = self.set_dispatch(thread, None);
        let mut inner = self.inner.lock().unwrap();
        patch::release_all(&mut inner.patch_owner, &inner.providers);
        if inner.num_current_contexts > 0 {
            inner.num_current_contexts -= 1;
        }
        inner.threads.remove(&thread.tag);
    }

    /// Resets controller state after a `fork()` in the child: every table
    /// is treated as no longer current anywhere (the other threads that
    /// held them don't exist in the child), and any that were pending
    /// deletion are dropped outright. The slot registry and registered
    /// stub providers are preserved.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        let table_ids: Vec<TableId> = inner.tables.keys().copied().collect();
        for id in &table_ids {
            if let Some(table) = inner.tables.get(id) {
                while table.refcount() > 0 {
                    table.decref();
                }
            }
        }
        let orphaned = self.orphaned_tables.lock().unwrap().clone();
        for id in table_ids {
            inner.check_delete(id, &orphaned);
        }
        inner.num_current_contexts = 0;
        inner.threads.clear();
        inner.is_multithreaded = false;
        inner.first_thread_tag = None;
        self.orphaned_tables.lock().unwrap().clear();
        crate::tls::set_current(None);
    }

    pub fn num_current_contexts(&self) -> u32 {
        self.inner.lock().unwrap().num_current_contexts
    }

    pub fn table_count(&self) -> usize {
        self.inner.lock().unwrap().tables.len()
    }

    pub fn provider_count(&self) -> usize {
        self.inner.lock().unwrap().providers.len()
    }
}

fn self_fixup_and_ref(inner: &mut Inner, id: TableId) {
    inner.ensure_fixed_up(id);
    if let Some(table) = inner.tables.get(&id) {
        table.incref();
    }
}

static GLOBAL: OnceCell<Controller> = OnceCell::new();

/// Returns the process-wide controller, building it on first use with the
/// x86-64 SysV stub family.
pub fn global() -> &'static Controller {
    GLOBAL.get_or_init(|| {
        let provider = dispatch_backend::X8664SysvProvider::new(dispatch_core::StubProviderId(1))
            .expect("failed to initialize the default stub arena");
        Controller::new(Arc::new(provider))
    })
}

pub(crate) fn notify_thread_exit(thread: &Arc<ThreadState>) {
    if let Some(controller) = GLOBAL.get() {
        controller.thread_destroyed(thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_controller() -> Controller {
        let provider = dispatch_backend::X8664SysvProvider::new(dispatch_core::StubProviderId(77))
            .expect("failed to set up the stub arena for a test fixture");
        Controller::new(Arc::new(provider))
    }

    fn no_vendor_fn(_name: &str) -> Option<RawProc> {
        None
    }

    struct NullPatch;
    impl PatchCallbacks for NullPatch {
        fn is_supported(&self, _family_tag: u32, _stub_size: usize) -> bool {
            true
        }
        fn initiate_patch(&self, _family_tag: u32, _stub_size: usize, _provider: &dyn StubProvider) -> bool {
            true
        }
        fn release(&self) {}
    }

    #[test]
    fn create_table_does_not_allocate_slots_until_bound() {
        let ctl = test_controller();
        let vendor = ctl.new_vendor_id();
        let table = ctl.create_table(vendor, Box::new(no_vendor_fn));
        assert_eq!(ctl.table_count(), 1);
        let state = ctl.make_current(vendor, table, None).unwrap();
        // by the time make_current returns, set_dispatch has already bound
        // the table and allocated its slots array.
        assert_eq!(ctl.dispatch(&state, 0) as usize, dispatch_core::noop_proc as usize);
        ctl.lose_current(&state);
    }

    #[test]
    fn get_proc_address_is_stable_across_calls() {
        let ctl = test_controller();
        let a = ctl.get_proc_address("glFooExt").unwrap();
        let b = ctl.get_proc_address("glFooExt").unwrap();
        assert_eq!(a as usize, b as usize);
    }

    #[test]
    fn make_current_twice_on_same_thread_fails() {
        let ctl = test_controller();
        let vendor = ctl.new_vendor_id();
        let table = ctl.create_table(vendor, Box::new(no_vendor_fn));
        let state = ctl.make_current(vendor, table, None).unwrap();
        let err = ctl.make_current(vendor, table, None);
        assert!(matches!(err, Err(DispatchError::AlreadyCurrent)));
        ctl.lose_current(&state);
    }

    #[test]
    fn lose_current_allows_a_fresh_make_current() {
        let ctl = test_controller();
        let vendor = ctl.new_vendor_id();
        let table = ctl.create_table(vendor, Box::new(no_vendor_fn));
        let state = ctl.make_current(vendor, table, None).unwrap();
        ctl.lose_current(&state);
        assert!(ctl.make_current(vendor, table, None).is_ok());
        crate::tls::set_current(None);
    }

    #[test]
    fn destroy_table_still_current_is_deferred() {
        let ctl = test_controller();
        let vendor = ctl.new_vendor_id();
        let table = ctl.create_table(vendor, Box::new(no_vendor_fn));
        let state = ctl.make_current(vendor, table, None).unwrap();
        ctl.destroy_table(table);
        assert_eq!(ctl.table_count(), 1);
        ctl.lose_current(&state);
        assert_eq!(ctl.table_count(), 0);
    }

    #[test]
    fn patch_ownership_handoff_lets_a_different_vendor_make_current() {
        // A thread can only ever have one current context, so observing
        // the handoff (as opposed to the "already current" refusal)
        // requires the second attempt to come from a different OS thread.
        let ctl = Arc::new(test_controller());
        let v1 = ctl.new_vendor_id();
        let v2 = ctl.new_vendor_id();
        let t1 = ctl.create_table(v1, Box::new(no_vendor_fn));
        let t2 = ctl.create_table(v2, Box::new(no_vendor_fn));

        let s1 = ctl.make_current(v1, t1, Some(Arc::new(NullPatch))).unwrap();

        let ctl2 = ctl.clone();
        let s2 = std::thread::spawn(move || ctl2.make_current(v2, t2, Some(Arc::new(NullPatch))))
            .join()
            .unwrap()
            .unwrap();

        ctl.lose_current(&s1);
        ctl.lose_current(&s2);
    }

    #[test]
    fn register_and_unregister_stub_provider_changes_provider_count() {
        let ctl = test_controller();
        assert_eq!(ctl.provider_count(), 1);
        let extra = dispatch_backend::X8664SysvProvider::new(dispatch_core::StubProviderId(200)).unwrap();
        let id = ctl.register_stub_provider(Arc::new(extra));
        assert_eq!(ctl.provider_count(), 2);
        ctl.unregister_stub_provider(id);
        assert_eq!(ctl.provider_count(), 1);
    }

    #[test]
    fn init_and_finalize_track_a_client_refcount() {
        let ctl = test_controller();
        assert_eq!(ctl.init(), 1);
        assert_eq!(ctl.init(), 2);
        ctl.finalize();
        assert_eq!(ctl.provider_count(), 1, "still one client attached, nothing torn down yet");
        ctl.finalize();
        assert_eq!(ctl.provider_count(), 0, "last client finalized, providers torn down");
    }

    #[test]
    fn reset_clears_current_context_count() {
        let ctl = test_controller();
        let vendor = ctl.new_vendor_id();
        let table = ctl.create_table(vendor, Box::new(no_vendor_fn));
        let _state = ctl.make_current(vendor, table, None).unwrap();
        assert_eq!(ctl.num_current_contexts(), 1);
        ctl.reset();
        assert_eq!(ctl.num_current_contexts(), 0);
    }
}
