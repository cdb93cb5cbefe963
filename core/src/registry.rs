//! The slot registry.
//!
//! Maps entrypoint names to stable, dense slot indices, tagging each with
//! the generation at which it was registered. The registry itself never
//! touches a `DispatchTable` — the caller (`dispatch-runtime::Controller`)
//! walks its own live-table set and calls `fixup` once a new slot is known,
//! which is what keeps `get_or_create` linear in *new* slots rather than in
//! total slots.

use crate::error::DispatchError;
use std::collections::HashMap;

/// A stable, non-negative slot index. Once assigned to a name it never
/// changes for the life of the process.
pub type Slot = u32;

/// An entry in the append-only registry.
#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub name: String,
    pub slot: Slot,
    pub generation: u64,
}

/// Upper bound on dynamically assigned slots. Matches the real dispatch
/// table's static allowance for GetProcAddress-discovered extension
/// entrypoints.
pub const MAX_DYNAMIC_SLOTS: u32 = 4096;

/// The authoritative name → slot mapping, plus the monotonic generation
/// counter bumped on every new registration.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    by_name: HashMap<String, Slot>,
    entries: Vec<SlotEntry>,
    static_count: u32,
    latest_generation: u64,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `name` if already registered.
    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.by_name.get(name).copied()
    }

    /// Returns the slot for `name`, registering it if this is the first
    /// time it has been seen. Returns `(slot, true)` when a new slot was
    /// created, `(slot, false)` when it already existed.
    ///
    /// Registration bumps `latest_generation` and appends a
    /// [`SlotEntry`]; the entry's generation is what lets
    /// `entries_since` find just the newly added names. Refuses to grow
    /// past `MAX_DYNAMIC_SLOTS` dynamic entries, the bound the backing
    /// stub arena is sized against.
    pub fn get_or_create(&mut self, name: &str) -> Result<(Slot, bool), DispatchError> {
        if let Some(&slot) = self.by_name.get(name) {
            return Ok((slot, false));
        }

        let dynamic_count = self.entries.len() as u32 - self.static_count;
        if dynamic_count >= MAX_DYNAMIC_SLOTS {
            return Err(DispatchError::DynamicSlotsExhausted);
        }

        let slot = self.entries.len() as Slot;
        self.latest_generation += 1;
        let entry = SlotEntry {
            name: name.to_string(),
            slot,
            generation: self.latest_generation,
        };
        self.by_name.insert(name.to_string(), slot);
        self.entries.push(entry);
        log::trace!("registered slot {slot} for {name:?} at generation {}", self.latest_generation);
        Ok((slot, true))
    }

    /// Pre-registers `names` as the static slot range (slots
    /// `0..names.len()`), without bumping generations: static slots are
    /// known at build time and every table's `slots` array is sized to
    /// cover them from the start, so no fixup is needed for them.
    ///
    /// Must only be called once, before any dynamic `get_or_create` call.
    pub fn register_static(&mut self, names: &[&str]) {
        debug_assert!(self.entries.is_empty(), "static slots must be registered first");
        for name in names {
            let slot = self.entries.len() as Slot;
            self.by_name.insert((*name).to_string(), slot);
            self.entries.push(SlotEntry {
                name: (*name).to_string(),
                slot,
                generation: 0,
            });
        }
        self.static_count = self.entries.len() as u32;
    }

    pub fn static_count(&self) -> u32 {
        self.static_count
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest_generation
    }

    pub fn slot_count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Iterates entries with `generation` strictly greater than `since`,
    /// i.e. those a table at generation `since` has not yet observed.
    pub fn entries_since(&self, since: u64) -> impl Iterator<Item = &SlotEntry> {
        self.entries.iter().filter(move |e| e.generation > since)
    }

    /// Iterates every entry, static and dynamic alike, in slot order. Used
    /// to populate a table's `slots` array the first time it's bound to a
    /// thread, since `entries_since` strictly excludes the static range
    /// (registered at generation 0).
    pub fn all_entries(&self) -> impl Iterator<Item = &SlotEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let mut reg = SlotRegistry::new();
        let (s1, created1) = reg.get_or_create("glFoo").unwrap();
        let (s2, created2) = reg.get_or_create("glFoo").unwrap();
        assert_eq!(s1, s2);
        assert!(created1);
        assert!(!created2);
    }

    #[test]
    fn distinct_names_get_distinct_slots() {
        let mut reg = SlotRegistry::new();
        let (s1, _) = reg.get_or_create("glFoo").unwrap();
        let (s2, _) = reg.get_or_create("glBar").unwrap();
        assert_ne!(s1, s2);
    }

    #[test]
    fn generation_bumps_only_on_new_registration() {
        let mut reg = SlotRegistry::new();
        reg.get_or_create("glFoo").unwrap();
        assert_eq!(reg.latest_generation(), 1);
        reg.get_or_create("glFoo").unwrap();
        assert_eq!(reg.latest_generation(), 1);
        reg.get_or_create("glBar").unwrap();
        assert_eq!(reg.latest_generation(), 2);
    }

    #[test]
    fn entries_since_finds_only_newer_entries() {
        let mut reg = SlotRegistry::new();
        reg.get_or_create("glFoo").unwrap();
        let gen_after_foo = reg.latest_generation();
        reg.get_or_create("glBar").unwrap();
        reg.get_or_create("glBaz").unwrap();

        let names: Vec<_> = reg
            .entries_since(gen_after_foo)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["glBar", "glBaz"]);
    }

    #[test]
    fn all_entries_includes_the_static_range() {
        let mut reg = SlotRegistry::new();
        reg.register_static(&["glClear"]);
        reg.get_or_create("glFooExt").unwrap();
        let names: Vec<_> = reg.all_entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["glClear", "glFooExt"]);
    }

    #[test]
    fn static_slots_precede_dynamic_ones() {
        let mut reg = SlotRegistry::new();
        reg.register_static(&["glClear", "glDrawArrays"]);
        assert_eq!(reg.static_count(), 2);
        assert_eq!(reg.lookup("glClear"), Some(0));
        assert_eq!(reg.lookup("glDrawArrays"), Some(1));

        let (slot, created) = reg.get_or_create("glFooExt").unwrap();
        assert!(created);
        assert_eq!(slot, 2);
        assert_eq!(reg.slot_count(), 3);
    }

    #[test]
    fn dynamic_registration_refuses_past_the_configured_maximum() {
        let mut reg = SlotRegistry::new();
        for i in 0..MAX_DYNAMIC_SLOTS {
            reg.get_or_create(&format!("glExt{i}")).unwrap();
        }
        assert!(matches!(
            reg.get_or_create("glOneTooMany"),
            Err(crate::error::DispatchError::DynamicSlotsExhausted)
        ));
    }
}
