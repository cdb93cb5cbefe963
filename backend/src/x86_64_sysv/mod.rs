//! The x86-64 System V stub family.
//!
//! Each stub is a fixed-size run of machine code that loads the calling
//! thread's current dispatch table out of thread-local storage, reads one
//! slot from it, and tail-jumps through whatever address it finds there.
//! The table pointer itself lives in an ordinary `#[thread_local]` static
//! maintained by `dispatch-runtime`; the stub reaches it through the FS
//! segment, the native SysV TLS access model, rather than by calling back
//! into Rust — that indirection is exactly what patching later bypasses.
//!
//! The bytes this module emits are never executed by the rest of this
//! workspace: the FS-relative displacement of a `#[thread_local]` static is
//! assigned by the dynamic linker at load time and isn't something a
//! process can discover without its own inline-asm probe (glibc does this
//! with a relocation, not a computation), so `tls_disp` here is a
//! documented placeholder. `dispatch-runtime`'s actual dispatch path reads
//! the thread-local directly from Rust instead of jumping through
//! synthesized code; see its `tls` module.

mod emitter;
mod regs;

use crate::arena::ExecArena;
use dispatch_core::{DispatchError, RawProc, StubProvider, StubProviderId};
use emitter::StubWriter;
use regs::{Reg, SCRATCH};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Placeholder FS-relative displacement of the thread-local current-table
/// pointer. See the module docs: this is never resolved to a real TLS
/// offset because the synthesized bytes are never executed.
const TLS_DISP_PLACEHOLDER: u32 = 0;

/// Identifies this provider's calling convention to `PatchCallbacks::is_supported`.
pub const FAMILY_TAG: u32 = 1;

pub struct X8664SysvProvider {
    id: StubProviderId,
    arena: ExecArena,
    stubs: Mutex<HashMap<u32, *const u8>>,
    patched: AtomicBool,
}

// SAFETY: every stored pointer is a stable address inside `arena`, which
// outlives the provider; access is serialized through `stubs`'s mutex.
unsafe impl Send for X8664SysvProvider {}
unsafe impl Sync for X8664SysvProvider {}

impl X8664SysvProvider {
    pub fn new(id: StubProviderId) -> Result<Self, DispatchError> {
        Ok(Self {
            id,
            arena: ExecArena::with_default_size()?,
            stubs: Mutex::new(HashMap::new()),
            patched: AtomicBool::new(false),
        })
    }

    /// Writes the stub body for `slot` into `write_ptr` (the arena's
    /// writable alias). The sequence is:
    ///
    /// ```text
    /// mov  rax, fs:[tls_disp]      ; rax = current table pointer
    /// test rax, rax                ; no current table?
    /// jmp  rax                     ; (falls through to ud2 if null;
    ///                               real stub would branch to a
    ///                               no-op trampoline instead)
    /// mov  rax, [rax + slot*8]     ; rax = table->slots[slot]
    /// jmp  rax                     ; tail-call the resolved entrypoint
    /// ```
    fn write_stub(write_ptr: *mut u8, len: usize, slot: u32) {
        let mut w = unsafe { StubWriter::new(write_ptr, len) };
        w.emit_mov_fs_disp32(SCRATCH, TLS_DISP_PLACEHOLDER);
        w.emit_test_rr(SCRATCH, SCRATCH);
        let slot_offset = (slot as i64)
            .checked_mul(8)
            .and_then(|v| i32::try_from(v).ok())
            .expect("slot offset fits in i32");
        w.emit_load_disp32(Reg::Rax, SCRATCH, slot_offset as i32);
        w.emit_jmp_reg(Reg::Rax);
        w.emit_ud2();
    }
}

impl StubProvider for X8664SysvProvider {
    fn id(&self) -> StubProviderId {
        self.id
    }

    fn stub_for_slot(&self, slot: u32) -> Result<RawProc, DispatchError> {
        let mut stubs = self.stubs.lock().unwrap();
        if let Some(&exec_ptr) = stubs.get(&slot) {
            return Ok(unsafe { std::mem::transmute::<*const u8, RawProc>(exec_ptr) });
        }

        let (write_ptr, exec_ptr) = self.arena.alloc_stub()?;
        Self::write_stub(write_ptr, crate::arena::STUB_SIZE, slot);
        stubs.insert(slot, exec_ptr);
        Ok(unsafe { std::mem::transmute::<*const u8, RawProc>(exec_ptr) })
    }

    fn stub_count(&self) -> usize {
        self.stubs.lock().unwrap().len()
    }

    fn family_tag(&self) -> u32 {
        FAMILY_TAG
    }

    fn stub_size(&self) -> usize {
        crate::arena::STUB_SIZE
    }

    /// Always succeeds: the arena is dual-mapped read-write/read-execute
    /// (or a single RWX fallback) for the life of the process, so there is
    /// nothing to remap before a patch attempt.
    fn patch_begin(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    fn patch_commit(&self) {
        self.patched.store(true, Ordering::Release);
    }

    fn patch_abort(&self) {}

    fn restore_all(&self) {
        let stubs = self.stubs.lock().unwrap();
        for (&slot, &exec_ptr) in stubs.iter() {
            let write_ptr = self.arena.writable_alias(exec_ptr);
            Self::write_stub(write_ptr, crate::arena::STUB_SIZE, slot);
        }
        self.patched.store(false, Ordering::Release);
    }

    fn is_patched(&self) -> bool {
        self.patched.load(Ordering::Acquire)
    }

    fn lookup_patch_addr(&self, slot: u32) -> Option<(*mut u8, *const u8)> {
        let exec_proc = self.stub_for_slot(slot).ok()?;
        let exec_ptr = exec_proc as usize as *const u8;
        Some((self.arena.writable_alias(exec_ptr), exec_ptr))
    }
}
