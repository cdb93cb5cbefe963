//! Raw byte-level x86-64 instruction emission, writing straight into an
//! arena-allocated buffer rather than accumulating in a growable `Vec`:
//! stub bodies are short and fixed in number, so there's no resizing to
//! amortize.

use super::regs::Reg;

/// A cursor over a fixed, externally-allocated byte range. Never grows;
/// every `emit_*` call asserts there's room, matching the arena's
/// fixed-size-per-stub contract.
pub struct StubWriter {
    ptr: *mut u8,
    len: usize,
    offset: usize,
}

impl StubWriter {
    /// # Safety
    /// `ptr` must be valid for writes of `len` bytes for the lifetime of
    /// this `StubWriter`.
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn emit_u8(&mut self, val: u8) {
        assert!(self.offset < self.len, "stub buffer overflow");
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    fn emit_u32(&mut self, val: u32) {
        assert!(self.offset + 4 <= self.len, "stub buffer overflow");
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    fn emit_u64(&mut self, val: u64) {
        assert!(self.offset + 8 <= self.len, "stub buffer overflow");
        unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
        self.offset += 8;
    }

    /// `movabs reg, imm64`.
    pub fn emit_movabs(&mut self, reg: Reg, imm: u64) {
        let rex = 0x48 | if reg.needs_rex() { 0x01 } else { 0x00 };
        self.emit_u8(rex);
        self.emit_u8(0xB8 + reg.low3());
        self.emit_u64(imm);
    }

    /// `mov reg, fs:[disp32]` — thread-local load via the FS segment
    /// override, the System V x86-64 TLS access model.
    pub fn emit_mov_fs_disp32(&mut self, dst: Reg, disp: u32) {
        self.emit_u8(0x64); // FS segment override
        let rex = 0x48 | if dst.needs_rex() { 0x04 } else { 0x00 };
        self.emit_u8(rex);
        self.emit_u8(0x8B);
        self.emit_u8(0x04 | (dst.low3() << 3));
        self.emit_u8(0x25); // SIB: no base, disp32 only
        self.emit_u32(disp);
    }

    /// `mov dst, [base + disp32]`.
    pub fn emit_load_disp32(&mut self, dst: Reg, base: Reg, disp: i32) {
        let mut rex = 0x48;
        if dst.needs_rex() {
            rex |= 0x04;
        }
        if base.needs_rex() {
            rex |= 0x01;
        }
        self.emit_u8(rex);
        self.emit_u8(0x8B);
        self.emit_u8(0x80 | (dst.low3() << 3) | base.low3());
        self.emit_u32(disp as u32);
    }

    /// `test reg, reg`.
    pub fn emit_test_rr(&mut self, a: Reg, b: Reg) {
        let mut rex = 0x48;
        if b.needs_rex() {
            rex |= 0x04;
        }
        if a.needs_rex() {
            rex |= 0x01;
        }
        self.emit_u8(rex);
        self.emit_u8(0x85);
        self.emit_u8(0xC0 | (b.low3() << 3) | a.low3());
    }

    /// `jmp reg` — indirect tail jump through a register (ModRM.reg = /4).
    pub fn emit_jmp_reg(&mut self, reg: Reg) {
        if reg.needs_rex() {
            self.emit_u8(0x41);
        }
        self.emit_u8(0xFF);
        self.emit_u8(0xE0 | reg.low3());
    }

    /// `ud2` — used to pad/terminate a stub that hit an unreachable state.
    pub fn emit_ud2(&mut self) {
        self.emit_u8(0x0F);
        self.emit_u8(0x0B);
    }
}
