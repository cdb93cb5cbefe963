/// x86-64 general-purpose register indices, matching ModR/M and REX
/// register numbering directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
}

impl Reg {
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }
}

/// Scratch register the stub is free to clobber: it runs before the
/// vendor function's own prologue, so it only needs to not collide with
/// argument-passing registers (RDI, RSI, RDX, RCX, R8, R9).
pub const SCRATCH: Reg = Reg::Rax;
