//! Concrete executable-memory arena and stub families for the dispatch
//! core.
//!
//! `dispatch-core` defines the `StubProvider` trait and knows nothing about
//! machine code; this crate is where an actual architecture gets one. Only
//! x86-64 SysV is implemented — other architectures would add sibling
//! modules here the same way a multi-target JIT backend keeps one module
//! per architecture.

pub mod arena;
pub mod x86_64_sysv;

pub use arena::ExecArena;
pub use x86_64_sysv::X8664SysvProvider;
