//! Dual-aliased executable memory for synthesized dispatch stubs.
//!
//! Every stub is written once and never freed, so this is a bump allocator
//! over a single fixed-size mapping rather than a general allocator. The
//! mapping is dual-aliased on platforms that support it: one virtual
//! address range is read-execute, a second maps the same physical pages
//! read-write, so a stub can be patched in place without ever holding a
//! writable view of memory the CPU might simultaneously be executing from
//! (W^X). Platforms without a way to create that alias fall back to a
//! single read-write-execute mapping.

use dispatch_core::DispatchError;
use std::sync::Mutex;

/// Bytes reserved per stub. Large enough for a `movabs`-based SysV stub:
/// loading a 64-bit absolute address takes 10 bytes, and a stub needs two
/// of them (table pointer, slot index computation) plus the indirect jump
/// and alignment padding.
pub const STUB_SIZE: usize = 64;

/// Default arena capacity: enough stubs for every slot the registry can
/// hand out, matching `dispatch_core::registry::MAX_DYNAMIC_SLOTS`.
pub const DEFAULT_ARENA_SIZE: usize = STUB_SIZE * 4096;

struct Mapping {
    write_ptr: *mut u8,
    exec_ptr: *const u8,
    size: usize,
    dual_aliased: bool,
}

// SAFETY: the mapping is never freed except in Drop, and all mutation of
// the writable alias is serialized through ExecArena's mutex.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

/// An executable memory arena that hands out fixed-size, never-freed
/// regions for stub bodies.
pub struct ExecArena {
    mapping: Mapping,
    offset: Mutex<usize>,
}

impl ExecArena {
    pub fn new(size: usize) -> Result<Self, DispatchError> {
        let page_size = page_size();
        let size = (size + page_size - 1) & !(page_size - 1);
        let mapping = dual_map(size).ok_or(DispatchError::ArenaExhausted)?;
        Ok(Self {
            mapping,
            offset: Mutex::new(0),
        })
    }

    pub fn with_default_size() -> Result<Self, DispatchError> {
        Self::new(DEFAULT_ARENA_SIZE)
    }

    /// Bump-allocates `STUB_SIZE` bytes and returns `(writable_ptr,
    /// executable_ptr)` for the new region. The two pointers alias the same
    /// physical memory; writes through the first become visible for
    /// execution through the second without any flush, since both are
    /// ordinary cacheable mappings of the same pages.
    pub fn alloc_stub(&self) -> Result<(*mut u8, *const u8), DispatchError> {
        let mut offset = self.offset.lock().unwrap();
        if *offset + STUB_SIZE > self.mapping.size {
            return Err(DispatchError::ArenaExhausted);
        }
        let write_ptr = unsafe { self.mapping.write_ptr.add(*offset) };
        let exec_ptr = unsafe { self.mapping.exec_ptr.add(*offset) };
        *offset += STUB_SIZE;
        Ok((write_ptr, exec_ptr))
    }

    /// Returns the writable alias for an address previously handed out as
    /// the executable half of an `alloc_stub` pair, for patching an
    /// existing stub in place. Addresses outside the arena are returned
    /// unchanged — callers that mix arenas get undefined results, which
    /// matches the underlying `u_execmem_get_writable` contract.
    pub fn writable_alias(&self, exec_ptr: *const u8) -> *mut u8 {
        let base = self.mapping.exec_ptr as usize;
        let addr = exec_ptr as usize;
        if addr >= base {
            let rel = addr - base;
            if rel < self.mapping.size {
                return unsafe { self.mapping.write_ptr.add(rel) };
            }
        }
        exec_ptr as *mut u8
    }

    pub fn is_dual_aliased(&self) -> bool {
        self.mapping.dual_aliased
    }

    pub fn capacity(&self) -> usize {
        self.mapping.size
    }
}

impl Drop for ExecArena {
    fn drop(&mut self) {
        unsafe {
            if self.mapping.dual_aliased {
                libc::munmap(self.mapping.write_ptr as *mut libc::c_void, self.mapping.size);
                libc::munmap(self.mapping.exec_ptr as *mut libc::c_void, self.mapping.size);
            } else {
                libc::munmap(self.mapping.write_ptr as *mut libc::c_void, self.mapping.size);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn dual_map(size: usize) -> Option<Mapping> {
    use std::ffi::CString;
    unsafe {
        let name = CString::new("dispatch-stub-arena").unwrap();
        let fd = libc::memfd_create(name.as_ptr(), 0);
        if fd < 0 {
            log::warn!("memfd_create failed, falling back to a single RWX mapping");
            return single_rwx_map(size);
        }
        if libc::ftruncate(fd, size as libc::off_t) != 0 {
            libc::close(fd);
            return single_rwx_map(size);
        }

        let write_ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        let exec_ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_EXEC,
            libc::MAP_SHARED,
            fd,
            0,
        );
        libc::close(fd);

        if write_ptr == libc::MAP_FAILED || exec_ptr == libc::MAP_FAILED {
            if write_ptr != libc::MAP_FAILED {
                libc::munmap(write_ptr, size);
            }
            if exec_ptr != libc::MAP_FAILED {
                libc::munmap(exec_ptr, size);
            }
            return single_rwx_map(size);
        }

        Some(Mapping {
            write_ptr: write_ptr as *mut u8,
            exec_ptr: exec_ptr as *const u8,
            size,
            dual_aliased: true,
        })
    }
}

#[cfg(not(target_os = "linux"))]
fn dual_map(size: usize) -> Option<Mapping> {
    single_rwx_map(size)
}

fn single_rwx_map(size: usize) -> Option<Mapping> {
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return None;
        }
        Some(Mapping {
            write_ptr: ptr as *mut u8,
            exec_ptr: ptr as *const u8,
            size,
            dual_aliased: false,
        })
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
