//! Error taxonomy for the fault path.
//!
//! Resource-exhaustion variants (`OutOfMemory`, `SwapFull`, `SwapIo`) are
//! never meant to survive past the module that first observes them — the
//! coremap and swap store panic with a short message instead of returning
//! them, matching the teaching kernel's "these are kernel panics" design
//! choice. Only the first three variants reach `vm_fault`'s caller.
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Fault type was neither READ, WRITE, nor READONLY.
    Invalid,
    /// No current process or no address space (an early-boot fault).
    BadAddress,
    /// A vaddr outside every segment of the current address space reached
    /// the fault handler. Fatal for the faulting process, not a kernel panic.
    Translation,
    /// A write fault against the text segment.
    Readonly,
    /// No free frame and no evictable victim.
    OutOfMemory,
    /// The swap store has no free slot.
    SwapFull,
    /// The swap store's backing medium reported an I/O failure.
    SwapIo,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::Invalid => "invalid fault type",
            VmError::BadAddress => "fault with no current address space",
            VmError::Translation => "vaddr outside every segment of the address space",
            VmError::Readonly => "write fault against a read-only segment",
            VmError::OutOfMemory => "no free frame and no evictable victim",
            VmError::SwapFull => "swap store exhausted",
            VmError::SwapIo => "swap store I/O failure",
        };
        f.write_str(msg)
    }
}

#[cfg(not(baremetal))]
impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;
