//! System-wide error types for Tilia.
//!
//! [`KernelError`] is recoverable: it is reported to the trapping process
//! as a failed system call. [`Fatal`] is terminal: it propagates to the
//! top-level run loop, which halts the platform.

use alloc::string::String;
use core::fmt;

use crate::pid::Pid;

/// Recoverable kernel failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelError {
    /// No physical page has a zero reference count.
    OutOfMemory,
    /// Every process slot is in use.
    NoFreeSlot,
    /// Address is not page aligned.
    Misaligned,
    /// Address lies outside the managed range.
    OutOfRange,
    /// Physical page already has references.
    AlreadyAllocated,
    /// Physical page has no references to share or release.
    NotAllocated,
    /// Reference count would overflow.
    RefcountOverflow,
    /// Virtual address has no present mapping.
    NotMapped,
    /// Permission set lacks the Present bit.
    InvalidPermission,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of physical memory"),
            KernelError::NoFreeSlot => write!(f, "no free process slot"),
            KernelError::Misaligned => write!(f, "address not page aligned"),
            KernelError::OutOfRange => write!(f, "address out of range"),
            KernelError::AlreadyAllocated => write!(f, "page already allocated"),
            KernelError::NotAllocated => write!(f, "page not allocated"),
            KernelError::RefcountOverflow => write!(f, "page reference count overflow"),
            KernelError::NotMapped => write!(f, "address not mapped"),
            KernelError::InvalidPermission => write!(f, "permission without present bit"),
        }
    }
}

/// Terminal kernel outcomes. Any of these halts the whole system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fatal {
    /// A process asked the kernel to stop.
    UserPanic {
        /// Requesting process.
        pid: Pid,
        /// Message read from the process's memory.
        message: String,
    },
    /// Page fault taken in kernel mode.
    KernelPageFault {
        /// Faulting address.
        addr: usize,
        /// Raw cause bits.
        err: u32,
        /// Instruction pointer at the fault.
        eip: u32,
    },
    /// Trap number the dispatcher does not recognize.
    UnexpectedTrap(u32),
    /// The invariant checker found an inconsistency.
    Invariant(String),
    /// Control-C was typed on the console keyboard.
    AbortRequested,
    /// A boot-time program failed to load.
    LoadFailed {
        /// Slot being set up.
        pid: Pid,
        /// Program that failed.
        program: usize,
    },
    /// Attempt to resume a slot that is not runnable.
    NotRunnable(Pid),
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::UserPanic { pid, message } => write!(f, "process {} panicked: {}", pid, message),
            Fatal::KernelPageFault { addr, err, eip } => write!(
                f,
                "Kernel page fault for {:#010x} ({} {}, eip={:#x})!",
                addr,
                crate::paging::PageFaultCause::from_bits_truncate(*err).operation(),
                crate::paging::PageFaultCause::from_bits_truncate(*err).problem(),
                eip
            ),
            Fatal::UnexpectedTrap(intno) => write!(f, "Unexpected interrupt {}!", intno),
            Fatal::Invariant(what) => write!(f, "invariant violated: {}", what),
            Fatal::AbortRequested => write!(f, "abort requested from keyboard"),
            Fatal::LoadFailed { pid, program } => {
                write!(f, "failed to load program {} into process {}", program, pid)
            }
            Fatal::NotRunnable(pid) => write!(f, "process {} is not runnable", pid),
        }
    }
}
