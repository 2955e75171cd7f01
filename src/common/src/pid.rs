//! Process identifiers.

use core::fmt;

/// Number of process slots. Slot 0 is never used.
pub const NPROC: usize = 16;

/// Identifier of a process slot, `0..NPROC`.
///
/// A pid is also the slot index in the process table; pid 0 is the
/// "no such process" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(u8);

impl Pid {
    /// The reserved sentinel slot.
    pub const NONE: Pid = Pid(0);

    /// Creates a pid for `slot`, or `None` if the slot is out of range.
    pub const fn new(slot: usize) -> Option<Self> {
        if slot < NPROC {
            Some(Pid(slot as u8))
        } else {
            None
        }
    }

    /// The process-table index of this pid.
    #[inline]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }

    /// The next slot in round-robin order, wrapping to 0.
    #[inline]
    pub const fn next(self) -> Self {
        Pid(((self.0 as usize + 1) % NPROC) as u8)
    }

    /// Iterates over every slot, 0 included.
    pub fn all() -> impl Iterator<Item = Pid> {
        (0..NPROC).map(|slot| Pid(slot as u8))
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Pid> for u32 {
    fn from(pid: Pid) -> u32 {
        pid.0 as u32
    }
}
