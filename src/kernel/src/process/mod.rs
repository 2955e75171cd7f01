//! Process table.
//!
//! A fixed array of [`NPROC`] descriptors indexed by pid. Slots are reused,
//! never freed: once a slot leaves `Free` it keeps its page table and pages.
//!
//! State machine:
//! ```text
//!   Free ──────► Runnable ──────► Broken
//! ```
//! `Broken` is terminal; a broken slot is never scheduled again.

pub mod loader;
mod setup;

pub use loader::{ProgramLoader, UserSpace};
pub use tilia_common::pid::NPROC;

use tilia_common::{Pid, Registers};

use crate::memory::PageTable;

/// Process states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProcState {
    /// Slot is unused.
    #[default]
    Free = 0,
    /// Process may be scheduled.
    Runnable = 1,
    /// Process faulted and will never run again.
    Broken = 2,
}

impl ProcState {
    /// Check if transition to new state is valid.
    pub fn can_transition_to(&self, new: &ProcState) -> bool {
        matches!(
            (self, new),
            (ProcState::Free, ProcState::Runnable)
                | (ProcState::Runnable, ProcState::Broken)
                // fork rollback hands a half-built child back
                | (ProcState::Runnable, ProcState::Free)
        )
    }
}

/// A process descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Process {
    /// Slot index.
    pub pid: Pid,
    /// Lifecycle state.
    pub state: ProcState,
    /// Registers saved at the last trap.
    pub regs: Registers,
    /// Top-level page table; may be the kernel's own table.
    pub pagetable: Option<PageTable>,
}

impl Process {
    /// `true` unless the slot is `Free`.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state != ProcState::Free
    }

    /// `true` if the scheduler may pick this process.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == ProcState::Runnable
    }

    /// Moves to `new`, checking the transition in debug builds.
    pub fn set_state(&mut self, new: ProcState) {
        debug_assert!(
            self.state.can_transition_to(&new),
            "process {}: {:?} -> {:?}",
            self.pid,
            self.state,
            new
        );
        self.state = new;
    }
}

/// The fixed table of process slots.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    slots: [Process; NPROC],
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// All slots `Free`, each with its own pid.
    pub fn new() -> Self {
        let mut slots = [Process::default(); NPROC];
        for (pid, slot) in Pid::all().zip(slots.iter_mut()) {
            slot.pid = pid;
        }
        ProcessTable { slots }
    }

    /// The descriptor for `pid`.
    #[inline]
    pub fn get(&self, pid: Pid) -> &Process {
        &self.slots[pid.slot()]
    }

    /// The descriptor for `pid`, mutably.
    #[inline]
    pub fn get_mut(&mut self, pid: Pid) -> &mut Process {
        &mut self.slots[pid.slot()]
    }

    /// Iterates over every slot, 0 included.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter()
    }

    /// Iterates over every non-free slot.
    pub fn live(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter(|p| p.is_live())
    }

    /// Number of processes sharing `pagetable`.
    pub fn sharing(&self, pagetable: PageTable) -> usize {
        self.live()
            .filter(|p| p.pagetable == Some(pagetable))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_all_free() {
        let table = ProcessTable::new();
        assert_eq!(table.live().count(), 0);
        for (slot, p) in table.iter().enumerate() {
            assert_eq!(p.pid.slot(), slot);
            assert_eq!(p.state, ProcState::Free);
            assert!(p.pagetable.is_none());
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(ProcState::Free.can_transition_to(&ProcState::Runnable));
        assert!(ProcState::Runnable.can_transition_to(&ProcState::Broken));
        assert!(!ProcState::Broken.can_transition_to(&ProcState::Runnable));
        assert!(!ProcState::Free.can_transition_to(&ProcState::Broken));
    }

    #[test]
    fn test_sharing_counts_live_slots_only() {
        let mut table = ProcessTable::new();
        let pt = PageTable::from_addr(0x1000);
        for slot in 1..=3 {
            let p = table.get_mut(Pid::new(slot).unwrap());
            p.pagetable = Some(pt);
            p.set_state(ProcState::Runnable);
        }
        table.get_mut(Pid::new(4).unwrap()).pagetable = Some(pt);
        assert_eq!(table.sharing(pt), 3);
    }
}
