//! Invariant checker.
//!
//! A read-only audit of the ledger against the process table and the page
//! tables. The kernel runs it on every trap entry and before every resume;
//! any finding is fatal.
//!
//! Audited:
//! - slot 0 is free;
//! - each live process has a page table; the kernel's table is owned by the
//!   kernel and referenced once plus once per process sharing it, every
//!   other table is owned by its process and referenced once;
//! - second-level tables have their top-level table's owner and exactly
//!   one reference;
//! - every referenced process page belongs to a live process;
//! - unless some process shares the kernel's table, the reference count of
//!   every process page equals the number of slots pointing at it.

use core::fmt;

use tilia_common::layout::{
    page_number, MEMSIZE_PHYSICAL, MEMSIZE_VIRTUAL, NPAGES, PAGETABLE_NENTRIES, PAGE_SIZE,
    PROC_START_ADDR,
};
use tilia_common::Pid;
use tilia_hal::PhysicalMemory;

use crate::memory::pagetable::read_entry;
use crate::memory::{lookup, Ledger, Owner, PageTable};
use crate::process::ProcessTable;

/// A failed audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Slot 0 is not free.
    SentinelInUse,
    /// A live process has no page table.
    MissingPageTable(Pid),
    /// A page table page has the wrong owner.
    TableOwner {
        /// Physical address of the table.
        table: usize,
        /// Owner it should have.
        expected: Owner,
        /// Owner the ledger records.
        found: Owner,
    },
    /// A top-level table has the wrong reference count.
    TableRefcount {
        /// Physical address of the table.
        table: usize,
        /// Holders of the table.
        expected: usize,
        /// Count the ledger records.
        found: u8,
    },
    /// A second-level table is referenced more or less than once.
    SecondLevelRefcount {
        /// Physical address of the second-level table.
        table: usize,
        /// Count the ledger records.
        found: u8,
    },
    /// A top-level entry points outside physical memory.
    BadEntry {
        /// Physical address of the top-level table.
        table: usize,
        /// Entry index.
        index: usize,
    },
    /// A referenced page belongs to a free slot.
    OrphanPage {
        /// Physical page number.
        pn: usize,
        /// Recorded owner.
        owner: Pid,
    },
    /// A page's reference count differs from the slots that map it.
    Conservation {
        /// Physical page number.
        pn: usize,
        /// Count the ledger records.
        refcount: u8,
        /// Slots found pointing at the page.
        references: usize,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::SentinelInUse => write!(f, "process 0 is in use"),
            InvariantViolation::MissingPageTable(pid) => {
                write!(f, "process {} has no page table", pid)
            }
            InvariantViolation::TableOwner {
                table,
                expected,
                found,
            } => write!(
                f,
                "page table {:#x} owned by {}, expected {}",
                table, found, expected
            ),
            InvariantViolation::TableRefcount {
                table,
                expected,
                found,
            } => write!(
                f,
                "page table {:#x} has refcount {}, expected {}",
                table, found, expected
            ),
            InvariantViolation::SecondLevelRefcount { table, found } => write!(
                f,
                "second-level table {:#x} has refcount {}, expected 1",
                table, found
            ),
            InvariantViolation::BadEntry { table, index } => {
                write!(f, "page table {:#x} entry {} out of range", table, index)
            }
            InvariantViolation::OrphanPage { pn, owner } => write!(
                f,
                "page {:#x} referenced by free process {}",
                pn << 12,
                owner
            ),
            InvariantViolation::Conservation {
                pn,
                refcount,
                references,
            } => write!(
                f,
                "page {:#x} has refcount {} but {} references",
                pn << 12,
                refcount,
                references
            ),
        }
    }
}

/// Audits the kernel state. Pure.
pub fn check<M: PhysicalMemory + ?Sized>(
    ledger: &Ledger,
    procs: &ProcessTable,
    mem: &M,
    kernel_pagetable: PageTable,
) -> Result<(), InvariantViolation> {
    if procs.get(Pid::NONE).is_live() {
        return Err(InvariantViolation::SentinelInUse);
    }

    let sharers = procs.sharing(kernel_pagetable);
    check_table(ledger, mem, kernel_pagetable, Owner::Kernel, 1 + sharers)?;
    for process in procs.live() {
        let pagetable = process
            .pagetable
            .ok_or(InvariantViolation::MissingPageTable(process.pid))?;
        if pagetable != kernel_pagetable {
            check_table(ledger, mem, pagetable, Owner::Process(process.pid), 1)?;
        }
    }

    for (pn, info) in ledger.iter() {
        if let Owner::Process(owner) = info.owner {
            if !info.is_free() && !procs.get(owner).is_live() {
                return Err(InvariantViolation::OrphanPage { pn, owner });
            }
        }
    }

    if sharers == 0 {
        check_conservation(ledger, procs, mem, kernel_pagetable)?;
    }
    Ok(())
}

fn check_table<M: PhysicalMemory + ?Sized>(
    ledger: &Ledger,
    mem: &M,
    pagetable: PageTable,
    owner: Owner,
    holders: usize,
) -> Result<(), InvariantViolation> {
    let info = ledger.info(pagetable.page_number());
    if info.owner != owner {
        return Err(InvariantViolation::TableOwner {
            table: pagetable.addr(),
            expected: owner,
            found: info.owner,
        });
    }
    if info.refcount as usize != holders {
        return Err(InvariantViolation::TableRefcount {
            table: pagetable.addr(),
            expected: holders,
            found: info.refcount,
        });
    }

    for index in 0..PAGETABLE_NENTRIES {
        let entry = read_entry(mem, pagetable.addr(), index);
        if !entry.is_present() {
            continue;
        }
        if entry.addr() >= MEMSIZE_PHYSICAL {
            return Err(InvariantViolation::BadEntry {
                table: pagetable.addr(),
                index,
            });
        }
        let second = ledger.info(page_number(entry.addr()));
        if second.owner != owner {
            return Err(InvariantViolation::TableOwner {
                table: entry.addr(),
                expected: owner,
                found: second.owner,
            });
        }
        if second.refcount != 1 {
            return Err(InvariantViolation::SecondLevelRefcount {
                table: entry.addr(),
                found: second.refcount,
            });
        }
    }
    Ok(())
}

/// Counts every slot that holds a ledger reference and compares with the
/// ledger. Kernel and reserved pages below the process area are identity
/// mapped without references and are not audited.
fn check_conservation<M: PhysicalMemory + ?Sized>(
    ledger: &Ledger,
    procs: &ProcessTable,
    mem: &M,
    kernel_pagetable: PageTable,
) -> Result<(), InvariantViolation> {
    let mut references = [0usize; NPAGES];
    let count_tables = |pagetable: PageTable, references: &mut [usize; NPAGES]| {
        references[pagetable.page_number()] += 1;
        for index in 0..PAGETABLE_NENTRIES {
            let entry = read_entry(mem, pagetable.addr(), index);
            if entry.is_present() && entry.addr() < MEMSIZE_PHYSICAL {
                references[page_number(entry.addr())] += 1;
            }
        }
    };

    count_tables(kernel_pagetable, &mut references);
    for process in procs.live() {
        let Some(pagetable) = process.pagetable else {
            continue;
        };
        count_tables(pagetable, &mut references);
        for va in (PROC_START_ADDR..MEMSIZE_VIRTUAL).step_by(PAGE_SIZE) {
            if let Some(mapping) = lookup(mem, pagetable, va) {
                references[mapping.pn] += 1;
            }
        }
    }

    for (pn, info) in ledger.iter() {
        let audited = info.is_free() || matches!(info.owner, Owner::Process(_));
        if audited && references[pn] != info.refcount as usize {
            return Err(InvariantViolation::Conservation {
                pn,
                refcount: info.refcount,
                references: references[pn],
            });
        }
    }
    Ok(())
}
