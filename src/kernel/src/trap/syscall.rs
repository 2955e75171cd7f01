//! System calls.
//!
//! Arguments arrive in the saved `eax` of the current process and results
//! are written back there. Resource exhaustion is never fatal: it becomes
//! [`SYSCALL_FAILED`] in the caller's `eax`.

use alloc::string::String;

use tilia_common::layout::{
    is_page_aligned, page_address, page_number, MEMSIZE_VIRTUAL, PAGE_SIZE, PROC_START_ADDR,
};
use tilia_common::pid::NPROC;
use tilia_common::trap::SYSCALL_FAILED;
use tilia_common::{Fatal, KernelError, PageFlags, Pid};
use tilia_hal::Platform;

use crate::kernel::Kernel;
use crate::memory::{Owner, PageTable, Vm};
use crate::process::ProcState;

/// Longest panic message read from user memory.
pub const PANIC_MESSAGE_MAX: usize = 160;

/// Allocates a fresh page to `pid` and maps it at `addr` user-writable.
///
/// `counted` says whether `pagetable` holds ledger references for its user
/// mappings (it does unless it is the shared kernel table); if so, a page
/// already mapped at `addr` loses that reference.
pub(crate) fn page_alloc(
    vm: &mut Vm<'_>,
    pagetable: PageTable,
    counted: bool,
    pid: Pid,
    addr: usize,
) -> Result<(), KernelError> {
    if !is_page_aligned(addr) {
        return Err(KernelError::Misaligned);
    }
    if !(PROC_START_ADDR..MEMSIZE_VIRTUAL).contains(&addr) {
        return Err(KernelError::OutOfRange);
    }
    let previous = if counted {
        vm.lookup(pagetable, addr)
    } else {
        None
    };
    let page = vm.ledger_mut().find_free_and_allocate(Owner::Process(pid))?;
    if let Err(err) = vm.map_page(pagetable, addr, page, PageFlags::USER_RW) {
        vm.ledger_mut().release(page)?;
        return Err(err);
    }
    if let Some(previous) = previous {
        vm.ledger_mut().release(page_address(previous.pn))?;
    }
    log::trace!("process {}: page {:#x} at {:#x}", pid, page, addr);
    Ok(())
}

impl<P: Platform> Kernel<P> {
    /// `sys_page_alloc(addr)`.
    pub(crate) fn sys_page_alloc(&mut self) {
        let pid = self.current;
        let process = *self.procs.get(pid);
        let addr = process.regs.eax as usize;
        let result = match process.pagetable {
            Some(pagetable) => {
                let counted = pagetable != self.kernel_pagetable;
                let mut vm = Vm::new(&mut self.ledger, &mut self.platform);
                page_alloc(&mut vm, pagetable, counted, pid, addr)
            }
            None => Err(KernelError::NotMapped),
        };
        self.procs.get_mut(pid).regs.eax = match result {
            Ok(()) => 0,
            Err(err) => {
                log::debug!("process {}: page_alloc({:#x}) failed: {}", pid, addr, err);
                SYSCALL_FAILED
            }
        };
    }

    /// `sys_fork()`.
    ///
    /// Slots are scanned from 1 in index order; the "no free slot" answer is
    /// given when the scan reaches the last slot.
    pub(crate) fn sys_fork(&mut self) {
        let parent = self.current;
        for child in Pid::all().skip(1) {
            if self.procs.get(child).state == ProcState::Free {
                let eax = match self.fork_into(parent, child) {
                    Ok(()) => {
                        log::debug!("process {}: forked {}", parent, child);
                        child.into()
                    }
                    Err(err) => {
                        log::warn!("process {}: fork failed: {}", parent, err);
                        SYSCALL_FAILED
                    }
                };
                self.procs.get_mut(parent).regs.eax = eax;
                break;
            } else if child.slot() == NPROC - 1 {
                log::debug!("process {}: fork failed: {}", parent, KernelError::NoFreeSlot);
                self.procs.get_mut(parent).regs.eax = SYSCALL_FAILED;
            }
        }
    }

    /// Makes `child` a copy of `parent`. On failure every reference the
    /// child took is released and the slot is free again.
    fn fork_into(&mut self, parent: Pid, child: Pid) -> Result<(), KernelError> {
        let parent_pagetable = self
            .procs
            .get(parent)
            .pagetable
            .ok_or(KernelError::NotMapped)?;
        let mut vm = Vm::new(&mut self.ledger, &mut self.platform);

        self.procs.get_mut(child).set_state(ProcState::Runnable);
        let child_pagetable = match vm.copy(parent_pagetable, Owner::Process(child)) {
            Ok(pagetable) => pagetable,
            Err(err) => {
                self.procs.get_mut(child).set_state(ProcState::Free);
                return Err(err);
            }
        };

        if let Err(err) = populate(&mut vm, parent, parent_pagetable, child, child_pagetable) {
            self.procs.get_mut(child).set_state(ProcState::Free);
            vm.release(child_pagetable, PROC_START_ADDR, MEMSIZE_VIRTUAL)?;
            return Err(err);
        }

        let mut regs = self.procs.get(parent).regs;
        regs.eax = 0;
        let process = self.procs.get_mut(child);
        process.pagetable = Some(child_pagetable);
        process.regs = regs;
        Ok(())
    }

    /// `sys_panic(msg)`: the message is read through the caller's page
    /// table.
    pub(crate) fn sys_panic(&mut self) -> Fatal {
        let pid = self.current;
        let process = *self.procs.get(pid);
        let addr = process.regs.eax as usize;
        let message = match process.pagetable {
            Some(pagetable) => {
                let vm = Vm::new(&mut self.ledger, &mut self.platform);
                read_message(&vm, pagetable, addr)
            }
            None => None,
        }
        .unwrap_or_else(|| alloc::format!("<unreadable message at {:#x}>", addr));
        Fatal::UserPanic { pid, message }
    }
}

/// Fills the user region of `child` from `parent`.
///
/// Writable pages the parent owns are copied; read-only pages it owns are
/// shared. Everything else stays unmapped in the child.
fn populate(
    vm: &mut Vm<'_>,
    parent: Pid,
    parent_pagetable: PageTable,
    child: Pid,
    child_pagetable: PageTable,
) -> Result<(), KernelError> {
    vm.map(
        child_pagetable,
        PROC_START_ADDR,
        0,
        MEMSIZE_VIRTUAL - PROC_START_ADDR,
        PageFlags::empty(),
    )?;

    for va in (PROC_START_ADDR..MEMSIZE_VIRTUAL).step_by(PAGE_SIZE) {
        let Some(mapping) = vm.lookup(parent_pagetable, va) else {
            continue;
        };
        let info = vm.ledger().info(mapping.pn);
        if info.is_free() || info.owner != Owner::Process(parent) {
            continue;
        }

        if mapping.perm.contains(PageFlags::WRITABLE) {
            let page = vm.ledger_mut().find_free_and_allocate(Owner::Process(child))?;
            vm.copy_frame(mapping.pn, page_number(page));
            if let Err(err) = vm.map_page(child_pagetable, va, page, mapping.perm) {
                vm.ledger_mut().release(page)?;
                return Err(err);
            }
        } else {
            let page = page_address(mapping.pn);
            vm.ledger_mut().increment(page)?;
            if let Err(err) = vm.map_page(child_pagetable, va, page, mapping.perm) {
                vm.ledger_mut().release(page)?;
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Reads a NUL-terminated message of at most [`PANIC_MESSAGE_MAX`] bytes.
fn read_message(vm: &Vm<'_>, pagetable: PageTable, addr: usize) -> Option<String> {
    let mut bytes = [0u8; PANIC_MESSAGE_MAX];
    let mut len = 0;
    while len < PANIC_MESSAGE_MAX {
        let mut byte = [0u8];
        vm.read_user(pagetable, addr.checked_add(len)?, &mut byte).ok()?;
        if byte[0] == 0 {
            break;
        }
        bytes[len] = byte[0];
        len += 1;
    }
    Some(String::from_utf8_lossy(&bytes[..len]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ledger;
    use crate::testutil::Frames;

    fn pid(slot: usize) -> Pid {
        Pid::new(slot).unwrap()
    }

    #[test]
    fn test_page_alloc_validates_address() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(Owner::Process(pid(1))).unwrap();
        let used = vm.ledger().used_pages();
        assert_eq!(
            page_alloc(&mut vm, pt, true, pid(1), PROC_START_ADDR + 12),
            Err(KernelError::Misaligned)
        );
        assert_eq!(
            page_alloc(&mut vm, pt, true, pid(1), PROC_START_ADDR - PAGE_SIZE),
            Err(KernelError::OutOfRange)
        );
        assert_eq!(
            page_alloc(&mut vm, pt, true, pid(1), MEMSIZE_VIRTUAL),
            Err(KernelError::OutOfRange)
        );
        assert_eq!(vm.ledger().used_pages(), used);
    }

    #[test]
    fn test_page_alloc_replaces_previous_page() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(Owner::Process(pid(1))).unwrap();
        let va = PROC_START_ADDR + 4 * PAGE_SIZE;

        page_alloc(&mut vm, pt, true, pid(1), va).unwrap();
        let first = vm.lookup(pt, va).unwrap();
        let used = vm.ledger().used_pages();
        page_alloc(&mut vm, pt, true, pid(1), va).unwrap();
        let second = vm.lookup(pt, va).unwrap();

        assert_ne!(first.pn, second.pn);
        assert!(vm.ledger().info(first.pn).is_free());
        assert_eq!(vm.ledger().used_pages(), used);
        assert_eq!(second.perm, PageFlags::USER_RW);
        assert_eq!(vm.ledger().owner(second.pn), Owner::Process(pid(1)));
    }

    #[test]
    fn test_read_message_stops_at_nul_and_limit() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(Owner::Process(pid(1))).unwrap();
        page_alloc(&mut vm, pt, true, pid(1), PROC_START_ADDR).unwrap();

        vm.write_through(pt, PROC_START_ADDR, b"out of slots\0junk").unwrap();
        assert_eq!(
            read_message(&vm, pt, PROC_START_ADDR).as_deref(),
            Some("out of slots")
        );

        vm.write_through(pt, PROC_START_ADDR, &[b'x'; 200]).unwrap();
        let long = read_message(&vm, pt, PROC_START_ADDR).unwrap();
        assert_eq!(long.len(), PANIC_MESSAGE_MAX);

        assert!(read_message(&vm, pt, PROC_START_ADDR + PAGE_SIZE).is_none());
    }
}
