//! Initial process creation.

use tilia_common::layout::{
    proc_region_start, MEMSIZE_VIRTUAL, PAGE_SIZE, PROC_START_ADDR,
};
use tilia_common::{Fatal, KernelError, PageFlags, Pid, Registers};
use tilia_hal::Platform;

use super::{ProcState, ProgramLoader, UserSpace};
use crate::kernel::Kernel;
use crate::memory::{Owner, PageTable, Vm};
use crate::trap::syscall::page_alloc;

/// Pages of the reserved region claimed before loading: text and data.
const REGION_PAGES: usize = 2;

impl<P: Platform> Kernel<P> {
    /// Loads program `program` as process `pid`: gives it an address space,
    /// its region pages, the program image, a stack page, and marks it
    /// runnable.
    pub(crate) fn process_setup(
        &mut self,
        pid: Pid,
        program: usize,
        loader: &mut dyn ProgramLoader,
    ) -> Result<(), Fatal> {
        let load_failed = |err: KernelError| {
            log::error!("process {}: cannot load program {}: {}", pid, program, err);
            Fatal::LoadFailed { pid, program }
        };
        let kernel_pagetable = self.kernel_pagetable;
        let mut vm = Vm::new(&mut self.ledger, &mut self.platform);

        let pagetable = address_space(&mut vm, kernel_pagetable, pid).map_err(load_failed)?;
        let process = self.procs.get_mut(pid);
        process.pagetable = Some(pagetable);
        process.set_state(ProcState::Runnable);

        let entry = {
            let mut space = UserSpace::new(&mut vm, pagetable, pid);
            loader.load(program, &mut space).map_err(load_failed)?
        };
        process.regs = Registers::user(entry, MEMSIZE_VIRTUAL as u32);

        let stack = MEMSIZE_VIRTUAL - PAGE_SIZE;
        if let Err(err) = page_alloc(&mut vm, pagetable, pagetable != kernel_pagetable, pid, stack) {
            log::warn!("process {}: no stack page: {}", pid, err);
        }
        log::debug!(
            "process {}: program {} entry {:#x}, {} pages in use",
            pid,
            program,
            entry,
            vm.ledger().used_pages()
        );
        Ok(())
    }
}

/// Claims the region pages of `pid` and builds its address space.
///
/// Falls back to sharing the kernel's table when there is no memory for a
/// copy; the kernel table already maps the region.
fn address_space(
    vm: &mut Vm<'_>,
    kernel_pagetable: PageTable,
    pid: Pid,
) -> Result<PageTable, KernelError> {
    let owner = Owner::Process(pid);
    let region = proc_region_start(pid.slot());
    let len = REGION_PAGES * PAGE_SIZE;

    for page in (region..region + len).step_by(PAGE_SIZE) {
        if let Err(err) = vm.ledger_mut().allocate(page, owner) {
            for claimed in (region..page).step_by(PAGE_SIZE) {
                vm.ledger_mut().release(claimed)?;
            }
            return Err(err);
        }
    }

    match vm.copy(kernel_pagetable, owner) {
        Ok(pagetable) => {
            vm.map(
                pagetable,
                PROC_START_ADDR,
                0,
                MEMSIZE_VIRTUAL - PROC_START_ADDR,
                PageFlags::empty(),
            )?;
            vm.map(pagetable, region, region, len, PageFlags::USER_RW)?;
            Ok(pagetable)
        }
        Err(err) => {
            log::warn!("process {}: sharing the kernel page table ({})", pid, err);
            vm.ledger_mut().increment(kernel_pagetable.addr())?;
            Ok(kernel_pagetable)
        }
    }
}
