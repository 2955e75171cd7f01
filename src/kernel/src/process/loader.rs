//! Program loading.
//!
//! Loading a program image is the platform's job. The kernel hands the
//! loader a [`UserSpace`] view of the new process's address space and gets
//! back the entry point.

use tilia_common::layout::{page_address, proc_region_start, PAGE_SIZE};
use tilia_common::{KernelError, PageFlags, Pid};

use crate::memory::{Mapping, PageTable, Vm};

/// Populates a freshly set up process.
pub trait ProgramLoader {
    /// Loads program `program` into `space` and returns its entry point.
    fn load(&mut self, program: usize, space: &mut UserSpace<'_, '_>) -> Result<u32, KernelError>;
}

/// The address space of a process being loaded.
///
/// Writes go through the process's page table and ignore the Writable bit,
/// so a loader can fill a page and then make it read-only.
pub struct UserSpace<'v, 'a> {
    vm: &'v mut Vm<'a>,
    pagetable: PageTable,
    pid: Pid,
}

impl<'v, 'a> UserSpace<'v, 'a> {
    /// Wraps the address space of `pid`, rooted at `pagetable`.
    pub fn new(vm: &'v mut Vm<'a>, pagetable: PageTable, pid: Pid) -> Self {
        UserSpace { vm, pagetable, pid }
    }

    /// The process being loaded.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// First address of the process's reserved region.
    pub fn region(&self) -> usize {
        proc_region_start(self.pid.slot())
    }

    /// Translates `va`.
    pub fn lookup(&self, va: usize) -> Option<Mapping> {
        self.vm.lookup(self.pagetable, va)
    }

    /// Copies `bytes` to `va`. Every page touched must be mapped.
    pub fn write(&mut self, va: usize, bytes: &[u8]) -> Result<(), KernelError> {
        self.vm.write_through(self.pagetable, va, bytes)
    }

    /// Changes the permission of the mapped pages in `[va, va + len)`.
    /// Unmapping is not allowed here.
    pub fn protect(&mut self, va: usize, len: usize, perm: PageFlags) -> Result<(), KernelError> {
        if !perm.contains(PageFlags::PRESENT) {
            return Err(KernelError::InvalidPermission);
        }
        for page in (va..va + len).step_by(PAGE_SIZE) {
            let mapping = self.lookup(page).ok_or(KernelError::NotMapped)?;
            self.vm
                .map_page(self.pagetable, page, page_address(mapping.pn), perm)?;
        }
        Ok(())
    }
}
