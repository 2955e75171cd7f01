//! Two-level page tables.
//!
//! A top-level table and its second-level tables are ordinary physical
//! pages taken from the [`Ledger`], each holding 1024 little-endian 32-bit
//! entries: the physical page address in bits 12..32, [`PageFlags`] in the
//! low bits. Top-level slot `va >> 22` covers 4 MiB; the whole virtual
//! address space fits under slot 0, so a process has exactly one
//! second-level table.

use tilia_common::layout::{
    is_page_aligned, page_address, page_number, page_offset, MEMSIZE_PHYSICAL, MEMSIZE_VIRTUAL,
    PAGE_SIZE,
};
use tilia_common::{KernelError, PageFlags};
use tilia_hal::PhysicalMemory;

use super::ledger::{Ledger, Owner};

const ADDR_MASK: u32 = !(PAGE_SIZE as u32 - 1);
const FLAG_MASK: u32 = PAGE_SIZE as u32 - 1;

/// Handle to a top-level page table: its physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTable(usize);

impl PageTable {
    /// Wraps the page-aligned physical address of a top-level table.
    pub const fn from_addr(addr: usize) -> Self {
        PageTable(addr)
    }

    /// Physical address of the table.
    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Physical page number of the table.
    #[inline]
    pub const fn page_number(self) -> usize {
        page_number(self.0)
    }
}

/// One 32-bit page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// The not-present entry.
    pub const EMPTY: PageEntry = PageEntry(0);

    /// Entry pointing at physical address `addr` with `flags`.
    pub const fn new(addr: usize, flags: PageFlags) -> Self {
        PageEntry((addr as u32 & ADDR_MASK) | flags.bits())
    }

    /// Physical address the entry points at.
    #[inline]
    pub const fn addr(self) -> usize {
        (self.0 & ADDR_MASK) as usize
    }

    /// Permission bits.
    #[inline]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & FLAG_MASK)
    }

    /// `true` if the Present bit is set.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    /// Raw entry value.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Result of translating a virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Physical page number.
    pub pn: usize,
    /// Physical address, including the offset within the page.
    pub pa: usize,
    /// Permission bits of the second-level entry.
    pub perm: PageFlags,
}

/// Top-level index of `va`.
#[inline]
pub const fn directory_index(va: usize) -> usize {
    (va >> 22) & 0x3ff
}

/// Second-level index of `va`.
#[inline]
pub const fn table_index(va: usize) -> usize {
    (va >> 12) & 0x3ff
}

/// Reads entry `index` of the table page at `table`.
pub fn read_entry<M: PhysicalMemory + ?Sized>(mem: &M, table: usize, index: usize) -> PageEntry {
    let frame = mem.frame(page_number(table));
    let at = index * 4;
    PageEntry(u32::from_le_bytes([
        frame[at],
        frame[at + 1],
        frame[at + 2],
        frame[at + 3],
    ]))
}

/// Writes entry `index` of the table page at `table`.
pub fn write_entry<M: PhysicalMemory + ?Sized>(
    mem: &mut M,
    table: usize,
    index: usize,
    entry: PageEntry,
) {
    let frame = mem.frame_mut(page_number(table));
    let at = index * 4;
    frame[at..at + 4].copy_from_slice(&entry.0.to_le_bytes());
}

/// Translates `va` through `pagetable`. Pure; `None` if no present
/// mapping covers the address.
pub fn lookup<M: PhysicalMemory + ?Sized>(
    mem: &M,
    pagetable: PageTable,
    va: usize,
) -> Option<Mapping> {
    let l1 = read_entry(mem, pagetable.addr(), directory_index(va));
    if !l1.is_present() || l1.addr() >= MEMSIZE_PHYSICAL {
        return None;
    }
    let l2 = read_entry(mem, l1.addr(), table_index(va));
    if !l2.is_present() || l2.addr() >= MEMSIZE_PHYSICAL {
        return None;
    }
    Some(Mapping {
        pn: page_number(l2.addr()),
        pa: l2.addr() + page_offset(va),
        perm: l2.flags(),
    })
}

/// Mutable view over the ledger and physical memory, through which every
/// page table change is made.
pub struct Vm<'a> {
    ledger: &'a mut Ledger,
    mem: &'a mut dyn PhysicalMemory,
}

impl<'a> Vm<'a> {
    /// Creates a view.
    pub fn new(ledger: &'a mut Ledger, mem: &'a mut dyn PhysicalMemory) -> Self {
        Vm { ledger, mem }
    }

    /// The ledger.
    pub fn ledger(&self) -> &Ledger {
        &*self.ledger
    }

    /// The ledger, mutably.
    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut *self.ledger
    }

    /// Physical memory.
    pub fn mem(&self) -> &dyn PhysicalMemory {
        &*self.mem
    }

    /// Allocates a zeroed page for `owner` and returns its address.
    pub fn alloc_zeroed(&mut self, owner: Owner) -> Result<usize, KernelError> {
        let addr = self.ledger.find_free_and_allocate(owner)?;
        self.mem.frame_mut(page_number(addr)).fill(0);
        Ok(addr)
    }

    /// Allocates an empty top-level table for `owner`.
    pub fn create(&mut self, owner: Owner) -> Result<PageTable, KernelError> {
        self.alloc_zeroed(owner).map(PageTable)
    }

    /// Maps every page of `[va, va + len)` to the matching page of
    /// `[pa, pa + len)` with `perm`. Empty `perm` unmaps.
    ///
    /// A missing second-level table is allocated to the top-level table's
    /// owner.
    pub fn map(
        &mut self,
        pagetable: PageTable,
        va: usize,
        pa: usize,
        len: usize,
        perm: PageFlags,
    ) -> Result<(), KernelError> {
        if !is_page_aligned(va) || !is_page_aligned(pa) || !is_page_aligned(len) {
            return Err(KernelError::Misaligned);
        }
        match va.checked_add(len) {
            Some(end) if end <= MEMSIZE_VIRTUAL => {}
            _ => return Err(KernelError::OutOfRange),
        }
        if !perm.is_empty() && pa + len > MEMSIZE_PHYSICAL {
            return Err(KernelError::OutOfRange);
        }

        for offset in (0..len).step_by(PAGE_SIZE) {
            let (va, pa) = (va + offset, pa + offset);
            let dir = read_entry(&*self.mem, pagetable.addr(), directory_index(va));
            let table = if dir.is_present() {
                dir.addr()
            } else if perm.is_empty() {
                continue;
            } else {
                let owner = self.ledger.owner(pagetable.page_number());
                let table = self.alloc_zeroed(owner)?;
                write_entry(
                    &mut *self.mem,
                    pagetable.addr(),
                    directory_index(va),
                    PageEntry::new(table, PageFlags::USER_RW),
                );
                table
            };
            let entry = if perm.is_empty() {
                PageEntry::EMPTY
            } else {
                PageEntry::new(pa, perm)
            };
            write_entry(&mut *self.mem, table, table_index(va), entry);
        }
        Ok(())
    }

    /// Maps a single page.
    pub fn map_page(
        &mut self,
        pagetable: PageTable,
        va: usize,
        pa: usize,
        perm: PageFlags,
    ) -> Result<(), KernelError> {
        self.map(pagetable, va, pa, PAGE_SIZE, perm)
    }

    /// Allocates a new top-level and second-level table for `owner` and
    /// fills them with a copy of `source`'s top level and of the
    /// second-level table under its first slot.
    ///
    /// On failure nothing stays allocated; callers fall back to sharing.
    pub fn copy(&mut self, source: PageTable, owner: Owner) -> Result<PageTable, KernelError> {
        let top = self.ledger.find_free_and_allocate(owner)?;
        let second = match self.ledger.find_free_and_allocate(owner) {
            Ok(addr) => addr,
            Err(err) => {
                self.ledger.release(top)?;
                return Err(err);
            }
        };

        self.copy_frame(source.page_number(), page_number(top));
        let first = read_entry(&*self.mem, source.addr(), 0);
        if first.is_present() {
            self.copy_frame(page_number(first.addr()), page_number(second));
        } else {
            self.mem.frame_mut(page_number(second)).fill(0);
        }
        write_entry(&mut *self.mem, top, 0, PageEntry::new(second, PageFlags::USER_RW));
        log::trace!("copied page table {:#x} -> {:#x} for {}", source.addr(), top, owner);
        Ok(PageTable(top))
    }

    /// Drops every reference held by `pagetable`: the pages it maps in
    /// `[start, end)`, its first second-level table and the table itself.
    pub fn release(
        &mut self,
        pagetable: PageTable,
        start: usize,
        end: usize,
    ) -> Result<(), KernelError> {
        for va in (start..end).step_by(PAGE_SIZE) {
            if let Some(mapping) = self.lookup(pagetable, va) {
                self.map_page(pagetable, va, 0, PageFlags::empty())?;
                self.ledger.release(page_address(mapping.pn))?;
            }
        }
        let first = read_entry(&*self.mem, pagetable.addr(), 0);
        if first.is_present() {
            write_entry(&mut *self.mem, pagetable.addr(), 0, PageEntry::EMPTY);
            self.ledger.release(first.addr())?;
        }
        self.ledger.release(pagetable.addr())
    }

    /// Translates `va` through `pagetable`.
    pub fn lookup(&self, pagetable: PageTable, va: usize) -> Option<Mapping> {
        lookup(&*self.mem, pagetable, va)
    }

    /// Copies the contents of physical page `from` into physical page `to`.
    pub fn copy_frame(&mut self, from: usize, to: usize) {
        let contents = *self.mem.frame(from);
        *self.mem.frame_mut(to) = contents;
    }

    /// Reads `buf.len()` bytes at user address `va` through `pagetable`.
    /// Requires user access to every page touched.
    pub fn read_user(
        &self,
        pagetable: PageTable,
        va: usize,
        buf: &mut [u8],
    ) -> Result<(), KernelError> {
        let mut done = 0;
        while done < buf.len() {
            let at = va + done;
            let mapping = self
                .lookup(pagetable, at)
                .filter(|m| m.perm.contains(PageFlags::USER))
                .ok_or(KernelError::NotMapped)?;
            let offset = page_offset(at);
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            buf[done..done + chunk]
                .copy_from_slice(&self.mem.frame(mapping.pn)[offset..offset + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Writes `bytes` at address `va` through `pagetable`, bypassing the
    /// Writable bit (used to load read-only program text).
    pub fn write_through(
        &mut self,
        pagetable: PageTable,
        va: usize,
        bytes: &[u8],
    ) -> Result<(), KernelError> {
        let mut done = 0;
        while done < bytes.len() {
            let at = va + done;
            let mapping = self.lookup(pagetable, at).ok_or(KernelError::NotMapped)?;
            let offset = page_offset(at);
            let chunk = (PAGE_SIZE - offset).min(bytes.len() - done);
            self.mem.frame_mut(mapping.pn)[offset..offset + chunk]
                .copy_from_slice(&bytes[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Frames;
    use tilia_common::layout::{NPAGES, PROC_START_ADDR};
    use tilia_common::Pid;

    fn owner(slot: usize) -> Owner {
        Owner::Process(Pid::new(slot).unwrap())
    }

    #[test]
    fn test_entry_encoding() {
        let entry = PageEntry::new(0x12_3000, PageFlags::USER_RW);
        assert_eq!(entry.bits(), 0x12_3007);
        assert_eq!(entry.addr(), 0x12_3000);
        assert_eq!(entry.flags(), PageFlags::USER_RW);
        assert!(entry.is_present());
        assert!(!PageEntry::EMPTY.is_present());
    }

    #[test]
    fn test_map_then_lookup() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(Owner::Kernel).unwrap();

        vm.map(pt, PROC_START_ADDR, 0x1_5000, 2 * PAGE_SIZE, PageFlags::USER_RO)
            .unwrap();
        let m = vm.lookup(pt, PROC_START_ADDR + PAGE_SIZE + 0x10).unwrap();
        assert_eq!(m.pn, 0x16);
        assert_eq!(m.pa, 0x1_6010);
        assert_eq!(m.perm, PageFlags::USER_RO);
        assert!(vm.lookup(pt, PROC_START_ADDR + 2 * PAGE_SIZE).is_none());

        // the second-level table inherits the top-level owner
        let dir = read_entry(vm.mem(), pt.addr(), 0);
        assert_eq!(vm.ledger().owner(page_number(dir.addr())), Owner::Kernel);
        assert_eq!(vm.ledger().refcount(page_number(dir.addr())), 1);
    }

    #[test]
    fn test_map_empty_perm_unmaps() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(owner(1)).unwrap();
        vm.map_page(pt, PROC_START_ADDR, 0x1_5000, PageFlags::USER_RW).unwrap();
        vm.map_page(pt, PROC_START_ADDR, 0, PageFlags::empty()).unwrap();
        assert!(vm.lookup(pt, PROC_START_ADDR).is_none());
    }

    #[test]
    fn test_unmap_without_second_level_allocates_nothing() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(owner(1)).unwrap();
        let used = vm.ledger().used_pages();
        vm.map(pt, 0, 0, MEMSIZE_VIRTUAL, PageFlags::empty()).unwrap();
        assert_eq!(vm.ledger().used_pages(), used);
    }

    #[test]
    fn test_map_validates_arguments() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(owner(1)).unwrap();
        assert_eq!(
            vm.map_page(pt, PROC_START_ADDR + 1, 0x1_5000, PageFlags::USER_RW),
            Err(KernelError::Misaligned)
        );
        assert_eq!(
            vm.map_page(pt, MEMSIZE_VIRTUAL, 0x1_5000, PageFlags::USER_RW),
            Err(KernelError::OutOfRange)
        );
        assert_eq!(
            vm.map_page(pt, PROC_START_ADDR, MEMSIZE_PHYSICAL, PageFlags::USER_RW),
            Err(KernelError::OutOfRange)
        );
    }

    #[test]
    fn test_copy_duplicates_mappings_into_fresh_tables() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let source = vm.create(Owner::Kernel).unwrap();
        vm.map_page(source, PROC_START_ADDR, 0x1_5000, PageFlags::USER_RW).unwrap();

        let copy = vm.copy(source, owner(2)).unwrap();
        assert_ne!(copy, source);
        assert_eq!(vm.ledger().owner(copy.page_number()), owner(2));
        let dir = read_entry(vm.mem(), copy.addr(), 0);
        assert_eq!(vm.ledger().owner(page_number(dir.addr())), owner(2));
        assert_eq!(vm.lookup(copy, PROC_START_ADDR), vm.lookup(source, PROC_START_ADDR));

        // changing the copy leaves the source alone
        vm.map_page(copy, PROC_START_ADDR, 0, PageFlags::empty()).unwrap();
        assert!(vm.lookup(source, PROC_START_ADDR).is_some());
    }

    #[test]
    fn test_copy_failure_leaves_ledger_unchanged() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let source = {
            let mut vm = Vm::new(&mut ledger, &mut mem);
            vm.create(Owner::Kernel).unwrap()
        };
        // leave exactly one free page
        while ledger.used_pages() < NPAGES - 1 {
            ledger.find_free_and_allocate(owner(1)).unwrap();
        }
        let mut vm = Vm::new(&mut ledger, &mut mem);
        assert_eq!(vm.copy(source, owner(2)), Err(KernelError::OutOfMemory));
        assert_eq!(vm.ledger().used_pages(), NPAGES - 1);
    }

    #[test]
    fn test_release_returns_every_reference() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let before = vm.ledger().used_pages();
        let pt = vm.create(owner(1)).unwrap();
        let page = vm.ledger_mut().find_free_and_allocate(owner(1)).unwrap();
        vm.map_page(pt, PROC_START_ADDR, page, PageFlags::USER_RW).unwrap();
        assert_eq!(vm.ledger().used_pages(), before + 3);

        vm.release(pt, PROC_START_ADDR, MEMSIZE_VIRTUAL).unwrap();
        assert_eq!(vm.ledger().used_pages(), before);
        assert!(vm.ledger().info(page_number(page)).is_free());
    }

    #[test]
    fn test_user_reads_and_writes_cross_pages() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pt = vm.create(owner(1)).unwrap();
        vm.map(pt, PROC_START_ADDR, 0x1_5000, 2 * PAGE_SIZE, PageFlags::USER_RO)
            .unwrap();
        let va = PROC_START_ADDR + PAGE_SIZE - 3;
        vm.write_through(pt, va, b"hello").unwrap();
        let mut buf = [0u8; 5];
        vm.read_user(pt, va, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(
            vm.read_user(pt, PROC_START_ADDR + 2 * PAGE_SIZE, &mut buf),
            Err(KernelError::NotMapped)
        );
    }
}
