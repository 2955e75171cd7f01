//! Physical page ledger.
//!
//! One [`PageInfo`] per physical page, indexed by page number. The
//! reference count is authoritative for allocability: a page with count 0
//! is free no matter what its (possibly stale) owner tag says. Every change
//! to a count goes through [`Ledger::allocate`], [`Ledger::increment`] or
//! [`Ledger::release`].

use core::fmt;

use tilia_common::layout::{
    is_page_aligned, is_reserved, page_address, page_number, KERNEL_START_ADDR,
    KERNEL_STACK_TOP, MEMSIZE_PHYSICAL, NPAGES, PAGE_SIZE,
};
use tilia_common::{KernelError, Pid};

/// Accounting owner of a physical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Owner {
    /// Nobody.
    #[default]
    Free,
    /// Hardware-owned memory (console, I/O hole), never allocable.
    Reserved,
    /// Kernel code, data, stack and page tables.
    Kernel,
    /// A process.
    Process(Pid),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Free => write!(f, "free"),
            Owner::Reserved => write!(f, "reserved"),
            Owner::Kernel => write!(f, "kernel"),
            Owner::Process(pid) => write!(f, "process {}", pid),
        }
    }
}

/// Ledger entry for one physical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageInfo {
    /// Who the page is accounted to.
    pub owner: Owner,
    /// Number of page table slots referencing the page.
    pub refcount: u8,
}

impl PageInfo {
    /// `true` if the page may be handed out.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.refcount == 0
    }
}

/// Per-page owner and reference count table.
#[derive(Clone)]
pub struct Ledger {
    pages: [PageInfo; NPAGES],
}

impl Ledger {
    /// Builds the boot-time ledger.
    ///
    /// Page 0 and the I/O hole are reserved, the kernel image
    /// `[KERNEL_START_ADDR, kernel_end)` and the kernel stack page belong to
    /// the kernel, and everything else is free.
    pub fn new(kernel_end: usize) -> Self {
        let mut pages = [PageInfo::default(); NPAGES];
        for (pn, info) in pages.iter_mut().enumerate() {
            let addr = page_address(pn);
            let owner = if is_reserved(addr) {
                Owner::Reserved
            } else if (KERNEL_START_ADDR..kernel_end).contains(&addr)
                || addr == KERNEL_STACK_TOP - PAGE_SIZE
            {
                Owner::Kernel
            } else {
                Owner::Free
            };
            *info = PageInfo {
                owner,
                refcount: (owner != Owner::Free) as u8,
            };
        }
        Ledger { pages }
    }

    /// Allocates the page at physical address `addr` to `owner`.
    ///
    /// Fails without side effects if `addr` is misaligned, out of range or
    /// already referenced.
    pub fn allocate(&mut self, addr: usize, owner: Owner) -> Result<(), KernelError> {
        if !is_page_aligned(addr) {
            return Err(KernelError::Misaligned);
        }
        if addr >= MEMSIZE_PHYSICAL {
            return Err(KernelError::OutOfRange);
        }
        let info = &mut self.pages[page_number(addr)];
        if !info.is_free() {
            return Err(KernelError::AlreadyAllocated);
        }
        *info = PageInfo { owner, refcount: 1 };
        Ok(())
    }

    /// Allocates the lowest-numbered free page to `owner` and returns its
    /// physical address.
    ///
    /// First-fit linear scan; physical memory is small enough that a free
    /// list buys nothing over an auditable scan.
    pub fn find_free_and_allocate(&mut self, owner: Owner) -> Result<usize, KernelError> {
        let pn = self
            .pages
            .iter()
            .position(PageInfo::is_free)
            .ok_or(KernelError::OutOfMemory)?;
        let addr = page_address(pn);
        self.allocate(addr, owner)?;
        log::trace!("ledger: page {:#x} -> {}", addr, owner);
        Ok(addr)
    }

    /// Adds a reference to an already referenced page. The owner is kept.
    ///
    /// Callers must have checked that sharing the page is legitimate.
    pub fn increment(&mut self, addr: usize) -> Result<(), KernelError> {
        let info = self.entry_mut(addr)?;
        if info.is_free() {
            return Err(KernelError::NotAllocated);
        }
        info.refcount = info
            .refcount
            .checked_add(1)
            .ok_or(KernelError::RefcountOverflow)?;
        Ok(())
    }

    /// Drops one reference to the page at `addr`. The owner tag is left
    /// stale once the count reaches 0.
    pub fn release(&mut self, addr: usize) -> Result<(), KernelError> {
        let info = self.entry_mut(addr)?;
        if info.is_free() {
            return Err(KernelError::NotAllocated);
        }
        info.refcount -= 1;
        Ok(())
    }

    /// Ledger entry of physical page `pn`.
    ///
    /// # Panics
    ///
    /// Panics if `pn >= NPAGES`.
    #[inline]
    pub fn info(&self, pn: usize) -> PageInfo {
        self.pages[pn]
    }

    /// Owner tag of physical page `pn`.
    #[inline]
    pub fn owner(&self, pn: usize) -> Owner {
        self.pages[pn].owner
    }

    /// Reference count of physical page `pn`.
    #[inline]
    pub fn refcount(&self, pn: usize) -> u8 {
        self.pages[pn].refcount
    }

    /// Iterates over `(page number, entry)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, PageInfo)> + '_ {
        self.pages.iter().copied().enumerate()
    }

    /// Number of pages with a nonzero reference count.
    pub fn used_pages(&self) -> usize {
        self.pages.iter().filter(|info| !info.is_free()).count()
    }

    /// Number of allocable pages.
    pub fn free_pages(&self) -> usize {
        NPAGES - self.used_pages()
    }

    fn entry_mut(&mut self, addr: usize) -> Result<&mut PageInfo, KernelError> {
        if addr >= MEMSIZE_PHYSICAL {
            return Err(KernelError::OutOfRange);
        }
        Ok(&mut self.pages[page_number(addr)])
    }
}
