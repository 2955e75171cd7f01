//! Physical and virtual memory layout.
//!
//! ```text
//!  +-------------- Base Memory --------------+
//!  v                                         v
//! +-----+--------------------+----------------+--------------------+---------/
//! |     | Kernel      Kernel |       :    I/O | App 1        App 1 | App 2
//! |     | Code + Data  Stack |  ...  : Memory | Code + Data  Stack | Code ...
//! +-----+--------------------+----------------+--------------------+---------/
//! 0  0x40000              0x80000 0xA0000 0x100000             0x140000
//! ```

/// Size of a page (and of a physical page frame) in bytes.
pub const PAGE_SIZE: usize = 0x1000;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: usize = 12;

/// Bytes of physical memory managed by the kernel.
pub const MEMSIZE_PHYSICAL: usize = 0x20_0000;

/// Bytes of virtual address space given to every process.
pub const MEMSIZE_VIRTUAL: usize = 0x30_0000;

/// Number of physical pages.
pub const NPAGES: usize = MEMSIZE_PHYSICAL / PAGE_SIZE;

/// Number of 32-bit entries in one page table page.
pub const PAGETABLE_NENTRIES: usize = PAGE_SIZE / 4;

/// First byte of the kernel image.
pub const KERNEL_START_ADDR: usize = 0x4_0000;

/// Top of the kernel stack; the page just below it is the kernel stack page.
pub const KERNEL_STACK_TOP: usize = 0x8_0000;

/// Start of the I/O hole.
pub const IO_PHYS_MEM: usize = 0xA_0000;

/// End of the I/O hole.
pub const EXT_PHYS_MEM: usize = 0x10_0000;

/// Physical (and identity-mapped virtual) address of the CGA text console.
pub const CONSOLE_ADDR: usize = 0xB_8000;

/// Width of the text console in cells.
pub const CONSOLE_COLUMNS: usize = 80;

/// Height of the text console in cells.
pub const CONSOLE_ROWS: usize = 25;

/// Lowest virtual address a process may own.
pub const PROC_START_ADDR: usize = 0x10_0000;

/// Size of the reserved region each initial process is loaded into.
pub const PROC_SIZE: usize = 0x4_0000;

/// Returns the physical page number containing `addr`.
#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr >> PAGE_SHIFT
}

/// Returns the first address of page `pn`.
#[inline]
pub const fn page_address(pn: usize) -> usize {
    pn << PAGE_SHIFT
}

/// Returns the offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// Returns `true` if `addr` is the first byte of a page.
#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

/// Returns `true` if `addr` is hardware-owned memory that is never allocable.
pub const fn is_reserved(addr: usize) -> bool {
    addr < PAGE_SIZE || (addr >= IO_PHYS_MEM && addr < EXT_PHYS_MEM)
}

/// Returns the cell index of `(row, col)` on the text console.
#[inline]
pub const fn cpos(row: usize, col: usize) -> usize {
    row * CONSOLE_COLUMNS + col
}

/// Returns the first address of the reserved region for process `pid`.
#[inline]
pub const fn proc_region_start(pid: usize) -> usize {
    PROC_START_ADDR + (pid - 1) * PROC_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_arithmetic() {
        assert_eq!(page_number(0x1234), 1);
        assert_eq!(page_address(0xB8), CONSOLE_ADDR);
        assert_eq!(page_offset(0x1234), 0x234);
        assert!(is_page_aligned(PROC_START_ADDR));
        assert!(!is_page_aligned(PROC_START_ADDR + 4));
    }

    #[test]
    fn test_reserved_ranges() {
        assert!(is_reserved(0));
        assert!(is_reserved(CONSOLE_ADDR));
        assert!(!is_reserved(PAGE_SIZE));
        assert!(!is_reserved(KERNEL_START_ADDR));
        assert!(!is_reserved(EXT_PHYS_MEM));
    }

    #[test]
    fn test_initial_regions_fit_in_physical_memory() {
        assert_eq!(proc_region_start(1), PROC_START_ADDR);
        assert_eq!(proc_region_start(4) + PROC_SIZE, MEMSIZE_PHYSICAL);
    }
}
