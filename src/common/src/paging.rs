//! Page table permission bits and page-fault cause bits.

use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Permission bits of a page table entry.
    ///
    /// An empty set means "not present"; mapping with it unmaps the page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct PageFlags: u32 {
        /// The entry maps a page.
        const PRESENT  = 1 << 0;
        /// Writes are allowed.
        const WRITABLE = 1 << 1;
        /// User mode may access the page.
        const USER     = 1 << 2;
    }
}

bitflags! {
    /// Cause bits pushed by the MMU on a page fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFaultCause: u32 {
        /// Protection violation on a present page (clear: missing page).
        const PRESENT = 1 << 0;
        /// The access was a write (clear: read).
        const WRITE   = 1 << 1;
        /// The access happened in user mode.
        const USER    = 1 << 2;
    }
}

impl PageFlags {
    /// Present, writable and user-accessible.
    pub const USER_RW: PageFlags = PageFlags::PRESENT
        .union(PageFlags::WRITABLE)
        .union(PageFlags::USER);

    /// Present and user-accessible, read-only.
    pub const USER_RO: PageFlags = PageFlags::PRESENT.union(PageFlags::USER);

    /// Present and writable, kernel only.
    pub const KERNEL_RW: PageFlags = PageFlags::PRESENT.union(PageFlags::WRITABLE);
}

impl PageFaultCause {
    /// `"write"` or `"read"`.
    pub fn operation(self) -> &'static str {
        if self.contains(PageFaultCause::WRITE) {
            "write"
        } else {
            "read"
        }
    }

    /// `"protection problem"` or `"missing page"`.
    pub fn problem(self) -> &'static str {
        if self.contains(PageFaultCause::PRESENT) {
            "protection problem"
        } else {
            "missing page"
        }
    }
}

impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(PageFlags::PRESENT) { "p" } else { "-" },
            if self.contains(PageFlags::WRITABLE) { "w" } else { "-" },
            if self.contains(PageFlags::USER) { "u" } else { "-" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values_match_hardware() {
        assert_eq!(PageFlags::USER_RW.bits(), 7);
        assert_eq!(PageFlags::USER_RO.bits(), 5);
        assert_eq!(PageFlags::KERNEL_RW.bits(), 3);
    }

    #[test]
    fn test_fault_cause_description() {
        let cause = PageFaultCause::from_bits_truncate(6);
        assert_eq!(cause.operation(), "write");
        assert_eq!(cause.problem(), "missing page");
        assert!(cause.contains(PageFaultCause::USER));
    }

    #[test]
    fn test_flags_display() {
        extern crate std;
        use std::string::ToString;
        assert_eq!(PageFlags::USER_RO.to_string(), "p-u");
        assert_eq!(PageFlags::empty().to_string(), "---");
    }
}
