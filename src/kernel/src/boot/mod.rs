//! Boot logging with status indicators, and the kernel page table.
//!
//! Boot messages go through the `log` facade with Linux-style status
//! brackets, so they land wherever [`crate::klog`] sends them.

use core::fmt;

use tilia_common::layout::{CONSOLE_ADDR, MEMSIZE_PHYSICAL, PAGE_SIZE, PROC_START_ADDR};
use tilia_common::{KernelError, PageFlags};

use crate::memory::{Owner, PageTable, Vm};

/// Boot status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Success - `[ OK ]`
    Ok,
    /// Failure - `[FAIL]`
    Fail,
    /// Warning - `[WARN]`
    Warn,
    /// Informational - `[INFO]`
    Info,
}

impl Status {
    fn level(self) -> log::Level {
        match self {
            Status::Ok | Status::Info => log::Level::Info,
            Status::Warn => log::Level::Warn,
            Status::Fail => log::Level::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Ok => "[ OK ]",
            Status::Fail => "[FAIL]",
            Status::Warn => "[WARN]",
            Status::Info => "[INFO]",
        };
        f.write_str(text)
    }
}

/// Log a boot stage with status.
///
/// Format: `[ OK ] Message text`
pub fn log(status: Status, message: &str) {
    log::log!(target: "boot", status.level(), "{} {}", status, message);
}

/// Log an indented detail line (for sub-items).
pub fn log_detail(message: &str) {
    log::info!(target: "boot", "       {}", message);
}

/// Builds the kernel's page table out of two kernel pages.
///
/// All physical memory is identity mapped; everything below the process
/// area is kernel-only except the console page.
pub fn build_kernel_pagetable(vm: &mut Vm<'_>) -> Result<PageTable, KernelError> {
    let pagetable = vm.create(Owner::Kernel)?;
    vm.map(pagetable, 0, 0, MEMSIZE_PHYSICAL, PageFlags::USER_RW)?;
    // processes can't touch kernel memory
    vm.map(pagetable, 0, 0, PROC_START_ADDR, PageFlags::KERNEL_RW)?;
    // except the console
    vm.map(pagetable, CONSOLE_ADDR, CONSOLE_ADDR, PAGE_SIZE, PageFlags::USER_RW)?;
    Ok(pagetable)
}
