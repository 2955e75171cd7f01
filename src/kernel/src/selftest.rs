//! Boot self-test.
//!
//! Sanity checks run against the freshly booted kernel, before the first
//! process is resumed.

use tilia_common::layout::{
    page_number, proc_region_start, CONSOLE_ADDR, KERNEL_START_ADDR, MEMSIZE_VIRTUAL, PAGE_SIZE,
};
use tilia_common::{Fatal, PageFlags, Pid};
use tilia_hal::Platform;

use crate::kernel::Kernel;
use crate::memory::{lookup, Owner};

type TestResult = Result<(), &'static str>;

/// Runs all self-tests.
pub fn run_all<P: Platform>(kernel: &Kernel<P>) -> Result<(), Fatal> {
    log::info!("Running kernel self-tests...");

    run("test_ledger_layout", test_ledger_layout(kernel))?;
    run("test_kernel_pagetable", test_kernel_pagetable(kernel))?;
    run("test_process_address_spaces", test_process_address_spaces(kernel))?;
    run("test_invariants_stable", test_invariants_stable(kernel))?;

    log::info!("All kernel self-tests passed!");
    Ok(())
}

fn run(name: &str, result: TestResult) -> Result<(), Fatal> {
    match result {
        Ok(()) => {
            log::info!("{}... [ok]", name);
            Ok(())
        }
        Err(what) => {
            log::error!("{}... [failed]: {}", name, what);
            Err(Fatal::Invariant(alloc::format!("self-test {}: {}", name, what)))
        }
    }
}

fn test_ledger_layout<P: Platform>(kernel: &Kernel<P>) -> TestResult {
    let ledger = kernel.ledger();
    if ledger.owner(0) != Owner::Reserved || ledger.owner(page_number(CONSOLE_ADDR)) != Owner::Reserved {
        return Err("reserved pages not reserved");
    }
    if ledger.owner(page_number(KERNEL_START_ADDR)) != Owner::Kernel {
        return Err("kernel image not owned by the kernel");
    }
    Ok(())
}

fn test_kernel_pagetable<P: Platform>(kernel: &Kernel<P>) -> TestResult {
    let pt = kernel.kernel_pagetable();
    let image = lookup(kernel.platform(), pt, KERNEL_START_ADDR).ok_or("kernel image unmapped")?;
    if image.perm.contains(PageFlags::USER) {
        return Err("kernel image user-accessible");
    }
    let console = lookup(kernel.platform(), pt, CONSOLE_ADDR).ok_or("console unmapped")?;
    if !console.perm.contains(PageFlags::USER) {
        return Err("console not user-accessible");
    }
    Ok(())
}

fn test_process_address_spaces<P: Platform>(kernel: &Kernel<P>) -> TestResult {
    for process in kernel.processes().live() {
        let pid: Pid = process.pid;
        if !kernel.has_own_pagetable(pid) {
            continue;
        }
        let region = proc_region_start(pid.slot());
        let text = kernel.lookup(pid, region).ok_or("region unmapped")?;
        if kernel.ledger().owner(text.pn) != Owner::Process(pid) {
            return Err("region page not owned by its process");
        }
        if kernel.lookup(pid, MEMSIZE_VIRTUAL - PAGE_SIZE).is_none() {
            return Err("no stack page");
        }
        if kernel.lookup(pid, KERNEL_START_ADDR).is_some_and(|m| m.perm.contains(PageFlags::USER)) {
            return Err("kernel visible to process");
        }
    }
    Ok(())
}

fn test_invariants_stable<P: Platform>(kernel: &Kernel<P>) -> TestResult {
    kernel.check().map_err(|_| "first audit failed")?;
    kernel.check().map_err(|_| "second audit failed")
}
