//! Round-robin scheduling and liveness.

use tilia_common::layout::{proc_region_start, PAGE_SIZE};
use tilia_common::{Fatal, PageFaultCause, Pid, TrapNumber};
use tilia_hal::PhysicalMemory;
use tilia_kernel::arch::sim::programs::HEAP_OFFSET;
use tilia_kernel::arch::sim::{SimLoader, SimPlatform};
use tilia_kernel::memory::Owner;
use tilia_kernel::process::ProcState;
use tilia_kernel::testutil::{boot, run_until, syscall, test_config};
use tilia_kernel::{BootCommand, Kernel};

fn pid(slot: usize) -> Pid {
    Pid::new(slot).unwrap()
}

fn fault_current(kernel: &mut Kernel<SimPlatform>) -> Result<Pid, Fatal> {
    let mut regs = kernel.process(kernel.current()).regs;
    regs.intno = TrapNumber::PageFault.raw();
    regs.err = PageFaultCause::USER.bits();
    kernel.trap(&regs)
}

#[test]
fn yield_goes_round_robin() {
    let mut kernel = boot(BootCommand::Allocators).unwrap();
    let order: Vec<usize> = (0..6)
        .map(|_| syscall(&mut kernel, TrapNumber::Yield, 0).unwrap().slot())
        .collect();
    assert_eq!(order, vec![2, 3, 4, 1, 2, 3]);
}

#[test]
fn timer_counts_ticks_and_preempts() {
    let mut kernel = boot(BootCommand::Allocators).unwrap();
    assert_eq!(syscall(&mut kernel, TrapNumber::Timer, 0), Ok(pid(2)));
    assert_eq!(syscall(&mut kernel, TrapNumber::Timer, 0), Ok(pid(3)));
    assert_eq!(kernel.ticks(), 2);
}

#[test]
fn getpid_resumes_the_caller() {
    let mut kernel = boot(BootCommand::Allocators).unwrap();
    syscall(&mut kernel, TrapNumber::Yield, 0).unwrap();
    assert_eq!(syscall(&mut kernel, TrapNumber::GetPid, 0), Ok(pid(2)));
    assert_eq!(kernel.process(pid(2)).regs.eax, 2);
}

#[test]
fn broken_processes_are_skipped() {
    let mut kernel = boot(BootCommand::Allocators).unwrap();
    assert_eq!(syscall(&mut kernel, TrapNumber::Yield, 0), Ok(pid(2)));
    let spaces: Vec<Vec<_>> = [1, 3, 4]
        .iter()
        .map(|&slot| kernel.user_mappings(pid(slot)).collect())
        .collect();
    assert_eq!(fault_current(&mut kernel), Ok(pid(3)));
    assert_eq!(kernel.process(pid(2)).state, ProcState::Broken);
    for (&slot, space) in [1, 3, 4].iter().zip(&spaces) {
        assert_eq!(&kernel.user_mappings(pid(slot)).collect::<Vec<_>>(), space);
    }

    let order: Vec<usize> = (0..4)
        .map(|_| syscall(&mut kernel, TrapNumber::Yield, 0).unwrap().slot())
        .collect();
    assert_eq!(order, vec![4, 1, 3, 4]);
    // a broken process keeps its memory
    assert!(kernel.lookup(pid(2), proc_region_start(2)).is_some());
    assert!(kernel.check().is_ok());
}

#[test]
fn nothing_runnable_waits_for_abort() {
    let platform = SimPlatform::new().with_abort_budget(5_000);
    let config = test_config(BootCommand::Allocators);
    let mut kernel = Kernel::boot(platform, config, &mut SimLoader).unwrap();
    for next in 2..=4 {
        assert_eq!(fault_current(&mut kernel), Ok(pid(next)));
    }
    assert_eq!(fault_current(&mut kernel), Err(Fatal::AbortRequested));
    assert!(kernel.processes().live().all(|p| p.state == ProcState::Broken));
}

#[test]
fn every_allocator_makes_progress() {
    let mut kernel = boot(BootCommand::Allocators).unwrap();
    let heap = |slot: usize| proc_region_start(slot) + HEAP_OFFSET;
    let all_started = |kernel: &Kernel<SimPlatform>| {
        (1..=4).all(|slot| kernel.lookup(pid(slot), heap(slot) + PAGE_SIZE).is_some())
    };
    let steps = run_until(&mut kernel, 5_000, all_started).unwrap();
    assert!(steps.is_some(), "some allocator starved");

    for slot in 1..=4 {
        let pid = pid(slot);
        let page = kernel.lookup(pid, heap(slot)).unwrap();
        assert_eq!(kernel.ledger().owner(page.pn), Owner::Process(pid));
        assert_eq!(kernel.ledger().refcount(page.pn), 1);
        // each allocator stamps its pid into every page it gets
        assert_eq!(kernel.platform().frame(page.pn)[0], slot as u8);
    }
}

#[test]
fn allocators_fill_memory_without_breaking_invariants() {
    let mut kernel = boot(BootCommand::Allocators).unwrap();
    let full = |kernel: &Kernel<SimPlatform>| kernel.ledger().free_pages() == 0;
    let steps = run_until(&mut kernel, 20_000, full).unwrap();
    assert!(steps.is_some(), "memory never filled up");
    assert!(kernel.check().is_ok());

    // out of memory is not fatal; everybody idles
    let before = kernel.ticks();
    run_until(&mut kernel, 5_000, |k| k.ticks() > before + 2).unwrap();
    assert!(kernel.processes().live().all(|p| p.is_runnable()));
}
