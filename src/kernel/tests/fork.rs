//! `sys_fork` on the simulated machine.

use tilia_common::layout::{proc_region_start, MEMSIZE_VIRTUAL, PAGE_SIZE, PROC_START_ADDR};
use tilia_common::pid::NPROC;
use tilia_common::trap::SYSCALL_FAILED;
use tilia_common::{PageFlags, Pid, TrapNumber};
use tilia_hal::PhysicalMemory;
use tilia_kernel::arch::sim::SimPlatform;
use tilia_kernel::memory::{Owner, PageInfo};
use tilia_kernel::process::ProcState;
use tilia_kernel::testutil::{boot, run_until, syscall};
use tilia_kernel::{BootCommand, Kernel};

fn pid(slot: usize) -> Pid {
    Pid::new(slot).unwrap()
}

fn snapshot(kernel: &Kernel<SimPlatform>) -> Vec<(usize, PageInfo)> {
    kernel.ledger().iter().collect()
}

const TEXT: usize = proc_region_start(1);
const DATA: usize = proc_region_start(1) + PAGE_SIZE;
const STACK: usize = MEMSIZE_VIRTUAL - PAGE_SIZE;

#[test]
fn fork_returns_child_pid_to_parent_and_zero_to_child() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    assert_eq!(syscall(&mut kernel, TrapNumber::Fork, 0), Ok(pid(1)));

    let child = kernel.process(pid(2));
    assert_eq!(child.state, ProcState::Runnable);
    assert_eq!(child.regs.eax, 0);
    assert_eq!(kernel.process(pid(1)).regs.eax, 2);
    assert_eq!(child.regs.eip, kernel.process(pid(1)).regs.eip);
    assert!(kernel.has_own_pagetable(pid(2)));
    assert!(kernel.check().is_ok());
}

#[test]
fn fork_copies_writable_pages_and_shares_read_only_ones() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    let used = kernel.ledger().used_pages();
    let text = kernel.lookup(pid(1), TEXT).unwrap();
    syscall(&mut kernel, TrapNumber::Fork, 0).unwrap();

    // shared text: same frame, one more reference, owner unchanged
    let child_text = kernel.lookup(pid(2), TEXT).unwrap();
    assert_eq!(child_text.pn, text.pn);
    assert_eq!(child_text.perm, PageFlags::USER_RO);
    assert_eq!(
        kernel.ledger().info(text.pn),
        PageInfo {
            owner: Owner::Process(pid(1)),
            refcount: 2
        }
    );

    // copied data and stack: fresh frames owned by the child
    for va in [DATA, STACK] {
        let parent = kernel.lookup(pid(1), va).unwrap();
        let child = kernel.lookup(pid(2), va).unwrap();
        assert_ne!(parent.pn, child.pn);
        assert_eq!(child.perm, parent.perm);
        assert_eq!(kernel.ledger().owner(child.pn), Owner::Process(pid(2)));
        assert_eq!(kernel.ledger().refcount(child.pn), 1);
    }

    // two table pages plus the data and stack copies
    assert_eq!(kernel.ledger().used_pages(), used + 4);
}

#[test]
fn forked_memory_is_isolated() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    let parent_data = kernel.lookup(pid(1), DATA).unwrap();
    kernel.platform_mut().frame_mut(parent_data.pn)[0] = 0xAA;
    syscall(&mut kernel, TrapNumber::Fork, 0).unwrap();

    let child_data = kernel.lookup(pid(2), DATA).unwrap();
    assert_eq!(kernel.platform().frame(child_data.pn)[0], 0xAA);

    kernel.platform_mut().frame_mut(parent_data.pn)[0] = 0x55;
    assert_eq!(kernel.platform().frame(child_data.pn)[0], 0xAA);
}

#[test]
fn fork_fails_cleanly_when_every_slot_is_taken() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    for child in 2..NPROC {
        syscall(&mut kernel, TrapNumber::Fork, 0).unwrap();
        assert_eq!(kernel.process(pid(1)).regs.eax, child as u32);
    }
    assert_eq!(kernel.processes().live().count(), NPROC - 1);

    let before = snapshot(&kernel);
    assert_eq!(syscall(&mut kernel, TrapNumber::Fork, 0), Ok(pid(1)));
    assert_eq!(kernel.process(pid(1)).regs.eax, SYSCALL_FAILED);
    assert_eq!(snapshot(&kernel), before);
    assert!(kernel.check().is_ok());
}

#[test]
fn fork_rolls_back_when_memory_runs_out() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    // leave room for the child's tables and one page copy, not the heap
    let mut va = PROC_START_ADDR;
    while kernel.ledger().free_pages() > 3 {
        if kernel.lookup(pid(1), va).is_none() {
            syscall(&mut kernel, TrapNumber::PageAlloc, va as u32).unwrap();
            assert_eq!(kernel.process(pid(1)).regs.eax, 0);
        }
        va += PAGE_SIZE;
    }
    let refcounts: Vec<u8> = kernel.ledger().iter().map(|(_, info)| info.refcount).collect();
    let mappings: Vec<_> = kernel.user_mappings(pid(1)).collect();

    assert_eq!(syscall(&mut kernel, TrapNumber::Fork, 0), Ok(pid(1)));
    assert_eq!(kernel.process(pid(1)).regs.eax, SYSCALL_FAILED);
    assert_eq!(kernel.process(pid(2)).state, ProcState::Free);
    let after: Vec<u8> = kernel.ledger().iter().map(|(_, info)| info.refcount).collect();
    assert_eq!(after, refcounts);
    assert_eq!(kernel.ledger().free_pages(), 3);
    assert_eq!(kernel.user_mappings(pid(1)).collect::<Vec<_>>(), mappings);
    assert!(kernel.check().is_ok());
}

#[test]
fn fork_program_builds_its_family() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    let family = |kernel: &Kernel<SimPlatform>| kernel.processes().live().count() == 4;
    let steps = run_until(&mut kernel, 200, family).unwrap();
    assert!(steps.is_some(), "fork program never forked twice");

    for slot in 1..=4 {
        assert!(kernel.process(pid(slot)).is_live());
    }
    // process 4 is forked by 2, which does not own the text page
    assert!(kernel.lookup(pid(3), TEXT).is_some());
    assert!(kernel.lookup(pid(4), TEXT).is_none());
    assert!(kernel.check().is_ok());
}

#[test]
fn grandchild_without_text_breaks_alone() {
    let mut kernel = boot(BootCommand::Fork).unwrap();
    let broken = |kernel: &Kernel<SimPlatform>| kernel.process(pid(4)).state == ProcState::Broken;
    let steps = run_until(&mut kernel, 2_000, broken).unwrap();
    assert!(steps.is_some(), "process 4 never ran");

    for slot in 1..=3 {
        assert!(kernel.process(pid(slot)).is_runnable());
    }
    assert!(kernel.platform().screen_text().contains("Process 4 page fault for 0x"));
    // the others keep running
    let before = kernel.ticks();
    let _ = run_until(&mut kernel, 2_000, |k| k.ticks() > before).unwrap();
    assert!(kernel.check().is_ok());
}
