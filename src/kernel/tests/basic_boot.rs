//! Boot-time state of the kernel on the simulated machine.

use tilia_common::layout::{proc_region_start, KERNEL_START_ADDR, MEMSIZE_VIRTUAL, PAGE_SIZE};
use tilia_common::{Fatal, PageFlags, Pid};
use tilia_kernel::arch::sim::SimPlatform;
use tilia_kernel::memory::Owner;
use tilia_kernel::process::ProcState;
use tilia_kernel::testutil::{boot, boot_with, test_config, NullLoader};
use tilia_kernel::{BootCommand, Kernel, KernelConfig};

fn pid(slot: usize) -> Pid {
    Pid::new(slot).unwrap()
}

#[test]
fn boots_four_allocators() {
    let kernel = boot(BootCommand::Allocators).unwrap();
    let live: Vec<usize> = kernel.processes().live().map(|p| p.pid.slot()).collect();
    assert_eq!(live, vec![1, 2, 3, 4]);
    assert_eq!(kernel.current(), pid(1));
    assert_eq!(kernel.ticks(), 0);
    assert!(kernel.check().is_ok());
}

#[test]
fn fork_command_starts_one_process() {
    let kernel = boot(BootCommand::Fork).unwrap();
    assert_eq!(kernel.processes().live().count(), 1);
    assert_eq!(kernel.process(pid(1)).state, ProcState::Runnable);
}

#[test]
fn every_process_gets_its_own_address_space() {
    let kernel = boot(BootCommand::Allocators).unwrap();
    let mut tables = Vec::new();
    for slot in 1..=4 {
        let pid = pid(slot);
        assert!(kernel.has_own_pagetable(pid));
        let table = kernel.process(pid).pagetable.unwrap();
        assert_eq!(kernel.ledger().owner(table.page_number()), Owner::Process(pid));
        assert!(!tables.contains(&table));
        tables.push(table);

        let text = kernel.lookup(pid, proc_region_start(slot)).unwrap();
        assert_eq!(text.perm, PageFlags::USER_RO);
        assert_eq!(kernel.ledger().owner(text.pn), Owner::Process(pid));

        let stack = kernel.lookup(pid, MEMSIZE_VIRTUAL - PAGE_SIZE).unwrap();
        assert_eq!(stack.perm, PageFlags::USER_RW);
        assert_eq!(kernel.process(pid).regs.esp as usize, MEMSIZE_VIRTUAL);
        assert_eq!(kernel.process(pid).regs.eip as usize, proc_region_start(slot));
    }
}

#[test]
fn processes_cannot_see_each_other_or_the_kernel() {
    let kernel = boot(BootCommand::Allocators).unwrap();
    for slot in 1..=4 {
        let pid = pid(slot);
        let image = kernel.lookup(pid, KERNEL_START_ADDR).unwrap();
        assert!(!image.perm.contains(PageFlags::USER));
        for other in (1..=4).filter(|&other| other != slot) {
            assert!(kernel.lookup(pid, proc_region_start(other)).is_none());
        }
    }
}

#[test]
fn user_mappings_are_owned_by_their_process() {
    let kernel = boot(BootCommand::Allocators).unwrap();
    for process in kernel.processes().live() {
        for (_, mapping) in kernel.user_mappings(process.pid) {
            let info = kernel.ledger().info(mapping.pn);
            assert_eq!(info.owner, Owner::Process(process.pid));
            assert_eq!(info.refcount, 1);
        }
    }
}

#[test]
fn unknown_program_fails_boot() {
    struct Missing;
    impl tilia_kernel::process::ProgramLoader for Missing {
        fn load(
            &mut self,
            _program: usize,
            _space: &mut tilia_kernel::process::UserSpace<'_, '_>,
        ) -> Result<u32, tilia_common::KernelError> {
            Err(tilia_common::KernelError::OutOfRange)
        }
    }
    let result = boot_with(test_config(BootCommand::Allocators), &mut Missing);
    assert!(matches!(
        result,
        Err(Fatal::LoadFailed { program: 0, .. })
    ));
}

#[test]
fn boot_draws_the_memory_map() {
    let config = KernelConfig::default().with_memshow(true);
    let mut kernel = Kernel::boot(SimPlatform::new(), config, &mut NullLoader).unwrap();
    let regs = kernel.process(pid(1)).regs;
    // a yield is enough to get one frame drawn
    let mut yielding = regs;
    yielding.intno = tilia_common::TrapNumber::Yield.raw();
    assert_eq!(kernel.trap(&yielding), Ok(pid(2)));
    let screen = kernel.platform().screen_text();
    assert!(screen.contains("PHYSICAL MEMORY"));
    assert!(screen.contains("VIRTUAL ADDRESS SPACE FOR"));
    assert!(screen.contains("0x000000 R"));
}
