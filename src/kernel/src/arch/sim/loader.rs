//! Loader for the built-in programs.

use tilia_common::layout::PAGE_SIZE;
use tilia_common::{KernelError, PageFlags};

use super::programs;
use crate::process::{ProgramLoader, UserSpace};

/// Copies a built-in program to the start of the process's region and
/// makes its pages read-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimLoader;

impl ProgramLoader for SimLoader {
    fn load(&mut self, program: usize, space: &mut UserSpace<'_, '_>) -> Result<u32, KernelError> {
        let image = programs::image(program).ok_or(KernelError::OutOfRange)?;
        let start = space.region();
        space.write(start, image)?;
        let text = image.len().div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE;
        space.protect(start, text, PageFlags::USER_RO)?;
        log::debug!(
            "process {}: loaded program {} ({} bytes) at {:#x}",
            space.pid(),
            program,
            image.len(),
            start
        );
        Ok(start as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Ledger, Owner, Vm};
    use crate::testutil::Frames;
    use tilia_common::layout::proc_region_start;
    use tilia_common::Pid;

    #[test]
    fn test_load_writes_image_and_protects_text() {
        let mut ledger = Ledger::new(0x5_2000);
        let mut mem = Frames::new();
        let mut vm = Vm::new(&mut ledger, &mut mem);
        let pid = Pid::new(2).unwrap();
        let region = proc_region_start(2);
        let pt = vm.create(Owner::Process(pid)).unwrap();
        vm.map(pt, region, region, 2 * PAGE_SIZE, PageFlags::USER_RW).unwrap();

        let mut space = UserSpace::new(&mut vm, pt, pid);
        assert_eq!(SimLoader.load(0, &mut space), Ok(region as u32));
        assert_eq!(space.lookup(region).unwrap().perm, PageFlags::USER_RO);
        assert_eq!(space.lookup(region + PAGE_SIZE).unwrap().perm, PageFlags::USER_RW);
        assert_eq!(SimLoader.load(9, &mut space), Err(KernelError::OutOfRange));

        let image = programs::image(0).unwrap();
        let mut loaded = [0u8; 16];
        vm.read_user(pt, region, &mut loaded).unwrap();
        assert_eq!(&loaded[..], &image[..16]);
    }
}
