//! Test infrastructure for the Tilia kernel.
//!
//! Boots kernels on the simulated platform and drives them one trap at a
//! time.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tilia_kernel::testutil::{boot, syscall};
//! ```

use tilia_common::{Fatal, KernelError, Pid, Registers, TrapNumber};

use crate::arch::sim::{SimLoader, SimPlatform};
use crate::config::{BootCommand, KernelConfig};
use crate::kernel::Kernel;
use crate::process::{ProgramLoader, UserSpace};

pub use crate::arch::sim::Frames;

/// Keyboard polls before a test kernel gives up on its own.
pub const ABORT_BUDGET: u64 = 1_000_000;

/// A register snapshot for trap `trap` with `eax` as its argument.
pub fn regs(trap: TrapNumber, eax: u32) -> Registers {
    Registers {
        eax,
        intno: trap.raw(),
        ..Registers::default()
    }
}

/// Loads nothing; every process starts at its region with empty pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLoader;

impl ProgramLoader for NullLoader {
    fn load(&mut self, _program: usize, space: &mut UserSpace<'_, '_>) -> Result<u32, KernelError> {
        Ok(space.region() as u32)
    }
}

/// Configuration for tests: no drawing, self-test on.
pub fn test_config(command: BootCommand) -> KernelConfig {
    KernelConfig::default()
        .with_command(command)
        .with_memshow(false)
        .with_selftest(true)
}

/// Boots the built-in programs for `command` on a fresh simulated machine.
pub fn boot(command: BootCommand) -> Result<Kernel<SimPlatform>, Fatal> {
    boot_with(test_config(command), &mut SimLoader)
}

/// Boots with an explicit configuration and loader.
pub fn boot_with(
    config: KernelConfig,
    loader: &mut dyn ProgramLoader,
) -> Result<Kernel<SimPlatform>, Fatal> {
    Kernel::boot(SimPlatform::new().with_abort_budget(ABORT_BUDGET), config, loader)
}

/// Makes the current process issue system call `trap` with argument `eax`,
/// as if it had just executed the trap instruction.
pub fn syscall(
    kernel: &mut Kernel<SimPlatform>,
    trap: TrapNumber,
    eax: u32,
) -> Result<Pid, Fatal> {
    let mut regs = kernel.process(kernel.current()).regs;
    regs.intno = trap.raw();
    regs.eax = eax;
    kernel.trap(&regs)
}

/// Steps `kernel` until `done` holds, at most `max_steps` times. Returns
/// the number of steps taken, or `None` if `done` never held.
pub fn run_until<F>(
    kernel: &mut Kernel<SimPlatform>,
    max_steps: usize,
    mut done: F,
) -> Result<Option<usize>, Fatal>
where
    F: FnMut(&Kernel<SimPlatform>) -> bool,
{
    for step in 0..max_steps {
        if done(kernel) {
            return Ok(Some(step));
        }
        kernel.step()?;
    }
    Ok(done(kernel).then_some(max_steps))
}
