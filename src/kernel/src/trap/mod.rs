//! Trap dispatch.
//!
//! [`Kernel::trap`](crate::Kernel::trap) saves the registers, audits the
//! state and then hands the decoded trap to [`Kernel::dispatch`]. Yield and
//! the timer end in the scheduler right here; every other trap leaves the
//! choice of the next process to the caller.

mod fault;
pub mod syscall;

use tilia_common::{Fatal, Pid, Registers, TrapNumber};
use tilia_hal::Platform;

use crate::kernel::Kernel;

impl<P: Platform> Kernel<P> {
    /// Performs the request or fault described by `regs`.
    ///
    /// Returns the next process if the trap already scheduled one.
    pub(crate) fn dispatch(&mut self, regs: &Registers) -> Result<Option<Pid>, Fatal> {
        let trap = regs.trap().ok_or(Fatal::UnexpectedTrap(regs.intno))?;
        log::trace!("process {}: {}", self.current, trap);

        match trap {
            TrapNumber::Panic => return Err(self.sys_panic()),
            TrapNumber::GetPid => {
                let pid = self.current;
                self.procs.get_mut(pid).regs.eax = pid.into();
            }
            TrapNumber::Yield => return self.schedule().map(Some),
            TrapNumber::PageAlloc => self.sys_page_alloc(),
            TrapNumber::Fork => self.sys_fork(),
            TrapNumber::Timer => {
                self.ticks = self.ticks.wrapping_add(1);
                return self.schedule().map(Some);
            }
            TrapNumber::PageFault => self.page_fault(regs)?,
        }
        Ok(None)
    }
}
