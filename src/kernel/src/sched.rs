//! Round-robin scheduler.

use tilia_common::{Fatal, Pid};
use tilia_hal::Platform;

use crate::kernel::Kernel;

impl<P: Platform> Kernel<P> {
    /// Picks the first runnable slot after the current one, wrapping
    /// around, and makes it current.
    ///
    /// With nothing runnable this spins until the keyboard asks for an
    /// abort; there is no idle state.
    pub fn schedule(&mut self) -> Result<Pid, Fatal> {
        let mut pid = self.current;
        loop {
            pid = pid.next();
            if self.procs.get(pid).is_runnable() {
                return self.switch_to(pid);
            }
            self.poll_abort()?;
        }
    }

    /// Makes `pid` current after a final audit. The next
    /// [`step`](Self::step) resumes it.
    pub fn switch_to(&mut self, pid: Pid) -> Result<Pid, Fatal> {
        if !self.procs.get(pid).is_runnable() {
            return Err(Fatal::NotRunnable(pid));
        }
        self.current = pid;
        self.check()?;
        Ok(pid)
    }
}
