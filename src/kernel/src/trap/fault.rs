//! Page faults.

use tilia_common::layout::cpos;
use tilia_common::{Fatal, PageFaultCause, Registers};
use tilia_hal::Platform;

use crate::console::{self, ALERT};
use crate::kernel::Kernel;
use crate::process::ProcState;

impl<P: Platform> Kernel<P> {
    /// A fault in kernel mode stops the kernel; a fault in a process breaks
    /// that process only.
    pub(crate) fn page_fault(&mut self, regs: &Registers) -> Result<(), Fatal> {
        let addr = self.platform.fault_address();
        let cause = PageFaultCause::from_bits_truncate(regs.err);

        if !cause.contains(PageFaultCause::USER) {
            return Err(Fatal::KernelPageFault {
                addr,
                err: regs.err,
                eip: regs.eip,
            });
        }

        let pid = self.current;
        console::print_at(
            &mut self.platform,
            cpos(24, 0),
            ALERT,
            format_args!(
                "Process {} page fault for 0x{:08X} ({} {}, eip={:#x})!\n",
                pid,
                addr,
                cause.operation(),
                cause.problem(),
                regs.eip
            ),
        );
        log::warn!(
            "process {}: page fault for {:#010x} ({} {}, eip={:#x})",
            pid,
            addr,
            cause.operation(),
            cause.problem(),
            regs.eip
        );
        self.procs.get_mut(pid).set_state(ProcState::Broken);
        Ok(())
    }
}
