//! The kernel context.
//!
//! [`Kernel`] owns every piece of global state: the platform, the page
//! ledger, the process table, the kernel's page table and the scheduler
//! state. The trap dispatcher, scheduler and process setup are methods on
//! it, spread over their own modules.

use alloc::string::ToString;

use tilia_common::layout::{cpos, MEMSIZE_VIRTUAL, PROC_START_ADDR};
use tilia_common::{Fatal, Pid, Registers};
use tilia_hal::Platform;

use crate::boot::{self, Status};
use crate::check;
use crate::config::{BootCommand, KernelConfig};
use crate::console::{self, ALERT};
use crate::memory::{lookup, Ledger, Mapping, PageTable, Vm};
use crate::memshow::{self, MemShow};
use crate::process::{Process, ProcessTable, ProgramLoader};
use crate::selftest;

/// Kernel state, generic over the machine it runs on.
pub struct Kernel<P: Platform> {
    pub(crate) platform: P,
    pub(crate) config: KernelConfig,
    pub(crate) ledger: Ledger,
    pub(crate) procs: ProcessTable,
    pub(crate) kernel_pagetable: PageTable,
    pub(crate) current: Pid,
    pub(crate) ticks: u32,
    pub(crate) memshow: MemShow,
}

impl<P: Platform> Kernel<P> {
    /// Brings the kernel up on `platform` and sets up the initial processes.
    ///
    /// Any failure here is fatal; there is no partial boot.
    pub fn boot(
        mut platform: P,
        config: KernelConfig,
        loader: &mut dyn ProgramLoader,
    ) -> Result<Self, Fatal> {
        platform.clear();
        platform.init(config.hz);
        boot::log(Status::Ok, "Console and timer initialized");

        let mut ledger = Ledger::new(config.kernel_end);
        boot::log_detail(&alloc::format!(
            "{} of {} pages in use",
            ledger.used_pages(),
            tilia_common::layout::NPAGES
        ));

        let kernel_pagetable = {
            let mut vm = Vm::new(&mut ledger, &mut platform);
            boot::build_kernel_pagetable(&mut vm).map_err(|err| {
                boot::log(Status::Fail, "Kernel page table");
                Fatal::Invariant(alloc::format!("cannot build kernel page table: {}", err))
            })?
        };
        platform.set_pagetable(kernel_pagetable.addr());
        boot::log(Status::Ok, "Kernel page table installed");

        let mut kernel = Kernel {
            platform,
            config,
            ledger,
            procs: ProcessTable::new(),
            kernel_pagetable,
            current: Pid::NONE,
            ticks: 0,
            memshow: MemShow::new(),
        };

        let slots: &[(usize, usize)] = match config.command {
            BootCommand::Fork => &[(1, 4)],
            BootCommand::Allocators => &[(1, 0), (2, 1), (3, 2), (4, 3)],
        };
        for &(slot, program) in slots {
            let pid = Pid::new(slot).ok_or(Fatal::LoadFailed {
                pid: Pid::NONE,
                program,
            })?;
            kernel.process_setup(pid, program, loader)?;
        }
        boot::log(
            Status::Ok,
            &alloc::format!("Started {} process(es) ({})", slots.len(), config.command),
        );

        kernel.current = Pid::new(1).ok_or(Fatal::NotRunnable(Pid::NONE))?;
        kernel.check()?;
        if config.selftest {
            selftest::run_all(&kernel)?;
        }
        boot::log(Status::Ok, "Boot complete");
        Ok(kernel)
    }

    /// Handles the trap described by `regs`, taken while `current` ran.
    ///
    /// Returns the process to resume next.
    pub fn trap(&mut self, regs: &Registers) -> Result<Pid, Fatal> {
        self.procs.get_mut(self.current).regs = *regs;
        self.platform.set_pagetable(self.kernel_pagetable.addr());

        self.check()?;
        let cursor = self.platform.cursor();
        self.platform.show_cursor(cursor);
        if self.config.memshow {
            self.show_memory();
        }
        self.poll_abort()?;

        if let Some(next) = self.dispatch(regs)? {
            return Ok(next);
        }
        if self.procs.get(self.current).is_runnable() {
            self.switch_to(self.current)
        } else {
            self.schedule()
        }
    }

    /// Resumes the current process until its next trap and handles it.
    pub fn step(&mut self) -> Result<Pid, Fatal> {
        let process = *self.procs.get(self.current);
        if !process.is_runnable() {
            return Err(Fatal::NotRunnable(process.pid));
        }
        let pagetable = process
            .pagetable
            .ok_or(Fatal::NotRunnable(process.pid))?;
        self.platform.set_pagetable(pagetable.addr());
        let regs = self.platform.resume(&process.regs, pagetable.addr());
        self.trap(&regs)
    }

    /// Runs processes until something fatal happens, then reports and
    /// returns it. The caller halts the machine.
    pub fn run(&mut self) -> Fatal {
        loop {
            if let Err(fatal) = self.step() {
                self.report(&fatal);
                return fatal;
            }
        }
    }

    /// Runs the invariant checker over the current state.
    pub fn check(&self) -> Result<(), Fatal> {
        check::check(
            &self.ledger,
            &self.procs,
            &self.platform,
            self.kernel_pagetable,
        )
        .map_err(|violation| {
            log::error!("{}", violation);
            Fatal::Invariant(violation.to_string())
        })
    }

    fn show_memory(&mut self) {
        memshow::show_physical(&mut self.platform, &self.ledger);
        if let Some((pid, pagetable)) = self.memshow.select(&self.procs, self.ticks, self.config.hz)
        {
            let cells = memshow::virtual_cells(&self.ledger, &self.platform, pagetable);
            memshow::show_virtual(&mut self.platform, &cells, &alloc::format!("{} ", pid));
        }
    }

    pub(crate) fn poll_abort(&mut self) -> Result<(), Fatal> {
        if self.platform.abort_requested() {
            Err(Fatal::AbortRequested)
        } else {
            Ok(())
        }
    }

    /// Logs `fatal` and shows it on the bottom line of the console.
    pub fn report(&mut self, fatal: &Fatal) {
        log::error!("PANIC: {}", fatal);
        console::print_at(
            &mut self.platform,
            cpos(24, 0),
            ALERT,
            format_args!("PANIC: {}", fatal),
        );
    }

    /// The platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The platform, mutably.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The boot configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The physical page ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The process table.
    pub fn processes(&self) -> &ProcessTable {
        &self.procs
    }

    /// The descriptor of `pid`.
    pub fn process(&self, pid: Pid) -> &Process {
        self.procs.get(pid)
    }

    /// The process the next [`step`](Self::step) resumes.
    pub fn current(&self) -> Pid {
        self.current
    }

    /// Timer ticks since boot.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// The kernel's own page table.
    pub fn kernel_pagetable(&self) -> PageTable {
        self.kernel_pagetable
    }

    /// Translates `va` in the address space of `pid`.
    pub fn lookup(&self, pid: Pid, va: usize) -> Option<Mapping> {
        let pagetable = self.procs.get(pid).pagetable?;
        lookup(&self.platform, pagetable, va)
    }

    /// `true` if `pid` has a page table of its own.
    pub fn has_own_pagetable(&self, pid: Pid) -> bool {
        matches!(self.procs.get(pid).pagetable, Some(pt) if pt != self.kernel_pagetable)
    }

    /// Iterates over the mapped user pages of `pid`.
    pub fn user_mappings(&self, pid: Pid) -> impl Iterator<Item = (usize, Mapping)> + '_ {
        (PROC_START_ADDR..MEMSIZE_VIRTUAL)
            .step_by(tilia_common::layout::PAGE_SIZE)
            .filter_map(move |va| self.lookup(pid, va).map(|m| (va, m)))
    }
}
