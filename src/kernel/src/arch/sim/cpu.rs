//! Simulated CPU.
//!
//! Runs user code one instruction at a time, translating every access
//! through the installed page table the way the MMU would. Control comes
//! back to the kernel on a software interrupt, a page fault, an invalid
//! instruction or a timer tick.

use tilia_common::{PageFaultCause, PageFlags, Registers, TrapNumber};
use tilia_hal::PhysicalMemory;

use super::isa::{Insn, Op, INSN_SIZE};
use crate::memory::{lookup, PageTable};

/// Instructions executed per simulated second.
pub const INSNS_PER_SECOND: u32 = 10_000;

/// Trap number of the invalid-opcode exception.
pub const INVALID_OPCODE: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exception {
    PageFault { addr: usize, cause: PageFaultCause },
    InvalidOpcode,
}

/// Register-level state of the simulated processor.
#[derive(Debug, Clone)]
pub struct SimCpu {
    cr3: usize,
    cr2: usize,
    quantum: u32,
    countdown: u32,
    executed: u64,
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCpu {
    /// A CPU with the timer off.
    pub const fn new() -> Self {
        SimCpu {
            cr3: 0,
            cr2: 0,
            quantum: u32::MAX,
            countdown: u32::MAX,
            executed: 0,
        }
    }

    /// Programs the timer to fire `hz` times per simulated second.
    pub fn set_hz(&mut self, hz: u32) {
        self.quantum = (INSNS_PER_SECOND / hz.max(1)).max(1);
        self.countdown = self.quantum;
    }

    /// Instructions between two timer interrupts.
    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    /// Installed page table.
    pub fn cr3(&self) -> usize {
        self.cr3
    }

    /// Loads `pagetable` into the translation root.
    pub fn set_cr3(&mut self, pagetable: usize) {
        self.cr3 = pagetable;
    }

    /// Address of the last page fault.
    pub fn cr2(&self) -> usize {
        self.cr2
    }

    /// Instructions retired since power-on.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Runs user code from `regs` under `pagetable` until the next trap.
    pub fn run<M: PhysicalMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        regs: &Registers,
        pagetable: usize,
    ) -> Registers {
        self.cr3 = pagetable;
        let mut regs = *regs;
        regs.intno = 0;
        regs.err = 0;

        loop {
            let trap = match self.execute(mem, &mut regs) {
                Ok(trap) => trap,
                Err(Exception::PageFault { addr, cause }) => {
                    self.cr2 = addr;
                    regs.err = cause.bits();
                    Some(TrapNumber::PageFault.raw())
                }
                Err(Exception::InvalidOpcode) => Some(INVALID_OPCODE),
            };
            self.executed += 1;
            self.countdown = self.countdown.saturating_sub(1);

            if let Some(intno) = trap {
                regs.intno = intno;
                return regs;
            }
            // a tick that lands on a trapping instruction stays pending
            if self.countdown == 0 {
                self.countdown = self.quantum;
                regs.intno = TrapNumber::Timer.raw();
                return regs;
            }
        }
    }

    fn execute<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &mut M,
        regs: &mut Registers,
    ) -> Result<Option<u32>, Exception> {
        let mut bytes = [0u8; INSN_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.load_byte(mem, regs.eip.wrapping_add(i as u32))?;
        }
        let insn = Insn::decode(bytes).ok_or(Exception::InvalidOpcode)?;
        let next = regs.eip.wrapping_add(INSN_SIZE as u32);
        let target = next.wrapping_add(insn.imm);
        let (a, b) = (reg(regs, insn.a), reg(regs, insn.b));
        let mut pc = next;

        match insn.op {
            Op::Li => *reg_mut(regs, insn.a) = insn.imm,
            Op::Mov => *reg_mut(regs, insn.a) = b,
            Op::Addi => *reg_mut(regs, insn.a) = a.wrapping_add(insn.imm),
            Op::Lea => *reg_mut(regs, insn.a) = target,
            Op::Sb => self.store_byte(mem, a, b as u8)?,
            Op::Lb => *reg_mut(regs, insn.a) = self.load_byte(mem, b)? as u32,
            Op::Int => {
                regs.eip = next;
                return Ok(Some(insn.imm));
            }
            Op::Jmp => pc = target,
            Op::Jz if a == 0 => pc = target,
            Op::Jnz if a != 0 => pc = target,
            Op::Beq if a == b => pc = target,
            Op::Jz | Op::Jnz | Op::Beq => {}
        }
        regs.eip = pc;
        Ok(None)
    }

    fn translate<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &M,
        va: u32,
        access: Access,
    ) -> Result<usize, Exception> {
        let va = va as usize;
        let fault = |present: bool| {
            let mut cause = PageFaultCause::USER;
            cause.set(PageFaultCause::PRESENT, present);
            cause.set(PageFaultCause::WRITE, access == Access::Write);
            Exception::PageFault { addr: va, cause }
        };
        let mapping = lookup(mem, PageTable::from_addr(self.cr3), va).ok_or(fault(false))?;
        if !mapping.perm.contains(PageFlags::USER)
            || (access == Access::Write && !mapping.perm.contains(PageFlags::WRITABLE))
        {
            return Err(fault(true));
        }
        Ok(mapping.pa)
    }

    fn load_byte<M: PhysicalMemory + ?Sized>(&self, mem: &M, va: u32) -> Result<u8, Exception> {
        let pa = self.translate(mem, va, Access::Read)?;
        Ok(mem.frame(pa >> 12)[pa & 0xfff])
    }

    fn store_byte<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &mut M,
        va: u32,
        value: u8,
    ) -> Result<(), Exception> {
        let pa = self.translate(mem, va, Access::Write)?;
        mem.frame_mut(pa >> 12)[pa & 0xfff] = value;
        Ok(())
    }
}

fn reg(regs: &Registers, index: u8) -> u32 {
    match index {
        0 => regs.eax,
        1 => regs.ebx,
        2 => regs.ecx,
        3 => regs.edx,
        4 => regs.esi,
        5 => regs.edi,
        6 => regs.ebp,
        _ => regs.esp,
    }
}

fn reg_mut(regs: &mut Registers, index: u8) -> &mut u32 {
    match index {
        0 => &mut regs.eax,
        1 => &mut regs.ebx,
        2 => &mut regs.ecx,
        3 => &mut regs.edx,
        4 => &mut regs.esi,
        5 => &mut regs.edi,
        6 => &mut regs.ebp,
        _ => &mut regs.esp,
    }
}
