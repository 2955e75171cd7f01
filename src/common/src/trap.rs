//! Trap numbers and the saved register snapshot.
//!
//! A process enters the kernel through a trap; the entry trampoline saves
//! its registers into a [`Registers`] snapshot whose `intno` field names
//! the trap. System call arguments arrive in `eax` and results are written
//! back to `eax`.

use core::fmt;

/// Value written to `eax` when a system call fails.
pub const SYSCALL_FAILED: u32 = u32::MAX;

/// The traps the kernel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum TrapNumber {
    /// MMU fault; cause bits in `err`, address from the CPU.
    PageFault = 14,
    /// Timer interrupt (IRQ 0).
    Timer = 32,
    /// `sys_panic(msg)`: stop the kernel with a message.
    Panic = 48,
    /// `sys_getpid()`.
    GetPid = 49,
    /// `sys_yield()`.
    Yield = 50,
    /// `sys_page_alloc(addr)`.
    PageAlloc = 51,
    /// `sys_fork()`.
    Fork = 52,
}

impl TrapNumber {
    /// Decodes a raw interrupt number.
    pub const fn from_raw(intno: u32) -> Option<Self> {
        match intno {
            14 => Some(TrapNumber::PageFault),
            32 => Some(TrapNumber::Timer),
            48 => Some(TrapNumber::Panic),
            49 => Some(TrapNumber::GetPid),
            50 => Some(TrapNumber::Yield),
            51 => Some(TrapNumber::PageAlloc),
            52 => Some(TrapNumber::Fork),
            _ => None,
        }
    }

    /// The raw interrupt number.
    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for TrapNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrapNumber::PageFault => "page fault",
            TrapNumber::Timer => "timer",
            TrapNumber::Panic => "sys_panic",
            TrapNumber::GetPid => "sys_getpid",
            TrapNumber::Yield => "sys_yield",
            TrapNumber::PageAlloc => "sys_page_alloc",
            TrapNumber::Fork => "sys_fork",
        };
        write!(f, "{} ({})", name, self.raw())
    }
}

/// Register state of a process at the moment it trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Registers {
    /// Accumulator: first argument and return value of system calls.
    pub eax: u32,
    /// Base register.
    pub ebx: u32,
    /// Count register.
    pub ecx: u32,
    /// Data register.
    pub edx: u32,
    /// Source index.
    pub esi: u32,
    /// Destination index.
    pub edi: u32,
    /// Frame pointer.
    pub ebp: u32,
    /// User stack pointer.
    pub esp: u32,
    /// Instruction pointer to resume at.
    pub eip: u32,
    /// Flags register.
    pub eflags: u32,
    /// Trap number.
    pub intno: u32,
    /// Error code pushed with the trap (page-fault cause bits).
    pub err: u32,
}

impl Registers {
    /// A fresh user register set that starts at `eip` with stack `esp`.
    pub const fn user(eip: u32, esp: u32) -> Self {
        Registers {
            eax: 0,
            ebx: 0,
            ecx: 0,
            edx: 0,
            esi: 0,
            edi: 0,
            ebp: 0,
            esp,
            eip,
            eflags: EFLAGS_IF,
            intno: 0,
            err: 0,
        }
    }

    /// The decoded trap number, if recognized.
    pub fn trap(&self) -> Option<TrapNumber> {
        TrapNumber::from_raw(self.intno)
    }
}

/// Interrupt-enable flag; user code always runs with interrupts on.
pub const EFLAGS_IF: u32 = 1 << 9;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_number_roundtrip() {
        for trap in [
            TrapNumber::PageFault,
            TrapNumber::Timer,
            TrapNumber::Panic,
            TrapNumber::GetPid,
            TrapNumber::Yield,
            TrapNumber::PageAlloc,
            TrapNumber::Fork,
        ] {
            assert_eq!(TrapNumber::from_raw(trap.raw()), Some(trap));
        }
        assert_eq!(TrapNumber::from_raw(3), None);
    }

    #[test]
    fn test_user_registers() {
        let regs = Registers::user(0x10_0000, 0x30_0000);
        assert_eq!(regs.eip, 0x10_0000);
        assert_eq!(regs.esp, 0x30_0000);
        assert_ne!(regs.eflags & EFLAGS_IF, 0);
        assert!(regs.trap().is_none());
    }
}
