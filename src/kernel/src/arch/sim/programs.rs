//! Built-in user programs.
//!
//! Programs 0 to 3 are allocators: each grabs heap pages one at a time,
//! stamps its pid into every new page, and yields in between. Lower
//! program numbers yield more, so higher pids grow faster. Program 4 forks
//! twice and then does the same.

use alloc::vec::Vec;

use lazy_static::lazy_static;
use tilia_common::layout::{MEMSIZE_VIRTUAL, PAGE_SIZE};
use tilia_common::trap::SYSCALL_FAILED;
use tilia_common::TrapNumber;

use super::isa::{Assembler, EAX, EBX, ECX, EDX, ESI};

/// Number of built-in programs.
pub const PROGRAM_COUNT: usize = 5;

/// Offset of the first heap page from the load address, past the text and
/// data pages.
pub const HEAP_OFFSET: usize = 2 * PAGE_SIZE;

/// Message passed to `sys_panic` when a fork fails.
pub const FORK_FAILED: &str = "fork failed!";

lazy_static! {
    static ref IMAGES: [Option<Vec<u8>>; PROGRAM_COUNT] = [
        allocator(4),
        allocator(3),
        allocator(2),
        allocator(1),
        forker(),
    ];
}

/// The image of `program`, loaded and started at its first byte.
pub fn image(program: usize) -> Option<&'static [u8]> {
    IMAGES.get(program)?.as_deref()
}

fn syscall(asm: &mut Assembler, trap: TrapNumber) {
    asm.int(trap.raw());
}

/// The allocation loop, yielding `delay` times after each page.
fn allocation_loop(asm: &mut Assembler, delay: u32) {
    let top = asm.label();
    let wait = asm.label();
    let idle = asm.label();

    syscall(asm, TrapNumber::GetPid);
    asm.mov(ESI, EAX)
        .lea_image(EBX, HEAP_OFFSET)
        .li(EDX, (MEMSIZE_VIRTUAL - PAGE_SIZE) as u32);

    asm.bind(top);
    asm.beq(EBX, EDX, idle).mov(EAX, EBX);
    syscall(asm, TrapNumber::PageAlloc);
    asm.jnz(EAX, idle)
        // must be writable now
        .sb(EBX, ESI)
        .addi(EBX, PAGE_SIZE as u32)
        .li(ECX, delay);
    asm.bind(wait);
    syscall(asm, TrapNumber::Yield);
    asm.addi(ECX, u32::MAX).jnz(ECX, wait).jmp(top);

    asm.bind(idle);
    syscall(asm, TrapNumber::Yield);
    asm.jmp(idle);
}

fn allocator(delay: u32) -> Option<Vec<u8>> {
    let mut asm = Assembler::new();
    allocation_loop(&mut asm, delay);
    asm.finish()
}

fn forker() -> Option<Vec<u8>> {
    let mut asm = Assembler::new();
    let failed = asm.label();
    let message = asm.data(FORK_FAILED.as_bytes());
    asm.data(&[0]);

    asm.li(EDX, SYSCALL_FAILED);
    syscall(&mut asm, TrapNumber::Fork);
    asm.beq(EAX, EDX, failed);
    syscall(&mut asm, TrapNumber::Fork);
    asm.beq(EAX, EDX, failed);
    allocation_loop(&mut asm, 2);

    asm.bind(failed);
    asm.lea_data(EAX, message);
    syscall(&mut asm, TrapNumber::Panic);
    asm.jmp(failed);
    asm.finish()
}
