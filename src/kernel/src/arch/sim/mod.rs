//! Hosted machine simulator.
//!
//! A [`SimPlatform`] is a whole machine: physical memory with the CGA text
//! buffer at its usual address, a CPU running the small instruction set in
//! [`isa`] behind an MMU that walks the kernel's page tables, a timer and
//! a PS/2 keyboard.
//!
//! # Architecture
//!
//! - `cpu`: interpreter, address translation, timer
//! - `isa`: instruction encoding and assembler
//! - `keyboard`: scancode queue and Control-C decoding
//! - `loader` and `programs`: the built-in user programs
//! - `serial`: log sink
//! - `vga`: text buffer access

pub mod cpu;
pub mod isa;
pub mod keyboard;
pub mod loader;
pub mod programs;
pub mod serial;
pub mod vga;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;

use tilia_common::layout::{NPAGES, PAGE_SIZE};
use tilia_common::Registers;
use tilia_hal::{Console, Cpu, Keyboard, PhysicalMemory, Timer};

pub use cpu::SimCpu;
pub use keyboard::{KeyboardHandle, SimKeyboard};
pub use loader::SimLoader;
pub use serial::SerialBuffer;

/// Physical memory: [`NPAGES`] zeroed page frames.
pub struct Frames(Box<[[u8; PAGE_SIZE]]>);

impl Default for Frames {
    fn default() -> Self {
        Self::new()
    }
}

impl Frames {
    /// Zeroed memory.
    pub fn new() -> Self {
        Frames(vec![[0u8; PAGE_SIZE]; NPAGES].into_boxed_slice())
    }
}

impl PhysicalMemory for Frames {
    fn frame(&self, pn: usize) -> &[u8; PAGE_SIZE] {
        &self.0[pn]
    }

    fn frame_mut(&mut self, pn: usize) -> &mut [u8; PAGE_SIZE] {
        &mut self.0[pn]
    }
}

/// The simulated machine.
pub struct SimPlatform {
    ram: Frames,
    cpu: SimCpu,
    keyboard: SimKeyboard,
    cursor: usize,
    hw_cursor: usize,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    /// A powered-on machine with zeroed memory and the timer off.
    pub fn new() -> Self {
        SimPlatform {
            ram: Frames::new(),
            cpu: SimCpu::new(),
            keyboard: SimKeyboard::new(),
            cursor: 0,
            hw_cursor: 0,
        }
    }

    /// Gives up after `polls` keyboard polls, as if Control-C had been
    /// typed then. Bounds runs where nothing would ever stop the kernel.
    pub fn with_abort_budget(mut self, polls: u64) -> Self {
        self.keyboard.set_budget(Some(polls));
        self
    }

    /// A handle for typing on the keyboard.
    pub fn keyboard(&self) -> KeyboardHandle {
        self.keyboard.handle()
    }

    /// The CPU.
    pub fn cpu(&self) -> &SimCpu {
        &self.cpu
    }

    /// The characters on screen.
    pub fn screen_text(&self) -> String {
        vga::screen_text(&self.ram)
    }

    /// The raw cell at `pos`.
    pub fn cell(&self, pos: usize) -> u16 {
        vga::cell_at(&self.ram, pos)
    }

    /// Moves the logical cursor, as console output does.
    pub fn set_cursor(&mut self, pos: usize) {
        self.cursor = pos.min(vga::CELLS);
    }

    /// Where the hardware cursor was last put.
    pub fn hw_cursor(&self) -> usize {
        self.hw_cursor
    }
}

impl Console for SimPlatform {
    fn clear(&mut self) {
        vga::TextBuffer::new(&mut self.ram).clear_screen();
        self.cursor = 0;
    }

    fn put_cell(&mut self, pos: usize, cell: u16) {
        vga::TextBuffer::new(&mut self.ram).put(pos, cell);
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn show_cursor(&mut self, pos: usize) {
        self.hw_cursor = pos.min(vga::CELLS);
    }
}

impl Timer for SimPlatform {
    fn init(&mut self, hz: u32) {
        self.cpu.set_hz(hz);
        log::debug!("timer: {} Hz, {} instructions per tick", hz, self.cpu.quantum());
    }
}

impl Keyboard for SimPlatform {
    fn abort_requested(&mut self) -> bool {
        self.keyboard.poll()
    }
}

impl Cpu for SimPlatform {
    fn set_pagetable(&mut self, pagetable: usize) {
        self.cpu.set_cr3(pagetable);
    }

    fn fault_address(&self) -> usize {
        self.cpu.cr2()
    }

    fn resume(&mut self, regs: &Registers, pagetable: usize) -> Registers {
        self.cpu.run(&mut self.ram, regs, pagetable)
    }
}

impl PhysicalMemory for SimPlatform {
    fn frame(&self, pn: usize) -> &[u8; PAGE_SIZE] {
        self.ram.frame(pn)
    }

    fn frame_mut(&mut self, pn: usize) -> &mut [u8; PAGE_SIZE] {
        self.ram.frame_mut(pn)
    }
}
