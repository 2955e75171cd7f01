//! Tilia Hardware Abstraction Layer (HAL) traits.
//!
//! The kernel core never touches hardware directly. Everything it needs
//! from the machine (console, timer, keyboard poll, MMU and context
//! switch, physical page frames) goes through the traits in this crate.

#![no_std]

use tilia_common::layout::PAGE_SIZE;
use tilia_common::Registers;

/// Trait for a serial port or similar character-based communication channel.
pub trait Serial {
    /// Writes a single byte to the serial port.
    fn write_byte(&mut self, byte: u8);
    /// Reads a single byte from the serial port, if available.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Trait for a CGA-style text console addressed by cell index.
pub trait Console {
    /// Clears the console screen.
    fn clear(&mut self);

    /// Stores a raw cell (`attribute << 8 | character`) at `pos`.
    fn put_cell(&mut self, pos: usize, cell: u16);

    /// Writes `s` starting at cell `pos` in `color`. A newline moves to
    /// the start of the next row. Returns the cell after the last one written.
    fn write_at(&mut self, pos: usize, color: ColorCode, s: &str) -> usize {
        let mut pos = pos;
        for byte in s.bytes() {
            match byte {
                b'\n' => pos = (pos / CONSOLE_WIDTH + 1) * CONSOLE_WIDTH,
                0x20..=0x7e => {
                    self.put_cell(pos, color.cell(byte));
                    pos += 1;
                }
                _ => {
                    self.put_cell(pos, color.cell(0xfe));
                    pos += 1;
                }
            }
        }
        pos
    }

    /// Current logical cursor position.
    fn cursor(&self) -> usize;

    /// Moves the hardware cursor to `pos`.
    fn show_cursor(&mut self, pos: usize);
}

/// Trait for a system timer.
pub trait Timer {
    /// Starts periodic timer interrupts at `hz` per second.
    fn init(&mut self, hz: u32);
}

/// Trait for the interactive abort poll.
pub trait Keyboard {
    /// Returns `true` if the operator asked to stop the machine (Control-C).
    fn abort_requested(&mut self) -> bool;
}

/// Trait for direct access to physical page frames.
pub trait PhysicalMemory {
    /// Borrows physical page `pn`.
    fn frame(&self, pn: usize) -> &[u8; PAGE_SIZE];
    /// Mutably borrows physical page `pn`.
    fn frame_mut(&mut self, pn: usize) -> &mut [u8; PAGE_SIZE];
}

/// Trait for the CPU: address translation root, fault address and the
/// context-switch trampoline.
pub trait Cpu {
    /// Installs the page table rooted at physical address `pagetable`.
    fn set_pagetable(&mut self, pagetable: usize);

    /// Address that caused the most recent page fault.
    fn fault_address(&self) -> usize;

    /// Drops to user mode with `regs` under `pagetable`, and comes back
    /// with the register snapshot of the next trap.
    fn resume(&mut self, regs: &Registers, pagetable: usize) -> Registers;
}

/// Everything the kernel needs from a machine.
pub trait Platform: Console + Timer + Keyboard + Cpu + PhysicalMemory {}

impl<T: Console + Timer + Keyboard + Cpu + PhysicalMemory> Platform for T {}

/// Width of the text console in cells.
pub const CONSOLE_WIDTH: usize = tilia_common::layout::CONSOLE_COLUMNS;

/// Text-mode color codes.
///
/// Standard 16-color CGA palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    /// Black color.
    Black = 0,
    /// Blue color.
    Blue = 1,
    /// Green color.
    Green = 2,
    /// Cyan color.
    Cyan = 3,
    /// Red color.
    Red = 4,
    /// Magenta color.
    Magenta = 5,
    /// Brown color.
    Brown = 6,
    /// Light gray color.
    LightGray = 7,
    /// Dark gray color.
    DarkGray = 8,
    /// Light blue color.
    LightBlue = 9,
    /// Light green color.
    LightGreen = 10,
    /// Light cyan color.
    LightCyan = 11,
    /// Light red color.
    LightRed = 12,
    /// Pink color.
    Pink = 13,
    /// Yellow color.
    Yellow = 14,
    /// White color.
    White = 15,
}

/// Combined foreground and background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    /// Creates a new color code from foreground and background colors.
    pub const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 4 | (foreground as u8))
    }

    /// Builds a console cell showing `character` in this color.
    pub const fn cell(self, character: u8) -> u16 {
        (self.0 as u16) << 8 | character as u16
    }
}
