//! CGA text buffer of the simulated machine.
//!
//! The buffer lives in physical memory at `CONSOLE_ADDR`, two bytes per
//! cell (character, then attribute), so a process that maps the console
//! page writes straight to the screen.

use alloc::string::String;

use tilia_common::layout::{page_number, CONSOLE_ADDR, CONSOLE_COLUMNS, CONSOLE_ROWS, PAGE_SIZE};
use tilia_hal::{Color, ColorCode, PhysicalMemory};

/// Number of cells on the screen.
pub const CELLS: usize = CONSOLE_COLUMNS * CONSOLE_ROWS;

/// A blank cell in the default color.
pub const BLANK: u16 = ColorCode::new(Color::LightGray, Color::Black).cell(b' ');

/// View of the text buffer inside physical memory.
pub struct TextBuffer<'a> {
    frame: &'a mut [u8; PAGE_SIZE],
}

impl<'a> TextBuffer<'a> {
    /// The text buffer in `mem`.
    pub fn new<M: PhysicalMemory + ?Sized>(mem: &'a mut M) -> Self {
        TextBuffer {
            frame: mem.frame_mut(page_number(CONSOLE_ADDR)),
        }
    }

    /// Stores `cell` at `pos`; positions off the screen are dropped.
    pub fn put(&mut self, pos: usize, cell: u16) {
        if pos < CELLS {
            self.frame[2 * pos..2 * pos + 2].copy_from_slice(&cell.to_le_bytes());
        }
    }

    /// Clears a single row by filling it with blanks.
    pub fn clear_row(&mut self, row: usize) {
        debug_assert!(row < CONSOLE_ROWS, "row index out of bounds");
        for col in 0..CONSOLE_COLUMNS {
            self.put(row * CONSOLE_COLUMNS + col, BLANK);
        }
    }

    /// Clears the entire screen.
    pub fn clear_screen(&mut self) {
        for row in 0..CONSOLE_ROWS {
            self.clear_row(row);
        }
    }
}

/// Reads the cell at `pos`.
pub fn cell_at<M: PhysicalMemory + ?Sized>(mem: &M, pos: usize) -> u16 {
    let frame = mem.frame(page_number(CONSOLE_ADDR));
    u16::from_le_bytes([frame[2 * pos], frame[2 * pos + 1]])
}

/// The characters on screen, one line per row, trailing blanks trimmed.
/// Non-printable characters show as `.`.
pub fn screen_text<M: PhysicalMemory + ?Sized>(mem: &M) -> String {
    let mut text = String::with_capacity(CELLS + CONSOLE_ROWS);
    for row in 0..CONSOLE_ROWS {
        let line: String = (0..CONSOLE_COLUMNS)
            .map(|col| match (cell_at(mem, row * CONSOLE_COLUMNS + col) & 0xff) as u8 {
                0 => ' ',
                byte @ 0x20..=0x7e => byte as char,
                _ => '.',
            })
            .collect();
        text.push_str(line.trim_end());
        text.push('\n');
    }
    text
}
