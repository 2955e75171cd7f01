//! Memory visualizer.
//!
//! Draws the ledger and one process's address space on the text console,
//! one cell per page. Purely diagnostic.

use tilia_common::layout::{cpos, MEMSIZE_VIRTUAL, PAGE_SIZE};
use tilia_common::pid::NPROC;
use tilia_common::{PageFlags, Pid};
use tilia_hal::{Color, ColorCode, Console, PhysicalMemory};

use crate::console::{print_at, WHITE};
use crate::memory::{lookup, Ledger, Owner, PageInfo, PageTable};
use crate::process::ProcessTable;

/// Pages per row.
const ROW_PAGES: usize = 64;

const fn cell(character: u8, color: Color) -> u16 {
    ColorCode::new(color, Color::Black).cell(character)
}

/// Glyph and color per owner: kernel, reserved, free, then processes 1..15.
const MEMSTATE_COLORS: [u16; 18] = [
    cell(b'K', Color::Pink),
    cell(b'R', Color::LightGray),
    cell(b'.', Color::LightGray),
    cell(b'1', Color::LightRed),
    cell(b'2', Color::LightGreen),
    cell(b'3', Color::LightBlue),
    cell(b'4', Color::Yellow),
    cell(b'5', Color::White),
    cell(b'6', Color::LightRed),
    cell(b'7', Color::LightGreen),
    cell(b'8', Color::LightBlue),
    cell(b'9', Color::Yellow),
    cell(b'A', Color::White),
    cell(b'B', Color::LightRed),
    cell(b'C', Color::LightGreen),
    cell(b'D', Color::LightBlue),
    cell(b'E', Color::Yellow),
    cell(b'F', Color::White),
];

/// Console cell for a page with ledger entry `info`.
pub fn page_cell(info: PageInfo) -> u16 {
    let owner = if info.is_free() { Owner::Free } else { info.owner };
    let index = match owner {
        Owner::Kernel => 0,
        Owner::Reserved => 1,
        Owner::Free => 2,
        Owner::Process(pid) => 2 + pid.slot(),
    };
    let color = MEMSTATE_COLORS[index];
    // darker color for shared pages
    if info.refcount > 1 {
        color & 0x77FF
    } else {
        color
    }
}

/// Swaps foreground and background.
fn reverse_video(cell: u16) -> u16 {
    ((cell & 0x0F00) << 4) | ((cell & 0xF000) >> 4) | (cell & 0x00FF)
}

/// Draws the physical page map.
pub fn show_physical<C: Console + ?Sized>(console: &mut C, ledger: &Ledger) {
    print_at(console, cpos(0, 32), WHITE, format_args!("PHYSICAL MEMORY"));
    for (pn, info) in ledger.iter() {
        let (row, col) = (1 + pn / ROW_PAGES, pn % ROW_PAGES);
        if col == 0 {
            print_at(console, cpos(row, 3), WHITE, format_args!("0x{:06X} ", pn << 12));
        }
        console.put_cell(cpos(row, 12 + col), page_cell(info));
    }
}

/// Number of pages in a virtual address space.
pub const VIRTUAL_PAGES: usize = MEMSIZE_VIRTUAL / PAGE_SIZE;

/// Computes the cells of the virtual map of `pagetable`. User-accessible
/// pages are in reverse video.
pub fn virtual_cells<M: PhysicalMemory + ?Sized>(
    ledger: &Ledger,
    mem: &M,
    pagetable: PageTable,
) -> [u16; VIRTUAL_PAGES] {
    let mut cells = [b' ' as u16; VIRTUAL_PAGES];
    for (pn, cell) in cells.iter_mut().enumerate() {
        let Some(mapping) = lookup(mem, pagetable, pn * PAGE_SIZE) else {
            continue;
        };
        let info = ledger.info(mapping.pn);
        let mut color = page_cell(PageInfo {
            refcount: info.refcount.min(1),
            ..info
        });
        if mapping.perm.contains(PageFlags::USER) {
            color = reverse_video(color);
        }
        if info.refcount > 1 {
            color &= 0x77FF;
        }
        *cell = color;
    }
    cells
}

/// Draws a virtual map computed by [`virtual_cells`].
pub fn show_virtual<C: Console + ?Sized>(
    console: &mut C,
    cells: &[u16; VIRTUAL_PAGES],
    name: &str,
) {
    print_at(
        console,
        cpos(10, 26),
        WHITE,
        format_args!("VIRTUAL ADDRESS SPACE FOR {}", name),
    );
    for (pn, &cell) in cells.iter().enumerate() {
        let (row, col) = (11 + pn / ROW_PAGES, pn % ROW_PAGES);
        if col == 0 {
            print_at(console, cpos(row, 3), WHITE, format_args!("0x{:06X} ", pn << 12));
        }
        console.put_cell(cpos(row, 12 + col), cell);
    }
}

/// Which address space the animated view shows, and since when.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemShow {
    last_ticks: Option<u32>,
    showing: usize,
}

impl MemShow {
    /// Starts with process 1.
    pub fn new() -> Self {
        MemShow {
            last_ticks: None,
            showing: 1,
        }
    }

    /// Picks the live process to show, moving on to the next one every
    /// `hz / 2` ticks.
    pub fn select(
        &mut self,
        procs: &ProcessTable,
        ticks: u32,
        hz: u32,
    ) -> Option<(Pid, PageTable)> {
        match self.last_ticks {
            Some(last) if ticks.wrapping_sub(last) < hz / 2 => {}
            _ => {
                self.last_ticks = Some(ticks);
                self.showing += 1;
            }
        }

        // the shown process may have gone away
        let live = |slot: usize| {
            Pid::new(slot % NPROC).is_some_and(|pid| procs.get(pid).is_live())
        };
        while self.showing <= 2 * NPROC && !live(self.showing) {
            self.showing += 1;
        }
        self.showing %= NPROC;

        let process = procs.get(Pid::new(self.showing)?);
        if process.is_live() {
            Some((process.pid, process.pagetable?))
        } else {
            None
        }
    }
}
