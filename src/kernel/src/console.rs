//! Formatted output on the text console.

use core::fmt;

use tilia_hal::{Color, ColorCode, Console};

/// Default text color.
pub const WHITE: ColorCode = ColorCode::new(Color::White, Color::Black);

/// Color of fault and panic messages.
pub const ALERT: ColorCode = ColorCode::new(Color::LightRed, Color::Black);

/// Positioned console writer.
///
/// Manages the write position and color for `write!` output.
pub struct Writer<'a, C: Console + ?Sized> {
    console: &'a mut C,
    /// Next cell to write.
    pos: usize,
    /// Color for new characters.
    color_code: ColorCode,
}

impl<'a, C: Console + ?Sized> Writer<'a, C> {
    /// Creates a writer starting at cell `pos`.
    pub fn new(console: &'a mut C, pos: usize, color_code: ColorCode) -> Self {
        Writer {
            console,
            pos,
            color_code,
        }
    }

    /// The cell after the last one written.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<C: Console + ?Sized> fmt::Write for Writer<'_, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.pos = self.console.write_at(self.pos, self.color_code, s);
        Ok(())
    }
}

/// Prints `args` at cell `pos` and returns the position after the output.
pub fn print_at<C: Console + ?Sized>(
    console: &mut C,
    pos: usize,
    color: ColorCode,
    args: fmt::Arguments<'_>,
) -> usize {
    let mut writer = Writer::new(console, pos, color);
    // write_str never fails
    let _ = fmt::Write::write_fmt(&mut writer, args);
    writer.position()
}
