//! Kernel logger.
//!
//! A `log::Log` implementation that writes `[LEVEL target] message` lines
//! to a serial sink.

use alloc::boxed::Box;
use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;
use tilia_hal::Serial;

/// Sink behind the global logger, set once.
pub static SINK: spin::Once<Mutex<Box<dyn Serial + Send>>> = spin::Once::new();

static LOGGER: KernelLogger = KernelLogger;

struct KernelLogger;

/// Adapts a [`Serial`] port to `fmt::Write`, translating `\n` to `\r\n`.
pub struct SerialWriter<'a, S: Serial + ?Sized>(pub &'a mut S);

impl<S: Serial + ?Sized> Write for SerialWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.write_byte(b'\r');
            }
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.get() {
            let mut port = sink.lock();
            let _ = writeln!(
                SerialWriter(&mut **port),
                "[{:<5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Installs the kernel logger writing to `sink` at `level`.
///
/// The first sink wins; later calls only adjust the level.
pub fn init(sink: Box<dyn Serial + Send>, level: LevelFilter) -> Result<(), SetLoggerError> {
    SINK.call_once(|| Mutex::new(sink));
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}
