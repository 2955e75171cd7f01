//! Simulated serial port.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;
use tilia_hal::Serial;

/// A serial line backed by shared buffers. Clones talk to the same line,
/// so one clone can feed the logger while another reads the output.
#[derive(Clone, Default)]
pub struct SerialBuffer {
    output: Arc<Mutex<Vec<u8>>>,
    input: Arc<Mutex<VecDeque<u8>>>,
}

impl SerialBuffer {
    /// An idle line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for [`Serial::read_byte`].
    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }

    /// Empties the output and returns what it held.
    pub fn take(&self) -> String {
        let bytes = core::mem::take(&mut *self.output.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Serial for SerialBuffer {
    fn write_byte(&mut self, byte: u8) {
        self.output.lock().push(byte);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.lock().pop_front()
    }
}
