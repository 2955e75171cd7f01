//! Simulated PS/2 keyboard.
//!
//! Scancodes are pushed into a shared queue, as the keyboard interrupt
//! handler would, and decoded when the kernel polls for Control-C.

use alloc::sync::Arc;

use crossbeam_queue::ArrayQueue;
use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};

/// Scancodes buffered before input is dropped.
pub const QUEUE_DEPTH: usize = 100;

/// Set 1 scancodes for Control down, C down, C up, Control up.
pub const CTRL_C: [u8; 4] = [0x1D, 0x2E, 0xAE, 0x9D];

const ETX: char = '\u{3}';

/// Handle for typing on the simulated keyboard from outside the machine.
#[derive(Clone)]
pub struct KeyboardHandle(Arc<ArrayQueue<u8>>);

impl KeyboardHandle {
    /// Queues one scancode. Returns `false` if the queue is full.
    pub fn push(&self, scancode: u8) -> bool {
        self.0.push(scancode).is_ok()
    }

    /// Types Control-C.
    pub fn press_ctrl_c(&self) {
        for scancode in CTRL_C {
            if !self.push(scancode) {
                log::warn!("scancode queue full; dropping keyboard input");
            }
        }
    }
}

/// The keyboard controller and its decoder.
pub struct SimKeyboard {
    queue: Arc<ArrayQueue<u8>>,
    decoder: Keyboard<layouts::Us104Key, ScancodeSet1>,
    aborted: bool,
    budget: Option<u64>,
}

impl Default for SimKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKeyboard {
    /// A keyboard with nothing typed yet.
    pub fn new() -> Self {
        SimKeyboard {
            queue: Arc::new(ArrayQueue::new(QUEUE_DEPTH)),
            decoder: Keyboard::new(
                ScancodeSet1::new(),
                layouts::Us104Key,
                HandleControl::MapLettersToUnicode,
            ),
            aborted: false,
            budget: None,
        }
    }

    /// A handle that types into this keyboard.
    pub fn handle(&self) -> KeyboardHandle {
        KeyboardHandle(Arc::clone(&self.queue))
    }

    /// Makes the operator give up after `polls` more polls, as if Control-C
    /// had been typed then.
    pub fn set_budget(&mut self, polls: Option<u64>) {
        self.budget = polls;
    }

    /// Decodes pending scancodes. Once Control-C is seen the answer stays
    /// `true`.
    pub fn poll(&mut self) -> bool {
        while let Some(scancode) = self.queue.pop() {
            if let Ok(Some(event)) = self.decoder.add_byte(scancode) {
                if let Some(DecodedKey::Unicode(ETX)) = self.decoder.process_keyevent(event) {
                    log::info!("Control-C on the console keyboard");
                    self.aborted = true;
                }
            }
        }
        if let Some(polls) = self.budget.as_mut() {
            if *polls == 0 {
                self.aborted = true;
            } else {
                *polls -= 1;
            }
        }
        self.aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_c_aborts_and_sticks() {
        let mut keyboard = SimKeyboard::new();
        assert!(!keyboard.poll());
        keyboard.handle().press_ctrl_c();
        assert!(keyboard.poll());
        assert!(keyboard.poll());
    }

    #[test]
    fn test_plain_c_does_not_abort() {
        let mut keyboard = SimKeyboard::new();
        let handle = keyboard.handle();
        handle.push(0x2E);
        handle.push(0xAE);
        assert!(!keyboard.poll());
    }

    #[test]
    fn test_budget_runs_out() {
        let mut keyboard = SimKeyboard::new();
        keyboard.set_budget(Some(2));
        assert!(!keyboard.poll());
        assert!(!keyboard.poll());
        assert!(keyboard.poll());
    }
}
