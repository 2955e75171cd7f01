//! Kernel configuration.
//!
//! Layout constants live in [`tilia_common::layout`]; this is the part a
//! platform picks at boot.

use core::fmt;

/// Default timer frequency in Hz.
pub const DEFAULT_HZ: u32 = 100;

/// Default end of the kernel image (exclusive, page aligned).
pub const DEFAULT_KERNEL_END: usize = 0x5_2000;

/// Which initial processes to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootCommand {
    /// Programs 0..=3 in slots 1..=4.
    #[default]
    Allocators,
    /// Program 4, the forking allocator, in slot 1.
    Fork,
}

impl BootCommand {
    /// Parses a boot command line; anything unknown selects the default.
    pub fn parse(command: &str) -> Self {
        match command.trim() {
            "fork" => BootCommand::Fork,
            _ => BootCommand::Allocators,
        }
    }
}

impl fmt::Display for BootCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootCommand::Allocators => write!(f, "allocators"),
            BootCommand::Fork => write!(f, "fork"),
        }
    }
}

/// Boot-time kernel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Timer interrupts per second.
    pub hz: u32,
    /// Initial process set.
    pub command: BootCommand,
    /// First address past the kernel image.
    pub kernel_end: usize,
    /// Draw the memory maps on every trap.
    pub memshow: bool,
    /// Run the boot self-test before the first process starts.
    pub selftest: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            hz: DEFAULT_HZ,
            command: BootCommand::default(),
            kernel_end: DEFAULT_KERNEL_END,
            memshow: true,
            selftest: false,
        }
    }
}

impl KernelConfig {
    /// Sets the timer frequency.
    pub fn with_hz(mut self, hz: u32) -> Self {
        self.hz = hz;
        self
    }

    /// Sets the boot command.
    pub fn with_command(mut self, command: BootCommand) -> Self {
        self.command = command;
        self
    }

    /// Turns the memory visualizer on or off.
    pub fn with_memshow(mut self, memshow: bool) -> Self {
        self.memshow = memshow;
        self
    }

    /// Turns the boot self-test on or off.
    pub fn with_selftest(mut self, selftest: bool) -> Self {
        self.selftest = selftest;
        self
    }
}
