//! Tilia Kernel
//!
//! A small teaching kernel: physical page accounting, per-process
//! two-level page tables, `fork`, round-robin scheduling and a live memory
//! map on the text console.
//!
//! # Architecture
//!
//! The kernel is structured into the following modules:
//! - `arch`: platform implementations (the hosted simulator)
//! - `boot`: boot status reporting and the kernel page table
//! - `memory`: the page ledger and page tables
//! - `process`: process table and initial process setup
//! - `trap`: trap dispatch, system calls and page faults
//! - `sched`: round-robin scheduler
//! - `check`: whole-system invariant checker
//! - `memshow`: memory visualizer
//! - `klog`: `log` backend writing to a serial port
//!
//! Everything the kernel needs from the machine goes through the
//! [`tilia_hal`] traits; [`Kernel`] is generic over the platform.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod check;
pub mod config;
pub mod console;
pub mod kernel;
pub mod klog;
pub mod memory;
pub mod memshow;
pub mod process;
pub mod sched;
pub mod selftest;
pub mod testutil;
pub mod trap;

pub use config::{BootCommand, KernelConfig};
pub use kernel::Kernel;
