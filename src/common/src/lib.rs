//! Shared ABI and data types for the Tilia kernel.
//!
//! Everything in here is visible on both sides of the trap boundary: the
//! memory layout, process identifiers, trap numbers and the saved register
//! snapshot, page permission bits, and the system-wide error types.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod error;
pub mod layout;
pub mod paging;
pub mod pid;
pub mod trap;

pub use error::{Fatal, KernelError};
pub use paging::{PageFaultCause, PageFlags};
pub use pid::Pid;
pub use trap::{Registers, TrapNumber};
