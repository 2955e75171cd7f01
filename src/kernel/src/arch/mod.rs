//! Platform implementations.
//!
//! - `sim`: a hosted machine simulator with its own small instruction set,
//!   used by the demo binary and the test suites.

pub mod sim;
