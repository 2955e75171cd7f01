//! Physical page accounting and page tables.
//!
//! - `ledger`: per-page owner and reference count
//! - `pagetable`: two-level page tables built out of ledger pages

pub mod ledger;
pub mod pagetable;

pub use ledger::{Ledger, Owner, PageInfo};
pub use pagetable::{lookup, Mapping, PageEntry, PageTable, Vm};
