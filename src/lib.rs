//! Demand-paged virtual memory core: coremap, per-address-space page table,
//! swap store, and the fault path that ties them together.
//!
//! `no_std` under `cfg(baremetal)`, the same split the reference kernel
//! uses between its baremetal target and its hosted test tooling. A real
//! kernel supplies the `#[global_allocator]` this crate's `Vec`-backed
//! coremap and page tables run on; discovering RAM size and placing the
//! coremap itself are the out-of-scope boot sequence's job (§6).
#![cfg_attr(baremetal, no_std)]

extern crate alloc;

#[macro_use]
mod debug;

pub mod addrspace;
pub mod config;
pub mod coremap;
pub mod error;
pub mod fault;
pub mod pagetable;
pub mod segment;
pub mod stats;
pub mod swap;
pub mod tlb;

pub use error::{VmError, VmResult};
