//! Per-address-space page table: the authoritative vaddr -> {frame, swap
//! slot, status} mapping. Grounded on the reference kernel's `pt.c`/`pt.h`:
//! a dense array, one entry per page the address space's three segments
//! cover, with bit-packed fields instead of C bitfields (§9 design note:
//! "do NOT rely on language-specific bitfield ordering").
//!
//! This module is a pure data structure. It does not allocate frames and
//! does not drive eviction.
use alloc::vec;
use alloc::vec::Vec;

use crate::config::PAGE_SIZE;

const FRAME_BITS: u32 = 20;
const SWAP_BITS: u32 = 12;
const FRAME_MASK: u32 = (1 << FRAME_BITS) - 1;
const SWAP_MASK: u32 = (1 << SWAP_BITS) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    NotLoaded,
    InMemory,
    /// Resident text page known to be reloadable from the ELF image.
    /// Only produced when the `readonly-no-swap` feature is enabled.
    InMemoryReadonly,
    InSwap,
}

/// A single page-table entry, packed as `frame_index:20 | swap_index:12 |
/// status:2` the way the reference kernel's `struct pt_entry` bitfields do,
/// but with explicit masks rather than a compiler-defined bitfield layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtEntry(u64);

impl PtEntry {
    const STATUS_SHIFT: u32 = FRAME_BITS + SWAP_BITS;

    pub const NOT_LOADED: PtEntry = PtEntry(0);

    pub fn frame_index(&self) -> u32 {
        (self.0 as u32) & FRAME_MASK
    }

    pub fn swap_index(&self) -> u32 {
        ((self.0 >> FRAME_BITS) as u32) & SWAP_MASK
    }

    pub fn status(&self) -> Status {
        match (self.0 >> Self::STATUS_SHIFT) & 0b11 {
            0 => Status::NotLoaded,
            1 => Status::InMemory,
            2 => Status::InSwap,
            3 => Status::InMemoryReadonly,
            _ => unreachable!(),
        }
    }

    fn pack(frame_index: u32, swap_index: u32, status: Status) -> PtEntry {
        let status_bits: u64 = match status {
            Status::NotLoaded => 0,
            Status::InMemory => 1,
            Status::InSwap => 2,
            Status::InMemoryReadonly => 3,
        };
        assert!(frame_index <= FRAME_MASK, "frame_index does not fit in 20 bits");
        assert!(swap_index <= SWAP_MASK, "swap_index does not fit in 12 bits");
        PtEntry(
            (frame_index as u64)
                | ((swap_index as u64) << FRAME_BITS)
                | (status_bits << Self::STATUS_SHIFT),
        )
    }

    pub fn paddr(&self) -> u32 {
        self.frame_index() * PAGE_SIZE as u32
    }
}

impl Default for PtEntry {
    fn default() -> Self {
        PtEntry::NOT_LOADED
    }
}

/// Preconditions enforced per §3: each status implies a specific shape for
/// the other two fields. Violating one of these is a bug in the caller, not
/// a recoverable runtime condition, so we assert rather than return `Result`.
pub fn set_entry(entry: &mut PtEntry, paddr: u32, swap_index: u32, status: Status) {
    match status {
        Status::NotLoaded => {
            assert_eq!(paddr, 0);
            assert_eq!(swap_index, 0);
        }
        Status::InMemory | Status::InMemoryReadonly => {
            assert_ne!(paddr, 0);
            assert_eq!(swap_index, 0);
            assert_eq!(paddr % PAGE_SIZE as u32, 0);
        }
        Status::InSwap => {
            assert_eq!(paddr, 0);
        }
    }
    let frame_index = paddr / PAGE_SIZE as u32;
    *entry = PtEntry::pack(frame_index, swap_index, status);
}

/// A dense array of entries spanning an address space's text+data+stack
/// page counts (see `segment.rs` for the index layout).
pub struct PageTable {
    entries: Vec<PtEntry>,
}

/// Resources a page table hands back on `empty()`: frames to return to the
/// coremap, and swap slots to free. `empty` itself does not talk to the
/// coremap or swap store directly (keeping this module a pure data
/// structure) — the caller applies the resulting lists.
pub struct Reclaimed {
    pub frames: Vec<u32>,
    pub swap_slots: Vec<u32>,
}

impl PageTable {
    pub fn create(npages: usize) -> PageTable {
        PageTable { entries: vec![PtEntry::NOT_LOADED; npages] }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> &PtEntry {
        &self.entries[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut PtEntry {
        &mut self.entries[index]
    }

    /// Releases every entry's backing resource. The page table itself is
    /// dropped by the caller afterward (`destroy` in the reference API is
    /// just Rust's ordinary drop once `Reclaimed` has been applied).
    pub fn empty(&mut self) -> Reclaimed {
        let mut frames = Vec::new();
        let mut swap_slots = Vec::new();
        for entry in self.entries.iter_mut() {
            match entry.status() {
                Status::InMemory | Status::InMemoryReadonly => frames.push(entry.frame_index()),
                Status::InSwap => swap_slots.push(entry.swap_index()),
                Status::NotLoaded => {}
            }
            *entry = PtEntry::NOT_LOADED;
        }
        Reclaimed { frames, swap_slots }
    }
}
