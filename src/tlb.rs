//! Software TLB driver.
//!
//! Modeled on the reference kernel's `vm_tlb.c`: a fixed-size array of
//! (vaddr, paddr, valid, dirty) entries, round-robin replacement, and no
//! failure modes — a TLB op only ever hides latency, it never reports an
//! error. `bitflags` gives the VALID/DIRTY pair the same orthogonal-flag
//! treatment the reference kernel's `TLBLO_VALID`/`TLBLO_DIRTY` bits get,
//! the way `NON-OS-N0N-OS`'s `VmFlags` packs its own page attributes.
use bitflags::bitflags;

use crate::config::{NUM_TLB, PAGE_MASK};
use crate::stats::{self, Stat};

bitflags! {
    pub struct EntryFlags: u8 {
        const VALID = 0b01;
        /// Writable. Named DIRTY to match the hardware TLBLO bit it mirrors.
        const DIRTY = 0b10;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TlbEntry {
    vaddr: u32,
    paddr: u32,
    flags: EntryFlags,
}

impl TlbEntry {
    const INVALID: TlbEntry = TlbEntry { vaddr: 0, paddr: 0, flags: EntryFlags::empty() };
}

/// The software TLB. Single-CPU only: no cross-core shootdown is implemented
/// (see `readonly-no-swap`'s sibling open question in DESIGN.md) — a design
/// extending this to SMP would need to add one.
pub struct Tlb {
    entries: [TlbEntry; NUM_TLB],
    victim: usize,
}

impl Tlb {
    pub const fn new() -> Self {
        Tlb { entries: [TlbEntry::INVALID; NUM_TLB], victim: 0 }
    }

    /// Writes an invalid entry to every slot and resets the round-robin cursor.
    pub fn invalidate(&mut self) {
        critical_section::with(|_cs| {
            for e in self.entries.iter_mut() {
                *e = TlbEntry::INVALID;
            }
            self.victim = 0;
        });
        stats::hit(Stat::TlbInvalidation);
    }

    /// Inserts a (vaddr -> paddr) translation at the current victim slot and
    /// advances the cursor. `paddr` must be page-aligned.
    pub fn insert(&mut self, vaddr: u32, paddr: u32, read_only: bool) {
        assert_eq!(paddr & !PAGE_MASK, 0, "tlb_insert: paddr not page-aligned");
        let replaced = critical_section::with(|_cs| {
            let mut flags = EntryFlags::VALID;
            if !read_only {
                flags |= EntryFlags::DIRTY;
            }
            let was_valid = self.entries[self.victim].flags.contains(EntryFlags::VALID);
            self.entries[self.victim] = TlbEntry { vaddr: vaddr & PAGE_MASK, paddr, flags };
            self.victim = (self.victim + 1) % NUM_TLB;
            was_valid
        });
        if replaced {
            stats::hit(Stat::TlbFaultReplace);
        } else {
            stats::hit(Stat::TlbFaultFree);
        }
    }

    /// Removes any entry translating `vaddr`, if present.
    pub fn remove_by_vaddr(&mut self, vaddr: u32) {
        let vaddr = vaddr & PAGE_MASK;
        critical_section::with(|_cs| {
            for e in self.entries.iter_mut() {
                if e.flags.contains(EntryFlags::VALID) && e.vaddr == vaddr {
                    *e = TlbEntry::INVALID;
                }
            }
        });
    }

    /// Removes any entry translating to `paddr`, if present. Used during
    /// eviction so no stale entry survives pointing at a reassigned frame.
    pub fn remove_by_paddr(&mut self, paddr: u32) {
        let paddr = paddr & PAGE_MASK;
        critical_section::with(|_cs| {
            for e in self.entries.iter_mut() {
                if e.flags.contains(EntryFlags::VALID) && e.paddr == paddr {
                    *e = TlbEntry::INVALID;
                }
            }
        });
    }

    /// Looks up `vaddr`; returns `(paddr, dirty)` on a hit. Test/verification
    /// helper standing in for the hardware `tlb_probe` instruction.
    #[cfg(test)]
    pub fn probe(&self, vaddr: u32) -> Option<(u32, bool)> {
        let vaddr = vaddr & PAGE_MASK;
        self.entries
            .iter()
            .find(|e| e.flags.contains(EntryFlags::VALID) && e.vaddr == vaddr)
            .map(|e| (e.paddr, e.flags.contains(EntryFlags::DIRTY)))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.flags.contains(EntryFlags::VALID))
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}
