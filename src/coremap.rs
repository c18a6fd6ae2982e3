//! Coremap: the physical-frame allocator and eviction engine.
//!
//! Grounded on the reference kernel's `coremap.c`: a flat array of frame
//! descriptors, a linear free-run search, and (once swap is introduced) a
//! round-robin victim scan. The cyclic coremap<->PTE reference that the
//! design notes allow as either "an index or a raw pointer guarded by the
//! coremap lock" is implemented here as an index pair (`PteRef`) resolved
//! through a caller-supplied `PageTableDirectory`, so this crate never holds
//! a raw pointer into another module's storage (see DESIGN.md).
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{PAGE_SIZE, RAM_CAP_BYTES};
use crate::klog;
use crate::swap::{PageStore, SwapStore};
use crate::tlb::Tlb;

/// Identifies one address space's page table, for the coremap to reach back
/// into it during eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddrSpaceId(pub u32);

/// A non-owning handle to one entry of some address space's page table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PteRef {
    pub as_id: AddrSpaceId,
    pub index: usize,
}

/// Lets the coremap demote a victim's PTE to `IN_SWAP` without owning (or
/// borrowing for the frame's lifetime) that address space's page table.
/// Implemented by whatever process-wide registry of address spaces the
/// surrounding kernel keeps; `addrspace.rs`'s tests provide a minimal one.
pub trait PageTableDirectory {
    fn set_swapped_out(&mut self, pte: PteRef, swap_index: u32);
}

/// Physical-memory byte accessor, the direct-mapped-RAM analogue of
/// `PageStore`/`ElfLoader`: this crate tracks frame ownership but has no
/// notion of "the bytes currently in a frame" of its own, so eviction and
/// swap-in need a collaborator to actually move them. A real kernel
/// implements this over its identity-mapped physical memory window; hosted
/// tests use the `Vec<u8>`-backed `VecRam` below.
pub trait Ram {
    fn read_frame(&self, paddr: u32) -> [u8; PAGE_SIZE];
    fn write_frame(&mut self, paddr: u32, bytes: &[u8; PAGE_SIZE]);

    fn zero_frame(&mut self, paddr: u32) {
        self.write_frame(paddr, &[0u8; PAGE_SIZE]);
    }
}

#[cfg(test)]
pub(crate) struct VecRam {
    bytes: Vec<u8>,
}

#[cfg(test)]
impl VecRam {
    pub(crate) fn new(n_frames: usize) -> Self {
        VecRam { bytes: vec![0u8; n_frames * PAGE_SIZE] }
    }
}

#[cfg(test)]
impl Ram for VecRam {
    fn read_frame(&self, paddr: u32) -> [u8; PAGE_SIZE] {
        let base = paddr as usize;
        let mut out = [0u8; PAGE_SIZE];
        out.copy_from_slice(&self.bytes[base..base + PAGE_SIZE]);
        out
    }

    fn write_frame(&mut self, paddr: u32, bytes: &[u8; PAGE_SIZE]) {
        let base = paddr as usize;
        self.bytes[base..base + PAGE_SIZE].copy_from_slice(bytes);
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    used: bool,
    alloc_size: u32,
    locked: bool,
    owner: Option<PteRef>,
}

impl Entry {
    const FREE: Entry = Entry { used: false, alloc_size: 0, locked: false, owner: None };
}

pub struct Coremap {
    inner: Mutex<Inner>,
}

struct Inner {
    frames: Vec<Entry>,
    victim_cursor: usize,
}

impl Coremap {
    /// Boot-time contract (§4.4/§6): caps `ram_size_bytes` at 512 MiB,
    /// derives `n_frames` from it, and reserves every frame from 0 through
    /// the coremap's own backing storage as kernel frames. `firstfree_paddr`
    /// is `KVADDR_TO_PADDR(firstfree)`, the physical address the low-level
    /// boot loader reports as the first byte past the kernel image; the
    /// caller discovers both inputs, this crate does not.
    pub fn bootstrap(ram_size_bytes: usize, firstfree_paddr: u32) -> Coremap {
        let capped = ram_size_bytes.min(RAM_CAP_BYTES);
        let n_frames = capped / PAGE_SIZE;
        let kernel_end_frame = (firstfree_paddr as usize) / PAGE_SIZE;
        let coremap_bytes = n_frames * core::mem::size_of::<Entry>();
        let coremap_frames = (coremap_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        let kernel_reserved_frames = (kernel_end_frame + coremap_frames).min(n_frames);
        Self::bootstrap_frames(n_frames, kernel_reserved_frames)
    }

    fn bootstrap_frames(n_frames: usize, kernel_reserved_frames: usize) -> Coremap {
        assert!(kernel_reserved_frames <= n_frames);
        let mut frames = vec![Entry::FREE; n_frames];
        for f in frames.iter_mut().take(kernel_reserved_frames) {
            *f = Entry { used: true, alloc_size: 1, locked: false, owner: None };
        }
        Coremap { inner: Mutex::new(Inner { frames, victim_cursor: 0 }) }
    }

    /// Test-only constructor: bypasses the ram-size/firstfree derivation in
    /// `bootstrap` so unit tests can pick exact, small frame counts.
    #[cfg(test)]
    pub(crate) fn for_test(n_frames: usize, kernel_reserved_frames: usize) -> Coremap {
        Self::bootstrap_frames(n_frames, kernel_reserved_frames)
    }

    pub fn n_frames(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().frames.iter().filter(|e| !e.used).count()
    }

    /// Physical address of a contiguous run of `n` free frames, zero-filled,
    /// or `None` if swap is unavailable/disabled and no eviction can make
    /// room. When `n == 1` and no free frame exists, the round-robin victim
    /// is evicted and its frame reused. Kernel callers (owner = `None`)
    /// should treat a `None` result as fatal; user callers treat it as
    /// "terminate the faulting process", per §7.
    #[allow(clippy::too_many_arguments)]
    pub fn get_ppages(
        &self,
        n: usize,
        owner: Option<PteRef>,
        swap: &SwapStore,
        store: &mut dyn PageStore,
        directory: &mut dyn PageTableDirectory,
        tlb: &mut Tlb,
        ram: &mut dyn Ram,
    ) -> Option<u32> {
        assert!(n >= 1);
        if owner.is_some() {
            assert_eq!(n, 1, "user allocations are always single-page");
        }

        if let Some(base) = self.try_alloc_free_run(n, owner) {
            let paddr = (base * PAGE_SIZE) as u32;
            Self::zero_run(ram, paddr, n);
            return Some(paddr);
        }

        if n == 1 {
            let victim = self.evict_one(swap, store, directory, tlb, ram);
            self.commit_run(victim, 1, owner);
            let paddr = (victim * PAGE_SIZE) as u32;
            Self::zero_run(ram, paddr, 1);
            return Some(paddr);
        }

        None
    }

    fn zero_run(ram: &mut dyn Ram, base_paddr: u32, n: usize) {
        for i in 0..n {
            ram.zero_frame(base_paddr + (i * PAGE_SIZE) as u32);
        }
    }

    /// Searches for a free run of `n` frames and, if found, commits it to
    /// `owner` before releasing the lock — search and bookkeeping happen as
    /// one atomic step so two concurrent callers can never both observe and
    /// claim the same free frame (§5: "cm_lock ... Held across free-frame
    /// search, allocation bookkeeping").
    fn try_alloc_free_run(&self, n: usize, owner: Option<PteRef>) -> Option<usize> {
        let mut inner = self.inner.lock();
        let mut run_start: Option<usize> = None;
        let mut i = 0;
        while i < inner.frames.len() {
            if inner.frames[i].used {
                run_start = None;
                i += 1;
            } else {
                let start = *run_start.get_or_insert(i);
                if i - start + 1 == n {
                    inner.frames[start].alloc_size = n as u32;
                    for f in inner.frames[start..start + n].iter_mut() {
                        f.used = true;
                        f.owner = owner;
                    }
                    return Some(start);
                }
                i += 1;
            }
        }
        None
    }

    fn commit_run(&self, base: usize, n: usize, owner: Option<PteRef>) {
        let mut inner = self.inner.lock();
        inner.frames[base].alloc_size = n as u32;
        for f in inner.frames[base..base + n].iter_mut() {
            f.used = true;
            f.owner = owner;
        }
    }

    /// Returns the run starting at `paddr` to the free pool.
    pub fn free_ppages(&self, paddr: u32) {
        let base = (paddr / PAGE_SIZE as u32) as usize;
        let mut inner = self.inner.lock();
        let n = inner.frames[base].alloc_size;
        assert_ne!(n, 0, "free_ppages: not a run head");
        for f in inner.frames[base..base + n as usize].iter_mut() {
            f.used = false;
            f.owner = None;
            f.locked = false;
        }
        inner.frames[base].alloc_size = 0;
    }

    /// Round-robin one-handed clock: the first non-kernel, non-pinned frame
    /// found within one full sweep is the victim. Panics if every user frame
    /// is pinned (§4.4: "the system is wedged by pinning").
    fn pick_victim(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.frames.len();
        for _ in 0..n {
            inner.victim_cursor = (inner.victim_cursor + 1) % n;
            let c = inner.victim_cursor;
            if inner.frames[c].owner.is_some() && !inner.frames[c].locked {
                return c;
            }
        }
        panic!("coremap: no evictable frame, system is wedged by pinning");
    }

    fn evict_one(
        &self,
        swap: &SwapStore,
        store: &mut dyn PageStore,
        directory: &mut dyn PageTableDirectory,
        tlb: &mut Tlb,
        ram: &mut dyn Ram,
    ) -> usize {
        let victim = self.pick_victim();
        klog!("evicting frame {}", victim);

        // Step 1-2: pin the victim, then release cm_lock around the blocking write.
        let owner = {
            let mut inner = self.inner.lock();
            inner.frames[victim].locked = true;
            inner.frames[victim].owner.expect("victim must have an owner")
        };

        let paddr = (victim * PAGE_SIZE) as u32;
        let page = ram.read_frame(paddr);
        let swap_index = swap.swap_out(store, &page);

        // Step 4-6: reacquire, unpin, demote PTE, drop stale TLB entry.
        {
            let mut inner = self.inner.lock();
            inner.frames[victim].locked = false;
        }
        directory.set_swapped_out(owner, swap_index as u32);
        tlb.remove_by_paddr(paddr);

        victim
    }

    #[cfg(test)]
    fn status(&self, frame: usize) -> (bool, u32, bool, Option<PteRef>) {
        let inner = self.inner.lock();
        let e = inner.frames[frame];
        (e.used, e.alloc_size, e.locked, e.owner)
    }
}
