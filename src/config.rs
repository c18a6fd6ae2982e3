//! Compile-time configuration. There is no runtime config file; these are the
//! same kind of named constants the reference kernel keeps in its `machine`/
//! board headers, plus the two Cargo features in `Cargo.toml` that stand in
//! for its board-select features.

/// Bytes in one page, and the unit of every frame/slot/run in this crate.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_MASK: u32 = !(PAGE_SIZE as u32 - 1);

/// Number of software TLB entries.
pub const NUM_TLB: usize = 64;

/// Fixed user stack size, in pages, ending at `USERSTACK`.
pub const VM_STACKPAGES: usize = 18;

/// Top of the user stack (architecture constant for the MIPS-like target).
pub const USERSTACK: u32 = 0x8000_0000;

/// Top of user-addressable virtual memory (segments must end at or below this).
pub const USERSPACETOP: u32 = USERSTACK;

/// Swap file size: 9 MiB.
pub const SWAPFILE_SIZE: usize = 9 * 1024 * 1024;
pub const SWAPFILE_NPAGES: usize = SWAPFILE_SIZE / PAGE_SIZE;

/// `upper(log2(SWAPFILE_NPAGES))`, the width of `swap_index` in the PTE.
pub const SWAP_INDEX_BITS: u32 = 12;

/// RAM is capped at 512 MiB; beyond that KSEG0 can no longer direct-map it.
pub const RAM_CAP_BYTES: usize = 512 * 1024 * 1024;

pub const fn page_align_down(addr: u32) -> u32 {
    addr & PAGE_MASK
}

pub const fn page_round_up(addr: u32) -> u32 {
    page_align_down(addr + PAGE_SIZE as u32 - 1)
}
