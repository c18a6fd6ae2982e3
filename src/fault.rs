//! The fault handler: the single entry point that ties the coremap, page
//! table, swap store and TLB together. Grounded on the reference kernel's
//! `vm_fault` in `vm.c`.
use crate::addrspace::{AddressSpace, ElfLoader, ProcessTable};
use crate::config::{PAGE_MASK, PAGE_SIZE};
use crate::coremap::{AddrSpaceId, Coremap, PageTableDirectory, PteRef, Ram};
use crate::error::{VmError, VmResult};
use crate::klog;
use crate::pagetable::{self, Status};
use crate::segment::SegmentKind;
use crate::stats::{self, Stat};
use crate::swap::{PageStore, SwapStore};
use crate::tlb::Tlb;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultType {
    Read,
    Write,
    /// A store to a read-only (text) page. The MMU/trap layer is expected to
    /// have already distinguished this from an ordinary write fault.
    Readonly,
    /// Any other raw MMU exception code the trap layer forwards unparsed.
    /// §4.6 step 2's default arm needs a representable case to fall into.
    Other(u32),
}

/// Bridges `ProcessTable` (known to this module) to `coremap::PageTableDirectory`
/// (known only to `coremap.rs`, which has no reason to depend on `AddressSpace`),
/// so the coremap can demote an eviction victim's PTE without this module ever
/// holding two live `&mut AddressSpace` handles into the same table at once.
struct TableDirectory<'a>(&'a mut dyn ProcessTable);

impl<'a> PageTableDirectory for TableDirectory<'a> {
    fn set_swapped_out(&mut self, pte: PteRef, swap_index: u32) {
        let as_ = self.0.get_mut(pte.as_id).expect("eviction victim's address space vanished");
        let entry = as_.get_entry_by_index_mut(pte.index);
        pagetable::set_entry(entry, 0, swap_index, Status::InSwap);
    }
}

/// Services one TLB/page fault. `current` is `None` when the fault arrives
/// with no running process yet (an early-boot fault, per §7). Every
/// collaborator is passed explicitly rather than reached through a global,
/// the same dependency-injection style `Coremap::get_ppages` already uses.
#[allow(clippy::too_many_arguments)]
pub fn vm_fault(
    fault_type: FaultType,
    faultaddr: u32,
    current: Option<AddrSpaceId>,
    table: &mut dyn ProcessTable,
    coremap: &Coremap,
    swap: &SwapStore,
    store: &mut dyn PageStore,
    tlb: &mut Tlb,
    loader: &mut dyn ElfLoader,
    ram: &mut dyn Ram,
) -> VmResult<()> {
    stats::hit(Stat::TlbFault);
    let base = faultaddr & PAGE_MASK;

    match fault_type {
        FaultType::Read | FaultType::Write => {}
        FaultType::Readonly => return Err(VmError::Readonly),
        FaultType::Other(_) => return Err(VmError::Invalid),
    }

    let as_id = current.ok_or(VmError::BadAddress)?;

    let (seg, index, status, owner) = {
        let as_ = table.get_mut(as_id).ok_or(VmError::BadAddress)?;
        if !as_.contains(faultaddr) {
            return Err(VmError::Translation);
        }
        (
            as_.get_segment_type(faultaddr),
            as_.get_index(faultaddr),
            as_.get_entry(faultaddr).status(),
            as_.pte_ref(faultaddr),
        )
    };

    match status {
        Status::NotLoaded => {
            klog!("fault at {:#x}: not loaded, allocating", faultaddr);
            let pa = {
                let mut dir = TableDirectory(&mut *table);
                coremap
                    .get_ppages(1, Some(owner), swap, store, &mut dir, tlb, ram)
                    .expect("user single-page allocation must either succeed or panic via eviction")
            };

            let readonly_text = seg == SegmentKind::Text && cfg!(feature = "readonly-no-swap");
            let new_status = if readonly_text { Status::InMemoryReadonly } else { Status::InMemory };
            {
                let as_ = table.get_mut(as_id).expect("address space vanished mid-fault");
                pagetable::set_entry(as_.get_entry_by_index_mut(index), pa, 0, new_status);
            }

            let load_from_elf = seg != SegmentKind::Stack && {
                let as_ = table.get_mut(as_id).expect("address space vanished mid-fault");
                as_.check_in_elf(faultaddr)
            };
            if load_from_elf {
                let as_ = table.get_mut(as_id).expect("address space vanished mid-fault");
                as_.load_page(loader, faultaddr);
            } else {
                stats::hit(Stat::PageFaultZero);
            }
        }
        Status::InMemory | Status::InMemoryReadonly => {
            stats::hit(Stat::TlbReload);
        }
        Status::InSwap => {
            klog!("fault at {:#x}: swapped out, paging in", faultaddr);
            let swap_index = {
                let as_ = table.get_mut(as_id).expect("address space vanished mid-fault");
                as_.get_entry(faultaddr).swap_index()
            };
            let pa = {
                let mut dir = TableDirectory(&mut *table);
                coremap
                    .get_ppages(1, Some(owner), swap, store, &mut dir, tlb, ram)
                    .expect("user single-page allocation must either succeed or panic via eviction")
            };
            let mut page = [0u8; PAGE_SIZE];
            swap.swap_in(store, swap_index as usize, &mut page);
            ram.write_frame(pa, &page);
            let as_ = table.get_mut(as_id).expect("address space vanished mid-fault");
            pagetable::set_entry(as_.get_entry_by_index_mut(index), pa, 0, Status::InMemory);
            stats::hit(Stat::PageFaultSwap);
        }
    }

    let read_only = seg == SegmentKind::Text;
    let frame_paddr = {
        let as_ = table.get_mut(as_id).expect("address space vanished mid-fault");
        as_.get_entry(faultaddr).paddr()
    };
    tlb.insert(base, frame_paddr, read_only);

    Ok(())
}

/// Tears down an address space, applying the frames and swap slots its page
/// table reclaims back onto the live `Coremap`/`SwapStore` it was drawing
/// from. Nothing else in the crate talks to both resources at once, the same
/// way `vm_fault` is the only place that ties them together on the fault path.
pub fn retire_address_space(as_: AddressSpace, coremap: &Coremap, swap: &SwapStore) {
    let reclaimed = as_.destroy();
    for frame_index in reclaimed.frames {
        coremap.free_ppages(frame_index * PAGE_SIZE as u32);
    }
    for swap_index in reclaimed.swap_slots {
        swap.swap_free(swap_index as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrspace::SingleAddrSpaceTable;
    use crate::coremap::VecRam;
    use crate::swap::FakeFile;

    struct ZeroLoader;
    impl ElfLoader for ZeroLoader {
        fn load_page(&mut self, _offset: u32, _target_paddr: u32, _size: u32) {}
    }

    fn built_table() -> SingleAddrSpaceTable {
        let mut as_ = AddressSpace::create(AddrSpaceId(0));
        as_.define_region(0x0040_0000, 0x1000, 0, 0x10); // text, one page, tiny elf prefix
        as_.define_region(0x0041_0000, 0x1000, 0, 0); // data, demand-zero
        as_.define_stack();
        as_.define_pt();
        SingleAddrSpaceTable { as_ }
    }

    #[test]
    fn readonly_fault_is_rejected_before_touching_any_state() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        let res = vm_fault(
            FaultType::Readonly,
            0x0040_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        );
        assert_eq!(res, Err(VmError::Readonly));
    }

    #[test]
    fn other_fault_type_is_rejected_as_invalid() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        let res = vm_fault(
            FaultType::Other(0xdead),
            0x0040_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        );
        assert_eq!(res, Err(VmError::Invalid));
    }

    #[test]
    fn no_current_address_space_is_bad_address() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        let res = vm_fault(
            FaultType::Read,
            0x0040_0000,
            None,
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        );
        assert_eq!(res, Err(VmError::BadAddress));
    }

    #[test]
    fn vaddr_outside_every_segment_is_a_translation_error() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        let res = vm_fault(
            FaultType::Read,
            0x0050_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        );
        assert_eq!(res, Err(VmError::Translation));
    }

    #[test]
    fn not_loaded_text_fault_allocates_loads_and_installs_readonly_tlb_entry() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        vm_fault(
            FaultType::Read,
            0x0040_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        )
        .unwrap();

        assert_eq!(table.as_.get_entry(0x0040_0000).status(), Status::InMemory);
        let (paddr, dirty) = tlb.probe(0x0040_0000).unwrap();
        assert!(!dirty, "text page must be installed read-only (P6)");
        assert_eq!(paddr, table.as_.get_entry(0x0040_0000).paddr());
    }

    #[test]
    fn not_loaded_data_fault_is_writable_in_tlb() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        vm_fault(
            FaultType::Write,
            0x0041_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        )
        .unwrap();

        let (_, dirty) = tlb.probe(0x0041_0000).unwrap();
        assert!(dirty);
    }

    #[test]
    fn repeated_fault_on_resident_page_is_a_pure_tlb_reload() {
        let mut table = built_table();
        let cm = Coremap::for_test(4, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(4);

        vm_fault(
            FaultType::Read,
            0x0041_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        )
        .unwrap();
        let frame_before = table.as_.get_entry(0x0041_0000).frame_index();

        tlb.invalidate();
        vm_fault(
            FaultType::Read,
            0x0041_0000,
            Some(AddrSpaceId(0)),
            &mut table,
            &cm,
            &swap,
            &mut file,
            &mut tlb,
            &mut loader,
            &mut ram,
        )
        .unwrap();

        assert_eq!(table.as_.get_entry(0x0041_0000).frame_index(), frame_before);
        assert!(tlb.probe(0x0041_0000).is_some());
    }

    #[test]
    fn eviction_round_trip_scenario3() {
        // Two user-eligible frames total; three distinct pages fault in, so
        // the third fault must evict one of the first two and swap it out.
        let mut table = built_table();
        let cm = Coremap::for_test(2, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(2);
        let id = Some(AddrSpaceId(0));

        vm_fault(FaultType::Write, 0x0040_0000, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();
        vm_fault(FaultType::Write, 0x0041_0000, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();
        assert_eq!(cm.free_count(), 0);

        // A third distinct page (the stack) forces eviction of one of the two.
        let stack_vaddr = crate::config::USERSTACK - 1;
        vm_fault(FaultType::Write, stack_vaddr, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();

        let text_status = table.as_.get_entry(0x0040_0000).status();
        let data_status = table.as_.get_entry(0x0041_0000).status();
        let one_evicted = (text_status == Status::InSwap) ^ (data_status == Status::InSwap);
        assert!(one_evicted, "exactly one of the first two pages must have been swapped out");

        // Touching the evicted page again must swap it back in and reach
        // IN_MEMORY without losing its contents, now that eviction actually
        // carries the victim's real bytes to swap (see coremap.rs's
        // `eviction_preserves_victim_frame_bytes_l1` for the direct test).
        let evicted_vaddr = if text_status == Status::InSwap { 0x0040_0000 } else { 0x0041_0000 };
        vm_fault(FaultType::Read, evicted_vaddr, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();
        assert_eq!(table.as_.get_entry(evicted_vaddr).status(), Status::InMemory);
    }

    #[test]
    fn retire_address_space_returns_resident_and_swapped_resources_scenario6() {
        // Two frames total: one ends up resident, the other forced into swap
        // by a third fault, mirroring scenario3's setup so destroy() has one
        // of each kind of entry to reclaim.
        let mut table = built_table();
        let cm = Coremap::for_test(2, 0);
        let swap = SwapStore::new();
        let mut file = FakeFile::new();
        let mut tlb = Tlb::new();
        let mut loader = ZeroLoader;
        let mut ram = VecRam::new(2);
        let id = Some(AddrSpaceId(0));

        vm_fault(FaultType::Write, 0x0040_0000, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();
        vm_fault(FaultType::Write, 0x0041_0000, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();
        let stack_vaddr = crate::config::USERSTACK - 1;
        vm_fault(FaultType::Write, stack_vaddr, id, &mut table, &cm, &swap, &mut file, &mut tlb, &mut loader, &mut ram)
            .unwrap();

        let free_before = cm.free_count();
        let swap_free_before = swap.free_count();
        assert_eq!(free_before, 0, "both frames should be owned by this address space");

        retire_address_space(table.as_, &cm, &swap);

        assert_eq!(cm.free_count(), free_before + 1, "the one resident frame must come back to the coremap");
        assert_eq!(swap.free_count(), swap_free_before + 1, "the one swapped-out slot must come back to the swap store");
    }
}
