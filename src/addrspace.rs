//! Address space: owns the three segments and the page table, and drives
//! per-page ELF loading. Grounded on the reference kernel's `addrspace.c`.
use crate::coremap::{AddrSpaceId, PteRef};
use crate::config::{PAGE_SIZE, USERSTACK, VM_STACKPAGES};
use crate::pagetable::{self, PageTable, Reclaimed};
use crate::segment::{Segment, SegmentKind};
use crate::stats::{self, Stat};

/// The out-of-scope executable-loader collaborator: copy `size` bytes from
/// `offset` in the program image to physical address `target_paddr`. Short
/// reads zero-fill, same as the reference kernel's `load_page`.
pub trait ElfLoader {
    fn load_page(&mut self, offset: u32, target_paddr: u32, size: u32);
}

pub struct AddressSpace {
    pub id: AddrSpaceId,
    text: Option<Segment>,
    data: Option<Segment>,
    stack: Option<Segment>,
    page_table: Option<PageTable>,
}

impl AddressSpace {
    pub fn create(id: AddrSpaceId) -> AddressSpace {
        AddressSpace { id, text: None, data: None, stack: None, page_table: None }
    }

    /// Fills `text` first, then `data`. A third call panics.
    pub fn define_region(&mut self, first_vaddr: u32, memsize: u32, elf_offset: u32, elf_size: u32) {
        if self.text.is_none() {
            self.text = Some(Segment::define_region(SegmentKind::Text, first_vaddr, memsize, elf_offset, elf_size));
        } else if self.data.is_none() {
            self.data = Some(Segment::define_region(SegmentKind::Data, first_vaddr, memsize, elf_offset, elf_size));
        } else {
            panic!("as_define_region: too many regions");
        }
    }

    /// Defines the fixed 18-page stack ending at USERSTACK, returning the
    /// initial user stack pointer.
    pub fn define_stack(&mut self) -> u32 {
        self.stack = Some(Segment::define_stack(USERSTACK, VM_STACKPAGES));
        USERSTACK
    }

    /// Must run after all three segments are defined.
    pub fn define_pt(&mut self) {
        let npages = self.text_seg().npages + self.data_seg().npages + self.stack_seg().npages;
        self.page_table = Some(PageTable::create(npages));
    }

    fn text_seg(&self) -> &Segment {
        self.text.as_ref().expect("text segment not yet defined")
    }
    fn data_seg(&self) -> &Segment {
        self.data.as_ref().expect("data segment not yet defined")
    }
    fn stack_seg(&self) -> &Segment {
        self.stack.as_ref().expect("stack segment not yet defined")
    }
    fn page_table(&self) -> &PageTable {
        self.page_table.as_ref().expect("page table not yet defined")
    }
    fn page_table_mut(&mut self) -> &mut PageTable {
        self.page_table.as_mut().expect("page table not yet defined")
    }

    fn segment_for(&self, vaddr: u32) -> (SegmentKind, &Segment) {
        if self.text_seg().contains(vaddr) {
            (SegmentKind::Text, self.text_seg())
        } else if self.data_seg().contains(vaddr) {
            (SegmentKind::Data, self.data_seg())
        } else if self.stack_seg().contains(vaddr) {
            (SegmentKind::Stack, self.stack_seg())
        } else {
            panic!("vaddr out of range: {:#x}", vaddr);
        }
    }

    /// Classifies `vaddr` into TEXT/DATA/STACK. Panics if `vaddr` is outside
    /// every segment (a translation error, fatal per the error taxonomy).
    pub fn get_segment_type(&self, vaddr: u32) -> SegmentKind {
        self.segment_for(vaddr).0
    }

    /// Non-panicking membership check: the fault handler calls this before
    /// touching the page table, so an out-of-range vaddr becomes a
    /// `VmError::Translation` instead of a panic.
    pub fn contains(&self, vaddr: u32) -> bool {
        self.text_seg().contains(vaddr) || self.data_seg().contains(vaddr) || self.stack_seg().contains(vaddr)
    }

    /// Dense page-table index of `vaddr`, per the text/data/stack layout.
    pub fn get_index(&self, vaddr: u32) -> usize {
        if self.text_seg().contains(vaddr) {
            return self.text_seg().local_index(vaddr);
        }
        let text_pages = self.text_seg().npages;
        if self.data_seg().contains(vaddr) {
            return text_pages + self.data_seg().local_index(vaddr);
        }
        let data_pages = self.data_seg().npages;
        if self.stack_seg().contains(vaddr) {
            return text_pages + data_pages + self.stack_seg().local_index(vaddr);
        }
        panic!("vaddr out of range: {:#x}", vaddr);
    }

    pub fn pte_ref(&self, vaddr: u32) -> PteRef {
        PteRef { as_id: self.id, index: self.get_index(vaddr) }
    }

    pub fn get_entry(&self, vaddr: u32) -> &pagetable::PtEntry {
        let index = self.get_index(vaddr);
        self.page_table().get(index)
    }

    pub fn get_entry_mut(&mut self, vaddr: u32) -> &mut pagetable::PtEntry {
        let index = self.get_index(vaddr);
        self.page_table_mut().get_mut(index)
    }

    pub fn get_entry_by_index_mut(&mut self, index: usize) -> &mut pagetable::PtEntry {
        self.page_table_mut().get_mut(index)
    }

    /// True iff `vaddr` falls in the ELF-backed prefix of its segment; false
    /// means first touch reads as zero.
    pub fn check_in_elf(&self, vaddr: u32) -> bool {
        let (_, seg) = self.segment_for(vaddr);
        seg.in_elf(vaddr)
    }

    /// Copies one page of the containing segment from the ELF image into the
    /// frame the fault handler has already bound to `faultaddr` in the PTE.
    /// The three first/last/middle cases follow §4.5 exactly.
    pub fn load_page(&self, loader: &mut dyn ElfLoader, faultaddr: u32) {
        stats::hit(Stat::PageFaultDisk);
        stats::hit(Stat::PageFaultElf);
        let (kind, seg) = self.segment_for(faultaddr);
        assert_ne!(kind, SegmentKind::Stack, "the stack is never ELF-backed");
        let elf_end_page = (seg.first_vaddr + seg.elf_size + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1);
        assert!(faultaddr < elf_end_page);
        assert!(faultaddr >= seg.base_vaddr);

        let entry = self.get_entry(faultaddr);
        let frame_base = entry.paddr();
        let page_frame = faultaddr & !(PAGE_SIZE as u32 - 1);
        let first_page_frame = seg.first_vaddr & !(PAGE_SIZE as u32 - 1);

        let (offset, size, target) = if page_frame == first_page_frame {
            let room_in_first_page = PAGE_SIZE as u32 - (seg.first_vaddr & (PAGE_SIZE as u32 - 1));
            let size = seg.elf_size.min(room_in_first_page);
            (seg.elf_offset, size, frame_base + (seg.first_vaddr & (PAGE_SIZE as u32 - 1)))
        } else if (seg.first_vaddr + seg.elf_size) & !(PAGE_SIZE as u32 - 1) == page_frame {
            let size = (seg.first_vaddr + seg.elf_size) & (PAGE_SIZE as u32 - 1);
            let offset = seg.elf_offset + page_frame - seg.first_vaddr;
            (offset, size, frame_base)
        } else {
            let offset = seg.elf_offset + page_frame - seg.first_vaddr;
            (offset, PAGE_SIZE as u32, frame_base)
        };

        loader.load_page(offset, target, size);
    }

    /// Releases every PTE's resource and leaves the page table empty. The
    /// caller is responsible for returning `Reclaimed.frames` to the
    /// coremap and `Reclaimed.swap_slots` to the swap store — this module
    /// never talks to either directly (§4.3: "the page table does NOT
    /// allocate frames or drive eviction").
    pub fn destroy(mut self) -> Reclaimed {
        self.page_table_mut().empty()
    }
}

/// A registry the fault handler looks an address space up in by id — both
/// to find the faulting process's own address space and, during eviction,
/// to reach whichever address space happens to own the victim frame. A real
/// kernel implements this over its process table; the single-entry table
/// below is the minimal implementation a one-process test harness needs.
pub trait ProcessTable {
    fn get_mut(&mut self, id: AddrSpaceId) -> Option<&mut AddressSpace>;
}

pub struct SingleAddrSpaceTable {
    pub as_: AddressSpace,
}

impl ProcessTable for SingleAddrSpaceTable {
    fn get_mut(&mut self, id: AddrSpaceId) -> Option<&mut AddressSpace> {
        if id == self.as_.id {
            Some(&mut self.as_)
        } else {
            None
        }
    }
}
