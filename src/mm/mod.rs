//! Memory management: physical frames, page tables, and the kernel heap
//! (spec §2).

pub mod addr;
pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod vmm;

use crate::arch::x86::multiboot::MultibootInfo;
use crate::config::{
    DEFAULT_STACK_SIZE, KHEAP_INITIAL_SIZE, KHEAP_MAX_SIZE, KHEAP_START, KSTACK_REGION_BASE,
    MAX_PROCESSES,
};
use crate::mm::addr::PhysAddr;

#[global_allocator]
static KERNEL_HEAP: heap::LockedHeap =
    // SAFETY: the range is fixed at link time and is claimed by `init`
    // below before any allocation through this allocator can occur.
    unsafe {
        heap::LockedHeap::new(
            KHEAP_START as usize,
            KHEAP_INITIAL_SIZE,
            KHEAP_MAX_SIZE,
            Some(map_heap_growth),
        )
    };

/// `grow_hook` for [`KERNEL_HEAP`]: map every frame in `[start, end)` before
/// the heap's bookkeeping is allowed to extend over it. Returns `false` on
/// allocator exhaustion instead of panicking, since growth failure is just
/// an ordinary out-of-memory condition for whatever allocation triggered it.
fn map_heap_growth(start: usize, end: usize) -> bool {
    use crate::config::FRAME_SIZE;
    use crate::mm::addr::VirtAddr;
    use crate::mm::page_table::EntryFlags;

    let mut virt = start as u32;
    while (virt as usize) < end {
        let frame = match frame_allocator::FRAME_ALLOCATOR.lock().alloc_block() {
            Ok(frame) => frame,
            Err(_) => return false,
        };
        if vmm::map(VirtAddr::new(virt), frame, EntryFlags::WRITABLE).is_err() {
            return false;
        }
        virt += FRAME_SIZE as u32;
    }
    true
}

extern "C" {
    /// Physical start of the kernel image, provided by the linker script.
    static __kernel_start: u8;
    /// Physical end of the kernel image, provided by the linker script.
    static __kernel_end: u8;
}

/// Bring up the whole memory subsystem, in the order spec §9 fixes:
/// paging first (so the heap's virtual range can be mapped at all), then
/// the frame allocator (seeded from the multiboot memory map), then the
/// kernel heap itself.
///
/// # Safety
/// Must run exactly once, early in boot, after `arch::x86::init` has
/// loaded the GDT/IDT but before interrupts are enabled.
pub unsafe fn init(info: &MultibootInfo) {
    unsafe { vmm::init() };

    let kernel_start = PhysAddr::new(&raw const __kernel_start as u32);
    let kernel_end = PhysAddr::new(&raw const __kernel_end as u32);
    frame_allocator::init(info, kernel_start, kernel_end);

    map_kernel_heap();
    // SAFETY: map_kernel_heap has just mapped the initial heap range.
    unsafe { KERNEL_HEAP.init() };

    map_kernel_stack_region();
}

fn map_kernel_heap() {
    let end = KHEAP_START as usize + KHEAP_INITIAL_SIZE;
    assert!(
        map_heap_growth(KHEAP_START as usize, end),
        "out of physical memory while mapping the kernel heap"
    );
}

/// Pre-map one [`DEFAULT_STACK_SIZE`] slot per possible pid in the shared
/// kernel half (spec §9): every process directory inherits this region's
/// page tables by reference at creation time, so a process's kernel
/// stack needs no per-process mapping call later.
fn map_kernel_stack_region() {
    use crate::config::FRAME_SIZE;
    use crate::mm::addr::VirtAddr;
    use crate::mm::page_table::EntryFlags;

    let total_pages = (MAX_PROCESSES * DEFAULT_STACK_SIZE) / FRAME_SIZE;
    for i in 0..total_pages {
        let virt = VirtAddr::new(KSTACK_REGION_BASE + (i * FRAME_SIZE) as u32);
        let frame = frame_allocator::FRAME_ALLOCATOR
            .lock()
            .alloc_block()
            .expect("out of physical memory while mapping kernel stacks");
        vmm::map(virt, frame, EntryFlags::WRITABLE)
            .expect("kernel stack mapping cannot fail at boot");
    }
}
