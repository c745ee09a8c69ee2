//! Virtual memory manager: boot-time identity mapping, the recursive
//! self-map used to edit the active address space's own tables, and
//! `map`/`unmap`/`switch` for everything that happens after paging is on
//! (spec §2.2).
//!
//! `original_source/kernel/mem/vmmngr.c` only ever sets up one directory
//! and identity-maps the first few megabytes before calling the external
//! `enable_paging`; it never needs to edit a directory that isn't the one
//! currently loaded. This kernel does (building a fresh directory for
//! every new process, spec §3), so on top of the original's boot-time
//! identity map this module adds the classic self-referencing page
//! directory trick: directory entry 1023 points at the directory's own
//! frame, giving every page table of the *currently loaded* directory a
//! fixed virtual address, and a second reserved entry (1022) is a
//! single-page temporary-mapping window used to edit frames — most often
//! a brand new directory or page table — that are not yet mapped anywhere
//! at all. The teacher's `mm/page_table.rs` active-mapping helpers follow
//! the same two-window shape, adapted here from 4-level 64-bit paging to
//! 32-bit non-PAE two-level paging.

use spin::Mutex;

use crate::config::{FRAME_SIZE, IDENTITY_MAP_MIB, KERNEL_VBASE};
use crate::error::{KernelError, KernelResult};
use crate::mm::addr::{Frame, PhysAddr, VirtAddr};
use crate::mm::frame_allocator::FRAME_ALLOCATOR;
use crate::mm::page_table::{EntryFlags, PageDirectory, PageTable, ENTRIES_PER_TABLE};

/// Self-referencing slot: `PD[RECURSIVE_INDEX]` always points at the
/// currently loaded directory's own frame.
const RECURSIVE_INDEX: usize = 1023;
/// Single-page scratch slot used to map an arbitrary physical frame into
/// view long enough to initialize or inspect it.
const TEMP_INDEX: usize = 1022;

const RECURSIVE_BASE: u32 = (RECURSIVE_INDEX as u32) << 22;
const TEMP_VADDR: u32 = RECURSIVE_BASE | ((TEMP_INDEX as u32) << 12);

static mut BOOT_DIRECTORY: PageDirectory = PageDirectory::new();
static mut BOOT_TABLES: [PageTable; IDENTITY_MAP_MIB] = {
    const T: PageTable = PageTable::new();
    [T; IDENTITY_MAP_MIB]
};
static mut TEMP_TABLE: PageTable = PageTable::new();

struct VmmState {
    /// Physical address of the directory currently loaded in `cr3`.
    current_dir: PhysAddr,
}

static VMM: Mutex<VmmState> = Mutex::new(VmmState { current_dir: PhysAddr::new(0) });

// Every entry point below touches `cr3`/`cr0`/`invlpg` directly and
// assumes paging is either off (during `init`) or already active with this
// module's recursive self-map installed; there is no host-testable subset
// left once that assumption is factored out, so unlike `frame_allocator.rs`
// and `page_table.rs` this module carries no `#[cfg(test)]` block.

/// Identity-map (and mirror at `KERNEL_VBASE + addr`) the first
/// `IDENTITY_MAP_MIB` megabytes and load the resulting directory,
/// enabling paging. Must run exactly once, before the frame allocator or
/// heap are touched, since both assume paging is already active.
///
/// # Safety
/// Must be called exactly once, very early in boot, before any other
/// `mm` function.
pub unsafe fn init() {
    const MIB: u32 = 1024 * 1024;

    for table_index in 0..IDENTITY_MAP_MIB {
        let table = unsafe { &mut BOOT_TABLES[table_index] };
        for entry_index in 0..ENTRIES_PER_TABLE {
            let frame = Frame::new((table_index as u32 * MIB / FRAME_SIZE as u32) + entry_index as u32);
            table.set_entry(entry_index, frame, EntryFlags::WRITABLE);
        }
        let table_phys = PhysAddr::new(table as *const PageTable as u32);
        let pd_index_low = table_index;
        let pd_index_high = (VirtAddr::new(KERNEL_VBASE + table_index as u32 * MIB)).pd_index();
        unsafe {
            BOOT_DIRECTORY.set_table(pd_index_low, table_phys.containing_frame(), EntryFlags::WRITABLE);
            BOOT_DIRECTORY.set_table(pd_index_high, table_phys.containing_frame(), EntryFlags::WRITABLE);
        }
    }

    let dir_phys = PhysAddr::new(&raw const BOOT_DIRECTORY as u32);
    unsafe {
        BOOT_DIRECTORY.set_table(RECURSIVE_INDEX, dir_phys.containing_frame(), EntryFlags::WRITABLE);
    }

    load_cr3(dir_phys);
    enable_paging();
    VMM.lock().current_dir = dir_phys;
}

unsafe fn load_cr3(dir: PhysAddr) {
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) dir.0, options(nostack, preserves_flags));
    }
}

unsafe fn enable_paging() {
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags),
        );
    }
}

fn invlpg(addr: u32) {
    unsafe {
        core::arch::asm!("invlpg [{0}]", in(reg) addr, options(nostack, preserves_flags));
    }
}

/// Virtual address through which page table `pd_index` of the *currently
/// loaded* directory can be edited, via the recursive self-map.
fn table_window(pd_index: usize) -> *mut PageTable {
    (RECURSIVE_BASE + (pd_index as u32) * FRAME_SIZE as u32) as *mut PageTable
}

fn directory_window() -> *mut PageDirectory {
    (RECURSIVE_BASE | ((RECURSIVE_INDEX as u32) << 12)) as *mut PageDirectory
}

/// Map `frame` at `TEMP_VADDR` so its contents can be read or written
/// without it being mapped anywhere else yet. Used only for directory and
/// page-table frames the allocator just handed back.
fn with_temp_mapping<R>(frame: Frame, f: impl FnOnce(*mut u8) -> R) -> R {
    unsafe {
        TEMP_TABLE.set_entry(TEMP_INDEX, frame, EntryFlags::WRITABLE);
        // The PD's TEMP_INDEX slot itself must point at TEMP_TABLE; set
        // once lazily through the same recursive window.
        let dir = &mut *directory_window();
        if !dir.is_table_present(TEMP_INDEX) {
            let temp_table_phys = PhysAddr::new(&raw const TEMP_TABLE as u32);
            dir.set_table(TEMP_INDEX, temp_table_phys.containing_frame(), EntryFlags::WRITABLE);
        }
        invlpg(TEMP_VADDR);
        let result = f(TEMP_VADDR as *mut u8);
        TEMP_TABLE.clear_entry(TEMP_INDEX);
        invlpg(TEMP_VADDR);
        result
    }
}

/// Map `virt` to `frame` in the currently loaded directory, allocating a
/// new page table on demand if `virt`'s directory entry is not yet
/// present (spec §2.2: "page tables are allocated on demand").
pub fn map(virt: VirtAddr, frame: Frame, flags: EntryFlags) -> KernelResult<()> {
    if !virt.is_page_aligned() {
        return Err(KernelError::InvalidAddress { addr: virt.0 });
    }
    let pd_index = virt.pd_index();
    let pt_index = virt.pt_index();

    // SAFETY: single-threaded access serialized by VMM's mutex; the
    // recursive window always reflects the currently loaded directory.
    unsafe {
        let dir = &mut *directory_window();
        if !dir.is_table_present(pd_index) {
            let table_frame = FRAME_ALLOCATOR.lock().alloc_block()?;
            with_temp_mapping(table_frame, |ptr| {
                core::ptr::write_bytes(ptr, 0, FRAME_SIZE);
            });
            dir.set_table(pd_index, table_frame, flags | EntryFlags::WRITABLE);
            invlpg(table_window(pd_index) as u32);
        }

        let table = &mut *table_window(pd_index);
        table.set_entry(pt_index, frame, flags);
    }
    invlpg(virt.0);
    Ok(())
}

/// Unmap `virt`, returning the frame that was mapped there (the caller
/// decides whether to free it back to the frame allocator).
pub fn unmap(virt: VirtAddr) -> KernelResult<Frame> {
    let pd_index = virt.pd_index();
    let pt_index = virt.pt_index();

    // SAFETY: see `map`.
    unsafe {
        let dir = &*directory_window();
        if !dir.is_table_present(pd_index) {
            return Err(KernelError::UnmappedPage { virt: virt.0 });
        }
        let table = &mut *table_window(pd_index);
        let entry = table.entry(pt_index);
        if !entry.is_present() {
            return Err(KernelError::UnmappedPage { virt: virt.0 });
        }
        let frame = entry.frame();
        table.clear_entry(pt_index);
        invlpg(virt.0);
        Ok(frame)
    }
}

/// Identity-map `[base, base+len)` in the *currently loaded* directory,
/// used for MMIO regions and framebuffers that must be accessed through
/// their physical address.
pub fn identity_map_range(base: PhysAddr, len: usize, flags: EntryFlags) -> KernelResult<()> {
    let frame_count = len.div_ceil(FRAME_SIZE);
    for i in 0..frame_count {
        let frame = Frame::new(base.containing_frame().0 + i as u32);
        map(VirtAddr::new(frame.start_address().0), frame, flags)?;
    }
    Ok(())
}

/// Build a new address space for a process: a fresh directory whose upper
/// half (>= `KERNEL_VBASE`) is a copy of the kernel's own directory
/// entries, so every process shares one kernel mapping (spec §3: "the
/// kernel half of the address space is identical across every process").
pub fn alloc_page_directory() -> KernelResult<PhysAddr> {
    let dir_frame = FRAME_ALLOCATOR.lock().alloc_block()?;
    let dir_phys = dir_frame.start_address();

    with_temp_mapping(dir_frame, |ptr| {
        let new_dir = ptr as *mut PageDirectory;
        unsafe {
            core::ptr::write_bytes(ptr, 0, FRAME_SIZE);
            let kernel_dir = &*directory_window();
            let half = VirtAddr::new(KERNEL_VBASE).pd_index();
            for index in half..ENTRIES_PER_TABLE {
                if index == RECURSIVE_INDEX || index == TEMP_INDEX {
                    continue;
                }
                if kernel_dir.is_table_present(index) {
                    (*new_dir).set_table(index, kernel_dir.table_frame(index), EntryFlags::WRITABLE);
                }
            }
            (*new_dir).set_table(RECURSIVE_INDEX, dir_frame, EntryFlags::WRITABLE);
        }
    });

    Ok(dir_phys)
}

/// Free every user-half page table, every frame those tables still map,
/// and the directory frame itself. The kernel-half entries are shared,
/// not owned, and must not be freed here.
///
/// The single scratch temp-mapping window cannot hold the directory and
/// one of its tables in view at once, so this collects the user-half
/// table frames into a local buffer first, drops the directory mapping,
/// and only then visits each table in its own turn.
pub fn free_page_directory(dir_phys: PhysAddr) -> KernelResult<()> {
    let half = VirtAddr::new(KERNEL_VBASE).pd_index();

    let mut table_frames = [None; ENTRIES_PER_TABLE];
    with_temp_mapping(dir_phys.containing_frame(), |ptr| {
        let dir = unsafe { &*(ptr as *const PageDirectory) };
        for index in 0..half {
            if dir.is_table_present(index) {
                table_frames[index] = Some(dir.table_frame(index));
            }
        }
    });

    for table_frame in table_frames.into_iter().flatten() {
        let mut entry_frames = [None; ENTRIES_PER_TABLE];
        with_temp_mapping(table_frame, |table_ptr| {
            let table = unsafe { &*(table_ptr as *const PageTable) };
            for entry_index in 0..ENTRIES_PER_TABLE {
                let entry = table.entry(entry_index);
                if entry.is_present() {
                    entry_frames[entry_index] = Some(entry.frame());
                }
            }
        });
        for frame in entry_frames.into_iter().flatten() {
            let _ = FRAME_ALLOCATOR.lock().free_block(frame);
        }
        let _ = FRAME_ALLOCATOR.lock().free_block(table_frame);
    }

    FRAME_ALLOCATOR.lock().free_block(dir_phys.containing_frame())
}

/// Map `virt` to `frame` inside `dir_phys`'s address space, even if it is
/// not the currently loaded directory, by temporarily switching to it and
/// restoring whatever was loaded before. Used for process-private
/// mappings (a new user stack) built before the owning process ever runs.
pub fn map_in(dir_phys: PhysAddr, virt: VirtAddr, frame: Frame, flags: EntryFlags) -> KernelResult<()> {
    let previous = current();
    switch(dir_phys);
    let result = map(virt, frame, flags);
    switch(previous);
    result
}

/// Load `dir_phys` into `cr3`. Called by the scheduler on every context
/// switch to a process with a different address space (spec §6).
pub fn switch(dir_phys: PhysAddr) {
    let mut state = VMM.lock();
    if state.current_dir == dir_phys {
        return;
    }
    // SAFETY: dir_phys was produced by alloc_page_directory or boot init,
    // so it is a valid, fully-populated directory frame.
    unsafe { load_cr3(dir_phys) };
    state.current_dir = dir_phys;
}

pub fn current() -> PhysAddr {
    VMM.lock().current_dir
}
