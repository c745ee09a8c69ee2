//! Multiboot 1 boot-information contract.
//!
//! Spec §1 requires only that the kernel be loadable by any multiboot-
//! compliant loader and be handed a memory map at boot; this module is the
//! typed view over the struct the loader places in `ebx` (pointer passed
//! in the register the assembly entry trampoline forwards, out of scope
//! here), enough to discover installed RAM for the frame allocator's
//! region init (spec §2.1).

use crate::config::FRAME_SIZE;

bitflags::bitflags! {
    #[derive(Clone, Copy)]
    pub struct MultibootFlags: u32 {
        const MEMORY        = 1 << 0;
        const BOOT_DEVICE   = 1 << 1;
        const CMDLINE       = 1 << 2;
        const MODS          = 1 << 3;
        const MMAP          = 1 << 6;
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MultibootMmapEntry {
    pub size: u32,
    pub base_addr: u64,
    pub length: u64,
    pub entry_type: u32,
}

pub const MMAP_TYPE_AVAILABLE: u32 = 1;

impl MultibootInfo {
    /// # Safety
    /// `self.mmap_addr`/`self.mmap_length` must be the values the loader
    /// actually populated (i.e. this struct must really be the one the
    /// loader wrote, and `MMAP` must be set in `flags`).
    pub unsafe fn mmap_entries(&self) -> MmapIter {
        MmapIter {
            cursor: self.mmap_addr as usize,
            end: (self.mmap_addr + self.mmap_length) as usize,
        }
    }

    pub fn has_mmap(&self) -> bool {
        MultibootFlags::from_bits_truncate(self.flags).contains(MultibootFlags::MMAP)
    }

    /// Highest physical address reported available, rounded down to a
    /// frame boundary; used as a fallback when no mmap is present.
    /// `mem_upper` is KiB of RAM starting at the 1 MiB mark, not from
    /// address 0, so the actual end address needs that offset added back.
    pub fn upper_memory_end(&self) -> u32 {
        const ONE_MIB: u32 = 1024 * 1024;
        (ONE_MIB + self.mem_upper * 1024) & !(FRAME_SIZE as u32 - 1)
    }
}

pub struct MmapIter {
    cursor: usize,
    end: usize,
}

impl Iterator for MmapIter {
    type Item = MultibootMmapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        // SAFETY: caller of `mmap_entries` already attested the range is a
        // valid multiboot mmap buffer; each entry's `size` field does not
        // include itself, so the next entry starts `size + 4` bytes later.
        unsafe {
            let entry_ptr = self.cursor as *const MultibootMmapEntry;
            let entry = entry_ptr.read_unaligned();
            let size_field = (self.cursor as *const u32).read_unaligned();
            self.cursor += size_field as usize + 4;
            Some(entry)
        }
    }
}
