//! Global Descriptor Table.
//!
//! Fixed 6-entry layout per spec §4.4: null, ring-0 code, ring-0 data,
//! ring-3 code, ring-3 data, TSS. Segment selectors are the canonical
//! values from spec §3/§6 (`config::SEL_*`) and are a fixed contract with
//! the scheduler and the trap frame, so this layout may not be reordered.
//!
//! The teacher builds its GDT through the `x86_64` crate's
//! `GlobalDescriptorTable` builder (`arch/x86_64/gdt.rs`); that type emits
//! 64-bit descriptor formats (16-byte TSS descriptors, code-segment `L`
//! bit) that do not exist in 32-bit protected mode, so this module builds
//! the flat 8-byte descriptors by hand instead, the idiomatic choice for a
//! 32-bit target the published `x86_64` crate does not cover.

use core::mem::size_of;

use crate::arch::x86::tss::TSS;
use crate::config::{SEL_KERNEL_CODE, SEL_KERNEL_DATA, SEL_TSS, SEL_USER_CODE, SEL_USER_DATA};

const NUM_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (granularity & 0xF0) | (((limit >> 16) & 0x0F) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

static mut GDT: [GdtEntry; NUM_ENTRIES] = [GdtEntry::null(); NUM_ENTRIES];

// Access byte bit 4 (0x10) = code/data segment, bit 7 (0x80) = present.
const ACCESS_RING0_CODE: u8 = 0x9A; // present, ring 0, code, executable, readable
const ACCESS_RING0_DATA: u8 = 0x92; // present, ring 0, data, writable
const ACCESS_RING3_CODE: u8 = 0xFA; // present, ring 3, code, executable, readable
const ACCESS_RING3_DATA: u8 = 0xF2; // present, ring 3, data, writable
const ACCESS_TSS: u8 = 0x89; // present, ring 0, 32-bit TSS (available)
const GRAN_4K_32BIT: u8 = 0xC0; // granularity=4K, size=32-bit

pub fn init() {
    let tss_base = &raw const TSS as u32;
    let tss_limit = size_of::<crate::arch::x86::tss::Tss>() as u32 - 1;

    // SAFETY: single-threaded boot, before interrupts are enabled; no other
    // code touches GDT concurrently.
    unsafe {
        GDT[0] = GdtEntry::null();
        GDT[(SEL_KERNEL_CODE / 8) as usize] =
            GdtEntry::new(0, 0xFFFFF, ACCESS_RING0_CODE, GRAN_4K_32BIT);
        GDT[(SEL_KERNEL_DATA / 8) as usize] =
            GdtEntry::new(0, 0xFFFFF, ACCESS_RING0_DATA, GRAN_4K_32BIT);
        GDT[(SEL_USER_CODE / 8) as usize] =
            GdtEntry::new(0, 0xFFFFF, ACCESS_RING3_CODE, GRAN_4K_32BIT);
        GDT[(SEL_USER_DATA / 8) as usize] =
            GdtEntry::new(0, 0xFFFFF, ACCESS_RING3_DATA, GRAN_4K_32BIT);
        GDT[(SEL_TSS / 8) as usize] = GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, 0x00);

        let pointer = GdtPointer {
            limit: (size_of::<[GdtEntry; NUM_ENTRIES]>() - 1) as u16,
            base: &raw const GDT as u32,
        };
        load(&pointer);
    }

    crate::arch::x86::tss::flush();
}

/// # Safety
/// `pointer` must describe a GDT that outlives this call and remains valid
/// for the lifetime of the kernel (it is loaded into `gdtr` and never
/// revisited until the next `lgdt`).
unsafe fn load(pointer: *const GdtPointer) {
    unsafe {
        core::arch::asm!(
            "lgdt [{0}]",
            "push {1:e}",
            "lea {2:e}, [2f]",
            "push {2:e}",
            "retf",
            "2:",
            "mov ax, {3:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            in(reg) pointer,
            const SEL_KERNEL_CODE,
            out(reg) _,
            in(reg) SEL_KERNEL_DATA,
            out("ax") _,
        );
    }
}
