//! Compile-time kernel configuration constants.
//!
//! Centralizes the numeric contract shared across the frame allocator, VMM,
//! heap, and scheduler so it is declared once instead of scattered as magic
//! numbers through each module.

/// Size of a physical frame / virtual page.
pub const FRAME_SIZE: usize = 4096;

/// Upper bound on the physical address range the frame allocator bitmap
/// can describe (spec: "bounded physical address range (≤ 3 GiB)").
pub const MAX_PHYS_BYTES: usize = 3 * 1024 * 1024 * 1024;

/// Number of frames covered by `MAX_PHYS_BYTES`.
pub const MAX_FRAMES: usize = MAX_PHYS_BYTES / FRAME_SIZE;

/// Higher-half virtual base the kernel is linked at.
pub const KERNEL_VBASE: u32 = 0xC000_0000;

/// Number of megabytes of physical memory identity-mapped (offset by
/// `KERNEL_VBASE`) at boot, before on-demand mapping takes over.
pub const IDENTITY_MAP_MIB: usize = 4;

/// Kernel heap virtual range.
pub const KHEAP_START: u32 = 0xD000_0000;
pub const KHEAP_INITIAL_SIZE: usize = 1 * 1024 * 1024;
pub const KHEAP_MAX_SIZE: usize = 16 * 1024 * 1024;

/// Per-process user heap virtual range (identical in every address space;
/// only meaningful once the owning directory is switched in).
pub const UHEAP_START: u32 = 0x4000_0000;
pub const UHEAP_INITIAL_SIZE: usize = 64 * 1024;
pub const UHEAP_MAX_SIZE: usize = 8 * 1024 * 1024;

/// Default kernel-thread and user-thread stack size.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Base of the kernel-stack region: one `DEFAULT_STACK_SIZE` slot per
/// live pid, pre-mapped at boot into the shared kernel half so every
/// process directory sees the same slots without a per-process mapping
/// call (spec §3/§9).
pub const KSTACK_REGION_BASE: u32 = 0xE000_0000;

/// Fixed per-directory virtual address for a user thread's stack. Private
/// to each address space, so every process can reuse the same window.
pub const USTACK_TOP: u32 = UHEAP_START - FRAME_SIZE as u32;

/// Maximum number of simultaneously live processes (slab-indexed by
/// `pid % MAX_PROCESSES`).
pub const MAX_PROCESSES: usize = 256;

/// PIT frequency in Hz; IRQ0 fires this many times per second.
pub const PIT_HZ: u32 = 100;

/// Scheduler time slice, in PIT ticks, before a forced reschedule.
pub const TIME_SLICE_TICKS: u64 = 1;

/// Canonical ring-0 segment selectors (spec §3).
pub const SEL_KERNEL_CODE: u16 = 0x08;
pub const SEL_KERNEL_DATA: u16 = 0x10;
/// Canonical ring-3 segment selectors (RPL=3 already baked in).
pub const SEL_USER_CODE: u16 = 0x1B;
pub const SEL_USER_DATA: u16 = 0x23;
/// TSS selector.
pub const SEL_TSS: u16 = 0x28;

/// Default EFLAGS for a freshly created thread: IF=1, reserved bit 1 set.
pub const DEFAULT_EFLAGS: u32 = 0x202;
