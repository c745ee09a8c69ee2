//! Physical frame allocator: a packed bitmap, one bit per frame, bounded
//! to [`crate::config::MAX_FRAMES`] (spec §2.1).
//!
//! Grounded directly on `original_source/kernel/src/mem/pmmngr.c`: frames
//! are tracked 32 at a time as `u32` words so `find_first_free` can skip a
//! fully-used word in one comparison (`if (bitmap[i] != 0xFFFFFFFF)`)
//! instead of testing 32 individual bits, and `find_first_free_block`
//! extends the same scan to runs of contiguous frames, restarting the
//! inner scan from the colliding bit rather than from the top of the
//! current run on every collision (the distinction spec §9 singles out:
//! "on collision, the contiguous-run search resumes scanning from the
//! colliding frame rather than restarting from the block's first frame").
//!
//! The teacher's allocator (`mm/frame_allocator.rs`) is a NUMA-aware
//! buddy/slab hybrid; none of that applies to a single-node, non-NUMA,
//! ≤3GiB machine, so this module keeps the teacher's `spin::Mutex`-guarded
//! singleton style and its `KernelResult`-returning API shape but replaces
//! the allocation strategy outright with the bitmap the original C kernel
//! uses.

use spin::Mutex;

use crate::config::{FRAME_SIZE, MAX_FRAMES};
use crate::error::{KernelError, KernelResult};
use crate::mm::addr::{Frame, PhysAddr};

const WORD_BITS: u32 = 32;
const BITMAP_WORDS: usize = MAX_FRAMES / WORD_BITS as usize;

pub struct FrameAllocator {
    bitmap: [u32; BITMAP_WORDS],
    max_frame: u32,
    used_frames: usize,
}

impl FrameAllocator {
    const fn new() -> Self {
        Self { bitmap: [0xFFFF_FFFF; BITMAP_WORDS], max_frame: 0, used_frames: 0 }
    }

    fn set(&mut self, frame: u32) {
        self.bitmap[(frame / WORD_BITS) as usize] |= 1 << (frame % WORD_BITS);
    }

    fn clear(&mut self, frame: u32) {
        self.bitmap[(frame / WORD_BITS) as usize] &= !(1 << (frame % WORD_BITS));
    }

    fn test(&self, frame: u32) -> bool {
        self.bitmap[(frame / WORD_BITS) as usize] & (1 << (frame % WORD_BITS)) != 0
    }

    /// Mark `[base, base+size)` as usable RAM, clearing the corresponding
    /// bits (`pmmngr_init_region`). Frame 0 is left set regardless, so it
    /// is never handed out (spec §2.1: "frame 0 is always reserved").
    pub fn init_region(&mut self, base: PhysAddr, size: usize) {
        let start_frame = base.containing_frame().0;
        let frame_count = size / FRAME_SIZE;
        for i in 0..frame_count {
            let frame = start_frame + i as u32;
            if frame == 0 || frame as usize >= MAX_FRAMES {
                continue;
            }
            self.clear(frame);
            if frame >= self.max_frame {
                self.max_frame = frame + 1;
            }
        }
    }

    /// Mark `[base, base+size)` as unusable (reserved / MMIO), setting the
    /// corresponding bits (`pmmngr_deinit_region`). Used for the kernel
    /// image, the multiboot structures, and any reserved BIOS regions.
    pub fn deinit_region(&mut self, base: PhysAddr, size: usize) {
        let start_frame = base.containing_frame().0;
        let frame_count = size.div_ceil(FRAME_SIZE);
        for i in 0..frame_count {
            let frame = start_frame + i as u32;
            if (frame as usize) < MAX_FRAMES {
                self.set(frame);
            }
        }
    }

    /// Recount set bits in `[0, max_frame)` into `used_frames`
    /// (`pmmngr_deinit_region`'s callers must do this once after all
    /// init/deinit region calls, since those only flip bits and never
    /// touch the running count themselves).
    pub fn update_usage(&mut self) {
        let mut used = 0usize;
        for frame in 0..self.max_frame {
            if self.test(frame) {
                used += 1;
            }
        }
        self.used_frames = used;
    }

    fn find_first_free(&self) -> Option<u32> {
        for (word_index, &word) in self.bitmap.iter().enumerate() {
            if word == 0xFFFF_FFFF {
                continue;
            }
            for bit in 0..WORD_BITS {
                let frame = word_index as u32 * WORD_BITS + bit;
                if frame >= self.max_frame {
                    return None;
                }
                if word & (1 << bit) == 0 {
                    return Some(frame);
                }
            }
        }
        None
    }

    /// Scan for `count` contiguous free frames. On hitting an already-used
    /// frame mid-run, resume the search PAST that frame rather than at the
    /// run's start, matching the original's collision handling.
    fn find_first_free_run(&self, count: u32) -> Option<u32> {
        if count == 0 {
            return None;
        }
        let mut start = self.find_first_free()?;
        'outer: loop {
            if start + count > self.max_frame {
                return None;
            }
            for offset in 0..count {
                let frame = start + offset;
                if self.test(frame) {
                    start = frame + 1;
                    continue 'outer;
                }
            }
            return Some(start);
        }
    }

    pub fn alloc_block(&mut self) -> KernelResult<Frame> {
        let frame = self.find_first_free().ok_or(KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: self.free_frames() * FRAME_SIZE,
        })?;
        self.set(frame);
        self.used_frames += 1;
        Ok(Frame::new(frame))
    }

    pub fn alloc_multi_block(&mut self, count: usize) -> KernelResult<Frame> {
        let start = self.find_first_free_run(count as u32).ok_or(KernelError::OutOfMemory {
            requested: count * FRAME_SIZE,
            available: self.free_frames() * FRAME_SIZE,
        })?;
        for i in 0..count as u32 {
            self.set(start + i);
        }
        self.used_frames += count;
        Ok(Frame::new(start))
    }

    pub fn free_block(&mut self, frame: Frame) -> KernelResult<()> {
        if frame.0 == 0 {
            return Ok(());
        }
        if frame.0 >= self.max_frame {
            return Err(KernelError::InvalidFrame { frame: frame.0 });
        }
        if !self.test(frame.0) {
            return Err(KernelError::DoubleFree { addr: frame.start_address().0 });
        }
        self.clear(frame.0);
        self.used_frames -= 1;
        Ok(())
    }

    pub fn free_multi_block(&mut self, frame: Frame, count: usize) -> KernelResult<()> {
        for i in 0..count as u32 {
            self.free_block(Frame::new(frame.0 + i))?;
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.max_frame as usize * FRAME_SIZE
    }

    pub fn used_size(&self) -> usize {
        self.used_frames * FRAME_SIZE
    }

    pub fn free_size(&self) -> usize {
        self.size() - self.used_size()
    }

    fn free_frames(&self) -> usize {
        self.max_frame as usize - self.used_frames
    }
}

pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

/// Seed the allocator from the multiboot memory map, reserving the kernel
/// image itself (`kernel_start`/`kernel_end`, both physical) on top of
/// whatever the firmware already marks reserved.
pub fn init(
    info: &crate::arch::x86::multiboot::MultibootInfo,
    kernel_start: PhysAddr,
    kernel_end: PhysAddr,
) {
    let mut allocator = FRAME_ALLOCATOR.lock();

    if info.has_mmap() {
        // SAFETY: `has_mmap` confirms the loader populated mmap_addr/length.
        for entry in unsafe { info.mmap_entries() } {
            if entry.entry_type == crate::arch::x86::multiboot::MMAP_TYPE_AVAILABLE {
                let base = entry.base_addr.min(u32::MAX as u64) as u32;
                let length = entry.length.min(u32::MAX as u64) as usize;
                allocator.init_region(PhysAddr::new(base), length);
            }
        }
    } else {
        allocator.init_region(PhysAddr::new(0), info.upper_memory_end() as usize);
    }

    allocator.deinit_region(kernel_start, (kernel_end.0 - kernel_start.0) as usize);
    allocator.update_usage();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh() -> FrameAllocator {
        let mut allocator = FrameAllocator::new();
        allocator.init_region(PhysAddr::new(0), 64 * FRAME_SIZE);
        allocator
    }

    #[test]
    fn frame_zero_is_never_allocated() {
        let mut allocator = fresh();
        for _ in 0..10 {
            let frame = allocator.alloc_block().unwrap();
            assert_ne!(frame.0, 0);
        }
    }

    #[test]
    fn freeing_frame_zero_is_a_noop() {
        let mut allocator = fresh();
        let used_before = allocator.used_frames;
        assert_eq!(allocator.free_block(Frame::new(0)), Ok(()));
        assert_eq!(allocator.used_frames, used_before);
        assert!(allocator.test(0));
    }

    #[test]
    fn alloc_and_free_roundtrip() {
        let mut allocator = fresh();
        let frame = allocator.alloc_block().unwrap();
        assert!(allocator.free_block(frame).is_ok());
        assert_eq!(allocator.free_block(frame), Err(KernelError::DoubleFree {
            addr: frame.start_address().0
        }));
    }

    #[test]
    fn multi_block_is_contiguous() {
        let mut allocator = fresh();
        let start = allocator.alloc_multi_block(8).unwrap();
        for i in 0..8 {
            assert!(allocator.test(start.0 + i));
        }
    }

    #[test]
    fn multi_block_resumes_scan_past_collision() {
        let mut allocator = fresh();
        // Reserve frame 3, which sits inside the first candidate 4-frame
        // run (1..=4): a naive restart-from-the-collision search would
        // retest frame 3 at offset 0 forever instead of moving past it.
        allocator.set(3);
        allocator.used_frames += 1;
        let start = allocator.alloc_multi_block(4).unwrap();
        assert!(start.0 > 3 || start.0 + 4 <= 3);
        for i in 0..4 {
            assert!(allocator.test(start.0 + i));
        }
    }

    #[test]
    fn update_usage_recounts_after_deinit_region() {
        let mut allocator = fresh();
        allocator.deinit_region(PhysAddr::new(4 * FRAME_SIZE as u32), 4 * FRAME_SIZE);
        assert_eq!(allocator.used_frames, 0);
        allocator.update_usage();
        assert_eq!(allocator.used_frames, 4);
        assert_eq!(allocator.free_size(), allocator.size() - 4 * FRAME_SIZE);
    }

    #[test]
    fn out_of_memory_when_exhausted() {
        let mut allocator = fresh();
        while allocator.alloc_block().is_ok() {}
        assert_eq!(
            allocator.alloc_block(),
            Err(KernelError::OutOfMemory { requested: FRAME_SIZE, available: 0 })
        );
    }
}
