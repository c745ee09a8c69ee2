//! Kernel and user heap: an intrusive block list with in-place coalescing
//! on free (spec §2.3).
//!
//! Every block carries a header immediately before its payload:
//! `(in_use, size, prev_phys_size)`. `prev_phys_size` is what lets `free`
//! find its left physical neighbor in O(1) without walking the list from
//! the start, and `in_use` doubles as the double-free guard: freeing an
//! already-free block is rejected instead of corrupting the list.
//!
//! The teacher's `mm/heap.rs` wraps the `linked_list_allocator` crate
//! behind a `SlabAllocator` facade; that crate's free-list has no header
//! concept compatible with this spec's explicit block layout and
//! coalescing contract, so this module implements the block list directly
//! and `linked_list_allocator` is dropped from the dependency set (see
//! DESIGN.md). The `spin::Mutex<T>`-guarded singleton and `GlobalAlloc`
//! impl shape are kept from the teacher as-is.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

const MIN_BLOCK_SIZE: usize = 16;
const ALIGNMENT: usize = 8;

#[repr(C)]
struct BlockHeader {
    /// Sentinel-guarded occupancy flag: `IN_USE_MAGIC` when allocated,
    /// `FREE_MAGIC` when free. Any other value means the header has been
    /// corrupted or this pointer never came from this heap.
    tag: u32,
    size: usize,
    prev_phys_size: usize,
}

const IN_USE_MAGIC: u32 = 0xA110_C8ED;
const FREE_MAGIC: u32 = 0xF4EE_B10C;

impl BlockHeader {
    fn payload(&self) -> *mut u8 {
        (self as *const Self as usize + size_of::<Self>()) as *mut u8
    }

    /// Recover the header from a payload pointer previously handed out by
    /// `alloc`.
    unsafe fn from_payload(ptr: *mut u8) -> *mut Self {
        (ptr as usize - size_of::<Self>()) as *mut Self
    }
}

pub struct BlockHeap {
    start: usize,
    end: usize,
    max_end: usize,
    /// Called with `[old_end, new_end)` before `grow` extends the
    /// bookkeeping over that range; must map it as writable memory and
    /// return `false` if it cannot (e.g. the frame allocator is exhausted).
    /// `None` means the heap cannot grow past its initial size, the case
    /// every host-target test uses.
    grow_hook: Option<fn(usize, usize) -> bool>,
}

impl BlockHeap {
    /// # Safety
    /// `[start, start+initial_size)` must be mapped, writable memory that
    /// nothing else uses, and `grow_hook`, if given, must itself uphold
    /// that same contract for whatever range it is asked to map.
    pub const unsafe fn new(
        start: usize,
        initial_size: usize,
        max_size: usize,
        grow_hook: Option<fn(usize, usize) -> bool>,
    ) -> Self {
        Self { start, end: start + initial_size, max_end: start + max_size, grow_hook }
    }

    /// # Safety
    /// Must be called exactly once, after `[start, end)` is mapped, before
    /// any allocation.
    pub unsafe fn init(&mut self) {
        let header = self.start as *mut BlockHeader;
        // SAFETY: caller guarantees the range is mapped and exclusively
        // owned.
        unsafe {
            (*header).tag = FREE_MAGIC;
            (*header).size = self.end - self.start - size_of::<BlockHeader>();
            (*header).prev_phys_size = 0;
        }
    }

    fn align_up(size: usize) -> usize {
        (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
    }

    fn find_fit(&self, size: usize) -> Option<*mut BlockHeader> {
        let mut cursor = self.start;
        while cursor < self.end {
            let header = cursor as *mut BlockHeader;
            // SAFETY: cursor always points at a live header within
            // [start, end), maintained as a loop invariant.
            let (tag, block_size) = unsafe { ((*header).tag, (*header).size) };
            if tag == FREE_MAGIC && block_size >= size {
                return Some(header);
            }
            cursor += size_of::<BlockHeader>() + block_size;
        }
        None
    }

    /// Split `header` so the first `size` bytes become an in-use block and
    /// the remainder (if large enough to host a header and the minimum
    /// payload) becomes a new free block.
    unsafe fn split(&mut self, header: *mut BlockHeader, size: usize) {
        unsafe {
            let original_size = (*header).size;
            let remainder = original_size - size;
            if remainder < size_of::<BlockHeader>() + MIN_BLOCK_SIZE {
                (*header).tag = IN_USE_MAGIC;
                return;
            }

            (*header).size = size;
            (*header).tag = IN_USE_MAGIC;

            let next_addr = header as usize + size_of::<BlockHeader>() + size;
            let next = next_addr as *mut BlockHeader;
            (*next).tag = FREE_MAGIC;
            (*next).size = remainder - size_of::<BlockHeader>();
            (*next).prev_phys_size = size;

            self.update_next_prev_phys_size(next);
        }
    }

    unsafe fn update_next_prev_phys_size(&mut self, header: *mut BlockHeader) {
        unsafe {
            let following = header as usize + size_of::<BlockHeader>() + (*header).size;
            if following < self.end {
                (*(following as *mut BlockHeader)).prev_phys_size = (*header).size;
            }
        }
    }

    pub fn alloc(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        let size = Self::align_up(layout.size().max(MIN_BLOCK_SIZE));
        let header = match self.find_fit(size) {
            Some(h) => h,
            None => {
                if !self.grow_to_fit(size) {
                    return None;
                }
                self.find_fit(size)?
            }
        };
        // SAFETY: header came from `find_fit`, which only returns headers
        // inside [start, end).
        unsafe {
            self.split(header, size);
            NonNull::new((*header).payload())
        }
    }

    fn grow_to_fit(&mut self, size: usize) -> bool {
        let needed = size_of::<BlockHeader>() + size;
        let mut new_end = self.end;
        while new_end < self.end + needed {
            new_end += crate::config::FRAME_SIZE;
        }
        if new_end > self.max_end {
            return false;
        }
        match self.grow_hook {
            Some(hook) if hook(self.end, new_end) => {}
            Some(_) => return false,
            None => return false,
        }
        self.grow(new_end)
    }

    /// Extend the heap up to `new_end`, merging the new space into the
    /// last block if it is free, or creating a new trailing free block
    /// otherwise. Only called once `grow_to_fit`'s `grow_hook` invocation
    /// has confirmed `[end, new_end)` is mapped.
    fn grow(&mut self, new_end: usize) -> bool {
        let old_end = self.end;
        self.end = new_end;

        let added = new_end - old_end;
        // SAFETY: [old_end, new_end) was just brought under management by
        // the caller mapping it before calling `grow`.
        unsafe {
            let last = self.last_block();
            if (*last).tag == FREE_MAGIC {
                (*last).size += added;
            } else {
                let new_header = old_end as *mut BlockHeader;
                (*new_header).tag = FREE_MAGIC;
                (*new_header).size = added - size_of::<BlockHeader>();
                (*new_header).prev_phys_size = (*last).size;
            }
        }
        true
    }

    unsafe fn last_block(&self) -> *mut BlockHeader {
        let mut cursor = self.start;
        let mut last = cursor as *mut BlockHeader;
        while cursor < self.end {
            last = cursor as *mut BlockHeader;
            // SAFETY: loop invariant, see `find_fit`.
            let size = unsafe { (*last).size };
            cursor += size_of::<BlockHeader>() + size;
        }
        last
    }

    /// Free `ptr`, coalescing with either physical neighbor that is also
    /// free. Returns [`KernelError::DoubleFree`] if the header's tag is
    /// not `IN_USE_MAGIC`, and [`KernelError::HeapCorruption`] if the
    /// header carries neither magic at all.
    ///
    /// # Safety
    /// `ptr` must have been returned by a prior `alloc` on this same heap
    /// and not already freed.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> KernelResult<()> {
        let header = unsafe { BlockHeader::from_payload(ptr) };
        let addr = header as usize as u32;

        let tag = unsafe { (*header).tag };
        match tag {
            IN_USE_MAGIC => {}
            FREE_MAGIC => return Err(KernelError::DoubleFree { addr }),
            _ => return Err(KernelError::HeapCorruption { addr }),
        }

        unsafe {
            (*header).tag = FREE_MAGIC;
            let merged = self.coalesce_with_next(header);
            self.coalesce_with_prev(merged);
        }
        Ok(())
    }

    unsafe fn coalesce_with_next(&mut self, header: *mut BlockHeader) -> *mut BlockHeader {
        unsafe {
            let next_addr = header as usize + size_of::<BlockHeader>() + (*header).size;
            if next_addr >= self.end {
                return header;
            }
            let next = next_addr as *mut BlockHeader;
            if (*next).tag == FREE_MAGIC {
                (*header).size += size_of::<BlockHeader>() + (*next).size;
                self.update_next_prev_phys_size(header);
            }
            header
        }
    }

    unsafe fn coalesce_with_prev(&mut self, header: *mut BlockHeader) -> *mut BlockHeader {
        unsafe {
            if header as usize == self.start {
                return header;
            }
            let prev_size = (*header).prev_phys_size;
            let prev_addr = header as usize - size_of::<BlockHeader>() - prev_size;
            let prev = prev_addr as *mut BlockHeader;
            if (*prev).tag == FREE_MAGIC {
                (*prev).size += size_of::<BlockHeader>() + (*header).size;
                self.update_next_prev_phys_size(prev);
                return prev;
            }
            header
        }
    }

    /// Grow or shrink an existing allocation in place when its physical
    /// right neighbor is free and large enough; otherwise fall back to
    /// allocate-copy-free (spec §2.3's realloc contract).
    pub fn realloc(&mut self, ptr: *mut u8, old_layout: Layout, new_size: usize) -> Option<NonNull<u8>> {
        let header = unsafe { BlockHeader::from_payload(ptr) };
        let aligned_new = Self::align_up(new_size.max(MIN_BLOCK_SIZE));
        let current_size = unsafe { (*header).size };

        if aligned_new <= current_size {
            unsafe { self.split(header, aligned_new) };
            return NonNull::new(ptr);
        }

        let extend_by = aligned_new - current_size;
        let next_addr = header as usize + size_of::<BlockHeader>() + current_size;
        if next_addr < self.end {
            let next = next_addr as *mut BlockHeader;
            // SAFETY: next_addr < self.end, so `next` points at a live
            // header (loop invariant maintained by alloc/free/grow).
            unsafe {
                if (*next).tag == FREE_MAGIC
                    && (*next).size + size_of::<BlockHeader>() >= extend_by
                {
                    (*header).size += size_of::<BlockHeader>() + (*next).size;
                    self.split(header, aligned_new);
                    return NonNull::new(ptr);
                }
            }
        }

        let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;
        let new_block = self.alloc(new_layout)?;
        unsafe {
            core::ptr::copy_nonoverlapping(ptr, new_block.as_ptr(), current_size.min(new_size));
            let _ = self.free(ptr);
        }
        Some(new_block)
    }
}

pub struct LockedHeap(Mutex<BlockHeap>);

impl LockedHeap {
    /// # Safety
    /// See [`BlockHeap::new`].
    pub const unsafe fn new(
        start: usize,
        initial_size: usize,
        max_size: usize,
        grow_hook: Option<fn(usize, usize) -> bool>,
    ) -> Self {
        Self(Mutex::new(unsafe { BlockHeap::new(start, initial_size, max_size, grow_hook) }))
    }

    /// # Safety
    /// See [`BlockHeap::init`].
    pub unsafe fn init(&self) {
        unsafe { self.0.lock().init() };
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0.lock().alloc(layout).map_or(core::ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: contract of GlobalAlloc::dealloc matches free's contract.
        if let Err(e) = unsafe { self.0.lock().free(ptr) } {
            log::error!("heap dealloc failed: {e}");
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.0
            .lock()
            .realloc(ptr, layout, new_size)
            .map_or(core::ptr::null_mut(), |p| p.as_ptr())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn backing_heap(size: usize) -> (Vec<u8>, BlockHeap) {
        let mut backing = vec![0u8; size];
        let start = backing.as_mut_ptr() as usize;
        let mut heap = unsafe { BlockHeap::new(start, size, size, None) };
        unsafe { heap.init() };
        (backing, heap)
    }

    #[test]
    fn zero_size_alloc_returns_none() {
        let (_backing, mut heap) = backing_heap(4096);
        let layout = Layout::from_size_align(0, 8).unwrap();
        assert!(heap.alloc(layout).is_none());
    }

    #[test]
    fn alloc_then_free_then_realloc_same_slot() {
        let (_backing, mut heap) = backing_heap(4096);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let a = heap.alloc(layout).unwrap();
        unsafe { heap.free(a.as_ptr()).unwrap() };
        let b = heap.alloc(layout).unwrap();
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn double_free_is_rejected() {
        let (_backing, mut heap) = backing_heap(4096);
        let layout = Layout::from_size_align(32, 8).unwrap();
        let a = heap.alloc(layout).unwrap();
        let header_addr = a.as_ptr() as usize - size_of::<BlockHeader>();
        unsafe { heap.free(a.as_ptr()).unwrap() };
        let err = unsafe { heap.free(a.as_ptr()) };
        assert_eq!(err, Err(KernelError::DoubleFree { addr: header_addr as u32 }));
    }

    #[test]
    fn adjacent_frees_coalesce() {
        let (_backing, mut heap) = backing_heap(4096);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let a = heap.alloc(layout).unwrap();
        let b = heap.alloc(layout).unwrap();
        unsafe { heap.free(a.as_ptr()).unwrap() };
        unsafe { heap.free(b.as_ptr()).unwrap() };

        let big_layout = Layout::from_size_align(200, 8).unwrap();
        let c = heap.alloc(big_layout).unwrap();
        assert_eq!(c.as_ptr(), a.as_ptr());
    }

    #[test]
    fn realloc_grow_falls_back_when_no_room() {
        let (_backing, mut heap) = backing_heap(256);
        let layout = Layout::from_size_align(32, 8).unwrap();
        let a = heap.alloc(layout).unwrap();
        let _pin = heap.alloc(layout).unwrap();
        let grown = heap.realloc(a.as_ptr(), layout, 96);
        assert!(grown.is_some());
    }
}
