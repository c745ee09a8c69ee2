//! Process and thread lifecycle (spec §3).
//!
//! `create` mirrors `original_source/kernel/src/process/process.c`'s
//! `process_new`: it allocates a fresh page directory, a kernel stack, and
//! for user processes a separate user stack and user heap, builds the
//! initial [`crate::irq::Frame`] with the canonical ring-0 or ring-3
//! segment set and `DEFAULT_EFLAGS`, and inserts the PCB into the process
//! table. The thread/PCB split the spec calls for is new relative to the
//! original (which only has one execution context per process); `pcb.rs`'s
//! fixed-size thread array is sized to keep that generalization bounded.

pub mod pcb;
pub mod table;
pub mod thread;

use spin::Mutex;

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::config::{
    DEFAULT_EFLAGS, DEFAULT_STACK_SIZE, FRAME_SIZE, KSTACK_REGION_BASE, SEL_KERNEL_CODE,
    SEL_KERNEL_DATA, SEL_USER_CODE, SEL_USER_DATA, UHEAP_INITIAL_SIZE, UHEAP_MAX_SIZE,
    UHEAP_START, USTACK_TOP,
};
use crate::error::{KernelError, KernelResult};
use crate::irq::Frame;
use crate::mm::addr::{PhysAddr, VirtAddr};
use crate::mm::heap::BlockHeap;
use crate::mm::{frame_allocator::FRAME_ALLOCATOR, page_table::EntryFlags, vmm};
use crate::process::pcb::{Pcb, Pid, Privilege, ProcessState};
use crate::process::table::ProcessTable;
use crate::process::thread::{Thread, ThreadId, ThreadState};

pub const MAX_THREADS_PER_PROCESS: usize = 8;

static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Thread storage is kept flat and separate from `ProcessTable`, indexed
/// the same way (`tid % MAX_PROCESSES`), since a thread outlives no PCB
/// lookup path that would need it nested inside one.
static THREADS: Mutex<[Option<Thread>; crate::config::MAX_PROCESSES]> = {
    const NONE_THREAD: Option<Thread> = None;
    Mutex::new([NONE_THREAD; crate::config::MAX_PROCESSES])
};

fn thread_slot(tid: ThreadId) -> usize {
    (tid as usize) % crate::config::MAX_PROCESSES
}

/// Create a new process with a single initial thread starting at `entry`.
/// `privilege` selects the canonical ring-0 or ring-3 segment set (spec
/// §3). Returns the new pid.
pub fn create(entry: VirtAddr, priority: u8, privilege: Privilege) -> KernelResult<Pid> {
    let page_directory = vmm::alloc_page_directory()?;

    let user_heap = match privilege {
        Privilege::User => Some(allocate_user_heap(page_directory)?),
        Privilege::Kernel => None,
    };

    let pid = {
        let mut table = PROCESS_TABLE.lock();
        table.insert(|pid| Pcb {
            pid,
            priority,
            page_directory,
            state: ProcessState::Ready,
            privilege,
            user_heap,
            ..Pcb::unused()
        })?
    };

    // The kernel-stack window is pre-mapped for every possible pid slot
    // (see `mm::map_kernel_stack_region`), so no mapping call is needed
    // here — only the address for this pid's slot.
    let kernel_stack_top = kernel_stack_top_for(pid);
    let user_stack_top = match privilege {
        Privilege::User => allocate_user_stack(page_directory)?,
        Privilege::Kernel => kernel_stack_top,
    };

    let (cs, ds) = match privilege {
        Privilege::Kernel => (SEL_KERNEL_CODE, SEL_KERNEL_DATA),
        Privilege::User => (SEL_USER_CODE, SEL_USER_DATA),
    };

    let frame = Frame {
        ds: ds as u32,
        es: ds as u32,
        fs: ds as u32,
        gs: ds as u32,
        edi: 0,
        esi: 0,
        ebp: 0,
        esp_dummy: 0,
        ebx: 0,
        edx: 0,
        ecx: 0,
        eax: 0,
        vector: 0,
        err_code: 0,
        eip: entry.0,
        cs: cs as u32,
        eflags: DEFAULT_EFLAGS,
        useresp: user_stack_top,
        ss: ds as u32,
    };

    let tid = pid;
    let thread = Thread {
        tid,
        owner: pid,
        state: ThreadState::Ready,
        frame,
        kernel_stack_top,
        user_stack_top,
        wake_tick: 0,
    };
    thread.assert_interrupts_enabled_invariant();

    THREADS.lock()[thread_slot(tid)] = Some(thread);
    with_table(|table| table.get_mut(pid).expect("just inserted").add_thread(tid));

    Ok(pid)
}

/// Top of the pre-mapped kernel-stack slot reserved for `pid`.
fn kernel_stack_top_for(pid: Pid) -> u32 {
    let slot = (pid as usize) % crate::config::MAX_PROCESSES;
    KSTACK_REGION_BASE + (slot as u32 + 1) * DEFAULT_STACK_SIZE as u32
}

/// Map a fresh user stack into `page_directory`'s own (non-shared) lower
/// half, at the fixed per-directory address every process uses.
fn allocate_user_stack(page_directory: PhysAddr) -> KernelResult<u32> {
    let pages = DEFAULT_STACK_SIZE / FRAME_SIZE;
    let base = USTACK_TOP - DEFAULT_STACK_SIZE as u32;
    for i in 0..pages {
        let frame = FRAME_ALLOCATOR.lock().alloc_block()?;
        let virt = VirtAddr::new(base + (i * FRAME_SIZE) as u32);
        vmm::map_in(page_directory, virt, frame, EntryFlags::WRITABLE | EntryFlags::USER)?;
    }
    Ok(base + DEFAULT_STACK_SIZE as u32)
}

/// Map and initialize the per-process user heap at `UHEAP_START` inside
/// `page_directory` (spec §4.3). Initialization writes the first free-block
/// header directly into that range, which only resolves correctly while
/// `page_directory` is loaded, so this briefly switches to it and restores
/// whatever was current before returning.
fn allocate_user_heap(page_directory: PhysAddr) -> KernelResult<BlockHeap> {
    let pages = UHEAP_INITIAL_SIZE / FRAME_SIZE;
    for i in 0..pages {
        let frame = FRAME_ALLOCATOR.lock().alloc_block()?;
        let virt = VirtAddr::new(UHEAP_START + (i * FRAME_SIZE) as u32);
        vmm::map_in(page_directory, virt, frame, EntryFlags::WRITABLE | EntryFlags::USER)?;
    }

    let previous = vmm::current();
    vmm::switch(page_directory);
    let mut heap = unsafe {
        BlockHeap::new(UHEAP_START as usize, UHEAP_INITIAL_SIZE, UHEAP_MAX_SIZE, Some(map_user_heap_growth))
    };
    unsafe { heap.init() };
    vmm::switch(previous);
    Ok(heap)
}

/// `grow_hook` for a per-process user heap: valid only while the owning
/// process's directory is the one loaded, which holds for every call site
/// below since they all run with `pid` as the current process.
fn map_user_heap_growth(start: usize, end: usize) -> bool {
    let mut virt = start as u32;
    while (virt as usize) < end {
        let frame = match FRAME_ALLOCATOR.lock().alloc_block() {
            Ok(frame) => frame,
            Err(_) => return false,
        };
        if vmm::map(VirtAddr::new(virt), frame, EntryFlags::WRITABLE | EntryFlags::USER).is_err() {
            return false;
        }
        virt += FRAME_SIZE as u32;
    }
    true
}

/// Allocate from `pid`'s own user heap. Only meaningful while `pid` is the
/// currently running process, since the heap's memory only resolves
/// through the address space that is actually loaded.
pub fn user_heap_alloc(pid: Pid, layout: Layout) -> Option<NonNull<u8>> {
    with_table(|table| table.get_mut(pid)?.user_heap.as_mut()?.alloc(layout))
}

/// Free `ptr`, previously returned by [`user_heap_alloc`] for the same pid.
pub fn user_heap_free(pid: Pid, ptr: *mut u8) -> KernelResult<()> {
    with_table(|table| {
        table
            .get_mut(pid)
            .and_then(|pcb| pcb.user_heap.as_mut())
            .ok_or(KernelError::ProcessNotFound { pid })
            .and_then(|heap| unsafe { heap.free(ptr) })
    })
}

pub fn with_thread<R>(tid: ThreadId, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
    THREADS.lock()[thread_slot(tid)].as_mut().map(f)
}

pub fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    f(&mut PROCESS_TABLE.lock())
}

/// Mark `pid` as terminating. Its resources (page directory, stacks,
/// PCB slot) are not released here: spec §3/§9 requires deferring the
/// actual reap until the scheduler has switched away from it, since a
/// running process cannot safely free the page directory it is executing
/// under.
pub fn mark_terminating(pid: Pid) -> KernelResult<()> {
    with_table(|table| {
        let pcb = table.get_mut(pid).ok_or(KernelError::ProcessNotFound { pid })?;
        pcb.state = ProcessState::Terminating;
        Ok(())
    })
}

/// Called from the page-fault handler and other fatal-to-the-process
/// traps: terminate whichever process owns the thread that was running
/// when the trap fired.
pub fn terminate_current(_reason: KernelError) {
    if let Some(pid) = crate::sched::current_pid() {
        let _ = mark_terminating(pid);
        crate::sched::request_reschedule();
    }
}

/// Release every resource owned by `pid`: its threads' stacks, its page
/// directory, and its table slot. Only safe to call once the scheduler
/// has confirmed `pid` is not the currently running process.
pub fn reap(pid: Pid) -> KernelResult<()> {
    let pcb = with_table(|table| table.remove(pid))?;

    // Kernel stacks live in the pre-mapped, permanently shared region and
    // are not individually unmapped; only a user stack is private enough
    // to this process's own directory to reclaim here, and it goes away
    // anyway when `free_page_directory` drops the directory's user-half
    // page tables.
    for tid in pcb.threads.into_iter().flatten() {
        THREADS.lock()[thread_slot(tid)].take();
    }

    vmm::free_page_directory(pcb.page_directory)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn kernel_stack_top_is_pid_indexed_and_nonoverlapping() {
        let a = kernel_stack_top_for(0);
        let b = kernel_stack_top_for(1);
        assert_ne!(a, b);
        assert_eq!(b - a, DEFAULT_STACK_SIZE as u32);
        assert!(a >= KSTACK_REGION_BASE);
    }

    #[test]
    fn mark_terminating_transitions_state_and_rejects_unknown_pid() {
        let pid = with_table(|table| table.insert(|pid| Pcb { pid, state: ProcessState::Ready, ..Pcb::unused() }))
            .expect("table has room");

        mark_terminating(pid).expect("pid is present");
        let state = with_table(|table| table.get(pid).map(|pcb| pcb.state));
        assert_eq!(state, Some(ProcessState::Terminating));

        let missing = pid.wrapping_add(crate::config::MAX_PROCESSES as u32 * 4096);
        assert!(mark_terminating(missing).is_err());

        let _ = with_table(|table| table.remove(pid));
    }
}
