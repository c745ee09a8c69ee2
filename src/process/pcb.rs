//! Process Control Block (spec §3).
//!
//! Grounded on `original_source/kernel/include/process.h`'s `process_t`:
//! pid, priority, a page-directory handle, and a thread list. The
//! original links processes only through a flat fixed-size table; this
//! kernel additionally keeps a circular doubly-linked ring through
//! `prev`/`next` (spec §6, round-robin scheduling), the same
//! intrusive-link style the teacher's `process/pcb.rs` uses for its own
//! ready queue.

use crate::mm::addr::PhysAddr;
use crate::mm::heap::BlockHeap;
use crate::process::thread::ThreadId;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Sleeping,
    Ready,
    Running,
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

pub struct Pcb {
    pub pid: Pid,
    pub priority: u8,
    pub page_directory: PhysAddr,
    pub state: ProcessState,
    pub privilege: Privilege,
    pub threads: [Option<ThreadId>; super::MAX_THREADS_PER_PROCESS],
    pub thread_count: usize,
    /// Ring links into the scheduler's circular PCB list. `None` means
    /// "not currently linked" (a freshly created or just-reaped process).
    pub prev: Option<Pid>,
    pub next: Option<Pid>,
    /// The process's own heap, mapped user-accessible at `UHEAP_START` in
    /// this PCB's address space (spec §4.3: "a per-process user heap uses
    /// the same engine, instantiated at a different virtual range"). Only
    /// present for [`Privilege::User`] processes; its backing frames are
    /// reclaimed generically by `vmm::free_page_directory` as part of the
    /// user half, so reaping needs no special case for it.
    pub user_heap: Option<BlockHeap>,
}

impl Pcb {
    pub const fn unused() -> Self {
        Self {
            pid: 0,
            priority: 0,
            page_directory: PhysAddr::new(0),
            state: ProcessState::Terminating,
            privilege: Privilege::Kernel,
            threads: [None; super::MAX_THREADS_PER_PROCESS],
            thread_count: 0,
            prev: None,
            next: None,
            user_heap: None,
        }
    }

    pub fn add_thread(&mut self, tid: ThreadId) -> bool {
        for slot in self.threads.iter_mut() {
            if slot.is_none() {
                *slot = Some(tid);
                self.thread_count += 1;
                return true;
            }
        }
        false
    }

    pub fn remove_thread(&mut self, tid: ThreadId) {
        for slot in self.threads.iter_mut() {
            if *slot == Some(tid) {
                *slot = None;
                self.thread_count -= 1;
                return;
            }
        }
    }

    pub fn is_user(&self) -> bool {
        self.privilege == Privilege::User
    }
}
