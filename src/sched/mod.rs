//! Round-robin preemptive scheduler, driven by the PIT tick (spec §6).
//!
//! The ready queue is the circular doubly-linked PCB ring
//! `process::pcb::Pcb::prev`/`next` link into; round-robin tie-breaking
//! falls out for free by always inserting a newly-ready process right
//! before the current one, so it is visited exactly once per lap in
//! insertion order. This mirrors the teacher's `sched/scheduler.rs` ready
//! queue shape (an intrusive ring rather than a `VecDeque`), generalized
//! from the teacher's priority-feedback multi-queue design down to the
//! flat single-priority ring this spec calls for.

use spin::Mutex;

use crate::config::TIME_SLICE_TICKS;
use crate::error::KernelError;
use crate::irq::Frame;
use crate::mm::vmm;
use crate::process::pcb::{Pid, ProcessState};
use crate::process::thread::{ThreadId, ThreadState};
use crate::sync::CriticalSection;

struct SchedulerState {
    /// pid of the process currently selected to run; `None` before the
    /// first process has been scheduled.
    current: Option<Pid>,
    ticks: u64,
    remaining_slice: u64,
    /// pid whose reap was deferred because it was still running when
    /// marked for termination (spec §3/§9).
    pending_reap: Option<Pid>,
}

static SCHEDULER: Mutex<SchedulerState> = Mutex::new(SchedulerState {
    current: None,
    ticks: 0,
    remaining_slice: TIME_SLICE_TICKS,
    pending_reap: None,
});

static RESCHEDULE_REQUESTED: spin::Mutex<bool> = spin::Mutex::new(false);

pub fn current_pid() -> Option<Pid> {
    SCHEDULER.lock().current
}

pub fn request_reschedule() {
    *RESCHEDULE_REQUESTED.lock() = true;
}

pub fn ticks() -> u64 {
    SCHEDULER.lock().ticks
}

/// Insert `pid` into the ready ring, right before the currently running
/// process if one exists, otherwise as the sole entry.
pub fn enqueue(pid: Pid) {
    CriticalSection::with(|| {
        crate::process::with_table(|table| {
            let mut scheduler = SCHEDULER.lock();
            match scheduler.current {
                None => {
                    if let Some(pcb) = table.get_mut(pid) {
                        pcb.prev = Some(pid);
                        pcb.next = Some(pid);
                    }
                    scheduler.current = Some(pid);
                }
                Some(current) => {
                    let prev_of_current = table.get(current).and_then(|pcb| pcb.prev);
                    if let Some(before) = prev_of_current {
                        if let Some(before_pcb) = table.get_mut(before) {
                            before_pcb.next = Some(pid);
                        }
                        if let Some(pid_pcb) = table.get_mut(pid) {
                            pid_pcb.prev = Some(before);
                            pid_pcb.next = Some(current);
                        }
                        if let Some(current_pcb) = table.get_mut(current) {
                            current_pcb.prev = Some(pid);
                        }
                    }
                }
            }
        });
    });
}

/// Remove `pid` from the ring (used when it is marked terminating so it
/// is never selected again, even before it is actually reaped).
fn unlink(pid: Pid) {
    crate::process::with_table(|table| {
        let (prev, next) = match table.get(pid) {
            Some(pcb) => (pcb.prev, pcb.next),
            None => return,
        };
        if let Some(prev) = prev {
            if let Some(pcb) = table.get_mut(prev) {
                pcb.next = if next == Some(pid) { Some(prev) } else { next };
            }
        }
        if let Some(next) = next {
            if let Some(pcb) = table.get_mut(next) {
                pcb.prev = if prev == Some(pid) { Some(next) } else { prev };
            }
        }
    });
}

/// Register the timer IRQ0 handler that drives preemption.
pub fn init() {
    crate::irq::install_handler(crate::irq::VECTOR_TIMER, on_timer_tick);
}

fn on_timer_tick(frame: &mut Frame) {
    let (now, current) = {
        let mut scheduler = SCHEDULER.lock();
        scheduler.ticks += 1;
        (scheduler.ticks, scheduler.current)
    };

    if let Some(current) = current {
        wake_sleepers(now, current);
    }

    let (expired, forced) = {
        let mut scheduler = SCHEDULER.lock();
        if scheduler.remaining_slice > 0 {
            scheduler.remaining_slice -= 1;
        }
        let expired = scheduler.remaining_slice == 0;
        let forced = core::mem::take(&mut *RESCHEDULE_REQUESTED.lock());
        (expired, forced)
    };

    if expired || forced {
        reschedule(frame);
    }
}

fn wake_sleepers(now: u64, current: Pid) {
    crate::process::with_table(|table| {
        let mut pid = current;
        loop {
            let next = table.get(pid).and_then(|pcb| pcb.next);
            if let Some(pcb) = table.get_mut(pid) {
                if pcb.state == ProcessState::Sleeping {
                    let woke = pcb
                        .threads
                        .iter()
                        .flatten()
                        .any(|&tid| crate::process::with_thread(tid, |t| t.wake_tick <= now).unwrap_or(false));
                    if woke {
                        pcb.state = ProcessState::Ready;
                    }
                }
            }
            match next {
                Some(n) if n != current => pid = n,
                _ => break,
            }
        }
    });
}

/// Save `frame` into the outgoing thread, select the next ready process
/// in ring order, load its page directory and kernel stack, then
/// overwrite `frame` in place with the incoming thread's saved state so
/// the trampoline's `iret` resumes it instead of the process that was
/// interrupted.
fn reschedule(frame: &mut Frame) {
    let mut scheduler = SCHEDULER.lock();
    scheduler.remaining_slice = TIME_SLICE_TICKS;

    let Some(outgoing_pid) = scheduler.current else { return };

    let outgoing_tid = outgoing_pid;
    crate::process::with_thread(outgoing_tid, |thread| thread.frame = *frame);

    let outgoing_terminating = crate::process::with_table(|table| {
        table.get(outgoing_pid).map(|pcb| pcb.state == ProcessState::Terminating).unwrap_or(false)
    });
    if outgoing_terminating {
        unlink(outgoing_pid);
        scheduler.pending_reap = Some(outgoing_pid);
    }

    let (next_pid_candidate, stale) = next_ready_after(outgoing_pid, outgoing_terminating);
    for pid in stale {
        // Found terminating while scanning for the next runnable process:
        // it is not `outgoing_pid` (that one was handled above), so it was
        // never the executing context and is safe to reap right away
        // instead of waiting for it to cycle back around as `current`.
        unlink(pid);
        let _ = crate::process::reap(pid);
    }
    let Some(next_pid) = next_pid_candidate else {
        return;
    };

    crate::process::with_table(|table| {
        if let Some(pcb) = table.get_mut(next_pid) {
            pcb.state = ProcessState::Running;
        }
    });
    scheduler.current = Some(next_pid);

    let to_reap = scheduler.pending_reap.take();
    drop(scheduler);

    let directory = crate::process::with_table(|table| table.get(next_pid).map(|p| p.page_directory));
    if let Some(directory) = directory {
        vmm::switch(directory);
    }

    let next_tid = next_pid;
    if let Some(thread) = crate::process::with_thread(next_tid, |thread| {
        crate::arch::x86::tss::set_kernel_stack(thread.kernel_stack_top);
        thread.frame
    }) {
        *frame = thread;
    }

    // The previous owner's resources are only freed now, after the
    // context switch away from it has fully completed (spec §3/§9): it is
    // never reaped while still the `current` process.
    if let Some(pid) = to_reap {
        let _ = crate::process::reap(pid);
    }
}

/// Find the next runnable pid after `from` in ring order, skipping
/// sleeping and terminating PCBs. Any terminating PCB encountered along
/// the way (other than `from` itself, whose termination the caller
/// already deals with) is collected in the returned list: it cannot be
/// the currently executing context, so it is safe for the caller to
/// unlink and reap immediately rather than leave it parked in the ring
/// forever (spec §4.5: a terminating process "must not be selected
/// again", which requires it to eventually actually be removed).
fn next_ready_after(from: Pid, from_is_terminating: bool) -> (Option<Pid>, alloc::vec::Vec<Pid>) {
    crate::process::with_table(|table| {
        let mut stale = alloc::vec::Vec::new();
        let start = table.get(from).and_then(|pcb| pcb.next).filter(|&n| n != from || !from_is_terminating);
        let Some(mut candidate) = start.or(if from_is_terminating { None } else { Some(from) }) else {
            return (None, stale);
        };
        let first = candidate;
        loop {
            let state = table.get(candidate).map(|pcb| pcb.state);
            match state {
                Some(ProcessState::Ready) | Some(ProcessState::Running) => return (Some(candidate), stale),
                Some(ProcessState::Terminating) if candidate != from => stale.push(candidate),
                _ => {}
            }
            let Some(next) = table.get(candidate).and_then(|pcb| pcb.next) else {
                return (None, stale);
            };
            if next == first {
                return (if from_is_terminating { None } else { Some(from) }, stale);
            }
            candidate = next;
        }
    })
}

/// Put the calling thread to sleep until `wake_tick`, then force a
/// reschedule (used by the `SLEEP` syscall).
pub fn sleep_current_until(wake_tick: u64) {
    if let Some(pid) = current_pid() {
        crate::process::with_table(|table| {
            if let Some(pcb) = table.get_mut(pid) {
                pcb.state = ProcessState::Sleeping;
            }
        });
        let threads = crate::process::with_table(|table| table.get(pid).map(|p| p.threads));
        for tid in threads.into_iter().flatten().flatten() {
            crate::process::with_thread(tid, |t| {
                t.state = ThreadState::Sleeping;
                t.wake_tick = wake_tick;
            });
        }
    }
    request_reschedule();
}

pub fn terminate_thread(tid: ThreadId, reason: KernelError) {
    let _ = reason;
    crate::process::with_thread(tid, |t| t.state = ThreadState::Terminating);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process::pcb::Pcb;

    fn spawn_ready() -> Pid {
        crate::process::with_table(|table| {
            table.insert(|pid| Pcb { pid, state: ProcessState::Ready, ..Pcb::unused() })
        })
        .expect("table has room")
    }

    #[test]
    fn enqueue_links_a_three_process_ring() {
        let a = spawn_ready();
        let b = spawn_ready();
        let c = spawn_ready();
        enqueue(a);
        enqueue(b);
        enqueue(c);

        // enqueue always inserts right before `current`, so the ring visits
        // every pid exactly once before returning to `a`.
        let mut seen = alloc::vec::Vec::new();
        let mut cursor = a;
        loop {
            seen.push(cursor);
            cursor = crate::process::with_table(|table| table.get(cursor).unwrap().next).unwrap();
            if cursor == a {
                break;
            }
        }
        seen.sort_unstable();
        let mut expected = [a, b, c];
        expected.sort_unstable();
        assert_eq!(seen, expected);

        for pid in [a, b, c] {
            let _ = crate::process::with_table(|table| table.remove(pid));
        }
    }

    #[test]
    fn next_ready_after_skips_a_sleeping_process() {
        let a = spawn_ready();
        let b = spawn_ready();
        enqueue(a);
        enqueue(b);
        crate::process::with_table(|table| {
            table.get_mut(b).unwrap().state = ProcessState::Sleeping;
        });

        // From `a`, the only other ring member is sleeping, so the search
        // wraps back around to `a` itself.
        let (next, stale) = next_ready_after(a, false);
        assert_eq!(next, Some(a));
        assert!(stale.is_empty());

        for pid in [a, b] {
            let _ = crate::process::with_table(|table| table.remove(pid));
        }
    }

    #[test]
    fn next_ready_after_reaps_a_terminating_non_current_process() {
        let a = spawn_ready();
        let b = spawn_ready();
        let c = spawn_ready();
        enqueue(a);
        enqueue(b);
        enqueue(c);
        crate::process::with_table(|table| {
            table.get_mut(b).unwrap().state = ProcessState::Terminating;
        });

        let (next, stale) = next_ready_after(a, false);
        assert_eq!(next, Some(c));
        assert_eq!(stale, alloc::vec![b]);

        for pid in [a, c] {
            let _ = crate::process::with_table(|table| table.remove(pid));
        }
    }

    #[test]
    fn request_reschedule_is_observed_and_consumed_like_the_timer_isr_would() {
        request_reschedule();
        assert!(core::mem::take(&mut *RESCHEDULE_REQUESTED.lock()));
        assert!(!*RESCHEDULE_REQUESTED.lock());
    }
}
