//! Bounded process table: a fixed-size arena indexed by `pid % capacity`,
//! the redesign spec §9 calls for in place of the original's flat array
//! searched linearly on every lookup (`original_source/kernel/src/
//! process/process.c` walks `process_list` start to end for every
//! `process_get`). Indexing by pid makes lookup, insert, and remove all
//! O(1) instead of O(n).

use crate::config::MAX_PROCESSES;
use crate::error::{KernelError, KernelResult};
use crate::process::pcb::{Pcb, Pid};

pub struct ProcessTable {
    slots: [Option<Pcb>; MAX_PROCESSES],
    next_pid: Pid,
    live_count: usize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        const NONE_PCB: Option<Pcb> = None;
        Self { slots: [NONE_PCB; MAX_PROCESSES], next_pid: 1, live_count: 0 }
    }

    fn slot_index(pid: Pid) -> usize {
        (pid as usize) % MAX_PROCESSES
    }

    pub fn insert(&mut self, build: impl FnOnce(Pid) -> Pcb) -> KernelResult<Pid> {
        if self.live_count >= MAX_PROCESSES {
            return Err(KernelError::ProcessTableFull);
        }
        let pid = self.allocate_pid()?;
        let index = Self::slot_index(pid);
        self.slots[index] = Some(build(pid));
        self.live_count += 1;
        Ok(pid)
    }

    fn allocate_pid(&mut self) -> KernelResult<Pid> {
        for _ in 0..MAX_PROCESSES {
            let candidate = self.next_pid;
            self.next_pid = self.next_pid.wrapping_add(1).max(1);
            if self.slots[Self::slot_index(candidate)].is_none() {
                return Ok(candidate);
            }
        }
        Err(KernelError::ProcessTableFull)
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        let pcb = self.slots[Self::slot_index(pid)].as_ref()?;
        (pcb.pid == pid).then_some(pcb)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        let index = Self::slot_index(pid);
        match &self.slots[index] {
            Some(pcb) if pcb.pid == pid => self.slots[index].as_mut(),
            _ => None,
        }
    }

    pub fn remove(&mut self, pid: Pid) -> KernelResult<Pcb> {
        let index = Self::slot_index(pid);
        match &self.slots[index] {
            Some(pcb) if pcb.pid == pid => {
                self.live_count -= 1;
                Ok(self.slots[index].take().unwrap())
            }
            _ => Err(KernelError::ProcessNotFound { pid }),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::addr::PhysAddr;
    use crate::process::pcb::{Privilege, ProcessState};

    fn dummy(pid: Pid) -> Pcb {
        Pcb {
            pid,
            priority: 0,
            page_directory: PhysAddr::new(0),
            state: ProcessState::Ready,
            privilege: Privilege::Kernel,
            ..Pcb::unused()
        }
    }

    #[test]
    fn insert_then_lookup() {
        let mut table = ProcessTable::new();
        let pid = table.insert(dummy).unwrap();
        assert!(table.get(pid).is_some());
    }

    #[test]
    fn remove_then_lookup_fails() {
        let mut table = ProcessTable::new();
        let pid = table.insert(dummy).unwrap();
        table.remove(pid).unwrap();
        assert!(table.get(pid).is_none());
    }

    #[test]
    fn table_full_is_reported() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            table.insert(dummy).unwrap();
        }
        assert_eq!(table.insert(dummy), Err(KernelError::ProcessTableFull));
    }
}
