//! Syscall gate: vector 0x80, number in `eax`, arguments in
//! `ebx`/`ecx`/`edx`/`esi`/`edi`, return value in `eax` (spec §6).
//!
//! Grounded on the syscall numbers and calling convention
//! `original_source/kernel/include/process.h`/`kernel.c` establish for
//! this kernel's user programs; unlike the hardware exception table, this
//! is a software ABI this kernel owns outright, so an unrecognized number
//! returns a sentinel error code rather than faulting (spec §6: "unknown
//! syscall numbers return an error code, they do not raise a fault").

use crate::irq::Frame;
use crate::sched;

pub const SYS_TEST: u32 = 0;
pub const SYS_PUTCHAR: u32 = 1;
pub const SYS_TIME: u32 = 2;
pub const SYS_SLEEP: u32 = 3;
pub const SYS_PROCESS_TERMINATE: u32 = 4;
pub const SYS_KILL_PROCESS: u32 = 5;

/// Returned in `eax` when `eax` on entry did not name a known syscall.
pub const ERR_UNKNOWN_SYSCALL: u32 = u32::MAX;

pub fn init() {
    crate::irq::install_handler(crate::arch::x86::idt::VECTOR_SYSCALL, dispatch);
}

fn dispatch(frame: &mut Frame) {
    let number = frame.eax;
    let result = match number {
        SYS_TEST => sys_test(),
        SYS_PUTCHAR => sys_putchar(frame.ebx),
        SYS_TIME => sys_time(),
        SYS_SLEEP => sys_sleep(frame.ebx),
        SYS_PROCESS_TERMINATE => sys_process_terminate(),
        SYS_KILL_PROCESS => sys_kill_process(frame.ebx),
        _ => ERR_UNKNOWN_SYSCALL,
    };
    frame.eax = result;
}

fn sys_test() -> u32 {
    log::debug!("SYS_TEST from pid {:?}", sched::current_pid());
    0
}

fn sys_putchar(arg: u32) -> u32 {
    crate::print!("{}", arg as u8 as char);
    0
}

fn sys_time() -> u32 {
    (sched::ticks() / crate::config::PIT_HZ as u64) as u32
}

/// Sleep for `ms` milliseconds: `wake_tick = now + ms * tick_hz / 1000`,
/// then force an immediate reschedule so the sleeping thread never runs
/// again until its wake_tick is reached.
fn sys_sleep(ms: u32) -> u32 {
    let wake_at = sched::ticks() + (ms as u64 * crate::config::PIT_HZ as u64) / 1000;
    sched::sleep_current_until(wake_at);
    0
}

fn sys_process_terminate() -> u32 {
    if let Some(pid) = sched::current_pid() {
        let _ = crate::process::mark_terminating(pid);
        sched::request_reschedule();
        0
    } else {
        ERR_UNKNOWN_SYSCALL
    }
}

fn sys_kill_process(pid_arg: u32) -> u32 {
    match crate::process::mark_terminating(pid_arg) {
        Ok(()) => {
            if Some(pid_arg) == sched::current_pid() {
                sched::request_reschedule();
            }
            0
        }
        Err(_) => ERR_UNKNOWN_SYSCALL,
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_returns_sentinel() {
        let mut frame = zeroed_frame();
        frame.eax = 0xDEAD_BEEF;
        dispatch(&mut frame);
        assert_eq!(frame.eax, ERR_UNKNOWN_SYSCALL);
    }

    fn zeroed_frame() -> Frame {
        Frame {
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
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
            eip: 0,
            cs: 0,
            eflags: 0,
            useresp: 0,
            ss: 0,
        }
    }
}
