//! Self-hosted x86 protected-mode kernel core: physical frame allocation,
//! paging and the kernel heap, the interrupt/exception plane, and a
//! round-robin preemptive process/thread scheduler behind a syscall gate.
//!
//! Built as a library so the host-target test suite
//! (`cfg(not(target_os = "none"))`) can exercise the frame allocator, the
//! heap, and the process table without the `no_std`/`no_main` binary
//! entry point getting in the way, the same split the teacher's
//! `lib.rs`/`main.rs` pair uses.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod mm;
pub mod print;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;

use arch::x86::multiboot::MultibootInfo;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        println!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Bring the kernel up to the point where the scheduler can run: arch
/// primitives, memory management, process/scheduler/syscall wiring, then
/// the first process. Interrupts stay masked for the entire call.
///
/// # Safety
/// Must be called exactly once, from the multiboot entry trampoline, with
/// `multiboot_info` pointing at the structure the loader actually wrote.
pub unsafe fn kernel_main(multiboot_info: *const MultibootInfo) -> ! {
    log::set_logger(&LOGGER).ok();
    log::set_max_level(log::LevelFilter::Trace);

    arch::x86::init();

    // SAFETY: the caller attests `multiboot_info` is the loader-provided
    // pointer, handed to us before paging or the heap exist.
    let info = unsafe { &*multiboot_info };
    // SAFETY: called once, here, before any other `mm` function.
    unsafe { mm::init(info) };

    sched::init();
    syscall::init();

    bootstrap_init_process();

    arch::x86::idle();
    loop {
        arch::x86::idle();
    }
}

/// Create the first (kernel-mode) process, analogous to
/// `original_source/kernel/src/kernel.c`'s call to `process_new` for the
/// shell before any interrupt has fired.
fn bootstrap_init_process() {
    use process::pcb::Privilege;

    let entry = mm::addr::VirtAddr::new(init_task as usize as u32);
    match process::create(entry, 0, Privilege::Kernel) {
        Ok(pid) => sched::enqueue(pid),
        Err(e) => {
            log::error!("failed to bootstrap init process: {e}");
            arch::x86::halt_fatal();
        }
    }
}

extern "C" fn init_task() -> ! {
    loop {
        arch::x86::idle();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    arch::x86::halt_fatal();
}
