//! Shared interrupt dispatch plane: the trap [`Frame`], the exception
//! mnemonic table, the page-fault decoder, and the vector dispatch table
//! driving CPU exceptions (0-31), remapped PIC IRQs (32-47) and the
//! syscall gate (0x80).
//!
//! Grounded on `original_source/kernel/src/system/isr.c`'s `isr_handler`/
//! `irq_install_handler` pair, but the original's page-fault path has a
//! bug spec.md §9 calls out explicitly: `if (!handler) handler(r);` calls
//! through a null pointer whenever no handler is installed, instead of
//! skipping the call. The dispatcher below only ever invokes a handler
//! that is `Some`, matching the corrected behavior spec §9 mandates.

use core::fmt;

use crate::arch::x86::pic;
use crate::config::SEL_KERNEL_DATA;
use crate::sync::CriticalSection;

/// Register state captured by the common assembly trampoline (out of
/// scope here) on every trap. Field order matches the trampoline's push
/// sequence exactly: it is read by overlaying this struct directly on the
/// saved stack, so reordering fields here requires reordering the pushes
/// in `stubs.rs`'s `global_asm!` block too.
///
/// `isr_common_stub` pushes `gs, fs, es, ds` and *then* runs `pusha`, so
/// the lowest saved word (where the pointer handed to the common handler
/// points) is `edi`, not `ds`: `pusha`'s pushes land below the four
/// segment words on the stack, not above them.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub vector: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

pub const VECTOR_DIVIDE_ERROR: u8 = 0;
pub const VECTOR_PAGE_FAULT: u8 = 14;
pub const VECTOR_TIMER: u8 = pic::MASTER_OFFSET; // IRQ0 -> 32
pub const VECTOR_KEYBOARD: u8 = pic::MASTER_OFFSET + 1; // IRQ1 -> 33

/// CPU exception mnemonics for vectors 0-31, in the original's table order
/// (`original_source/kernel/src/system/isr.c`).
pub const EXCEPTION_MESSAGES: [&str; 32] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Into Detected Overflow",
    "Out of Bounds",
    "Invalid Opcode",
    "No Coprocessor",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Bad TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection Fault",
    "Page Fault",
    "Unknown Interrupt",
    "Coprocessor Fault",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
    "Virtualization Exception",
    "Control Protection Exception",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Hypervisor Injection Exception",
    "VMM Communication Exception",
    "Security Exception",
    "Reserved",
];

pub type Handler = fn(&mut Frame);

const NUM_VECTORS: usize = 256;
static mut HANDLERS: [Option<Handler>; NUM_VECTORS] = [None; NUM_VECTORS];

/// Install a handler for `vector`. Overwrites any previous registration.
pub fn install_handler(vector: u8, handler: Handler) {
    CriticalSection::with(|| {
        // SAFETY: HANDLERS is only ever touched inside a critical section.
        unsafe { HANDLERS[vector as usize] = Some(handler) };
    });
}

pub fn remove_handler(vector: u8) {
    CriticalSection::with(|| {
        unsafe { HANDLERS[vector as usize] = None };
    });
}

/// Register the handlers every boot needs regardless of which subsystems
/// get layered on afterward: the page-fault decoder and a default
/// unhandled-exception reporter for the other CPU traps.
pub fn install_defaults() {
    for vector in 0u8..32 {
        if vector != VECTOR_PAGE_FAULT {
            install_handler(vector, default_exception_handler);
        }
    }
    install_handler(VECTOR_PAGE_FAULT, page_fault_handler);
}

/// Entry point called by the assembly trampoline for every trap, with
/// `frame` pointing at the saved register state on the interrupt stack.
///
/// # Safety
/// Must only be called by the trampoline, exactly once per trap, with a
/// `frame` that points at a validly laid-out [`Frame`] on the current
/// stack.
#[no_mangle]
pub unsafe extern "C" fn irq_common_handler(frame: *mut Frame) {
    let frame = unsafe { &mut *frame };
    let vector = frame.vector as u8;

    // SAFETY: HANDLERS is read here outside an explicit CriticalSection,
    // but interrupts are already disabled by hardware for the duration of
    // an interrupt-gate handler, so this read cannot race a concurrent
    // install_handler/remove_handler.
    let handler = unsafe { HANDLERS[vector as usize] };
    if let Some(handler) = handler {
        handler(frame);
    }

    if vector >= pic::MASTER_OFFSET && vector < pic::MASTER_OFFSET + 16 {
        pic::send_eoi(vector - pic::MASTER_OFFSET);
    }
}

fn default_exception_handler(frame: &mut Frame) {
    let vector = frame.vector as usize;
    let message = EXCEPTION_MESSAGES.get(vector).copied().unwrap_or("Unknown Exception");
    log::error!(
        "unhandled exception {} ({}) at eip={:#x}, err_code={:#x}",
        vector,
        message,
        frame.eip,
        frame.err_code
    );
    crate::arch::x86::halt_fatal();
}

bitflags::bitflags! {
    /// Page-fault error-code bits (Intel SDM vol. 3, §4.7).
    pub struct PageFaultError: u32 {
        const PRESENT        = 1 << 0;
        const WRITE          = 1 << 1;
        const USER           = 1 << 2;
        const RESERVED_WRITE = 1 << 3;
        const INSTRUCTION    = 1 << 4;
    }
}

impl fmt::Display for PageFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = if self.contains(Self::PRESENT) { "protection" } else { "not-present" };
        let access = if self.contains(Self::WRITE) { "write" } else { "read" };
        let mode = if self.contains(Self::USER) { "user" } else { "supervisor" };
        write!(f, "{present} {access} in {mode} mode")
    }
}

/// Read `cr2`, the faulting linear address the CPU latches on a page
/// fault, matching `original_source/kernel/src/system/isr.c`'s
/// `page_fault_handler`.
fn read_cr2() -> u32 {
    let value: u32;
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

fn page_fault_handler(frame: &mut Frame) {
    let fault_addr = read_cr2();
    let error = PageFaultError::from_bits_truncate(frame.err_code);

    if error.contains(PageFaultError::USER) {
        log::warn!("user page fault: {error} at {fault_addr:#x}, eip={:#x}", frame.eip);
        crate::process::terminate_current(crate::error::KernelError::UnmappedPage {
            virt: fault_addr,
        });
        return;
    }

    log::error!("kernel page fault: {error} at {fault_addr:#x}, eip={:#x}", frame.eip);
    crate::arch::x86::halt_fatal();
}

/// Select the code/data segments every trap runs with while in the
/// kernel; used by the trampoline before dispatch (spec §3/§6).
pub const KERNEL_DATA_SELECTOR: u16 = SEL_KERNEL_DATA;
