//! 32-bit x86 architecture support: GDT/TSS, IDT, the PIC and PIT drivers,
//! port I/O, and the VGA text console.
//!
//! The teacher (`arch/x86_64/`) assumes a 64-bit target throughout its
//! `x86_64` crate dependency; none of that crate's types (64-bit GDT/IDT
//! entries, `x86-interrupt` ABI) apply to a 32-bit protected-mode kernel,
//! so every primitive in this tree is hand-written against the 32-bit
//! hardware layout instead, following the same module split the teacher
//! uses (`gdt`, `idt`, one file per driver).

pub mod gdt;
pub mod idt;
pub mod irq_flags;
pub mod multiboot;
pub mod pic;
pub mod pit;
pub mod port;
pub mod stubs;
pub mod tss;
pub mod vga;

use crate::config::PIT_HZ;
use crate::irq;

/// Canonical boot sequence (spec §9 decision): GDT before IDT, because the
/// IDT's gate selectors reference the code segment the GDT defines; PIC
/// remap before any gate install, so a spurious IRQ during setup cannot
/// collide with an exception vector; interrupts stay masked until the
/// caller explicitly enables them after the scheduler's first process is
/// ready to run.
pub fn init() {
    gdt::init();
    idt::load_gates();
    idt::load();
    pic::remap(pic::MASTER_OFFSET, pic::SLAVE_OFFSET);
    pit::init(PIT_HZ);
    irq::install_defaults();
}

pub fn halt() -> ! {
    loop {
        irq_flags::halt();
    }
}

/// Disable interrupts and spin forever. Used by the panic handler and by
/// unrecoverable kernel errors (spec §7): there is nothing left to
/// schedule, so resuming interrupts could only let a handler run against
/// state already known bad.
pub fn halt_fatal() -> ! {
    irq_flags::disable();
    halt()
}

pub fn idle() {
    irq_flags::enable();
    irq_flags::halt();
}
