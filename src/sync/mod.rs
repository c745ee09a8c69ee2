//! Interrupt-masking critical sections.
//!
//! Spec §5 states there is no lock primitive in this kernel: mutual
//! exclusion over the bitmap, the PCB ring, the heap, and the page tables
//! is achieved purely by disabling interrupts for the duration of the
//! access. `CriticalSection::enter` is that discipline made explicit: it
//! is the one place `cli`/`popf` are paired, and every module that touches
//! shared mutable kernel state does so through it rather than reaching for
//! `cli`/`sti` directly.

use crate::arch::x86::irq_flags;

/// RAII guard that disables interrupts on construction and restores the
/// prior interrupt-enable state on drop.
///
/// This is the "raw-interior-mutability wrapper" spec.md §9 calls for: it
/// does not prevent two different critical sections from touching the same
/// singleton from unrelated call sites, but it does guarantee that for the
/// lifetime of the guard no interrupt handler can reenter and observe a
/// partially-updated bitmap, PCB ring, or heap.
pub struct CriticalSection {
    was_enabled: bool,
}

impl CriticalSection {
    /// Disable interrupts and remember whether they were previously enabled.
    #[inline]
    pub fn enter() -> Self {
        let was_enabled = irq_flags::interrupts_enabled();
        irq_flags::disable();
        Self { was_enabled }
    }

    /// Run `f` with interrupts disabled, restoring the prior state on return.
    #[inline]
    pub fn with<R>(f: impl FnOnce() -> R) -> R {
        let _guard = Self::enter();
        f()
    }
}

impl Drop for CriticalSection {
    #[inline]
    fn drop(&mut self) {
        if self.was_enabled {
            irq_flags::enable();
        }
    }
}
