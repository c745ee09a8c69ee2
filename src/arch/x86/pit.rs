//! Programmable Interval Timer, channel 0, driving the scheduler tick.
//!
//! Spec §4.4/§6 call for a nominal 100Hz preemption tick. The PIT's base
//! oscillator runs at 1193182Hz, so the programmed reload value is that
//! frequency divided by the target rate.

use crate::arch::x86::port::outb;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;
const BASE_FREQUENCY: u32 = 1_193_182;

/// Select channel 0, access mode lobyte/hibyte, mode 3 (square wave).
const COMMAND_CHANNEL0_MODE3: u8 = 0b0011_0110;

/// Program channel 0 to fire at approximately `hz`.
pub fn init(hz: u32) {
    let divisor = (BASE_FREQUENCY / hz) as u16;
    unsafe {
        outb(COMMAND, COMMAND_CHANNEL0_MODE3);
        outb(CHANNEL0_DATA, (divisor & 0xFF) as u8);
        outb(CHANNEL0_DATA, (divisor >> 8) as u8);
    }
}
