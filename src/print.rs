//! Boot-time and panic-path console macros.
//!
//! These stay independent of the `log` facade (installed by `kernel_main`
//! before anything else runs) because the VGA console itself needs no
//! initialization call, so `print!`/`println!` work even earlier than
//! logging does, and still work from the panic handler when nothing else
//! can be assumed to be alive.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::arch::x86::vga::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
