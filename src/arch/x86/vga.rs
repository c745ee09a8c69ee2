//! VGA text-mode console, the boot-time diagnostic output channel.
//!
//! Spec §7 only requires that kernel log output reach *some* visible sink;
//! the 80x25 text-mode buffer at `0xB8000` is the standard choice for a
//! kernel with no other display driver up yet, the same role the
//! teacher's `uart_16550` serial port plays before its framebuffer console
//! is available (`print.rs`). Scrolling is a flat memmove of the buffer,
//! matching the simple approach the original shell/kernel output uses.

use core::fmt;

use spin::Mutex;

const VGA_WIDTH: usize = 80;
const VGA_HEIGHT: usize = 25;
const VGA_BUFFER: *mut u16 = 0xB8000 as *mut u16;

const DEFAULT_COLOR: u8 = 0x07; // light grey on black

struct Console {
    row: usize,
    col: usize,
    color: u8,
}

impl Console {
    const fn new() -> Self {
        Self { row: 0, col: 0, color: DEFAULT_COLOR }
    }

    fn putchar(&mut self, c: u8) {
        match c {
            b'\n' => self.newline(),
            b'\r' => self.col = 0,
            _ => {
                if self.col >= VGA_WIDTH {
                    self.newline();
                }
                let entry = (self.color as u16) << 8 | c as u16;
                let offset = self.row * VGA_WIDTH + self.col;
                // SAFETY: offset is bounded by VGA_WIDTH/VGA_HEIGHT above,
                // and VGA_BUFFER is a fixed, always-mapped hardware address
                // in the identity-mapped low-memory range.
                unsafe { VGA_BUFFER.add(offset).write_volatile(entry) };
                self.col += 1;
            }
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 >= VGA_HEIGHT {
            self.scroll();
        } else {
            self.row += 1;
        }
    }

    fn scroll(&mut self) {
        for row in 1..VGA_HEIGHT {
            for col in 0..VGA_WIDTH {
                // SAFETY: both offsets are within the buffer by construction.
                unsafe {
                    let entry = VGA_BUFFER.add(row * VGA_WIDTH + col).read_volatile();
                    VGA_BUFFER.add((row - 1) * VGA_WIDTH + col).write_volatile(entry);
                }
            }
        }
        let blank = (self.color as u16) << 8;
        for col in 0..VGA_WIDTH {
            unsafe { VGA_BUFFER.add((VGA_HEIGHT - 1) * VGA_WIDTH + col).write_volatile(blank) };
        }
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.putchar(byte);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    crate::sync::CriticalSection::with(|| {
        let _ = CONSOLE.lock().write_fmt(args);
    });
}

/// Set the VGA text attribute byte (low nibble foreground, high nibble
/// background) applied to every character written from now on. Spec §6's
/// console contract pairs this with `putchar` as the two operations a
/// producer needs.
pub fn set_color(attribute: u8) {
    CONSOLE.lock().color = attribute;
}
