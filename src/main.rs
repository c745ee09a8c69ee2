//! Binary entry point: the multiboot header and the assembly trampoline
//! that sets up a boot stack and jumps into [`sos_kernel::kernel_main`].

#![no_std]
#![no_main]

use sos_kernel::arch::x86::multiboot::MultibootInfo;

const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
const MULTIBOOT_FLAGS: u32 = 0x0000_0003; // align modules, request memory info
const MULTIBOOT_CHECKSUM: u32 = 0u32.wrapping_sub(MULTIBOOT_MAGIC + MULTIBOOT_FLAGS);

const BOOT_STACK_SIZE: usize = 16 * 1024;

#[repr(align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

core::arch::global_asm!(
    r#"
.section .multiboot
.align 4
.long {magic}
.long {flags}
.long {checksum}

.section .text
.global _start
.code32
_start:
    mov esp, offset {stack} + {stack_size}
    push ebx
    call {kernel_main}
.hang:
    hlt
    jmp .hang
"#,
    magic = const MULTIBOOT_MAGIC,
    flags = const MULTIBOOT_FLAGS,
    checksum = const MULTIBOOT_CHECKSUM,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
    kernel_main = sym kernel_entry,
);

extern "C" fn kernel_entry(multiboot_info: *const MultibootInfo) -> ! {
    // SAFETY: this is the one call to `kernel_main`, made from the
    // trampoline above with the pointer the bootloader passed in `ebx`.
    unsafe { sos_kernel::kernel_main(multiboot_info) }
}
