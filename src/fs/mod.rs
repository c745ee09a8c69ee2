//! Filesystem boundary.
//!
//! A concrete on-disk filesystem and the interactive shell it would back
//! (`original_source/kernel/src/filesystem/fsmngr.c`, `kernel/src/
//! kshell.c`) are explicit Non-goals of this kernel's core; what is kept
//! is the minimal trait boundary a future filesystem driver would satisfy
//! to expose files to user processes through the syscall layer.

pub trait FileSystem {
    type Handle;

    fn open(&mut self, path: &str) -> Result<Self::Handle, &'static str>;
    fn read(&mut self, handle: &mut Self::Handle, buf: &mut [u8]) -> Result<usize, &'static str>;
    fn close(&mut self, handle: Self::Handle);
}
