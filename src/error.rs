//! Kernel-internal error type.
//!
//! Hardware-facing boundaries that the spec defines as sentinel-returning
//! (the frame allocator's null pointer, the syscall gate's error code) keep
//! those literal contracts — they are part of an ABI, not an internal call.
//! Everything else that crosses a module boundary inside the kernel returns
//! this instead of a bare `&'static str` or magic integer.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    OutOfMemory { requested: usize, available: usize },
    InvalidAddress { addr: u32 },
    UnmappedPage { virt: u32 },
    InvalidFrame { frame: u32 },
    DoubleFree { addr: u32 },
    HeapCorruption { addr: u32 },
    ProcessTableFull,
    ProcessNotFound { pid: u32 },
    ThreadStackExhausted,
    InvalidArgument { name: &'static str },
    NotInitialized { subsystem: &'static str },
    AlreadyInitialized { subsystem: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested, available } => {
                write!(f, "out of memory: requested {requested}, available {available}")
            }
            KernelError::InvalidAddress { addr } => write!(f, "invalid address {addr:#x}"),
            KernelError::UnmappedPage { virt } => write!(f, "page at {virt:#x} is not mapped"),
            KernelError::InvalidFrame { frame } => write!(f, "invalid frame {frame:#x}"),
            KernelError::DoubleFree { addr } => write!(f, "double free at {addr:#x}"),
            KernelError::HeapCorruption { addr } => write!(f, "heap corruption near {addr:#x}"),
            KernelError::ProcessTableFull => write!(f, "process table full"),
            KernelError::ProcessNotFound { pid } => write!(f, "process {pid} not found"),
            KernelError::ThreadStackExhausted => write!(f, "thread stack allocation failed"),
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            KernelError::NotInitialized { subsystem } => write!(f, "{subsystem} not initialized"),
            KernelError::AlreadyInitialized { subsystem } => {
                write!(f, "{subsystem} already initialized")
            }
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
