//! Kernel configuration constants
//!
//! Tunable parameters for the kernel. Every table in the kernel is
//! statically sized; the capacities below are the only knobs.

#![allow(dead_code)]

/// Thread slots in the scheduler table. Slot count bounds round-robin
/// starvation (see threading).
pub const MAX_THREADS: usize = 16;

/// Per-thread stack size in bytes.
///
/// Stacks are static and never grow; deep call chains in thread entry
/// functions must fit here.
pub const THREAD_STACK_SIZE: usize = 4096;

/// Maximum thread name length in bytes (diagnostic label shown by `ps`).
pub const THREAD_NAME_LEN: usize = 15;

/// File slots in the in-memory filesystem.
pub const FS_MAX_FILES: usize = 16;

/// Maximum file name length in bytes.
pub const FS_NAME_LEN: usize = 16;

/// Maximum file data length in bytes.
pub const FS_DATA_LEN: usize = 256;

/// Program slots in the script store.
pub const PROG_MAX: usize = 8;

/// Maximum program name length in bytes.
pub const PROG_NAME_LEN: usize = 16;

/// Maximum script length in bytes.
pub const PROG_SCRIPT_LEN: usize = 256;

/// Shell input line capacity in bytes; longer lines are truncated.
pub const SHELL_LINE_LEN: usize = 80;

/// Console transcript ring capacity in bytes (diagnostics and self-tests).
pub const CONSOLE_RING_SIZE: usize = 2048;

/// Upper bound on scheduler ticks a single self-test scenario may consume
/// before it is declared hung.
pub const SELFTEST_TICK_LIMIT: u64 = 100_000;
