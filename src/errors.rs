//! Error types for the scheduling and synchronization core.
//!
//! Per the error handling design, almost every misuse here (releasing a
//! lock you don't hold, blocking from interrupt context, a stack-overflow
//! canary mismatch) is a programming error and is reported as a fatal
//! assertion, not a `Result`. The `Result`-returning surface is
//! deliberately small: thread creation under memory pressure, and the
//! `try_*` non-blocking variants of the synchronization primitives.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for operations that can fail without it being a
/// programming error (resource exhaustion, polling "would block").
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Top-level error type for the scheduling core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread creation errors.
    Spawn(SpawnError),
    /// Scheduling errors.
    Schedule(ScheduleError),
    /// Memory allocation errors.
    Memory(MemoryError),
}

/// Errors that can occur during thread creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The scheduler has not been initialized yet.
    NotInitialized,
    /// The page allocator could not supply a zero-filled page for the new
    /// thread's control block and stack. Corresponds to the spec's
    /// `TID_ERROR` sentinel.
    OutOfMemory,
    /// `base_priority` was outside `[PRI_MIN, PRI_MAX]`.
    InvalidPriority(u8),
}

/// Errors related to scheduling operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The scheduler has not been started (no thread is current).
    NotStarted,
    /// The scheduler was asked to start twice.
    AlreadyStarted,
}

/// Memory-related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The page allocator is out of pages.
    OutOfMemory,
    /// A thread control block's stack-overflow canary did not match.
    StackOverflow,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Spawn(e) => write!(f, "thread spawn error: {}", e),
            ThreadError::Schedule(e) => write!(f, "scheduling error: {}", e),
            ThreadError::Memory(e) => write!(f, "memory error: {}", e),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "scheduler not initialized"),
            SpawnError::OutOfMemory => write!(f, "out of memory for thread creation"),
            SpawnError::InvalidPriority(p) => write!(f, "invalid priority: {}", p),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::NotStarted => write!(f, "scheduler has not been started"),
            ScheduleError::AlreadyStarted => write!(f, "scheduler already started"),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfMemory => write!(f, "out of memory"),
            MemoryError::StackOverflow => write!(f, "stack overflow detected"),
        }
    }
}

impl From<SpawnError> for ThreadError {
    fn from(error: SpawnError) -> Self {
        ThreadError::Spawn(error)
    }
}

impl From<ScheduleError> for ThreadError {
    fn from(error: ScheduleError) -> Self {
        ThreadError::Schedule(error)
    }
}

impl From<MemoryError> for ThreadError {
    fn from(error: MemoryError) -> Self {
        ThreadError::Memory(error)
    }
}
