//! Thread spawn configuration.

use super::handle::JoinHandle;
use crate::arch::Arch;
use crate::errors::ThreadResult;
use crate::thread::PRI_DEFAULT;

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;

/// Builder for configuring a new thread before spawning it.
///
/// Mirrors the reference kernel's `thread_create(name, priority, function,
/// aux)`, split into a builder so name/priority/nice can be set
/// independently of the entry point.
pub struct ThreadBuilder {
    priority: u8,
    nice: i32,
    name: Option<String>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            priority: PRI_DEFAULT,
            nice: 0,
            name: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn nice(mut self, nice: i32) -> Self {
        self.nice = nice;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn the thread, handing `entry` to the global scheduler.
    pub fn spawn<A, F>(self, entry: F) -> ThreadResult<JoinHandle<A>>
    where
        A: Arch + 'static,
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| String::from("thread"));
        crate::sched::create::<A>(name, self.priority, self.nice, Box::new(entry))
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
