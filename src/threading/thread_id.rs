//! Logical thread identifiers and task traits.

use std::fmt;

/// A named execution context that work can be scheduled onto.
///
/// Callers post to a `ThreadId` without knowing whether it is backed by a
/// dedicated OS thread or something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThreadId {
    /// Owns all host state.
    Ui,
    /// Channel I/O and launch completion.
    Io,
}

impl ThreadId {
    /// Number of logical threads.
    pub const COUNT: usize = 2;

    /// Every logical thread, in index order.
    pub const ALL: [ThreadId; ThreadId::COUNT] = [ThreadId::Ui, ThreadId::Io];

    /// Slot index used by the registry and executor tables.
    pub fn index(self) -> usize {
        match self {
            ThreadId::Ui => 0,
            ThreadId::Io => 1,
        }
    }

    /// Name given to the backing OS thread.
    pub fn name(self) -> &'static str {
        match self {
            ThreadId::Ui => "Host_UIThread",
            ThreadId::Io => "Host_IOThread",
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where and how a posted task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTraits {
    pub thread: ThreadId,
    /// Nestable tasks may run inside a nested run loop; non-nestable ones
    /// wait for the outermost loop.
    pub nestable: bool,
}

impl TaskTraits {
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            nestable: true,
        }
    }

    pub fn ui() -> Self {
        Self::new(ThreadId::Ui)
    }

    pub fn io() -> Self {
        Self::new(ThreadId::Io)
    }

    pub fn non_nestable(mut self) -> Self {
        self.nestable = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_indices_are_dense() {
        for (i, id) in ThreadId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_thread_names() {
        assert_eq!(ThreadId::Ui.name(), "Host_UIThread");
        assert_eq!(ThreadId::Io.to_string(), "Host_IOThread");
    }

    #[test]
    fn test_task_traits_default_nestable() {
        let traits = TaskTraits::io();
        assert_eq!(traits.thread, ThreadId::Io);
        assert!(traits.nestable);
        assert!(!traits.non_nestable().nestable);
    }
}
