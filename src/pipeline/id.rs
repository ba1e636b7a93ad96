//! Identity types for fragments, tasks and partitions.
//!
//! Fragment ids come from the physical planner. Task ids are derived: a task
//! is the `partition`-th instance of its fragment.

use std::fmt;

/// Identifier of a fragment in the physical plan.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FragmentId(pub u64);

impl fmt::Debug for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentId({})", self.0)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Identifier of one task instance: fragment plus partition index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub fragment: FragmentId,
    pub partition: u32,
}

impl TaskId {
    pub const fn new(fragment: FragmentId, partition: u32) -> Self {
        Self {
            fragment,
            partition,
        }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskId(fragment={}, partition={})",
            self.fragment.0, self.partition
        )
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.fragment, self.partition)
    }
}

/// Which slice of a fragment's input a task instance covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Partition {
    pub index: u32,
    pub count: u32,
}

impl Partition {
    /// The only partition of a serial fragment.
    pub const SINGLE: Partition = Partition { index: 0, count: 1 };

    pub fn new(index: u32, count: u32) -> Self {
        debug_assert!(index < count, "partition {index} out of {count}");
        Self { index, count }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn count(self) -> usize {
        self.count as usize
    }
}
