use crate::ir::{BlockId, Statement, Terminator};
use std::sync::atomic::{AtomicU64, Ordering};

/// Straight-line statements followed by exactly one terminator.
#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: Option<String>,
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
    pub profile: BranchProfile,
}

impl BasicBlock {
    pub fn new(id: BlockId, statements: Vec<Statement>, terminator: Terminator) -> Self {
        let profile = if terminator.needs_branch_profiling() {
            BranchProfile::new(terminator.successor_count())
        } else {
            BranchProfile::disabled()
        };
        Self {
            id,
            name: None,
            statements,
            terminator,
            profile,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}({})", self.id, name),
            None => self.id.to_string(),
        }
    }
}

/// Per-successor execution counters of a block.
///
/// The counters are advisory. Concurrent activations update them without
/// synchronization, using a relaxed load followed by a relaxed store, so an
/// increment may be lost but a counter never goes backwards or tears.
#[derive(Debug, Default)]
pub struct BranchProfile {
    counts: Box<[AtomicU64]>,
}

impl BranchProfile {
    pub fn new(successors: usize) -> Self {
        Self {
            counts: (0..successors).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// A profile that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.counts.is_empty()
    }

    pub fn record(&self, successor_index: usize) {
        if let Some(counter) = self.counts.get(successor_index) {
            let count = counter.load(Ordering::Relaxed);
            counter.store(count.saturating_add(1), Ordering::Relaxed);
        }
    }

    pub fn count(&self, successor_index: usize) -> u64 {
        self.counts
            .get(successor_index)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Fraction of recorded executions that took `successor_index`.
    ///
    /// Each counter is read once, so the result stays within `[0, 1]` even
    /// while other threads keep recording.
    pub fn probability(&self, successor_index: usize) -> f64 {
        let mut taken = 0u64;
        let mut total = 0u64;
        for (index, counter) in self.counts.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if index == successor_index {
                taken = count;
            }
            total = total.saturating_add(count);
        }
        if taken == 0 {
            0.0
        } else {
            taken as f64 / total as f64
        }
    }
}
