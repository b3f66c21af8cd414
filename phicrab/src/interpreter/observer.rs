use crate::ir::{BlockId, RegisterId};
use crate::memory::NullPoint;
use std::fmt;

/// Hooks for a hosting engine that wants to watch dispatch.
///
/// Every method defaults to a no-op. Observers are shared by all activations
/// of a function, possibly on different threads, and must not influence the
/// outcome of a run.
pub trait DispatchObserver: fmt::Debug + Send + Sync {
    /// A block is about to execute its statements.
    fn block_entered(&self, _function: &str, _block: BlockId) {}

    /// The phi group of the edge `from -> to` was written.
    fn phis_resolved(&self, _function: &str, _from: BlockId, _to: BlockId, _moves: usize) {}

    /// The nuller entry of `block` at `point` ran.
    fn registers_nulled(
        &self,
        _function: &str,
        _point: NullPoint,
        _block: BlockId,
        _registers: &[RegisterId],
    ) {
    }

    /// A dispatch level finished with `count` back-edges.
    ///
    /// `header` is `None` for the function's outermost level. Counts are
    /// advisory and only reported when back-edge counting is enabled.
    fn loop_count(&self, _function: &str, _header: Option<BlockId>, _count: u64) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}
