//! Ahead-of-time analyses run once when a function is built.
//!
//! Nothing here runs during dispatch. The results are frozen into the
//! [`crate::ir::FunctionBody`] as nuller tables and nested dispatch tables.

mod bitset;
mod dataflow;
mod liveness;
mod loops;

pub(crate) use bitset::BitSet;
pub(crate) use liveness::{compute_liveness, compute_nullers};
pub(crate) use loops::{LoopForest, find_loops};

use crate::ir::{BasicBlock, BlockId};
use smallvec::SmallVec;

/// Successor and predecessor lists of a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Cfg {
    pub(crate) entry: BlockId,
    pub(crate) succs: Vec<SmallVec<[BlockId; 4]>>,
    pub(crate) preds: Vec<Vec<BlockId>>,
    /// Blocks reachable from the entry block.
    pub(crate) reachable: Vec<bool>,
}

impl Cfg {
    /// Builds the graph. Successors must already be validated to be in range.
    pub(crate) fn new(blocks: &[BasicBlock], entry: BlockId) -> Self {
        let n = blocks.len();
        let mut succs: Vec<SmallVec<[BlockId; 4]>> = Vec::with_capacity(n);
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for (id, block) in blocks.iter().enumerate() {
            let mut targets = block.terminator.successors();
            // A switch may route several cases to the same block.
            targets.sort_unstable();
            targets.dedup();
            for &succ in &targets {
                if succ < n {
                    preds[succ].push(id);
                }
            }
            succs.push(targets);
        }

        let mut reachable = vec![false; n];
        let mut stack = Vec::new();
        if entry < n {
            reachable[entry] = true;
            stack.push(entry);
        }
        while let Some(b) = stack.pop() {
            for &succ in &succs[b] {
                if succ < n && !reachable[succ] {
                    reachable[succ] = true;
                    stack.push(succ);
                }
            }
        }

        Self {
            entry,
            succs,
            preds,
            reachable,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.succs.len()
    }

    pub(crate) fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.get(block).copied().unwrap_or(false)
    }

    /// Reachable predecessors of `block`.
    pub(crate) fn reachable_preds(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.preds
            .get(block)
            .into_iter()
            .flatten()
            .copied()
            .filter(|pred| self.is_reachable(*pred))
    }
}
