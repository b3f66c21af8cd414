//! Natural loop discovery.
//!
//! A depth-first walk from the entry block finds back-edges: edges into a
//! block that is still on the walk's stack. That block is the loop header.
//! The loop body is the header plus every block that reaches a back-edge
//! source without going through the header. Back-edges sharing a header form
//! one loop.
//!
//! If the body walk reaches the entry block, the header does not dominate the
//! cycle (it can be entered from elsewhere). Such irreducible cycles get no
//! loop and stay in the enclosing dispatch level.

use crate::analysis::{BitSet, Cfg};
use crate::ir::BlockId;
use smallvec::SmallVec;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NaturalLoop {
    pub(crate) header: BlockId,
    pub(crate) body: BitSet,
    /// Blocks outside the body with a predecessor inside it, sorted.
    pub(crate) exits: SmallVec<[BlockId; 4]>,
    /// Index of the smallest loop strictly containing this one.
    pub(crate) parent: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LoopForest {
    pub(crate) loops: Vec<NaturalLoop>,
    innermost: Vec<Option<usize>>,
}

impl LoopForest {
    /// A forest with no loops, used when loop regions are disabled.
    pub(crate) fn flat(block_count: usize) -> Self {
        Self {
            loops: Vec::new(),
            innermost: vec![None; block_count],
        }
    }

    /// Index of the innermost loop containing `block`.
    pub(crate) fn innermost(&self, block: BlockId) -> Option<usize> {
        self.innermost.get(block).copied().flatten()
    }

    /// Loops whose parent is `parent`; `None` yields the outermost loops.
    pub(crate) fn children(&self, parent: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        self.loops
            .iter()
            .enumerate()
            .filter(move |(_, natural)| natural.parent == parent)
            .map(|(index, _)| index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Back-edge sources, grouped by header.
fn find_back_edges(cfg: &Cfg) -> Vec<Vec<BlockId>> {
    let n = cfg.len();
    let mut back_edges = vec![Vec::new(); n];
    let mut state = vec![Visit::New; n];
    let mut stack: Vec<(BlockId, usize)> = Vec::new();
    if cfg.entry < n {
        state[cfg.entry] = Visit::Active;
        stack.push((cfg.entry, 0));
    }

    while let Some(top) = stack.last_mut() {
        let (node, cursor) = *top;
        top.1 += 1;
        match cfg.succs[node].get(cursor) {
            Some(&succ) if succ < n => match state[succ] {
                Visit::New => {
                    state[succ] = Visit::Active;
                    stack.push((succ, 0));
                }
                Visit::Active => back_edges[succ].push(node),
                Visit::Done => {}
            },
            Some(_) => {}
            None => {
                state[node] = Visit::Done;
                stack.pop();
            }
        }
    }
    back_edges
}

/// Collects the body of the loop closed by `sources`, or `None` if irreducible.
fn collect_body(cfg: &Cfg, header: BlockId, sources: &[BlockId]) -> Option<BitSet> {
    let mut body = BitSet::new_empty(cfg.len());
    body.set(header);
    let mut work = sources.to_vec();
    while let Some(block) = work.pop() {
        if body.get(block) {
            continue;
        }
        if block == cfg.entry {
            return None;
        }
        body.set(block);
        work.extend(cfg.reachable_preds(block));
    }
    Some(body)
}

pub(crate) fn find_loops(cfg: &Cfg) -> LoopForest {
    let n = cfg.len();
    let mut loops = Vec::new();

    for (header, sources) in find_back_edges(cfg).into_iter().enumerate() {
        if sources.is_empty() {
            continue;
        }
        let Some(body) = collect_body(cfg, header, &sources) else {
            debug!("Cycle through block {} is irreducible, leaving it flat", header);
            continue;
        };
        let mut exits: SmallVec<[BlockId; 4]> = body
            .iter()
            .flat_map(|block| cfg.succs[block].iter().copied())
            .filter(|succ| !body.get(*succ))
            .collect();
        exits.sort_unstable();
        exits.dedup();
        debug!(
            "Loop at header {}: {} block(s), exits {:?}",
            header,
            body.count(),
            exits
        );
        loops.push(NaturalLoop {
            header,
            body,
            exits,
            parent: None,
        });
    }

    // Natural loops with distinct headers are either disjoint or nested.
    for index in 0..loops.len() {
        loops[index].parent = (0..loops.len())
            .filter(|&other| other != index && loops[index].body.is_subset(&loops[other].body))
            .min_by_key(|&other| loops[other].body.count());
    }

    let innermost = (0..n)
        .map(|block| {
            (0..loops.len())
                .filter(|&index| loops[index].body.get(block))
                .min_by_key(|&index| loops[index].body.count())
        })
        .collect();

    LoopForest { loops, innermost }
}
