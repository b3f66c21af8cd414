//! Backwards liveness analysis over virtual registers.
//!
//! Phi moves belong to the edge that carries them, not to a block. A move's
//! source is live at the end of its predecessor only along that edge, and its
//! destination is killed only along that edge. Function parameters are
//! definitions of the entry block.

use crate::analysis::{BitSet, Cfg, dataflow};
use crate::ir::{BasicBlock, BlockId, RegisterId};
use crate::memory::NullerTable;
use smallvec::SmallVec;
use tracing::trace;

/// Registers read and written by the phi group of one successor edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EdgePhis {
    pub(crate) target: BlockId,
    pub(crate) uses: BitSet,
    pub(crate) dests: BitSet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Liveness {
    /// Upward-exposed reads of statements and the terminator.
    pub(crate) use_sets: Vec<BitSet>,
    /// Writes of statements and the terminator, plus parameters at the entry.
    pub(crate) def_sets: Vec<BitSet>,
    /// One entry per successor index of each terminator.
    pub(crate) edges: Vec<Vec<EdgePhis>>,
    pub(crate) live_in: Vec<BitSet>,
    /// Live once the terminator resolved, before any phi move runs.
    pub(crate) live_out: Vec<BitSet>,
}

fn compute_use_def(
    reg_count: usize,
    blocks: &[BasicBlock],
    entry: usize,
    params: &[RegisterId],
) -> (Vec<BitSet>, Vec<BitSet>) {
    let mut use_sets = Vec::with_capacity(blocks.len());
    let mut def_sets = Vec::with_capacity(blocks.len());

    for (id, block) in blocks.iter().enumerate() {
        let mut use_set = BitSet::new_empty(reg_count);
        let mut def_set = BitSet::new_empty(reg_count);
        let mut read = |reg: RegisterId, def_set: &BitSet| {
            if !def_set.get(reg) {
                use_set.set(reg);
            }
        };

        if id == entry {
            for &param in params {
                def_set.set(param);
            }
        }
        for statement in &block.statements {
            for reg in statement.instruction.uses() {
                read(reg, &def_set);
            }
            if let Some(dest) = statement.dest {
                def_set.set(dest);
            }
        }

        let terminator = &block.terminator;
        for reg in terminator.uses() {
            read(reg, &def_set);
        }
        if let Some(dest) = terminator.defs() {
            def_set.set(dest);
        }

        use_sets.push(use_set);
        def_sets.push(def_set);
    }

    (use_sets, def_sets)
}

fn compute_edges(reg_count: usize, blocks: &[BasicBlock]) -> Vec<Vec<EdgePhis>> {
    blocks
        .iter()
        .map(|block| {
            let terminator = &block.terminator;
            (0..terminator.successor_count())
                .filter_map(|index| {
                    let target = terminator.successor(index)?;
                    let mut uses = BitSet::new_empty(reg_count);
                    let mut dests = BitSet::new_empty(reg_count);
                    if let Some(group) = terminator.phi_group(index) {
                        group.uses().for_each(|reg| uses.set(reg));
                        group.dests().for_each(|reg| dests.set(reg));
                    }
                    Some(EdgePhis {
                        target,
                        uses,
                        dests,
                    })
                })
                .collect()
        })
        .collect()
}

pub(crate) fn compute_liveness(
    reg_count: usize,
    blocks: &[BasicBlock],
    cfg: &Cfg,
    params: &[RegisterId],
) -> Liveness {
    let (use_sets, def_sets) = compute_use_def(reg_count, blocks, cfg.entry, params);
    let edges = compute_edges(reg_count, blocks);

    let bottom = BitSet::new_empty(reg_count);
    let (live_in, live_out) = dataflow::solve_backward(
        cfg,
        bottom,
        |acc, block, succ, succ_in| {
            // Several successor indices may share a target, each with its own group.
            for edge in edges[block].iter().filter(|edge| edge.target == succ) {
                // OUT_e = (IN[succ] \ DESTS_e) ∪ USES_e
                let mut tmp = succ_in.clone();
                tmp.subtract_with(&edge.dests);
                tmp.union_with(&edge.uses);
                acc.union_with(&tmp);
            }
        },
        |b, out_state| {
            // IN = USE ∪ (OUT \ DEF)
            let mut in_set = use_sets[b].clone();
            let mut tmp = out_state.clone();
            tmp.subtract_with(&def_sets[b]);
            in_set.union_with(&tmp);
            in_set
        },
    );

    Liveness {
        use_sets,
        def_sets,
        edges,
        live_in,
        live_out,
    }
}

/// Derives the per-block nuller table from a liveness result.
///
/// The `After` point runs once the phi moves are done, so what survives it is
/// whatever some successor needs on entry. `after[b]` holds the registers `b`
/// touches, phi moves included, that no successor needs. `before[s]` holds the
/// registers some predecessor of `s` may carry out that `s` no longer needs.
pub(crate) fn compute_nullers(liveness: &Liveness, cfg: &Cfg, reg_count: usize) -> NullerTable {
    let n = cfg.len();
    let mut before: Vec<SmallVec<[RegisterId; 4]>> = vec![SmallVec::new(); n];
    let mut after: Vec<SmallVec<[RegisterId; 4]>> = vec![SmallVec::new(); n];

    let carried_out: Vec<BitSet> = (0..n)
        .map(|b| {
            let mut carried = BitSet::new_empty(reg_count);
            for &succ in cfg.succs[b].iter().filter(|s| cfg.is_reachable(**s)) {
                carried.union_with(&liveness.live_in[succ]);
            }
            carried
        })
        .collect();

    for b in (0..n).filter(|b| cfg.is_reachable(*b)) {
        let mut dead = liveness.use_sets[b].clone();
        dead.union_with(&liveness.def_sets[b]);
        for edge in &liveness.edges[b] {
            dead.union_with(&edge.uses);
            dead.union_with(&edge.dests);
        }
        dead.subtract_with(&carried_out[b]);
        after[b] = dead.iter().collect();

        let mut carried = BitSet::new_empty(reg_count);
        for pred in cfg.reachable_preds(b) {
            carried.union_with(&carried_out[pred]);
        }
        carried.subtract_with(&liveness.live_in[b]);
        before[b] = carried.iter().collect();

        trace!("Block {}: before {:?}, after {:?}", b, before[b], after[b]);
    }

    NullerTable::from_parts(before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, PhiGroup, Statement, Terminator};
    use crate::ops::{BinOp, Binary, CmpOp, Compare, Use};
    use crate::value::Value;

    fn set(regs: &[RegisterId]) -> SmallVec<[RegisterId; 4]> {
        regs.iter().copied().collect()
    }

    #[test]
    fn test_straight_line() {
        let blocks = vec![
            BasicBlock::new(
                0,
                vec![
                    Statement::new(Some(0), Use(Operand::Const(Value::I32(1)))),
                    Statement::new(
                        Some(1),
                        Binary::new(BinOp::Add, Operand::Reg(0), Value::I32(1)),
                    ),
                ],
                Terminator::branch(1),
            ),
            BasicBlock::new(1, vec![], Terminator::ret_value(Operand::Reg(1))),
        ];
        let cfg = Cfg::new(&blocks, 0);
        let liveness = compute_liveness(2, &blocks, &cfg, &[]);
        assert_eq!(liveness.live_out[0].iter().collect::<Vec<_>>(), vec![1]);
        assert!(liveness.live_in[0].is_empty());

        let nullers = compute_nullers(&liveness, &cfg, 2);
        assert_eq!(nullers.after(0), set(&[0]).as_slice());
        assert_eq!(nullers.after(1), set(&[1]).as_slice());
        assert!(nullers.before(1).is_empty());
    }

    /// r0 = n (param), r1 = i, r2 = i < n, r3 = i + 1.
    fn counting_loop() -> Vec<BasicBlock> {
        let mut entry = Terminator::branch(1);
        *entry.phi_slot_mut(0).unwrap() =
            Some(PhiGroup::new().with(1, Operand::Const(Value::I64(0))));
        let mut latch = Terminator::branch(1);
        *latch.phi_slot_mut(0).unwrap() = Some(PhiGroup::new().with(1, Operand::Reg(3)));
        vec![
            BasicBlock::new(0, vec![], entry),
            BasicBlock::new(
                1,
                vec![Statement::new(
                    Some(2),
                    Compare::new(CmpOp::Lt, Operand::Reg(1), Operand::Reg(0)),
                )],
                Terminator::cond_branch(Operand::Reg(2), 2, 3),
            ),
            BasicBlock::new(
                2,
                vec![Statement::new(
                    Some(3),
                    Binary::new(BinOp::Add, Operand::Reg(1), Value::I64(1)),
                )],
                latch,
            ),
            BasicBlock::new(3, vec![], Terminator::ret_value(Operand::Reg(1))),
        ]
    }

    #[test]
    fn test_loop_liveness() {
        let blocks = counting_loop();
        let cfg = Cfg::new(&blocks, 0);
        let liveness = compute_liveness(4, &blocks, &cfg, &[0]);

        // The phi move lives on the latch edge, not in the latch's own sets.
        assert!(!liveness.use_sets[2].get(3));
        assert!(!liveness.def_sets[2].get(1));
        assert!(liveness.edges[2][0].dests.get(1));
        assert!(liveness.edges[2][0].uses.get(3));
        assert!(liveness.def_sets[0].get(0));
        assert_eq!(liveness.live_out[2].iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(liveness.live_in[1].iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(liveness.live_in[2].iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(liveness.live_in[0].is_empty());
    }

    #[test]
    fn test_loop_nullers() {
        let blocks = counting_loop();
        let cfg = Cfg::new(&blocks, 0);
        let liveness = compute_liveness(4, &blocks, &cfg, &[0]);
        let nullers = compute_nullers(&liveness, &cfg, 4);

        assert!(nullers.after(0).is_empty());
        assert_eq!(nullers.after(1), set(&[2]).as_slice());
        assert_eq!(nullers.after(2), set(&[3]).as_slice());
        assert_eq!(nullers.after(3), set(&[1]).as_slice());

        assert!(nullers.before(1).is_empty());
        assert!(nullers.before(2).is_empty());
        // The bound is dead once the loop exits.
        assert_eq!(nullers.before(3), set(&[0]).as_slice());
    }

    /// r0 = n (param), r1 = i, r2 = next, r3 = next < n. The exit reads the
    /// header value of `i` that the back edge overwrites.
    fn exit_reads_phi_dest() -> Vec<BasicBlock> {
        let mut entry = Terminator::branch(1);
        *entry.phi_slot_mut(0).unwrap() =
            Some(PhiGroup::new().with(1, Operand::Const(Value::I64(0))));
        let mut latch = Terminator::cond_branch(Operand::Reg(3), 1, 3);
        *latch.phi_slot_mut(Terminator::TRUE_SUCCESSOR).unwrap() =
            Some(PhiGroup::new().with(1, Operand::Reg(2)));
        vec![
            BasicBlock::new(0, vec![], entry),
            BasicBlock::new(
                1,
                vec![Statement::new(
                    Some(2),
                    Binary::new(BinOp::Add, Operand::Reg(1), Value::I64(1)),
                )],
                Terminator::branch(2),
            ),
            BasicBlock::new(
                2,
                vec![Statement::new(
                    Some(3),
                    Compare::new(CmpOp::Lt, Operand::Reg(2), Operand::Reg(0)),
                )],
                latch,
            ),
            BasicBlock::new(3, vec![], Terminator::ret_value(Operand::Reg(1))),
        ]
    }

    #[test]
    fn test_phi_dest_live_on_other_edge() {
        let blocks = exit_reads_phi_dest();
        let cfg = Cfg::new(&blocks, 0);
        let liveness = compute_liveness(4, &blocks, &cfg, &[0]);

        assert_eq!(liveness.live_in[1].iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(liveness.live_in[2].iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(liveness.live_out[2].iter().collect::<Vec<_>>(), vec![0, 1, 2]);

        let nullers = compute_nullers(&liveness, &cfg, 4);
        assert!(nullers.after(1).is_empty());
        assert_eq!(nullers.after(2), set(&[2, 3]).as_slice());
        assert!(nullers.before(1).is_empty());
        assert!(nullers.before(2).is_empty());
        assert_eq!(nullers.before(3), set(&[0]).as_slice());
        assert_eq!(nullers.after(3), set(&[1]).as_slice());
    }

    #[test]
    fn test_shared_target_edges_merge() {
        // Two switch cases reach block 1, each moving a different source into r2.
        let mut switch = Terminator::switch(
            Operand::Reg(0),
            vec![(Value::I32(0), 1), (Value::I32(1), 1)],
            2,
        );
        *switch.phi_slot_mut(0).unwrap() = Some(PhiGroup::new().with(2, Operand::Reg(0)));
        *switch.phi_slot_mut(1).unwrap() = Some(PhiGroup::new().with(2, Operand::Reg(1)));
        let blocks = vec![
            BasicBlock::new(
                0,
                vec![Statement::new(Some(1), Use(Operand::Const(Value::I32(7))))],
                switch,
            ),
            BasicBlock::new(1, vec![], Terminator::ret_value(Operand::Reg(2))),
            BasicBlock::new(2, vec![], Terminator::ret_value(Operand::Reg(0))),
        ];
        let cfg = Cfg::new(&blocks, 0);
        let liveness = compute_liveness(3, &blocks, &cfg, &[0]);

        assert_eq!(liveness.edges[0].len(), 3);
        assert_eq!(liveness.live_out[0].iter().collect::<Vec<_>>(), vec![0, 1]);

        let nullers = compute_nullers(&liveness, &cfg, 3);
        assert_eq!(nullers.after(0), set(&[1]).as_slice());
        assert_eq!(nullers.before(1), set(&[0]).as_slice());
        assert_eq!(nullers.before(2), set(&[2]).as_slice());
    }

    #[test]
    fn test_unreachable_blocks_have_no_entries() {
        let mut blocks = counting_loop();
        blocks.push(BasicBlock::new(
            4,
            vec![Statement::new(Some(2), Use(Operand::Const(Value::Bool(true))))],
            Terminator::branch(3),
        ));
        let cfg = Cfg::new(&blocks, 0);
        let liveness = compute_liveness(4, &blocks, &cfg, &[0]);
        let nullers = compute_nullers(&liveness, &cfg, 4);
        assert!(nullers.after(4).is_empty());
        assert_eq!(nullers.before(3), set(&[0]).as_slice());
    }
}
