//! Worklist dataflow solver.
//!
//! Correctness assumes the usual conditions: `meet_into` and `transfer` are
//! monotone over a finite-height lattice, so iteration reaches a fixpoint.

use crate::analysis::Cfg;
use std::collections::VecDeque;

/// Computes a backward dataflow fixpoint.
///
/// - `bottom`: initial state for every block, and the meet over no successors
/// - `meet_into`: `acc = meet(acc, edge(block, succ, succ_in))`, called once per
///   distinct reachable successor of `block`
/// - `transfer`: computes IN of a block from its OUT
///
/// Unreachable blocks are left as `bottom`.
///
/// # Returns
/// * `(in_states, out_states)` - Fixpoint states at block entry and exit
pub(crate) fn solve_backward<State, MeetInto, Transfer>(
    cfg: &Cfg,
    bottom: State,
    mut meet_into: MeetInto,
    mut transfer: Transfer,
) -> (Vec<State>, Vec<State>)
where
    State: Clone + PartialEq,
    MeetInto: FnMut(&mut State, usize, usize, &State),
    Transfer: FnMut(usize, &State) -> State,
{
    let n = cfg.len();
    let mut in_states: Vec<State> = vec![bottom.clone(); n];
    let mut out_states: Vec<State> = vec![bottom.clone(); n];

    // Seed in reverse order so exits tend to be processed first.
    let mut work: VecDeque<usize> = (0..n).rev().filter(|b| cfg.is_reachable(*b)).collect();
    let mut queued = cfg.reachable.clone();

    while let Some(b) = work.pop_front() {
        queued[b] = false;

        let mut new_out = bottom.clone();
        for &succ in &cfg.succs[b] {
            if cfg.is_reachable(succ) {
                meet_into(&mut new_out, b, succ, &in_states[succ]);
            }
        }

        let mut changed = false;
        if new_out != out_states[b] {
            out_states[b] = new_out;
            changed = true;
        }
        let new_in = transfer(b, &out_states[b]);
        if new_in != in_states[b] {
            in_states[b] = new_in;
            changed = true;
        }

        if changed {
            for pred in cfg.reachable_preds(b) {
                if !queued[pred] {
                    queued[pred] = true;
                    work.push_back(pred);
                }
            }
        }
    }

    (in_states, out_states)
}
