//! Immutable function body model consumed by the dispatch engine.
//!
//! A function body is a dense table of basic blocks indexed by [`BlockId`].
//! Natural loops are pulled out into nested [`LoopRegion`]s ahead of time,
//! so each dispatch level only sees the blocks and regions it owns.
//!
//! Nothing in here is mutated during execution, except the advisory branch
//! counters of [`BranchProfile`].

mod block;
mod function;
mod instruction;
mod terminator;

pub use block::{BasicBlock, BranchProfile};
pub use function::{DispatchNode, DispatchTable, FunctionBody, LoopRegion};
pub use instruction::{Instruction, Operand, Statement};
pub use terminator::{PhiGroup, PhiMove, Terminator};

/// Index of a basic block in its function's block table.
pub type BlockId = usize;

/// Index of a virtual register in an activation's register file.
pub type RegisterId = usize;

/// Reserved block index meaning "leave the dispatch loop".
pub const RETURN_SENTINEL: BlockId = BlockId::MAX;
