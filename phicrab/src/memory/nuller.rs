use crate::ir::{BlockId, RegisterId};
use crate::memory::RegisterFile;
use anyhow::Result;
use smallvec::SmallVec;
use std::fmt;
use tracing::trace;

/// Which side of a block a set of registers dies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullPoint {
    /// Before the block's first statement.
    Before,
    /// After the block's terminator and outgoing phi moves.
    After,
}

impl fmt::Display for NullPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullPoint::Before => write!(f, "before"),
            NullPoint::After => write!(f, "after"),
        }
    }
}

/// Registers that die when entering or leaving each block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullerTable {
    before: Vec<SmallVec<[RegisterId; 4]>>,
    after: Vec<SmallVec<[RegisterId; 4]>>,
}

impl NullerTable {
    /// A table with no entries for `block_count` blocks.
    pub fn empty(block_count: usize) -> Self {
        Self {
            before: vec![SmallVec::new(); block_count],
            after: vec![SmallVec::new(); block_count],
        }
    }

    pub(crate) fn from_parts(
        before: Vec<SmallVec<[RegisterId; 4]>>,
        after: Vec<SmallVec<[RegisterId; 4]>>,
    ) -> Self {
        debug_assert_eq!(before.len(), after.len());
        Self { before, after }
    }

    /// Registers to clear at `point` of `block`. Unknown blocks have none.
    pub fn registers(&self, point: NullPoint, block: BlockId) -> &[RegisterId] {
        let table = match point {
            NullPoint::Before => &self.before,
            NullPoint::After => &self.after,
        };
        table.get(block).map_or(&[], |regs| regs.as_slice())
    }

    pub fn before(&self, block: BlockId) -> &[RegisterId] {
        self.registers(NullPoint::Before, block)
    }

    pub fn after(&self, block: BlockId) -> &[RegisterId] {
        self.registers(NullPoint::After, block)
    }
}

/// Clears every register the table lists for `point` of `block`.
///
/// # Returns
/// * `Ok(&[RegisterId])` - The registers that were listed (some may already have been empty)
/// * `Err(anyhow::Error)` - If the table names a register outside the register file
pub fn null_dead<'t>(
    registers: &mut RegisterFile,
    block: BlockId,
    table: &'t NullerTable,
    point: NullPoint,
) -> Result<&'t [RegisterId]> {
    let dead = table.registers(point, block);
    for &reg in dead {
        registers.clear(reg)?;
    }
    if !dead.is_empty() {
        trace!("Nulled {:?} {} block {}", dead, point, block);
    }
    Ok(dead)
}
