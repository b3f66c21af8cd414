use crate::error::ContractViolation;
use crate::ir::{BasicBlock, BlockId, RegisterId};
use crate::memory::NullerTable;
use crate::value::ValueType;
use anyhow::Result;
use smallvec::SmallVec;
use std::sync::Arc;

/// Entry of a dispatch table: either a plain block or a nested loop.
#[derive(Debug)]
pub enum DispatchNode {
    Block(BlockId),
    Loop(Box<LoopRegion>),
}

impl DispatchNode {
    /// Block id under which this node is dispatched.
    pub fn id(&self) -> BlockId {
        match self {
            DispatchNode::Block(id) => *id,
            DispatchNode::Loop(region) => region.header,
        }
    }
}

/// Nodes owned by one dispatch level, plus a dense block-id to node mapping.
///
/// Blocks that live inside a nested loop region have no entry at this level;
/// they can only be reached through the region's header.
#[derive(Debug, Default)]
pub struct DispatchTable {
    nodes: Vec<DispatchNode>,
    index: Vec<Option<u32>>,
}

impl DispatchTable {
    pub fn new(block_count: usize) -> Self {
        Self {
            nodes: Vec::new(),
            index: vec![None; block_count],
        }
    }

    pub(crate) fn insert(&mut self, node: DispatchNode) -> Result<()> {
        let id = node.id();
        let slot = self
            .index
            .get_mut(id)
            .ok_or(ContractViolation::UnknownBlock(id))?;
        if slot.is_some() {
            return Err(ContractViolation::Malformed(format!(
                "block {id} appears twice in one dispatch level"
            ))
            .into());
        }
        *slot = Some(u32::try_from(self.nodes.len())?);
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, id: BlockId) -> Option<&DispatchNode> {
        let position = (*self.index.get(id)?)?;
        self.nodes.get(position as usize)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    pub fn nodes(&self) -> &[DispatchNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A natural loop dispatched by its own re-entrant sub-engine.
#[derive(Debug)]
pub struct LoopRegion {
    pub header: BlockId,
    /// Direct blocks of the loop and headers of immediately nested loops.
    pub table: DispatchTable,
    /// Blocks outside the loop reachable from inside it, sorted.
    pub exits: SmallVec<[BlockId; 4]>,
}

impl LoopRegion {
    pub fn is_exit(&self, id: BlockId) -> bool {
        self.exits.binary_search(&id).is_ok()
    }

    /// Every block of the region, including the ones of nested regions.
    pub fn blocks(&self) -> Vec<BlockId> {
        let mut blocks = Vec::new();
        for node in self.table.nodes() {
            match node {
                DispatchNode::Block(id) => blocks.push(*id),
                DispatchNode::Loop(inner) => blocks.extend(inner.blocks()),
            }
        }
        blocks.sort_unstable();
        blocks
    }

    /// This region followed by all nested regions, outermost first.
    pub fn regions(&self) -> Vec<&LoopRegion> {
        let mut regions = vec![self];
        for node in self.table.nodes() {
            if let DispatchNode::Loop(inner) = node {
                regions.extend(inner.regions());
            }
        }
        regions
    }
}

/// A fully resolved function body. Immutable once built.
#[derive(Debug)]
pub struct FunctionBody {
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    /// Outermost dispatch level.
    pub dispatch: DispatchTable,
    pub nullers: NullerTable,
    pub register_types: Arc<[ValueType]>,
    pub params: Vec<RegisterId>,
}

impl FunctionBody {
    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        Ok(self
            .blocks
            .get(id)
            .ok_or(ContractViolation::UnknownBlock(id))?)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// All loop regions of the function, outermost first.
    pub fn loop_regions(&self) -> Vec<&LoopRegion> {
        self.dispatch
            .nodes()
            .iter()
            .filter_map(|node| match node {
                DispatchNode::Loop(region) => Some(region.regions()),
                DispatchNode::Block(_) => None,
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table_lookup() {
        let mut table = DispatchTable::new(4);
        table.insert(DispatchNode::Block(0)).unwrap();
        table.insert(DispatchNode::Block(3)).unwrap();

        assert!(table.contains(0));
        assert!(!table.contains(1));
        assert_eq!(table.get(3).map(DispatchNode::id), Some(3));
        assert!(table.get(10).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_dispatch_table_rejects_duplicates() {
        let mut table = DispatchTable::new(2);
        table.insert(DispatchNode::Block(1)).unwrap();
        assert!(table.insert(DispatchNode::Block(1)).is_err());
        assert!(table.insert(DispatchNode::Block(2)).is_err());
    }

    #[test]
    fn test_region_blocks() {
        let mut inner_table = DispatchTable::new(6);
        inner_table.insert(DispatchNode::Block(2)).unwrap();
        inner_table.insert(DispatchNode::Block(3)).unwrap();
        let inner = LoopRegion {
            header: 2,
            table: inner_table,
            exits: SmallVec::from_slice(&[4]),
        };

        let mut outer_table = DispatchTable::new(6);
        outer_table.insert(DispatchNode::Block(1)).unwrap();
        outer_table.insert(DispatchNode::Loop(Box::new(inner))).unwrap();
        outer_table.insert(DispatchNode::Block(4)).unwrap();
        let outer = LoopRegion {
            header: 1,
            table: outer_table,
            exits: SmallVec::from_slice(&[5]),
        };

        assert_eq!(outer.blocks(), vec![1, 2, 3, 4]);
        assert_eq!(outer.regions().len(), 2);
        assert!(outer.is_exit(5));
        assert!(!outer.is_exit(4));
    }
}
