//! Construction of immutable function bodies.
//!
//! The builder plays the role of the IR producer: it collects blocks,
//! statements and terminators, checks the contracts the dispatch engine
//! relies on, runs liveness and loop discovery, and freezes the result into
//! a [`Function`].

use crate::analysis::{Cfg, LoopForest, compute_liveness, compute_nullers, find_loops};
use crate::error::ContractViolation;
use crate::interpreter::{DispatchObserver, Function, NoopObserver};
use crate::ir::{
    BasicBlock, BlockId, DispatchNode, DispatchTable, FunctionBody, Instruction, LoopRegion,
    PhiGroup, RegisterId, Statement, Terminator,
};
use crate::options::EngineOptions;
use crate::value::ValueType;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PendingBlock {
    name: Option<String>,
    statements: Vec<Statement>,
    terminator: Option<Terminator>,
}

/// Incrementally builds a [`Function`].
///
/// Mistakes such as pushing into an unknown block are recorded and reported
/// by [`FunctionBuilder::build`], so construction code can stay linear.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    register_types: Vec<ValueType>,
    params: Vec<RegisterId>,
    blocks: Vec<PendingBlock>,
    entry: BlockId,
    options: EngineOptions,
    observer: Arc<dyn DispatchObserver>,
    errors: Vec<ContractViolation>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            register_types: Vec::new(),
            params: Vec::new(),
            blocks: Vec::new(),
            entry: 0,
            options: EngineOptions::default(),
            observer: Arc::new(NoopObserver),
            errors: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Declares the next parameter. Parameters are written in declaration order.
    pub fn param(&mut self, ty: ValueType) -> RegisterId {
        let reg = self.register(ty);
        self.params.push(reg);
        reg
    }

    pub fn register(&mut self, ty: ValueType) -> RegisterId {
        self.register_types.push(ty);
        self.register_types.len() - 1
    }

    /// Appends an empty block. The first block is the entry block unless
    /// [`FunctionBuilder::set_entry`] says otherwise.
    pub fn block(&mut self) -> BlockId {
        self.blocks.push(PendingBlock::default());
        self.blocks.len() - 1
    }

    pub fn named_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.block();
        self.blocks[id].name = Some(name.into());
        id
    }

    pub fn set_entry(&mut self, block: BlockId) -> &mut Self {
        self.entry = block;
        self
    }

    fn pending(&mut self, block: BlockId) -> Option<&mut PendingBlock> {
        if block >= self.blocks.len() {
            self.errors.push(ContractViolation::UnknownBlock(block));
        }
        self.blocks.get_mut(block)
    }

    /// Appends a statement whose result is discarded.
    pub fn push(&mut self, block: BlockId, instruction: impl Instruction + 'static) -> &mut Self {
        if let Some(pending) = self.pending(block) {
            pending.statements.push(Statement::new(None, instruction));
        }
        self
    }

    /// Appends a statement writing its result into `dest`.
    pub fn assign(
        &mut self,
        block: BlockId,
        dest: RegisterId,
        instruction: impl Instruction + 'static,
    ) -> &mut Self {
        if let Some(pending) = self.pending(block) {
            pending.statements.push(Statement::new(Some(dest), instruction));
        }
        self
    }

    pub fn terminate(&mut self, block: BlockId, terminator: Terminator) -> &mut Self {
        let Some(pending) = self.pending(block) else {
            return self;
        };
        if pending.terminator.is_some() {
            self.errors.push(ContractViolation::Malformed(format!(
                "Block {block} is terminated twice"
            )));
        } else {
            pending.terminator = Some(terminator);
        }
        self
    }

    /// Adds a phi move to the edge `successor_index` of `block`'s terminator.
    ///
    /// The terminator must already be set.
    pub fn phi(
        &mut self,
        block: BlockId,
        successor_index: usize,
        dest: RegisterId,
        source: impl Instruction + 'static,
    ) -> &mut Self {
        let slot = self
            .pending(block)
            .and_then(|pending| pending.terminator.as_mut())
            .and_then(|terminator| terminator.phi_slot_mut(successor_index));
        match slot {
            Some(slot) => slot.get_or_insert_with(PhiGroup::new).push(dest, source),
            None => self.errors.push(ContractViolation::Malformed(format!(
                "Block {block} has no terminator edge {successor_index} to attach a phi to"
            ))),
        }
        self
    }

    /// Validates the function and freezes it.
    ///
    /// # Returns
    /// * `Ok(Arc<Function>)` - The function, ready to be invoked from any thread
    /// * `Err(anyhow::Error)` - The first [`ContractViolation`] found
    pub fn build(self) -> Result<Arc<Function>> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error.into());
        }

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (id, pending) in self.blocks.into_iter().enumerate() {
            let terminator = pending.terminator.ok_or_else(|| {
                ContractViolation::Malformed(format!("Block {id} has no terminator"))
            })?;
            let block = BasicBlock::new(id, pending.statements, terminator);
            blocks.push(match pending.name {
                Some(name) => block.with_name(name),
                None => block,
            });
        }
        validate(&blocks, self.entry, &self.register_types, &self.params)?;

        let reg_count = self.register_types.len();
        let cfg = Cfg::new(&blocks, self.entry);
        if cfg.preds[self.entry].iter().any(|pred| cfg.is_reachable(*pred)) {
            return Err(ContractViolation::Malformed(format!(
                "Entry block {} must not have predecessors",
                self.entry
            ))
            .into());
        }

        let liveness = compute_liveness(reg_count, &blocks, &cfg, &self.params);
        let nullers = compute_nullers(&liveness, &cfg, reg_count);

        let forest = if self.options.loop_regions {
            find_loops(&cfg)
        } else {
            LoopForest::flat(blocks.len())
        };
        let dispatch = build_dispatch_table(&forest, blocks.len(), None)?;
        info!(
            "Built {}: {} block(s), {} register(s), {} loop region(s)",
            self.name,
            blocks.len(),
            reg_count,
            forest.loops.len()
        );

        let body = FunctionBody {
            blocks,
            entry: self.entry,
            dispatch,
            nullers,
            register_types: Arc::from(self.register_types),
            params: self.params,
        };
        Ok(Arc::new(Function::new(
            self.name,
            body,
            self.options,
            self.observer,
        )))
    }
}

/// Checks the structural contracts of a function body.
fn validate(
    blocks: &[BasicBlock],
    entry: BlockId,
    register_types: &[ValueType],
    params: &[RegisterId],
) -> Result<()> {
    if entry >= blocks.len() {
        return Err(ContractViolation::UnknownBlock(entry).into());
    }
    let reg_count = register_types.len();
    let check_reg = |reg: RegisterId| -> Result<()> {
        if reg >= reg_count {
            return Err(ContractViolation::RegisterOutOfBounds(reg, reg_count).into());
        }
        Ok(())
    };
    for &param in params {
        check_reg(param)?;
    }

    for block in blocks {
        for statement in &block.statements {
            statement.dest.map(check_reg).transpose()?;
            statement.instruction.uses().into_iter().try_for_each(check_reg)?;
        }

        let terminator = &block.terminator;
        terminator.uses().into_iter().try_for_each(check_reg)?;
        terminator.defs().map(check_reg).transpose()?;

        for succ in terminator.successors() {
            if succ >= blocks.len() {
                return Err(ContractViolation::UnknownBlock(succ).into());
            }
        }
        if terminator.phi_table_len() != terminator.successor_count() {
            return Err(ContractViolation::Malformed(format!(
                "Block {} has {} phi entries for {} successors",
                block.id,
                terminator.phi_table_len(),
                terminator.successor_count()
            ))
            .into());
        }
        for index in 0..terminator.successor_count() {
            if let Some(group) = terminator.phi_group(index) {
                group.uses().try_for_each(check_reg)?;
                group.dests().try_for_each(check_reg)?;
            }
        }

        if let Terminator::IndirectBranch { successors, .. } = terminator {
            if successors.len() < 2 {
                return Err(ContractViolation::Malformed(format!(
                    "Indirect branch in block {} needs at least two successors",
                    block.id
                ))
                .into());
            }
        }
    }
    Ok(())
}

/// Builds the dispatch table of one level: the function's outermost level
/// when `parent` is `None`, otherwise the body of loop `parent`.
fn build_dispatch_table(
    forest: &LoopForest,
    block_count: usize,
    parent: Option<usize>,
) -> Result<DispatchTable> {
    let mut table = DispatchTable::new(block_count);
    for block in 0..block_count {
        if forest.innermost(block) == parent {
            table.insert(DispatchNode::Block(block))?;
        }
    }
    for child in forest.children(parent) {
        let natural = &forest.loops[child];
        let region = LoopRegion {
            header: natural.header,
            table: build_dispatch_table(forest, block_count, Some(child))?,
            exits: natural.exits.clone(),
        };
        debug!(
            "Loop region at {} with {} node(s), exits {:?}",
            region.header,
            region.table.len(),
            region.exits
        );
        table.insert(DispatchNode::Loop(Box::new(region)))?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;
    use crate::ops::{BinOp, Binary, CmpOp, Compare};
    use crate::value::Value;

    fn violation(result: Result<Arc<Function>>) -> ContractViolation {
        result
            .unwrap_err()
            .downcast::<ContractViolation>()
            .unwrap()
    }

    /// Sums 0..n.
    fn sum_builder(options: EngineOptions) -> FunctionBuilder {
        let mut b = FunctionBuilder::new("sum").with_options(options);
        let n = b.param(ValueType::I64);
        let i = b.register(ValueType::I64);
        let acc = b.register(ValueType::I64);
        let cond = b.register(ValueType::Bool);
        let next_i = b.register(ValueType::I64);
        let next_acc = b.register(ValueType::I64);

        let entry = b.block();
        let header = b.named_block("header");
        let body = b.block();
        let exit = b.named_block("exit");

        b.terminate(entry, Terminator::branch(header))
            .phi(entry, 0, i, Operand::Const(Value::I64(0)))
            .phi(entry, 0, acc, Operand::Const(Value::I64(0)));
        b.assign(header, cond, Compare::new(CmpOp::Lt, Operand::Reg(i), Operand::Reg(n)))
            .terminate(header, Terminator::cond_branch(Operand::Reg(cond), body, exit));
        b.assign(body, next_acc, Binary::new(BinOp::Add, Operand::Reg(acc), Operand::Reg(i)))
            .assign(body, next_i, Binary::new(BinOp::Add, Operand::Reg(i), Value::I64(1)))
            .terminate(body, Terminator::branch(header))
            .phi(body, 0, i, Operand::Reg(next_i))
            .phi(body, 0, acc, Operand::Reg(next_acc));
        b.terminate(exit, Terminator::ret_value(Operand::Reg(acc)));
        b
    }

    #[test]
    fn test_build_loop_region() {
        let function = sum_builder(EngineOptions::default()).build().unwrap();
        let body = function.body();
        assert_eq!(body.block_count(), 4);
        assert!(matches!(body.dispatch.get(0), Some(DispatchNode::Block(0))));
        assert!(matches!(body.dispatch.get(1), Some(DispatchNode::Loop(_))));
        assert!(body.dispatch.get(2).is_none());
        assert!(matches!(body.dispatch.get(3), Some(DispatchNode::Block(3))));

        let regions = body.loop_regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].header, 1);
        assert_eq!(regions[0].blocks(), vec![1, 2]);
        assert_eq!(regions[0].exits.as_slice(), &[3]);
        assert_eq!(body.block(3).unwrap().label(), "3(exit)");
    }

    #[test]
    fn test_build_flat() {
        let function = sum_builder(EngineOptions::flat()).build().unwrap();
        let body = function.body();
        assert!(body.loop_regions().is_empty());
        assert_eq!(body.dispatch.len(), 4);
        // The nullers do not depend on the dispatch structure.
        let nested = sum_builder(EngineOptions::default()).build().unwrap();
        assert_eq!(body.nullers, nested.body().nullers);
    }

    #[test]
    fn test_missing_terminator() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        b.block();
        b.terminate(entry, Terminator::ret(None));
        assert!(matches!(violation(b.build()), ContractViolation::Malformed(_)));
    }

    #[test]
    fn test_unknown_successor() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        b.terminate(entry, Terminator::branch(7));
        assert_eq!(violation(b.build()), ContractViolation::UnknownBlock(7));
    }

    #[test]
    fn test_unknown_block_recorded() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        b.terminate(entry, Terminator::ret(None));
        b.push(3, Operand::Const(Value::Unit));
        assert_eq!(violation(b.build()), ContractViolation::UnknownBlock(3));
    }

    #[test]
    fn test_register_out_of_bounds() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        b.terminate(entry, Terminator::ret_value(Operand::Reg(2)));
        assert_eq!(
            violation(b.build()),
            ContractViolation::RegisterOutOfBounds(2, 0)
        );
    }

    #[test]
    fn test_indirect_branch_needs_two_successors() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        let target = b.block();
        b.terminate(
            entry,
            Terminator::indirect_branch(Operand::Const(Value::Ptr(1)), [target]),
        );
        b.terminate(target, Terminator::ret(None));
        assert!(matches!(violation(b.build()), ContractViolation::Malformed(_)));
    }

    #[test]
    fn test_entry_without_predecessors() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        b.terminate(entry, Terminator::branch(entry));
        assert!(matches!(violation(b.build()), ContractViolation::Malformed(_)));
    }

    #[test]
    fn test_phi_requires_terminator() {
        let mut b = FunctionBuilder::new("f");
        let r = b.register(ValueType::I32);
        let entry = b.block();
        b.phi(entry, 0, r, Operand::Const(Value::I32(0)));
        b.terminate(entry, Terminator::ret(None));
        assert!(matches!(violation(b.build()), ContractViolation::Malformed(_)));
    }

    #[test]
    fn test_double_terminate() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block();
        b.terminate(entry, Terminator::ret(None))
            .terminate(entry, Terminator::Unreachable);
        assert!(matches!(violation(b.build()), ContractViolation::Malformed(_)));
    }
}
