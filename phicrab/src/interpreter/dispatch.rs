use crate::error::{ContractViolation, GuestException};
use crate::interpreter::terminator::{Resolution, execute_phis};
use crate::interpreter::Function;
use crate::ir::{BlockId, DispatchNode};
use crate::memory::{NullPoint, RegisterFile, null_dead};
use crate::value::Value;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// How an activation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Normal return, with the returned value if the function has one.
    Return(Option<Value>),
    /// An exception escaped the function.
    Unwind(Arc<GuestException>),
}

impl Completion {
    pub fn is_unwind(&self) -> bool {
        matches!(self, Completion::Unwind(_))
    }

    /// The returned value, if the function returned one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Completion::Return(value) => value.as_ref(),
            Completion::Unwind(_) => None,
        }
    }

    pub fn exception(&self) -> Option<&Arc<GuestException>> {
        match self {
            Completion::Unwind(exception) => Some(exception),
            Completion::Return(_) => None,
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Return(Some(value)) => write!(f, "return {value}"),
            Completion::Return(None) => write!(f, "return"),
            Completion::Unwind(exception) => write!(f, "unwind: {exception}"),
        }
    }
}

/// Where a dispatch level goes after executing one node.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum ControlFlow {
    Continue(BlockId),
    Finish(Completion),
}

/// Executes one activation of a function.
///
/// The engine owns nothing but a borrow of the activation's registers; the
/// function body is shared and never mutated, apart from branch counters.
#[derive(Debug)]
pub(super) struct DispatchEngine<'a> {
    pub(super) function: &'a Function,
    pub(super) registers: &'a mut RegisterFile,
}

impl<'a> DispatchEngine<'a> {
    pub(super) fn new(function: &'a Function, registers: &'a mut RegisterFile) -> Self {
        Self {
            function,
            registers,
        }
    }

    /// Runs the function from its entry block to completion.
    ///
    /// # Returns
    /// * `Ok(Completion::Return)` - A `Return` terminator was reached
    /// * `Ok(Completion::Unwind)` - A guest exception escaped, through `Resume` or uncaught
    /// * `Err(anyhow::Error)` - A contract violation or another fatal error
    pub(super) fn run(mut self) -> Result<Completion> {
        info!("Starting dispatch of {}", self.function.name());

        let mut back_edges = 0;
        let result = self.dispatch_function(&mut back_edges);
        self.report_loop_count(None, back_edges);
        self.release_exception();

        let completion = match result {
            Ok(completion) => completion,
            Err(err) => match err.downcast::<GuestException>() {
                Ok(exception) => Completion::Unwind(Arc::new(exception)),
                Err(err) => return Err(err),
            },
        };
        info!("Function {} finished: {}", self.function.name(), completion);
        Ok(completion)
    }

    fn dispatch_function(&mut self, back_edges: &mut u64) -> Result<Completion> {
        let function = self.function;
        let body = function.body();
        let mut current = body.entry;
        loop {
            let flow = match body.dispatch.get(current) {
                Some(DispatchNode::Block(id)) => self.execute_block(*id)?,
                Some(DispatchNode::Loop(region)) => self.run_loop(region)?,
                None => return Err(ContractViolation::NotDispatchable(current).into()),
            };
            match flow {
                ControlFlow::Continue(next) => {
                    if next <= current {
                        self.count_back_edge(back_edges);
                    }
                    current = next;
                }
                ControlFlow::Finish(completion) => return Ok(completion),
            }
        }
    }

    /// Executes one block and performs the transition it selects.
    ///
    /// Order of events: statements, terminator, branch counter, phi moves of
    /// the chosen edge, `after` nulling of this block, `before` nulling of the
    /// successor. Terminal blocks stop after the `after` nulling.
    ///
    /// A caught exception is visible to the unwind phi group and to the landing
    /// block. It is dropped once a block finishes without leaving through an
    /// unwind edge.
    pub(super) fn execute_block(&mut self, id: BlockId) -> Result<ControlFlow> {
        let function = self.function;
        let block = function.body().block(id)?;
        function.observer().block_entered(function.name(), id);
        debug!("Executing block {}", block.label());

        for statement in &block.statements {
            let value = statement.instruction.execute(self.registers)?;
            if let Some(dest) = statement.dest {
                self.registers.write(dest, value)?;
            }
        }

        let terminator = &block.terminator;
        let resolution = terminator.resolve(id, self.registers)?;
        debug!("Terminator {} of block {}: {:?}", terminator.name(), id, resolution);

        match resolution {
            Resolution::Transfer(transfer) => {
                if function.options().profile_branches {
                    block.profile.record(transfer.index);
                }
                if let Some(moves) = execute_phis(self.registers, terminator, transfer.index)? {
                    function
                        .observer()
                        .phis_resolved(function.name(), id, transfer.target, moves);
                }
                self.null_dead(NullPoint::After, id)?;
                if !terminator.is_unwind_edge(transfer.index) {
                    self.release_exception();
                }
                self.null_dead(NullPoint::Before, transfer.target)?;
                Ok(ControlFlow::Continue(transfer.target))
            }
            Resolution::Return(value) => {
                self.null_dead(NullPoint::After, id)?;
                self.release_exception();
                Ok(ControlFlow::Finish(Completion::Return(value)))
            }
            Resolution::Raise(exception) => {
                self.null_dead(NullPoint::After, id)?;
                self.release_exception();
                Ok(ControlFlow::Finish(Completion::Unwind(exception)))
            }
            Resolution::Unreachable => {
                self.null_dead(NullPoint::After, id)?;
                self.release_exception();
                Err(ContractViolation::UnreachableExecuted(id).into())
            }
        }
    }

    fn null_dead(&mut self, point: NullPoint, block: BlockId) -> Result<()> {
        let function = self.function;
        let dead = null_dead(self.registers, block, &function.body().nullers, point)?;
        function
            .observer()
            .registers_nulled(function.name(), point, block, dead);
        Ok(())
    }

    fn release_exception(&mut self) {
        if self.registers.take_exception().is_some() {
            trace!("Released caught exception in {}", self.function.name());
        }
    }

    pub(super) fn count_back_edge(&self, back_edges: &mut u64) {
        if self.function.options().count_back_edges {
            *back_edges += 1;
        }
    }

    pub(super) fn report_loop_count(&self, header: Option<BlockId>, back_edges: u64) {
        if self.function.options().count_back_edges {
            debug!(
                "Reporting {} back-edge(s) for {:?} in {}",
                back_edges,
                header,
                self.function.name()
            );
            self.function
                .observer()
                .loop_count(self.function.name(), header, back_edges);
        }
    }
}
