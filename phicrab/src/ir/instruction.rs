use crate::ir::RegisterId;
use crate::memory::RegisterFile;
use crate::value::Value;
use anyhow::Result;
use smallvec::{SmallVec, smallvec};
use std::fmt;

/// A straight-line operation executed against the current register file.
///
/// Instructions are shared by every activation of a function, so they must be
/// immutable and thread safe. Writing the produced value is the caller's job,
/// which lets the same capability serve as a block statement, a terminator
/// condition or a phi source.
pub trait Instruction: fmt::Debug + Send + Sync {
    /// Evaluates the instruction.
    ///
    /// Errors carrying a [`crate::error::GuestException`] model exceptions
    /// raised by the interpreted program; anything else is fatal.
    fn execute(&self, registers: &RegisterFile) -> Result<Value>;

    /// Registers read by this instruction. Used to compute liveness.
    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        SmallVec::new()
    }
}

/// Either a register read or an immediate value.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(RegisterId),
    Const(Value),
}

impl Operand {
    pub fn evaluate(&self, registers: &RegisterFile) -> Result<Value> {
        match self {
            Operand::Reg(reg) => registers.read(*reg),
            Operand::Const(value) => Ok(value.clone()),
        }
    }

    pub fn register(&self) -> Option<RegisterId> {
        match self {
            Operand::Reg(reg) => Some(*reg),
            Operand::Const(_) => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Const(value)
    }
}

impl Instruction for Operand {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        self.evaluate(registers)
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        match self {
            Operand::Reg(reg) => smallvec![*reg],
            Operand::Const(_) => SmallVec::new(),
        }
    }
}

/// One entry in a basic block's straight-line body.
#[derive(Debug)]
pub struct Statement {
    /// Register receiving the produced value, if any.
    pub dest: Option<RegisterId>,
    pub instruction: Box<dyn Instruction>,
}

impl Statement {
    pub fn new(dest: Option<RegisterId>, instruction: impl Instruction + 'static) -> Self {
        Self {
            dest,
            instruction: Box::new(instruction),
        }
    }
}
