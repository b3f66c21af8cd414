//! Error payloads raised while dispatching a function body.
//!
//! Everything travels inside [`anyhow::Error`]. The two typed payloads declared
//! here are the only ones the engine ever needs to tell apart:
//!
//! - [`ContractViolation`]: the IR producer handed us an inconsistent graph.
//!   These are fatal and never retried.
//! - [`GuestException`]: the interpreted program raised an exception. An
//!   `Invoke` terminator may catch it; otherwise it unwinds to the caller of
//!   `run`.

use crate::ir::{BlockId, RegisterId};
use crate::value::{Value, ValueType};
use std::fmt;
use thiserror::Error;

/// Violations of the invariants the IR producer promised to uphold.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("Block {0} does not exist")]
    UnknownBlock(BlockId),

    #[error("Block {0} was reached but is not dispatchable at this level")]
    NotDispatchable(BlockId),

    #[error("Register {0} read before being written")]
    UninitializedRegister(RegisterId),

    #[error("Register {0} out of bounds (register count {1})")]
    RegisterOutOfBounds(RegisterId, usize),

    #[error("Register {register} has type {expected:?}, cannot store {found:?}")]
    RegisterTypeMismatch {
        register: RegisterId,
        expected: ValueType,
        found: ValueType,
    },

    #[error("Switch in block {block} compares {condition:?} against a {case:?} case")]
    SwitchTypeMismatch {
        block: BlockId,
        condition: ValueType,
        case: ValueType,
    },

    #[error("Block {block} expected a {expected} condition, found {found:?}")]
    ConditionType {
        block: BlockId,
        expected: &'static str,
        found: ValueType,
    },

    #[error("Indirect branch in block {block} computed target {target}, not a declared successor")]
    IndirectTargetUnknown { block: BlockId, target: u64 },

    #[error("Reached unreachable terminator in block {0}")]
    UnreachableExecuted(BlockId),

    #[error("Resume in block {0} did not receive an exception value")]
    ResumeWithoutException(BlockId),

    #[error("Loop with header {header} dispatched to block {target} outside of its region")]
    LoopEscape { header: BlockId, target: BlockId },

    #[error("Invalid function body: {0}")]
    Malformed(String),
}

/// Exception classes a guest program can raise.
///
/// `Invoke` terminators declare which class their unwind edge handles; any
/// other class keeps unwinding past the current activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionClass {
    /// Exceptions thrown by the guest program and caught by landing pads.
    User,
    /// Process exit and abort requests. Never caught by landing pads.
    Exit,
}

/// An exception raised by the interpreted program.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct GuestException {
    pub class: ExceptionClass,
    pub payload: Value,
}

impl GuestException {
    pub fn new(class: ExceptionClass, payload: Value) -> Self {
        Self { class, payload }
    }

    pub fn user(payload: Value) -> Self {
        Self::new(ExceptionClass::User, payload)
    }
}

impl fmt::Display for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guest exception ({:?}): {}", self.class, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_downcast() {
        let err: anyhow::Error = ContractViolation::UnreachableExecuted(3).into();
        assert_eq!(
            err.downcast_ref::<ContractViolation>(),
            Some(&ContractViolation::UnreachableExecuted(3))
        );
        assert!(err.downcast_ref::<GuestException>().is_none());
        assert_eq!(err.to_string(), "Reached unreachable terminator in block 3");
    }

    #[test]
    fn test_guest_exception_display() {
        let exc = GuestException::user(Value::I32(7));
        assert_eq!(exc.to_string(), "Guest exception (User): 7");
    }
}
