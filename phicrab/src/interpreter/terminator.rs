use crate::error::{ContractViolation, GuestException};
use crate::ir::{BlockId, Instruction, RegisterId, Terminator};
use crate::memory::RegisterFile;
use crate::value::Value;
use anyhow::Result;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, trace};

/// The successor chosen by a non-terminal terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTransfer {
    /// Successor index, used to select the phi group and branch counter.
    pub index: usize,
    pub target: BlockId,
}

/// Outcome of evaluating a terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Transfer(ResolvedTransfer),
    Return(Option<Value>),
    /// Re-raise an exception to the caller.
    Raise(Arc<GuestException>),
    Unreachable,
}

impl Resolution {
    fn transfer(index: usize, target: BlockId) -> Self {
        Resolution::Transfer(ResolvedTransfer { index, target })
    }
}

impl Terminator {
    /// Evaluates the terminator of `block` against the current registers.
    ///
    /// `Invoke` writes its result register on normal completion, and stores
    /// the caught exception in the activation's exception slot on unwind.
    ///
    /// # Returns
    /// * `Ok(Resolution)` - Where control goes next
    /// * `Err(anyhow::Error)` - A contract violation, or an exception not caught here
    pub fn resolve(&self, block: BlockId, registers: &mut RegisterFile) -> Result<Resolution> {
        match self {
            Terminator::Branch { successor, .. } => Ok(Resolution::transfer(0, *successor)),
            Terminator::CondBranch {
                condition,
                true_successor,
                false_successor,
                ..
            } => {
                let value = condition.execute(registers)?;
                match value.as_bool() {
                    Some(true) => Ok(Resolution::transfer(
                        Self::TRUE_SUCCESSOR,
                        *true_successor,
                    )),
                    Some(false) => Ok(Resolution::transfer(
                        Self::FALSE_SUCCESSOR,
                        *false_successor,
                    )),
                    None => Err(ContractViolation::ConditionType {
                        block,
                        expected: "boolean",
                        found: value.ty(),
                    }
                    .into()),
                }
            }
            Terminator::Switch {
                condition,
                cases,
                default,
                ..
            } => resolve_switch(block, &**condition, cases, *default, registers),
            Terminator::IndirectBranch {
                address,
                successors,
                ..
            } => resolve_indirect(block, &**address, successors, registers),
            Terminator::Invoke {
                call,
                dest,
                catches,
                normal,
                unwind,
                ..
            } => match call.execute(registers) {
                Ok(value) => {
                    if let Some(dest) = dest {
                        registers.write(*dest, value)?;
                    }
                    Ok(Resolution::transfer(Self::NORMAL_SUCCESSOR, *normal))
                }
                Err(err) => match err.downcast::<GuestException>() {
                    Ok(exception) if exception.class == *catches => {
                        debug!("Block {} caught {}", block, exception);
                        registers.set_exception(Arc::new(exception));
                        Ok(Resolution::transfer(Self::UNWIND_SUCCESSOR, *unwind))
                    }
                    Ok(exception) => Err(exception.into()),
                    Err(err) => Err(err),
                },
            },
            Terminator::Return { value } => {
                let value = value
                    .as_ref()
                    .map(|value| value.execute(registers))
                    .transpose()?;
                Ok(Resolution::Return(value))
            }
            Terminator::Resume { exception } => match exception.execute(registers)? {
                Value::Exception(exception) => Ok(Resolution::Raise(exception)),
                _ => Err(ContractViolation::ResumeWithoutException(block).into()),
            },
            Terminator::Unreachable => Ok(Resolution::Unreachable),
        }
    }
}

/// Linear scan of the cases in declaration order; the first equal case wins.
fn resolve_switch(
    block: BlockId,
    condition: &dyn Instruction,
    cases: &[(Value, BlockId)],
    default: BlockId,
    registers: &RegisterFile,
) -> Result<Resolution> {
    let value = condition.execute(registers)?;
    for (index, (case, target)) in cases.iter().enumerate() {
        if case.ty() != value.ty() {
            return Err(ContractViolation::SwitchTypeMismatch {
                block,
                condition: value.ty(),
                case: case.ty(),
            }
            .into());
        }
        if *case == value {
            return Ok(Resolution::transfer(index, *target));
        }
    }
    Ok(Resolution::transfer(cases.len(), default))
}

/// Matches the computed block address against the declared successors.
///
/// The last successor is the fallback match, but it is still compared so an
/// address outside the declared set is reported instead of silently taken.
fn resolve_indirect(
    block: BlockId,
    address: &dyn Instruction,
    successors: &[BlockId],
    registers: &RegisterFile,
) -> Result<Resolution> {
    let value = address.execute(registers)?;
    let target = value.as_index().ok_or(ContractViolation::ConditionType {
        block,
        expected: "block address",
        found: value.ty(),
    })?;
    let Some((last, rest)) = successors.split_last() else {
        return Err(ContractViolation::Malformed(format!(
            "Indirect branch in block {block} has no successors"
        ))
        .into());
    };
    if let Some(index) = rest.iter().position(|succ| *succ as u64 == target) {
        return Ok(Resolution::transfer(index, rest[index]));
    }
    if *last as u64 == target {
        Ok(Resolution::transfer(rest.len(), *last))
    } else {
        Err(ContractViolation::IndirectTargetUnknown { block, target }.into())
    }
}

/// Performs the phi moves of `terminator` for `successor_index`.
///
/// All sources are evaluated before any destination is written, so a move
/// never observes a value written by another move of the same group.
///
/// # Returns
/// * `Ok(Some(n))` - The edge has a phi group and its `n` moves were written
/// * `Ok(None)` - The edge has no phi group
pub fn execute_phis(
    registers: &mut RegisterFile,
    terminator: &Terminator,
    successor_index: usize,
) -> Result<Option<usize>> {
    let Some(group) = terminator.phi_group(successor_index) else {
        return Ok(None);
    };
    let values = group
        .moves()
        .iter()
        .map(|phi| Ok((phi.dest, phi.source.execute(registers)?)))
        .collect::<Result<SmallVec<[(RegisterId, Value); 4]>>>()?;
    for (dest, value) in values {
        trace!("phi r{} <- {}", dest, value);
        registers.write(dest, value)?;
    }
    Ok(Some(group.len()))
}
