use crate::error::ExceptionClass;
use crate::ir::{BlockId, Instruction, RegisterId};
use crate::value::Value;
use smallvec::SmallVec;

/// A value copy performed when a specific control-flow edge is taken.
#[derive(Debug)]
pub struct PhiMove {
    pub dest: RegisterId,
    pub source: Box<dyn Instruction>,
}

/// The phi moves attached to one edge.
///
/// Sources are evaluated against the predecessor's registers before any
/// destination is written, so moves within a group never observe each other.
#[derive(Debug, Default)]
pub struct PhiGroup {
    moves: SmallVec<[PhiMove; 2]>,
}

impl PhiGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dest: RegisterId, source: impl Instruction + 'static) {
        self.moves.push(PhiMove {
            dest,
            source: Box::new(source),
        });
    }

    pub fn with(mut self, dest: RegisterId, source: impl Instruction + 'static) -> Self {
        self.push(dest, source);
        self
    }

    pub fn moves(&self) -> &[PhiMove] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Registers read by the sources of this group.
    pub fn uses(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.moves.iter().flat_map(|phi| phi.source.uses())
    }

    /// Registers written by this group.
    pub fn dests(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.moves.iter().map(|phi| phi.dest)
    }
}

/// How a basic block hands control to its successor.
///
/// Successor indices are fixed at construction: a conditional branch always
/// has two, a switch one per case plus the default (last), an indirect branch
/// one per declared target and an invoke has `normal` (0) and `unwind` (1).
#[derive(Debug)]
pub enum Terminator {
    Branch {
        successor: BlockId,
        phi: Option<PhiGroup>,
    },
    CondBranch {
        condition: Box<dyn Instruction>,
        true_successor: BlockId,
        false_successor: BlockId,
        true_phi: Option<PhiGroup>,
        false_phi: Option<PhiGroup>,
    },
    Switch {
        condition: Box<dyn Instruction>,
        cases: Vec<(Value, BlockId)>,
        default: BlockId,
        /// One entry per case, followed by the default's.
        phis: Vec<Option<PhiGroup>>,
    },
    IndirectBranch {
        address: Box<dyn Instruction>,
        successors: SmallVec<[BlockId; 4]>,
        phis: Vec<Option<PhiGroup>>,
    },
    Invoke {
        call: Box<dyn Instruction>,
        /// Register receiving the call result on normal completion.
        dest: Option<RegisterId>,
        /// Exception class handled by the unwind edge.
        catches: ExceptionClass,
        normal: BlockId,
        unwind: BlockId,
        normal_phi: Option<PhiGroup>,
        unwind_phi: Option<PhiGroup>,
    },
    Return {
        value: Option<Box<dyn Instruction>>,
    },
    Resume {
        exception: Box<dyn Instruction>,
    },
    Unreachable,
}

impl Terminator {
    pub const TRUE_SUCCESSOR: usize = 0;
    pub const FALSE_SUCCESSOR: usize = 1;
    pub const NORMAL_SUCCESSOR: usize = 0;
    pub const UNWIND_SUCCESSOR: usize = 1;

    pub fn branch(successor: BlockId) -> Self {
        Terminator::Branch {
            successor,
            phi: None,
        }
    }

    pub fn cond_branch(
        condition: impl Instruction + 'static,
        true_successor: BlockId,
        false_successor: BlockId,
    ) -> Self {
        Terminator::CondBranch {
            condition: Box::new(condition),
            true_successor,
            false_successor,
            true_phi: None,
            false_phi: None,
        }
    }

    pub fn switch(
        condition: impl Instruction + 'static,
        cases: Vec<(Value, BlockId)>,
        default: BlockId,
    ) -> Self {
        let phis = (0..=cases.len()).map(|_| None).collect();
        Terminator::Switch {
            condition: Box::new(condition),
            cases,
            default,
            phis,
        }
    }

    pub fn indirect_branch(
        address: impl Instruction + 'static,
        successors: impl IntoIterator<Item = BlockId>,
    ) -> Self {
        let successors: SmallVec<[BlockId; 4]> = successors.into_iter().collect();
        let phis = successors.iter().map(|_| None).collect();
        Terminator::IndirectBranch {
            address: Box::new(address),
            successors,
            phis,
        }
    }

    pub fn invoke(
        call: impl Instruction + 'static,
        dest: Option<RegisterId>,
        normal: BlockId,
        unwind: BlockId,
    ) -> Self {
        Terminator::Invoke {
            call: Box::new(call),
            dest,
            catches: ExceptionClass::User,
            normal,
            unwind,
            normal_phi: None,
            unwind_phi: None,
        }
    }

    /// Sets the exception class an invoke's unwind edge handles. Other
    /// terminators are returned unchanged.
    pub fn with_catches(mut self, class: ExceptionClass) -> Self {
        if let Terminator::Invoke { catches, .. } = &mut self {
            *catches = class;
        }
        self
    }

    pub fn ret(value: Option<Box<dyn Instruction>>) -> Self {
        Terminator::Return { value }
    }

    pub fn ret_value(value: impl Instruction + 'static) -> Self {
        Terminator::Return {
            value: Some(Box::new(value)),
        }
    }

    pub fn resume(exception: impl Instruction + 'static) -> Self {
        Terminator::Resume {
            exception: Box::new(exception),
        }
    }

    /// Number of block successors. Constant for the lifetime of the terminator.
    pub fn successor_count(&self) -> usize {
        match self {
            Terminator::Branch { .. } => 1,
            Terminator::CondBranch { .. } | Terminator::Invoke { .. } => 2,
            Terminator::Switch { cases, .. } => cases.len() + 1,
            Terminator::IndirectBranch { successors, .. } => successors.len(),
            Terminator::Return { .. } | Terminator::Resume { .. } | Terminator::Unreachable => 0,
        }
    }

    pub fn successor(&self, index: usize) -> Option<BlockId> {
        match self {
            Terminator::Branch { successor, .. } => (index == 0).then_some(*successor),
            Terminator::CondBranch {
                true_successor,
                false_successor,
                ..
            } => match index {
                Self::TRUE_SUCCESSOR => Some(*true_successor),
                Self::FALSE_SUCCESSOR => Some(*false_successor),
                _ => None,
            },
            Terminator::Switch { cases, default, .. } => match index.cmp(&cases.len()) {
                std::cmp::Ordering::Less => Some(cases[index].1),
                std::cmp::Ordering::Equal => Some(*default),
                std::cmp::Ordering::Greater => None,
            },
            Terminator::IndirectBranch { successors, .. } => successors.get(index).copied(),
            Terminator::Invoke { normal, unwind, .. } => match index {
                Self::NORMAL_SUCCESSOR => Some(*normal),
                Self::UNWIND_SUCCESSOR => Some(*unwind),
                _ => None,
            },
            Terminator::Return { .. } | Terminator::Resume { .. } | Terminator::Unreachable => None,
        }
    }

    pub fn successors(&self) -> SmallVec<[BlockId; 4]> {
        (0..self.successor_count())
            .filter_map(|index| self.successor(index))
            .collect()
    }

    /// Phi moves to perform when leaving through `successor_index`.
    pub fn phi_group(&self, successor_index: usize) -> Option<&PhiGroup> {
        match self {
            Terminator::Branch { phi, .. } => phi.as_ref().filter(|_| successor_index == 0),
            Terminator::CondBranch {
                true_phi,
                false_phi,
                ..
            } => match successor_index {
                Self::TRUE_SUCCESSOR => true_phi.as_ref(),
                Self::FALSE_SUCCESSOR => false_phi.as_ref(),
                _ => None,
            },
            Terminator::Switch { phis, .. } | Terminator::IndirectBranch { phis, .. } => {
                phis.get(successor_index).and_then(Option::as_ref)
            }
            Terminator::Invoke {
                normal_phi,
                unwind_phi,
                ..
            } => match successor_index {
                Self::NORMAL_SUCCESSOR => normal_phi.as_ref(),
                Self::UNWIND_SUCCESSOR => unwind_phi.as_ref(),
                _ => None,
            },
            Terminator::Return { .. } | Terminator::Resume { .. } | Terminator::Unreachable => None,
        }
    }

    /// Mutable access to the phi slot of `successor_index`, used while building.
    pub(crate) fn phi_slot_mut(&mut self, successor_index: usize) -> Option<&mut Option<PhiGroup>> {
        match self {
            Terminator::Branch { phi, .. } => (successor_index == 0).then_some(phi),
            Terminator::CondBranch {
                true_phi,
                false_phi,
                ..
            } => match successor_index {
                Self::TRUE_SUCCESSOR => Some(true_phi),
                Self::FALSE_SUCCESSOR => Some(false_phi),
                _ => None,
            },
            Terminator::Switch { phis, .. } | Terminator::IndirectBranch { phis, .. } => {
                phis.get_mut(successor_index)
            }
            Terminator::Invoke {
                normal_phi,
                unwind_phi,
                ..
            } => match successor_index {
                Self::NORMAL_SUCCESSOR => Some(normal_phi),
                Self::UNWIND_SUCCESSOR => Some(unwind_phi),
                _ => None,
            },
            Terminator::Return { .. } | Terminator::Resume { .. } | Terminator::Unreachable => None,
        }
    }

    /// Length of the per-successor phi table, for tables stored as vectors.
    pub(crate) fn phi_table_len(&self) -> usize {
        match self {
            Terminator::Switch { phis, .. } | Terminator::IndirectBranch { phis, .. } => phis.len(),
            _ => self.successor_count(),
        }
    }

    /// Whether dispatch ends at this terminator.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Terminator::Return { .. } | Terminator::Resume { .. } | Terminator::Unreachable
        )
    }

    /// Whether leaving through `index` means an exception was just caught.
    pub fn is_unwind_edge(&self, index: usize) -> bool {
        matches!(self, Terminator::Invoke { .. }) && index == Self::UNWIND_SUCCESSOR
    }

    /// Whether the block should count how often each successor is taken.
    pub fn needs_branch_profiling(&self) -> bool {
        matches!(
            self,
            Terminator::CondBranch { .. }
                | Terminator::Switch { .. }
                | Terminator::IndirectBranch { .. }
        )
    }

    /// Registers read by the terminator itself, excluding phi sources.
    pub fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        match self {
            Terminator::Branch { .. } | Terminator::Unreachable => SmallVec::new(),
            Terminator::CondBranch { condition, .. } | Terminator::Switch { condition, .. } => {
                condition.uses()
            }
            Terminator::IndirectBranch { address, .. } => address.uses(),
            Terminator::Invoke { call, .. } => call.uses(),
            Terminator::Return { value } => value.as_ref().map(|v| v.uses()).unwrap_or_default(),
            Terminator::Resume { exception } => exception.uses(),
        }
    }

    /// Registers written by the terminator itself, excluding phi destinations.
    pub fn defs(&self) -> Option<RegisterId> {
        match self {
            Terminator::Invoke { dest, .. } => *dest,
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Terminator::Branch { .. } => "br",
            Terminator::CondBranch { .. } => "condbr",
            Terminator::Switch { .. } => "switch",
            Terminator::IndirectBranch { .. } => "indirectbr",
            Terminator::Invoke { .. } => "invoke",
            Terminator::Return { .. } => "ret",
            Terminator::Resume { .. } => "resume",
            Terminator::Unreachable => "unreachable",
        }
    }
}
