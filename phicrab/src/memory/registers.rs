//! Virtual register file.
//!
//! One slot per SSA value, typed by the function's register metadata. Empty
//! slots are `None`: they were either never written or cleared by the
//! liveness nuller.

use crate::error::{ContractViolation, GuestException};
use crate::ir::RegisterId;
use crate::value::{Value, ValueType};
use anyhow::Result;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct RegisterFile {
    slots: Vec<Option<Value>>,
    types: Arc<[ValueType]>,
    /// Exception caught by the most recent unwind edge of this activation.
    exception: Option<Arc<GuestException>>,
}

impl RegisterFile {
    /// Creates an empty register file with one slot per entry in `types`.
    pub fn new(types: Arc<[ValueType]>) -> Self {
        Self {
            slots: vec![None; types.len()],
            types,
            exception: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Declared type of a register.
    pub fn ty(&self, id: RegisterId) -> Result<ValueType> {
        Ok(*self
            .types
            .get(id)
            .ok_or(ContractViolation::RegisterOutOfBounds(id, self.slots.len()))?)
    }

    /// Reads a register that must have been written on every path reaching here.
    pub fn read(&self, id: RegisterId) -> Result<Value> {
        self.get(id)?
            .cloned()
            .ok_or_else(|| ContractViolation::UninitializedRegister(id).into())
    }

    /// Returns the current content of a register, or `None` if it is empty.
    pub fn get(&self, id: RegisterId) -> Result<Option<&Value>> {
        let slot = self
            .slots
            .get(id)
            .ok_or(ContractViolation::RegisterOutOfBounds(id, self.slots.len()))?;
        Ok(slot.as_ref())
    }

    pub fn write(&mut self, id: RegisterId, value: Value) -> Result<()> {
        let expected = self.ty(id)?;
        if value.ty() != expected {
            return Err(ContractViolation::RegisterTypeMismatch {
                register: id,
                expected,
                found: value.ty(),
            }
            .into());
        }
        trace!("r{} = {}", id, value);
        self.slots[id] = Some(value);
        Ok(())
    }

    /// Drops the value held by a register. Clearing an empty register is a no-op.
    pub fn clear(&mut self, id: RegisterId) -> Result<()> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(ContractViolation::RegisterOutOfBounds(id, len))?;
        *slot = None;
        Ok(())
    }

    pub fn is_live(&self, id: RegisterId) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    /// Number of registers currently holding a value.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn exception(&self) -> Option<&Arc<GuestException>> {
        self.exception.as_ref()
    }

    pub fn set_exception(&mut self, exception: Arc<GuestException>) {
        self.exception = Some(exception);
    }

    pub fn take_exception(&mut self) -> Option<Arc<GuestException>> {
        self.exception.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers() -> RegisterFile {
        RegisterFile::new(Arc::from([ValueType::I32, ValueType::Aggregate, ValueType::Bool]))
    }

    #[test]
    fn test_read_write() {
        let mut regs = registers();
        assert_eq!(regs.len(), 3);
        regs.write(0, Value::I32(42)).unwrap();
        assert_eq!(regs.read(0).unwrap(), Value::I32(42));
        assert!(regs.is_live(0));
        assert!(!regs.is_live(1));
        assert_eq!(regs.live_count(), 1);
    }

    #[test]
    fn test_uninitialized_read() {
        let regs = registers();
        let err = regs.read(2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ContractViolation>(),
            Some(&ContractViolation::UninitializedRegister(2))
        );
        assert!(regs.read(7).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let mut regs = registers();
        let err = regs.write(0, Value::I64(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContractViolation>(),
            Some(ContractViolation::RegisterTypeMismatch { register: 0, .. })
        ));
        assert!(!regs.is_live(0));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut regs = registers();
        regs.write(2, Value::Bool(true)).unwrap();
        regs.clear(2).unwrap();
        regs.clear(2).unwrap();
        assert!(!regs.is_live(2));
        assert!(regs.clear(3).is_err());
    }

    #[test]
    fn test_clear_releases_references() {
        let mut regs = registers();
        let value = Value::aggregate(&[1, 2, 3]);
        let Value::Aggregate(handle) = &value else {
            unreachable!()
        };
        let handle = handle.clone();
        regs.write(1, value).unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);
        regs.clear(1).unwrap();
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_exception_slot() {
        let mut regs = registers();
        assert!(regs.exception().is_none());
        regs.set_exception(Arc::new(GuestException::user(Value::I32(1))));
        assert_eq!(regs.exception().unwrap().payload, Value::I32(1));
        assert!(regs.take_exception().is_some());
        assert!(regs.exception().is_none());
    }
}
