//! Runtime values stored in virtual registers.
//!
//! Scalars are stored inline. Aggregates, vectors and exceptions are held by
//! reference, so clearing the register that owns the last handle releases
//! them.

use crate::error::GuestException;
use anyhow::{Result, anyhow, bail};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Type of a register slot or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Opaque address, also used for block addresses.
    Ptr,
    Aggregate,
    Vector,
    Exception,
    /// Zero-sized result of instructions that produce nothing.
    Unit,
}

impl ValueType {
    /// Whether values of this type are held by reference.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            ValueType::Aggregate | ValueType::Vector | ValueType::Exception
        )
    }

    /// Size in bytes when stored inside an aggregate, if the type is a scalar.
    pub fn scalar_size(self) -> Option<usize> {
        match self {
            ValueType::Bool | ValueType::I8 => Some(1),
            ValueType::I16 => Some(2),
            ValueType::I32 | ValueType::F32 => Some(4),
            ValueType::I64 | ValueType::F64 | ValueType::Ptr => Some(8),
            ValueType::Unit => Some(0),
            ValueType::Aggregate | ValueType::Vector | ValueType::Exception => None,
        }
    }
}

/// Runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ptr(u64),
    Aggregate(Arc<Aggregate>),
    Vector(Arc<[Value]>),
    Exception(Arc<GuestException>),
    Unit,
}

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::I8(_) => ValueType::I8,
            Value::I16(_) => ValueType::I16,
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::Ptr(_) => ValueType::Ptr,
            Value::Aggregate(_) => ValueType::Aggregate,
            Value::Vector(_) => ValueType::Vector,
            Value::Exception(_) => ValueType::Exception,
            Value::Unit => ValueType::Unit,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.ty().is_reference()
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Sign-extends any integer value to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Interprets an integer or pointer value as an unsigned index.
    pub fn as_index(&self) -> Option<u64> {
        match *self {
            Value::Ptr(p) => Some(p),
            // Negative values are never valid indices, so wrapping is fine here.
            _ => self.as_i64().map(|v| v as u64),
        }
    }

    pub fn as_exception(&self) -> Option<&Arc<GuestException>> {
        match self {
            Value::Exception(exc) => Some(exc),
            _ => None,
        }
    }

    pub fn aggregate(bytes: &[u8]) -> Self {
        Value::Aggregate(Arc::new(Aggregate::from_bytes(bytes)))
    }

    pub fn vector(elements: impl IntoIterator<Item = Value>) -> Self {
        Value::Vector(elements.into_iter().collect())
    }

    /// Little-endian bytes of a scalar value. Reference values have no bytes.
    pub fn scalar_bytes(&self) -> Option<SmallVec<[u8; 8]>> {
        let bytes = match self {
            Value::Bool(b) => SmallVec::from_slice(&[u8::from(*b)]),
            Value::I8(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::I16(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::I32(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::I64(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::F32(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::F64(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::Ptr(v) => SmallVec::from_slice(&v.to_le_bytes()),
            Value::Unit => SmallVec::new(),
            Value::Aggregate(_) | Value::Vector(_) | Value::Exception(_) => return None,
        };
        Some(bytes)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Ptr(p) => write!(f, "0x{p:x}"),
            Value::Aggregate(agg) => write!(f, "{{{} bytes}}", agg.len()),
            Value::Vector(elems) => {
                write!(f, "<")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ">")
            }
            Value::Exception(exc) => write!(f, "exception({:?}: {})", exc.class, exc.payload),
            Value::Unit => write!(f, "()"),
        }
    }
}

/// Aggregate held by reference, stored as packed little-endian bytes.
///
/// Uses SmallVec to avoid heap allocations for aggregates ≤16 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregate {
    data: SmallVec<[u8; 16]>,
}

impl Aggregate {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: SmallVec::from_slice(bytes),
        }
    }

    /// Packs scalar fields back to back, without padding.
    pub fn pack(fields: &[Value]) -> Result<Self> {
        let mut data = SmallVec::new();
        for field in fields {
            let bytes = field
                .scalar_bytes()
                .ok_or_else(|| anyhow!("Cannot pack {:?} into an aggregate", field.ty()))?;
            data.extend_from_slice(&bytes);
        }
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads a plain value of type `T` at `offset`.
    pub fn read<T: FromBytes>(&self, offset: usize) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                anyhow!(
                    "Field at offset {} (size {}) out of bounds for {} byte aggregate",
                    offset,
                    size,
                    self.data.len()
                )
            })?;
        T::read_from_bytes(&self.data[offset..end])
            .map_err(|_| anyhow!("Cannot read field at offset {}", offset))
    }

    /// Returns a copy of this aggregate with `value` written at `offset`.
    pub fn with<T: IntoBytes + Immutable>(&self, offset: usize, value: T) -> Result<Self> {
        let bytes = value.as_bytes();
        let end = offset + bytes.len();
        if end > self.data.len() {
            bail!(
                "Field at offset {} (size {}) out of bounds for {} byte aggregate",
                offset,
                bytes.len(),
                self.data.len()
            );
        }
        let mut copy = self.clone();
        copy.data[offset..end].copy_from_slice(bytes);
        Ok(copy)
    }

    /// Decodes the scalar of type `ty` stored at `offset`.
    pub fn read_value(&self, offset: usize, ty: ValueType) -> Result<Value> {
        let value = match ty {
            ValueType::Bool => Value::Bool(self.read::<u8>(offset)? != 0),
            ValueType::I8 => Value::I8(self.read(offset)?),
            ValueType::I16 => Value::I16(self.read(offset)?),
            ValueType::I32 => Value::I32(self.read(offset)?),
            ValueType::I64 => Value::I64(self.read(offset)?),
            ValueType::F32 => Value::F32(self.read(offset)?),
            ValueType::F64 => Value::F64(self.read(offset)?),
            ValueType::Ptr => Value::Ptr(self.read(offset)?),
            ValueType::Unit => Value::Unit,
            ValueType::Aggregate | ValueType::Vector | ValueType::Exception => {
                bail!("Aggregates only hold scalar fields, requested {:?}", ty)
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(Value::Bool(true).ty(), ValueType::Bool);
        assert_eq!(Value::I32(-1).ty(), ValueType::I32);
        assert_eq!(Value::aggregate(&[1, 2]).ty(), ValueType::Aggregate);
        assert!(Value::vector([Value::I8(1)]).is_reference());
        assert!(!Value::F64(1.0).is_reference());
        assert!(Value::Unit.is_unit());
    }

    #[test]
    fn test_integer_views() {
        assert_eq!(Value::I8(-3).as_i64(), Some(-3));
        assert_eq!(Value::I16(300).as_i64(), Some(300));
        assert_eq!(Value::Ptr(5).as_index(), Some(5));
        assert_eq!(Value::I32(4).as_index(), Some(4));
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::F32(1.0).as_index(), None);
    }

    #[test]
    fn test_aggregate_fields() {
        let agg = Aggregate::pack(&[Value::I8(7), Value::I32(-2), Value::Bool(true)]).unwrap();
        assert_eq!(agg.len(), 6);
        assert_eq!(agg.read_value(0, ValueType::I8).unwrap(), Value::I8(7));
        assert_eq!(agg.read_value(1, ValueType::I32).unwrap(), Value::I32(-2));
        assert_eq!(agg.read_value(5, ValueType::Bool).unwrap(), Value::Bool(true));
        assert!(agg.read_value(4, ValueType::I32).is_err());

        let updated = agg.with(1, 100i32).unwrap();
        assert_eq!(updated.read::<i32>(1).unwrap(), 100);
        // The original is left untouched.
        assert_eq!(agg.read::<i32>(1).unwrap(), -2);
        assert!(agg.with(4, 1i64).is_err());
    }

    #[test]
    fn test_pack_rejects_references() {
        let result = Aggregate::pack(&[Value::aggregate(&[0])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::vector([Value::I32(1), Value::I32(2)]).to_string(), "<1, 2>");
        assert_eq!(Value::Ptr(255).to_string(), "0xff");
        assert_eq!(Value::Unit.to_string(), "()");
    }
}
