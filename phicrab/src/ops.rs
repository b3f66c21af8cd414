//! Minimal set of straight-line operations.
//!
//! The dispatch engine only needs the [`Instruction`] capability. These
//! operations make it usable on its own: enough arithmetic to drive loops and
//! switches, calls between functions, exception raising and aggregate access.

use crate::error::{ExceptionClass, GuestException};
use crate::interpreter::{Completion, Function};
use crate::ir::{BlockId, Instruction, Operand, RegisterId};
use crate::memory::RegisterFile;
use crate::value::{Aggregate, Value, ValueType};
use anyhow::{Result, anyhow, bail};
use num_traits::{
    CheckedRem, Float, PrimInt, ToPrimitive, WrappingAdd, WrappingMul, WrappingShl, WrappingShr,
    WrappingSub,
};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Comparison operators. Integers compare as signed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// Trait for evaluating binary operations on values.
pub trait BinaryEval {
    /// Evaluates a binary operation on two values.
    ///
    /// # Arguments
    /// * `left` - Left operand value
    /// * `right` - Right operand value
    ///
    /// # Returns
    /// * `Ok(Value)` - Result of the operation
    /// * `Err(anyhow::Error)` - If operation fails or is unsupported
    fn eval(&self, left: Value, right: Value) -> Result<Value>;
}

/// Trait for evaluating unary operations on values.
pub trait UnaryEval {
    fn eval(&self, operand: Value) -> Result<Value>;
}

impl BinaryEval for BinOp {
    fn eval(&self, left: Value, right: Value) -> Result<Value> {
        match (&left, &right) {
            (Value::I8(l), Value::I8(r)) => eval_int_binop(*self, *l, *r).map(Value::I8),
            (Value::I16(l), Value::I16(r)) => eval_int_binop(*self, *l, *r).map(Value::I16),
            (Value::I32(l), Value::I32(r)) => eval_int_binop(*self, *l, *r).map(Value::I32),
            (Value::I64(l), Value::I64(r)) => eval_int_binop(*self, *l, *r).map(Value::I64),
            (Value::F32(l), Value::F32(r)) => eval_float_binop(*self, *l, *r).map(Value::F32),
            (Value::F64(l), Value::F64(r)) => eval_float_binop(*self, *l, *r).map(Value::F64),
            (Value::Bool(l), Value::Bool(r)) => eval_bool_binop(*self, *l, *r),
            (Value::Ptr(l), Value::Ptr(r)) if matches!(self, BinOp::Add | BinOp::Sub) => {
                let (l, r) = (*l, *r);
                let result = if *self == BinOp::Add {
                    l.wrapping_add(r)
                } else {
                    l.wrapping_sub(r)
                };
                Ok(Value::Ptr(result))
            }
            _ => bail!(
                "Type mismatch in binary operation: {:?} on {:?} and {:?}",
                self,
                left,
                right
            ),
        }
    }
}

impl BinaryEval for CmpOp {
    fn eval(&self, left: Value, right: Value) -> Result<Value> {
        let result = match (&left, &right) {
            (Value::I8(l), Value::I8(r)) => compare(*self, l, r),
            (Value::I16(l), Value::I16(r)) => compare(*self, l, r),
            (Value::I32(l), Value::I32(r)) => compare(*self, l, r),
            (Value::I64(l), Value::I64(r)) => compare(*self, l, r),
            (Value::F32(l), Value::F32(r)) => compare(*self, l, r),
            (Value::F64(l), Value::F64(r)) => compare(*self, l, r),
            (Value::Bool(l), Value::Bool(r)) => compare(*self, l, r),
            (Value::Ptr(l), Value::Ptr(r)) => compare(*self, l, r),
            _ => bail!(
                "Type mismatch in comparison: {:?} on {:?} and {:?}",
                self,
                left,
                right
            ),
        };
        Ok(Value::Bool(result))
    }
}

impl UnaryEval for UnOp {
    fn eval(&self, operand: Value) -> Result<Value> {
        match (self, operand) {
            (UnOp::Neg, Value::I8(v)) => Ok(Value::I8(v.wrapping_neg())),
            (UnOp::Neg, Value::I16(v)) => Ok(Value::I16(v.wrapping_neg())),
            (UnOp::Neg, Value::I32(v)) => Ok(Value::I32(v.wrapping_neg())),
            (UnOp::Neg, Value::I64(v)) => Ok(Value::I64(v.wrapping_neg())),
            (UnOp::Neg, Value::F32(v)) => Ok(Value::F32(-v)),
            (UnOp::Neg, Value::F64(v)) => Ok(Value::F64(-v)),
            (UnOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
            (UnOp::Not, Value::I8(v)) => Ok(Value::I8(!v)),
            (UnOp::Not, Value::I16(v)) => Ok(Value::I16(!v)),
            (UnOp::Not, Value::I32(v)) => Ok(Value::I32(!v)),
            (UnOp::Not, Value::I64(v)) => Ok(Value::I64(!v)),
            (op, operand) => bail!("Unsupported unary operation: {:?} on {:?}", op, operand),
        }
    }
}

/// Evaluates a binary operation on integers of any width.
///
/// Arithmetic wraps on overflow. Division and remainder by zero, and the
/// `MIN / -1` overflow, are reported as errors.
fn eval_int_binop<T>(op: BinOp, left: T, right: T) -> Result<T>
where
    T: PrimInt + WrappingAdd + WrappingSub + WrappingMul + WrappingShl + WrappingShr + CheckedRem,
{
    match op {
        BinOp::Add => Ok(left.wrapping_add(&right)),
        BinOp::Sub => Ok(left.wrapping_sub(&right)),
        BinOp::Mul => Ok(left.wrapping_mul(&right)),
        BinOp::Div | BinOp::Rem => {
            if right.is_zero() {
                bail!("Division by zero");
            }
            let result = if op == BinOp::Div {
                left.checked_div(&right)
            } else {
                left.checked_rem(&right)
            };
            result.ok_or_else(|| anyhow!("Integer overflow in {:?}", op))
        }
        BinOp::And => Ok(left & right),
        BinOp::Or => Ok(left | right),
        BinOp::Xor => Ok(left ^ right),
        BinOp::Shl | BinOp::Shr => {
            let amount = right
                .to_u32()
                .ok_or_else(|| anyhow!("Negative shift amount in {:?}", op))?;
            if op == BinOp::Shl {
                Ok(left.wrapping_shl(amount))
            } else {
                Ok(left.wrapping_shr(amount))
            }
        }
    }
}

/// Evaluates a binary operation on floats.
fn eval_float_binop<T: Float>(op: BinOp, left: T, right: T) -> Result<T> {
    match op {
        BinOp::Add => Ok(left + right),
        BinOp::Sub => Ok(left - right),
        BinOp::Mul => Ok(left * right),
        BinOp::Div => Ok(left / right),
        BinOp::Rem => Ok(left % right),
        _ => bail!("Unsupported float binary operation: {:?}", op),
    }
}

/// Evaluates a binary operation on boolean values.
fn eval_bool_binop(op: BinOp, left: bool, right: bool) -> Result<Value> {
    match op {
        BinOp::And => Ok(Value::Bool(left & right)),
        BinOp::Or => Ok(Value::Bool(left | right)),
        BinOp::Xor => Ok(Value::Bool(left ^ right)),
        _ => bail!("Unsupported boolean binary operation: {:?}", op),
    }
}

fn compare<T: PartialOrd>(op: CmpOp, left: &T, right: &T) -> bool {
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        CmpOp::Lt => left < right,
        CmpOp::Le => left <= right,
        CmpOp::Gt => left > right,
        CmpOp::Ge => left >= right,
    }
}

fn operand_uses(operands: &[&Operand]) -> SmallVec<[RegisterId; 4]> {
    operands.iter().filter_map(|op| op.register()).collect()
}

/// Copies an operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Use(pub Operand);

impl Instruction for Use {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        self.0.evaluate(registers)
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.0])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    pub op: BinOp,
    pub left: Operand,
    pub right: Operand,
}

impl Binary {
    pub fn new(op: BinOp, left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self {
            op,
            left: left.into(),
            right: right.into(),
        }
    }
}

impl Instruction for Binary {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        let left = self.left.evaluate(registers)?;
        let right = self.right.evaluate(registers)?;
        self.op.eval(left, right)
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.left, &self.right])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compare {
    pub op: CmpOp,
    pub left: Operand,
    pub right: Operand,
}

impl Compare {
    pub fn new(op: CmpOp, left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self {
            op,
            left: left.into(),
            right: right.into(),
        }
    }
}

impl Instruction for Compare {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        let left = self.left.evaluate(registers)?;
        let right = self.right.evaluate(registers)?;
        self.op.eval(left, right)
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.left, &self.right])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unary {
    pub op: UnOp,
    pub operand: Operand,
}

impl Instruction for Unary {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        self.op.eval(self.operand.evaluate(registers)?)
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.operand])
    }
}

/// Picks one of two operands based on a boolean condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub condition: Operand,
    pub if_true: Operand,
    pub if_false: Operand,
}

impl Instruction for Select {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        let condition = self.condition.evaluate(registers)?;
        match condition.as_bool() {
            Some(true) => self.if_true.evaluate(registers),
            Some(false) => self.if_false.evaluate(registers),
            None => bail!("Select condition must be a boolean, found {:?}", condition.ty()),
        }
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.condition, &self.if_true, &self.if_false])
    }
}

/// Calls another function with a fresh activation.
///
/// An exception escaping the callee is raised again in the caller, so an
/// enclosing `Invoke` can catch it.
#[derive(Debug, Clone)]
pub struct Call {
    pub callee: Arc<Function>,
    pub args: Vec<Operand>,
}

impl Call {
    pub fn new(callee: Arc<Function>, args: Vec<Operand>) -> Self {
        Self { callee, args }
    }
}

impl Instruction for Call {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        let args = self
            .args
            .iter()
            .map(|arg| arg.evaluate(registers))
            .collect::<Result<Vec<_>>>()?;
        debug!("Calling {} with {} argument(s)", self.callee.name(), args.len());
        match self.callee.invoke(args)? {
            Completion::Return(value) => Ok(value.unwrap_or(Value::Unit)),
            Completion::Unwind(exception) => Err(GuestException::clone(&exception).into()),
        }
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        self.args.iter().filter_map(Operand::register).collect()
    }
}

/// Raises a guest exception carrying the operand's value.
#[derive(Debug, Clone, PartialEq)]
pub struct Throw {
    pub class: ExceptionClass,
    pub payload: Operand,
}

impl Throw {
    pub fn user(payload: impl Into<Operand>) -> Self {
        Self {
            class: ExceptionClass::User,
            payload: payload.into(),
        }
    }

    pub fn exit(code: impl Into<Operand>) -> Self {
        Self {
            class: ExceptionClass::Exit,
            payload: code.into(),
        }
    }
}

impl Instruction for Throw {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        let payload = self.payload.evaluate(registers)?;
        Err(GuestException::new(self.class, payload).into())
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.payload])
    }
}

/// Reads the exception caught by the unwind edge that led to the current block.
///
/// Only the unwind phi group and the landing block can see it; the slot is
/// emptied once the landing block finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaughtException;

impl Instruction for CaughtException {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        registers
            .exception()
            .map(|exception| Value::Exception(exception.clone()))
            .ok_or_else(|| anyhow!("No exception has been caught by this activation"))
    }
}

/// Address of a block, as consumed by indirect branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddress(pub BlockId);

impl Instruction for BlockAddress {
    fn execute(&self, _registers: &RegisterFile) -> Result<Value> {
        Ok(Value::Ptr(u64::try_from(self.0)?))
    }
}

/// Reads a scalar field out of an aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractField {
    pub aggregate: Operand,
    pub offset: usize,
    pub ty: ValueType,
}

impl Instruction for ExtractField {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        match self.aggregate.evaluate(registers)? {
            Value::Aggregate(aggregate) => aggregate.read_value(self.offset, self.ty),
            // The payload of an exception is its only field.
            Value::Exception(exception) if self.offset == 0 => {
                if exception.payload.ty() != self.ty {
                    bail!(
                        "Exception payload has type {:?}, expected {:?}",
                        exception.payload.ty(),
                        self.ty
                    );
                }
                Ok(exception.payload.clone())
            }
            other => bail!("Cannot extract a field from {:?}", other.ty()),
        }
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        operand_uses(&[&self.aggregate])
    }
}

/// Packs scalar operands into a new aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeAggregate(pub Vec<Operand>);

impl Instruction for MakeAggregate {
    fn execute(&self, registers: &RegisterFile) -> Result<Value> {
        let fields = self
            .0
            .iter()
            .map(|field| field.evaluate(registers))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Aggregate(Arc::new(Aggregate::pack(&fields)?)))
    }

    fn uses(&self) -> SmallVec<[RegisterId; 4]> {
        self.0.iter().filter_map(Operand::register).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers() -> RegisterFile {
        let mut regs = RegisterFile::new(Arc::from([ValueType::I32, ValueType::Bool]));
        regs.write(0, Value::I32(10)).unwrap();
        regs.write(1, Value::Bool(false)).unwrap();
        regs
    }

    #[test]
    fn test_int_binary_operations() {
        assert_eq!(BinOp::Add.eval(Value::I32(5), Value::I32(3)).unwrap(), Value::I32(8));
        assert_eq!(BinOp::Sub.eval(Value::I8(5), Value::I8(7)).unwrap(), Value::I8(-2));
        assert_eq!(BinOp::Rem.eval(Value::I64(7), Value::I64(4)).unwrap(), Value::I64(3));
        assert_eq!(BinOp::Shl.eval(Value::I16(1), Value::I16(4)).unwrap(), Value::I16(16));
        assert_eq!(BinOp::Xor.eval(Value::I32(6), Value::I32(3)).unwrap(), Value::I32(5));
    }

    #[test]
    fn test_int_wrapping() {
        assert_eq!(
            BinOp::Add.eval(Value::I8(i8::MAX), Value::I8(1)).unwrap(),
            Value::I8(i8::MIN)
        );
        assert_eq!(
            BinOp::Mul.eval(Value::I32(i32::MAX), Value::I32(2)).unwrap(),
            Value::I32(-2)
        );
    }

    #[test]
    fn test_division_errors() {
        assert!(BinOp::Div.eval(Value::I32(10), Value::I32(0)).is_err());
        assert!(BinOp::Rem.eval(Value::I64(10), Value::I64(0)).is_err());
        assert!(BinOp::Div.eval(Value::I8(i8::MIN), Value::I8(-1)).is_err());
        assert!(BinOp::Shr.eval(Value::I32(1), Value::I32(-1)).is_err());
    }

    #[test]
    fn test_float_and_bool_operations() {
        assert_eq!(
            BinOp::Div.eval(Value::F64(1.0), Value::F64(4.0)).unwrap(),
            Value::F64(0.25)
        );
        assert!(BinOp::Shl.eval(Value::F32(1.0), Value::F32(1.0)).is_err());
        assert_eq!(
            BinOp::Or.eval(Value::Bool(true), Value::Bool(false)).unwrap(),
            Value::Bool(true)
        );
        assert!(BinOp::Add.eval(Value::I32(1), Value::I64(1)).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(CmpOp::Lt.eval(Value::I32(-1), Value::I32(1)).unwrap(), Value::Bool(true));
        assert_eq!(CmpOp::Ge.eval(Value::I64(3), Value::I64(4)).unwrap(), Value::Bool(false));
        assert_eq!(
            CmpOp::Eq.eval(Value::F64(f64::NAN), Value::F64(f64::NAN)).unwrap(),
            Value::Bool(false)
        );
        assert!(CmpOp::Eq.eval(Value::Bool(true), Value::I8(1)).is_err());
    }

    #[test]
    fn test_unary_operations() {
        assert_eq!(UnOp::Neg.eval(Value::I32(5)).unwrap(), Value::I32(-5));
        assert_eq!(UnOp::Not.eval(Value::Bool(true)).unwrap(), Value::Bool(false));
        assert!(UnOp::Not.eval(Value::F32(1.0)).is_err());
    }

    #[test]
    fn test_instructions_read_registers() {
        let regs = registers();
        let add = Binary::new(BinOp::Add, Operand::Reg(0), Value::I32(1));
        assert_eq!(add.execute(&regs).unwrap(), Value::I32(11));
        assert_eq!(add.uses().as_slice(), &[0]);

        let select = Select {
            condition: Operand::Reg(1),
            if_true: Operand::Const(Value::I32(1)),
            if_false: Operand::Reg(0),
        };
        assert_eq!(select.execute(&regs).unwrap(), Value::I32(10));
        assert_eq!(select.uses().as_slice(), &[1, 0]);
    }

    #[test]
    fn test_throw_raises_guest_exception() {
        let regs = registers();
        let err = Throw::user(Operand::Reg(0)).execute(&regs).unwrap_err();
        let exception = err.downcast_ref::<GuestException>().unwrap();
        assert_eq!(exception.class, ExceptionClass::User);
        assert_eq!(exception.payload, Value::I32(10));
    }

    #[test]
    fn test_caught_exception_requires_slot() {
        let mut regs = registers();
        assert!(CaughtException.execute(&regs).is_err());
        regs.set_exception(Arc::new(GuestException::user(Value::I32(3))));
        let value = CaughtException.execute(&regs).unwrap();
        let field = ExtractField {
            aggregate: Operand::Const(value),
            offset: 0,
            ty: ValueType::I32,
        };
        assert_eq!(field.execute(&regs).unwrap(), Value::I32(3));
    }

    #[test]
    fn test_aggregates() {
        let regs = registers();
        let make = MakeAggregate(vec![Operand::Reg(1), Operand::Reg(0)]);
        let aggregate = make.execute(&regs).unwrap();
        let field = ExtractField {
            aggregate: Operand::Const(aggregate),
            offset: 1,
            ty: ValueType::I32,
        };
        assert_eq!(field.execute(&regs).unwrap(), Value::I32(10));
        assert_eq!(BlockAddress(4).execute(&regs).unwrap(), Value::Ptr(4));
    }
}
