//! PhiCrab Dispatch Engine Library
//!
//! Executes functions in SSA form, one basic block at a time. Control moves
//! between blocks through terminators, phi moves are performed on the chosen
//! edge, registers are cleared as soon as liveness says they are dead, and
//! natural loops are dispatched by nested sub-engines.
//!
//! Functions are assembled with [`builder::FunctionBuilder`], which validates
//! the graph and precomputes everything the engine needs. The result is an
//! immutable [`interpreter::Function`] that any number of threads may run
//! concurrently.
//!
//! # Examples
//! ```
//! use phicrab::builder::FunctionBuilder;
//! use phicrab::ir::{Operand, Terminator};
//! use phicrab::ops::{BinOp, Binary};
//! use phicrab::value::{Value, ValueType};
//!
//! let mut b = FunctionBuilder::new("double");
//! let x = b.param(ValueType::I32);
//! let y = b.register(ValueType::I32);
//! let entry = b.block();
//! b.assign(entry, y, Binary::new(BinOp::Add, Operand::Reg(x), Operand::Reg(x)))
//!     .terminate(entry, Terminator::ret_value(Operand::Reg(y)));
//!
//! let double = b.build()?;
//! let completion = double.invoke(vec![Value::I32(21)])?;
//! assert_eq!(completion.value(), Some(&Value::I32(42)));
//! # Ok::<(), anyhow::Error>(())
//! ```

mod analysis;
pub mod builder;
pub mod demos;
pub mod error;
pub mod interpreter;
pub mod ir;
pub mod memory;
pub mod ops;
pub mod options;
pub mod value;

pub use builder::FunctionBuilder;
pub use error::{ContractViolation, ExceptionClass, GuestException};
pub use interpreter::{Completion, DispatchObserver, Function};
pub use options::EngineOptions;
pub use value::{Value, ValueType};
