//! This module provides the basic-block dispatch engine.
//!
//! A function body is executed one block at a time: run the statements,
//! resolve the terminator, perform the phi moves of the chosen edge, clear
//! registers that just died, and transfer control. Loop regions are executed
//! by nested sub-engines that hand their exit block back to the caller.

mod dispatch;
mod function;
mod loop_dispatch;
mod observer;
mod terminator;

pub use dispatch::Completion;
pub use function::Function;
pub use observer::{DispatchObserver, NoopObserver};
pub use terminator::{Resolution, ResolvedTransfer, execute_phis};
