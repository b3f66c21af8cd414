//! Per-activation storage and the tables that bound register lifetimes.
//!
//! The [`RegisterFile`] is private to one activation. The [`NullerTable`] is
//! computed once when a function is built and shared by every activation.

mod nuller;
mod registers;

pub use nuller::{NullPoint, NullerTable, null_dead};
pub use registers::RegisterFile;
