use crate::interpreter::dispatch::{Completion, DispatchEngine};
use crate::interpreter::DispatchObserver;
use crate::ir::{BlockId, FunctionBody};
use crate::memory::RegisterFile;
use crate::options::EngineOptions;
use crate::value::Value;
use anyhow::{Context, Result, bail};
use std::fmt;
use std::sync::Arc;

/// A built function: immutable body plus engine configuration.
///
/// Shared through `Arc` by every activation, on any thread. Each activation
/// gets its own [`RegisterFile`].
pub struct Function {
    name: String,
    body: FunctionBody,
    options: EngineOptions,
    observer: Arc<dyn DispatchObserver>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("blocks", &self.body.block_count())
            .field("options", &self.options)
            .finish()
    }
}

impl Function {
    pub(crate) fn new(
        name: String,
        body: FunctionBody,
        options: EngineOptions,
        observer: Arc<dyn DispatchObserver>,
    ) -> Self {
        Self {
            name,
            body,
            options,
            observer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn observer(&self) -> &dyn DispatchObserver {
        self.observer.as_ref()
    }

    pub fn param_count(&self) -> usize {
        self.body.params.len()
    }

    /// Allocates an empty register file for a new activation.
    pub fn registers(&self) -> RegisterFile {
        RegisterFile::new(self.body.register_types.clone())
    }

    /// Dispatches the body against an activation's registers.
    ///
    /// Parameters must already be written; see [`Function::invoke`].
    pub fn run(&self, registers: &mut RegisterFile) -> Result<Completion> {
        if registers.len() != self.body.register_types.len() {
            bail!(
                "Function '{}' needs {} registers, activation has {}",
                self.name,
                self.body.register_types.len(),
                registers.len()
            );
        }
        DispatchEngine::new(self, registers).run()
    }

    /// Runs a fresh activation with the given arguments.
    ///
    /// # Arguments
    /// * `args` - One value per parameter, in declaration order
    ///
    /// # Returns
    /// * `Ok(Completion)` - The function returned or unwound
    /// * `Err(anyhow::Error)` - Wrong arguments, or a fatal error during dispatch
    pub fn invoke(&self, args: Vec<Value>) -> Result<Completion> {
        if args.len() != self.param_count() {
            bail!(
                "Function '{}' takes {} arguments, {} given",
                self.name,
                self.param_count(),
                args.len()
            );
        }
        let mut registers = self.registers();
        for (index, (&param, arg)) in self.body.params.iter().zip(args).enumerate() {
            registers
                .write(param, arg)
                .with_context(|| format!("Invalid argument {} for '{}'", index, self.name))?;
        }
        self.run(&mut registers)
    }

    /// Execution count of one successor of `block`, 0 if it is not profiled.
    pub fn branch_count(&self, block: BlockId, successor_index: usize) -> Result<u64> {
        Ok(self.body.block(block)?.profile.count(successor_index))
    }

    /// Fraction of profiled executions of `block` that took `successor_index`.
    pub fn branch_probability(&self, block: BlockId, successor_index: usize) -> Result<f64> {
        Ok(self.body.block(block)?.profile.probability(successor_index))
    }
}
