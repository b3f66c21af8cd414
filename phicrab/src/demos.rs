//! Demo functions shipped with the driver binary.
//!
//! Each demo is assembled with the [`FunctionBuilder`] and exercises a
//! different part of the dispatch engine.

use crate::builder::FunctionBuilder;
use crate::interpreter::{DispatchObserver, Function};
use crate::ir::{Operand, Terminator};
use crate::ops::{BinOp, Binary, BlockAddress, Call, CaughtException, CmpOp, Compare, Select, Throw};
use crate::options::EngineOptions;
use crate::value::{Value, ValueType};
use anyhow::{Context, Result, anyhow, bail};
use std::sync::Arc;

type BuildFn = fn(EngineOptions, Arc<dyn DispatchObserver>) -> Result<Arc<Function>>;

/// A named demo program.
#[derive(Debug, Clone, Copy)]
pub struct Demo {
    pub name: &'static str,
    pub description: &'static str,
    build: BuildFn,
}

impl Demo {
    pub fn build(
        &self,
        options: EngineOptions,
        observer: Arc<dyn DispatchObserver>,
    ) -> Result<Arc<Function>> {
        (self.build)(options, observer)
    }
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "fib",
        description: "Iterative fibonacci (n: i64) using a loop with parallel phi moves",
        build: fibonacci,
    },
    Demo {
        name: "classify",
        description: "Switch over (x: i32): 0 -> 0, 1 | 2 -> 1, anything else -> 2",
        build: classify,
    },
    Demo {
        name: "safe-div",
        description: "Divides (a: i64, b: i64) through an invoke, -1 when the callee throws",
        build: safe_div,
    },
    Demo {
        name: "jump",
        description: "Indirect branch to one of two blocks selected by (x: i64)",
        build: jump,
    },
    Demo {
        name: "grid",
        description: "Sum of i * j for i, j < n (n: i64) using nested loops",
        build: grid,
    },
];

pub fn find(name: &str) -> Result<&'static Demo> {
    DEMOS
        .iter()
        .find(|demo| demo.name == name)
        .ok_or_else(|| anyhow!("Unknown demo '{}'", name))
}

/// Parses a command line argument as a value of the given parameter type.
pub fn parse_arg(ty: ValueType, text: &str) -> Result<Value> {
    let value = match ty {
        ValueType::Bool => Value::Bool(text.parse()?),
        ValueType::I8 => Value::I8(text.parse()?),
        ValueType::I16 => Value::I16(text.parse()?),
        ValueType::I32 => Value::I32(text.parse()?),
        ValueType::I64 => Value::I64(text.parse()?),
        ValueType::F32 => Value::F32(text.parse()?),
        ValueType::F64 => Value::F64(text.parse()?),
        ValueType::Ptr => Value::Ptr(text.parse()?),
        _ => bail!("Parameters of type {:?} cannot be passed on the command line", ty),
    };
    Ok(value)
}

/// Parses one argument per parameter of `function`.
pub fn parse_args(function: &Function, args: &[String]) -> Result<Vec<Value>> {
    let body = function.body();
    if args.len() != body.params.len() {
        bail!(
            "Function '{}' takes {} arguments, {} given",
            function.name(),
            body.params.len(),
            args.len()
        );
    }
    body.params
        .iter()
        .zip(args)
        .map(|(&param, text)| {
            parse_arg(body.register_types[param], text)
                .with_context(|| format!("Invalid argument '{}'", text))
        })
        .collect()
}

fn fibonacci(options: EngineOptions, observer: Arc<dyn DispatchObserver>) -> Result<Arc<Function>> {
    let mut b = FunctionBuilder::new("fib")
        .with_options(options)
        .with_observer(observer);
    let n = b.param(ValueType::I64);
    let i = b.register(ValueType::I64);
    let a = b.register(ValueType::I64);
    let next = b.register(ValueType::I64);
    let cond = b.register(ValueType::Bool);
    let i_next = b.register(ValueType::I64);

    let entry = b.named_block("entry");
    let header = b.named_block("header");
    let body = b.named_block("body");
    let exit = b.named_block("exit");

    b.terminate(entry, Terminator::branch(header))
        .phi(entry, 0, i, Operand::Const(Value::I64(0)))
        .phi(entry, 0, a, Operand::Const(Value::I64(0)))
        .phi(entry, 0, next, Operand::Const(Value::I64(1)));

    b.assign(header, cond, Compare::new(CmpOp::Lt, Operand::Reg(i), Operand::Reg(n)))
        .terminate(header, Terminator::cond_branch(Operand::Reg(cond), body, exit));

    // (a, next) = (next, a + next), read from the values before the edge.
    b.assign(body, i_next, Binary::new(BinOp::Add, Operand::Reg(i), Value::I64(1)))
        .terminate(body, Terminator::branch(header))
        .phi(body, 0, a, Operand::Reg(next))
        .phi(body, 0, next, Binary::new(BinOp::Add, Operand::Reg(a), Operand::Reg(next)))
        .phi(body, 0, i, Operand::Reg(i_next));

    b.terminate(exit, Terminator::ret_value(Operand::Reg(a)));
    b.build()
}

fn classify(options: EngineOptions, observer: Arc<dyn DispatchObserver>) -> Result<Arc<Function>> {
    let mut b = FunctionBuilder::new("classify")
        .with_options(options)
        .with_observer(observer);
    let x = b.param(ValueType::I32);
    let class = b.register(ValueType::I32);

    let entry = b.named_block("entry");
    let zero = b.named_block("zero");
    let small = b.named_block("small");
    let other = b.named_block("other");
    let done = b.named_block("done");

    b.terminate(
        entry,
        Terminator::switch(
            Operand::Reg(x),
            vec![
                (Value::I32(0), zero),
                (Value::I32(1), small),
                (Value::I32(2), small),
            ],
            other,
        ),
    );
    for (block, result) in [(zero, 0), (small, 1), (other, 2)] {
        b.terminate(block, Terminator::branch(done))
            .phi(block, 0, class, Operand::Const(Value::I32(result)));
    }
    b.terminate(done, Terminator::ret_value(Operand::Reg(class)));
    b.build()
}

/// `a / b`, throwing `a` as a user exception when `b` is zero.
fn checked_div(
    options: EngineOptions,
    observer: Arc<dyn DispatchObserver>,
) -> Result<Arc<Function>> {
    let mut b = FunctionBuilder::new("checked_div")
        .with_options(options)
        .with_observer(observer);
    let lhs = b.param(ValueType::I64);
    let rhs = b.param(ValueType::I64);
    let is_zero = b.register(ValueType::Bool);
    let quotient = b.register(ValueType::I64);

    let entry = b.named_block("entry");
    let fail = b.named_block("fail");
    let divide = b.named_block("divide");

    b.assign(entry, is_zero, Compare::new(CmpOp::Eq, Operand::Reg(rhs), Value::I64(0)))
        .terminate(entry, Terminator::cond_branch(Operand::Reg(is_zero), fail, divide));
    b.push(fail, Throw::user(Operand::Reg(lhs)))
        .terminate(fail, Terminator::Unreachable);
    b.assign(divide, quotient, Binary::new(BinOp::Div, Operand::Reg(lhs), Operand::Reg(rhs)))
        .terminate(divide, Terminator::ret_value(Operand::Reg(quotient)));
    b.build()
}

fn safe_div(options: EngineOptions, observer: Arc<dyn DispatchObserver>) -> Result<Arc<Function>> {
    let callee = checked_div(options, observer.clone())?;

    let mut b = FunctionBuilder::new("safe_div")
        .with_options(options)
        .with_observer(observer);
    let lhs = b.param(ValueType::I64);
    let rhs = b.param(ValueType::I64);
    let quotient = b.register(ValueType::I64);
    let exception = b.register(ValueType::Exception);

    let entry = b.named_block("entry");
    let ok = b.named_block("ok");
    let landing = b.named_block("landing");

    b.terminate(
        entry,
        Terminator::invoke(
            Call::new(callee, vec![Operand::Reg(lhs), Operand::Reg(rhs)]),
            Some(quotient),
            ok,
            landing,
        ),
    );
    b.terminate(ok, Terminator::ret_value(Operand::Reg(quotient)));
    b.assign(landing, exception, CaughtException)
        .terminate(landing, Terminator::ret_value(Operand::Const(Value::I64(-1))));
    b.build()
}

fn jump(options: EngineOptions, observer: Arc<dyn DispatchObserver>) -> Result<Arc<Function>> {
    let mut b = FunctionBuilder::new("jump")
        .with_options(options)
        .with_observer(observer);
    let x = b.param(ValueType::I64);
    let is_zero = b.register(ValueType::Bool);
    let zero_addr = b.register(ValueType::Ptr);
    let other_addr = b.register(ValueType::Ptr);
    let target = b.register(ValueType::Ptr);

    let entry = b.named_block("entry");
    let zero = b.named_block("zero");
    let other = b.named_block("other");

    b.assign(entry, is_zero, Compare::new(CmpOp::Eq, Operand::Reg(x), Value::I64(0)))
        .assign(entry, zero_addr, BlockAddress(zero))
        .assign(entry, other_addr, BlockAddress(other))
        .assign(
            entry,
            target,
            Select {
                condition: Operand::Reg(is_zero),
                if_true: Operand::Reg(zero_addr),
                if_false: Operand::Reg(other_addr),
            },
        )
        .terminate(entry, Terminator::indirect_branch(Operand::Reg(target), [zero, other]));
    b.terminate(zero, Terminator::ret_value(Operand::Const(Value::I64(100))));
    b.terminate(other, Terminator::ret_value(Operand::Const(Value::I64(200))));
    b.build()
}

fn grid(options: EngineOptions, observer: Arc<dyn DispatchObserver>) -> Result<Arc<Function>> {
    let mut b = FunctionBuilder::new("grid")
        .with_options(options)
        .with_observer(observer);
    let n = b.param(ValueType::I64);
    let i = b.register(ValueType::I64);
    let acc = b.register(ValueType::I64);
    let outer_cond = b.register(ValueType::Bool);
    let j = b.register(ValueType::I64);
    let sum = b.register(ValueType::I64);
    let inner_cond = b.register(ValueType::Bool);
    let product = b.register(ValueType::I64);
    let sum_next = b.register(ValueType::I64);
    let j_next = b.register(ValueType::I64);
    let i_next = b.register(ValueType::I64);

    let entry = b.named_block("entry");
    let outer = b.named_block("outer");
    let inner_init = b.named_block("inner_init");
    let inner = b.named_block("inner");
    let inner_body = b.named_block("inner_body");
    let latch = b.named_block("latch");
    let exit = b.named_block("exit");

    b.terminate(entry, Terminator::branch(outer))
        .phi(entry, 0, i, Operand::Const(Value::I64(0)))
        .phi(entry, 0, acc, Operand::Const(Value::I64(0)));

    b.assign(outer, outer_cond, Compare::new(CmpOp::Lt, Operand::Reg(i), Operand::Reg(n)))
        .terminate(outer, Terminator::cond_branch(Operand::Reg(outer_cond), inner_init, exit));

    b.terminate(inner_init, Terminator::branch(inner))
        .phi(inner_init, 0, j, Operand::Const(Value::I64(0)))
        .phi(inner_init, 0, sum, Operand::Reg(acc));

    b.assign(inner, inner_cond, Compare::new(CmpOp::Lt, Operand::Reg(j), Operand::Reg(n)))
        .terminate(inner, Terminator::cond_branch(Operand::Reg(inner_cond), inner_body, latch));

    b.assign(inner_body, product, Binary::new(BinOp::Mul, Operand::Reg(i), Operand::Reg(j)))
        .assign(
            inner_body,
            sum_next,
            Binary::new(BinOp::Add, Operand::Reg(sum), Operand::Reg(product)),
        )
        .assign(inner_body, j_next, Binary::new(BinOp::Add, Operand::Reg(j), Value::I64(1)))
        .terminate(inner_body, Terminator::branch(inner))
        .phi(inner_body, 0, j, Operand::Reg(j_next))
        .phi(inner_body, 0, sum, Operand::Reg(sum_next));

    b.assign(latch, i_next, Binary::new(BinOp::Add, Operand::Reg(i), Value::I64(1)))
        .terminate(latch, Terminator::branch(outer))
        .phi(latch, 0, i, Operand::Reg(i_next))
        .phi(latch, 0, acc, Operand::Reg(sum));

    b.terminate(exit, Terminator::ret_value(Operand::Reg(acc)));
    b.build()
}
