//! Common test utilities and macros

use phicrab::demos;
use phicrab::interpreter::{Completion, DispatchObserver, Function};
use phicrab::ir::{BlockId, RegisterId};
use phicrab::memory::NullPoint;
use phicrab::options::EngineOptions;
use phicrab::value::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum TestResult {
    Success,
    SuccessWithValue(Value),
    Unwind(Value),
    Error(String),
    ErrorRegex(String),
}

impl PartialEq for TestResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TestResult::Success, TestResult::Success) => true,
            (TestResult::SuccessWithValue(a), TestResult::SuccessWithValue(b)) => a == b,
            (TestResult::Unwind(a), TestResult::Unwind(b)) => a == b,
            (TestResult::Error(a), TestResult::Error(b)) => a == b,
            (TestResult::ErrorRegex(pattern), TestResult::Error(msg)) => {
                regex::Regex::new(pattern).unwrap().is_match(msg)
            }
            (TestResult::Error(msg), TestResult::ErrorRegex(pattern)) => {
                regex::Regex::new(pattern).unwrap().is_match(msg)
            }
            _ => false,
        }
    }
}

impl From<anyhow::Result<Completion>> for TestResult {
    fn from(result: anyhow::Result<Completion>) -> Self {
        match result {
            Ok(Completion::Return(None)) => TestResult::Success,
            Ok(Completion::Return(Some(value))) => TestResult::SuccessWithValue(value),
            Ok(Completion::Unwind(exception)) => TestResult::Unwind(exception.payload.clone()),
            Err(e) => TestResult::Error(format!("{:#}", e)),
        }
    }
}

/// Everything a [`Recorder`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Entered(BlockId),
    Phis {
        from: BlockId,
        to: BlockId,
        moves: usize,
    },
    Nulled(NullPoint, BlockId, Vec<RegisterId>),
    LoopCount(Option<BlockId>, u64),
}

#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn loop_counts(&self) -> Vec<(Option<BlockId>, u64)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::LoopCount(header, count) => Some((header, count)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl DispatchObserver for Recorder {
    fn block_entered(&self, _function: &str, block: BlockId) {
        self.push(Event::Entered(block));
    }

    fn phis_resolved(&self, _function: &str, from: BlockId, to: BlockId, moves: usize) {
        self.push(Event::Phis { from, to, moves });
    }

    fn registers_nulled(
        &self,
        _function: &str,
        point: NullPoint,
        block: BlockId,
        registers: &[RegisterId],
    ) {
        self.push(Event::Nulled(point, block, registers.to_vec()));
    }

    fn loop_count(&self, _function: &str, header: Option<BlockId>, count: u64) {
        self.push(Event::LoopCount(header, count));
    }
}

pub fn build_demo(name: &str, options: EngineOptions) -> (Arc<Function>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let function = demos::find(name)
        .unwrap()
        .build(options, recorder.clone())
        .unwrap();
    (function, recorder)
}

pub fn run_demo_test(name: &str, options: EngineOptions, args: Vec<Value>) -> TestResult {
    let (function, _) = build_demo(name, options);
    function.invoke(args).into()
}

/// Runs a demo with loop regions and again with a flat dispatch table.
/// Both runs must agree.
#[macro_export]
macro_rules! check_demo {
    ($test_name:ident, demo=$demo:expr, args=[$($arg:expr),*], result=$expected:expr) => {
        #[test]
        fn $test_name() {
            let nested = crate::common::run_demo_test(
                $demo,
                phicrab::options::EngineOptions::default(),
                vec![$($arg),*],
            );
            let flat = crate::common::run_demo_test(
                $demo,
                phicrab::options::EngineOptions::flat(),
                vec![$($arg),*],
            );
            assert_eq!(nested, $expected);
            assert_eq!(flat, $expected);
        }
    };
}

/// Runs a function built by a test helper.
#[macro_export]
macro_rules! check_function {
    ($test_name:ident, build=$build:expr, args=[$($arg:expr),*], result=$expected:expr) => {
        #[test]
        fn $test_name() {
            let function: std::sync::Arc<phicrab::interpreter::Function> = $build;
            let result: crate::common::TestResult = function.invoke(vec![$($arg),*]).into();
            assert_eq!(result, $expected);
        }
    };
}
