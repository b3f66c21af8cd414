//! Engine configuration.

/// Knobs controlling how a function is built and dispatched.
///
/// None of these change the result of running a function, only how much
/// bookkeeping the engine does along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Update branch probability counters. Disable to model accelerated execution.
    pub profile_branches: bool,
    /// Count back-edges and report them to the observer when a dispatch level exits.
    pub count_back_edges: bool,
    /// Restructure natural loops into nested loop regions.
    pub loop_regions: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            profile_branches: true,
            count_back_edges: true,
            loop_regions: true,
        }
    }
}

impl EngineOptions {
    /// Options for a flat dispatch table with no loop regions.
    pub fn flat() -> Self {
        Self {
            loop_regions: false,
            ..Self::default()
        }
    }
}
