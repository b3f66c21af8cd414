use crate::error::ContractViolation;
use crate::interpreter::dispatch::{ControlFlow, DispatchEngine};
use crate::ir::{DispatchNode, LoopRegion};
use anyhow::Result;
use tracing::debug;

impl DispatchEngine<'_> {
    /// Dispatches a loop region until control leaves it.
    ///
    /// Starts at the region's header. Blocks and nested regions of the loop
    /// are dispatched in place. A transfer to one of the region's exit blocks
    /// stops the sub-engine and hands that block back to the caller, which
    /// continues dispatching it at its own level.
    ///
    /// # Returns
    /// * `Ok(ControlFlow::Continue(exit))` - Control left the loop towards `exit`
    /// * `Ok(ControlFlow::Finish(_))` - A terminal block inside the loop ended the activation
    pub(super) fn run_loop(&mut self, region: &LoopRegion) -> Result<ControlFlow> {
        debug!("Entering loop region at block {}", region.header);

        let mut back_edges = 0;
        let result = self.dispatch_loop(region, &mut back_edges);
        self.report_loop_count(Some(region.header), back_edges);

        if let Ok(ControlFlow::Continue(exit)) = &result {
            debug!("Leaving loop region at block {} to {}", region.header, exit);
        }
        result
    }

    fn dispatch_loop(&mut self, region: &LoopRegion, back_edges: &mut u64) -> Result<ControlFlow> {
        let mut current = region.header;
        loop {
            let flow = match region.table.get(current) {
                Some(DispatchNode::Block(id)) => self.execute_block(*id)?,
                Some(DispatchNode::Loop(inner)) => self.run_loop(inner)?,
                None => {
                    return Err(ContractViolation::LoopEscape {
                        header: region.header,
                        target: current,
                    }
                    .into());
                }
            };
            match flow {
                ControlFlow::Continue(next) if region.is_exit(next) => {
                    return Ok(ControlFlow::Continue(next));
                }
                ControlFlow::Continue(next) => {
                    if next == region.header || next <= current {
                        self.count_back_edge(back_edges);
                    }
                    current = next;
                }
                ControlFlow::Finish(completion) => return Ok(ControlFlow::Finish(completion)),
            }
        }
    }
}
