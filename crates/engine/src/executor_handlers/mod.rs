//! Per-instruction execution, grouped by concern. Every handler receives the
//! processor, the running activation and the instruction's node, and tells the
//! instruction loop where to continue.

pub(crate) mod control_flow;
pub(crate) mod literals;
pub(crate) mod loops;
pub(crate) mod output;
pub(crate) mod traversal;
pub(crate) mod variables;
