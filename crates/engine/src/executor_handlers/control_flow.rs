use crate::error::StxError;
use crate::processor::Processor;
use crate::processor::activation::Activation;
use crate::processor::execute::Flow;
use crate::program::NodeId;
use stxflow_path::Expression;

/// `if` and `when`: enter the content when the test holds, skip it otherwise.
pub(crate) fn handle_condition(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    test: &Expression,
) -> Result<Flow, StxError> {
    if processor.evaluate(act, test, id)?.to_boolean() {
        act.open_scope();
        Ok(Flow::Next)
    } else {
        Ok(processor.skip(id))
    }
}

/// A completed `if` content skips its `else`.
pub(crate) fn end_if(processor: &Processor<'_>, else_branch: Option<NodeId>) -> Flow {
    match else_branch {
        Some(branch) => processor.skip(branch),
        None => Flow::Next,
    }
}

/// A completed `when` leaves the enclosing `choose` through its end.
pub(crate) fn end_when(processor: &Processor<'_>, choose: NodeId) -> Flow {
    match processor.program.end_of(choose) {
        Some(end) => Flow::Jump(end),
        None => Flow::Next,
    }
}
