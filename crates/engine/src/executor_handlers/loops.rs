//! `while` and `for-each-item`. Both jump back to their start node from their
//! end; `for-each-item` keeps its remaining items in the frame.

use crate::error::StxError;
use crate::processor::Processor;
use crate::processor::activation::{Activation, LoopState};
use crate::processor::execute::Flow;
use crate::program::NodeId;
use stxflow_path::{Expression, Value};

pub(crate) fn handle_while(
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

pub(crate) fn handle_for_each_item(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &str,
    select: &Expression,
) -> Result<Flow, StxError> {
    let continuing = act
        .frame()
        .and_then(|f| f.loops.last())
        .is_some_and(|l| l.node == id);
    if !continuing {
        let value = processor.evaluate(act, select, id)?;
        if let Some(frame) = act.frame_mut() {
            frame.loops.push(LoopState {
                node: id,
                items: value.into_items().into_iter(),
            });
        }
    }

    let next = act
        .frame_mut()
        .and_then(|f| f.loops.last_mut())
        .and_then(|l| l.items.next());
    match next {
        Some(item) => {
            act.open_scope();
            act.declare_local(name, Value::from_item(item));
            Ok(Flow::Next)
        }
        None => {
            if let Some(frame) = act.frame_mut() {
                frame.loops.pop();
            }
            Ok(processor.skip(id))
        }
    }
}
