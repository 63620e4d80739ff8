//! Matching of template patterns against the live ancestor stack.

use crate::ast::{Axis, PathPattern, Pattern, PatternStep};
use crate::engine::{EvaluationContext, predicate_holds};
use crate::error::PathError;
use crate::event::EventKind;

impl Pattern {
    /// Tests the node at stack depth `top`. With `set_position`, a successful
    /// match records the node's position among siblings satisfying the same
    /// last-step test in `e_ctx.position`.
    pub fn matches(
        &self,
        e_ctx: &mut EvaluationContext<'_>,
        top: usize,
        set_position: bool,
    ) -> Result<bool, PathError> {
        match self {
            Pattern::Path(path) => path.matches(e_ctx, top, set_position),
            Pattern::Union(paths) => {
                for path in paths {
                    if path.matches(e_ctx, top, set_position)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl PathPattern {
    pub fn matches(
        &self,
        e_ctx: &mut EvaluationContext<'_>,
        top: usize,
        set_position: bool,
    ) -> Result<bool, PathError> {
        let Some(last) = self.steps.len().checked_sub(1) else {
            // "/" matches the document root only
            let is_root = top == 1 && e_ctx.node_at(1)?.kind() == EventKind::Root;
            if is_root && set_position {
                e_ctx.position = 1;
            }
            return Ok(is_root);
        };

        if !self.match_from(last, top, e_ctx)? {
            return Ok(false);
        }
        if set_position {
            let key = self.steps[last].node_test.position_key();
            e_ctx.position = e_ctx.node_at(top)?.position_of(&key);
            log::trace!("pattern matched at depth {} position {}", top, e_ctx.position);
        }
        Ok(true)
    }

    /// Matches `steps[index]` at `depth`, then the preceding steps further up the stack.
    fn match_from(
        &self,
        index: usize,
        depth: usize,
        e_ctx: &EvaluationContext<'_>,
    ) -> Result<bool, PathError> {
        let step = &self.steps[index];
        let Ok(event) = e_ctx.node_at(depth) else {
            return Ok(false);
        };
        let axis = if step.is_attribute {
            Axis::Attribute
        } else {
            Axis::Child
        };
        if !step.node_test.matches(event, axis) || !step_predicates_hold(step, depth, e_ctx)? {
            return Ok(false);
        }

        if index == 0 {
            // A relative first step may sit anywhere below the root.
            return Ok(if self.is_absolute && !step.descendant_gap {
                depth == 2
            } else {
                depth >= 2
            });
        }

        if step.descendant_gap {
            for ancestor in (1..depth).rev() {
                if self.match_from(index - 1, ancestor, e_ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        } else {
            self.match_from(index - 1, depth - 1, e_ctx)
        }
    }
}

fn step_predicates_hold(
    step: &PatternStep,
    depth: usize,
    e_ctx: &EvaluationContext<'_>,
) -> Result<bool, PathError> {
    if step.predicates.is_empty() {
        return Ok(true);
    }
    let position = e_ctx
        .node_at(depth)?
        .position_of(&step.node_test.position_key());
    let sub_ctx = e_ctx
        .with_position(position)
        .with_child_nodes(depth < e_ctx.ancestors.len() || e_ctx.has_child_nodes);
    for predicate in &step.predicates {
        if !predicate_holds(predicate, &sub_ctx, depth, position)? {
            return Ok(false);
        }
    }
    Ok(true)
}
