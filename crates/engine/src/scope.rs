//! Variable storage: group frames, plus the view through which expressions
//! resolve `$name` against an activation's locals and its groups.

use crate::error::StxError;
use crate::program::GroupId;
use std::collections::HashMap;
use stxflow_path::{Value, VariableScope};

/// Per group, a stack of variable frames. The top frame is current; a
/// recursion entry point pushes a fresh one for the duration of its template.
#[derive(Debug, Default)]
pub(crate) struct GroupFrames {
    stacks: Vec<Vec<HashMap<String, Value>>>,
}

impl GroupFrames {
    pub fn new(group_count: usize) -> Self {
        Self {
            stacks: vec![Vec::new(); group_count],
        }
    }

    pub fn push(&mut self, group: GroupId) {
        if let Some(stack) = self.stacks.get_mut(group.0) {
            stack.push(HashMap::new());
        }
    }

    pub fn pop(&mut self, group: GroupId) {
        if let Some(stack) = self.stacks.get_mut(group.0) {
            stack.pop();
        }
    }

    pub fn depth(&self, group: GroupId) -> usize {
        self.stacks.get(group.0).map_or(0, Vec::len)
    }

    pub fn declare(&mut self, group: GroupId, name: &str, value: Value) -> Result<(), StxError> {
        match self.stacks.get_mut(group.0).and_then(|s| s.last_mut()) {
            Some(frame) => {
                frame.insert(name.to_string(), value);
                Ok(())
            }
            None => Err(StxError::definition(format!(
                "Group variable `{}' declared outside of a group frame",
                name
            ))),
        }
    }

    pub fn get(&self, group: GroupId, name: &str) -> Option<&Value> {
        self.stacks
            .get(group.0)
            .and_then(|s| s.last())
            .and_then(|frame| frame.get(name))
    }

    pub fn get_mut(&mut self, group: GroupId, name: &str) -> Option<&mut Value> {
        self.stacks
            .get_mut(group.0)
            .and_then(|s| s.last_mut())
            .and_then(|frame| frame.get_mut(name))
    }
}

/// Locals (innermost scope last), then the current frames of `chain`.
pub(crate) struct ScopeView<'s> {
    locals: &'s [HashMap<String, Value>],
    groups: &'s GroupFrames,
    chain: &'s [GroupId],
}

impl<'s> ScopeView<'s> {
    pub fn new(
        locals: &'s [HashMap<String, Value>],
        groups: &'s GroupFrames,
        chain: &'s [GroupId],
    ) -> Self {
        Self {
            locals,
            groups,
            chain,
        }
    }
}

impl VariableScope for ScopeView<'_> {
    fn variable(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.chain.iter().find_map(|g| self.groups.get(*g, name)))
    }
}

/// Rebinds an existing variable, innermost declaration first.
pub(crate) fn assign(
    locals: &mut [HashMap<String, Value>],
    groups: &mut GroupFrames,
    chain: &[GroupId],
    name: &str,
    value: Value,
) -> Result<(), StxError> {
    if let Some(slot) = locals.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
        *slot = value;
        return Ok(());
    }
    for group in chain {
        if let Some(slot) = groups.get_mut(*group, name) {
            *slot = value;
            return Ok(());
        }
    }
    Err(StxError::definition(format!(
        "Can't assign to undeclared variable `{}'",
        name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_order() {
        let mut groups = GroupFrames::new(2);
        groups.push(GroupId(0));
        groups.push(GroupId(1));
        groups.declare(GroupId(0), "x", Value::number(1.0)).unwrap();
        groups.declare(GroupId(1), "y", Value::number(2.0)).unwrap();

        let mut inner = HashMap::new();
        inner.insert("x".to_string(), Value::string("local"));
        let locals = vec![HashMap::new(), inner];
        let chain = [GroupId(1), GroupId(0)];
        let view = ScopeView::new(&locals, &groups, &chain);

        assert_eq!(view.variable("x"), Some(&Value::string("local")));
        assert_eq!(view.variable("y"), Some(&Value::number(2.0)));
        assert_eq!(view.variable("z"), None);

        let outside = ScopeView::new(&[], &groups, &chain[1..]);
        assert_eq!(outside.variable("x"), Some(&Value::number(1.0)));
        assert_eq!(outside.variable("y"), None);
    }

    #[test]
    fn test_recursion_frames_shadow_and_restore() {
        let mut groups = GroupFrames::new(1);
        let g = GroupId(0);
        groups.push(g);
        groups.declare(g, "n", Value::number(1.0)).unwrap();
        groups.push(g);
        assert_eq!(groups.depth(g), 2);
        assert_eq!(groups.get(g, "n"), None);
        groups.declare(g, "n", Value::number(5.0)).unwrap();
        groups.pop(g);
        assert_eq!(groups.get(g, "n"), Some(&Value::number(1.0)));
    }

    #[test]
    fn test_assign() {
        let mut groups = GroupFrames::new(1);
        groups.push(GroupId(0));
        groups.declare(GroupId(0), "total", Value::number(0.0)).unwrap();
        let mut locals = vec![HashMap::new()];
        locals[0].insert("i".to_string(), Value::number(1.0));

        assign(&mut locals, &mut groups, &[GroupId(0)], "i", Value::number(2.0)).unwrap();
        assign(&mut locals, &mut groups, &[GroupId(0)], "total", Value::number(9.0)).unwrap();
        assert_eq!(locals[0]["i"], Value::number(2.0));
        assert_eq!(groups.get(GroupId(0), "total"), Some(&Value::number(9.0)));
        assert!(assign(&mut locals, &mut groups, &[GroupId(0)], "nope", Value::empty()).is_err());
    }
}
