//! The compiled rule set: an arena of instruction nodes linked into chains,
//! plus the templates, procedures and groups that point into it.
//!
//! Every container instruction (anything with a body) is followed by its body
//! and then by a paired [`Instruction::End`] node. The `next` link of a node is
//! its successor in execution order; a container's `end` link lets control
//! skip its body.

mod builder;

pub use builder::{BodyBuilder, ChooseBuilder, ProgramBuilder, TemplateDecl, Traverse};

use crate::error::Location;
use std::collections::HashMap;
use stxflow_path::{AttributeValueTemplate, Expression, Pattern, QName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcedureId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) usize);

/// Where a template or procedure can be seen from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Only within its own group.
    #[default]
    Private,
    /// Also from the parent group.
    Public,
    /// From every group, as a fallback.
    Global,
}

/// Whether a declared variable lives in the activation or in a group frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Local,
    Group(GroupId),
}

/// Target group and parameters of a `process-*` or `call-procedure` instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traversal {
    pub group: Option<String>,
    pub params: Vec<(String, Expression)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// First node of a template, procedure or group-initialisation chain.
    Body,
    ProcessChildren(Traversal),
    ProcessAttributes(Traversal),
    ProcessSelf(Traversal),
    ProcessSiblings {
        traversal: Traversal,
        while_pattern: Option<Pattern>,
        until_pattern: Option<Pattern>,
    },
    CallProcedure {
        name: String,
        traversal: Traversal,
    },
    LiteralElement {
        name: QName,
        attributes: Vec<(QName, AttributeValueTemplate)>,
    },
    Element {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: HashMap<String, String>,
    },
    ElementStart {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: HashMap<String, String>,
    },
    ElementEnd {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: HashMap<String, String>,
    },
    Attribute {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: HashMap<String, String>,
        select: Option<Expression>,
    },
    Text(String),
    ValueOf {
        select: Expression,
        separator: AttributeValueTemplate,
    },
    Copy {
        attributes: bool,
    },
    Comment,
    ProcessingInstruction {
        target: AttributeValueTemplate,
    },
    Cdata,
    ResultDocument {
        href: AttributeValueTemplate,
    },
    Message {
        select: Option<Expression>,
        terminate: bool,
    },
    Variable {
        name: String,
        select: Option<Expression>,
        kind: VariableKind,
    },
    Param {
        name: String,
        select: Option<Expression>,
        required: bool,
        kind: VariableKind,
    },
    Assign {
        name: String,
        select: Option<Expression>,
    },
    If {
        test: Expression,
        else_branch: Option<NodeId>,
    },
    Else,
    Choose,
    When {
        test: Expression,
        choose: NodeId,
    },
    Otherwise,
    While {
        test: Expression,
    },
    ForEachItem {
        name: String,
        select: Expression,
    },
    End {
        start: NodeId,
    },
}

impl Instruction {
    /// The rule-set name of the instruction, used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Body => "template",
            Instruction::ProcessChildren(_) => "process-children",
            Instruction::ProcessAttributes(_) => "process-attributes",
            Instruction::ProcessSelf(_) => "process-self",
            Instruction::ProcessSiblings { .. } => "process-siblings",
            Instruction::CallProcedure { .. } => "call-procedure",
            Instruction::LiteralElement { .. } => "literal element",
            Instruction::Element { .. } => "element",
            Instruction::ElementStart { .. } => "start-element",
            Instruction::ElementEnd { .. } => "end-element",
            Instruction::Attribute { .. } => "attribute",
            Instruction::Text(_) => "text",
            Instruction::ValueOf { .. } => "value-of",
            Instruction::Copy { .. } => "copy",
            Instruction::Comment => "comment",
            Instruction::ProcessingInstruction { .. } => "processing-instruction",
            Instruction::Cdata => "cdata",
            Instruction::ResultDocument { .. } => "result-document",
            Instruction::Message { .. } => "message",
            Instruction::Variable { .. } => "variable",
            Instruction::Param { .. } => "param",
            Instruction::Assign { .. } => "assign",
            Instruction::If { .. } => "if",
            Instruction::Else => "else",
            Instruction::Choose => "choose",
            Instruction::When { .. } => "when",
            Instruction::Otherwise => "otherwise",
            Instruction::While { .. } => "while",
            Instruction::ForEachItem { .. } => "for-each-item",
            Instruction::End { .. } => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub instruction: Instruction,
    pub location: Location,
    pub(crate) next: Option<NodeId>,
    pub(crate) end: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub pattern: Pattern,
    /// The pattern as written, for diagnostics.
    pub source: String,
    pub priority: f64,
    pub visibility: Visibility,
    /// Entering this template starts a fresh frame of its group's variables.
    pub recursion_entry_point: bool,
    pub group: GroupId,
    pub location: Location,
    pub(crate) body: NodeId,
    pub(crate) order: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub group: GroupId,
    pub visibility: Visibility,
    pub location: Location,
    pub(crate) body: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub name: Option<String>,
    pub parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) templates: Vec<TemplateId>,
    pub(crate) procedures: Vec<ProcedureId>,
    /// Chain declaring the group's variables; run once per group frame.
    pub(crate) init: Option<NodeId>,
    /// Templates eligible in this group, best first.
    pub(crate) candidates: Vec<TemplateId>,
    /// This group followed by its ancestors; the variable lookup order.
    pub(crate) ancestry: Vec<GroupId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub(crate) nodes: Vec<Node>,
    pub(crate) templates: Vec<Template>,
    pub(crate) procedures: Vec<Procedure>,
    pub(crate) groups: Vec<Group>,
    pub(crate) group_names: HashMap<String, GroupId>,
    /// Global templates of every group, best first.
    pub(crate) globals: Vec<TemplateId>,
}

impl Program {
    /// The group holding top-level declarations; the root node is dispatched in it.
    pub fn root_group(&self) -> GroupId {
        GroupId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].next
    }

    /// The End node paired with a container instruction.
    pub fn end_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].end
    }

    pub fn template(&self, id: TemplateId) -> &Template {
        &self.templates[id.0]
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn procedure(&self, id: ProcedureId) -> &Procedure {
        &self.procedures[id.0]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.group_names.get(name).copied()
    }

    /// Resolves a procedure name as seen from `from`: the group and its
    /// ancestors (with the public procedures of their child groups), then
    /// global procedures.
    pub fn find_procedure(&self, name: &str, from: GroupId) -> Option<ProcedureId> {
        for &group in &self.group(from).ancestry {
            let own = self.group(group).procedures.iter();
            let public = self.group(group).children.iter().flat_map(|child| {
                self.group(*child)
                    .procedures
                    .iter()
                    .filter(|p| self.procedure(**p).visibility == Visibility::Public)
            });
            if let Some(found) = own
                .chain(public)
                .find(|p| self.procedure(**p).name == name)
            {
                return Some(*found);
            }
        }
        self.procedures
            .iter()
            .position(|p| p.visibility == Visibility::Global && p.name == name)
            .map(ProcedureId)
    }
}
