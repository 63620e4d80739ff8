//! Programmatic construction of a [`Program`].
//!
//! Expressions, patterns and attribute value templates are given as source
//! text and parsed on the spot. Parse and declaration problems are collected
//! and returned together from [`ProgramBuilder::build`].

use super::{
    Group, GroupId, Instruction, Node, NodeId, Procedure, ProcedureId, Program, Template,
    TemplateId, Traversal, VariableKind, Visibility,
};
use crate::error::{Location, StxError};
use std::collections::HashMap;
use std::fmt::Display;
use stxflow_path::{
    AttributeValueTemplate, Expression, Pattern, QName, parse_avt, parse_expression_with,
    parse_pattern_with,
};

/// Pattern and options of a template declaration.
#[derive(Debug, Clone)]
pub struct TemplateDecl {
    pattern: String,
    priority: Option<f64>,
    visibility: Visibility,
    recursion_entry_point: bool,
}

impl TemplateDecl {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            priority: None,
            visibility: Visibility::Private,
            recursion_entry_point: false,
        }
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn recursion_entry_point(mut self) -> Self {
        self.recursion_entry_point = true;
        self
    }
}

/// Options of a traversal or procedure call: target group, `with-param`
/// values and, for `process-siblings`, the `while`/`until` patterns.
#[derive(Debug, Clone, Default)]
pub struct Traverse {
    group: Option<String>,
    params: Vec<(String, String)>,
    while_pattern: Option<String>,
    until_pattern: Option<String>,
}

impl Traverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, name: &str) -> Self {
        self.group = Some(name.to_string());
        self
    }

    pub fn param(mut self, name: &str, select: &str) -> Self {
        self.params.push((name.to_string(), select.to_string()));
        self
    }

    pub fn while_matching(mut self, pattern: &str) -> Self {
        self.while_pattern = Some(pattern.to_string());
        self
    }

    pub fn until_matching(mut self, pattern: &str) -> Self {
        self.until_pattern = Some(pattern.to_string());
        self
    }
}

pub struct ProgramBuilder {
    program: Program,
    namespaces: HashMap<String, String>,
    errors: Vec<String>,
    group: GroupId,
    location: Location,
    order: usize,
    /// Group-level declarations per group, in declaration order.
    declarations: Vec<Vec<NodeId>>,
    declared_names: Vec<Vec<String>>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        let program = Program {
            groups: vec![Group::default()],
            ..Program::default()
        };
        Self {
            program,
            namespaces: HashMap::new(),
            errors: Vec::new(),
            group: GroupId(0),
            location: Location::default(),
            order: 0,
            declarations: vec![Vec::new()],
            declared_names: vec![Vec::new()],
        }
    }

    /// Binds `prefix` for names, patterns and expressions declared afterwards.
    pub fn namespace(&mut self, prefix: &str, uri: &str) -> &mut Self {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
        self
    }

    /// Sets the source position attached to the declarations that follow.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.location = Location::new(line, column);
        self
    }

    pub fn template(&mut self, pattern: &str, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.template_with(TemplateDecl::new(pattern), body)
    }

    /// Declares a template. A union pattern yields one template per
    /// alternative, all sharing the same body.
    pub fn template_with(
        &mut self,
        decl: TemplateDecl,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let location = self.location;
        let pattern = match parse_pattern_with(&decl.pattern, &self.namespaces) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                self.error(e);
                None
            }
        };
        let body = self.build_body(body);
        let Some(pattern) = pattern else {
            return self;
        };

        for alternative in pattern.split_union() {
            let priority = decl
                .priority
                .unwrap_or_else(|| alternative.default_priority());
            let id = TemplateId(self.program.templates.len());
            self.program.templates.push(Template {
                pattern: alternative,
                source: decl.pattern.clone(),
                priority,
                visibility: decl.visibility,
                recursion_entry_point: decl.recursion_entry_point,
                group: self.group,
                location,
                body,
                order: self.order,
            });
            self.order += 1;
            self.program.groups[self.group.0].templates.push(id);
        }
        self
    }

    pub fn procedure(&mut self, name: &str, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.procedure_with(name, Visibility::Private, body)
    }

    pub fn procedure_with(
        &mut self,
        name: &str,
        visibility: Visibility,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let location = self.location;
        let duplicate = self.program.groups[self.group.0]
            .procedures
            .iter()
            .any(|p| self.program.procedures[p.0].name == name);
        if duplicate {
            self.error(format!("Procedure `{}' already defined in this group", name));
        }
        let body = self.build_body(body);
        let id = ProcedureId(self.program.procedures.len());
        self.program.procedures.push(Procedure {
            name: name.to_string(),
            group: self.group,
            visibility,
            location,
            body,
        });
        self.program.groups[self.group.0].procedures.push(id);
        self
    }

    /// Declares a named group nested in the current one.
    pub fn group(&mut self, name: &str, build: impl FnOnce(&mut ProgramBuilder)) -> &mut Self {
        if self.program.group_names.contains_key(name) {
            self.error(format!("Group `{}' already defined", name));
        }
        let id = GroupId(self.program.groups.len());
        self.program.groups.push(Group {
            name: Some(name.to_string()),
            parent: Some(self.group),
            ..Group::default()
        });
        self.program.groups[self.group.0].children.push(id);
        self.program.group_names.insert(name.to_string(), id);
        self.declarations.push(Vec::new());
        self.declared_names.push(Vec::new());

        let outer = std::mem::replace(&mut self.group, id);
        build(self);
        self.group = outer;
        self
    }

    /// Declares a variable of the current group.
    pub fn variable(&mut self, name: &str, select: &str) -> &mut Self {
        let select = Some(self.expression(select));
        let kind = VariableKind::Group(self.group);
        self.declare_in_group(
            name,
            Instruction::Variable {
                name: name.to_string(),
                select,
                kind,
            },
        )
    }

    /// Declares a parameter of the current group. Parameters of the top-level
    /// group receive the values passed to the processor.
    pub fn param(&mut self, name: &str, default: Option<&str>) -> &mut Self {
        let select = default.map(|d| self.expression(d));
        let kind = VariableKind::Group(self.group);
        self.declare_in_group(
            name,
            Instruction::Param {
                name: name.to_string(),
                select,
                required: false,
                kind,
            },
        )
    }

    pub fn required_param(&mut self, name: &str) -> &mut Self {
        let kind = VariableKind::Group(self.group);
        self.declare_in_group(
            name,
            Instruction::Param {
                name: name.to_string(),
                select: None,
                required: true,
                kind,
            },
        )
    }

    fn declare_in_group(&mut self, name: &str, instruction: Instruction) -> &mut Self {
        let group = self.group.0;
        if self.declared_names[group].iter().any(|n| n == name) {
            self.error(format!("Variable `{}' already declared in this group", name));
            return self;
        }
        self.declared_names[group].push(name.to_string());
        let start = self.add_node(instruction);
        let end = self.add_node(Instruction::End { start });
        self.program.nodes[start.0].next = Some(end);
        self.program.nodes[start.0].end = Some(end);
        self.declarations[group].push(start);
        self
    }

    pub fn build(mut self) -> Result<Program, StxError> {
        self.link_group_initialisers();

        let count = self.program.groups.len();
        for index in 0..count {
            let mut ancestry = Vec::new();
            let mut current = Some(GroupId(index));
            while let Some(group) = current {
                ancestry.push(group);
                current = self.program.groups[group.0].parent;
            }
            self.program.groups[index].ancestry = ancestry;
        }

        let templates = &self.program.templates;
        let best_first = |a: &TemplateId, b: &TemplateId| {
            let (a, b) = (&templates[a.0], &templates[b.0]);
            b.priority
                .total_cmp(&a.priority)
                .then(a.order.cmp(&b.order))
        };
        for index in 0..count {
            let group = &self.program.groups[index];
            let mut candidates = group.templates.clone();
            for child in &group.children {
                candidates.extend(
                    self.program.groups[child.0]
                        .templates
                        .iter()
                        .filter(|t| templates[t.0].visibility == Visibility::Public),
                );
            }
            candidates.sort_by(best_first);
            self.program.groups[index].candidates = candidates;
        }
        let mut globals: Vec<TemplateId> = (0..templates.len())
            .map(TemplateId)
            .filter(|t| templates[t.0].visibility == Visibility::Global)
            .collect();
        globals.sort_by(best_first);
        self.program.globals = globals;

        if !self.errors.is_empty() {
            return Err(StxError::Definition(self.errors.join("; ")));
        }
        log::debug!(
            "built program: {} templates, {} procedures, {} groups, {} instructions",
            self.program.templates.len(),
            self.program.procedures.len(),
            count,
            self.program.nodes.len()
        );
        Ok(self.program)
    }

    fn link_group_initialisers(&mut self) {
        let declarations = std::mem::take(&mut self.declarations);
        for (group, nodes) in declarations.into_iter().enumerate() {
            if nodes.is_empty() {
                continue;
            }
            let start = self.add_node(Instruction::Body);
            let mut last = start;
            for declaration in nodes {
                self.program.nodes[last.0].next = Some(declaration);
                last = self.program.nodes[declaration.0].end.unwrap_or(declaration);
            }
            let end = self.add_node(Instruction::End { start });
            self.program.nodes[last.0].next = Some(end);
            self.program.nodes[start.0].end = Some(end);
            self.program.groups[group].init = Some(start);
        }
    }

    fn build_body(&mut self, body: impl FnOnce(&mut BodyBuilder<'_>)) -> NodeId {
        let start = self.add_node(Instruction::Body);
        let mut builder = BodyBuilder {
            builder: self,
            last: start,
            scopes: vec![Vec::new()],
        };
        body(&mut builder);
        let end = builder.push(Instruction::End { start });
        self.program.nodes[start.0].end = Some(end);
        start
    }

    fn add_node(&mut self, instruction: Instruction) -> NodeId {
        self.program.nodes.push(Node {
            instruction,
            location: self.location,
            next: None,
            end: None,
        });
        NodeId(self.program.nodes.len() - 1)
    }

    fn error(&mut self, message: impl Display) {
        if self.location.is_known() {
            self.errors.push(format!("{}: {}", self.location, message));
        } else {
            self.errors.push(message.to_string());
        }
    }

    fn expression(&mut self, source: &str) -> Expression {
        parse_expression_with(source, &self.namespaces).unwrap_or_else(|e| {
            self.error(e);
            Expression::Sequence(Vec::new())
        })
    }

    fn pattern(&mut self, source: &str) -> Option<Pattern> {
        parse_pattern_with(source, &self.namespaces)
            .map_err(|e| self.error(e))
            .ok()
    }

    fn avt(&mut self, source: &str) -> AttributeValueTemplate {
        parse_avt(source, &self.namespaces).unwrap_or_else(|e| {
            self.error(e);
            AttributeValueTemplate::Static(String::new())
        })
    }

    /// Resolves a literal `prefix:local` name through the declared namespaces.
    fn qname(&mut self, name: &str) -> QName {
        match name.split_once(':') {
            Some((prefix, local)) => match self.namespaces.get(prefix) {
                Some(uri) => {
                    QName::with_namespace(Some(prefix.to_string()), local, Some(uri.clone()))
                }
                None => {
                    self.error(format!("Namespace prefix '{}' not declared", prefix));
                    QName::new(local)
                }
            },
            None => QName::new(name),
        }
    }

    fn traversal(&mut self, options: &Traverse) -> Traversal {
        Traversal {
            group: options.group.clone(),
            params: options
                .params
                .iter()
                .map(|(name, select)| (name.clone(), self.expression(select)))
                .collect(),
        }
    }
}

/// Appends instructions to a template, procedure or container body.
pub struct BodyBuilder<'b> {
    builder: &'b mut ProgramBuilder,
    last: NodeId,
    /// Names declared per nesting level, to catch duplicates.
    scopes: Vec<Vec<String>>,
}

impl BodyBuilder<'_> {
    fn push(&mut self, instruction: Instruction) -> NodeId {
        let id = self.builder.add_node(instruction);
        self.builder.program.nodes[self.last.0].next = Some(id);
        self.last = id;
        id
    }

    fn container(
        &mut self,
        instruction: Instruction,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> NodeId {
        let start = self.push(instruction);
        self.scopes.push(Vec::new());
        body(self);
        self.scopes.pop();
        let end = self.push(Instruction::End { start });
        self.builder.program.nodes[start.0].end = Some(end);
        start
    }

    fn leaf_container(&mut self, instruction: Instruction) -> NodeId {
        self.container(instruction, |_| {})
    }

    fn declare(&mut self, name: &str) {
        let duplicate = self
            .scopes
            .last()
            .is_some_and(|scope| scope.iter().any(|n| n == name));
        if duplicate {
            self.builder
                .error(format!("Variable `{}' already declared", name));
        } else if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    /// Sets the source position attached to the instructions that follow.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.builder.at(line, column);
        self
    }

    pub fn process_children(&mut self) -> &mut Self {
        self.process_children_with(Traverse::new())
    }

    pub fn process_children_with(&mut self, options: Traverse) -> &mut Self {
        let traversal = self.builder.traversal(&options);
        self.push(Instruction::ProcessChildren(traversal));
        self
    }

    pub fn process_attributes(&mut self) -> &mut Self {
        self.process_attributes_with(Traverse::new())
    }

    pub fn process_attributes_with(&mut self, options: Traverse) -> &mut Self {
        let traversal = self.builder.traversal(&options);
        self.push(Instruction::ProcessAttributes(traversal));
        self
    }

    pub fn process_self(&mut self) -> &mut Self {
        self.process_self_with(Traverse::new())
    }

    pub fn process_self_with(&mut self, options: Traverse) -> &mut Self {
        let traversal = self.builder.traversal(&options);
        self.push(Instruction::ProcessSelf(traversal));
        self
    }

    pub fn process_siblings(&mut self, options: Traverse) -> &mut Self {
        let traversal = self.builder.traversal(&options);
        let while_pattern = options
            .while_pattern
            .as_deref()
            .and_then(|p| self.builder.pattern(p));
        let until_pattern = options
            .until_pattern
            .as_deref()
            .and_then(|p| self.builder.pattern(p));
        self.push(Instruction::ProcessSiblings {
            traversal,
            while_pattern,
            until_pattern,
        });
        self
    }

    pub fn call_procedure(&mut self, name: &str) -> &mut Self {
        self.call_procedure_with(name, Traverse::new())
    }

    pub fn call_procedure_with(&mut self, name: &str, options: Traverse) -> &mut Self {
        let traversal = self.builder.traversal(&options);
        self.push(Instruction::CallProcedure {
            name: name.to_string(),
            traversal,
        });
        self
    }

    /// A result element with a fixed name; attribute values are templates.
    pub fn literal_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let name = self.builder.qname(name);
        let attributes = attributes
            .iter()
            .map(|(n, v)| (self.builder.qname(n), self.builder.avt(v)))
            .collect();
        self.container(Instruction::LiteralElement { name, attributes }, body);
        self
    }

    /// A result element whose name is computed.
    pub fn element(&mut self, name: &str, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.element_ns(name, None, body)
    }

    pub fn element_ns(
        &mut self,
        name: &str,
        namespace: Option<&str>,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let name = self.builder.avt(name);
        let namespace = namespace.map(|n| self.builder.avt(n));
        let namespaces = self.builder.namespaces.clone();
        self.container(
            Instruction::Element {
                name,
                namespace,
                namespaces,
            },
            body,
        );
        self
    }

    /// Emits a start tag only; it must be closed by a matching `end_element`.
    pub fn start_element(&mut self, name: &str) -> &mut Self {
        let name = self.builder.avt(name);
        let namespaces = self.builder.namespaces.clone();
        self.push(Instruction::ElementStart {
            name,
            namespace: None,
            namespaces,
        });
        self
    }

    pub fn end_element(&mut self, name: &str) -> &mut Self {
        let name = self.builder.avt(name);
        let namespaces = self.builder.namespaces.clone();
        self.push(Instruction::ElementEnd {
            name,
            namespace: None,
            namespaces,
        });
        self
    }

    /// Adds an attribute with a selected value to the pending start tag.
    pub fn attribute(&mut self, name: &str, select: &str) -> &mut Self {
        let select = Some(self.builder.expression(select));
        self.attribute_instruction(name, select, |_| {})
    }

    /// Adds an attribute whose value is the text produced by `body`.
    pub fn attribute_content(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.attribute_instruction(name, None, body)
    }

    fn attribute_instruction(
        &mut self,
        name: &str,
        select: Option<Expression>,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let name = self.builder.avt(name);
        let namespaces = self.builder.namespaces.clone();
        self.container(
            Instruction::Attribute {
                name,
                namespace: None,
                namespaces,
                select,
            },
            body,
        );
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.push(Instruction::Text(text.to_string()));
        self
    }

    pub fn value_of(&mut self, select: &str) -> &mut Self {
        self.value_of_separated(select, " ")
    }

    pub fn value_of_separated(&mut self, select: &str, separator: &str) -> &mut Self {
        let select = self.builder.expression(select);
        let separator = self.builder.avt(separator);
        self.push(Instruction::ValueOf { select, separator });
        self
    }

    /// Shallow copy of the current node; `body` runs inside a copied element.
    pub fn copy(&mut self, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.container(Instruction::Copy { attributes: false }, body);
        self
    }

    pub fn copy_with_attributes(&mut self, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.container(Instruction::Copy { attributes: true }, body);
        self
    }

    pub fn comment(&mut self, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.container(Instruction::Comment, body);
        self
    }

    pub fn processing_instruction(
        &mut self,
        target: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let target = self.builder.avt(target);
        self.container(Instruction::ProcessingInstruction { target }, body);
        self
    }

    pub fn cdata(&mut self, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.container(Instruction::Cdata, body);
        self
    }

    /// Redirects the output of `body` to the sink resolved for `href`.
    pub fn result_document(
        &mut self,
        href: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let href = self.builder.avt(href);
        self.container(Instruction::ResultDocument { href }, body);
        self
    }

    pub fn message(&mut self, select: &str) -> &mut Self {
        let select = Some(self.builder.expression(select));
        self.leaf_container(Instruction::Message {
            select,
            terminate: false,
        });
        self
    }

    /// A message built from `body`; with `terminate` the transformation stops after it.
    pub fn message_content(
        &mut self,
        terminate: bool,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.container(
            Instruction::Message {
                select: None,
                terminate,
            },
            body,
        );
        self
    }

    pub fn variable(&mut self, name: &str, select: &str) -> &mut Self {
        self.declare(name);
        let select = Some(self.builder.expression(select));
        self.leaf_container(Instruction::Variable {
            name: name.to_string(),
            select,
            kind: VariableKind::Local,
        });
        self
    }

    /// A variable holding the text produced by `body`.
    pub fn variable_content(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.declare(name);
        self.container(
            Instruction::Variable {
                name: name.to_string(),
                select: None,
                kind: VariableKind::Local,
            },
            body,
        );
        self
    }

    /// A template or procedure parameter with an optional default.
    pub fn param(&mut self, name: &str, default: Option<&str>) -> &mut Self {
        self.declare(name);
        let select = default.map(|d| self.builder.expression(d));
        self.leaf_container(Instruction::Param {
            name: name.to_string(),
            select,
            required: false,
            kind: VariableKind::Local,
        });
        self
    }

    pub fn required_param(&mut self, name: &str) -> &mut Self {
        self.declare(name);
        self.leaf_container(Instruction::Param {
            name: name.to_string(),
            select: None,
            required: true,
            kind: VariableKind::Local,
        });
        self
    }

    pub fn param_content(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.declare(name);
        self.container(
            Instruction::Param {
                name: name.to_string(),
                select: None,
                required: false,
                kind: VariableKind::Local,
            },
            body,
        );
        self
    }

    pub fn assign(&mut self, name: &str, select: &str) -> &mut Self {
        let select = Some(self.builder.expression(select));
        self.leaf_container(Instruction::Assign {
            name: name.to_string(),
            select,
        });
        self
    }

    pub fn assign_content(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.container(
            Instruction::Assign {
                name: name.to_string(),
                select: None,
            },
            body,
        );
        self
    }

    pub fn if_(&mut self, test: &str, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        let test = self.builder.expression(test);
        self.container(
            Instruction::If {
                test,
                else_branch: None,
            },
            body,
        );
        self
    }

    pub fn if_else(
        &mut self,
        test: &str,
        then: impl FnOnce(&mut BodyBuilder<'_>),
        otherwise: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let test = self.builder.expression(test);
        let start = self.container(
            Instruction::If {
                test,
                else_branch: None,
            },
            then,
        );
        let else_start = self.container(Instruction::Else, otherwise);
        if let Instruction::If { else_branch, .. } =
            &mut self.builder.program.nodes[start.0].instruction
        {
            *else_branch = Some(else_start);
        }
        self
    }

    pub fn choose(&mut self, build: impl FnOnce(&mut ChooseBuilder<'_, '_>)) -> &mut Self {
        let choose = self.push(Instruction::Choose);
        self.scopes.push(Vec::new());
        {
            let mut branches = ChooseBuilder { body: self, choose };
            build(&mut branches);
        }
        self.scopes.pop();
        let end = self.push(Instruction::End { start: choose });
        self.builder.program.nodes[choose.0].end = Some(end);
        self
    }

    pub fn while_(&mut self, test: &str, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        let test = self.builder.expression(test);
        self.container(Instruction::While { test }, body);
        self
    }

    /// Runs `body` once per item of `select`, with the item bound to `name`.
    pub fn for_each_item(
        &mut self,
        name: &str,
        select: &str,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let select = self.builder.expression(select);
        self.container(
            Instruction::ForEachItem {
                name: name.to_string(),
                select,
            },
            |b| {
                b.declare(name);
                body(b);
            },
        );
        self
    }
}

/// Collects the `when`/`otherwise` branches of a `choose`.
pub struct ChooseBuilder<'c, 'b> {
    body: &'c mut BodyBuilder<'b>,
    choose: NodeId,
}

impl ChooseBuilder<'_, '_> {
    pub fn when(&mut self, test: &str, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        let test = self.body.builder.expression(test);
        let choose = self.choose;
        self.body.container(Instruction::When { test, choose }, body);
        self
    }

    pub fn otherwise(&mut self, body: impl FnOnce(&mut BodyBuilder<'_>)) -> &mut Self {
        self.body.container(Instruction::Otherwise, body);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instructions(program: &Program, start: NodeId) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            names.push(program.node(id).instruction.name());
            cursor = program.next(id);
        }
        names
    }

    #[test]
    fn test_chain_layout_with_containers() {
        let mut builder = ProgramBuilder::new();
        builder.template("item", |b| {
            b.literal_element("li", &[("id", "{@id}")], |b| {
                b.value_of(".");
            })
            .if_else("@x", |b| {
                b.text("x");
            }, |b| {
                b.text("y");
            })
            .process_children();
        });
        let program = builder.build().unwrap();
        let template = &program.templates()[0];
        assert_eq!(
            instructions(&program, template.body),
            vec![
                "template",
                "literal element",
                "value-of",
                "end",
                "if",
                "text",
                "end",
                "else",
                "text",
                "end",
                "process-children",
                "end"
            ]
        );
        let Instruction::If { else_branch, .. } = &program.node(NodeId(4)).instruction else {
            panic!("expected if");
        };
        assert_eq!(program.node(else_branch.unwrap()).instruction, Instruction::Else);
        assert_eq!(program.end_of(template.body), Some(NodeId(11)));
    }

    #[test]
    fn test_union_split_and_priorities() {
        let mut builder = ProgramBuilder::new();
        builder
            .template("a | b/c", |_| {})
            .template_with(TemplateDecl::new("*").priority(2.0), |_| {})
            .template("text()", |_| {});
        let program = builder.build().unwrap();

        let priorities: Vec<f64> = program.templates().iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![0.0, 0.5, 2.0, -0.5]);
        assert_eq!(program.templates()[0].body, program.templates()[1].body);

        let order: Vec<usize> = program
            .group(program.root_group())
            .candidates
            .iter()
            .map(|t| t.0)
            .collect();
        assert_eq!(order, vec![2, 1, 0, 3]);
    }

    #[test]
    fn test_group_visibility_and_lookup() {
        let mut builder = ProgramBuilder::new();
        builder.template("a", |_| {}).group("inner", |g| {
            g.template_with(TemplateDecl::new("b").visibility(Visibility::Public), |_| {})
                .template_with(TemplateDecl::new("c").visibility(Visibility::Global), |_| {})
                .template("d", |_| {})
                .procedure_with("helper", Visibility::Public, |_| {})
                .variable("count", "0");
        });
        let program = builder.build().unwrap();
        let inner = program.group_by_name("inner").unwrap();

        assert_eq!(program.group(program.root_group()).candidates.len(), 2);
        assert_eq!(program.globals.len(), 1);
        assert_eq!(program.group(inner).ancestry, vec![inner, GroupId(0)]);
        assert!(program.group(inner).init.is_some());
        assert!(program.group(program.root_group()).init.is_none());
        assert!(program.find_procedure("helper", program.root_group()).is_some());
        assert!(program.find_procedure("missing", inner).is_none());
    }

    #[test]
    fn test_errors_are_collected() {
        let mut builder = ProgramBuilder::new();
        builder.at(3, 5).template("a[", |b| {
            b.variable("x", "1").variable("x", "2").value_of("foo(");
        });
        builder.at(9, 1).template("q:a", |_| {});
        let err = builder.build().unwrap_err();
        let StxError::Definition(message) = err else {
            panic!("expected a definition error");
        };
        assert!(message.starts_with("3:5: Parse error in 'a['"));
        assert!(message.contains("Variable `x' already declared"));
        assert!(message.contains("9:1: Namespace prefix 'q' not declared"));
    }

    #[test]
    fn test_namespaced_literal_names() {
        let mut builder = ProgramBuilder::new();
        builder.namespace("h", "urn:html").template("/", |b| {
            b.literal_element("h:p", &[], |_| {});
        });
        let program = builder.build().unwrap();
        let Instruction::LiteralElement { name, .. } = &program.node(NodeId(1)).instruction else {
            panic!("expected a literal element");
        };
        assert_eq!(name.uri(), "urn:html");
        assert_eq!(name.to_string(), "h:p");
    }
}
