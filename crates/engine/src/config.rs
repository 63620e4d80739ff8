/// What the built-in default rule copies when no template matches a node.
/// Unmatched elements are always descended into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassThrough {
    /// Nothing is copied.
    Nothing,
    /// Only text nodes are copied.
    Text,
    /// Elements, attributes and text are copied.
    #[default]
    Markup,
    /// Comments and processing instructions are copied as well.
    All,
}

impl PassThrough {
    pub fn copies_text(self) -> bool {
        self != PassThrough::Nothing
    }

    pub fn copies_markup(self) -> bool {
        matches!(self, PassThrough::Markup | PassThrough::All)
    }

    pub fn copies_everything(self) -> bool {
        self == PassThrough::All
    }
}

/// Options for a single transformation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub pass_through: PassThrough,
    /// Drop text nodes that consist only of whitespace.
    pub strip_space: bool,
    /// If true, every reported error aborts the run.
    pub strict: bool,
    /// Maximum depth of nested procedure calls within one activation.
    pub recursion_limit: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pass_through: PassThrough::default(),
            strip_space: false,
            strict: false,
            recursion_limit: 512,
        }
    }
}

impl ProcessorConfig {
    pub fn with_pass_through(mut self, pass_through: PassThrough) -> Self {
        self.pass_through = pass_through;
        self
    }

    pub fn with_strip_space(mut self, strip_space: bool) -> Self {
        self.strip_space = strip_space;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_recursion_limit(mut self, recursion_limit: usize) -> Self {
        self.recursion_limit = recursion_limit;
        self
    }
}
