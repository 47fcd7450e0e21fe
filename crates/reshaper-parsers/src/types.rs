//! Common syntax tree types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Inclusive line range in source code (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    /// Create a new span, clamping `end_line` so it never precedes `start_line`
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line: end_line.max(start_line),
        }
    }

    /// Number of physical lines covered
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    /// Check if this span contains a line
    pub fn contains(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_line, self.end_line)
    }
}

/// Kind of import statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportKind {
    /// `import a.b as c`
    Import,
    /// `from a import b`
    From,
    /// `from __future__ import x`
    Future,
}

/// A single name brought in by an import
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportedName {
    /// The name this import binds in the importing module
    pub fn bound_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }

    /// Render as it appears in source
    pub fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} as {}", self.name, alias),
            None => self.name.clone(),
        }
    }
}

/// A top-level import statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatement {
    pub kind: ImportKind,
    /// Module of a `from` import, without leading dots. Empty for plain imports
    /// and for `from . import x`.
    pub module: String,
    /// Number of leading dots of a relative import
    pub level: usize,
    /// Imported names; `*` for a wildcard import
    pub names: Vec<ImportedName>,
    /// Verbatim statement text
    pub text: String,
    pub span: Span,
}

impl ImportStatement {
    /// Whether this is a relative import
    pub fn is_relative(&self) -> bool {
        self.level > 0
    }

    /// Dotted modules this statement pulls in
    pub fn target_modules(&self) -> Vec<String> {
        match self.kind {
            ImportKind::Import => self.names.iter().map(|n| n.name.clone()).collect(),
            ImportKind::From | ImportKind::Future => vec![self.module.clone()],
        }
    }

    /// Names bound in the importing module
    pub fn bound_names(&self) -> BTreeSet<String> {
        self.names
            .iter()
            .filter(|n| n.name != "*")
            .map(|n| n.bound_name().to_string())
            .collect()
    }

    /// Each bound name with what it refers to, e.g. `from .a import b as c`
    /// binds `c` to `.a:b`
    pub fn bindings(&self) -> BTreeMap<String, String> {
        self.names
            .iter()
            .filter(|n| n.name != "*")
            .map(|n| {
                let origin = match (self.kind, &n.alias) {
                    (ImportKind::Import, Some(_)) => n.name.clone(),
                    (ImportKind::Import, None) => n.bound_name().to_string(),
                    (ImportKind::From | ImportKind::Future, _) => {
                        format!("{}:{}", self.written_module(), n.name)
                    }
                };
                (n.bound_name().to_string(), origin)
            })
            .collect()
    }

    /// The module part of a `from` import as written, dots included
    pub fn written_module(&self) -> String {
        format!("{}{}", ".".repeat(self.level), self.module)
    }

    /// Root package of the imported module, if absolute
    pub fn root_package(&self) -> Option<String> {
        if self.is_relative() {
            return None;
        }
        let module = match self.kind {
            ImportKind::Import => self.names.first().map(|n| n.name.as_str()),
            ImportKind::From | ImportKind::Future => Some(self.module.as_str()),
        }?;
        module.split('.').next().map(str::to_string)
    }
}

/// Kind of top-level definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Function,
    AsyncFunction,
    Class,
}

impl DefinitionKind {
    pub fn is_callable(&self) -> bool {
        matches!(self, DefinitionKind::Function | DefinitionKind::AsyncFunction)
    }
}

/// A function or class definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub kind: DefinitionKind,
    /// Lines of the definition including decorators
    pub span: Span,
    /// Line of the `def` / `class` keyword
    pub header_line: usize,
    /// Lines of the body block
    pub body_span: Span,
    /// Column of the `def` / `class` keyword (or first decorator)
    pub indent: usize,
    /// Methods for classes, empty for functions
    pub methods: Vec<Definition>,
    /// Identifiers referenced anywhere inside the definition
    pub referenced_names: BTreeSet<String>,
}

/// What a top-level item is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// Module docstring (first statement, a string literal)
    Docstring,
    Import(ImportStatement),
    Definition(Definition),
    /// Any other top-level statement
    Statement,
}

/// One top-level item of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleItem {
    pub kind: ItemKind,
    /// Lines of the syntax node
    pub span: Span,
    /// Lines including comments attached directly above the node
    pub text_span: Span,
    /// Names this item binds at module level
    pub bound_names: BTreeSet<String>,
    /// Identifiers this item reads
    pub referenced_names: BTreeSet<String>,
}

impl ModuleItem {
    pub fn as_import(&self) -> Option<&ImportStatement> {
        match &self.kind {
            ItemKind::Import(import) => Some(import),
            _ => None,
        }
    }

    pub fn as_definition(&self) -> Option<&Definition> {
        match &self.kind {
            ItemKind::Definition(definition) => Some(definition),
            _ => None,
        }
    }
}

/// A parsed Python module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedModule {
    pub source: String,
    pub items: Vec<ModuleItem>,
}

impl ParsedModule {
    /// Source split into lines (without terminators)
    pub fn lines(&self) -> Vec<&str> {
        self.source.lines().collect()
    }

    /// Text of a span, newline-terminated
    pub fn text_of(&self, span: Span) -> String {
        crate::lines::slice_lines(&self.source, span)
    }

    pub fn imports(&self) -> impl Iterator<Item = &ImportStatement> {
        self.items.iter().filter_map(ModuleItem::as_import)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.items.iter().filter_map(ModuleItem::as_definition)
    }

    /// Top-level function definitions
    pub fn functions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions().filter(|d| d.kind.is_callable())
    }

    /// Find a top-level definition by name
    pub fn find_definition(&self, name: &str) -> Option<&Definition> {
        self.definitions().find(|d| d.name == name)
    }

    /// Find a function by `name` or `Class.method`
    pub fn find_callable(&self, qualified: &str) -> Option<&Definition> {
        match qualified.split_once('.') {
            Some((class, method)) => self
                .find_definition(class)
                .filter(|d| d.kind == DefinitionKind::Class)
                .and_then(|c| c.methods.iter().find(|m| m.name == method)),
            None => self.find_definition(qualified).filter(|d| d.kind.is_callable()),
        }
    }

    /// Top-level item index for a definition name
    pub fn item_index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.as_definition().map(|d| d.name == name).unwrap_or(false))
    }

    pub fn docstring(&self) -> Option<&ModuleItem> {
        self.items
            .first()
            .filter(|item| matches!(item.kind, ItemKind::Docstring))
    }

    /// Every name bound at module level
    pub fn top_level_names(&self) -> BTreeSet<String> {
        self.items
            .iter()
            .flat_map(|item| item.bound_names.iter().cloned())
            .collect()
    }

    /// Index range of the leading import block: imports that follow only a
    /// docstring and are separated by nothing but blank lines
    pub fn leading_import_block(&self) -> Option<(usize, usize)> {
        let lines = self.lines();
        let start = self
            .items
            .iter()
            .position(|item| !matches!(item.kind, ItemKind::Docstring))?;
        self.items[start].as_import()?;

        let mut end = start;
        for index in start + 1..self.items.len() {
            let item = &self.items[index];
            if item.as_import().is_none() {
                break;
            }
            let previous_end = self.items[end].span.end_line;
            let gap_is_blank = (previous_end + 1..item.span.start_line)
                .all(|line| lines.get(line - 1).map(|l| l.trim().is_empty()).unwrap_or(true));
            if !gap_is_blank {
                break;
            }
            end = index;
        }
        Some((start, end))
    }

    /// Total number of physical lines
    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }
}
