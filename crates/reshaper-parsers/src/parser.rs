//! tree-sitter backed Python parser producing [`ParsedModule`] values

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

use crate::error::{ParserError, ParserResult};
use crate::lines::leading_indent;
use crate::types::{
    Definition, DefinitionKind, ImportKind, ImportStatement, ImportedName, ItemKind, ModuleItem,
    ParsedModule, Span,
};

/// Python source parser.
///
/// A fresh tree-sitter parser is created per call, so a `SourceParser` can be
/// shared freely across threads.
#[derive(Debug, Clone)]
pub struct SourceParser {
    language: tree_sitter::Language,
}

impl SourceParser {
    /// Create a new parser for Python source
    pub fn new() -> Self {
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Parse source into a concrete syntax tree, rejecting invalid code
    pub fn parse_tree(&self, source: &str) -> ParserResult<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| ParserError::Language {
                message: e.to_string(),
            })?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ParserError::Language {
                message: "parser produced no tree".to_string(),
            })?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(first_error(root));
        }
        Ok(tree)
    }

    /// Check that source is syntactically valid
    pub fn check_syntax(&self, source: &str) -> ParserResult<()> {
        self.parse_tree(source).map(|_| ())
    }

    /// Parse a module
    pub fn parse(&self, source: &str) -> ParserResult<ParsedModule> {
        let tree = self.parse_tree(source)?;
        let root = tree.root_node();
        let lines: Vec<&str> = source.lines().collect();

        let mut items = Vec::new();
        let mut previous_end = 0usize;
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if child.kind() == "comment" {
                continue;
            }
            let item = build_item(child, source, &lines, previous_end, items.is_empty());
            previous_end = item.span.end_line;
            items.push(item);
        }

        debug!(items = items.len(), "Parsed module");
        Ok(ParsedModule {
            source: source.to_string(),
            items,
        })
    }

    /// Read and parse a file, attaching the path to syntax errors
    pub fn parse_file(&self, path: &Path) -> ParserResult<ParsedModule> {
        let bytes = std::fs::read(path)?;
        let source = String::from_utf8(bytes)?;
        self.parse(&source).map_err(|e| e.with_path(path))
    }
}

impl Default for SourceParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first ERROR or MISSING node in document order
fn first_error(root: Node<'_>) -> ParserError {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let position = node.start_position();
            let message = if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "invalid syntax".to_string()
            };
            return ParserError::Syntax {
                path: None,
                line: position.row + 1,
                column: position.column + 1,
                message,
            };
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            if child.has_error() || child.is_missing() || child.is_error() {
                stack.push(child);
            }
        }
    }

    let position = root.start_position();
    ParserError::Syntax {
        path: None,
        line: position.row + 1,
        column: position.column + 1,
        message: "invalid syntax".to_string(),
    }
}

/// 1-based inclusive line span of a node.
///
/// tree-sitter reports the end of a block that closes with a newline as
/// column 0 of the following row.
pub(crate) fn node_span(node: Node<'_>) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start.row {
        end.row - 1
    } else {
        end.row
    };
    Span::new(start.row + 1, end_row + 1)
}

pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

fn build_item(
    node: Node<'_>,
    source: &str,
    lines: &[&str],
    previous_end: usize,
    first: bool,
) -> ModuleItem {
    let span = node_span(node);
    let text_span = Span::new(
        attached_comment_start(lines, span.start_line, node.start_position().column, previous_end),
        span.end_line,
    );

    let kind = match node.kind() {
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            match import_from_node(node, source) {
                Some(import) => ItemKind::Import(import),
                None => ItemKind::Statement,
            }
        }
        "function_definition" | "class_definition" | "decorated_definition" => {
            match definition_from_node(node, source) {
                Some(definition) => ItemKind::Definition(definition),
                None => ItemKind::Statement,
            }
        }
        "expression_statement" if first && is_string_statement(node) => ItemKind::Docstring,
        _ => ItemKind::Statement,
    };

    let bound_names = match &kind {
        ItemKind::Import(import) => import.bound_names(),
        ItemKind::Definition(definition) => BTreeSet::from([definition.name.clone()]),
        ItemKind::Docstring => BTreeSet::new(),
        ItemKind::Statement => statement_bindings(node, source),
    };
    let referenced_names = match &kind {
        ItemKind::Definition(definition) => definition.referenced_names.clone(),
        ItemKind::Import(_) | ItemKind::Docstring => BTreeSet::new(),
        ItemKind::Statement => referenced_identifiers(node, source),
    };

    ModuleItem {
        kind,
        span,
        text_span,
        bound_names,
        referenced_names,
    }
}

/// Walk upward from `start_line` over comment lines at the same indentation
fn attached_comment_start(lines: &[&str], start_line: usize, column: usize, floor: usize) -> usize {
    let mut start = start_line;
    while start > floor + 1 {
        let candidate = match lines.get(start - 2) {
            Some(line) => *line,
            None => break,
        };
        let trimmed = candidate.trim_start();
        if trimmed.starts_with('#') && leading_indent(candidate) == column {
            start -= 1;
        } else {
            break;
        }
    }
    start
}

pub(crate) fn is_string_statement(node: Node<'_>) -> bool {
    node.kind() == "expression_statement"
        && node.named_child_count() == 1
        && node
            .named_child(0)
            .map(|child| matches!(child.kind(), "string" | "concatenated_string"))
            .unwrap_or(false)
}

/// Build an [`ImportStatement`] from an import node
pub(crate) fn import_from_node(node: Node<'_>, source: &str) -> Option<ImportStatement> {
    let span = node_span(node);
    let text = node_text(node, source).to_string();

    match node.kind() {
        "import_statement" => {
            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.children_by_field_name("name", &mut cursor) {
                names.push(imported_name(child, source));
            }
            Some(ImportStatement {
                kind: ImportKind::Import,
                module: String::new(),
                level: 0,
                names,
                text,
                span,
            })
        }
        "future_import_statement" => {
            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.children_by_field_name("name", &mut cursor) {
                names.push(imported_name(child, source));
            }
            Some(ImportStatement {
                kind: ImportKind::Future,
                module: "__future__".to_string(),
                level: 0,
                names,
                text,
                span,
            })
        }
        "import_from_statement" => {
            let module_node = node.child_by_field_name("module_name")?;
            let (module, level) = if module_node.kind() == "relative_import" {
                let written = node_text(module_node, source);
                let level = written.chars().take_while(|c| *c == '.').count();
                (written[level..].trim().to_string(), level)
            } else {
                (node_text(module_node, source).to_string(), 0)
            };

            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "wildcard_import" {
                    names.push(ImportedName {
                        name: "*".to_string(),
                        alias: None,
                    });
                }
            }
            let mut cursor = node.walk();
            for child in node.children_by_field_name("name", &mut cursor) {
                names.push(imported_name(child, source));
            }

            let kind = if module == "__future__" && level == 0 {
                ImportKind::Future
            } else {
                ImportKind::From
            };
            Some(ImportStatement {
                kind,
                module,
                level,
                names,
                text,
                span,
            })
        }
        _ => None,
    }
}

fn imported_name(node: Node<'_>, source: &str) -> ImportedName {
    if node.kind() == "aliased_import" {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default();
        let alias = node
            .child_by_field_name("alias")
            .map(|n| node_text(n, source).to_string());
        ImportedName { name, alias }
    } else {
        ImportedName {
            name: node_text(node, source).to_string(),
            alias: None,
        }
    }
}

/// Build a [`Definition`] from a function, class or decorated definition node
pub(crate) fn definition_from_node(node: Node<'_>, source: &str) -> Option<Definition> {
    let outer = node;
    let inner = if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition")?
    } else {
        node
    };

    let name = node_text(inner.child_by_field_name("name")?, source).to_string();
    let body = inner.child_by_field_name("body")?;

    let kind = match inner.kind() {
        "class_definition" => DefinitionKind::Class,
        "function_definition" => {
            let is_async = inner
                .child(0)
                .map(|first| first.kind() == "async")
                .unwrap_or(false);
            if is_async {
                DefinitionKind::AsyncFunction
            } else {
                DefinitionKind::Function
            }
        }
        _ => return None,
    };

    let methods = if kind == DefinitionKind::Class {
        let mut methods = Vec::new();
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            if matches!(child.kind(), "function_definition" | "decorated_definition") {
                if let Some(method) = definition_from_node(child, source) {
                    if method.kind.is_callable() {
                        methods.push(method);
                    }
                }
            }
        }
        methods
    } else {
        Vec::new()
    };

    Some(Definition {
        name,
        kind,
        span: node_span(outer),
        header_line: inner.start_position().row + 1,
        body_span: node_span(body),
        indent: outer.start_position().column,
        methods,
        referenced_names: referenced_identifiers(outer, source),
    })
}

/// Every identifier read inside `node`, excluding attribute members, keyword
/// argument names and definition names
pub(crate) fn referenced_identifiers(node: Node<'_>, source: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_identifiers(node, source, &mut names);
    names
}

fn collect_identifiers(node: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    match node.kind() {
        "identifier" => {
            names.insert(node_text(node, source).to_string());
            return;
        }
        "attribute" => {
            if let Some(object) = node.child_by_field_name("object") {
                collect_identifiers(object, source, names);
            }
            return;
        }
        "keyword_argument" => {
            if let Some(value) = node.child_by_field_name("value") {
                collect_identifiers(value, source, names);
            }
            return;
        }
        "import_statement" | "import_from_statement" | "future_import_statement" | "comment" => {
            return;
        }
        _ => {}
    }

    let skip_name = matches!(node.kind(), "function_definition" | "class_definition");
    let name_node = if skip_name {
        node.child_by_field_name("name")
    } else {
        None
    };

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if Some(child) == name_node {
            continue;
        }
        collect_identifiers(child, source, names);
    }
}

/// Names a non-definition top-level statement binds at module level
fn statement_bindings(node: Node<'_>, source: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_bindings(node, source, &mut names);
    names
}

fn collect_bindings(node: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    match node.kind() {
        "assignment" | "augmented_assignment" => {
            if let Some(left) = node.child_by_field_name("left") {
                collect_target_names(left, source, names);
            }
            if let Some(right) = node.child_by_field_name("right") {
                collect_bindings(right, source, names);
            }
        }
        "for_statement" => {
            if let Some(left) = node.child_by_field_name("left") {
                collect_target_names(left, source, names);
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_bindings(child, source, names);
            }
        }
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            if let Some(import) = import_from_node(node, source) {
                names.extend(import.bound_names());
            }
        }
        "function_definition" | "class_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                names.insert(node_text(name, source).to_string());
            }
        }
        "lambda" | "list_comprehension" | "set_comprehension" | "dictionary_comprehension"
        | "generator_expression" => {}
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_bindings(child, source, names);
            }
        }
    }
}

pub(crate) fn collect_target_names(node: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    match node.kind() {
        "identifier" => {
            names.insert(node_text(node, source).to_string());
        }
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
        | "parenthesized_expression" | "list_splat_pattern" | "list_splat" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_target_names(child, source, names);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#""""Sample module."""

import os
from typing import List as L
from . import sibling
from ..pkg.mod import a, b

LIMIT = 10


# Validates the input.
@decorator
def validate(value):
    return value > LIMIT


class Store:
    def save(self, item):
        os.write(item)

    async def load(self):
        return await sibling.fetch()


if __name__ == "__main__":
    validate(3)
"#;

    #[test]
    fn test_parse_items() -> ParserResult<()> {
        let module = SourceParser::new().parse(SAMPLE)?;

        assert!(module.docstring().is_some());
        assert_eq!(module.imports().count(), 4);
        let names: Vec<_> = module.definitions().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["validate", "Store"]);

        let top = module.top_level_names();
        assert!(top.contains("LIMIT"));
        assert!(top.contains("L"));
        assert!(top.contains("sibling"));
        Ok(())
    }

    #[test]
    fn test_relative_import_levels() -> ParserResult<()> {
        let module = SourceParser::new().parse(SAMPLE)?;
        let imports: Vec<_> = module.imports().collect();

        assert_eq!(imports[2].level, 1);
        assert_eq!(imports[2].module, "");
        assert_eq!(imports[3].level, 2);
        assert_eq!(imports[3].module, "pkg.mod");
        assert_eq!(imports[3].names.len(), 2);
        assert_eq!(imports[1].names[0].alias.as_deref(), Some("L"));
        Ok(())
    }

    #[test]
    fn test_definition_spans_include_decorators_and_comments() -> ParserResult<()> {
        let module = SourceParser::new().parse(SAMPLE)?;
        let index = module.item_index_of("validate").unwrap();
        let item = &module.items[index];
        let definition = item.as_definition().unwrap();

        assert_eq!(definition.span.start_line, 12);
        assert_eq!(definition.header_line, 13);
        assert_eq!(item.text_span.start_line, 11);
        assert!(definition.referenced_names.contains("LIMIT"));
        assert!(!definition.referenced_names.contains("validate"));
        Ok(())
    }

    #[test]
    fn test_class_methods() -> ParserResult<()> {
        let module = SourceParser::new().parse(SAMPLE)?;
        let store = module.find_definition("Store").unwrap();

        assert_eq!(store.methods.len(), 2);
        assert_eq!(store.methods[1].kind, DefinitionKind::AsyncFunction);
        assert!(module.find_callable("Store.save").is_some());
        assert!(module.find_callable("Store.missing").is_none());
        Ok(())
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let result = SourceParser::new().parse("def broken(:\n    pass\n");
        match result {
            Err(ParserError::Syntax { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_import_block() -> ParserResult<()> {
        let module = SourceParser::new().parse(SAMPLE)?;
        assert_eq!(module.leading_import_block(), Some((1, 4)));
        Ok(())
    }

    #[test]
    fn test_parse_file_attaches_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.py");
        std::fs::write(&path, "x = (\n").unwrap();

        let err = SourceParser::new().parse_file(&path).unwrap_err();
        assert!(err.is_syntax());
        assert!(err.to_string().contains("bad.py"));
    }
}
