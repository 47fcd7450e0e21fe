//! Name flow analysis of a single function body.
//!
//! The analysis is purely syntactic: every identifier read in a statement is
//! recorded as a read, every binding target as a write. Writes inside
//! branches, loops, `try` blocks and walrus expressions are conditional.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::error::{ParserError, ParserResult};
use crate::lines::{count_code_lines, slice_lines};
use crate::parser::{
    collect_target_names, import_from_node, is_string_statement, node_span, node_text,
    SourceParser,
};
use crate::types::Span;

const DYNAMIC_SCOPE_CALLS: [&str; 4] = ["locals", "vars", "exec", "eval"];

/// Constructs that make a function body unsafe to restructure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFlags {
    pub returns: bool,
    pub yields: bool,
    pub awaits: bool,
    pub uses_global: bool,
    pub uses_nonlocal: bool,
    pub deletes: bool,
    pub nested_scope: bool,
    pub dynamic_scope: bool,
    pub zero_arg_super: bool,
    pub mangled_attribute: bool,
}

impl ScopeFlags {
    fn merge(&mut self, other: &ScopeFlags) {
        self.returns |= other.returns;
        self.yields |= other.yields;
        self.awaits |= other.awaits;
        self.uses_global |= other.uses_global;
        self.uses_nonlocal |= other.uses_nonlocal;
        self.deletes |= other.deletes;
        self.nested_scope |= other.nested_scope;
        self.dynamic_scope |= other.dynamic_scope;
        self.zero_arg_super |= other.zero_arg_super;
        self.mangled_attribute |= other.mangled_attribute;
    }

    /// Reasons the body cannot be split; `is_method` adds the class-only checks
    pub fn blockers(&self, is_method: bool) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.yields {
            reasons.push("uses yield");
        }
        if self.awaits {
            reasons.push("uses await");
        }
        if self.uses_global {
            reasons.push("uses global");
        }
        if self.uses_nonlocal {
            reasons.push("uses nonlocal");
        }
        if self.deletes {
            reasons.push("uses del");
        }
        if self.nested_scope {
            reasons.push("defines a nested function, class or lambda");
        }
        if self.dynamic_scope {
            reasons.push("inspects its own scope");
        }
        if is_method && self.zero_arg_super {
            reasons.push("calls zero-argument super()");
        }
        if is_method && self.mangled_attribute {
            reasons.push("uses name-mangled attributes");
        }
        reasons
    }
}

/// One top-level statement of a function body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyStatement {
    /// Lines of the statement node
    pub span: Span,
    /// Lines from just after the previous statement through the end of this one
    pub text_span: Span,
    pub code_lines: usize,
    pub reads: BTreeSet<String>,
    /// Names assigned on every path through the statement
    pub writes: BTreeSet<String>,
    /// Names assigned on some paths only
    pub conditional_writes: BTreeSet<String>,
    pub contains_return: bool,
    /// Statement starts on the line the previous one ends on
    pub shares_line: bool,
}

impl BodyStatement {
    /// Every name the statement may bind
    pub fn all_writes(&self) -> BTreeSet<String> {
        self.writes.union(&self.conditional_writes).cloned().collect()
    }
}

/// Analysis result for a function definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBody {
    pub name: String,
    pub is_async: bool,
    /// Parameter names in declaration order
    pub params: Vec<String>,
    /// Decorators and signature lines
    pub header_span: Span,
    pub docstring: Option<Span>,
    pub statements: Vec<BodyStatement>,
    /// Column of the body statements
    pub body_indent: usize,
    /// Column of the `def` keyword or first decorator
    pub def_indent: usize,
    /// Body written on the signature line
    pub inline_body: bool,
    pub flags: ScopeFlags,
    /// Code lines of the whole definition
    pub code_lines: usize,
}

impl FunctionBody {
    pub fn has_shared_lines(&self) -> bool {
        self.statements.iter().any(|s| s.shares_line)
    }
}

impl SourceParser {
    /// Analyze the first function defined in `source`.
    ///
    /// `source` is expected to hold a single (possibly decorated) function
    /// definition starting at column zero.
    pub fn analyze_function(&self, source: &str) -> ParserResult<FunctionBody> {
        let tree = self.parse_tree(source)?;
        let root = tree.root_node();

        let mut cursor = root.walk();
        let outer = root
            .named_children(&mut cursor)
            .find(|n| matches!(n.kind(), "function_definition" | "decorated_definition"))
            .ok_or_else(|| ParserError::Missing {
                message: "no function definition in source".to_string(),
            })?;
        let function = if outer.kind() == "decorated_definition" {
            outer
                .child_by_field_name("definition")
                .filter(|n| n.kind() == "function_definition")
                .ok_or_else(|| ParserError::Missing {
                    message: "decorated definition is not a function".to_string(),
                })?
        } else {
            outer
        };

        let missing = |what: &str| ParserError::Missing {
            message: format!("function {} not found", what),
        };
        let name = node_text(function.child_by_field_name("name").ok_or_else(|| missing("name"))?, source)
            .to_string();
        let body = function
            .child_by_field_name("body")
            .ok_or_else(|| missing("body"))?;
        let is_async = function
            .child(0)
            .map(|first| first.kind() == "async")
            .unwrap_or(false);

        let params = function
            .child_by_field_name("parameters")
            .map(|p| parameter_names(p, source))
            .unwrap_or_default();

        let colon_row = {
            let mut cursor = function.walk();
            let colon = function
                .children(&mut cursor)
                .filter(|c| c.kind() == ":")
                .last();
            colon
                .map(|c| c.start_position().row)
                .unwrap_or_else(|| body.start_position().row.saturating_sub(1))
        };
        let inline_body = body.start_position().row == colon_row;
        let header_span = Span::new(outer.start_position().row + 1, colon_row + 1);

        let mut flags = ScopeFlags::default();
        let mut statements = Vec::new();
        let mut docstring = None;
        let mut previous_end = colon_row + 1;
        let mut previous_end_row: Option<usize> = None;

        let mut cursor = body.walk();
        let children: Vec<Node<'_>> = body
            .named_children(&mut cursor)
            .filter(|n| n.kind() != "comment")
            .collect();
        for (index, child) in children.into_iter().enumerate() {
            let span = node_span(child);
            if index == 0 && is_string_statement(child) {
                docstring = Some(span);
                previous_end = span.end_line;
                previous_end_row = Some(child.end_position().row);
                continue;
            }

            let mut collector = NameCollector::new(source);
            collector.visit(child, false);
            flags.merge(&collector.flags);

            let text_span = Span::new(previous_end + 1, span.end_line);
            let shares_line = previous_end_row
                .map(|row| row == child.start_position().row)
                .unwrap_or(inline_body);

            statements.push(BodyStatement {
                span,
                text_span,
                code_lines: count_code_lines(&slice_lines(source, text_span)),
                reads: collector.reads,
                writes: collector.writes,
                conditional_writes: collector.conditional_writes,
                contains_return: collector.flags.returns,
                shares_line,
            });
            previous_end = span.end_line;
            previous_end_row = Some(child.end_position().row);
        }

        let def_span = node_span(outer);
        Ok(FunctionBody {
            name,
            is_async,
            params,
            header_span,
            docstring,
            statements,
            body_indent: body.start_position().column,
            def_indent: outer.start_position().column,
            inline_body,
            flags,
            code_lines: count_code_lines(&slice_lines(source, def_span)),
        })
    }
}

fn parameter_names(parameters: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = parameters.walk();
    for param in parameters.named_children(&mut cursor) {
        let name_node = match param.kind() {
            "identifier" => Some(param),
            "default_parameter" | "typed_default_parameter" => param.child_by_field_name("name"),
            "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                first_identifier(param)
            }
            _ => None,
        };
        if let Some(node) = name_node {
            names.push(node_text(node, source).to_string());
        }
    }
    names
}

fn first_identifier(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "identifier" {
        return Some(node);
    }
    let first = node.named_child(0)?;
    if first.kind() == "type" {
        return None;
    }
    first_identifier(first)
}

/// Collects reads, writes and scope flags of one statement
struct NameCollector<'s> {
    source: &'s str,
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
    conditional_writes: BTreeSet<String>,
    flags: ScopeFlags,
}

impl<'s> NameCollector<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            conditional_writes: BTreeSet::new(),
            flags: ScopeFlags::default(),
        }
    }

    fn text(&self, node: Node<'_>) -> String {
        node_text(node, self.source).to_string()
    }

    fn write(&mut self, name: String, conditional: bool) {
        if conditional {
            if !self.writes.contains(&name) {
                self.conditional_writes.insert(name);
            }
        } else {
            self.conditional_writes.remove(&name);
            self.writes.insert(name);
        }
    }

    fn visit_children(&mut self, node: Node<'_>, conditional: bool) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, conditional);
        }
    }

    fn visit_field(&mut self, node: Node<'_>, field: &str, conditional: bool) {
        if let Some(child) = node.child_by_field_name(field) {
            self.visit(child, conditional);
        }
    }

    fn visit(&mut self, node: Node<'_>, conditional: bool) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node);
                self.reads.insert(name);
            }
            "comment" => {}
            "attribute" => {
                if let Some(attribute) = node.child_by_field_name("attribute") {
                    let member = self.text(attribute);
                    if member.starts_with("__") && !member.ends_with("__") {
                        self.flags.mangled_attribute = true;
                    }
                }
                self.visit_field(node, "object", conditional);
            }
            "keyword_argument" => self.visit_field(node, "value", conditional),
            "assignment" => {
                self.visit_field(node, "right", conditional);
                self.visit_field(node, "type", conditional);
                if let Some(left) = node.child_by_field_name("left") {
                    if node.child_by_field_name("right").is_some() {
                        self.target(left, conditional);
                    } else {
                        self.visit(left, conditional);
                    }
                }
            }
            "augmented_assignment" => {
                self.visit_field(node, "right", conditional);
                if let Some(left) = node.child_by_field_name("left") {
                    self.visit(left, conditional);
                    self.target(left, conditional);
                }
            }
            "named_expression" => {
                self.visit_field(node, "value", conditional);
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name);
                    self.write(name, true);
                }
            }
            "for_statement" => {
                self.visit_field(node, "right", conditional);
                if let Some(left) = node.child_by_field_name("left") {
                    self.target(left, true);
                }
                self.visit_field(node, "body", true);
                self.visit_field(node, "alternative", true);
            }
            "if_statement" | "while_statement" | "try_statement" | "match_statement"
            | "conditional_expression" | "boolean_operator" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for (index, child) in children.into_iter().enumerate() {
                    // The first operand / condition always runs
                    let always = index == 0 && node.kind() != "try_statement";
                    self.visit(child, conditional || !always);
                }
            }
            "except_clause" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
                let mut after_as = false;
                for child in children {
                    if child.kind() == "as" {
                        after_as = true;
                        continue;
                    }
                    if after_as && child.kind() == "identifier" {
                        let name = self.text(child);
                        self.write(name, true);
                        after_as = false;
                        continue;
                    }
                    if child.is_named() {
                        self.visit(child, true);
                    }
                }
            }
            "as_pattern" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                let alias = node.child_by_field_name("alias");
                for child in children {
                    if Some(child) == alias {
                        self.target(child, conditional);
                    } else {
                        self.visit(child, conditional);
                    }
                }
            }
            "as_pattern_target" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.target(child, conditional);
                }
            }
            "case_pattern" => self.capture(node, conditional),
            "list_comprehension" | "set_comprehension" | "dictionary_comprehension"
            | "generator_expression" => self.comprehension(node, conditional),
            "lambda" => self.flags.nested_scope = true,
            "function_definition" | "class_definition" | "decorated_definition" => {
                self.flags.nested_scope = true;
                let inner = if node.kind() == "decorated_definition" {
                    node.child_by_field_name("definition")
                } else {
                    Some(node)
                };
                if let Some(name) = inner.and_then(|n| n.child_by_field_name("name")) {
                    let name = self.text(name);
                    self.write(name, conditional);
                }
            }
            "return_statement" => {
                self.flags.returns = true;
                self.visit_children(node, conditional);
            }
            "yield" => {
                self.flags.yields = true;
                self.visit_children(node, conditional);
            }
            "await" => {
                self.flags.awaits = true;
                self.visit_children(node, conditional);
            }
            "global_statement" => self.flags.uses_global = true,
            "nonlocal_statement" => self.flags.uses_nonlocal = true,
            "delete_statement" => {
                self.flags.deletes = true;
                self.visit_children(node, conditional);
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                if let Some(import) = import_from_node(node, self.source) {
                    for name in import.bound_names() {
                        self.write(name, conditional);
                    }
                }
            }
            "call" => {
                if let Some(function) = node.child_by_field_name("function") {
                    if function.kind() == "identifier" {
                        let callee = self.text(function);
                        if DYNAMIC_SCOPE_CALLS.contains(&callee.as_str()) {
                            self.flags.dynamic_scope = true;
                        }
                        if callee == "super" {
                            let no_args = node
                                .child_by_field_name("arguments")
                                .map(|args| args.named_child_count() == 0)
                                .unwrap_or(true);
                            if no_args {
                                self.flags.zero_arg_super = true;
                            }
                        }
                    }
                }
                self.visit_children(node, conditional);
            }
            _ => self.visit_children(node, conditional),
        }
    }

    /// Record binding targets; subscript and attribute targets read their parts
    fn target(&mut self, node: Node<'_>, conditional: bool) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node);
                self.write(name, conditional);
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "parenthesized_expression" | "list_splat_pattern" | "list_splat"
            | "as_pattern_target" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.target(child, conditional);
                }
            }
            _ => self.visit(node, conditional),
        }
    }

    /// Bind the capture names of a `case` pattern; class names, keyword
    /// names, mapping keys and dotted value patterns are reads
    fn capture(&mut self, node: Node<'_>, conditional: bool) {
        let mut cursor = node.walk();
        match node.kind() {
            "identifier" => {
                let name = self.text(node);
                self.write(name, conditional);
            }
            "dotted_name" if node.named_child_count() == 1 => {
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.capture(child, conditional);
                }
            }
            "dotted_name" | "string" | "concatenated_string" => self.visit(node, conditional),
            "class_pattern" | "keyword_pattern" => {
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for (index, child) in children.into_iter().enumerate() {
                    if index == 0 {
                        // class name reads, keyword name binds nothing
                        if node.kind() == "class_pattern" {
                            self.visit(child, conditional);
                        }
                    } else {
                        self.capture(child, conditional);
                    }
                }
            }
            "dict_pattern" => {
                let keys: Vec<Node<'_>> = node.children_by_field_name("key", &mut cursor).collect();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    if keys.contains(&child) {
                        self.visit(child, conditional);
                    } else {
                        self.capture(child, conditional);
                    }
                }
            }
            _ => {
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.capture(child, conditional);
                }
            }
        }
    }

    /// Comprehension variables are local to the comprehension
    fn comprehension(&mut self, node: Node<'_>, conditional: bool) {
        let mut inner = NameCollector::new(self.source);
        let mut bound = BTreeSet::new();

        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "for_in_clause" {
                if let Some(left) = child.child_by_field_name("left") {
                    collect_target_names(left, self.source, &mut bound);
                }
                if let Some(right) = child.child_by_field_name("right") {
                    inner.visit(right, conditional);
                }
            } else {
                inner.visit(child, conditional);
            }
        }

        self.flags.merge(&inner.flags);
        self.reads
            .extend(inner.reads.into_iter().filter(|name| !bound.contains(name)));
        for name in inner.writes {
            self.write(name, true);
        }
        for name in inner.conditional_writes {
            self.write(name, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> FunctionBody {
        SourceParser::new().analyze_function(source).unwrap()
    }

    #[test]
    fn test_params_and_docstring() {
        let body = analyze(
            "def f(a, b: int, c=1, *args, d: str = 'x', **kw):\n    \"\"\"Doc.\"\"\"\n    return a\n",
        );
        assert_eq!(body.params, vec!["a", "b", "c", "args", "d", "kw"]);
        assert_eq!(body.docstring, Some(Span::new(2, 2)));
        assert_eq!(body.statements.len(), 1);
        assert!(body.statements[0].contains_return);
        assert_eq!(body.header_span, Span::new(1, 1));
    }

    #[test]
    fn test_reads_and_writes() {
        let body = analyze(
            "def f(items):\n    total = 0\n    for item in items:\n        total += item.value\n    if total > 10:\n        flag = True\n    result = [x * total for x in items]\n    return result\n",
        );
        let statements = &body.statements;
        assert!(statements[0].writes.contains("total"));

        assert!(statements[1].reads.contains("items"));
        assert!(statements[1].reads.contains("total"));
        assert!(statements[1].conditional_writes.contains("item"));
        assert!(!statements[1].reads.contains("value"));

        assert!(statements[2].conditional_writes.contains("flag"));
        assert!(!statements[2].writes.contains("flag"));

        assert!(statements[3].writes.contains("result"));
        assert!(!statements[3].reads.contains("x"));
        assert!(statements[3].reads.contains("total"));
    }

    #[test]
    fn test_match_captures_are_conditional_writes() {
        let body = analyze(
            "def f(p, Point):\n    match p:\n        case (a, b) if a > LIMIT:\n            pass\n        case Point(x=px, y=0) as n:\n            pass\n        case [first, *rest]:\n            pass\n        case {\"k\": value, **extra}:\n            pass\n        case Color.RED:\n            pass\n    return a\n",
        );
        let statement = &body.statements[0];
        for name in ["a", "b", "px", "n", "first", "rest", "value", "extra"] {
            assert!(statement.conditional_writes.contains(name), "{}", name);
            assert!(!statement.writes.contains(name), "{}", name);
        }
        assert!(!statement.all_writes().contains("x"));
        assert!(!statement.all_writes().contains("Point"));
        assert!(statement.reads.contains("p"));
        assert!(statement.reads.contains("Point"));
        assert!(statement.reads.contains("Color"));
        assert!(statement.reads.contains("LIMIT"));
        assert!(!statement.reads.contains("rest"));
        assert!(!statement.reads.contains("value"));
    }

    #[test]
    fn test_text_span_covers_comments_between_statements() {
        let body = analyze("def f():\n    a = 1\n\n    # explain b\n    b = a\n    return b\n");
        assert_eq!(body.statements[1].span, Span::new(5, 5));
        assert_eq!(body.statements[1].text_span, Span::new(3, 5));
        assert_eq!(body.statements[1].code_lines, 1);
    }

    #[test]
    fn test_flags() {
        let body = analyze("def f(self):\n    super().run()\n    x = lambda: 1\n    return self.__secret\n");
        assert!(body.flags.zero_arg_super);
        assert!(body.flags.nested_scope);
        assert!(body.flags.mangled_attribute);
        assert_eq!(body.flags.blockers(false).len(), 1);
        assert_eq!(body.flags.blockers(true).len(), 3);

        let generator = analyze("def g():\n    yield 1\n");
        assert!(generator.flags.yields);

        let dynamic = analyze("def h():\n    return locals()\n");
        assert!(dynamic.flags.dynamic_scope);
    }

    #[test]
    fn test_shared_lines_and_inline_body() {
        let body = analyze("def f():\n    a = 1; b = 2\n    return a + b\n");
        assert!(body.has_shared_lines());

        let inline = analyze("def f(): return 1\n");
        assert!(inline.inline_body);
    }

    #[test]
    fn test_decorated_and_async() {
        let body = analyze("@cache\nasync def fetch(url):\n    data = await get(url)\n    return data\n");
        assert!(body.is_async);
        assert!(body.flags.awaits);
        assert_eq!(body.header_span, Span::new(1, 2));
    }

    #[test]
    fn test_missing_function() {
        let err = SourceParser::new().analyze_function("x = 1\n").unwrap_err();
        assert!(matches!(err, ParserError::Missing { .. }));
    }
}
