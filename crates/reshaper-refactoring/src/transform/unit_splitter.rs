//! Extract statement ranges of an oversized function into private helpers
//!
//! Only whole top-level statements of the body move. A range boundary is
//! placed only where every name flowing across it is definitely bound, so
//! helper parameters and return values can never be unbound. Statements
//! containing `return` never move.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use reshaper_parsers::lines::{dedent, indent, slice_lines};
use reshaper_parsers::{count_code_lines, BodyStatement, DefinitionKind, FunctionBody, SourceParser, Span};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RefactoringError, Result};

const HELPER_INDENT: usize = 4;
/// Helper `def` line plus its `return` line
const HELPER_OVERHEAD: usize = 2;

/// A generated helper function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperUnit {
    pub name: String,
    pub params: Vec<String>,
    pub returns: Vec<String>,
    /// Source at column zero
    pub source: String,
}

/// Result of splitting one unit's source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSplit {
    /// Rewritten unit source at column zero
    pub source: String,
    pub helpers: Vec<HelperUnit>,
}

/// What a unit split changed in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSplitResult {
    pub file: PathBuf,
    pub unit: String,
    pub helpers: Vec<String>,
    pub lines_before: usize,
    pub lines_after: usize,
}

/// Splits oversized callable units
#[derive(Debug, Clone)]
pub struct UnitSplitter {
    parser: SourceParser,
}

/// Name sets at each statement boundary
struct Flow {
    /// Names certainly bound before statement `i`
    definite: Vec<BTreeSet<String>>,
    /// Names possibly bound before statement `i`
    maybe: Vec<BTreeSet<String>>,
    /// Names read by statement `i` or later
    read_after: Vec<BTreeSet<String>>,
}

impl Flow {
    fn new(body: &FunctionBody) -> Self {
        let count = body.statements.len();
        let params: BTreeSet<String> = body.params.iter().cloned().collect();

        let mut definite = vec![params.clone()];
        let mut maybe = vec![params];
        for statement in &body.statements {
            let mut next_definite = definite[definite.len() - 1].clone();
            next_definite.extend(statement.writes.iter().cloned());
            let mut next_maybe = maybe[maybe.len() - 1].clone();
            next_maybe.extend(statement.all_writes());
            definite.push(next_definite);
            maybe.push(next_maybe);
        }

        let mut read_after = vec![BTreeSet::new(); count + 1];
        for index in (0..count).rev() {
            let mut names = read_after[index + 1].clone();
            names.extend(body.statements[index].reads.iter().cloned());
            read_after[index] = names;
        }

        Self {
            definite,
            maybe,
            read_after,
        }
    }

    /// Every live name at boundary `i` is definitely bound
    fn boundary_ok(&self, index: usize) -> bool {
        self.read_after[index]
            .intersection(&self.maybe[index])
            .all(|name| self.definite[index].contains(name))
    }
}

impl UnitSplitter {
    pub fn new(parser: SourceParser) -> Self {
        Self { parser }
    }

    /// Split a unit given as column-zero source
    ///
    /// Returns the source unchanged with no helpers when the unit is within
    /// the limit.
    pub fn split(&self, unit_source: &str, unit_name: &str, limit: usize) -> Result<UnitSplit> {
        self.split_reserving(unit_source, unit_name, limit, &BTreeSet::new())
    }

    /// Split a unit, never generating a helper named in `reserved`
    pub fn split_reserving(
        &self,
        unit_source: &str,
        unit_name: &str,
        limit: usize,
        reserved: &BTreeSet<String>,
    ) -> Result<UnitSplit> {
        let body = self
            .parser
            .analyze_function(unit_source)
            .map_err(|e| RefactoringError::Unsplittable {
                unit: unit_name.to_string(),
                reason: e.to_string(),
            })?;

        if body.code_lines <= limit {
            return Ok(UnitSplit {
                source: unit_source.to_string(),
                helpers: Vec::new(),
            });
        }

        let unsplittable = |reason: String| RefactoringError::Unsplittable {
            unit: unit_name.to_string(),
            reason,
        };
        let is_method = unit_name.contains('.');
        let blockers = body.flags.blockers(is_method);
        if !blockers.is_empty() {
            return Err(unsplittable(blockers.join(", ")));
        }
        if body.inline_body || body.has_shared_lines() {
            return Err(unsplittable("statements share a line".to_string()));
        }
        if limit <= HELPER_OVERHEAD + 1 {
            return Err(unsplittable(format!("limit {} leaves no room for helpers", limit)));
        }

        let ranges = self.choose_ranges(unit_source, &body, limit);
        if ranges.is_empty() {
            return Err(unsplittable("no statement range can be extracted safely".to_string()));
        }

        let flow = Flow::new(&body);
        let mut taken: BTreeSet<String> = reserved.clone();
        taken.insert(body.name.clone());
        for statement in &body.statements {
            taken.extend(statement.reads.iter().cloned());
            taken.extend(statement.all_writes());
        }
        taken.extend(body.params.iter().cloned());

        let stem = unit_name
            .rsplit('.')
            .next()
            .unwrap_or(unit_name)
            .trim_start_matches('_')
            .to_string();
        let mut counter = 0;
        let mut helpers = Vec::new();
        let mut calls = Vec::new();
        for (start, end) in &ranges {
            let name = loop {
                counter += 1;
                let candidate = format!("_{}_part_{}", stem, counter);
                if !taken.contains(&candidate) {
                    taken.insert(candidate.clone());
                    break candidate;
                }
            };
            let (helper, call) = self.build_helper(unit_source, &body, &flow, *start, *end, name);
            helpers.push(helper);
            calls.push(call);
        }

        let source = rebuild_unit(unit_source, &body, &ranges, &calls);
        let combined = std::iter::once(source.clone())
            .chain(helpers.iter().map(|h| h.source.clone()))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.parser
            .check_syntax(&combined)
            .map_err(|e| unsplittable(format!("split output does not parse: {}", e)))?;

        let remaining = count_code_lines(&source);
        if remaining > limit {
            warn!(unit = unit_name, remaining, limit, "Unit still exceeds the limit after splitting");
        }
        debug!(unit = unit_name, helpers = helpers.len(), "Split unit");
        Ok(UnitSplit { source, helpers })
    }

    fn movable(&self, unit_source: &str, body: &FunctionBody, statement: &BodyStatement, capacity: usize) -> bool {
        if statement.contains_return || statement.code_lines > capacity {
            return false;
        }
        let text = slice_lines(unit_source, statement.text_span);
        if dedent(&text, body.body_indent).is_none() {
            return false;
        }
        // multi-line strings would change if re-indented
        let has_triple_quote = text.contains("\"\"\"") || text.contains("'''");
        !(has_triple_quote && body.body_indent != HELPER_INDENT)
    }

    /// Greedy contiguous ranges `[start, end)` of movable statements
    fn choose_ranges(&self, unit_source: &str, body: &FunctionBody, limit: usize) -> Vec<(usize, usize)> {
        let capacity = limit - HELPER_OVERHEAD;
        let flow = Flow::new(body);
        let count = body.statements.len();
        let movable: Vec<bool> = body
            .statements
            .iter()
            .map(|s| self.movable(unit_source, body, s, capacity))
            .collect();

        let mut remaining = body.code_lines;
        let mut ranges = Vec::new();
        let mut start = 0;
        while start < count && remaining > limit {
            if !movable[start] || !flow.boundary_ok(start) {
                start += 1;
                continue;
            }

            let mut best = None;
            let mut lines = 0;
            for end in start + 1..=count {
                if !movable[end - 1] {
                    break;
                }
                lines += body.statements[end - 1].code_lines;
                if lines > capacity {
                    break;
                }
                if lines >= 2 && flow.boundary_ok(end) {
                    best = Some((end, lines));
                }
            }

            match best {
                Some((end, lines)) => {
                    ranges.push((start, end));
                    remaining = remaining + 1 - lines;
                    start = end;
                }
                None => start += 1,
            }
        }
        ranges
    }

    /// Helper source and the call line replacing the range
    fn build_helper(
        &self,
        unit_source: &str,
        body: &FunctionBody,
        flow: &Flow,
        start: usize,
        end: usize,
        name: String,
    ) -> (HelperUnit, String) {
        let statements = &body.statements[start..end];
        let reads: BTreeSet<String> = statements.iter().flat_map(|s| s.reads.iter().cloned()).collect();
        let writes: BTreeSet<String> = statements.iter().flat_map(|s| s.all_writes()).collect();

        let returns: Vec<String> = writes
            .intersection(&flow.read_after[end])
            .cloned()
            .collect();
        let needed: BTreeSet<String> = reads
            .iter()
            .chain(returns.iter())
            .filter(|n| flow.maybe[start].contains(*n))
            .cloned()
            .collect();
        let mut params: Vec<String> = body
            .params
            .iter()
            .filter(|p| needed.contains(*p))
            .cloned()
            .collect();
        params.extend(needed.iter().filter(|n| !body.params.contains(n)).cloned());

        let span = Span::new(
            statements[0].text_span.start_line,
            statements[statements.len() - 1].span.end_line,
        );
        let text = slice_lines(unit_source, span);
        let moved = dedent(&text, body.body_indent).unwrap_or(text);

        let mut source = format!("def {}({}):\n", name, params.join(", "));
        source.push_str(&indent(&moved, HELPER_INDENT));
        if !returns.is_empty() {
            source.push_str(&format!("{}return {}\n", " ".repeat(HELPER_INDENT), returns.join(", ")));
        }

        let call = format!("{}({})", name, params.join(", "));
        let call_line = if returns.is_empty() {
            format!("{}{}\n", " ".repeat(body.body_indent), call)
        } else {
            format!("{}{} = {}\n", " ".repeat(body.body_indent), returns.join(", "), call)
        };

        (
            HelperUnit {
                name,
                params,
                returns,
                source,
            },
            call_line,
        )
    }

    /// Split a unit inside a file and write the result
    ///
    /// # Arguments
    ///
    /// * `file` - Source file
    /// * `qualified_name` - `function` or `Class.method`
    /// * `limit` - Maximum code lines per unit
    pub fn split_in_file(&self, file: &Path, qualified_name: &str, limit: usize) -> Result<UnitSplitResult> {
        let source = fs::read_to_string(file)?;
        let module = self
            .parser
            .parse(&source)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        let definition = module
            .find_callable(qualified_name)
            .ok_or_else(|| RefactoringError::UnitNotFound(format!("{} in {}", qualified_name, file.display())))?;

        let unit_text = module.text_of(definition.span);
        let unit_source = dedent(&unit_text, definition.indent).ok_or_else(|| RefactoringError::Unsplittable {
            unit: qualified_name.to_string(),
            reason: "unit text is not uniformly indented".to_string(),
        })?;
        let lines_before = count_code_lines(&unit_source);

        let mut reserved = module.top_level_names();
        for class in module.definitions().filter(|d| d.kind == DefinitionKind::Class) {
            reserved.extend(class.methods.iter().map(|m| m.name.clone()));
        }
        let split = self.split_reserving(&unit_source, qualified_name, limit, &reserved)?;
        if split.helpers.is_empty() {
            return Ok(UnitSplitResult {
                file: file.to_path_buf(),
                unit: qualified_name.to_string(),
                helpers: Vec::new(),
                lines_before,
                lines_after: lines_before,
            });
        }

        let insert_after = match qualified_name.split_once('.') {
            Some((class, _)) => module
                .find_definition(class)
                .map(|c| c.span.end_line)
                .unwrap_or(definition.span.end_line),
            None => definition.span.end_line,
        };

        let lines: Vec<&str> = source.lines().collect();
        let mut out = String::with_capacity(source.len() * 2);
        let push_lines = |out: &mut String, from: usize, to: usize| {
            for line in lines.iter().take(to).skip(from.saturating_sub(1)) {
                out.push_str(line);
                out.push('\n');
            }
        };
        push_lines(&mut out, 1, definition.span.start_line - 1);
        out.push_str(&indent(&split.source, definition.indent));
        push_lines(&mut out, definition.span.end_line + 1, insert_after);
        for helper in &split.helpers {
            out.push_str("\n\n");
            out.push_str(&helper.source);
        }
        push_lines(&mut out, insert_after + 1, lines.len());

        self.parser
            .check_syntax(&out)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        fs::write(file, &out)?;

        let lines_after = count_code_lines(&split.source);
        info!(
            file = %file.display(),
            unit = qualified_name,
            helpers = split.helpers.len(),
            lines_before,
            lines_after,
            "Split unit"
        );
        Ok(UnitSplitResult {
            file: file.to_path_buf(),
            unit: qualified_name.to_string(),
            helpers: split.helpers.into_iter().map(|h| h.name).collect(),
            lines_before,
            lines_after,
        })
    }
}

/// Unit source with each range replaced by its call line
fn rebuild_unit(unit_source: &str, body: &FunctionBody, ranges: &[(usize, usize)], calls: &[String]) -> String {
    let preamble_end = body
        .docstring
        .map(|d| d.end_line)
        .unwrap_or(body.header_span.end_line);
    let mut out = slice_lines(unit_source, Span::new(1, preamble_end));

    let mut index = 0;
    let mut range_iter = ranges.iter().zip(calls.iter()).peekable();
    while index < body.statements.len() {
        if let Some(((start, end), call)) = range_iter.peek() {
            if *start == index {
                out.push_str(call);
                index = *end;
                range_iter.next();
                continue;
            }
        }
        out.push_str(&slice_lines(unit_source, body.statements[index].text_span));
        index += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn long_unit(statements: usize) -> String {
        let mut source = String::from("def build(a, b):\n    \"\"\"Build a value.\"\"\"\n    total = a\n");
        for i in 0..statements {
            source.push_str(&format!("    total = total + b * {}\n", i));
        }
        source.push_str("    extra = total % 7\n    return total + extra\n");
        source
    }

    #[test]
    fn test_small_unit_is_unchanged() {
        let source = long_unit(2);
        let split = UnitSplitter::new(SourceParser::new()).split(&source, "build", 25).unwrap();
        assert_eq!(split.source, source);
        assert!(split.helpers.is_empty());
    }

    #[test]
    fn test_long_unit_is_split_within_limit() {
        let source = long_unit(30);
        let split = UnitSplitter::new(SourceParser::new()).split(&source, "build", 10).unwrap();

        assert!(!split.helpers.is_empty());
        assert!(count_code_lines(&split.source) <= 10);
        for helper in &split.helpers {
            assert!(count_code_lines(&helper.source) <= 10);
            assert!(helper.name.starts_with("_build_part_"));
        }
        let first = &split.helpers[0];
        assert_eq!(first.returns, vec!["total".to_string()]);
        assert!(first.params.contains(&"a".to_string()) || first.params.contains(&"total".to_string()));
        assert!(split.source.contains("\"\"\"Build a value.\"\"\""));
        assert!(split.source.contains("    return total + extra\n"));
        assert!(split.source.contains("total = _build_part_1("));
    }

    #[test]
    fn test_conditional_names_block_boundaries() {
        let mut source = String::from("def f(flag):\n");
        source.push_str("    if flag:\n        value = 1\n");
        for i in 0..8 {
            source.push_str(&format!("    step{} = {}\n", i, i));
        }
        source.push_str("    return value\n");
        // `value` is only conditionally bound and read at the end, so no boundary is safe
        let err = UnitSplitter::new(SourceParser::new()).split(&source, "f", 5).unwrap_err();
        assert!(matches!(err, RefactoringError::Unsplittable { .. }));
    }

    #[test]
    fn test_generators_are_rejected() {
        let mut source = String::from("def gen(n):\n");
        for i in 0..10 {
            source.push_str(&format!("    n = n + {}\n", i));
        }
        source.push_str("    yield n\n");
        let err = UnitSplitter::new(SourceParser::new()).split(&source, "gen", 5).unwrap_err();
        assert!(err.to_string().contains("yield"));
    }

    #[test]
    fn test_split_method_in_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("cart.py");
        let mut method = String::from("class Cart:\n    def total(self, rate):\n        value = 0\n");
        for i in 0..12 {
            method.push_str(&format!("        value = value + self.items[{}] * rate\n", i));
        }
        method.push_str("        return value\n\n\nCART = Cart()\n");
        fs::write(&file, &method).unwrap();

        let result = UnitSplitter::new(SourceParser::new())
            .split_in_file(&file, "Cart.total", 8)
            .unwrap();
        assert!(!result.helpers.is_empty());
        assert!(result.lines_after <= 8);

        let rewritten = fs::read_to_string(&file).unwrap();
        assert!(rewritten.contains("        value = _total_part_1(self, rate, value)\n")
            || rewritten.contains("        value = _total_part_1(self, rate)\n"));
        assert!(rewritten.contains("\ndef _total_part_1("));
        assert!(rewritten.trim_end().ends_with("CART = Cart()"));
        assert!(SourceParser::new().check_syntax(&rewritten).is_ok());
    }

    #[test]
    fn test_missing_unit() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.py");
        fs::write(&file, "def f():\n    return 1\n").unwrap();
        let err = UnitSplitter::new(SourceParser::new())
            .split_in_file(&file, "g", 5)
            .unwrap_err();
        assert!(matches!(err, RefactoringError::UnitNotFound(_)));
    }
}
