//! Line-oriented helpers: code-line counting, slicing and indentation

use crate::types::Span;

const TRIPLE_QUOTES: [&str; 2] = ["\"\"\"", "'''"];

/// Count the lines of `text` that carry code.
///
/// Blank lines, `#` comment lines and lines inside triple-quoted strings are
/// not counted. A line that opens and closes a triple-quoted string on the
/// same line is skipped entirely; a line holding a single delimiter toggles
/// the in-string state and is skipped as well.
pub fn count_code_lines(text: &str) -> usize {
    let mut in_block = false;
    let mut count = 0;

    for line in text.lines() {
        let trimmed = line.trim();

        let delimiters: usize = TRIPLE_QUOTES
            .iter()
            .map(|quote| trimmed.matches(quote).count())
            .sum();

        if in_block {
            if delimiters % 2 == 1 {
                in_block = false;
            }
            continue;
        }

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if delimiters > 0 {
            if delimiters % 2 == 1 {
                in_block = true;
            }
            continue;
        }

        count += 1;
    }

    count
}

/// Text of the lines covered by `span`, each terminated by a newline
pub fn slice_lines(source: &str, span: Span) -> String {
    let mut out = String::new();
    for line in source
        .lines()
        .skip(span.start_line.saturating_sub(1))
        .take(span.line_count())
    {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Number of leading spaces (tabs count as one column)
pub fn leading_indent(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Smallest indentation among the non-blank lines of `text`
pub fn common_indent(text: &str) -> usize {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(leading_indent)
        .min()
        .unwrap_or(0)
}

/// Remove `width` columns of indentation from every non-blank line.
///
/// Returns `None` when a non-blank line is indented less than `width`, which
/// happens for continuation lines of multi-line strings.
pub fn dedent(text: &str, width: usize) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push('\n');
            continue;
        }
        if leading_indent(line) < width {
            return None;
        }
        out.push_str(&line[width..]);
        out.push('\n');
    }
    Some(out)
}

/// Add `width` spaces in front of every non-blank line
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut out = String::with_capacity(text.len() + width * 8);
    for line in text.lines() {
        if !line.trim().is_empty() {
            out.push_str(&pad);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Make sure `text` ends with exactly one newline
pub fn ensure_trailing_newline(text: &str) -> String {
    let mut out = text.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}
