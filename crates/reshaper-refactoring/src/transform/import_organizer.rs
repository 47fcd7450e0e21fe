//! Fix layer-violating imports and regroup the leading import block

use std::fs;
use std::path::{Path, PathBuf};

use reshaper_parsers::{slice_lines, ImportKind, ImportStatement, ParsedModule, SourceParser, Span};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::imports::{ImportAnalyzer, ImportEdge};
use crate::error::{RefactoringError, Result};
use crate::layers::{Layer, ViolationKind};

const STDLIB_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "atexit", "base64", "binascii",
    "bisect", "builtins", "bz2", "calendar", "cmath", "codecs", "collections", "colorsys",
    "concurrent", "configparser", "contextlib", "contextvars", "copy", "copyreg", "csv", "ctypes",
    "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "doctest", "email",
    "encodings", "enum", "errno", "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch",
    "fractions", "ftplib", "functools", "gc", "getopt", "getpass", "gettext", "glob", "graphlib",
    "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "imaplib", "importlib", "inspect",
    "io", "ipaddress", "itertools", "json", "keyword", "linecache", "locale", "logging", "lzma",
    "mailbox", "marshal", "math", "mimetypes", "mmap", "multiprocessing", "netrc", "numbers",
    "operator", "optparse", "os", "pathlib", "pdb", "pickle", "pkgutil", "platform", "plistlib",
    "poplib", "posix", "pprint", "profile", "pstats", "pty", "pwd", "queue", "quopri", "random",
    "re", "readline", "reprlib", "resource", "sched", "secrets", "select", "selectors", "shelve",
    "shlex", "shutil", "signal", "site", "smtplib", "socket", "socketserver", "sqlite3", "ssl",
    "stat", "statistics", "string", "stringprep", "struct", "subprocess", "symtable", "sys",
    "sysconfig", "syslog", "tarfile", "tempfile", "termios", "textwrap", "threading", "time",
    "timeit", "tkinter", "token", "tokenize", "tomllib", "trace", "traceback", "tracemalloc",
    "tty", "turtle", "types", "typing", "unicodedata", "unittest", "urllib", "uuid", "venv",
    "warnings", "wave", "weakref", "webbrowser", "wsgiref", "xml", "xmlrpc", "zipapp", "zipfile",
    "zipimport", "zlib", "zoneinfo",
];

/// Import group in the regrouped block, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ImportGroup {
    Future,
    Standard,
    External,
    Local,
}

/// What happens to one import statement
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportAction {
    Keep,
    Drop,
    Rewrite(String),
}

/// What an import fix changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFixResult {
    pub file: PathBuf,
    pub kept: usize,
    pub dropped: Vec<String>,
    /// `(original, replacement)` statement texts
    pub rewritten: Vec<(String, String)>,
    pub regrouped: bool,
    pub changed: bool,
}

/// Rewrites or drops disallowed imports of a file
#[derive(Debug, Clone)]
pub struct ImportOrganizer {
    parser: SourceParser,
    analyzer: ImportAnalyzer,
}

impl ImportOrganizer {
    pub fn new(parser: SourceParser, analyzer: ImportAnalyzer) -> Self {
        Self { parser, analyzer }
    }

    pub fn analyzer(&self) -> &ImportAnalyzer {
        &self.analyzer
    }

    /// Fix the imports of `file` in place
    pub fn fix(&self, file: &Path) -> Result<ImportFixResult> {
        let source = fs::read_to_string(file)?;
        let module = self
            .parser
            .parse(&source)
            .map_err(|e| RefactoringError::parse(file, &e))?;

        let mut result = ImportFixResult {
            file: file.to_path_buf(),
            ..ImportFixResult::default()
        };
        let mut actions = Vec::with_capacity(module.items.len());
        for item in &module.items {
            let action = match item.as_import() {
                Some(import) => self.decide(file, import),
                None => ImportAction::Keep,
            };
            match (&action, item.as_import()) {
                (ImportAction::Keep, Some(_)) => result.kept += 1,
                (ImportAction::Drop, Some(import)) => result.dropped.push(import.text.clone()),
                (ImportAction::Rewrite(text), Some(import)) => {
                    result.rewritten.push((import.text.clone(), text.clone()))
                }
                _ => {}
            }
            actions.push(action);
        }

        let clusters = line_clusters(&module);
        let shared: Vec<bool> = clusters
            .iter()
            .flat_map(|&(first, last)| std::iter::repeat(last > first).take(last - first + 1))
            .collect();
        // the block is regrouped only when no line straddles its edges
        let block = module.leading_import_block().filter(|&(start, end)| {
            clusters
                .iter()
                .all(|&(first, last)| last < start || first > end || (first >= start && last <= end))
        });

        let mut edits: Vec<(Span, String)> = Vec::new();
        if let Some((start, end)) = block {
            let text = self.regroup(&module, start, end, &actions, &shared);
            let span = Span::new(module.items[start].span.start_line, module.items[end].span.end_line);
            result.regrouped = text != slice_lines(&source, span);
            edits.push((span, text));
        }
        for &(first, last) in &clusters {
            if let Some((start, end)) = block {
                if first >= start && last <= end {
                    continue;
                }
            }
            if first == last {
                let item = &module.items[first];
                match &actions[first] {
                    ImportAction::Keep => {}
                    ImportAction::Drop => edits.push((item.span, String::new())),
                    ImportAction::Rewrite(text) => edits.push((item.span, format!("{}\n", text))),
                }
                continue;
            }
            if actions[first..=last].iter().all(|a| *a == ImportAction::Keep) {
                continue;
            }
            edits.push(split_shared_line(file, &module, first, last, &actions)?);
        }

        let fixed = apply_edits(&source, edits);
        if fixed == source {
            debug!(file = %file.display(), "Imports already organized");
            return Ok(result);
        }
        self.parser
            .check_syntax(&fixed)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        fs::write(file, &fixed)?;
        result.changed = true;

        info!(
            file = %file.display(),
            dropped = result.dropped.len(),
            rewritten = result.rewritten.len(),
            "Organized imports"
        );
        Ok(result)
    }

    fn decide(&self, file: &Path, import: &ImportStatement) -> ImportAction {
        let edges = self.analyzer.classify_import(file, import);
        let violations: Vec<&ImportEdge> = edges.iter().filter(|e| e.violation.is_some()).collect();
        if violations.is_empty() {
            return ImportAction::Keep;
        }
        if violations
            .iter()
            .any(|e| e.violation == Some(ViolationKind::Upward))
            || edges.len() != 1
        {
            return ImportAction::Drop;
        }
        match self.rewrite(file, import, &edges[0]) {
            Some(text) => ImportAction::Rewrite(text),
            None => ImportAction::Drop,
        }
    }

    /// Deterministic rewrite of a skip-layer `from` import, if one exists
    fn rewrite(&self, file: &Path, import: &ImportStatement, edge: &ImportEdge) -> Option<String> {
        if import.kind != ImportKind::From || import.names.iter().any(|n| n.name == "*") {
            return None;
        }
        let project = self.analyzer.project();
        let base = if import.is_relative() {
            project.resolve_relative(file, import.level, &import.module)?
        } else {
            import.module.clone()
        };
        // names imported as submodules cannot be redirected
        if edge.target.module != base {
            return None;
        }

        let source_layer = self.analyzer.file_layer(file).layer;
        let substitute = self
            .analyzer
            .rules()
            .substitute(source_layer, edge.layer.layer)?;
        let index = edge.layer.segment?;
        let segments: Vec<&str> = base.split('.').collect();
        if index >= segments.len() {
            return None;
        }

        let parent = segments[..index]
            .iter()
            .fold(project.root().to_path_buf(), |dir, segment| dir.join(segment));
        let sibling = self.sibling_of_layer(&parent, substitute)?;

        let mut rewritten: Vec<&str> = segments.clone();
        rewritten[index] = sibling.as_str();
        let new_module = rewritten.join(".");
        let new_file = project.resolve_module(&new_module)?;
        let target_layer = self
            .analyzer
            .classifier()
            .classify_path(&project.relative(&new_file))
            .layer;
        if self.analyzer.rules().check(source_layer, target_layer).is_some() {
            return None;
        }

        let exported = self.parser.parse_file(&new_file).ok()?.top_level_names();
        if !import.names.iter().all(|n| exported.contains(&n.name)) {
            return None;
        }

        let written = if import.is_relative() {
            let module_segments: Vec<&str> = import.module.split('.').filter(|s| !s.is_empty()).collect();
            let prefix = segments.len() - module_segments.len();
            if index < prefix {
                new_module.clone()
            } else {
                let mut relative = module_segments.clone();
                relative[index - prefix] = sibling.as_str();
                format!("{}{}", ".".repeat(import.level), relative.join("."))
            }
        } else {
            new_module.clone()
        };
        let names: Vec<String> = import.names.iter().map(|n| n.render()).collect();
        Some(format!("from {} import {}", written, names.join(", ")))
    }

    /// First sibling directory (sorted) whose name places it in `layer`
    fn sibling_of_layer(&self, parent: &Path, layer: Layer) -> Option<String> {
        let mut names: Vec<String> = fs::read_dir(parent)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names.into_iter().find(|name| {
            let found = self
                .analyzer
                .classifier()
                .classify_segments(std::slice::from_ref(name), false);
            found.segment.is_some() && found.layer == layer
        })
    }

    fn group_of(&self, import: &ImportStatement) -> ImportGroup {
        if import.kind == ImportKind::Future {
            return ImportGroup::Future;
        }
        if self.analyzer.is_local(import) {
            return ImportGroup::Local;
        }
        match import.root_package() {
            Some(root) if STDLIB_MODULES.contains(&root.as_str()) => ImportGroup::Standard,
            _ => ImportGroup::External,
        }
    }

    /// Regrouped text of the leading block, one statement per line
    fn regroup(
        &self,
        module: &ParsedModule,
        start: usize,
        end: usize,
        actions: &[ImportAction],
        shared: &[bool],
    ) -> String {
        let mut entries: Vec<(ImportGroup, String, String)> = Vec::new();
        for index in start..=end {
            let item = &module.items[index];
            let Some(import) = item.as_import() else {
                continue;
            };
            let text = match &actions[index] {
                ImportAction::Drop => continue,
                ImportAction::Keep if shared[index] => import.text.clone(),
                ImportAction::Keep => module.text_of(item.span).trim_end().to_string(),
                ImportAction::Rewrite(text) => text.clone(),
            };
            let key = match import.kind {
                ImportKind::Import => import.names.first().map(|n| n.name.clone()).unwrap_or_default(),
                ImportKind::From | ImportKind::Future => import.written_module(),
            };
            entries.push((self.group_of(import), key.to_lowercase(), text));
        }
        entries.sort();

        let mut out = String::new();
        let mut previous: Option<ImportGroup> = None;
        for (group, _, text) in entries {
            if previous.is_some() && previous != Some(group) {
                out.push('\n');
            }
            out.push_str(&text);
            out.push('\n');
            previous = Some(group);
        }
        out
    }
}

/// Item index ranges whose lines overlap, e.g. `import os; import sys`
fn line_clusters(module: &ParsedModule) -> Vec<(usize, usize)> {
    let mut clusters: Vec<(usize, usize)> = Vec::new();
    let mut last_line = 0;
    for (index, item) in module.items.iter().enumerate() {
        match clusters.last_mut() {
            Some(cluster) if item.span.start_line <= last_line => cluster.1 = index,
            _ => clusters.push((index, index)),
        }
        last_line = last_line.max(item.span.end_line);
    }
    clusters
}

/// Put the surviving imports of a shared line on lines of their own
fn split_shared_line(
    file: &Path,
    module: &ParsedModule,
    first: usize,
    last: usize,
    actions: &[ImportAction],
) -> Result<(Span, String)> {
    let mut replacement = String::new();
    for index in first..=last {
        let item = &module.items[index];
        let import = item.as_import().ok_or_else(|| {
            RefactoringError::Validation(format!(
                "{}: line {} mixes imports with other statements",
                file.display(),
                item.span.start_line
            ))
        })?;
        match &actions[index] {
            ImportAction::Keep => replacement.push_str(&import.text),
            ImportAction::Drop => continue,
            ImportAction::Rewrite(text) => replacement.push_str(text),
        }
        replacement.push('\n');
    }
    let span = Span::new(module.items[first].span.start_line, module.items[last].span.end_line);
    Ok((span, replacement))
}

/// Replace whole-line spans, bottom-up
fn apply_edits(source: &str, mut edits: Vec<(Span, String)>) -> String {
    edits.sort_by(|a, b| b.0.start_line.cmp(&a.0.start_line));
    let mut lines: Vec<String> = source.lines().map(|l| format!("{}\n", l)).collect();
    for (span, replacement) in edits {
        let start = span.start_line.saturating_sub(1).min(lines.len());
        let end = span.end_line.min(lines.len());
        let new_lines: Vec<String> = replacement.lines().map(|l| format!("{}\n", l)).collect();
        lines.splice(start..end, new_lines);
    }
    lines.concat()
}
