//! Functional grouping of top-level units
//!
//! Each top-level function or class gets a category from its name, its
//! privacy and, failing those, keyword patterns in its body. Categories are
//! checked in a fixed priority order and the first match wins.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;
use reshaper_parsers::{DefinitionKind, ItemKind, ParsedModule};
use serde::{Deserialize, Serialize};

/// Semantic category of a unit, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Validation,
    Persistence,
    ExternalInterface,
    Reporting,
    Calculation,
    DataProcessing,
    Helper,
    Main,
}

impl Category {
    /// Suffix used in split file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Validation => "validation",
            Category::Persistence => "persistence",
            Category::ExternalInterface => "external",
            Category::Reporting => "reporting",
            Category::Calculation => "calculation",
            Category::DataProcessing => "data_processing",
            Category::Helper => "helpers",
            Category::Main => "main",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::Validation => "Validation",
            Category::Persistence => "Persistence",
            Category::ExternalInterface => "External interface",
            Category::Reporting => "Reporting",
            Category::Calculation => "Calculation",
            Category::DataProcessing => "Data processing",
            Category::Helper => "Helper",
            Category::Main => "Main",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Category::Main
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const NAME_FAMILIES: [(Category, &[&str]); 6] = [
    (
        Category::Validation,
        &["validate", "validation", "validator", "check", "verify", "ensure", "is", "sanitize"],
    ),
    (
        Category::Persistence,
        &["add", "update", "delete", "find", "get", "query", "save", "insert", "remove", "persist", "store", "upsert"],
    ),
    (
        Category::ExternalInterface,
        &["api", "http", "request", "client", "send", "webhook", "remote", "email", "notify", "connect"],
    ),
    (
        Category::Reporting,
        &["report", "render", "format", "print", "summary", "summarize", "display", "export", "show"],
    ),
    (
        Category::Calculation,
        &["calculate", "calc", "compute", "total", "sum", "average", "count", "score", "estimate", "tax"],
    ),
    (
        Category::DataProcessing,
        &["process", "parse", "transform", "convert", "normalize", "filter", "map", "merge", "aggregate", "serialize", "deserialize", "clean"],
    ),
];

const BODY_PATTERNS: [(Category, &str); 6] = [
    (
        Category::Validation,
        r"\braise\s+(ValueError|TypeError)\b|\bisinstance\(|\bassert\b",
    ),
    (
        Category::Persistence,
        r"\.(execute|commit|save|insert|fetchall|fetchone)\(|\bsession\.|\bcursor\b",
    ),
    (
        Category::ExternalInterface,
        r"\brequests\.|\burlopen\(|\bsocket\.|\bsmtplib\.|\bhttp\w*\.",
    ),
    (Category::Reporting, r"\bprint\(|\blogging\.|\.write\("),
    (
        Category::Calculation,
        r"\bsum\(|\bround\(|\bmath\.|[-+*/]=|\bmin\(|\bmax\(",
    ),
    (
        Category::DataProcessing,
        r"\bjson\.|\bcsv\.|\.split\(|\.join\(|\.strip\(|\bsorted\(|\bmap\(|\bfilter\(",
    ),
];

/// Whether a unit is a function or a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Callable,
    Type,
}

/// A top-level unit with its category and same-file dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalUnit {
    pub name: String,
    pub kind: UnitKind,
    /// First line, attached comments and decorators included
    pub line_start: usize,
    pub line_end: usize,
    pub source_text: String,
    pub category: Category,
    /// Module-level names of the same file this unit references
    pub dependencies: BTreeSet<String>,
}

/// Units of one file grouped by category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedFile {
    /// File stem the split names derive from
    pub base: String,
    pub groups: BTreeMap<Category, Vec<FunctionalUnit>>,
}

impl GroupedFile {
    pub fn file_name(&self, category: Category) -> String {
        suggested_file_name(&self.base, category)
    }

    pub fn unit_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Category holding the named unit
    pub fn category_of(&self, name: &str) -> Option<Category> {
        self.groups
            .iter()
            .find(|(_, units)| units.iter().any(|u| u.name == name))
            .map(|(category, _)| *category)
    }
}

/// Classifies units into categories
#[derive(Debug, Clone)]
pub struct FunctionalGrouper {
    body_patterns: Vec<(Category, Regex)>,
}

impl FunctionalGrouper {
    pub fn new() -> Self {
        let mut body_patterns = Vec::new();
        for (category, pattern) in BODY_PATTERNS {
            if let Ok(re) = Regex::new(pattern) {
                body_patterns.push((category, re));
            }
        }
        Self { body_patterns }
    }

    /// Category for a unit name and body
    pub fn categorize(&self, name: &str, body: &str) -> Category {
        let normalized = normalize_name(name);
        let tokens: BTreeSet<&str> = normalized.split('_').filter(|t| !t.is_empty()).collect();

        for (category, words) in NAME_FAMILIES {
            if words.iter().any(|word| tokens.contains(word)) {
                return category;
            }
        }

        let dunder = name.starts_with("__") && name.ends_with("__");
        if name.starts_with('_') && !dunder {
            return Category::Helper;
        }

        self.body_patterns
            .iter()
            .find(|(_, re)| re.is_match(body))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Main)
    }

    /// Group the top-level units of a module
    ///
    /// # Arguments
    ///
    /// * `base` - File stem used for the suggested file names
    /// * `module` - Parsed module
    pub fn group(&self, base: &str, module: &ParsedModule) -> GroupedFile {
        let local_names: BTreeSet<String> = module
            .items
            .iter()
            .filter(|item| matches!(item.kind, ItemKind::Definition(_) | ItemKind::Statement))
            .flat_map(|item| item.bound_names.iter().cloned())
            .collect();

        let mut groups: BTreeMap<Category, Vec<FunctionalUnit>> = BTreeMap::new();
        for item in &module.items {
            let definition = match item.as_definition() {
                Some(definition) => definition,
                None => continue,
            };
            let body = module.text_of(definition.body_span);
            let category = self.categorize(&definition.name, &body);
            let dependencies = item
                .referenced_names
                .iter()
                .filter(|name| **name != definition.name && local_names.contains(*name))
                .cloned()
                .collect();
            let kind = match definition.kind {
                DefinitionKind::Class => UnitKind::Type,
                DefinitionKind::Function | DefinitionKind::AsyncFunction => UnitKind::Callable,
            };

            groups.entry(category).or_default().push(FunctionalUnit {
                name: definition.name.clone(),
                kind,
                line_start: item.text_span.start_line,
                line_end: item.text_span.end_line,
                source_text: module.text_of(item.text_span),
                category,
                dependencies,
            });
        }

        GroupedFile {
            base: base.to_string(),
            groups,
        }
    }
}

impl Default for FunctionalGrouper {
    fn default() -> Self {
        Self::new()
    }
}

/// `{base}_{category}.py`; the default category keeps `{base}.py`
pub fn suggested_file_name(base: &str, category: Category) -> String {
    if category.is_default() {
        format!("{}.py", base)
    } else {
        format!("{}_{}.py", base, category.as_str())
    }
}

/// Lower snake case form of an identifier
///
/// Camel case humps become underscore separated, spaces and hyphens become
/// underscores. Applying it twice gives the same result as applying it once.
pub fn normalize_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' || c == '-' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.map(|n| n.is_lowercase()).unwrap_or(false),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
