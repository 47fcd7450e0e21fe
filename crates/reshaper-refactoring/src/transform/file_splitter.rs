//! Split an oversized file into one file per functional category
//!
//! Every output is synthesized and parsed in memory, and every conflict is
//! checked, before the first byte is written.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use reshaper_parsers::{ItemKind, ParsedModule, SourceParser};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::grouping::{Category, FunctionalGrouper, GroupedFile};
use crate::error::{RefactoringError, Result};
use crate::project::AGGREGATOR_FILE;
use crate::transform::{join_blocks, module_stem};

/// One synthesized output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub category: Category,
    pub path: PathBuf,
    pub content: String,
}

/// What a file split changed on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSplitResult {
    pub original: PathBuf,
    /// Files that did not exist before the split
    pub created: Vec<PathBuf>,
    /// The original file was rewritten with the default group
    pub rewritten_original: bool,
    pub removed_original: bool,
    pub aggregator: PathBuf,
    pub aggregator_created: bool,
    pub aggregator_lines_added: usize,
}

/// Splits files along functional categories
#[derive(Debug, Clone)]
pub struct FileSplitter {
    parser: SourceParser,
    grouper: FunctionalGrouper,
}

impl FileSplitter {
    pub fn new(parser: SourceParser) -> Self {
        Self {
            parser,
            grouper: FunctionalGrouper::new(),
        }
    }

    /// Compute the output files for `file` without touching the disk
    pub fn plan_outputs(&self, file: &Path, source: &str, target_dir: &Path) -> Result<Vec<SplitOutput>> {
        if file.file_name().and_then(|n| n.to_str()) == Some(AGGREGATOR_FILE) {
            return Err(RefactoringError::Unsplittable {
                unit: file.display().to_string(),
                reason: "package aggregator files are not split".to_string(),
            });
        }
        let module = self
            .parser
            .parse(source)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        let base = module_stem(file);
        let grouped = self.grouper.group(&base, &module);

        let statements_present = module
            .items
            .iter()
            .any(|item| matches!(item.kind, ItemKind::Statement));
        let mut categories: BTreeSet<Category> = grouped.groups.keys().copied().collect();
        if statements_present {
            categories.insert(Category::Main);
        }
        if categories.len() < 2 {
            return Err(RefactoringError::Unsplittable {
                unit: file.display().to_string(),
                reason: "all units fall into one category".to_string(),
            });
        }

        let owner = name_owners(&module, &grouped);
        let imports_needed = cross_group_imports(&module, &grouped, &owner);
        check_cycles(&imports_needed)?;

        let mut outputs = Vec::new();
        for category in categories {
            let content = self.render(&module, &grouped, category, &imports_needed);
            self.parser
                .check_syntax(&content)
                .map_err(|e| RefactoringError::parse(target_dir.join(grouped.file_name(category)), &e))?;
            outputs.push(SplitOutput {
                category,
                path: target_dir.join(grouped.file_name(category)),
                content,
            });
        }
        Ok(outputs)
    }

    fn render(
        &self,
        module: &ParsedModule,
        grouped: &GroupedFile,
        category: Category,
        imports_needed: &BTreeMap<Category, BTreeMap<Category, BTreeSet<String>>>,
    ) -> String {
        let header = match (category.is_default(), module.docstring()) {
            (true, Some(docstring)) => module.text_of(docstring.span),
            _ => format!(
                "\"\"\"{} units split from {}.\"\"\"\n",
                category.title(),
                grouped.base
            ),
        };

        let mut import_block: String = module
            .items
            .iter()
            .filter(|item| item.as_import().is_some())
            .map(|item| module.text_of(item.span))
            .collect();
        if let Some(siblings) = imports_needed.get(&category) {
            for (sibling, names) in siblings {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                import_block.push_str(&format!(
                    "from .{} import {}\n",
                    module_stem(Path::new(&grouped.file_name(*sibling))),
                    names.join(", ")
                ));
            }
        }

        let bodies: Vec<String> = if category.is_default() {
            module
                .items
                .iter()
                .filter(|item| match &item.kind {
                    ItemKind::Statement => true,
                    ItemKind::Definition(definition) => {
                        grouped.category_of(&definition.name) == Some(Category::Main)
                    }
                    ItemKind::Docstring | ItemKind::Import(_) => false,
                })
                .map(|item| module.text_of(item.text_span))
                .collect()
        } else {
            grouped
                .groups
                .get(&category)
                .map(|units| units.iter().map(|u| u.source_text.clone()).collect())
                .unwrap_or_default()
        };

        let mut blocks = vec![header];
        if !import_block.is_empty() {
            blocks.push(import_block);
        }
        blocks.push(join_blocks(&bodies));
        join_blocks(&blocks)
    }

    /// Split `file`, writing the outputs into `target_dir` and updating its aggregator
    pub fn split(&self, file: &Path, target_dir: &Path) -> Result<FileSplitResult> {
        let source = fs::read_to_string(file)?;
        let outputs = self.plan_outputs(file, &source, target_dir)?;

        let default_path = target_dir.join(format!("{}.py", module_stem(file)));
        let same_location = default_path == file;
        for output in &outputs {
            let replaces_original = output.category.is_default() && same_location;
            if !replaces_original && output.path.exists() {
                return Err(RefactoringError::SplitConflict(format!(
                    "{} already exists",
                    output.path.display()
                )));
            }
        }

        let new_modules: Vec<String> = outputs
            .iter()
            .filter(|o| !(o.category.is_default() && same_location))
            .map(|o| module_stem(&o.path))
            .collect();
        let aggregator = target_dir.join(AGGREGATOR_FILE);
        let aggregator_update = self.aggregator_update(&aggregator, &new_modules)?;

        fs::create_dir_all(target_dir)?;
        let mut created = Vec::new();
        let mut rewritten_original = false;
        for output in &outputs {
            fs::write(&output.path, &output.content)?;
            if output.category.is_default() && same_location {
                rewritten_original = true;
            } else {
                created.push(output.path.clone());
            }
            debug!(file = %output.path.display(), category = %output.category, "Wrote split output");
        }
        let removed_original = !rewritten_original;
        if removed_original {
            fs::remove_file(file)?;
        }

        let (aggregator_created, aggregator_lines_added) = match aggregator_update {
            Some((content, created, added)) => {
                fs::write(&aggregator, content)?;
                (created, added)
            }
            None => (false, 0),
        };

        info!(
            file = %file.display(),
            outputs = outputs.len(),
            aggregator_lines_added,
            "Split file"
        );
        Ok(FileSplitResult {
            original: file.to_path_buf(),
            created,
            rewritten_original,
            removed_original,
            aggregator,
            aggregator_created,
            aggregator_lines_added,
        })
    }

    /// New aggregator content, whether it is new, and how many lines it gains
    fn aggregator_update(
        &self,
        aggregator: &Path,
        modules: &[String],
    ) -> Result<Option<(String, bool, usize)>> {
        if !aggregator.exists() {
            if modules.is_empty() {
                return Ok(None);
            }
            let content: String = modules
                .iter()
                .map(|m| format!("from .{} import *\n", m))
                .collect();
            return Ok(Some((content, true, modules.len())));
        }

        let source = fs::read_to_string(aggregator)?;
        let parsed = self
            .parser
            .parse(&source)
            .map_err(|e| RefactoringError::parse(aggregator, &e))?;
        let exported: BTreeSet<&str> = parsed
            .imports()
            .filter(|import| import.level == 1)
            .map(|import| import.module.as_str())
            .collect();
        let missing: Vec<String> = modules
            .iter()
            .filter(|m| !exported.contains(m.as_str()))
            .map(|m| format!("from .{} import *", m))
            .collect();
        if missing.is_empty() {
            return Ok(None);
        }

        let insert_after = match parsed.leading_import_block() {
            Some((_, end)) => parsed.items[end].span.end_line,
            None => parsed.docstring().map(|d| d.span.end_line).unwrap_or(0),
        };
        let content = insert_lines(&source, insert_after, &missing);
        Ok(Some((content, false, missing.len())))
    }
}

/// Insert whole lines after line `after` (0 inserts at the top)
pub(crate) fn insert_lines(source: &str, after: usize, new_lines: &[String]) -> String {
    let mut out = String::with_capacity(source.len() + new_lines.len() * 32);
    let mut inserted = false;
    for (index, line) in source.lines().enumerate() {
        if index == after {
            for new_line in new_lines {
                out.push_str(new_line);
                out.push('\n');
            }
            inserted = true;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !inserted {
        for new_line in new_lines {
            out.push_str(new_line);
            out.push('\n');
        }
    }
    out
}

/// Category owning each module-level name of the file
fn name_owners(module: &ParsedModule, grouped: &GroupedFile) -> BTreeMap<String, Category> {
    let mut owner = BTreeMap::new();
    for item in &module.items {
        match &item.kind {
            ItemKind::Definition(definition) => {
                if let Some(category) = grouped.category_of(&definition.name) {
                    owner.insert(definition.name.clone(), category);
                }
            }
            ItemKind::Statement => {
                for name in &item.bound_names {
                    owner.insert(name.clone(), Category::Main);
                }
            }
            ItemKind::Docstring | ItemKind::Import(_) => {}
        }
    }
    owner
}

/// For each category, the names it must import from each sibling category
fn cross_group_imports(
    module: &ParsedModule,
    grouped: &GroupedFile,
    owner: &BTreeMap<String, Category>,
) -> BTreeMap<Category, BTreeMap<Category, BTreeSet<String>>> {
    let mut needed: BTreeMap<Category, BTreeMap<Category, BTreeSet<String>>> = BTreeMap::new();
    let mut require = |from: Category, name: &String| {
        if let Some(&to) = owner.get(name) {
            if to != from {
                needed
                    .entry(from)
                    .or_default()
                    .entry(to)
                    .or_default()
                    .insert(name.clone());
            }
        }
    };

    for units in grouped.groups.values() {
        for unit in units {
            for name in &unit.dependencies {
                require(unit.category, name);
            }
        }
    }
    for item in &module.items {
        if matches!(item.kind, ItemKind::Statement) {
            for name in &item.referenced_names {
                require(Category::Main, name);
            }
        }
    }
    needed
}

fn check_cycles(needed: &BTreeMap<Category, BTreeMap<Category, BTreeSet<String>>>) -> Result<()> {
    fn visit(
        node: Category,
        needed: &BTreeMap<Category, BTreeMap<Category, BTreeSet<String>>>,
        path: &mut Vec<Category>,
        done: &mut BTreeSet<Category>,
    ) -> Option<Vec<Category>> {
        if let Some(position) = path.iter().position(|c| *c == node) {
            let mut cycle = path[position..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if done.contains(&node) {
            return None;
        }
        path.push(node);
        if let Some(targets) = needed.get(&node) {
            for target in targets.keys() {
                if let Some(cycle) = visit(*target, needed, path, done) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    let mut done = BTreeSet::new();
    for start in needed.keys() {
        if let Some(cycle) = visit(*start, needed, &mut Vec::new(), &mut done) {
            let names: Vec<&str> = cycle.iter().map(Category::as_str).collect();
            return Err(RefactoringError::SplitConflict(format!(
                "cross-group dependency cycle: {}",
                names.join(" -> ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ORDERS: &str = "\"\"\"Order handling.\"\"\"\nimport math\n\n\ndef validate_order(order):\n    if order is None:\n        raise ValueError(\"missing\")\n    return True\n\n\ndef compute_total(order):\n    validate_order(order)\n    return math.ceil(order.qty * order.price)\n\n\ndef run(order):\n    return compute_total(order)\n";

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_split_creates_category_files() {
        let temp_dir = TempDir::new().unwrap();
        let file = write(temp_dir.path(), "orders.py", ORDERS);

        let result = FileSplitter::new(SourceParser::new())
            .split(&file, temp_dir.path())
            .unwrap();

        assert_eq!(result.created.len(), 2);
        assert!(result.rewritten_original);
        assert!(result.aggregator_created);
        assert_eq!(result.aggregator_lines_added, 2);

        let validation = fs::read_to_string(temp_dir.path().join("orders_validation.py")).unwrap();
        assert!(validation.starts_with("\"\"\"Validation units split from orders.\"\"\""));
        assert!(validation.contains("import math\n"));
        assert!(validation.contains("def validate_order(order):"));

        let calculation = fs::read_to_string(temp_dir.path().join("orders_calculation.py")).unwrap();
        assert!(calculation.contains("from .orders_validation import validate_order\n"));

        let main = fs::read_to_string(&file).unwrap();
        assert!(main.starts_with("\"\"\"Order handling.\"\"\""));
        assert!(main.contains("from .orders_calculation import compute_total\n"));
        assert!(main.contains("def run(order):"));
        assert!(!main.contains("def compute_total"));

        let aggregator = fs::read_to_string(temp_dir.path().join("__init__.py")).unwrap();
        assert_eq!(
            aggregator,
            "from .orders_validation import *\nfrom .orders_calculation import *\n"
        );

        let parser = SourceParser::new();
        for path in [&file, &temp_dir.path().join("orders_validation.py")] {
            assert!(parser.check_syntax(&fs::read_to_string(path).unwrap()).is_ok());
        }
    }

    #[test]
    fn test_existing_aggregator_gets_lines_inserted_after_imports() {
        let temp_dir = TempDir::new().unwrap();
        let file = write(temp_dir.path(), "orders.py", ORDERS);
        write(
            temp_dir.path(),
            "__init__.py",
            "\"\"\"Package.\"\"\"\nfrom .legacy import thing\n\nVERSION = \"1\"\n",
        );

        let result = FileSplitter::new(SourceParser::new())
            .split(&file, temp_dir.path())
            .unwrap();
        assert!(!result.aggregator_created);
        assert_eq!(result.aggregator_lines_added, 2);

        let aggregator = fs::read_to_string(temp_dir.path().join("__init__.py")).unwrap();
        assert_eq!(
            aggregator,
            "\"\"\"Package.\"\"\"\nfrom .legacy import thing\nfrom .orders_validation import *\nfrom .orders_calculation import *\n\nVERSION = \"1\"\n"
        );
    }

    #[test]
    fn test_original_removed_when_no_default_units() {
        let temp_dir = TempDir::new().unwrap();
        let source = "def validate_a(x):\n    return x\n\n\ndef compute_b(x):\n    return x + 1\n";
        let file = write(temp_dir.path(), "mixed.py", source);

        let result = FileSplitter::new(SourceParser::new())
            .split(&file, temp_dir.path())
            .unwrap();
        assert!(result.removed_original);
        assert!(!file.exists());
        assert_eq!(result.created.len(), 2);
    }

    #[test]
    fn test_conflicts_abort_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let file = write(temp_dir.path(), "orders.py", ORDERS);
        write(temp_dir.path(), "orders_validation.py", "x = 1\n");

        let err = FileSplitter::new(SourceParser::new())
            .split(&file, temp_dir.path())
            .unwrap_err();
        assert!(matches!(err, RefactoringError::SplitConflict(_)));
        assert_eq!(fs::read_to_string(&file).unwrap(), ORDERS);
        assert!(!temp_dir.path().join("orders_calculation.py").exists());
        assert!(!temp_dir.path().join("__init__.py").exists());
    }

    #[test]
    fn test_dependency_cycle_is_a_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let source = "LIMIT = 3\n\n\ndef validate_a(x):\n    return x < LIMIT\n\n\nCHECKS = [validate_a]\n";
        let file = write(temp_dir.path(), "cyclic.py", source);

        let err = FileSplitter::new(SourceParser::new())
            .split(&file, temp_dir.path())
            .unwrap_err();
        assert!(matches!(err, RefactoringError::SplitConflict(_)));
    }

    #[test]
    fn test_unparsable_file_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let file = write(temp_dir.path(), "broken.py", "def broken(:\n");
        let err = FileSplitter::new(SourceParser::new())
            .split(&file, temp_dir.path())
            .unwrap_err();
        assert!(matches!(err, RefactoringError::Parse { .. }));
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_insert_lines() {
        let lines = vec!["b".to_string()];
        assert_eq!(insert_lines("a\nc\n", 1, &lines), "a\nb\nc\n");
        assert_eq!(insert_lines("a\n", 0, &lines), "b\na\n");
        assert_eq!(insert_lines("a\n", 5, &lines), "a\nb\n");
    }
}
