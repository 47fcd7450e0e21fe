//! Extract duplicated units into a shared module

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use reshaper_parsers::{ImportStatement, SourceParser};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RefactoringError, Result};
use crate::project::{ProjectTree, AGGREGATOR_FILE, SOURCE_EXTENSION};
use crate::transform::collapse_blank_runs;
use crate::transform::file_splitter::insert_lines;

/// Directory that receives extracted modules
pub const SHARED_DIR: &str = "shared";

/// Outcome of writing a shared module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub module_name: String,
    pub module_path: PathBuf,
    pub import_path: String,
    /// False when an identical module was already in place
    pub created: bool,
    pub package_init_created: bool,
}

/// Outcome of redirecting one file to the shared module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceUpdate {
    pub path: PathBuf,
    pub updated: bool,
    pub error: Option<String>,
}

/// Moves identical units into `shared/` and imports them back
#[derive(Debug, Clone)]
pub struct CommonModuleExtractor {
    parser: SourceParser,
}

impl CommonModuleExtractor {
    /// Creates a new CommonModuleExtractor instance
    pub fn new(parser: SourceParser) -> Self {
        Self { parser }
    }

    /// Location and dotted import path for a shared module serving `files`
    ///
    /// The module lives in a `shared` directory under the deepest directory
    /// containing every file.
    pub fn shared_location(
        project: &ProjectTree,
        files: &[PathBuf],
        module_name: &str,
    ) -> (PathBuf, String) {
        let mut ancestor: Option<PathBuf> = None;
        for file in files {
            let parent = project
                .relative(file)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            ancestor = Some(match ancestor {
                None => parent,
                Some(current) => current
                    .components()
                    .zip(parent.components())
                    .take_while(|(a, b)| a == b)
                    .map(|(a, _)| a.as_os_str().to_os_string())
                    .collect(),
            });
        }
        let relative = ancestor
            .unwrap_or_default()
            .join(SHARED_DIR)
            .join(format!("{}.{}", module_name, SOURCE_EXTENSION));
        let path = project.root().join(&relative);
        let import_path = project.module_path(&path);
        (path, import_path)
    }

    /// Write the shared module holding `shared_code`
    ///
    /// # Arguments
    ///
    /// * `shared_code` - Source text of the unit, at column zero
    /// * `source_imports` - Imports of a file that defined the unit; only
    ///   the ones the unit references are carried over
    pub fn extract(
        &self,
        shared_code: &str,
        module_name: &str,
        module_path: &Path,
        import_path: &str,
        source_imports: &[ImportStatement],
    ) -> Result<ExtractionResult> {
        let unit = self
            .parser
            .parse(shared_code)
            .map_err(|e| RefactoringError::parse(module_path, &e))?;
        let referenced: BTreeSet<String> = unit
            .items
            .iter()
            .flat_map(|item| item.referenced_names.iter().cloned())
            .collect();

        let mut imports = Vec::new();
        for import in source_imports {
            if import.bound_names().is_disjoint(&referenced) {
                continue;
            }
            if import.is_relative() {
                return Err(RefactoringError::Validation(format!(
                    "shared unit needs relative import: {}",
                    import.text
                )));
            }
            imports.push(import.text.clone());
        }

        let mut content = format!(
            "\"\"\"Shared {} extracted from duplicated code.\"\"\"\n",
            module_name
        );
        if !imports.is_empty() {
            content.push_str(&imports.join("\n"));
            content.push('\n');
        }
        content.push_str("\n\n");
        content.push_str(shared_code.trim_end());
        content.push('\n');
        self.parser
            .check_syntax(&content)
            .map_err(|e| RefactoringError::parse(module_path, &e))?;

        let created = if module_path.exists() {
            let existing = fs::read_to_string(module_path)?;
            if existing != content {
                return Err(RefactoringError::SplitConflict(format!(
                    "{} already exists with different content",
                    module_path.display()
                )));
            }
            debug!(path = %module_path.display(), "Shared module already in place");
            false
        } else {
            if let Some(parent) = module_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(module_path, &content)?;
            true
        };

        let mut package_init_created = false;
        if let Some(parent) = module_path.parent() {
            let init = parent.join(AGGREGATOR_FILE);
            if !init.exists() {
                fs::write(&init, "")?;
                package_init_created = true;
            }
        }

        info!(module = %import_path, created, "Extracted shared module");
        Ok(ExtractionResult {
            module_name: module_name.to_string(),
            module_path: module_path.to_path_buf(),
            import_path: import_path.to_string(),
            created,
            package_init_created,
        })
    }

    /// Replace the local definition of `unit` in each file with an import
    ///
    /// A file that fails is reported and left untouched; the rest proceed.
    pub fn update_references(
        &self,
        files: &[PathBuf],
        import_path: &str,
        unit: &str,
    ) -> Vec<ReferenceUpdate> {
        files
            .iter()
            .map(|file| match self.update_file(file, import_path, unit) {
                Ok(updated) => ReferenceUpdate {
                    path: file.clone(),
                    updated,
                    error: None,
                },
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipped reference update");
                    ReferenceUpdate {
                        path: file.clone(),
                        updated: false,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    fn update_file(&self, file: &Path, import_path: &str, unit: &str) -> Result<bool> {
        let source = fs::read_to_string(file)?;
        let module = self
            .parser
            .parse(&source)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        let index = match module.item_index_of(unit) {
            Some(index) => index,
            None => return Ok(false),
        };
        let span = module.items[index].text_span;

        let kept: Vec<&str> = source
            .lines()
            .enumerate()
            .filter(|(i, _)| !span.contains(i + 1))
            .map(|(_, line)| line)
            .collect();
        let mut without = kept.join("\n");
        without.push('\n');

        let import_line = format!("from {} import {}", import_path, unit);
        let already_imported = module.imports().any(|import| {
            import.module == import_path && import.bound_names().contains(unit)
        });
        let updated = if already_imported {
            without
        } else {
            // the definition always follows the leading imports and docstring
            let insert_after = match module.leading_import_block() {
                Some((_, end)) => module.items[end].span.end_line,
                None => module.docstring().map(|d| d.span.end_line).unwrap_or(0),
            };
            insert_lines(&without, insert_after, &[import_line])
        };
        let mut updated = collapse_blank_runs(&updated).trim_end().to_string();
        updated.push('\n');

        self.parser
            .check_syntax(&updated)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        fs::write(file, &updated)?;
        debug!(file = %file.display(), unit, "Redirected unit to shared module");
        Ok(true)
    }

    /// Whether both files still parse
    pub fn validate(&self, a: &Path, b: &Path) -> bool {
        [a, b].iter().all(|path| self.parser.parse_file(path).is_ok())
    }
}
