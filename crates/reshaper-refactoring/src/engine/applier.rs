//! Dispatch of plan steps to their transformers

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use reshaper_parsers::count_code_lines;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::analysis::imports::ImportAnalyzer;
use crate::engine::context::RunContext;
use crate::error::{RefactoringError, Result};
use crate::plan::models::StepKind;
use crate::transform::{
    module_stem, CommonModuleExtractor, FileSplitter, HeaderStandardizer, ImportOrganizer,
    UnitSplitter,
};

/// Applies plan steps during the Apply phase
pub trait StepHandler {
    /// Apply a step; the returned map is recorded on its audit entry
    fn apply(&self, kind: &StepKind) -> Result<BTreeMap<String, Value>>;
}

/// Applies one step to the project and describes what changed
pub struct StepApplier<'a> {
    context: &'a RunContext,
}

impl<'a> StepApplier<'a> {
    pub fn new(context: &'a RunContext) -> Self {
        Self { context }
    }

    fn dispatch(&self, kind: &StepKind) -> Result<BTreeMap<String, Value>> {
        let parser = self.context.parser.clone();
        let mut changes = BTreeMap::new();
        match kind {
            StepKind::StandardizeHeader { file } => {
                let added = HeaderStandardizer::new(parser).standardize(file)?;
                changes.insert("header_added".to_string(), json!(added));
            }
            StepKind::FixImports { file, .. } => {
                let analyzer =
                    ImportAnalyzer::new(&self.context.project, self.context.config.layer_rules.clone())?;
                let result = ImportOrganizer::new(parser, analyzer).fix(file)?;
                changes.insert("imports".to_string(), serde_json::to_value(&result)?);
            }
            StepKind::ExtractCommon {
                unit_name,
                module_path,
                files,
            } => {
                changes = self.extract(unit_name, module_path, files)?;
            }
            StepKind::SplitUnit {
                file, unit, limit, ..
            } => {
                let result = UnitSplitter::new(parser).split_in_file(file, unit, *limit)?;
                changes.insert("unit_split".to_string(), serde_json::to_value(&result)?);
            }
            StepKind::SplitFile { file, limit, .. } => {
                let source = fs::read_to_string(file)?;
                let lines = count_code_lines(&source);
                if lines <= *limit {
                    debug!(file = %file.display(), lines, "File already within limit");
                    changes.insert("skipped".to_string(), json!("within limit"));
                    return Ok(changes);
                }
                let target_dir = file.parent().unwrap_or_else(|| self.context.project.root());
                let result = FileSplitter::new(parser).split(file, target_dir)?;
                changes.insert("file_split".to_string(), serde_json::to_value(&result)?);
            }
        }
        Ok(changes)
    }

    fn extract(
        &self,
        unit_name: &str,
        module_path: &Path,
        files: &[std::path::PathBuf],
    ) -> Result<BTreeMap<String, Value>> {
        let first = files.first().ok_or_else(|| {
            RefactoringError::Validation(format!("no files given for {}", unit_name))
        })?;
        let module = self
            .context
            .parser
            .parse_file(first)
            .map_err(|e| RefactoringError::parse(first, &e))?;
        let index = module
            .item_index_of(unit_name)
            .ok_or_else(|| RefactoringError::UnitNotFound(unit_name.to_string()))?;
        let shared_code = module.text_of(module.items[index].text_span);
        let imports: Vec<_> = module.imports().cloned().collect();

        let extractor = CommonModuleExtractor::new(self.context.parser.clone());
        let import_path = self.context.project.module_path(module_path);
        let extraction = extractor.extract(
            &shared_code,
            &module_stem(module_path),
            module_path,
            &import_path,
            &imports,
        )?;
        let updates = extractor.update_references(files, &import_path, unit_name);

        let failures: Vec<String> = updates
            .iter()
            .filter_map(|u| u.error.as_ref().map(|e| format!("{}: {}", u.path.display(), e)))
            .collect();
        info!(
            unit = %unit_name,
            module = %import_path,
            updated = updates.iter().filter(|u| u.updated).count(),
            failed = failures.len(),
            "Extracted common unit"
        );
        if !failures.is_empty() {
            return Err(RefactoringError::RunFailure(format!(
                "reference update failed for {}",
                failures.join("; ")
            )));
        }

        let mut changes = BTreeMap::new();
        changes.insert("extraction".to_string(), serde_json::to_value(&extraction)?);
        changes.insert("references".to_string(), serde_json::to_value(&updates)?);
        Ok(changes)
    }
}

impl StepHandler for StepApplier<'_> {
    fn apply(&self, kind: &StepKind) -> Result<BTreeMap<String, Value>> {
        self.dispatch(kind)
    }
}
