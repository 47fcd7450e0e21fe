//! Analysis of a project tree and construction of the refactoring plan
//!
//! Planning never touches the filesystem beyond reading sources.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use reshaper_parsers::{ItemKind, ParsedModule, SourceParser};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{
    suggest_common_modules, ArchitectureViolation, CommonModuleSuggestion, DuplicateBlockPair,
    DuplicateDetector, FileSizeAnalyzer, ImportAnalyzer, SizeViolation, UnitSizeAnalyzer,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::plan::models::{Advisory, AdvisoryKind, RefactoringPlan, StepKind};
use crate::project::{ProjectTree, AGGREGATOR_FILE};
use crate::transform::{CommonModuleExtractor, HeaderStandardizer};

/// Findings of every analyzer over the target files
#[derive(Debug, Clone, Default)]
pub struct ProjectAnalysis {
    pub target_dirs: Vec<PathBuf>,
    pub files_seen: Vec<PathBuf>,
    pub parsed: Vec<(PathBuf, ParsedModule)>,
    /// Files that could not be read or parsed, with the reason
    pub skipped: Vec<(PathBuf, String)>,
    pub oversized_files: Vec<SizeViolation>,
    pub oversized_units: Vec<SizeViolation>,
    pub duplicate_pairs: Vec<DuplicateBlockPair>,
    pub suggestions: Vec<CommonModuleSuggestion>,
    pub architecture_violations: BTreeMap<PathBuf, Vec<ArchitectureViolation>>,
    pub missing_headers: Vec<PathBuf>,
}

impl ProjectAnalysis {
    fn module(&self, path: &Path) -> Option<&ParsedModule> {
        self.parsed
            .iter()
            .find(|(file, _)| file == path)
            .map(|(_, module)| module)
    }
}

/// Counts reported for an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCounts {
    pub files_seen: usize,
    pub skipped: usize,
    pub oversized_files: usize,
    pub oversized_units: usize,
    pub duplicate_pairs: usize,
    pub architecture_violations: usize,
    pub missing_headers: usize,
}

impl From<&ProjectAnalysis> for AnalysisCounts {
    fn from(analysis: &ProjectAnalysis) -> Self {
        Self {
            files_seen: analysis.files_seen.len(),
            skipped: analysis.skipped.len(),
            oversized_files: analysis.oversized_files.len(),
            oversized_units: analysis.oversized_units.len(),
            duplicate_pairs: analysis.duplicate_pairs.len(),
            architecture_violations: analysis.architecture_violations.values().map(Vec::len).sum(),
            missing_headers: analysis.missing_headers.len(),
        }
    }
}

/// Runs the analyzers and orders their findings into a plan
#[derive(Debug, Clone)]
pub struct Planner {
    config: EngineConfig,
    project: ProjectTree,
    parser: SourceParser,
    imports: ImportAnalyzer,
}

impl Planner {
    /// Creates a new Planner instance
    pub fn new(config: &EngineConfig, project: &ProjectTree, parser: SourceParser) -> Result<Self> {
        Ok(Self {
            imports: ImportAnalyzer::new(project, config.layer_rules.clone())?,
            config: config.clone(),
            project: project.clone(),
            parser,
        })
    }

    /// Analyze every source file under `target_dirs` (the whole project when empty)
    pub fn analyze(&self, target_dirs: &[PathBuf]) -> Result<ProjectAnalysis> {
        let files = self.project.python_files(target_dirs)?;
        let mut analysis = ProjectAnalysis {
            target_dirs: target_dirs.to_vec(),
            files_seen: files.clone(),
            ..ProjectAnalysis::default()
        };

        let file_sizes = FileSizeAnalyzer::new(self.config.file_limit);
        let unit_sizes = UnitSizeAnalyzer::new(self.config.unit_limit);
        let headers = HeaderStandardizer::new(self.parser.clone());

        for file in files {
            let source = match fs::read_to_string(&file) {
                Ok(source) => source,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping unreadable file");
                    analysis.skipped.push((file, e.to_string()));
                    continue;
                }
            };
            let module = match self.parser.parse(&source) {
                Ok(module) => module,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping unparsable file");
                    analysis.skipped.push((file, e.to_string()));
                    continue;
                }
            };

            if let Some(violation) = file_sizes.analyze(&file, &source) {
                analysis.oversized_files.push(violation);
            }
            analysis
                .oversized_units
                .extend(unit_sizes.analyze(&file, &module));
            let violations = self.imports.violations(&file, &module);
            if !violations.is_empty() {
                analysis
                    .architecture_violations
                    .insert(file.clone(), violations);
            }
            if headers.needs_header(&file, &source) {
                analysis.missing_headers.push(file.clone());
            }
            analysis.parsed.push((file, module));
        }

        let detector = DuplicateDetector::new(
            self.config.similarity_threshold,
            self.config.min_block_lines,
        );
        let modules: Vec<(&Path, &ParsedModule)> = analysis
            .parsed
            .iter()
            .map(|(path, module)| (path.as_path(), module))
            .collect();
        analysis.duplicate_pairs = detector.detect(&modules);
        analysis.suggestions = suggest_common_modules(&analysis.duplicate_pairs);

        let counts = AnalysisCounts::from(&analysis);
        info!(
            files = counts.files_seen,
            skipped = counts.skipped,
            oversized_files = counts.oversized_files,
            oversized_units = counts.oversized_units,
            duplicates = counts.duplicate_pairs,
            violations = counts.architecture_violations,
            "Analysis finished"
        );
        Ok(analysis)
    }

    /// Build the plan: headers, imports, extraction, unit splits, file splits
    pub fn plan(&self, analysis: &ProjectAnalysis) -> RefactoringPlan {
        let mut plan = RefactoringPlan::new(
            self.project.root().to_path_buf(),
            analysis.target_dirs.clone(),
        );
        plan.total_files_seen = analysis.files_seen.len();

        for (file, reason) in &analysis.skipped {
            plan.skipped_files.push(file.clone());
            plan.advisories.push(Advisory {
                kind: AdvisoryKind::SkippedFile,
                message: format!("Skipped {}: {}", self.project.relative(file).display(), reason),
                files: vec![file.clone()],
            });
        }

        if self.config.standardize_headers {
            for file in &analysis.missing_headers {
                plan.push_step(StepKind::StandardizeHeader { file: file.clone() });
            }
        }

        for (file, violations) in &analysis.architecture_violations {
            plan.push_step(StepKind::FixImports {
                file: file.clone(),
                violations: violations.clone(),
            });
        }

        let mut extracted: BTreeSet<(PathBuf, String)> = BTreeSet::new();
        for suggestion in &analysis.suggestions {
            match self.extraction_blocker(analysis, suggestion) {
                None => {
                    let unit_name = suggestion.unit_names[0].clone();
                    let (module_path, _) = CommonModuleExtractor::shared_location(
                        &self.project,
                        &suggestion.files,
                        &suggestion.module_name,
                    );
                    for file in &suggestion.files {
                        extracted.insert((file.clone(), unit_name.clone()));
                    }
                    plan.push_step(StepKind::ExtractCommon {
                        unit_name,
                        module_path,
                        files: suggestion.files.clone(),
                    });
                }
                Some(reason) => plan.advisories.push(Advisory {
                    kind: AdvisoryKind::NearDuplicate,
                    message: format!(
                        "Duplicated {} not extracted: {}",
                        suggestion.unit_names.join(", "),
                        reason
                    ),
                    files: suggestion.files.clone(),
                }),
            }
        }

        for violation in &analysis.oversized_units {
            let unit = match &violation.unit {
                Some(unit) => unit.clone(),
                None => continue,
            };
            if extracted.contains(&(violation.path.clone(), unit.clone())) {
                continue;
            }
            plan.push_step(StepKind::SplitUnit {
                file: violation.path.clone(),
                unit,
                line_count: violation.line_count,
                limit: violation.limit,
            });
        }

        for violation in &analysis.oversized_files {
            if violation.path.file_name().and_then(|n| n.to_str()) == Some(AGGREGATOR_FILE) {
                continue;
            }
            plan.push_step(StepKind::SplitFile {
                file: violation.path.clone(),
                line_count: violation.line_count,
                limit: violation.limit,
            });
        }

        let flagged: BTreeSet<&PathBuf> = plan
            .steps
            .iter()
            .flat_map(|step| match &step.kind {
                StepKind::ExtractCommon { files, .. } => files.iter().collect::<Vec<_>>(),
                StepKind::SplitFile { file, .. }
                | StepKind::SplitUnit { file, .. }
                | StepKind::FixImports { file, .. }
                | StepKind::StandardizeHeader { file } => vec![file],
            })
            .collect();
        plan.flagged_file_count = flagged.len();

        info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            flagged = plan.flagged_file_count,
            advisories = plan.advisories.len(),
            "Plan built"
        );
        plan
    }

    /// Why a suggestion cannot be extracted automatically, if it cannot
    fn extraction_blocker(
        &self,
        analysis: &ProjectAnalysis,
        suggestion: &CommonModuleSuggestion,
    ) -> Option<String> {
        if !suggestion.identical {
            return Some("blocks are similar but not identical".to_string());
        }
        if suggestion.unit_names.len() != 1 {
            return Some("blocks have different names".to_string());
        }
        if suggestion.blocks.len() != suggestion.files.len() {
            return Some("a file holds more than one copy".to_string());
        }

        let unit = &suggestion.unit_names[0];
        let mut first_origins: Option<(&PathBuf, BTreeMap<String, String>)> = None;
        for file in &suggestion.files {
            let module = match analysis.module(file) {
                Some(module) => module,
                None => return Some(format!("{} was not parsed", file.display())),
            };
            let definition = match module.find_definition(unit) {
                Some(definition) => definition,
                None => return Some(format!("{} not found in {}", unit, file.display())),
            };
            let mut local_names = BTreeSet::new();
            let mut imported: BTreeMap<String, (String, bool)> = BTreeMap::new();
            for item in &module.items {
                match &item.kind {
                    ItemKind::Import(import) => {
                        for (name, origin) in import.bindings() {
                            imported.insert(name, (origin, import.is_relative()));
                        }
                    }
                    ItemKind::Definition(_) | ItemKind::Statement => {
                        local_names.extend(item.bound_names.iter().cloned());
                    }
                    ItemKind::Docstring => {}
                }
            }
            local_names.remove(unit);

            let mut origins = BTreeMap::new();
            for name in &definition.referenced_names {
                if local_names.contains(name) {
                    return Some(format!(
                        "{} references module-level name {} in {}",
                        unit,
                        name,
                        file.display()
                    ));
                }
                if let Some((origin, relative)) = imported.get(name) {
                    if *relative {
                        return Some(format!(
                            "{} needs relative import of {} in {}",
                            unit,
                            name,
                            file.display()
                        ));
                    }
                    origins.insert(name.clone(), origin.clone());
                }
            }

            match &first_origins {
                None => first_origins = Some((file, origins)),
                Some((first, expected)) if *expected != origins => {
                    return Some(format!(
                        "{} imports its names differently in {} and {}",
                        unit,
                        first.display(),
                        file.display()
                    ));
                }
                Some(_) => {}
            }
        }
        debug!(unit = %unit, files = suggestion.files.len(), "Duplicate is extractable");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::models::StepStatus;
    use tempfile::TempDir;

    const NORMALIZE: &str = "def normalize_row(row):\n    cleaned = {}\n    for key, value in row.items():\n        if value is None:\n            continue\n        cleaned[key.strip()] = value\n    return cleaned\n";

    fn planner(root: &Path, config: EngineConfig) -> Planner {
        let project = ProjectTree::new(root, &config);
        Planner::new(&config, &project, SourceParser::new()).unwrap()
    }

    fn headerless() -> EngineConfig {
        EngineConfig {
            standardize_headers: false,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_clean_project_gives_empty_plan() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("app.py"), "\"\"\"App.\"\"\"\nX = 1\n").unwrap();

        let planner = planner(temp_dir.path(), EngineConfig::default());
        let analysis = planner.analyze(&[]).unwrap();
        let plan = planner.plan(&analysis);
        assert!(plan.is_empty());
        assert_eq!(plan.total_files_seen, 1);
    }

    #[test]
    fn test_unparsable_file_becomes_advisory() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.py"), "def broken(:\n").unwrap();

        let planner = planner(temp_dir.path(), headerless());
        let plan = planner.plan(&planner.analyze(&[]).unwrap());
        assert!(plan.is_empty());
        assert_eq!(plan.skipped_files.len(), 1);
        assert_eq!(plan.advisories[0].kind, AdvisoryKind::SkippedFile);
    }

    #[test]
    fn test_step_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("ui")).unwrap();
        fs::create_dir_all(root.join("storage")).unwrap();
        fs::write(root.join("storage/db.py"), "\"\"\"Db.\"\"\"\nX = 1\n").unwrap();
        fs::write(root.join("ui/a.py"), format!("from storage.db import X\n\n\n{}", NORMALIZE)).unwrap();
        fs::write(root.join("ui/b.py"), format!("\"\"\"B.\"\"\"\n\n\n{}", NORMALIZE)).unwrap();

        let config = EngineConfig {
            file_limit: 5,
            unit_limit: 5,
            ..EngineConfig::default()
        };
        let planner = planner(root, config);
        let plan = planner.plan(&planner.analyze(&[]).unwrap());

        let kinds: Vec<&str> = plan
            .steps
            .iter()
            .map(|s| match s.kind {
                StepKind::StandardizeHeader { .. } => "header",
                StepKind::FixImports { .. } => "imports",
                StepKind::ExtractCommon { .. } => "extract",
                StepKind::SplitUnit { .. } => "unit",
                StepKind::SplitFile { .. } => "file",
            })
            .collect();
        // extracted units are not split again
        assert_eq!(kinds, vec!["header", "imports", "extract", "file", "file"]);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(plan.flagged_file_count, 2);

        match &plan.steps[2].kind {
            StepKind::ExtractCommon { module_path, .. } => {
                assert_eq!(module_path, &root.join("ui/shared/normalize_row.py"))
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_with_local_reference_is_advisory() {
        let temp_dir = TempDir::new().unwrap();
        let body = "def total(rows):\n    result = 0\n    for row in rows:\n        result += row\n        result *= FACTOR\n    return result\n";
        for name in ["a.py", "b.py"] {
            fs::write(temp_dir.path().join(name), format!("FACTOR = 2\n\n\n{}", body)).unwrap();
        }

        let planner = planner(temp_dir.path(), headerless());
        let plan = planner.plan(&planner.analyze(&[]).unwrap());
        assert!(plan.is_empty());
        assert_eq!(plan.advisories.len(), 1);
        assert_eq!(plan.advisories[0].kind, AdvisoryKind::NearDuplicate);
        assert!(plan.advisories[0].message.contains("FACTOR"));
    }

    #[test]
    fn test_duplicate_importing_names_differently_is_advisory() {
        let temp_dir = TempDir::new().unwrap();
        let body = "def spread(values):\n    low = min(values)\n    high = max(values)\n    width = high - low\n    scaled = width * 2\n    return sqrt(scaled)\n";
        fs::write(temp_dir.path().join("a.py"), format!("from math import sqrt\n\n\n{}", body)).unwrap();
        fs::write(temp_dir.path().join("b.py"), format!("from cmath import sqrt\n\n\n{}", body)).unwrap();

        let planner = planner(temp_dir.path(), headerless());
        let plan = planner.plan(&planner.analyze(&[]).unwrap());
        assert!(plan.is_empty());
        assert_eq!(plan.advisories.len(), 1);
        assert!(plan.advisories[0].message.contains("imports its names differently"));
    }

    #[test]
    fn test_duplicate_with_different_defaults_is_advisory() {
        let temp_dir = TempDir::new().unwrap();
        let body = "    out = []\n    for value in values:\n        value = value * k\n        out.append(value)\n    out.sort()\n    return out\n";
        for (name, default) in [("a.py", 1), ("b.py", 100)] {
            fs::write(
                temp_dir.path().join(name),
                format!("def scale(values, k={}):\n{}", default, body),
            )
            .unwrap();
        }

        let planner = planner(temp_dir.path(), headerless());
        let analysis = planner.analyze(&[]).unwrap();
        assert_eq!(analysis.duplicate_pairs.len(), 1);
        assert!(!analysis.duplicate_pairs[0].identical);

        let plan = planner.plan(&analysis);
        assert!(plan.is_empty());
        assert_eq!(plan.advisories[0].kind, AdvisoryKind::NearDuplicate);
    }
}
