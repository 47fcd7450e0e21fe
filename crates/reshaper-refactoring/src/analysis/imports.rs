//! Import edges between architecture layers

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use reshaper_parsers::{ImportKind, ImportStatement, ImportedName, ParsedModule};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::{Layer, LayerClassifier, LayerMatch, LayerRules, ViolationKind};
use crate::project::ProjectTree;

/// An import that breaks the layer table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureViolation {
    pub source_file: PathBuf,
    /// Absolute dotted module the import resolves to
    pub target_module: String,
    pub import_text: String,
    pub line: usize,
    pub violation_kind: ViolationKind,
    pub source_layer: Layer,
    pub target_layer: Layer,
    pub suggested_fix: String,
}

/// A module reached by an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    /// Absolute dotted module name
    pub module: String,
    /// File implementing the module, when it exists in the project
    pub file: Option<PathBuf>,
    /// Names imported from this module; empty for plain imports
    pub names: Vec<ImportedName>,
}

/// One classified edge of an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEdge {
    pub target: ImportTarget,
    pub layer: LayerMatch,
    pub violation: Option<ViolationKind>,
}

/// Classifies local imports and checks them against the layer table
#[derive(Debug, Clone)]
pub struct ImportAnalyzer {
    project: ProjectTree,
    rules: LayerRules,
    classifier: LayerClassifier,
    local_roots: BTreeSet<String>,
}

impl ImportAnalyzer {
    /// Creates a new ImportAnalyzer instance
    ///
    /// Local root packages are discovered once, at construction.
    pub fn new(project: &ProjectTree, rules: LayerRules) -> Result<Self> {
        Ok(Self {
            project: project.clone(),
            rules,
            classifier: LayerClassifier::new(),
            local_roots: project.local_roots()?,
        })
    }

    pub fn rules(&self) -> &LayerRules {
        &self.rules
    }

    pub fn project(&self) -> &ProjectTree {
        &self.project
    }

    pub fn classifier(&self) -> &LayerClassifier {
        &self.classifier
    }

    /// Layer of a project file
    pub fn file_layer(&self, file: &Path) -> LayerMatch {
        self.classifier.classify_path(&self.project.relative(file))
    }

    /// Whether an import refers to code inside the project
    pub fn is_local(&self, import: &ImportStatement) -> bool {
        if import.kind == ImportKind::Future {
            return false;
        }
        if import.is_relative() {
            return true;
        }
        import
            .root_package()
            .map(|root| self.local_roots.contains(&root))
            .unwrap_or(false)
    }

    /// Modules an import statement written in `file` resolves to
    pub fn resolve_targets(&self, file: &Path, import: &ImportStatement) -> Vec<ImportTarget> {
        match import.kind {
            ImportKind::Future => Vec::new(),
            ImportKind::Import => import
                .names
                .iter()
                .map(|name| ImportTarget {
                    module: name.name.clone(),
                    file: self.project.resolve_module(&name.name),
                    names: Vec::new(),
                })
                .collect(),
            ImportKind::From => {
                let base = if import.is_relative() {
                    match self
                        .project
                        .resolve_relative(file, import.level, &import.module)
                    {
                        Some(base) => base,
                        None => return Vec::new(),
                    }
                } else {
                    import.module.clone()
                };

                let mut targets: BTreeMap<String, Vec<ImportedName>> = BTreeMap::new();
                for name in &import.names {
                    let submodule = format!("{}.{}", base, name.name);
                    let module = if name.name != "*" && self.project.resolve_module(&submodule).is_some() {
                        submodule
                    } else {
                        base.clone()
                    };
                    targets.entry(module).or_default().push(name.clone());
                }
                targets
                    .into_iter()
                    .map(|(module, names)| ImportTarget {
                        file: self.project.resolve_module(&module),
                        module,
                        names,
                    })
                    .collect()
            }
        }
    }

    /// Layer of an import target, by file when known, else by module name
    pub fn target_layer(&self, target: &ImportTarget) -> LayerMatch {
        match &target.file {
            Some(path) => self.classifier.classify_path(&self.project.relative(path)),
            None => self.classifier.classify_module(&target.module),
        }
    }

    /// Classify every edge of a local import; empty for non-local imports
    pub fn classify_import(&self, file: &Path, import: &ImportStatement) -> Vec<ImportEdge> {
        if !self.is_local(import) {
            return Vec::new();
        }
        let source_layer = self.file_layer(file).layer;
        self.resolve_targets(file, import)
            .into_iter()
            .map(|target| {
                let layer = self.target_layer(&target);
                ImportEdge {
                    violation: self.rules.check(source_layer, layer.layer),
                    target,
                    layer,
                }
            })
            .collect()
    }

    /// Every disallowed import edge of a parsed module
    pub fn violations(&self, file: &Path, module: &ParsedModule) -> Vec<ArchitectureViolation> {
        let source_layer = self.file_layer(file).layer;
        let mut violations = Vec::new();
        for import in module.imports() {
            for edge in self.classify_import(file, import) {
                let kind = match edge.violation {
                    Some(kind) => kind,
                    None => continue,
                };
                violations.push(ArchitectureViolation {
                    source_file: self.project.relative(file),
                    target_module: edge.target.module.clone(),
                    import_text: import.text.clone(),
                    line: import.span.start_line,
                    violation_kind: kind,
                    source_layer,
                    target_layer: edge.layer.layer,
                    suggested_fix: self.suggest_fix(source_layer, edge.layer.layer, kind),
                });
            }
        }
        violations
    }

    fn suggest_fix(&self, from: Layer, to: Layer, kind: ViolationKind) -> String {
        match kind {
            ViolationKind::SkipLayer => match self.rules.substitute(from, to) {
                Some(layer) => format!("import from the {} layer instead of {}", layer, to),
                None => format!("remove the import of the {} layer", to),
            },
            ViolationKind::Upward => format!(
                "remove the import; {} code must not depend on the {} layer",
                from, to
            ),
        }
    }
}
