//! Architecture layers and the allowed-dependency table
//!
//! Files are assigned to a layer by matching their path segments against
//! keyword sets. The table lists, for each layer, the other layers it may
//! import from; every layer may always import from itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Architecture layer of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Presentation,
    Service,
    Persistence,
    Storage,
    Shared,
}

impl Layer {
    pub const STACKED: [Layer; 4] = [
        Layer::Presentation,
        Layer::Service,
        Layer::Persistence,
        Layer::Storage,
    ];

    /// Position in the stack, top first; `None` for the shared layer
    pub fn rank(&self) -> Option<usize> {
        match self {
            Layer::Presentation => Some(0),
            Layer::Service => Some(1),
            Layer::Persistence => Some(2),
            Layer::Storage => Some(3),
            Layer::Shared => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Presentation => "presentation",
            Layer::Service => "service",
            Layer::Persistence => "persistence",
            Layer::Storage => "storage",
            Layer::Shared => "shared",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an import breaks the layer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Target sits above the importing layer, or a shared module imports a layer
    Upward,
    /// Target sits below the importing layer but is not directly allowed
    SkipLayer,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Upward => f.write_str("upward"),
            ViolationKind::SkipLayer => f.write_str("skip_layer"),
        }
    }
}

/// Allowed import edges between layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerRules {
    allowed: BTreeMap<Layer, BTreeSet<Layer>>,
}

impl LayerRules {
    /// Create an empty table (each layer may only import itself)
    pub fn new() -> Self {
        Self {
            allowed: BTreeMap::new(),
        }
    }

    /// Allow `from` to import `to`
    pub fn allow(mut self, from: Layer, to: Layer) -> Self {
        self.allowed.entry(from).or_default().insert(to);
        self
    }

    pub fn allowed_targets(&self, from: Layer) -> BTreeSet<Layer> {
        let mut targets = self.allowed.get(&from).cloned().unwrap_or_default();
        targets.insert(from);
        targets
    }

    pub fn is_allowed(&self, from: Layer, to: Layer) -> bool {
        from == to
            || self
                .allowed
                .get(&from)
                .map(|targets| targets.contains(&to))
                .unwrap_or(false)
    }

    /// Classify a disallowed edge; `None` when the import is allowed
    pub fn check(&self, from: Layer, to: Layer) -> Option<ViolationKind> {
        if self.is_allowed(from, to) {
            return None;
        }
        match (from.rank(), to.rank()) {
            (Some(from_rank), Some(to_rank)) if to_rank > from_rank => {
                Some(ViolationKind::SkipLayer)
            }
            _ => Some(ViolationKind::Upward),
        }
    }

    /// Nearest allowed layer between `from` and a skipped target `to`
    pub fn substitute(&self, from: Layer, to: Layer) -> Option<Layer> {
        let (from_rank, to_rank) = (from.rank()?, to.rank()?);
        Layer::STACKED
            .iter()
            .copied()
            .filter(|layer| {
                layer
                    .rank()
                    .map(|rank| rank > from_rank && rank < to_rank)
                    .unwrap_or(false)
            })
            .filter(|layer| self.is_allowed(from, *layer))
            .max_by_key(|layer| layer.rank())
    }
}

impl Default for LayerRules {
    fn default() -> Self {
        LayerRules::new()
            .allow(Layer::Presentation, Layer::Service)
            .allow(Layer::Presentation, Layer::Shared)
            .allow(Layer::Service, Layer::Persistence)
            .allow(Layer::Service, Layer::Shared)
            .allow(Layer::Persistence, Layer::Storage)
            .allow(Layer::Persistence, Layer::Shared)
            .allow(Layer::Storage, Layer::Shared)
    }
}

const PRESENTATION_KEYWORDS: [&str; 12] = [
    "presentation", "ui", "views", "view", "templates", "routes", "controllers", "handlers",
    "web", "cli", "pages", "api",
];
const SERVICE_KEYWORDS: [&str; 7] = [
    "service", "services", "business", "domain", "usecases", "application", "logic",
];
const PERSISTENCE_KEYWORDS: [&str; 7] = [
    "persistence", "repositories", "repository", "dal", "dao", "models", "orm",
];
const STORAGE_KEYWORDS: [&str; 4] = ["storage", "db", "database", "cache"];
const SHARED_KEYWORDS: [&str; 6] = ["shared", "common", "utils", "lib", "core", "helpers"];

/// Result of classifying a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMatch {
    pub layer: Layer,
    /// Index of the segment that decided the layer
    pub segment: Option<usize>,
}

/// Maps paths and dotted module names to layers by segment keywords
#[derive(Debug, Clone)]
pub struct LayerClassifier {
    keywords: Vec<(Layer, BTreeSet<String>)>,
}

impl LayerClassifier {
    pub fn new() -> Self {
        let family = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            keywords: vec![
                (Layer::Presentation, family(&PRESENTATION_KEYWORDS)),
                (Layer::Service, family(&SERVICE_KEYWORDS)),
                (Layer::Persistence, family(&PERSISTENCE_KEYWORDS)),
                (Layer::Storage, family(&STORAGE_KEYWORDS)),
                (Layer::Shared, family(&SHARED_KEYWORDS)),
            ],
        }
    }

    fn layer_of_segment(&self, segment: &str) -> Option<Layer> {
        let segment = segment.to_lowercase();
        self.keywords
            .iter()
            .find(|(_, words)| words.contains(&segment))
            .map(|(layer, _)| *layer)
    }

    /// Classify a sequence of segments, deepest directory first, file stem last
    pub fn classify_segments(&self, segments: &[String], has_stem: bool) -> LayerMatch {
        let dir_count = if has_stem {
            segments.len().saturating_sub(1)
        } else {
            segments.len()
        };
        let mut order: Vec<usize> = (0..dir_count).rev().collect();
        if has_stem && !segments.is_empty() {
            order.push(segments.len() - 1);
        }

        for index in order {
            if let Some(layer) = self.layer_of_segment(&segments[index]) {
                return LayerMatch {
                    layer,
                    segment: Some(index),
                };
            }
        }
        LayerMatch {
            layer: Layer::Shared,
            segment: None,
        }
    }

    /// Classify a file path relative to the project root
    pub fn classify_path(&self, relative: &Path) -> LayerMatch {
        let segments = path_segments(relative);
        self.classify_segments(&segments, true)
    }

    /// Classify a dotted module name whose file could not be found
    pub fn classify_module(&self, dotted: &str) -> LayerMatch {
        let segments: Vec<String> = dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.classify_segments(&segments, true)
    }
}

impl Default for LayerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory names plus the file stem of a relative path
pub fn path_segments(relative: &Path) -> Vec<String> {
    let mut segments: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) {
        segments.push(stem.to_string());
    }
    segments
}
