//! Duplicate block detection across files
//!
//! Candidates are top-level function bodies. Bodies are normalized (blank
//! and comment lines dropped, common indentation removed) and compared
//! with a line diff; pairs are only ever formed across files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use reshaper_parsers::lines::{common_indent, dedent};
use reshaper_parsers::{count_code_lines, ParsedModule};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use tracing::debug;

use crate::analysis::grouping::normalize_name;

/// Location of a candidate block
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DuplicateBlock {
    pub file: PathBuf,
    pub line_start: usize,
    pub line_end: usize,
    pub unit_name: String,
}

/// Two similar blocks in different files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateBlockPair {
    pub block_a: DuplicateBlock,
    pub block_b: DuplicateBlock,
    pub similarity: f64,
    /// Same normalized definition text, decorators and signature included
    pub identical: bool,
}

/// Blocks connected by duplicate pairs, proposed as one shared module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonModuleSuggestion {
    pub module_name: String,
    pub unit_names: Vec<String>,
    pub blocks: Vec<DuplicateBlock>,
    pub files: Vec<PathBuf>,
    pub identical: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    block: DuplicateBlock,
    normalized: String,
    definition: String,
}

/// Finds similar function bodies across files
#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector {
    threshold: f64,
    min_lines: usize,
}

impl DuplicateDetector {
    /// Creates a new DuplicateDetector instance
    ///
    /// # Arguments
    ///
    /// * `threshold` - Minimum similarity in (0, 1]
    /// * `min_lines` - Minimum body code lines for a candidate
    pub fn new(threshold: f64, min_lines: usize) -> Self {
        Self {
            threshold,
            min_lines,
        }
    }

    fn candidates(&self, path: &Path, module: &ParsedModule) -> Vec<Candidate> {
        module
            .functions()
            .filter_map(|definition| {
                let body = module.text_of(definition.body_span);
                if count_code_lines(&body) < self.min_lines {
                    return None;
                }
                Some(Candidate {
                    block: DuplicateBlock {
                        file: path.to_path_buf(),
                        line_start: definition.span.start_line,
                        line_end: definition.span.end_line,
                        unit_name: definition.name.clone(),
                    },
                    normalized: normalize_block(&body),
                    definition: normalize_block(&module.text_of(definition.span)),
                })
            })
            .collect()
    }

    /// Every cross-file pair at or above the threshold, deterministically ordered
    pub fn detect(&self, modules: &[(&Path, &ParsedModule)]) -> Vec<DuplicateBlockPair> {
        let mut candidates: Vec<Candidate> = modules
            .iter()
            .flat_map(|(path, module)| self.candidates(path, module))
            .collect();
        candidates.sort_by(|a, b| a.block.cmp(&b.block));

        let mut pairs = Vec::new();
        for (i, first) in candidates.iter().enumerate() {
            for second in &candidates[i + 1..] {
                if first.block.file == second.block.file {
                    continue;
                }
                let score = similarity(&first.normalized, &second.normalized);
                if score >= self.threshold {
                    pairs.push(DuplicateBlockPair {
                        block_a: first.block.clone(),
                        block_b: second.block.clone(),
                        similarity: score,
                        identical: first.block.unit_name == second.block.unit_name
                            && first.definition == second.definition,
                    });
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            pairs = pairs.len(),
            "Duplicate detection finished"
        );
        pairs
    }
}

/// Strip blank and comment lines and the common indentation
pub fn normalize_block(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect();
    let joined = kept.iter().map(|l| format!("{}\n", l)).collect::<String>();
    let width = common_indent(&joined);
    dedent(&joined, width).unwrap_or(joined)
}

/// Symmetric line similarity of two normalized blocks in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let forward = TextDiff::from_lines(a, b).ratio() as f64;
    let backward = TextDiff::from_lines(b, a).ratio() as f64;
    (forward + backward) / 2.0
}

/// Group blocks connected by pairs into one suggestion per component
pub fn suggest_common_modules(pairs: &[DuplicateBlockPair]) -> Vec<CommonModuleSuggestion> {
    let mut index: BTreeMap<&DuplicateBlock, usize> = BTreeMap::new();
    for pair in pairs {
        for block in [&pair.block_a, &pair.block_b] {
            let next = index.len();
            index.entry(block).or_insert(next);
        }
    }

    let mut parent: Vec<usize> = (0..index.len()).collect();
    fn find(parent: &mut [usize], mut node: usize) -> usize {
        while parent[node] != node {
            parent[node] = parent[parent[node]];
            node = parent[node];
        }
        node
    }
    for pair in pairs {
        let (a, b) = (index[&pair.block_a], index[&pair.block_b]);
        let (root_a, root_b) = (find(&mut parent, a), find(&mut parent, b));
        if root_a != root_b {
            parent[root_a.max(root_b)] = root_a.min(root_b);
        }
    }

    let mut components: BTreeMap<usize, Vec<&DuplicateBlock>> = BTreeMap::new();
    for (block, id) in &index {
        let root = find(&mut parent, *id);
        components.entry(root).or_default().push(*block);
    }

    let mut suggestions: Vec<CommonModuleSuggestion> = components
        .into_values()
        .map(|mut blocks| {
            blocks.sort();
            let members: BTreeSet<&DuplicateBlock> = blocks.iter().copied().collect();
            let identical = pairs
                .iter()
                .filter(|p| members.contains(&p.block_a))
                .all(|p| p.identical);
            let unit_names: BTreeSet<String> =
                blocks.iter().map(|b| b.unit_name.clone()).collect();
            let files: BTreeSet<PathBuf> = blocks.iter().map(|b| b.file.clone()).collect();
            CommonModuleSuggestion {
                module_name: normalize_name(&blocks[0].unit_name),
                unit_names: unit_names.into_iter().collect(),
                blocks: blocks.into_iter().cloned().collect(),
                files: files.into_iter().collect(),
                identical,
            }
        })
        .collect();
    suggestions.sort_by(|a, b| a.blocks[0].cmp(&b.blocks[0]));
    suggestions
}
