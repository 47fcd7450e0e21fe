//! File and unit size checks

use std::path::{Path, PathBuf};

use reshaper_parsers::{count_code_lines, Definition, DefinitionKind, ParsedModule};
use serde::{Deserialize, Serialize};

/// A file or unit with more code lines than allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeViolation {
    pub path: PathBuf,
    /// Qualified unit name (`func` or `Class.method`); `None` for a whole file
    pub unit: Option<String>,
    pub line_count: usize,
    pub limit: usize,
    pub overrun: usize,
}

impl SizeViolation {
    fn check(path: &Path, unit: Option<String>, line_count: usize, limit: usize) -> Option<Self> {
        (line_count > limit).then(|| SizeViolation {
            path: path.to_path_buf(),
            unit,
            line_count,
            limit,
            overrun: line_count - limit,
        })
    }
}

/// Checks whole files against the file limit
#[derive(Debug, Clone, Copy)]
pub struct FileSizeAnalyzer {
    limit: usize,
}

impl FileSizeAnalyzer {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn analyze(&self, path: &Path, source: &str) -> Option<SizeViolation> {
        SizeViolation::check(path, None, count_code_lines(source), self.limit)
    }
}

/// Checks callable units against the unit limit
#[derive(Debug, Clone, Copy)]
pub struct UnitSizeAnalyzer {
    limit: usize,
}

/// Top-level functions and methods of top-level classes, in source order
pub fn callable_units(module: &ParsedModule) -> Vec<(String, &Definition)> {
    let mut units = Vec::new();
    for definition in module.definitions() {
        match definition.kind {
            DefinitionKind::Function | DefinitionKind::AsyncFunction => {
                units.push((definition.name.clone(), definition));
            }
            DefinitionKind::Class => {
                for method in definition.methods.iter().filter(|m| m.kind.is_callable()) {
                    units.push((format!("{}.{}", definition.name, method.name), method));
                }
            }
        }
    }
    units
}

impl UnitSizeAnalyzer {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Code lines of a unit, decorators and signature included
    pub fn unit_lines(module: &ParsedModule, definition: &Definition) -> usize {
        count_code_lines(&module.text_of(definition.span))
    }

    pub fn analyze(&self, path: &Path, module: &ParsedModule) -> Vec<SizeViolation> {
        callable_units(module)
            .into_iter()
            .filter_map(|(name, definition)| {
                SizeViolation::check(
                    path,
                    Some(name),
                    Self::unit_lines(module, definition),
                    self.limit,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reshaper_parsers::SourceParser;

    fn long_function(name: &str, statements: usize) -> String {
        let mut source = format!("def {}(x):\n", name);
        for i in 0..statements {
            source.push_str(&format!("    x = x + {}\n", i));
        }
        source.push_str("    return x\n");
        source
    }

    #[test]
    fn test_file_limit_is_exclusive() {
        let analyzer = FileSizeAnalyzer::new(3);
        let path = Path::new("a.py");
        assert!(analyzer.analyze(path, "a = 1\nb = 2\n# note\n\nc = 3\n").is_none());

        let violation = analyzer.analyze(path, "a = 1\nb = 2\nc = 3\nd = 4\n").unwrap();
        assert_eq!(violation.line_count, 4);
        assert_eq!(violation.overrun, 1);
        assert_eq!(violation.unit, None);
    }

    #[test]
    fn test_units_include_methods() {
        let source = format!(
            "{}\nclass Cart:\n    def total(self):\n        return 0\n\n{}",
            long_function("build", 6),
            long_function("other", 1)
        );
        let module = SourceParser::new().parse(&source).unwrap();

        let names: Vec<String> = callable_units(&module).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["build", "Cart.total", "other"]);

        let violations = UnitSizeAnalyzer::new(5).analyze(Path::new("a.py"), &module);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].unit.as_deref(), Some("build"));
        assert_eq!(violations[0].line_count, 8);
    }

    #[test]
    fn test_docstring_only_unit_never_triggers() {
        let source = "def stub():\n    \"\"\"\n    Long\n    description\n    here\n    \"\"\"\n    pass\n";
        let module = SourceParser::new().parse(source).unwrap();
        assert!(UnitSizeAnalyzer::new(3).analyze(Path::new("a.py"), &module).is_empty());
    }
}
