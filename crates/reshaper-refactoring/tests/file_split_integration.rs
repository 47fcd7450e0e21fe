//! File split integration: every output carries the original imports and parses

use std::fs;

use reshaper_parsers::SourceParser;
use reshaper_refactoring::FileSplitter;
use tempfile::TempDir;

const INVENTORY: &str = r#"import json
from decimal import Decimal


def validate_item(item):
    if not item.get("sku"):
        raise ValueError("sku")
    return True


def save_item(store, item):
    validate_item(item)
    store[item["sku"]] = json.dumps(item)


def calculate_value(item):
    return Decimal(item["qty"]) * Decimal(item["price"])


def render_item(item):
    return "{}: {}".format(item["sku"], calculate_value(item))
"#;

#[test]
fn test_every_output_keeps_original_imports() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("inventory.py");
    fs::write(&file, INVENTORY).unwrap();

    let parser = SourceParser::new();
    let result = FileSplitter::new(parser.clone())
        .split(&file, temp_dir.path())
        .unwrap();

    assert_eq!(result.created.len(), 4);
    assert!(result.removed_original);
    assert!(!file.exists());
    for created in &result.created {
        let text = fs::read_to_string(created).unwrap();
        assert!(text.contains("import json\n"), "{}", created.display());
        assert!(text.contains("from decimal import Decimal\n"), "{}", created.display());
        assert!(parser.parse(&text).is_ok());
    }

    let aggregator = fs::read_to_string(temp_dir.path().join("__init__.py")).unwrap();
    assert_eq!(result.aggregator_lines_added, 4);
    assert!(aggregator.contains("from .inventory_validation import *\n"));

    let persistence = fs::read_to_string(temp_dir.path().join("inventory_persistence.py")).unwrap();
    assert!(persistence.contains("from .inventory_validation import validate_item\n"));
}
