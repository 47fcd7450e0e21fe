//! End-to-end refactoring runs over small Python projects

use std::fs;
use std::path::{Path, PathBuf};

use reshaper_parsers::SourceParser;
use reshaper_refactoring::{
    EngineConfig, Orchestrator, Planner, ProjectTree, RefactoringPlan, RunContext, RunRequest,
    RunStatus,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn approve(_: &RefactoringPlan) -> bool {
    true
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// A function of exactly `code_lines` code lines
fn unit(name: &str, code_lines: usize) -> String {
    let mut source = format!("def {}(record):\n    value = record\n", name);
    for i in 0..code_lines - 3 {
        source.push_str(&format!("    value = value + {}\n", i));
    }
    source.push_str("    return value\n");
    source
}

fn oversized_module() -> String {
    let mut source = String::from("\"\"\"Order rules.\"\"\"\nimport math\n");
    for name in [
        "validate_order",
        "validate_customer",
        "validate_address",
        "compute_total",
        "compute_tax",
        "compute_discount",
    ] {
        source.push_str("\n\n");
        source.push_str(&unit(name, 24));
    }
    source
}

#[test]
fn test_oversized_file_split_into_two_category_files() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write(root, "orders.py", &oversized_module());

    let report = Orchestrator::new(EngineConfig::default())
        .run(&RunRequest::new(root).unattended(true), &approve);

    assert_eq!(report.status, RunStatus::Success, "{}", report);
    assert_eq!(report.steps_succeeded, 1);
    assert!(!root.join("orders.py").exists());
    assert!(root.join("orders_validation.py").exists());
    assert!(root.join("orders_calculation.py").exists());

    let aggregator = fs::read_to_string(root.join("__init__.py")).unwrap();
    assert_eq!(aggregator.lines().count(), 2);
    assert!(aggregator.contains("from .orders_validation import *"));
    assert!(aggregator.contains("from .orders_calculation import *"));

    let calculation = fs::read_to_string(root.join("orders_calculation.py")).unwrap();
    assert!(calculation.contains("import math\n"));
    assert!(calculation.contains("def compute_tax(record):"));
    assert!(!calculation.contains("def validate_order"));
}

#[test]
fn test_split_keeps_default_units_and_existing_aggregator_lines() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut source = String::from("\"\"\"Order desk.\"\"\"\nimport math\n");
    for name in [
        "validate_order",
        "check_customer",
        "save_order",
        "find_customer",
        "route_order",
        "archive_order",
    ] {
        source.push_str("\n\n");
        source.push_str(&unit(name, 24));
    }
    write(root, "shop/orders.py", &source);
    write(root, "shop/legacy.py", "\"\"\"Legacy.\"\"\"\n\n\ndef thing():\n    return 1\n");
    let aggregator_before = "\"\"\"Shop package.\"\"\"\nfrom .legacy import thing\n\nVERSION = \"1.0\"\n";
    write(root, "shop/__init__.py", aggregator_before);

    let report = Orchestrator::new(EngineConfig::default())
        .run(&RunRequest::new(root).unattended(true), &approve);
    assert_eq!(report.status, RunStatus::Success, "{}", report);

    let shop = root.join("shop");
    let mut python_files: Vec<String> = fs::read_dir(&shop)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".py"))
        .collect();
    python_files.sort();
    assert_eq!(
        python_files,
        vec![
            "__init__.py",
            "legacy.py",
            "orders.py",
            "orders_persistence.py",
            "orders_validation.py",
        ]
    );

    let remaining = fs::read_to_string(shop.join("orders.py")).unwrap();
    assert!(remaining.starts_with("\"\"\"Order desk.\"\"\"\n"));
    assert!(remaining.contains("\nimport math\n"));
    assert!(remaining.contains("def route_order(record):"));
    assert!(remaining.contains("def archive_order(record):"));
    assert!(!remaining.contains("def save_order"));

    let aggregator = fs::read_to_string(shop.join("__init__.py")).unwrap();
    assert_eq!(aggregator.lines().count(), aggregator_before.lines().count() + 2);
    for line in aggregator_before.lines() {
        assert!(aggregator.lines().any(|l| l == line), "lost line {:?}", line);
    }
    assert!(aggregator.contains("from .orders_validation import *\n"));
    assert!(aggregator.contains("from .orders_persistence import *\n"));
}

#[test]
fn test_identical_functions_extracted_to_shared_module() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let normalize = "def normalize_row(row):\n    cleaned = {}\n    for key, value in row.items():\n        if value is None:\n            continue\n        cleaned[key.strip().lower()] = value\n    return cleaned\n";
    write(root, "etl/billing.py", &format!("\"\"\"Billing.\"\"\"\n\n\n{}", normalize));
    write(root, "etl/shipping.py", &format!("\"\"\"Shipping.\"\"\"\n\n\n{}", normalize));

    let config = EngineConfig::default();
    let project = ProjectTree::new(root, &config);
    let planner = Planner::new(&config, &project, SourceParser::new()).unwrap();
    let analysis = planner.analyze(&[]).unwrap();
    assert_eq!(analysis.duplicate_pairs.len(), 1);
    assert!(analysis.duplicate_pairs[0].identical);

    let report = Orchestrator::new(config)
        .run(&RunRequest::new(root).unattended(true), &approve);
    assert_eq!(report.status, RunStatus::Success, "{}", report);

    let shared = fs::read_to_string(root.join("etl/shared/normalize_row.py")).unwrap();
    assert!(shared.contains("def normalize_row(row):"));
    for file in ["etl/billing.py", "etl/shipping.py"] {
        let text = fs::read_to_string(root.join(file)).unwrap();
        assert!(text.contains("from etl.shared.normalize_row import normalize_row\n"));
        assert!(!text.contains("def normalize_row"));
    }
}

#[test]
fn test_duplicates_with_different_defaults_are_left_in_place() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let body = "    out = []\n    for value in values:\n        value = value * k\n        out.append(value)\n    out.sort()\n    return out\n";
    write(root, "etl/a.py", &format!("\"\"\"A.\"\"\"\n\n\ndef scale(values, k=1):\n{}", body));
    write(root, "etl/b.py", &format!("\"\"\"B.\"\"\"\n\n\ndef scale(values, k=100):\n{}", body));

    let report = Orchestrator::new(EngineConfig::default())
        .run(&RunRequest::new(root).unattended(true), &approve);
    assert_eq!(report.status, RunStatus::Success, "{}", report);
    assert!(report.backup_ref.is_none());
    assert!(!root.join("etl/shared").exists());
    assert!(fs::read_to_string(root.join("etl/b.py"))
        .unwrap()
        .contains("def scale(values, k=100):"));
}

#[test]
fn test_duplicates_in_one_file_are_not_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let body = "    total = 0\n    for item in items:\n        total += item.price\n        total -= item.discount\n    total = round(total, 2)\n    return total\n";
    write(
        root,
        "cart.py",
        &format!("def cart_total(items):\n{}\n\ndef basket_total(items):\n{}", body, body),
    );

    let config = EngineConfig::default();
    let project = ProjectTree::new(root, &config);
    let analysis = Planner::new(&config, &project, SourceParser::new())
        .unwrap()
        .analyze(&[])
        .unwrap();
    assert!(analysis.duplicate_pairs.is_empty());
}

#[test]
fn test_presentation_to_storage_import_is_fixed() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    for package in ["app", "app/ui", "app/services", "app/repositories", "app/storage"] {
        write(root, &format!("{}/__init__.py", package), "");
    }
    write(root, "app/storage/orders.py", "\"\"\"Order rows.\"\"\"\n\n\ndef load_order(i):\n    return {\"id\": i}\n");
    write(root, "app/repositories/orders.py", "\"\"\"Order repository.\"\"\"\nfrom app.storage.orders import load_order\n");
    write(root, "app/services/orders.py", "\"\"\"Order service.\"\"\"\nfrom app.repositories.orders import load_order\n");
    write(
        root,
        "app/ui/views.py",
        "\"\"\"Views.\"\"\"\nimport os\nfrom app.storage.orders import load_order\n\n\ndef show(i):\n    return load_order(i), os.sep\n",
    );

    let config = EngineConfig::default();
    let report = Orchestrator::new(config.clone())
        .run(&RunRequest::new(root).unattended(true), &approve);
    assert_eq!(report.status, RunStatus::Success, "{}", report);

    let views = fs::read_to_string(root.join("app/ui/views.py")).unwrap();
    assert!(views.contains("from app.services.orders import load_order\n"));
    assert!(!views.contains("app.storage"));

    let project = ProjectTree::new(root, &config);
    let analysis = Planner::new(&config, &project, SourceParser::new())
        .unwrap()
        .analyze(&[])
        .unwrap();
    assert!(analysis.architecture_violations.is_empty());
}

#[test]
fn test_report_exit_codes() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write(root, "plain.py", "X = 1\n");
    let orchestrator = Orchestrator::new(EngineConfig::default());

    let decline = |_: &RefactoringPlan| false;
    let cancelled = orchestrator.run(&RunRequest::new(root), &decline);
    assert_eq!(cancelled.exit_code(), 3);
    assert_eq!(fs::read_to_string(root.join("plain.py")).unwrap(), "X = 1\n");

    let done = orchestrator.run(&RunRequest::new(root), &approve);
    assert_eq!(done.exit_code(), 0);
    assert!(done.to_string().contains(": success"));

    let again = orchestrator.run(&RunRequest::new(root), &approve);
    assert_eq!(again.exit_code(), 0);
    assert!(again.backup_ref.is_none());

    let missing = orchestrator.run(&RunRequest::new(root.join("missing")), &approve);
    assert_eq!(missing.exit_code(), 2);
}

#[test]
fn test_target_dirs_limit_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write(root, "pkg/inside.py", "X = 1\n");
    write(root, "outside.py", "Y = 2\n");

    let context = RunContext::new(root, EngineConfig::default()).unwrap();
    let request = RunRequest::new(root)
        .with_target_dirs(vec![PathBuf::from("pkg")])
        .unattended(true);
    let report = Orchestrator::new(EngineConfig::default()).run_with_context(&context, &request, &approve);

    assert_eq!(report.status, RunStatus::Success);
    assert!(fs::read_to_string(root.join("pkg/inside.py")).unwrap().starts_with("\"\"\"Inside module.\"\"\""));
    assert_eq!(fs::read_to_string(root.join("outside.py")).unwrap(), "Y = 2\n");
}
