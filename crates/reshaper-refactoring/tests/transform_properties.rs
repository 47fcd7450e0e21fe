//! Property-based tests for name normalization, block similarity and unit splitting
//!
//! Property: normalizing a name twice gives the same result as once
//! Property: similarity is symmetric and bounded by [0, 1]
//! Property: units within the limit are returned unchanged, and every piece of
//! a split that fits the limit is itself left unchanged by a second split

use proptest::prelude::*;
use reshaper_parsers::{count_code_lines, SourceParser};
use reshaper_refactoring::analysis::{normalize_name, similarity};
use reshaper_refactoring::UnitSplitter;

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 _-]{0,24}"
}

fn block_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,6} = [a-z0-9]{1,6}", 0..8).prop_map(|lines| lines.join("\n"))
}

/// Linear accumulator with `statements` update lines
fn linear_unit(statements: usize) -> String {
    let mut source = String::from("def accumulate(a, b):\n    total = a\n");
    for i in 0..statements {
        source.push_str(&format!("    total = total + b * {}\n", i));
    }
    source.push_str("    return total\n");
    source
}

proptest! {
    #[test]
    fn prop_normalize_name_is_idempotent(name in name_strategy()) {
        let once = normalize_name(&name);
        prop_assert_eq!(normalize_name(&once), once.clone());
        prop_assert!(!once.contains(' '));
        prop_assert!(!once.contains('-'));
    }

    #[test]
    fn prop_similarity_symmetric_and_bounded(a in block_strategy(), b in block_strategy()) {
        let forward = similarity(&a, &b);
        let backward = similarity(&b, &a);
        prop_assert_eq!(forward, backward);
        prop_assert!((0.0..=1.0).contains(&forward));
        prop_assert_eq!(similarity(&a, &a), 1.0);
    }

    #[test]
    fn prop_small_units_are_unchanged(statements in 0usize..12, slack in 0usize..10) {
        let source = linear_unit(statements);
        let limit = count_code_lines(&source) + slack;
        let split = UnitSplitter::new(SourceParser::new())
            .split(&source, "accumulate", limit)
            .unwrap();
        prop_assert_eq!(split.source, source);
        prop_assert!(split.helpers.is_empty());
    }

    #[test]
    fn prop_split_pieces_parse_and_are_stable(statements in 12usize..30, limit in 8usize..12) {
        let parser = SourceParser::new();
        let splitter = UnitSplitter::new(parser.clone());
        let source = linear_unit(statements);
        let split = splitter.split(&source, "accumulate", limit).unwrap();
        prop_assert!(!split.helpers.is_empty());

        let mut pieces = vec![(String::from("accumulate"), split.source.clone())];
        pieces.extend(split.helpers.iter().map(|h| (h.name.clone(), h.source.clone())));
        let combined: Vec<String> = pieces.iter().map(|(_, s)| s.clone()).collect();
        prop_assert!(parser.check_syntax(&combined.join("\n\n")).is_ok());

        for (name, piece) in pieces {
            if count_code_lines(&piece) <= limit {
                let again = splitter.split(&piece, &name, limit).unwrap();
                prop_assert_eq!(again.source, piece);
                prop_assert!(again.helpers.is_empty());
            }
        }
    }
}
