//! Parsing of raw inference text into product candidates.
//!
//! Vision models are instructed to answer with one product per line, but the
//! instruction is advisory: answers still arrive with bullet markers, blank
//! lines, or stray whitespace. The parser normalizes those and takes every
//! surviving line verbatim. Duplicate names are kept on purpose, since two
//! facings of the same product are two inventory entries.

use chrono::{DateTime, Utc};

/// Leading list markers stripped from product lines.
const LIST_MARKERS: &[char] = &['•', '-', '*'];

/// A product extracted from inference output.
#[derive(Debug, Clone)]
pub struct ProductCandidate {
    /// Product name as reported by the model
    pub name: String,
    /// Stock count; always 1 at extraction time
    pub quantity: u32,
    /// When the candidate was parsed
    pub added_at: DateTime<Utc>,
}

/// Parse raw inference text into an ordered list of product candidates.
///
/// Each line is trimmed and at most one leading list marker is stripped;
/// lines that end up empty are dropped. Order and duplicates are preserved,
/// and every candidate carries the same parse-time timestamp.
pub fn parse_product_listing(text: &str) -> Vec<ProductCandidate> {
    let now = Utc::now();

    text.lines()
        .filter_map(|line| {
            let name = clean_line(line);

            if name.is_empty() {
                None
            } else {
                Some(ProductCandidate {
                    name: name.to_string(),
                    quantity: 1,
                    added_at: now,
                })
            }
        })
        .collect()
}

/// Trim a line and strip at most one leading list marker.
///
/// Only a marker in first position is stripped, so names that merely contain
/// a hyphen ("Coca-Cola") or start with a digit ("7UP") pass through intact.
fn clean_line(line: &str) -> &str {
    let trimmed = line.trim();

    match trimmed.strip_prefix(LIST_MARKERS) {
        Some(rest) => rest.trim_start(),
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(text: &str) -> Vec<String> {
        parse_product_listing(text)
            .into_iter()
            .map(|candidate| candidate.name)
            .collect()
    }

    #[test]
    fn test_mixed_markers_and_blank_lines() {
        let text = "- Coca-Cola 330ml\n\n* iPhone 15 Pro\nNike Air Max";

        assert_eq!(
            names(text),
            vec!["Coca-Cola 330ml", "iPhone 15 Pro", "Nike Air Max"]
        );
    }

    #[test]
    fn test_bullet_character_is_stripped() {
        assert_eq!(names("• Heinz Ketchup 500ml"), vec!["Heinz Ketchup 500ml"]);
    }

    #[test]
    fn test_interior_hyphens_survive() {
        assert_eq!(names("Coca-Cola Zero"), vec!["Coca-Cola Zero"]);
        assert_eq!(names("7UP 1.5L"), vec!["7UP 1.5L"]);
    }

    #[test]
    fn test_only_one_marker_is_stripped() {
        assert_eq!(names("- - odd name"), vec!["- odd name"]);
    }

    #[test]
    fn test_marker_only_lines_are_dropped() {
        assert!(names("-\n*\n• \n  ").is_empty());
    }

    #[test]
    fn test_quantity_defaults_to_one() {
        let candidates = parse_product_listing("Pepsi\nFanta");

        assert!(candidates.iter().all(|c| c.quantity == 1));
    }

    #[test]
    fn test_duplicates_are_preserved() {
        let candidates = parse_product_listing("Pepsi 500ml\nPepsi 500ml\nPepsi 500ml");

        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.name == "Pepsi 500ml"));
    }

    #[test]
    fn test_candidates_share_one_timestamp() {
        let candidates = parse_product_listing("Milk 1L\nButter 250g");

        assert_eq!(candidates[0].added_at, candidates[1].added_at);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let text = "- Coca-Cola 330ml\n* Doritos Nacho\n  Oreo Original  ";
        let first = names(text);
        let second = names(&first.join("\n"));

        assert_eq!(first, second);
    }

    #[test]
    fn test_crlf_line_endings() {
        assert_eq!(names("Milk 1L\r\nButter 250g\r\n"), vec!["Milk 1L", "Butter 250g"]);
    }

    #[test]
    fn test_empty_input_yields_no_candidates() {
        assert!(parse_product_listing("").is_empty());
        assert!(parse_product_listing("\n\n\n").is_empty());
    }
}
