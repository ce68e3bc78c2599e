//! Deterministic rule matching: the second pipeline stage.
//!
//! Evaluates the catalog's compiled trigger patterns in priority order
//! against normalized text. First match wins — catalog order encodes
//! precedence, and the catalog loader has already rejected overlapping
//! rules, so best-match scoring is unnecessary. Slot values come from named
//! capture groups. Rule confidence is fixed at `1.0`.

use regex::Regex;

use crate::dsl::{IntentCandidate, Stage};

/// One compiled trigger pattern, bound to the intent it produces.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Intent label this rule produces on match.
    pub intent: String,
    /// Anchored pattern with named capture groups for slots.
    pub regex: Regex,
    /// Static priority; lower fires earlier. Ties preserve catalog order.
    pub priority: u32,
}

/// Evaluate rules in order; return a candidate for the first match, if any.
///
/// Identical input against an unchanged rule list always yields an identical
/// result.
pub fn first_match(rules: &[CompiledRule], text: &str) -> Option<IntentCandidate> {
    for rule in rules {
        if let Some(caps) = rule.regex.captures(text) {
            let mut candidate = IntentCandidate::new(rule.intent.clone(), 1.0, Stage::Rule);
            for name in rule.regex.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    let value = m.as_str().trim();
                    if !value.is_empty() {
                        candidate.slots.insert(name.to_string(), value.to_string());
                    }
                }
            }
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(intent: &str, pattern: &str, priority: u32) -> CompiledRule {
        CompiledRule {
            intent: intent.to_string(),
            regex: Regex::new(&format!("^(?:{})$", pattern)).unwrap(),
            priority,
        }
    }

    #[test]
    fn test_first_match_wins_over_later_rules() {
        let rules = vec![
            rule("list_tables", "(list|show) (all )?tables", 0),
            rule("row_count", "count rows in (?P<table>\\S+)", 1),
        ];
        let c = first_match(&rules, "list all tables").unwrap();
        assert_eq!(c.label, "list_tables");
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.stage, Stage::Rule);
        assert!(c.slots.is_empty());
    }

    #[test]
    fn test_capture_groups_become_slots() {
        let rules = vec![rule("drop_table", "drop table (?P<table>\\S+)", 0)];
        let c = first_match(&rules, "drop table staging.payments").unwrap();
        assert_eq!(c.slots.get("table").map(String::as_str), Some("staging.payments"));
    }

    #[test]
    fn test_no_match_returns_none() {
        let rules = vec![rule("list_tables", "list tables", 0)];
        assert!(first_match(&rules, "blorp the frobnicator").is_none());
    }

    #[test]
    fn test_deterministic() {
        let rules = vec![
            rule("drop_table", "drop table (?P<table>\\S+)", 0),
            rule("row_count", "count rows in (?P<table>\\S+)", 1),
        ];
        let a = first_match(&rules, "count rows in orders");
        let b = first_match(&rules, "count rows in orders");
        assert_eq!(a, b);
    }

    #[test]
    fn test_optional_empty_capture_is_dropped() {
        let rules = vec![rule(
            "row_count",
            "count rows in (?P<table>\\S+)(?: where (?P<where>.+))?",
            0,
        )];
        let c = first_match(&rules, "count rows in orders").unwrap();
        assert!(!c.slots.contains_key("where"));
        let c = first_match(&rules, "count rows in orders where status = 'open'").unwrap();
        assert_eq!(
            c.slots.get("where").map(String::as_str),
            Some("status = 'open'")
        );
    }
}
