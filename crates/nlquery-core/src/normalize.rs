//! Text normalization: the first pipeline stage.
//!
//! A pure, deterministic transform from raw UTF-8 text to a token sequence
//! plus a canonical string form. Determinism is load-bearing: rule matching
//! must be reproducible, and audit replay must re-derive identical output.
//!
//! The normalizer performs case folding, whitespace collapsing, punctuation
//! stripping, abbreviation expansion, and a bounded typo-correction step
//! against a known vocabulary. Quoted literals (`'…'`, `"…"`, `` `…` ``) and
//! bracketed identifiers (`[…]`) pass through verbatim so slot values are
//! never corrupted.
//!
//! Normalization is idempotent: `normalize(normalize(x)) == normalize(x)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// SQL keywords seeded into the typo-correction vocabulary.
pub const SQL_KEYWORDS: &[&str] = &[
    "select", "table", "tables", "column", "columns", "index", "indexes", "drop", "create",
    "alter", "add", "rename", "truncate", "vacuum", "analyze", "describe", "count", "rows",
    "where", "from", "show", "list", "database", "schema", "varchar", "integer", "bigint",
    "boolean", "text", "numeric", "timestamp", "queries", "locks",
];

/// Characters that survive punctuation stripping unconditionally.
///
/// Everything needed to express identifiers, type spellings like
/// `varchar(100)`, and restricted predicates. `.` and `,` are kept only
/// between two alphanumeric characters; a trailing `payments.` loses its dot,
/// `staging.payments` keeps it.
const KEPT_PUNCT: &[char] = &['_', '(', ')', '=', '<', '>', '-', '*'];

/// Normalized form of one input: canonical string plus its tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Normalized {
    /// Tokens joined by single spaces. This is what the rule matcher and
    /// semantic matcher consume.
    pub text: String,
    /// Individual tokens. Quoted spans are single tokens, kept verbatim
    /// including their delimiters.
    pub tokens: Vec<String>,
}

/// The normalizer, parameterized by the catalog's vocabulary.
///
/// Rebuilt together with the catalog on reload; read-only at request time.
#[derive(Debug, Clone)]
pub struct Normalizer {
    vocabulary: BTreeSet<String>,
    abbreviations: BTreeMap<String, String>,
    /// Maximum edit distance for typo correction.
    typo_distance: usize,
    /// Tokens shorter than this are never corrected.
    min_typo_len: usize,
}

impl Normalizer {
    /// Build a normalizer over the given vocabulary (intent trigger words,
    /// SQL keywords, table and column names).
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab: BTreeSet<String> = vocabulary.into_iter().map(|s| s.into()).collect();
        for kw in SQL_KEYWORDS {
            vocab.insert((*kw).to_string());
        }
        Self {
            vocabulary: vocab,
            abbreviations: default_abbreviations(),
            typo_distance: 1,
            min_typo_len: 4,
        }
    }

    /// Override the typo-correction edit distance (0 disables correction).
    pub fn with_typo_distance(mut self, distance: usize) -> Self {
        self.typo_distance = distance;
        self
    }

    /// Normalize raw input into tokens and a canonical string.
    pub fn normalize(&self, raw: &str) -> Normalized {
        let mut tokens = Vec::new();
        for segment in segment(raw) {
            match segment {
                Segment::Quoted(text) => tokens.push(text),
                Segment::Plain(text) => {
                    for word in self.normalize_plain(&text) {
                        tokens.push(word);
                    }
                }
            }
        }
        let text = tokens.join(" ");
        Normalized { text, tokens }
    }

    fn normalize_plain(&self, text: &str) -> Vec<String> {
        let folded = text.to_lowercase();
        let stripped = strip_punctuation(&folded);
        stripped
            .split_whitespace()
            .map(|tok| self.correct_token(tok))
            .collect()
    }

    fn correct_token(&self, token: &str) -> String {
        if let Some(expanded) = self.abbreviations.get(token) {
            return expanded.clone();
        }
        if self.vocabulary.contains(token) {
            return token.to_string();
        }
        // Only purely alphabetic tokens are candidates for correction;
        // identifiers, dotted names, and numbers pass through untouched.
        if self.typo_distance == 0
            || token.len() < self.min_typo_len
            || !token.chars().all(|c| c.is_ascii_alphabetic())
        {
            return token.to_string();
        }
        let mut best: Option<(&str, usize)> = None;
        let mut tied = false;
        for word in &self.vocabulary {
            if word.len().abs_diff(token.len()) > self.typo_distance {
                continue;
            }
            let d = edit_distance(token, word, self.typo_distance);
            if d <= self.typo_distance {
                match best {
                    Some((_, bd)) if d > bd => {}
                    Some((_, bd)) if d == bd => tied = true,
                    _ => {
                        best = Some((word, d));
                        tied = false;
                    }
                }
            }
        }
        match best {
            // A tie between vocabulary words is left alone rather than
            // guessed; the semantic stage gets a chance instead.
            Some((word, _)) if !tied => word.to_string(),
            _ => token.to_string(),
        }
    }
}

/// Built-in abbreviation and common-typo expansions.
pub fn default_abbreviations() -> BTreeMap<String, String> {
    let pairs = [
        ("tbl", "table"),
        ("tbls", "tables"),
        ("col", "column"),
        ("cols", "columns"),
        ("db", "database"),
        ("idx", "index"),
        ("desc", "describe"),
        ("stats", "statistics"),
    ];
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

enum Segment {
    Plain(String),
    Quoted(String),
}

/// Split raw input into plain spans and verbatim quoted/bracketed spans.
///
/// An unterminated quote runs to the end of input and is still treated as
/// quoted; truncating user text is worse than over-preserving it.
fn segment(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut plain = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        let close = match c {
            '\'' => Some('\''),
            '"' => Some('"'),
            '`' => Some('`'),
            '[' => Some(']'),
            _ => None,
        };
        if let Some(close) = close {
            if !plain.is_empty() {
                segments.push(Segment::Plain(std::mem::take(&mut plain)));
            }
            let mut quoted = String::new();
            quoted.push(c);
            for q in chars.by_ref() {
                quoted.push(q);
                if q == close {
                    break;
                }
            }
            segments.push(Segment::Quoted(quoted));
        } else {
            plain.push(c);
        }
    }
    if !plain.is_empty() {
        segments.push(Segment::Plain(plain));
    }
    segments
}

/// Replace punctuation noise with spaces. `.` and `,` survive only between
/// two alphanumeric characters; the characters in [`KEPT_PUNCT`] always
/// survive; everything else non-alphanumeric becomes a space.
fn strip_punctuation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() || c.is_whitespace() || KEPT_PUNCT.contains(&c) {
            out.push(c);
        } else if c == '.' || c == ',' {
            let prev_ok = i > 0 && chars[i - 1].is_alphanumeric();
            let next_ok = i + 1 < chars.len() && chars[i + 1].is_alphanumeric();
            if prev_ok && next_ok {
                out.push(c);
            } else {
                out.push(' ');
            }
        } else {
            out.push(' ');
        }
    }
    out
}

/// Bounded edit distance with adjacent transpositions counting as one edit
/// (optimal string alignment). Returns `cap + 1` as soon as the distance
/// provably exceeds `cap`.
fn edit_distance(a: &str, b: &str, cap: usize) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > cap {
        return cap + 1;
    }
    let mut prev2 = vec![0usize; b.len() + 1];
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let mut d = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            if i > 0 && j > 0 && ca == b[j - 1] && a[i - 1] == cb {
                d = d.min(prev2[j - 1] + 1);
            }
            curr[j + 1] = d;
            row_min = row_min.min(d);
        }
        if row_min > cap {
            return cap + 1;
        }
        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(["payments", "staging.payments", "status", "orders"])
    }

    #[test]
    fn test_case_folding_and_whitespace() {
        let n = normalizer();
        let out = n.normalize("  LIST   all    Tables ");
        assert_eq!(out.text, "list all tables");
    }

    #[test]
    fn test_punctuation_stripped_at_edges_only() {
        let n = normalizer();
        let out = n.normalize("drop table staging.payments!!");
        assert_eq!(out.text, "drop table staging.payments");
        let out = n.normalize("show tables, please.");
        assert_eq!(out.text, "show tables please");
    }

    #[test]
    fn test_quoted_literal_preserved_verbatim() {
        let n = normalizer();
        let out = n.normalize("count rows where status = 'Open, NOT closed!'");
        assert!(out.tokens.contains(&"'Open, NOT closed!'".to_string()));
    }

    #[test]
    fn test_bracketed_identifier_preserved() {
        let n = normalizer();
        let out = n.normalize("describe [My Table]");
        assert!(out.tokens.contains(&"[My Table]".to_string()));
    }

    #[test]
    fn test_abbreviation_expansion() {
        let n = normalizer();
        assert_eq!(n.normalize("drop tbl payments").text, "drop table payments");
        assert_eq!(n.normalize("add col notes").text, "add column notes");
    }

    #[test]
    fn test_typo_correction_within_distance() {
        let n = normalizer();
        assert_eq!(n.normalize("drop tabel payments").text, "drop table payments");
        assert_eq!(n.normalize("count rows in paymnts").text, "count rows in payments");
    }

    #[test]
    fn test_typo_correction_skips_identifiers_and_short_tokens() {
        let n = normalizer();
        // dotted token is not alphabetic-only, stays untouched
        assert_eq!(
            n.normalize("drop table staging.paymnts").text,
            "drop table staging.paymnts"
        );
        // below min length
        assert_eq!(n.normalize("shw").text, "shw");
    }

    #[test]
    fn test_type_spelling_survives() {
        let n = normalizer();
        let out = n.normalize("add column notes varchar(100) to staging.payments");
        assert_eq!(out.text, "add column notes varchar(100) to staging.payments");
    }

    #[test]
    fn test_idempotent() {
        let n = normalizer();
        let inputs = [
            "  DROP Table staging.payments!  ",
            "count rows in paymnts where status = 'open'",
            "add col notes varchar(100) to tbl orders",
            "list all tables???",
        ];
        for input in inputs {
            let once = n.normalize(input);
            let twice = n.normalize(&once.text);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("table", "table", 2), 0);
        // adjacent transposition counts as a single edit
        assert_eq!(edit_distance("tabel", "table", 2), 1);
        assert_eq!(edit_distance("paymnts", "payments", 2), 1);
        assert!(edit_distance("alpha", "omega", 1) > 1);
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        let n = normalizer();
        let out = n.normalize("count rows where note = 'unterminated");
        assert!(out.tokens.contains(&"'unterminated".to_string()));
    }
}
