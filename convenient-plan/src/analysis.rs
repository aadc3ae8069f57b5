//! Static dependency inference from command text.
//!
//! The graph builder only needs a set of candidate names per command; how
//! they are found is behind [`DependencyAnalyzer`]. Candidates that match
//! nothing (no target, no import, no file) are reported as missed, so an
//! analyzer may over-approximate freely.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Extracts referenced names from command or import source text.
pub trait DependencyAnalyzer: Send + Sync {
    /// Candidate dependency names referenced by `text`.
    ///
    /// File references are returned in quoted form (`"data/raw.csv"`),
    /// matching how file targets are named.
    fn analyze(&self, text: &str) -> BTreeSet<String>;
}

#[allow(clippy::expect_used)]
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\\n]|\\.)*)""#).expect("quoted string pattern"));

#[allow(clippy::expect_used)]
static SINGLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^'\\\n]|\\.)*'").expect("single-quoted string pattern"));

#[allow(clippy::expect_used)]
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)#.*$").expect("comment pattern"));

#[allow(clippy::expect_used)]
static SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_.]*").expect("symbol pattern"));

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "repeat", "break", "next", "return", "function", "in", "let",
    "fn", "TRUE", "FALSE", "NULL", "NA", "NaN", "Inf", "true", "false", "null",
];

/// Default analyzer for expression-like commands.
///
/// Finds free symbols (`summarize(data)` references `summarize` and
/// `data`) and double-quoted file references. It ignores:
/// - anything inside string literals, apart from the quoted reference itself
/// - `#` comments
/// - reserved words and numeric literals
/// - member accesses (`x$field`, `x@slot`) and namespaced calls (`pkg::fun`)
/// - names being assigned (`name = value`), which covers named arguments
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolAnalyzer;

impl SymbolAnalyzer {
    /// Create the analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DependencyAnalyzer for SymbolAnalyzer {
    fn analyze(&self, text: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();

        for cap in QUOTED.captures_iter(text) {
            if let Some(inner) = cap.get(1)
                && !inner.as_str().trim().is_empty()
            {
                let _ = found.insert(format!("\"{}\"", inner.as_str()));
            }
        }

        // Blank out literals and comments so their contents are not read as code.
        let stripped = QUOTED.replace_all(text, " ");
        let stripped = SINGLE_QUOTED.replace_all(&stripped, " ");
        let stripped = COMMENT.replace_all(&stripped, " ");

        for m in SYMBOL.find_iter(&stripped) {
            let name = m.as_str().trim_end_matches('.');
            if name.is_empty() || RESERVED.contains(&name) {
                continue;
            }
            let after = &stripped[m.end()..];
            if is_member_access(&stripped[..m.start()])
                || is_assignment(after)
                || after.starts_with("::")
            {
                continue;
            }
            let _ = found.insert(name.to_string());
        }

        found
    }
}

fn is_member_access(before: &str) -> bool {
    match before.chars().next_back() {
        Some('$' | '@') => true,
        // `1e5`, `x2y`: part of a number or a longer token
        Some(c) if c.is_ascii_alphanumeric() => true,
        _ => before.ends_with("::"),
    }
}

fn is_assignment(after: &str) -> bool {
    let rest = after.trim_start();
    rest.starts_with('=') && !rest.starts_with("==")
}
