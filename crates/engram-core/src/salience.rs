//! Salience scorer
//!
//! Pure synchronous assessment of (title, content): how important is this
//! memory, which category does it belong to, which tags does it carry, and
//! should it be visible across projects.
//!
//! Scoring is additive over keyword families with a diminishing-returns
//! bonus for repeated mentions, capped at 1.0.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::memory::{Category, Scope};

// ============================================================================
// KEYWORD FAMILIES
// ============================================================================

macro_rules! family {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("static pattern compiles"));
    };
}

family!(
    MEMORIZE,
    r"(?i)\b(remember this|memorize|don't forget|do not forget|note this|keep in mind)\b"
);
family!(
    ARCHITECTURE,
    r"(?i)\b(architecture|architectural|system design|design decision|database|schema|migration|infrastructure|deployment|microservices?|monolith|postgres(?:ql)?|mysql|mongodb|redis|message queue|event bus|tech stack|framework)\b"
);
family!(
    ERROR_FIX,
    r"(?i)\b(error|bug|crash|exception|failure|broken|regression|fix(?:ed|es)?|workaround|root cause|stack ?trace)\b"
);
family!(
    DECISION,
    r"(?i)\b(decided|decision|chose|choosing|agreed|concluded|conclusion|settled on|we will)\b"
);
family!(
    LEARNING,
    r"(?i)\b(learned|learning|discovered|realized|realised|turns out|found out|til)\b"
);
family!(
    PATTERN,
    r"(?i)\b(pattern|convention|idiom|approach|recipe|best practice|anti-?pattern)\b"
);
family!(
    PREFERENCE,
    r"(?i)\b(prefer(?:red|s)?|preference|avoid(?:ing)?|rather than|instead of|style|convention)\b"
);
family!(
    EMOTIONAL,
    r"(?i)\b(critical|important|urgent|must(?: not)?|never forget|warning|danger(?:ous)?|careful|gotcha)\b|!{2,}"
);
family!(TODO_MARKER, r"(?i)\b(todo|fixme|hack|xxx)\b");
family!(LEARNING_MARKER, r"(?i)\b(learned|discovered|realized|realised)\b");
family!(
    RELATIONSHIP_MARKER,
    r"(?i)\b(depends on|requires|uses|imports|extends)\b"
);

// Code references: class.method, filename.ext, backticked spans,
// declarations, paths, line numbers.
family!(
    CODE_REFERENCE,
    r"(?x)
    \w+\.\w+\(                                        # method call
    | \b\w+\.(?:rs|ts|tsx|js|jsx|py|go|java|rb|c|cpp|h|sql|sh|toml|yaml|yml|json)\b
    | `[^`]+`                                          # backticked span
    | \b(?:fn|function|class|struct|impl|def|interface|enum)\s+\w+
    | (?:\.{0,2}/)?(?:\w+/){1,}\w+(?:\.\w+)?           # path segments
    | \bline\s+\d+\b | :\d+:\d+
    "
);

family!(GLOBAL_HINT, r"(?i)\b(always|never|best practice|general rule|universal)\b");

family!(HASHTAG, r"#([a-z][a-z0-9_-]*)");

/// Fixed tech-term vocabulary promoted into tags when mentioned
const TECH_TERMS: &[&str] = &[
    "react", "vue", "angular", "node", "python", "typescript", "javascript", "api", "database",
    "sql", "mongodb", "postgresql", "mysql", "docker", "kubernetes", "aws", "git", "testing",
    "auth", "security", "performance", "caching",
];

/// Tags that force global scope
const GLOBAL_TAGS: &[&str] = &["universal", "global", "general", "cross-project"];

/// Cap on extracted tags
const MAX_TAGS: usize = 10;

// ============================================================================
// ASSESSMENT
// ============================================================================

/// Output of the salience scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalienceAssessment {
    /// Importance in [0, 1]
    pub salience: f64,
    /// Suggested category
    pub category: Category,
    /// Extracted tags (hashtags + tech terms, capped)
    pub tags: Vec<String>,
    /// Suggested cross-project visibility
    pub scope: Scope,
}

/// Score a memory's title and content.
///
/// Starts at a 0.25 base; each matching keyword family adds its weight,
/// repeated mentions add `min(0.30, log2(n) * 0.10)`, and the result is
/// capped at 1.0.
pub fn assess(title: &str, content: &str) -> SalienceAssessment {
    let text = format!("{title} {content}");

    let mut salience = 0.25_f64;
    let mut mentions = 0_usize;

    // Weights in descending order; an explicit memorize request dominates.
    let families: [(&Regex, f64); 8] = [
        (&MEMORIZE, 0.50),
        (&ARCHITECTURE, 0.40),
        (&ERROR_FIX, 0.35),
        (&DECISION, 0.35),
        (&LEARNING, 0.30),
        (&PATTERN, 0.25),
        (&PREFERENCE, 0.25),
        (&EMOTIONAL, 0.20),
    ];

    for (family, weight) in families {
        let count = family.find_iter(&text).count();
        if count > 0 {
            salience += weight;
            mentions += count;
        }
    }

    if CODE_REFERENCE.is_match(&text) {
        salience += 0.15;
    }

    if mentions > 1 {
        salience += ((mentions as f64).log2() * 0.10).min(0.30);
    }

    let salience = salience.min(1.0);
    let category = suggest_category(&text);
    let tags = extract_tags(&text);
    let scope = detect_scope(category, &text, &tags);

    SalienceAssessment {
        salience,
        category,
        tags,
        scope,
    }
}

/// First-matching family in priority order decides the category.
fn suggest_category(text: &str) -> Category {
    category_hint(text).unwrap_or(Category::Note)
}

/// Category the text hints at, `None` when no family matches. Search uses
/// this to boost results sharing the query's category.
pub(crate) fn category_hint(text: &str) -> Option<Category> {
    if ARCHITECTURE.is_match(text) {
        Some(Category::Architecture)
    } else if ERROR_FIX.is_match(text) {
        Some(Category::Error)
    } else if PREFERENCE.is_match(text) {
        Some(Category::Preference)
    } else if PATTERN.is_match(text) {
        Some(Category::Pattern)
    } else if TODO_MARKER.is_match(text) {
        Some(Category::Todo)
    } else if LEARNING_MARKER.is_match(text) {
        Some(Category::Learning)
    } else if RELATIONSHIP_MARKER.is_match(text) {
        Some(Category::Relationship)
    } else {
        None
    }
}

static TECH_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TECH_TERMS
        .iter()
        .map(|term| {
            // The vocabulary has no regex metacharacters
            let pattern = Regex::new(&format!(r"\b{term}\b")).expect("tech term compiles");
            (*term, pattern)
        })
        .collect()
});

/// Hashtags plus fixed tech terms, deduplicated, capped at [`MAX_TAGS`].
pub(crate) fn extract_tags(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tags: Vec<String> = Vec::new();

    for capture in HASHTAG.captures_iter(&lowered) {
        let tag = capture[1].to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    for (term, pattern) in TECH_PATTERNS.iter() {
        if tags.len() >= MAX_TAGS {
            break;
        }
        if pattern.is_match(&lowered) && !tags.iter().any(|t| t == term) {
            tags.push(term.to_string());
        }
    }

    tags.truncate(MAX_TAGS);
    tags
}

/// Patterns, preferences, learnings, and generalizing language are
/// knowledge worth carrying across projects.
fn detect_scope(category: Category, text: &str, tags: &[String]) -> Scope {
    if matches!(
        category,
        Category::Pattern | Category::Preference | Category::Learning
    ) {
        return Scope::Global;
    }
    if GLOBAL_HINT.is_match(text) {
        return Scope::Global;
    }
    if tags.iter().any(|t| GLOBAL_TAGS.contains(&t.as_str())) {
        return Scope::Global;
    }
    Scope::Project
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_salience_for_plain_text() {
        let assessment = assess("groceries", "buy milk and eggs");
        assert!((assessment.salience - 0.25).abs() < 0.001);
        assert_eq!(assessment.category, Category::Note);
    }

    #[test]
    fn test_architecture_decision_scores_high() {
        let assessment = assess(
            "Use PostgreSQL for JSON support",
            "We decided to use PostgreSQL because of JSONB.",
        );
        assert!(assessment.salience >= 0.60);
        assert_eq!(assessment.category, Category::Architecture);
        assert!(assessment.tags.iter().any(|t| t == "postgresql"));
    }

    #[test]
    fn test_explicit_memorize_dominates() {
        let plain = assess("thing", "some text here");
        let asked = assess("thing", "remember this: some text here");
        assert!(asked.salience >= plain.salience + 0.49);
    }

    #[test]
    fn test_salience_capped_at_one() {
        let assessment = assess(
            "critical architecture decision",
            "We decided to fix the database schema bug. Learned the pattern. \
             Prefer migrations. Remember this!! error error error",
        );
        assert!(assessment.salience <= 1.0);
    }

    #[test]
    fn test_code_reference_detected() {
        let with_code = assess("note", "see `Store::insert` in storage.rs");
        let without = assess("note", "see the insert routine in storage");
        assert!(with_code.salience > without.salience);
    }

    #[test]
    fn test_category_priority_error_over_pattern() {
        // Both families match; error wins by priority order
        let assessment = assess("bug", "found a bug in the retry pattern");
        assert_eq!(assessment.category, Category::Error);
    }

    #[test]
    fn test_todo_category() {
        let assessment = assess("cleanup", "TODO: remove the shim once rolled out");
        assert_eq!(assessment.category, Category::Todo);
    }

    #[test]
    fn test_hashtag_extraction() {
        let assessment = assess("setup", "configured the pipeline #ci-cd #infra_2");
        assert!(assessment.tags.contains(&"ci-cd".to_string()));
        assert!(assessment.tags.contains(&"infra_2".to_string()));
    }

    #[test]
    fn test_tags_capped_at_ten() {
        let assessment = assess(
            "everything",
            "react vue angular node python typescript javascript api database sql \
             mongodb postgresql mysql docker kubernetes aws git",
        );
        assert_eq!(assessment.tags.len(), 10);
    }

    #[test]
    fn test_global_scope_for_preference() {
        let assessment = assess("style", "prefer early returns over nesting");
        assert_eq!(assessment.scope, Scope::Global);
    }

    #[test]
    fn test_global_scope_from_language() {
        let assessment = assess("rule", "always run the linter before committing");
        assert_eq!(assessment.scope, Scope::Global);
    }

    #[test]
    fn test_project_scope_by_default() {
        let assessment = assess("standup", "talked about the sprint board");
        assert_eq!(assessment.scope, Scope::Project);
    }
}
