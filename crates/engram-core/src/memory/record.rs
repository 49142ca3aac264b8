//! Memory record - The fundamental unit of storage
//!
//! Each memory is a short text item with:
//! - A lifecycle type (short-term, long-term, episodic)
//! - A salience score and its time-decayed shadow
//! - Project scoping and tags
//! - Optional embedding metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// Lifecycle class of a memory. Governs decay rate and promotion eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Fresh, fast-decaying. Candidate for promotion.
    #[default]
    ShortTerm,
    /// Consolidated knowledge. Decays 24x slower.
    LongTerm,
    /// Session-bound experience. Decays 6x slower than short-term.
    Episodic,
}

impl MemoryType {
    /// Convert to the stored string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::ShortTerm => "short_term",
            MemoryType::LongTerm => "long_term",
            MemoryType::Episodic => "episodic",
        }
    }

    /// Parse from a stored string name, defaulting to short-term
    pub fn parse_name(s: &str) -> Self {
        match s {
            "long_term" => MemoryType::LongTerm,
            "episodic" => MemoryType::Episodic,
            _ => MemoryType::ShortTerm,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CATEGORIES
// ============================================================================

/// Semantic category of a memory. Influences deletion thresholds and
/// search boosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Architecture,
    Pattern,
    Preference,
    Error,
    Context,
    Learning,
    Todo,
    #[default]
    Note,
    Relationship,
    Custom,
}

impl Category {
    /// Convert to the stored string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Architecture => "architecture",
            Category::Pattern => "pattern",
            Category::Preference => "preference",
            Category::Error => "error",
            Category::Context => "context",
            Category::Learning => "learning",
            Category::Todo => "todo",
            Category::Note => "note",
            Category::Relationship => "relationship",
            Category::Custom => "custom",
        }
    }

    /// Parse from a stored string name, defaulting to note
    pub fn parse_name(s: &str) -> Self {
        match s {
            "architecture" => Category::Architecture,
            "pattern" => Category::Pattern,
            "preference" => Category::Preference,
            "error" => Category::Error,
            "context" => Category::Context,
            "learning" => Category::Learning,
            "todo" => Category::Todo,
            "relationship" => Category::Relationship,
            "custom" => Category::Custom,
            _ => Category::Note,
        }
    }

    /// All categories, for iteration in stats and tests
    pub const ALL: [Category; 10] = [
        Category::Architecture,
        Category::Pattern,
        Category::Preference,
        Category::Error,
        Category::Context,
        Category::Learning,
        Category::Todo,
        Category::Note,
        Category::Relationship,
        Category::Custom,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Visibility of a memory across projects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible only within its project
    #[default]
    Project,
    /// Visible from every project
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::Global => "global",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "global" => Scope::Global,
            _ => Scope::Project,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// LINK RELATIONSHIPS
// ============================================================================

/// Type of edge between two memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    /// One memory cites the other
    References,
    /// One memory builds on the other
    Extends,
    /// The two memories conflict
    Contradicts,
    /// Loose topical association
    Related,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::References => "references",
            Relationship::Extends => "extends",
            Relationship::Contradicts => "contradicts",
            Relationship::Related => "related",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "references" => Relationship::References,
            "extends" => Relationship::Extends,
            "contradicts" => Relationship::Contradicts,
            _ => Relationship::Related,
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A persisted memory.
///
/// Invariants maintained by the engine:
/// - `0 <= decayed_score <= salience <= 1`
/// - `access_count >= 0`, monotonic under access
/// - `last_accessed >= created_at`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Monotonically increasing identifier
    pub id: i64,
    /// Lifecycle type
    pub memory_type: MemoryType,
    /// Semantic category
    pub category: Category,
    /// Short headline
    pub title: String,
    /// Body text, bounded by the configured content limit
    pub content: String,
    /// Owning project, if scoped
    pub project: Option<String>,
    /// Cross-project visibility
    pub scope: Scope,
    /// Searchable from other projects even when project-scoped
    pub transferable: bool,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Baseline importance in [0, 1]
    pub salience: f64,
    /// Last persisted time-decayed score, never above `salience`
    pub decayed_score: f64,
    /// Number of reinforcing accesses
    pub access_count: i64,
    /// Last access timestamp
    pub last_accessed: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Whether an embedding vector is stored for this memory
    pub has_embedding: bool,
    /// Opaque key/value bag
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Memory {
    /// Hours elapsed since the last access
    pub fn hours_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed).num_seconds().max(0) as f64 / 3600.0
    }

    /// Hours elapsed since creation
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 3600.0
    }

    /// Whether this memory is visible from the given project
    pub fn visible_from(&self, project: &str) -> bool {
        self.scope == Scope::Global
            || self.transferable
            || self.project.as_deref() == Some(project)
            || project == "*"
    }
}

// ============================================================================
// MEMORY LINK
// ============================================================================

/// A directed edge in the memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLink {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub relationship: Relationship,
    /// Edge strength in (0, 1]
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

impl MemoryLink {
    /// The endpoint that is not `id`, or `None` when the link does not touch it
    pub fn other_endpoint(&self, id: i64) -> Option<i64> {
        if self.source_id == id {
            Some(self.target_id)
        } else if self.target_id == id {
            Some(self.source_id)
        } else {
            None
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// An episodic session marker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// UUID v4
    pub id: String,
    pub project: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub memories_created: i64,
    pub memories_accessed: i64,
}

impl Session {
    /// Start a new session for the given project
    pub fn begin(project: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project,
            started_at: Utc::now(),
            ended_at: None,
            summary: None,
            memories_created: 0,
            memories_accessed: 0,
        }
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for creating a new memory.
///
/// Fields left unset are filled in by the salience scorer and the active
/// project context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryInput {
    /// Short headline
    pub title: String,
    /// Body text
    pub content: String,
    /// Lifecycle type; defaults to short-term
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    /// Category; suggested from the text when unset
    #[serde(default)]
    pub category: Option<Category>,
    /// Project override; defaults to the active project
    #[serde(default)]
    pub project: Option<String>,
    /// Scope override; auto-detected when unset
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub transferable: Option<bool>,
    /// Extra tags, merged with extracted ones
    #[serde(default)]
    pub tags: Vec<String>,
    /// Salience override in [0, 1]; scored from the text when unset
    #[serde(default)]
    pub salience: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryInput {
    /// Convenience constructor for the common title + content case
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// Builder-style tag attachment
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_roundtrip() {
        for mt in [MemoryType::ShortTerm, MemoryType::LongTerm, MemoryType::Episodic] {
            assert_eq!(MemoryType::parse_name(mt.as_str()), mt);
        }
    }

    #[test]
    fn test_category_roundtrip() {
        for cat in Category::ALL {
            assert_eq!(Category::parse_name(cat.as_str()), cat);
        }
        assert_eq!(Category::parse_name("bogus"), Category::Note);
    }

    #[test]
    fn test_relationship_roundtrip() {
        for rel in [
            Relationship::References,
            Relationship::Extends,
            Relationship::Contradicts,
            Relationship::Related,
        ] {
            assert_eq!(Relationship::parse_name(rel.as_str()), rel);
        }
    }

    #[test]
    fn test_visible_from() {
        let now = Utc::now();
        let mut memory = Memory {
            id: 1,
            memory_type: MemoryType::ShortTerm,
            category: Category::Note,
            title: "t".into(),
            content: "c".into(),
            project: Some("alpha".into()),
            scope: Scope::Project,
            transferable: false,
            tags: vec![],
            salience: 0.5,
            decayed_score: 0.5,
            access_count: 0,
            last_accessed: now,
            created_at: now,
            has_embedding: false,
            metadata: Default::default(),
        };

        assert!(memory.visible_from("alpha"));
        assert!(!memory.visible_from("beta"));
        assert!(memory.visible_from("*"));

        memory.scope = Scope::Global;
        assert!(memory.visible_from("beta"));

        memory.scope = Scope::Project;
        memory.transferable = true;
        assert!(memory.visible_from("beta"));
    }

    #[test]
    fn test_link_other_endpoint() {
        let link = MemoryLink {
            id: 1,
            source_id: 10,
            target_id: 20,
            relationship: Relationship::Related,
            strength: 0.5,
            created_at: Utc::now(),
        };
        assert_eq!(link.other_endpoint(10), Some(20));
        assert_eq!(link.other_endpoint(20), Some(10));
        assert_eq!(link.other_endpoint(30), None);
    }

    #[test]
    fn test_memory_input_deny_unknown_fields() {
        let json = r#"{"title": "t", "content": "c", "tags": []}"#;
        assert!(serde_json::from_str::<MemoryInput>(json).is_ok());

        let json_with_unknown = r#"{"title": "t", "content": "c", "bogus_field": 1}"#;
        assert!(serde_json::from_str::<MemoryInput>(json_with_unknown).is_err());
    }
}
