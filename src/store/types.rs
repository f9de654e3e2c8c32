//! Core entry type definitions.
//!
//! Defines [`EntryType`] (the eight entry categories), [`Tier`] (coarse
//! lifetime classes), [`Entry`] (a full record), [`Pattern`] (a recurring
//! issue group), and [`FilePair`] (a co-change observation).

use serde::{Deserialize, Serialize};

/// The eight entry categories a hook or scanner can capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// A choice made and why — promoted to longterm once it proves stable.
    Decision,
    /// A work-in-progress note; short-lived by default.
    Progress,
    /// A problem encountered; feeds pattern detection.
    Issue,
    /// A session-end summary for the next session to pick up.
    Handoff,
    /// Something learned; candidate for longterm retention.
    Insight,
    /// A pointer to external material; kept longterm.
    Reference,
    /// An indexed source-control commit.
    GitCommit,
    /// A persistent instruction; pinned, longterm, unique by label.
    Rule,
}

impl EntryType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Progress => "progress",
            Self::Issue => "issue",
            Self::Handoff => "handoff",
            Self::Insight => "insight",
            Self::Reference => "reference",
            Self::GitCommit => "git_commit",
            Self::Rule => "rule",
        }
    }

    /// Tier an entry of this type lands in when the caller does not pick one.
    pub fn default_tier(&self) -> Tier {
        match self {
            Self::Handoff | Self::Progress => Tier::Ephemeral,
            Self::Reference | Self::Rule => Tier::Longterm,
            _ => Tier::Working,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "progress" => Ok(Self::Progress),
            "issue" => Ok(Self::Issue),
            "handoff" => Ok(Self::Handoff),
            "insight" => Ok(Self::Insight),
            "reference" => Ok(Self::Reference),
            "git_commit" | "git-commit" => Ok(Self::GitCommit),
            "rule" => Ok(Self::Rule),
            _ => Err(format!("unknown entry type: {s}")),
        }
    }
}

/// Coarse lifetime class. Drives decay windows and ranking weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Noise-by-default: archived within days unless accessed.
    Ephemeral,
    /// The middle ground most entries live in.
    Working,
    /// Knowledge that should survive months of silence.
    Longterm,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Working => "working",
            Self::Longterm => "longterm",
        }
    }

    /// Ranking multiplier for this tier.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Longterm => 1.5,
            Self::Working => 1.0,
            Self::Ephemeral => 0.5,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(Self::Ephemeral),
            "working" => Ok(Self::Working),
            "longterm" => Ok(Self::Longterm),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}

/// Resolve the tier for a new entry: explicit choice wins, else by type.
pub fn assign_tier(entry_type: EntryType, explicit: Option<Tier>) -> Tier {
    explicit.unwrap_or_else(|| entry_type.default_tier())
}

/// An entry record, matching the `entries` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Base36 ID, globally unique across hosts.
    pub id: String,
    /// Calendar day, `YYYY-MM-DD`, host-local.
    pub date: String,
    /// Wall clock `HH:MM`, host-local.
    pub time: String,
    /// Entry category.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Short strings in insertion order; set semantics on merge.
    pub tags: Vec<String>,
    /// Free text, capped at 100 000 UTF-8 bytes.
    pub content: String,
    /// Provenance: day-file path, "sync", "transcript-scan", …
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Lifetime class.
    pub tier: Tier,
    /// Times this entry has been returned from retrieval.
    pub access_count: u32,
    /// Day of the last retrieval, or `None` if never accessed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
    /// Pinned entries are immune to demotion and archival.
    pub pinned: bool,
    /// Archived entries are excluded from retrieval and lifecycle by default.
    pub archived: bool,
    /// Rule label; unique within `type='rule'`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// SQLite rowid; keys the vector table. Not serialized.
    #[serde(skip)]
    pub row_id: i64,
}

impl Entry {
    /// A fresh entry with defaults for everything but the identity fields.
    pub fn new(id: String, date: String, time: String, entry_type: EntryType, content: String) -> Self {
        Self {
            id,
            date,
            time,
            entry_type,
            tags: Vec::new(),
            content,
            source_file: None,
            tier: entry_type.default_tier(),
            access_count: 0,
            last_accessed: None,
            pinned: false,
            archived: false,
            label: None,
            project: None,
            session_id: None,
            agent_id: None,
            row_id: 0,
        }
    }

    /// Tags joined for the lexical index and the tags column.
    pub fn tags_joined(&self) -> String {
        self.tags.join(", ")
    }
}

/// Split a stored tags column back into the ordered tag list.
pub fn split_tags(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// A named group of recurring similar issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    /// Human-readable summary, at most 80 chars.
    pub label: String,
    /// Member entry IDs. `occurrence_count` always equals the set size.
    pub entry_ids: Vec<String>,
    pub occurrence_count: u32,
    pub first_seen: String,
    pub last_seen: String,
    pub resolved: bool,
}

impl Pattern {
    /// Active means unresolved and recurring (three or more occurrences).
    pub fn is_active(&self) -> bool {
        !self.resolved && self.occurrence_count >= 3
    }
}

/// Two files observed modified in the same commit, with a running count.
#[derive(Debug, Clone, Serialize)]
pub struct FilePair {
    pub project: String,
    pub file_a: String,
    pub file_b: String,
    pub co_change_count: u32,
    pub last_seen: String,
}

/// Store-wide summary counters.
#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub total: u64,
    /// `(oldest, newest)` entry dates, when any entries exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<(String, String)>,
    pub tier_distribution: std::collections::HashMap<String, u64>,
    pub archived_count: u64,
    pub active_patterns: u64,
    pub storage_bytes: u64,
}
