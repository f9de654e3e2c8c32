//! The engine facade: one handle owning the store, the embedder, and the
//! journal directory, exposing the save/search/maintain/scan contracts that
//! hooks and the CLI consume.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::clock;
use crate::config::HindsightConfig;
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::journal;
use crate::scanner::{self, ScanReport};
use crate::store::maintenance::{self, MaintenanceReport};
use crate::store::patterns;
use crate::store::search::{self, SearchHit, SearchMode, SearchOptions};
use crate::store::types::{assign_tier, Entry, EntryType, Tier};
use crate::store::Store;

/// A save request from a hook or the CLI.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub content: String,
    pub entry_type: EntryType,
    pub tags: Vec<String>,
    pub tier: Option<Tier>,
    pub pinned: bool,
    pub agent_id: Option<String>,
    /// Changed files, for `git_commit` entries. Feeds co-change tracking.
    pub files: Vec<String>,
}

impl SaveRequest {
    pub fn new(content: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            content: content.into(),
            entry_type,
            tags: Vec::new(),
            tier: None,
            pinned: false,
            agent_id: None,
            files: Vec::new(),
        }
    }
}

/// What a save produced.
#[derive(Debug, Serialize)]
pub struct SaveOutcome {
    pub id: String,
    pub date: String,
    pub time: String,
    pub tier: Tier,
    /// Pattern id when the saved issue joined or formed a recurring pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_detected: Option<String>,
}

/// Owns every stateful collaborator for one process.
pub struct Engine {
    store: Store,
    embedder: Embedder,
    config: HindsightConfig,
    base_dir: PathBuf,
}

impl Engine {
    /// Open the durable store under the configured base directory.
    pub fn open(config: HindsightConfig, provider: Box<dyn EmbeddingProvider>) -> Result<Self> {
        let base_dir = config.resolved_base_dir();
        let store = Store::open(config.db_path())?;
        Ok(Self {
            store,
            embedder: Embedder::new(provider),
            config,
            base_dir,
        })
    }

    /// In-memory engine rooted at a throwaway directory. For tests.
    pub fn open_ephemeral(
        config: HindsightConfig,
        provider: Box<dyn EmbeddingProvider>,
        base_dir: PathBuf,
    ) -> Result<Self> {
        Ok(Self {
            store: Store::open_in_memory()?,
            embedder: Embedder::new(provider),
            config,
            base_dir,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn config(&self) -> &HindsightConfig {
        &self.config
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Split borrow for callers that drive the store and embedder together
    /// (the replicator cycle).
    pub fn sync_parts(&mut self) -> (&mut Store, &Embedder) {
        (&mut self.store, &self.embedder)
    }

    /// Upsert a rule and attach its vector. Embedding failure fails the save.
    pub fn save_rule(&mut self, label: &str, content: &str) -> Result<Entry> {
        let entry = self.store.save_rule(label, content)?;
        let vector = self.embedder.embed(&entry.content)?;
        self.store.insert_vec(entry.row_id, &vector)?;
        Ok(entry)
    }

    /// Full save path: day-file append, entry insert, vector insert, pattern
    /// detection, co-change recording. Embedding failure fails the save.
    pub fn save(&mut self, request: SaveRequest) -> Result<SaveOutcome> {
        if request.content.trim().is_empty() {
            bail!("entry content must not be empty");
        }

        let mut entry = Entry::new(
            clock::mint_id(),
            clock::today_ymd(),
            clock::time_hhmm(),
            request.entry_type,
            request.content.clone(),
        );
        entry.tags = request.tags;
        if request.entry_type == EntryType::GitCommit {
            // Changed files ride along as tags so retrieval and the
            // session-start packet can key off them
            for file in &request.files {
                if !entry.tags.contains(file) {
                    entry.tags.push(file.clone());
                }
            }
        }
        entry.tier = assign_tier(request.entry_type, request.tier);
        entry.pinned = request.pinned;
        entry.project = self.config.project().map(str::to_string);
        entry.session_id = Some(clock::session_id().to_string());
        entry.agent_id = request.agent_id;

        // Day file first: the markdown log is the source of record
        let day_path = journal::append_entry(&self.base_dir, &entry)?;
        entry.source_file = Some(day_path.to_string_lossy().into_owned());

        let row_id = self
            .store
            .insert(&entry)
            .context("entry insert failed; the day-file append for it is not authoritative")?;

        let vector = self.embedder.embed(&entry.content)?;
        self.store.insert_vec(row_id, &vector)?;

        let mut pattern_detected = None;
        if entry.entry_type == EntryType::Issue {
            pattern_detected =
                patterns::detect_issue_pattern(&mut self.store, &entry.id, &entry.content, &vector)?;
        }
        if entry.entry_type == EntryType::GitCommit {
            let project = entry.project.clone().unwrap_or_default();
            patterns::record_commit_cochanges(&mut self.store, &project, &request.files, &entry.date)?;
        }

        Ok(SaveOutcome {
            id: entry.id,
            date: entry.date,
            time: entry.time,
            tier: entry.tier,
            pattern_detected,
        })
    }

    /// Retrieval per the search contract. `Auto` picks fast for bare tokens.
    /// An embedder failure degrades to lexical-only rather than erroring.
    pub fn search(
        &mut self,
        query: &str,
        opts: &SearchOptions,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>> {
        let mode = match mode {
            SearchMode::Auto => search::select_mode(query),
            m => m,
        };
        match mode {
            SearchMode::Fast => search::fast_search(&mut self.store, query, opts),
            SearchMode::Semantic => {
                let v = self.embedder.embed(query)?;
                search::semantic_search(&mut self.store, &v, opts)
            }
            SearchMode::Hybrid | SearchMode::Auto => match self.embedder.embed(query) {
                Ok(v) => search::hybrid_search(&mut self.store, query, &v, opts),
                Err(e) => {
                    tracing::warn!(error = %e, "embedder unavailable, degrading to lexical");
                    search::fast_search(&mut self.store, query, opts)
                }
            },
        }
    }

    /// Run the lifecycle passes.
    pub fn run_maintenance(&mut self) -> Result<MaintenanceReport> {
        maintenance::run_maintenance(&mut self.store, &self.config.maintenance)
    }

    /// Incremental transcript scan from the persisted cursor.
    pub fn scan_transcripts(&mut self) -> Result<ScanReport> {
        let transcript_dir = crate::config::expand_tilde(&self.config.scanner.transcript_dir);
        let cursor_path = self.base_dir.join("db").join(".transcript-cursor");
        scanner::scan(
            &mut self.store,
            &self.embedder,
            &transcript_dir,
            &cursor_path,
            &self.config.scanner,
        )
    }

    // ── Handoff bookkeeping ──────────────────────────────────────────────────

    fn last_handoff_path(&self) -> PathBuf {
        self.base_dir.join("db").join(".last-handoff")
    }

    /// Millis since the last handoff was emitted, or `None` if never.
    pub fn millis_since_last_handoff(&self) -> Option<i64> {
        let text = std::fs::read_to_string(self.last_handoff_path()).ok()?;
        let then: i64 = text.trim().parse().ok()?;
        Some((clock::now_utc().timestamp_millis() - then).max(0))
    }

    /// Stamp the handoff clock at now.
    pub fn mark_handoff(&self) -> Result<()> {
        let path = self.last_handoff_path();
        if let Some(parent) = path.parent() {
            crate::db::create_private_dir(parent)?;
        }
        std::fs::write(&path, clock::now_utc().timestamp_millis().to_string())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
