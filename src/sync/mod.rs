//! Cross-host replication: append-only per-host JSONL logs on a shared
//! blob store.
//!
//! Each host appends its non-archived entries to `entries/<machine_id>.jsonl`
//! and keeps a local mirror of that log under `<base>/sync/`. Pull walks the
//! other hosts' logs from per-host line cursors and inserts unseen entries,
//! re-embedding content locally (embeddings never travel). Deletions never
//! sync; the protocol is append-only.

pub mod object_store;

use anyhow::{bail, Context, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::clock;
use crate::embedding::Embedder;
use crate::store::entries::{entry_from_row, ENTRY_COLS};
use crate::store::types::{Entry, EntryType, Tier};
use crate::store::Store;
use object_store::ObjectStore;

/// Object-store payloads above this size are refused in both directions.
const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Identity of this host within the shared namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub machine_id: String,
    pub machine_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub enabled: bool,
}

/// Durable replication state, one JSON file per host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub config: MachineConfig,
    pub last_push_at: Option<String>,
    pub last_pull_at: Option<String>,
    /// Lines of each remote log already consumed.
    #[serde(default)]
    pub remote_cursors: HashMap<String, u64>,
}

/// One wire record. Provenance and per-host derived fields (access counts,
/// archive flags, labels) are deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedEntry {
    pub id: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub tags: Vec<String>,
    pub content: String,
    pub tier: Tier,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl SyncedEntry {
    fn from_entry(entry: &Entry) -> Self {
        Self {
            id: entry.id.clone(),
            date: entry.date.clone(),
            time: entry.time.clone(),
            entry_type: entry.entry_type,
            tags: entry.tags.clone(),
            content: entry.content.clone(),
            tier: entry.tier,
            pinned: entry.pinned,
            project: entry.project.clone(),
            session_id: entry.session_id.clone(),
            agent_id: entry.agent_id.clone(),
        }
    }

    fn into_entry(self) -> Entry {
        let mut entry = Entry::new(self.id, self.date, self.time, self.entry_type, self.content);
        entry.tags = self.tags;
        entry.tier = self.tier;
        entry.pinned = self.pinned;
        entry.project = self.project;
        entry.session_id = self.session_id;
        entry.agent_id = self.agent_id;
        entry.source_file = Some("sync".to_string());
        entry
    }
}

/// Shared-namespace manifest: machine_id → display name.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    #[serde(default)]
    machines: HashMap<String, ManifestMachine>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestMachine {
    name: String,
}

/// What one push/pull cycle did.
#[derive(Debug, Default, Serialize)]
pub struct CycleReport {
    pub pushed: usize,
    pub pulled: usize,
    /// Non-empty when either half failed; the other half still ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Load (or initialize) replication state from `<base>/sync/state.json`.
/// A fresh state mints the machine id.
pub fn load_state(base_dir: &Path, sync: &crate::config::SyncConfig) -> Result<SyncState> {
    let path = state_path(base_dir);
    if path.exists() {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let state: SyncState = serde_json::from_str(&text).context("failed to parse sync state")?;
        return Ok(state);
    }
    Ok(SyncState {
        config: MachineConfig {
            machine_id: clock::mint_id(),
            machine_name: sync.machine_name.clone(),
            repo_owner: sync.repo_owner.clone(),
            repo_name: sync.repo_name.clone(),
            enabled: sync.enabled,
        },
        last_push_at: None,
        last_pull_at: None,
        remote_cursors: HashMap::new(),
    })
}

/// Persist replication state.
pub fn save_state(base_dir: &Path, state: &SyncState) -> Result<()> {
    let path = state_path(base_dir);
    if let Some(parent) = path.parent() {
        crate::db::create_private_dir(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(state)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn state_path(base_dir: &Path) -> PathBuf {
    base_dir.join("sync").join("state.json")
}

/// Push/pull driver over one object store.
pub struct Replicator {
    object_store: Box<dyn ObjectStore>,
    base_dir: PathBuf,
}

impl Replicator {
    pub fn new(object_store: Box<dyn ObjectStore>, base_dir: PathBuf) -> Self {
        Self {
            object_store,
            base_dir,
        }
    }

    fn log_key(machine_id: &str) -> String {
        format!("entries/{machine_id}.jsonl")
    }

    fn mirror_path(&self, machine_id: &str) -> PathBuf {
        self.base_dir.join("sync").join(format!("{machine_id}.jsonl"))
    }

    /// Append unpushed local entries to this host's log and upload it.
    /// Returns the number of entries newly appended.
    pub fn push(&self, store: &Store, state: &mut SyncState) -> Result<usize> {
        let candidates = entries_since(store, state.last_push_at.as_deref())?;

        // Ids already mirrored locally were pushed by an earlier cycle
        let mirror_path = self.mirror_path(&state.config.machine_id);
        let mut mirror = match std::fs::read_to_string(&mirror_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", mirror_path.display()))
            }
        };
        let pushed_ids: HashSet<String> = mirror
            .lines()
            .filter_map(|line| serde_json::from_str::<SyncedEntry>(line).ok())
            .map(|e| e.id)
            .collect();

        let mut appended = 0;
        for entry in &candidates {
            if pushed_ids.contains(&entry.id) {
                continue;
            }
            mirror.push_str(&serde_json::to_string(&SyncedEntry::from_entry(entry))?);
            mirror.push('\n');
            appended += 1;
        }

        if mirror.len() > MAX_PAYLOAD_BYTES {
            bail!(
                "outbound log is {} bytes, payload cap is {MAX_PAYLOAD_BYTES}",
                mirror.len()
            );
        }

        if let Some(parent) = mirror_path.parent() {
            crate::db::create_private_dir(parent)?;
        }
        std::fs::write(&mirror_path, &mirror)
            .with_context(|| format!("failed to write {}", mirror_path.display()))?;

        // Optimistic upload: carry the remote's version token, create if absent
        let key = Self::log_key(&state.config.machine_id);
        let remote_version = self.object_store.get(&key)?.map(|b| b.version);
        self.object_store
            .put(&key, mirror.as_bytes(), remote_version.as_deref())?;

        self.announce_machine(state)?;
        state.last_push_at = Some(clock::now_utc_iso());
        Ok(appended)
    }

    /// Walk every other host's log from its line cursor and insert unseen
    /// entries. Embedding failures leave the entry vectorless but present.
    pub fn pull(
        &self,
        store: &mut Store,
        embedder: &Embedder,
        state: &mut SyncState,
    ) -> Result<usize> {
        let mut inserted = 0;
        for key in self.object_store.list("entries/")? {
            let Some(machine_id) = key
                .strip_prefix("entries/")
                .and_then(|k| k.strip_suffix(".jsonl"))
            else {
                continue;
            };
            if machine_id == state.config.machine_id {
                continue;
            }
            let Some(blob) = self.object_store.get(&key)? else { continue };
            if blob.data.len() > MAX_PAYLOAD_BYTES {
                tracing::warn!(key = %key, bytes = blob.data.len(), "remote log over payload cap, skipping");
                continue;
            }

            let text = String::from_utf8_lossy(&blob.data);
            let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            let cursor = *state.remote_cursors.get(machine_id).unwrap_or(&0) as usize;

            for line in lines.iter().skip(cursor) {
                let Ok(synced) = serde_json::from_str::<SyncedEntry>(line) else {
                    tracing::warn!(machine_id, "skipping unparseable sync line");
                    continue;
                };
                if store.has_entry(&synced.id)? {
                    continue;
                }
                let entry = synced.into_entry();
                let row = store.insert(&entry)?;
                match embedder.embed(&entry.content) {
                    Ok(v) => store.insert_vec(row, &v)?,
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "pulled entry left without vector")
                    }
                }
                inserted += 1;
            }
            state
                .remote_cursors
                .insert(machine_id.to_string(), lines.len() as u64);
        }
        state.last_pull_at = Some(clock::now_utc_iso());
        Ok(inserted)
    }

    /// Push then pull, each half isolated so one failure doesn't block the
    /// other's state updates.
    pub fn cycle(
        &self,
        store: &mut Store,
        embedder: &Embedder,
        state: &mut SyncState,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let mut errors = Vec::new();

        match self.push(store, state) {
            Ok(n) => report.pushed = n,
            Err(e) => errors.push(format!("push: {e:#}")),
        }
        match self.pull(store, embedder, state) {
            Ok(n) => report.pulled = n,
            Err(e) => errors.push(format!("pull: {e:#}")),
        }

        if !errors.is_empty() {
            report.error = Some(errors.join("; "));
        }
        report
    }

    /// Register this machine in the shared manifest, once.
    fn announce_machine(&self, state: &SyncState) -> Result<()> {
        let existing = self.object_store.get("manifest.json")?;
        let (mut manifest, version) = match &existing {
            Some(blob) => (
                serde_json::from_slice::<Manifest>(&blob.data).unwrap_or_default(),
                Some(blob.version.as_str()),
            ),
            None => (Manifest { version: 1, machines: HashMap::new() }, None),
        };
        if manifest.machines.contains_key(&state.config.machine_id) {
            return Ok(());
        }
        manifest.version = 1;
        manifest.machines.insert(
            state.config.machine_id.clone(),
            ManifestMachine {
                name: state.config.machine_name.clone(),
            },
        );
        self.object_store
            .put("manifest.json", &serde_json::to_vec(&manifest)?, version)?;
        Ok(())
    }
}

/// Non-archived entries newer than the last push (all of them on first push).
fn entries_since(store: &Store, last_push_at: Option<&str>) -> Result<Vec<Entry>> {
    let sql = format!(
        "SELECT {ENTRY_COLS} FROM entries e \
         WHERE e.archived = 0 \
           AND (?1 IS NULL OR datetime(e.date || ' ' || e.time) > datetime(?1)) \
         ORDER BY e.date, e.time"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt
        .query_map(params![last_push_at], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
