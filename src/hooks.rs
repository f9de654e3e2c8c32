//! Session lifecycle handlers consumed from the supervisor.
//!
//! SessionStart assembles the budgeted context packet printed to stdout,
//! Stop runs the transcript scan and emits a rate-limited handoff entry,
//! PreCompact is the safety-net scan plus a snapshot entry. All three are
//! infallible at the process boundary: the binary logs errors and exits 0.

use anyhow::Result;
use serde::Deserialize;

use crate::engine::{Engine, SaveRequest};
use crate::store::maintenance::MaintenanceReport;
use crate::store::patterns;
use crate::store::types::{Entry, EntryType, Tier};
use crate::store::EntryFilter;

/// Character budget for the injected SessionStart packet. Rules are exempt
/// from the budget; everything else yields.
pub const PACKET_BUDGET: usize = 4000;

/// Emit a handoff at most this often.
const HANDOFF_MIN_INTERVAL_MS: i64 = 5 * 60 * 1000;

/// Recent-entry window for the packet, in days.
const RECENT_DAYS: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct SessionStartInput {
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopInput {
    #[serde(default)]
    pub stop_hook_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PreCompactInput {
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

// ── SessionStart ─────────────────────────────────────────────────────────────

/// Build the ordered context packet: rules → pending rules → recent entries
/// → latest handoff → recurring patterns → changed-file context → co-change
/// suggestions → cross-project insights → maintenance summary → entry-count
/// line.
pub fn session_start(engine: &mut Engine, _input: &SessionStartInput) -> Result<String> {
    let report = engine.run_maintenance().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "maintenance failed during session start");
        MaintenanceReport::default()
    });

    let mut packet = PacketBuilder::new(PACKET_BUDGET);

    packet.push_unbudgeted(rules_section(engine)?);
    packet.push(pending_rules_section(engine)?);
    packet.push(recent_entries_section(engine)?);
    packet.push(latest_handoff_section(engine)?);
    packet.push(patterns_section(engine)?);
    packet.push(changed_files_section(engine)?);
    packet.push(cochange_section(engine)?);
    packet.push(cross_project_section(engine)?);
    packet.push(maintenance_section(&report));

    let total = engine.store().status()?.total;
    packet.push_unbudgeted(Some(format!("Total entries: {total}")));
    Ok(packet.finish())
}

/// Greedy section assembly against a character budget.
struct PacketBuilder {
    budget: usize,
    sections: Vec<String>,
    len: usize,
}

impl PacketBuilder {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            sections: Vec::new(),
            len: 0,
        }
    }

    /// Append regardless of budget (rules, the count line).
    fn push_unbudgeted(&mut self, section: Option<String>) {
        if let Some(section) = section.filter(|s| !s.is_empty()) {
            self.len += section.chars().count() + 2;
            self.sections.push(section);
        }
    }

    /// Append only when the section still fits.
    fn push(&mut self, section: Option<String>) {
        if let Some(section) = section.filter(|s| !s.is_empty()) {
            let cost = section.chars().count() + 2;
            if self.len + cost <= self.budget {
                self.len += cost;
                self.sections.push(section);
            }
        }
    }

    fn finish(self) -> String {
        self.sections.join("\n\n")
    }
}

fn rules_section(engine: &Engine) -> Result<Option<String>> {
    let rules = engine.store().list_rules()?;
    if rules.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("## Rules");
    for rule in &rules {
        let label = rule.label.as_deref().unwrap_or("unlabeled");
        out.push_str(&format!("\n- [{label}] {}", rule.content));
    }
    Ok(Some(out))
}

fn pending_rules_section(engine: &Engine) -> Result<Option<String>> {
    let proposals = engine.store().find_by_tag("pending_rule")?;
    if proposals.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("## Proposed rules (unconfirmed)");
    for proposal in proposals.iter().take(3) {
        out.push_str(&format!("\n- {}", first_line(&proposal.content, 120)));
    }
    Ok(Some(out))
}

/// Last 3 days, ephemeral tier excluded, current project first.
fn recent_entries_section(engine: &Engine) -> Result<Option<String>> {
    let project = engine.config().project().map(str::to_string);
    let mut recent: Vec<Entry> = engine
        .store()
        .list(&EntryFilter {
            days: Some(RECENT_DAYS),
            ..Default::default()
        })?
        .into_iter()
        .filter(|e| e.tier != Tier::Ephemeral && e.entry_type != EntryType::Rule)
        .collect();
    if recent.is_empty() {
        return Ok(None);
    }
    recent.sort_by_key(|e| match (&project, &e.project) {
        (Some(p), Some(ep)) if p == ep => 0,
        _ => 1,
    });

    let mut out = String::from("## Recent context");
    for entry in recent.iter().take(10) {
        out.push_str(&format!(
            "\n- [{}] {} ({})",
            entry.entry_type,
            first_line(&entry.content, 100),
            entry.date
        ));
    }
    Ok(Some(out))
}

fn latest_handoff_section(engine: &Engine) -> Result<Option<String>> {
    let handoffs = engine.store().list(&EntryFilter {
        entry_type: Some(EntryType::Handoff),
        ..Default::default()
    })?;
    let Some(latest) = handoffs.first() else {
        return Ok(None);
    };
    Ok(Some(format!(
        "## Last handoff ({})\n{}",
        latest.date, latest.content
    )))
}

fn patterns_section(engine: &Engine) -> Result<Option<String>> {
    let active = patterns::get_active_patterns(engine.store())?;
    if active.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("## Recurring issues");
    for pattern in active.iter().take(5) {
        out.push_str(&format!(
            "\n- {} (seen {}x, last {})",
            pattern.label, pattern.occurrence_count, pattern.last_seen
        ));
    }
    Ok(Some(out))
}

/// The latest indexed commit within the recent window, if any.
fn latest_commit(engine: &Engine) -> Result<Option<Entry>> {
    let commits = engine.store().list(&EntryFilter {
        entry_type: Some(EntryType::GitCommit),
        days: Some(RECENT_DAYS),
        ..Default::default()
    })?;
    Ok(commits.into_iter().next())
}

/// Related context for the latest indexed commit's files.
fn changed_files_section(engine: &Engine) -> Result<Option<String>> {
    let Some(latest) = latest_commit(engine)? else {
        return Ok(None);
    };

    let mut out = String::from("## Recently changed files");
    for file in latest.tags.iter().take(3) {
        out.push_str(&format!("\n- {file}"));
        for related in engine.store().find_by_tag(file)?.iter().take(2) {
            if related.id != latest.id {
                out.push_str(&format!("\n  related: {}", first_line(&related.content, 80)));
            }
        }
    }
    Ok(Some(out))
}

/// Files that historically change together with the latest commit's files.
fn cochange_section(engine: &Engine) -> Result<Option<String>> {
    let Some(latest) = latest_commit(engine)? else {
        return Ok(None);
    };
    let project = latest.project.clone().unwrap_or_default();

    let mut out = String::from("## Files that change together");
    let mut any = false;
    for file in latest.tags.iter().take(3) {
        for pair in patterns::get_cochanges(engine.store(), &project, file, 2)? {
            let other = if pair.file_a == *file { &pair.file_b } else { &pair.file_a };
            out.push_str(&format!(
                "\n- {file} changes with {other} ({}x)",
                pair.co_change_count
            ));
            any = true;
        }
    }
    Ok(any.then_some(out))
}

/// Recent insights recorded under other projects. Current-project work is
/// already covered by the recent-context section.
fn cross_project_section(engine: &Engine) -> Result<Option<String>> {
    let current = engine.config().project().map(str::to_string);
    let foreign: Vec<Entry> = engine
        .store()
        .list(&EntryFilter {
            entry_type: Some(EntryType::Insight),
            days: Some(RECENT_DAYS),
            ..Default::default()
        })?
        .into_iter()
        .filter(|e| e.tier != Tier::Ephemeral)
        .filter(|e| e.project.is_some() && e.project != current)
        .collect();
    if foreign.is_empty() {
        return Ok(None);
    }

    let mut out = String::from("## Insights from other projects");
    for entry in foreign.iter().take(5) {
        let project = entry.project.as_deref().unwrap_or("unknown");
        out.push_str(&format!(
            "\n- [{project}] {} ({})",
            first_line(&entry.content, 90),
            entry.date
        ));
    }
    Ok(Some(out))
}

fn maintenance_section(report: &MaintenanceReport) -> Option<String> {
    if !report.has_changes() {
        return None;
    }
    Some(format!(
        "## Maintenance: {} decayed, {} demoted, {} promoted, {} consolidated",
        report.decayed,
        report.demoted,
        report.promoted_stable + report.promoted_frequent,
        report.consolidated
    ))
}

// ── Stop ─────────────────────────────────────────────────────────────────────

/// Turn-end: transcript scan, then a handoff entry if enough time passed
/// since the last one. Returns a one-line status for logging.
pub fn stop(engine: &mut Engine, input: &StopInput) -> Result<String> {
    if input.stop_hook_active {
        return Ok(String::new());
    }

    if let Err(e) = engine.scan_transcripts() {
        tracing::warn!(error = %e, "transcript scan failed during stop");
    }

    let due = engine
        .millis_since_last_handoff()
        .map_or(true, |ms| ms >= HANDOFF_MIN_INTERVAL_MS);
    if !due {
        return Ok(String::new());
    }

    let Some((summary, contributing)) = day_summary(engine)? else {
        return Ok(String::new());
    };
    let outcome = engine.save(SaveRequest::new(summary, EntryType::Handoff))?;
    engine.store_mut().bump_access(&contributing)?;
    engine.mark_handoff()?;
    Ok(format!("handoff {} recorded", outcome.id))
}

/// Summarise today's entries. Returns `None` when there is nothing to say.
fn day_summary(engine: &Engine) -> Result<Option<(String, Vec<String>)>> {
    let today: Vec<Entry> = engine
        .store()
        .list(&EntryFilter {
            days: Some(1),
            ..Default::default()
        })?
        .into_iter()
        .filter(|e| e.entry_type != EntryType::Handoff)
        .collect();
    if today.is_empty() {
        return Ok(None);
    }

    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for entry in &today {
        *counts.entry(entry.entry_type.as_str()).or_insert(0) += 1;
    }
    let breakdown: Vec<String> = counts.iter().map(|(t, n)| format!("{n} {t}")).collect();

    let mut summary = format!(
        "Session handoff: {} entries today ({})",
        today.len(),
        breakdown.join(", ")
    );
    for entry in today.iter().take(5) {
        summary.push_str(&format!(
            "\n- [{}] {}",
            entry.entry_type,
            first_line(&entry.content, 100)
        ));
    }

    let ids = today.iter().map(|e| e.id.clone()).collect();
    Ok(Some((summary, ids)))
}

// ── PreCompact ───────────────────────────────────────────────────────────────

/// Compaction is about to truncate the conversation: scan what remains,
/// then snapshot the session state as a progress entry.
pub fn pre_compact(engine: &mut Engine, input: &PreCompactInput) -> Result<String> {
    if let Err(e) = engine.scan_transcripts() {
        tracing::warn!(error = %e, "transcript scan failed during pre-compact");
    }

    let trigger = input.trigger.as_deref().unwrap_or("auto");
    let mut content = format!("Compaction snapshot (trigger: {trigger})");
    if let Some(instructions) = input.custom_instructions.as_deref().filter(|s| !s.is_empty()) {
        content.push_str(&format!("\nInstructions: {instructions}"));
    }
    if let Some((summary, _)) = day_summary(engine)? {
        content.push_str(&format!("\n{summary}"));
    }

    let mut request = SaveRequest::new(content, EntryType::Progress);
    request.tags = vec!["compaction-snapshot".to_string()];
    let outcome = engine.save(request)?;
    Ok(format!("snapshot {} recorded", outcome.id))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// First line of the content, clamped to `max` chars.
fn first_line(content: &str, max: usize) -> String {
    let line = content.lines().next().unwrap_or("");
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max).collect();
        format!("{cut}…")
    }
}
