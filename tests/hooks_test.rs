mod helpers;

use helpers::{days_ago, spike, test_engine};
use hindsight::engine::SaveRequest;
use hindsight::hooks::{self, PreCompactInput, SessionStartInput, StopInput, PACKET_BUDGET};
use hindsight::store::patterns::create_or_update_pattern;
use hindsight::store::types::{Entry, EntryType, Tier};
use hindsight::store::EntryFilter;

fn session_input() -> SessionStartInput {
    SessionStartInput {
        source: Some("startup".into()),
    }
}

/// Scenario: 3 rules (600 chars), 50 recent candidates, a handoff, two
/// patterns, and a non-empty maintenance report fit the 4000-char budget
/// with the rules verbatim and the count line last.
#[test]
fn session_start_packet_respects_budget() {
    let (mut engine, _tmp) = test_engine();

    let rule_bodies: Vec<String> = (0..3)
        .map(|i| format!("rule body {i} {}", "r".repeat(180)))
        .collect();
    for (i, body) in rule_bodies.iter().enumerate() {
        engine.save_rule(&format!("rule-{i}"), body).unwrap();
    }

    for i in 0..50 {
        let mut e = Entry::new(
            format!("rc{i:04}"),
            days_ago(1),
            "10:00".into(),
            EntryType::Insight,
            format!("recent candidate number {i} with some descriptive text attached"),
        );
        e.tier = Tier::Working;
        let row = engine.store_mut().insert(&e).unwrap();
        engine.store_mut().insert_vec(row, &spike(i)).unwrap();
    }

    let mut handoff = Entry::new(
        "hand01".into(),
        days_ago(1),
        "18:00".into(),
        EntryType::Handoff,
        "Yesterday: wired up the importer and fixed the flaky test".into(),
    );
    handoff.tier = Tier::Ephemeral;
    engine.store_mut().insert(&handoff).unwrap();

    for (pid, label) in [("p1", "importer crash loop"), ("p2", "stale cache reads")] {
        let ids: Vec<String> = (0..3).map(|i| format!("{pid}-e{i}")).collect();
        create_or_update_pattern(engine.store_mut(), label, &ids).unwrap();
    }

    // Two stale ephemeral entries give maintenance something to decay
    for i in 0..2 {
        let mut e = Entry::new(
            format!("stale{i}"),
            days_ago(5),
            "09:00".into(),
            EntryType::Progress,
            format!("stale scratch {i}"),
        );
        e.tier = Tier::Ephemeral;
        engine.store_mut().insert(&e).unwrap();
    }

    let packet = hooks::session_start(&mut engine, &session_input()).unwrap();

    assert!(
        packet.chars().count() <= PACKET_BUDGET,
        "packet is {} chars",
        packet.chars().count()
    );
    for body in &rule_bodies {
        assert!(packet.contains(body.as_str()), "rule body missing from packet");
    }
    assert!(packet.contains("importer crash loop"));
    assert!(packet.contains("Last handoff"));
    let last_line = packet.lines().last().unwrap();
    assert!(last_line.starts_with("Total entries: "), "got {last_line:?}");
}

#[test]
fn session_start_surfaces_cross_project_insights() {
    let (mut engine, _tmp) = helpers::test_engine_for_project("alpha");

    let mut foreign = Entry::new(
        "xp0001".into(),
        days_ago(1),
        "09:00".into(),
        EntryType::Insight,
        "The beta importer needs its cache warmed before first use".into(),
    );
    foreign.project = Some("beta".into());
    engine.store_mut().insert(&foreign).unwrap();

    let mut local = Entry::new(
        "xp0002".into(),
        days_ago(1),
        "10:00".into(),
        EntryType::Insight,
        "Alpha retries are capped at five attempts".into(),
    );
    local.project = Some("alpha".into());
    engine.store_mut().insert(&local).unwrap();

    let unstamped = Entry::new(
        "xp0003".into(),
        days_ago(1),
        "11:00".into(),
        EntryType::Insight,
        "A note recorded with no project at all".into(),
    );
    engine.store_mut().insert(&unstamped).unwrap();

    let packet = hooks::session_start(&mut engine, &session_input()).unwrap();
    let section = packet
        .split("\n\n")
        .find(|s| s.starts_with("## Insights from other projects"))
        .expect("cross-project section missing");

    assert!(section.contains("[beta] The beta importer needs its cache warmed"));
    // Current-project and unstamped entries stay out of this section
    assert!(!section.contains("Alpha retries are capped"));
    assert!(!section.contains("no project at all"));
    // They still surface through the plain recent-context section
    assert!(packet.contains("Alpha retries are capped"));
}

#[test]
fn session_start_lists_changed_files_and_cochanges() {
    let (mut engine, _tmp) = test_engine();

    let mut commit = SaveRequest::new("refactor: extract handler module", EntryType::GitCommit);
    commit.files = vec!["src/api.rs".into(), "src/routes.rs".into()];
    engine.save(commit).unwrap();

    let mut related = Entry::new(
        "rel001".into(),
        days_ago(0),
        "09:00".into(),
        EntryType::Insight,
        "api.rs owns the retry logic".into(),
    );
    related.tags = vec!["src/api.rs".into()];
    engine.store_mut().insert(&related).unwrap();

    let packet = hooks::session_start(&mut engine, &session_input()).unwrap();
    assert!(packet.contains("## Recently changed files"));
    assert!(packet.contains("related: api.rs owns the retry logic"));
    assert!(packet.contains("## Files that change together"));
    assert!(packet.contains("src/api.rs changes with src/routes.rs (1x)"));
}

#[test]
fn session_start_on_empty_store_is_just_the_count() {
    let (mut engine, _tmp) = test_engine();
    let packet = hooks::session_start(&mut engine, &session_input()).unwrap();
    assert_eq!(packet, "Total entries: 0");
}

#[test]
fn stop_emits_handoff_once_per_interval() {
    let (mut engine, _tmp) = test_engine();
    engine
        .save(SaveRequest::new(
            "Implemented the retry queue for outbound webhooks",
            EntryType::Progress,
        ))
        .unwrap();
    engine
        .save(SaveRequest::new(
            "Decided to cap retries at five attempts",
            EntryType::Decision,
        ))
        .unwrap();

    let status = hooks::stop(&mut engine, &StopInput { stop_hook_active: false }).unwrap();
    assert!(status.contains("handoff"));

    let handoffs = engine
        .store()
        .list(&EntryFilter {
            entry_type: Some(EntryType::Handoff),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(handoffs.len(), 1);
    assert!(handoffs[0].content.contains("2 entries today"));

    // Contributing entries got an access bump
    let decision = engine
        .store()
        .list(&EntryFilter {
            entry_type: Some(EntryType::Decision),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(decision[0].access_count, 1);

    // Immediately after, the 5-minute gate suppresses a second handoff
    let second = hooks::stop(&mut engine, &StopInput { stop_hook_active: false }).unwrap();
    assert!(second.is_empty());
    let handoffs = engine
        .store()
        .list(&EntryFilter {
            entry_type: Some(EntryType::Handoff),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(handoffs.len(), 1);
}

#[test]
fn stop_is_a_noop_when_hook_already_active() {
    let (mut engine, _tmp) = test_engine();
    engine
        .save(SaveRequest::new("Some work happened today", EntryType::Progress))
        .unwrap();

    let status = hooks::stop(&mut engine, &StopInput { stop_hook_active: true }).unwrap();
    assert!(status.is_empty());
    let handoffs = engine
        .store()
        .list(&EntryFilter {
            entry_type: Some(EntryType::Handoff),
            ..Default::default()
        })
        .unwrap();
    assert!(handoffs.is_empty());
}

#[test]
fn stop_with_empty_day_writes_nothing() {
    let (mut engine, _tmp) = test_engine();
    let status = hooks::stop(&mut engine, &StopInput { stop_hook_active: false }).unwrap();
    assert!(status.is_empty());
    assert_eq!(engine.store().status().unwrap().total, 0);
}

#[test]
fn pre_compact_snapshots_session_state() {
    let (mut engine, _tmp) = test_engine();
    engine
        .save(SaveRequest::new(
            "Refactored the scheduler before compaction",
            EntryType::Progress,
        ))
        .unwrap();

    let input = PreCompactInput {
        trigger: Some("auto".into()),
        custom_instructions: Some("keep the schema discussion".into()),
    };
    hooks::pre_compact(&mut engine, &input).unwrap();

    let snapshots = engine.store().find_by_tag("compaction-snapshot").unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].entry_type, EntryType::Progress);
    assert!(snapshots[0].content.contains("trigger: auto"));
    assert!(snapshots[0].content.contains("keep the schema discussion"));
}
