use oobline::session::{NormalizeOptions, SessionEvent, SessionRecorder};

const RUN_FIXTURE: &str = include_str!("fixtures/console_run.jsonl");
const EXPECTED_SNAPSHOT: &str = include_str!("fixtures/console_run_expected.txt");

fn snapshot(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::LinesEnumerated { device, count } => {
            Some(format!("lines_enumerated {device} {count}"))
        }
        SessionEvent::LineStarted {
            line, interface, ..
        } => Some(format!("{line} started {interface}")),
        SessionEvent::InputSent {
            line,
            input,
            hidden,
        } => Some(if *hidden {
            format!("{line} sent <hidden>")
        } else {
            format!("{line} sent {input:?}")
        }),
        SessionEvent::LineClosed {
            line,
            reason,
            retries,
        } => Some(format!("{line} closed {reason} after {retries}")),
        SessionEvent::StateChanged { .. } | SessionEvent::RawChunk { .. } => None,
    }
}

#[test]
fn fixture_has_basic_quality_guarantees() {
    let recorder = SessionRecorder::from_jsonl(RUN_FIXTURE).expect("parse fixture");
    let entries = recorder.entries().expect("entries");
    assert!(!entries.is_empty());

    let mut last_ts = 0_u128;
    let mut started = Vec::new();
    let mut closed = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        assert!(
            entry.ts_ms >= last_ts,
            "non-monotonic timestamp at index {idx}"
        );
        last_ts = entry.ts_ms;

        match &entry.event {
            SessionEvent::LineStarted { line, command, .. } => {
                assert!(!command.trim().is_empty(), "line {line} has an empty command");
                started.push(*line);
            }
            SessionEvent::LineClosed { line, .. } => closed.push(*line),
            _ => {}
        }
    }

    assert_eq!(started, closed, "every started line should be closed");
}

#[test]
fn fixture_groups_events_by_line() {
    let recorder = SessionRecorder::from_jsonl(RUN_FIXTURE).expect("parse fixture");

    let inactive = recorder.events_for_line(2003).expect("events");
    assert!(matches!(
        inactive.last(),
        Some(SessionEvent::LineClosed { reason, retries: 0, .. }) if reason == "Inactive"
    ));
    assert!(
        !inactive
            .iter()
            .any(|e| matches!(e, SessionEvent::InputSent { input, .. } if input == "disco 1\n")),
        "inactive lines are never disconnected"
    );

    let active = recorder.events_for_line(2001).expect("events");
    assert!(
        active
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged { state, .. } if state == "ConfirmPending"))
    );
}

#[test]
fn normalized_fixture_matches_snapshot() {
    let options = NormalizeOptions {
        keep_raw_chunks: false,
        keep_state_changed: false,
    };
    let normalized = SessionRecorder::normalize_jsonl(RUN_FIXTURE, options).expect("normalize");
    let entries = SessionRecorder::from_jsonl(&normalized)
        .expect("parse normalized")
        .entries()
        .expect("entries");

    let actual = entries
        .iter()
        .filter_map(|entry| snapshot(&entry.event))
        .collect::<Vec<_>>()
        .join("\n");
    assert_eq!(actual, EXPECTED_SNAPSHOT.trim());
}

#[test]
fn fixture_normalization_removes_noise_by_default() {
    let normalized = SessionRecorder::normalize_jsonl(RUN_FIXTURE, NormalizeOptions::default())
        .expect("normalize fixture");
    let entries = SessionRecorder::from_jsonl(&normalized)
        .expect("parse normalized")
        .entries()
        .expect("entries");

    assert!(
        !entries
            .iter()
            .any(|e| matches!(e.event, SessionEvent::RawChunk { .. }))
    );
    assert!(
        entries
            .iter()
            .any(|e| matches!(e.event, SessionEvent::StateChanged { .. }))
    );
}
