use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use oobline::config::RunConfig;
use oobline::console::{
    CloseReason, ConsoleEngine, LineOutcome, NON_UNICODE, SessionState, Transcript, run_lines,
};
use oobline::credentials::ResolvedCredential;
use oobline::error::{ConnectError, RunError};
use oobline::lines::ConsoleLine;
use oobline::session::{
    ConsoleChannel, DeviceSession, SessionEvent, SessionRecordLevel, SessionRecorder,
};

const SHOW_LINE_OUTPUT: &str = include_str!("fixtures/show_line.txt");

const CONNECT: &[u8] = b"connect 10.0.0.1:2001\n";
const ESCAPE: &[u8] = &[0x1e, b'x'];
const DISCO: &[u8] = b"disco 1\n";
const NEWLINE: &[u8] = b"\n";

/// Channel answering each sent payload with the next scripted reply for it.
#[derive(Default)]
struct ScriptedChannel {
    replies: HashMap<Vec<u8>, VecDeque<Vec<u8>>>,
    pending: Vec<u8>,
    sent: Vec<Vec<u8>>,
    fail_reads: bool,
    /// Reads start failing once this payload has been sent.
    drop_after: Option<Vec<u8>>,
    closed: bool,
}

impl ScriptedChannel {
    fn reply(mut self, to: &[u8], with: &[u8]) -> Self {
        self.replies
            .entry(to.to_vec())
            .or_default()
            .push_back(with.to_vec());
        self
    }

    fn sent_count(&self, data: &[u8]) -> usize {
        self.sent.iter().filter(|sent| sent.as_slice() == data).count()
    }
}

impl ConsoleChannel for ScriptedChannel {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::ConnectClosedError);
        }
        self.sent.push(data.to_vec());
        if self.drop_after.as_deref() == Some(data) {
            self.fail_reads = true;
        }
        if let Some(reply) = self.replies.get_mut(data).and_then(VecDeque::pop_front) {
            self.pending.extend_from_slice(&reply);
        }
        Ok(())
    }

    fn try_read(&mut self) -> Result<Option<Vec<u8>>, ConnectError> {
        if self.fail_reads {
            return Err(ConnectError::ChannelDisconnectError);
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.pending)))
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.closed = true;
        Ok(())
    }
}

/// Session handing out prepared channels in order.
struct ScriptedSession {
    show_line: Result<String, u32>,
    channels: VecDeque<ScriptedChannel>,
    commands: Vec<String>,
}

impl DeviceSession for ScriptedSession {
    type Channel = ScriptedChannel;

    async fn exec(&mut self, command: &str) -> Result<String, ConnectError> {
        self.commands.push(command.to_string());
        self.show_line
            .clone()
            .map_err(|status| ConnectError::CommandFailed {
                command: command.to_string(),
                status,
            })
    }

    async fn open_channel(&mut self) -> Result<ScriptedChannel, ConnectError> {
        self.channels
            .pop_front()
            .ok_or(ConnectError::ChannelDisconnectError)
    }
}

fn credential() -> ResolvedCredential {
    ResolvedCredential {
        device: "oob1".to_string(),
        address: "10.0.0.1".to_string(),
        device_type: "cisco_ios".to_string(),
        port: 22,
        username: "admin".to_string(),
        password: "line-pw".to_string(),
        secret: "en4ble".to_string(),
    }
}

fn line(id: u32) -> ConsoleLine {
    ConsoleLine {
        id,
        interface: format!("As0/1/{}", id - 2000),
    }
}

fn transcript() -> Transcript<Vec<u8>, Vec<u8>> {
    Transcript::new(Vec::new(), Vec::new())
}

#[tokio::test(start_paused = true)]
async fn connection_message_marks_line_inactive() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut channel =
        ScriptedChannel::default().reply(CONNECT, b"% Connection refused by remote host\r\n");

    let mut engine = ConsoleEngine::new(&config, &credential(), &mut transcript);
    let report = engine.run_line(&mut channel, &line(2001)).await;

    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::Inactive));
    assert_eq!(engine.state(), SessionState::Closed(CloseReason::Inactive));
    assert_eq!(report.retries, 0);
    assert!(!report.teardown);
    assert_eq!(channel.sent, vec![CONNECT.to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn empty_banner_skips_the_retry_loop() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut channel = ScriptedChannel::default();

    let started = tokio::time::Instant::now();
    let report = ConsoleEngine::new(&config, &credential(), &mut transcript)
        .run_line(&mut channel, &line(2001))
        .await;

    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::NoBanner));
    assert_eq!(report.retries, 0);
    assert!(!report.teardown);
    assert_eq!(channel.sent, vec![CONNECT.to_vec()]);
    assert_eq!(started.elapsed(), Duration::from_secs(3));

    let (log, _) = transcript.into_parts();
    assert!(String::from_utf8_lossy(&log).contains("!!! no banner"));
}

#[tokio::test(start_paused = true)]
async fn retries_run_out_without_login_prompt() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut channel = ScriptedChannel::default()
        .reply(CONNECT, b"Trying 10.0.0.1, 2001 ... Open\r\n")
        .reply(DISCO, b"Closing connection to 10.0.0.1 [confirm]");
    for n in 1..=6 {
        channel = channel.reply(NEWLINE, format!("\r\nnoise {n}").as_bytes());
    }
    channel = channel.reply(NEWLINE, b"\r\noob1#");

    let started = tokio::time::Instant::now();
    let report = ConsoleEngine::new(&config, &credential(), &mut transcript)
        .run_line(&mut channel, &line(2001))
        .await;

    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::Timeout));
    assert_eq!(report.retries, 6);
    let expected: String = (1..=6).map(|n| format!("\r\nnoise {n}")).collect();
    assert_eq!(report.output, expected);

    assert!(report.teardown);
    assert!(report.closing.contains("[confirm]"));
    assert!(report.closing.ends_with("oob1#"));
    assert_eq!(channel.sent_count(ESCAPE), 1);
    assert_eq!(channel.sent_count(DISCO), 1);
    assert_eq!(channel.sent_count(NEWLINE), 7);

    let elapsed = started.elapsed();
    assert!(elapsed >= config.poll.worst_case(), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(43), "elapsed {elapsed:?}");

    let (log, echo) = transcript.into_parts();
    let log = String::from_utf8_lossy(&log).into_owned();
    assert!(log.contains("*** sending CR/LF try 1"));
    assert!(log.contains("*** sending CR/LF try 6"));
    assert!(!String::from_utf8_lossy(&echo).contains("*** sending CR/LF"));
}

#[tokio::test(start_paused = true)]
async fn login_prompt_ends_retries_and_disconnects_the_line() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut channel = ScriptedChannel::default()
        .reply(CONNECT, b"Trying 10.0.0.1, 2001 ... Open\r\n")
        .reply(NEWLINE, b"\r\n")
        .reply(NEWLINE, b"\r\nrouter1 login: ")
        .reply(DISCO, b"[confirm]");

    let report = ConsoleEngine::new(&config, &credential(), &mut transcript)
        .run_line(&mut channel, &line(2001))
        .await;

    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::Success));
    assert_eq!(report.retries, 2);
    assert!(report.output.ends_with("login: "));
    assert!(report.teardown);
    assert_eq!(
        &channel.sent[channel.sent.len() - 3..],
        &[ESCAPE.to_vec(), DISCO.to_vec(), NEWLINE.to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn channel_lost_during_disconnect_keeps_the_settled_outcome() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut channel = ScriptedChannel {
        drop_after: Some(DISCO.to_vec()),
        ..Default::default()
    }
    .reply(CONNECT, b"Trying 10.0.0.1, 2001 ... Open\r\n")
    .reply(NEWLINE, b"\r\nrouter1 login: ");

    let mut engine = ConsoleEngine::new(&config, &credential(), &mut transcript);
    let report = engine.run_line(&mut channel, &line(2001)).await;

    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::Success));
    assert_eq!(engine.state(), SessionState::Closed(CloseReason::Success));
    assert_eq!(report.output, "\r\nrouter1 login: ");
    assert!(report.teardown);
    assert_eq!(channel.sent_count(DISCO), 1);

    let (log, _) = transcript.into_parts();
    assert!(String::from_utf8_lossy(&log).contains("!!! line 2001 disconnect failed"));
}

#[tokio::test(start_paused = true)]
async fn line_password_prompt_is_answered_and_not_recorded() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let recorder = SessionRecorder::new(SessionRecordLevel::Full);
    let mut channel = ScriptedChannel::default()
        .reply(CONNECT, b"Trying 10.0.0.1, 2001 ... Open\r\n\r\nPassword: ")
        .reply(b"line-pw\n", b"\r\n")
        .reply(NEWLINE, b"\r\nlogin: ");

    let report = ConsoleEngine::new(&config, &credential(), &mut transcript)
        .with_recorder(recorder.clone())
        .run_line(&mut channel, &line(2001))
        .await;

    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::Success));
    assert_eq!(channel.sent[1], b"line-pw\n".to_vec());
    assert!(report.banner.contains("Password: "));

    let jsonl = recorder.to_jsonl().expect("jsonl");
    assert!(!jsonl.contains("line-pw"));
    let events = recorder.events_for_line(2001).expect("events");
    assert!(events.contains(&SessionEvent::InputSent {
        line: 2001,
        input: "<hidden>".to_string(),
        hidden: true,
    }));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::LineClosed { reason, retries: 1, .. }) if reason == "Success"
    ));
}

#[tokio::test(start_paused = true)]
async fn non_unicode_output_is_replaced_in_buffers_but_kept_in_sinks() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut channel = ScriptedChannel::default()
        .reply(CONNECT, b"\xff\xfe\xfd")
        .reply(NEWLINE, b"login:");

    let report = ConsoleEngine::new(&config, &credential(), &mut transcript)
        .run_line(&mut channel, &line(2001))
        .await;

    assert_eq!(report.banner, NON_UNICODE);
    assert_eq!(report.outcome, LineOutcome::Closed(CloseReason::Success));
    let (log, echo) = transcript.into_parts();
    assert!(log.windows(3).any(|w| w == b"\xff\xfe\xfd"));
    assert!(echo.windows(3).any(|w| w == b"\xff\xfe\xfd"));
}

#[tokio::test(start_paused = true)]
async fn failing_lines_do_not_stop_the_run() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let broken = ScriptedChannel {
        fail_reads: true,
        ..Default::default()
    };
    let inactive = ScriptedChannel::default().reply(
        b"connect 10.0.0.1:2002\n",
        b"% Connection refused by remote host",
    );
    let mut session = ScriptedSession {
        show_line: Ok(String::new()),
        channels: VecDeque::from(vec![broken, inactive]),
        commands: Vec::new(),
    };
    let lines: BTreeMap<u32, ConsoleLine> =
        [2001, 2002, 2003].into_iter().map(|id| (id, line(id))).collect();

    let reports = ConsoleEngine::new(&config, &credential(), &mut transcript)
        .run_all(&mut session, &lines)
        .await;

    assert_eq!(reports.len(), 3);
    assert!(matches!(reports[0].outcome, LineOutcome::Failed(_)));
    assert_eq!(reports[1].outcome, LineOutcome::Closed(CloseReason::Inactive));
    assert!(matches!(reports[2].outcome, LineOutcome::Failed(_)));

    let (log, echo) = transcript.into_parts();
    let echo = String::from_utf8_lossy(&echo).into_owned();
    assert!(echo.contains("*** port 2001 interface As0/1/1"));
    assert!(echo.contains("*** port 2003 interface As0/1/3"));
    assert!(String::from_utf8_lossy(&log).contains("!!! line 2001 failed"));
}

#[tokio::test(start_paused = true)]
async fn run_lines_enumerates_and_summarizes() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
    let success = ScriptedChannel::default()
        .reply(b"connect 10.0.0.1:2001\n", b"Open\r\n")
        .reply(NEWLINE, b"login: ");
    let inactive = ScriptedChannel::default()
        .reply(b"connect 10.0.0.1:2003\n", b"% Connection refused");
    let mut session = ScriptedSession {
        show_line: Ok(SHOW_LINE_OUTPUT.to_string()),
        channels: VecDeque::from(vec![success, inactive]),
        commands: Vec::new(),
    };

    let (reports, summary) =
        run_lines(&mut session, &credential(), &config, &mut transcript, &recorder)
            .await
            .expect("run");

    assert_eq!(session.commands, vec!["show line".to_string()]);
    assert_eq!(reports.iter().map(|r| r.line).collect::<Vec<_>>(), vec![2001, 2003]);
    assert_eq!(summary.lines, 2);
    assert_eq!(summary.success, 1);
    assert_eq!(summary.inactive, 1);

    let (log, _) = transcript.into_parts();
    let log = String::from_utf8_lossy(&log).into_owned();
    assert!(log.contains("Tty Line Typ"));
    assert!(log.trim_end().ends_with(&format!("*** {summary}")));

    let entries = recorder.entries().expect("entries");
    assert!(matches!(
        entries.first().map(|e| &e.event),
        Some(SessionEvent::LinesEnumerated { count: 2, .. })
    ));
    assert!(
        entries
            .iter()
            .all(|e| !matches!(e.event, SessionEvent::RawChunk { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn failed_show_line_is_a_connect_error() {
    let config = RunConfig::new("/nonexistent");
    let mut transcript = transcript();
    let mut session = ScriptedSession {
        show_line: Err(1),
        channels: VecDeque::new(),
        commands: Vec::new(),
    };

    let err = run_lines(
        &mut session,
        &credential(),
        &config,
        &mut transcript,
        &SessionRecorder::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RunError::Connect { .. }));
    assert_eq!(err.exit_code(), 12);
}
