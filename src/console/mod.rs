//! Console line takeover over reverse-connect lines.
//!
//! A console server exposes every async line as a reverse-connect target.
//! For each [`ConsoleLine`] the [`ConsoleEngine`] opens a fresh shell
//! channel on the primary session, asks for the line, and nudges it with
//! bare newlines until the attached device shows a login prompt or the
//! retry budget is spent. Active lines are disconnected again afterwards
//! so the next line starts from the console server's own prompt.
//!
//! The channel has no acknowledgements, so everything here is polling:
//! sleep a fixed interval, take whatever arrived, look for a marker.
//!
//! # Main Components
//!
//! - [`ConsoleEngine`] - per-line state machine and sequential fan-out
//! - [`Transcript`] - log file and terminal sinks
//! - [`resolve_device`] / [`run_device`] - the whole run for one console server

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::time::Duration;

use log::{debug, trace, warn};
use serde::Serialize;

use crate::config::RunConfig;
use crate::credentials::{CredentialStore, ResolvedCredential};
use crate::error::{ConnectError, CredentialError, RunError};
use crate::lines::{ConsoleLine, enumerate_lines};
use crate::session::{
    ConsoleChannel, ConsoleSession, DeviceSession, SessionEvent, SessionRecordLevel,
    SessionRecorder,
};

pub use transcript::{Transcript, create_log, ensure_log_free};

/// Marker of a line that is busy or refused.
const INACTIVE_MARKER: &str = "Connection";
/// Marker of a line password prompt.
const PASSWORD_MARKER: &str = "assword:";
/// Marker of a device login prompt.
const LOGIN_MARKER: &str = "ogin:";
/// Marker of the disconnect confirmation prompt.
const CONFIRM_MARKER: &str = "[confirm]";

/// Escape sequence returning from a reverse-connect line to the server prompt.
const ESCAPE_SEQUENCE: &[u8] = &[0x1e, b'x'];
const DISCONNECT_COMMAND: &[u8] = b"disco 1\n";
const NEWLINE: &[u8] = b"\n";

/// Stand-in for a chunk that is not valid UTF-8.
pub const NON_UNICODE: &str = "!!! error non-Unicode character in output";

/// How a line ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseReason {
    /// The login prompt showed up.
    Success,
    /// The server answered with a `Connection` message.
    Inactive,
    /// Nothing came back after the reverse-connect request.
    NoBanner,
    /// The retry budget ran out without a login prompt.
    Timeout,
}

/// Per-line engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    AwaitingBanner,
    AwaitingLoginPrompt,
    ConfirmPending,
    Closed(CloseReason),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed(reason) => write!(f, "Closed({reason:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Final result of one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LineOutcome {
    Closed(CloseReason),
    /// The channel failed; the run went on with the next line.
    Failed(String),
}

/// What happened on one console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineReport {
    pub line: u32,
    pub interface: String,
    /// Text received after the reverse-connect request.
    pub banner: String,
    /// Text received while waiting for the login prompt.
    pub output: String,
    /// Text received during the disconnect sequence.
    pub closing: String,
    /// Newlines sent while waiting for the login prompt.
    pub retries: u32,
    pub outcome: LineOutcome,
    /// Whether the disconnect sequence ran.
    pub teardown: bool,
}

impl LineReport {
    fn new(line: &ConsoleLine) -> Self {
        Self {
            line: line.id,
            interface: line.interface.clone(),
            banner: String::new(),
            output: String::new(),
            closing: String::new(),
            retries: 0,
            outcome: LineOutcome::Closed(CloseReason::NoBanner),
            teardown: false,
        }
    }

    pub fn reason(&self) -> Option<CloseReason> {
        match self.outcome {
            LineOutcome::Closed(reason) => Some(reason),
            LineOutcome::Failed(_) => None,
        }
    }
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub device: String,
    pub lines: usize,
    pub success: usize,
    pub inactive: usize,
    pub no_banner: usize,
    pub timeout: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_reports(device: &str, reports: &[LineReport]) -> Self {
        let mut summary = RunSummary {
            device: device.to_string(),
            lines: reports.len(),
            ..Default::default()
        };
        for report in reports {
            match report.outcome {
                LineOutcome::Closed(CloseReason::Success) => summary.success += 1,
                LineOutcome::Closed(CloseReason::Inactive) => summary.inactive += 1,
                LineOutcome::Closed(CloseReason::NoBanner) => summary.no_banner += 1,
                LineOutcome::Closed(CloseReason::Timeout) => summary.timeout += 1,
                LineOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} lines, {} login prompt, {} inactive, {} no banner, {} timeout, {} failed",
            self.device,
            self.lines,
            self.success,
            self.inactive,
            self.no_banner,
            self.timeout,
            self.failed
        )
    }
}

fn decode(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => NON_UNICODE.to_string(),
    }
}

/// Drives console lines one after another over a device session.
pub struct ConsoleEngine<'a, L: Write, E: Write> {
    config: &'a RunConfig,
    address: String,
    password: String,
    transcript: &'a mut Transcript<L, E>,
    recorder: SessionRecorder,
    state: SessionState,
}

impl<'a, L: Write, E: Write> ConsoleEngine<'a, L, E> {
    /// `credential` supplies the reverse-connect address and the line password.
    pub fn new(
        config: &'a RunConfig,
        credential: &ResolvedCredential,
        transcript: &'a mut Transcript<L, E>,
    ) -> Self {
        Self {
            config,
            address: credential.address.clone(),
            password: credential.password.clone(),
            transcript,
            recorder: SessionRecorder::new(SessionRecordLevel::Off),
            state: SessionState::Disconnected,
        }
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs every line in id order, each on its own channel.
    ///
    /// A line that fails is reported and the run continues with the next one.
    pub async fn run_all<S: DeviceSession>(
        &mut self,
        session: &mut S,
        lines: &BTreeMap<u32, ConsoleLine>,
    ) -> Vec<LineReport> {
        let mut reports = Vec::with_capacity(lines.len());
        for line in lines.values() {
            self.announce(&format!("*** port {} interface {}", line.id, line.interface));
            let report = match session.open_channel().await {
                Ok(mut channel) => {
                    let report = self.run_line(&mut channel, line).await;
                    if let Err(err) = channel.close().await {
                        debug!("line {}: closing channel failed: {err}", line.id);
                    }
                    report
                }
                Err(err) => {
                    warn!("line {}: unable to open channel: {err}", line.id);
                    let mut report = LineReport::new(line);
                    report.outcome = LineOutcome::Failed(err.to_string());
                    report
                }
            };
            reports.push(report);
        }
        reports
    }

    /// Takes over one line on an open channel.
    pub async fn run_line<C: ConsoleChannel>(
        &mut self,
        channel: &mut C,
        line: &ConsoleLine,
    ) -> LineReport {
        let mut report = LineReport::new(line);
        self.state = SessionState::Disconnected;

        if let Err(err) = self.drive(channel, line, &mut report).await {
            warn!("line {}: {err}", line.id);
            self.note(&format!("!!! line {} failed: {err}", line.id));
            report.outcome = LineOutcome::Failed(err.to_string());
        }

        let reason = match &report.outcome {
            LineOutcome::Closed(reason) => format!("{reason:?}"),
            LineOutcome::Failed(err) => format!("Failed: {err}"),
        };
        self.record(SessionEvent::LineClosed {
            line: line.id,
            reason,
            retries: report.retries,
        });
        report
    }

    async fn drive<C: ConsoleChannel>(
        &mut self,
        channel: &mut C,
        line: &ConsoleLine,
        report: &mut LineReport,
    ) -> Result<(), ConnectError> {
        let poll = self.config.poll.clone();
        let command = self.config.connect_command(&self.address, line.id);
        self.record(SessionEvent::LineStarted {
            line: line.id,
            interface: line.interface.clone(),
            command: command.clone(),
        });

        self.send(channel, line.id, format!("{command}\n").as_bytes(), false)
            .await?;
        self.transition(line.id, SessionState::AwaitingBanner);

        for _ in 0..poll.banner_polls {
            let Some(chunk) = self.poll(channel, line.id, poll.banner_interval).await? else {
                continue;
            };
            report.banner.push_str(&chunk);
            if report.banner.contains(INACTIVE_MARKER) {
                return Ok(self.close(line.id, report, CloseReason::Inactive));
            }
            if chunk.contains(PASSWORD_MARKER) {
                let secret = format!("{}\n", self.password);
                self.send(channel, line.id, secret.as_bytes(), true).await?;
                if let Some(chunk) = self.poll(channel, line.id, poll.banner_interval).await? {
                    report.banner.push_str(&chunk);
                    if report.banner.contains(INACTIVE_MARKER) {
                        return Ok(self.close(line.id, report, CloseReason::Inactive));
                    }
                }
            }
        }

        if report.banner.is_empty() {
            self.note("!!! no banner");
            return Ok(self.close(line.id, report, CloseReason::NoBanner));
        }

        self.transition(line.id, SessionState::AwaitingLoginPrompt);
        let mut reason = CloseReason::Timeout;
        'attempts: for attempt in 1..=poll.retry_attempts {
            self.note(&format!("*** sending CR/LF try {attempt}"));
            self.send(channel, line.id, NEWLINE, false).await?;
            report.retries = attempt;
            for _ in 0..poll.retry_polls {
                if let Some(chunk) = self.poll(channel, line.id, poll.retry_interval).await? {
                    report.output.push_str(&chunk);
                    if report.output.contains(LOGIN_MARKER) {
                        reason = CloseReason::Success;
                        break 'attempts;
                    }
                }
            }
        }

        // The outcome is settled here; a failing disconnect does not change it.
        if let Err(err) = self.teardown(channel, line.id, report).await {
            warn!("line {}: disconnect sequence failed: {err}", line.id);
            self.note(&format!("!!! line {} disconnect failed: {err}", line.id));
        }
        self.close(line.id, report, reason);
        Ok(())
    }

    /// Leaves the reverse-connect line and disconnects it.
    async fn teardown<C: ConsoleChannel>(
        &mut self,
        channel: &mut C,
        line: u32,
        report: &mut LineReport,
    ) -> Result<(), ConnectError> {
        let poll = self.config.poll.clone();
        report.teardown = true;

        self.send(channel, line, ESCAPE_SEQUENCE, false).await?;
        tokio::time::sleep(poll.banner_interval).await;
        self.send(channel, line, DISCONNECT_COMMAND, false).await?;
        self.transition(line, SessionState::ConfirmPending);

        for _ in 0..poll.confirm_polls {
            let Some(chunk) = self.poll(channel, line, poll.confirm_interval).await? else {
                continue;
            };
            report.closing.push_str(&chunk);
            if chunk.contains(CONFIRM_MARKER) {
                self.send(channel, line, NEWLINE, false).await?;
                if let Some(chunk) = self.poll(channel, line, poll.confirm_settle).await? {
                    report.closing.push_str(&chunk);
                }
                break;
            }
        }
        Ok(())
    }

    /// Sleeps one interval, then takes whatever arrived.
    async fn poll<C: ConsoleChannel>(
        &mut self,
        channel: &mut C,
        line: u32,
        interval: Duration,
    ) -> Result<Option<String>, ConnectError> {
        tokio::time::sleep(interval).await;
        let Some(data) = channel.try_read()? else {
            return Ok(None);
        };
        trace!("line {line}: received {} bytes", data.len());
        if let Err(err) = self.transcript.chunk(&data) {
            warn!("transcript write failed: {err}");
        }
        let text = decode(&data);
        if let Err(err) = self.recorder.record_raw_chunk(line, text.clone()) {
            debug!("recording failed: {err}");
        }
        Ok(Some(text))
    }

    async fn send<C: ConsoleChannel>(
        &mut self,
        channel: &mut C,
        line: u32,
        data: &[u8],
        hidden: bool,
    ) -> Result<(), ConnectError> {
        channel.send(data).await?;
        let input = if hidden {
            "<hidden>".to_string()
        } else {
            String::from_utf8_lossy(data).into_owned()
        };
        trace!("line {line}: sent {input:?}");
        self.record(SessionEvent::InputSent {
            line,
            input,
            hidden,
        });
        Ok(())
    }

    fn close(&mut self, line: u32, report: &mut LineReport, reason: CloseReason) {
        report.outcome = LineOutcome::Closed(reason);
        self.transition(line, SessionState::Closed(reason));
    }

    fn transition(&mut self, line: u32, state: SessionState) {
        debug!("line {line}: {} -> {state}", self.state);
        self.state = state;
        self.record(SessionEvent::StateChanged {
            line,
            state: state.to_string(),
        });
    }

    fn record(&self, event: SessionEvent) {
        if let Err(err) = self.recorder.record_event(event) {
            debug!("recording failed: {err}");
        }
    }

    fn note(&mut self, text: &str) {
        if let Err(err) = self.transcript.note(text) {
            warn!("transcript write failed: {err}");
        }
    }

    fn announce(&mut self, text: &str) {
        if let Err(err) = self.transcript.announce(text) {
            warn!("transcript write failed: {err}");
        }
    }
}

/// Enumerates the lines of an open session and takes each one over.
///
/// A failing `show line` ends the run like a failed connection.
pub async fn run_lines<S: DeviceSession, L: Write, E: Write>(
    session: &mut S,
    credential: &ResolvedCredential,
    config: &RunConfig,
    transcript: &mut Transcript<L, E>,
    recorder: &SessionRecorder,
) -> Result<(Vec<LineReport>, RunSummary), RunError> {
    let (output, lines) = enumerate_lines(session, config)
        .await
        .map_err(|source| RunError::Connect {
            device: credential.device.clone(),
            source,
        })?;
    write_or_warn(transcript.note(output.trim_end()));
    if let Err(err) = recorder.record_event(SessionEvent::LinesEnumerated {
        device: credential.device.clone(),
        count: lines.len(),
    }) {
        debug!("recording failed: {err}");
    }

    let reports = ConsoleEngine::new(config, credential, transcript)
        .with_recorder(recorder.clone())
        .run_all(session, &lines)
        .await;

    let summary = RunSummary::from_reports(&credential.device, &reports);
    write_or_warn(transcript.note(&format!("*** {summary}")));
    write_or_warn(transcript.flush());
    Ok((reports, summary))
}

/// Resolves the console credential of `device` from the configured store.
pub fn resolve_device(device: &str, config: &RunConfig) -> Result<ResolvedCredential, RunError> {
    let credential = CredentialStore::from_config(config)
        .map_err(CredentialError::from)
        .and_then(|store| store.resolve(device))
        .map_err(|source| RunError::Credentials {
            device: device.to_string(),
            source,
        })?;
    debug!("{device}: credentials resolved for {:?}", credential);
    Ok(credential)
}

/// Full run for one console server: connect, enumerate, take over.
pub async fn run_device<L: Write, E: Write>(
    credential: &ResolvedCredential,
    config: &RunConfig,
    transcript: &mut Transcript<L, E>,
    recorder: &SessionRecorder,
) -> Result<RunSummary, RunError> {
    let device = &credential.device;
    let mut session = ConsoleSession::connect(credential, &config.security)
        .await
        .map_err(|source| RunError::Connect {
            device: device.to_string(),
            source,
        })?;

    let result = run_lines(&mut session, credential, config, transcript, recorder).await;
    if let Err(err) = session.close().await {
        debug!("{device}: closing session failed: {err}");
    }
    result.map(|(_, summary)| summary)
}

fn write_or_warn(result: std::io::Result<()>) {
    if let Err(err) = result {
        warn!("transcript write failed: {err}");
    }
}

mod transcript;

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: LineOutcome) -> LineReport {
        LineReport {
            line: 2001,
            interface: "As1/0/0".into(),
            banner: String::new(),
            output: String::new(),
            closing: String::new(),
            retries: 0,
            outcome,
            teardown: false,
        }
    }

    #[test]
    fn summary_counts_each_outcome() {
        let reports = vec![
            report(LineOutcome::Closed(CloseReason::Success)),
            report(LineOutcome::Closed(CloseReason::Success)),
            report(LineOutcome::Closed(CloseReason::Inactive)),
            report(LineOutcome::Closed(CloseReason::NoBanner)),
            report(LineOutcome::Closed(CloseReason::Timeout)),
            report(LineOutcome::Failed("channel disconnect".into())),
        ];
        let summary = RunSummary::from_reports("oob1", &reports);
        assert_eq!(summary.lines, 6);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.inactive, 1);
        assert_eq!(summary.no_banner, 1);
        assert_eq!(summary.timeout, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.to_string(),
            "oob1: 6 lines, 2 login prompt, 1 inactive, 1 no banner, 1 timeout, 1 failed"
        );
    }

    #[test]
    fn non_utf8_chunks_become_a_placeholder() {
        assert_eq!(decode(b"Username:"), "Username:");
        assert_eq!(decode(b"\xff\xfe"), NON_UNICODE);
    }

    #[test]
    fn state_display_names_close_reason() {
        assert_eq!(SessionState::AwaitingBanner.to_string(), "AwaitingBanner");
        assert_eq!(
            SessionState::Closed(CloseReason::Timeout).to_string(),
            "Closed(Timeout)"
        );
    }

    #[test]
    fn report_serializes_outcome_with_status_tag() {
        let json = serde_json::to_value(report(LineOutcome::Closed(CloseReason::Inactive)))
            .expect("serialize");
        assert_eq!(json["outcome"]["status"], "closed");
        assert_eq!(json["outcome"]["detail"], "Inactive");
        assert_eq!(report(LineOutcome::Failed("x".into())).reason(), None);
    }
}
