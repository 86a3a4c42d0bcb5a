//! Console line discovery from `show line` output.

use std::collections::BTreeMap;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::RunConfig;
use crate::error::ConnectError;
use crate::session::DeviceSession;

/// Inventory command issued on the primary session.
pub const SHOW_LINE: &str = "show line";

/// Prefix of async console interfaces.
const INTERFACE_PREFIX: &str = "As";

/// Columns counted back from the end of a row to reach the rotary column.
const ROTARY_FROM_END: usize = 7;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\s+") {
    Ok(re) => re,
    Err(err) => panic!("invalid WHITESPACE regex: {err}"),
});

/// One addressable console line of a console server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    pub id: u32,
    pub interface: String,
}

/// Prefixes `As` unless already present.
pub fn normalize_interface(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with(INTERFACE_PREFIX) {
        raw.to_string()
    } else {
        format!("{INTERFACE_PREFIX}{raw}")
    }
}

/// Parses `show line` output into lines keyed by id.
///
/// Only rows mentioning `TTY` are considered. The rotary column is found
/// counting from the end, which keeps working when a wide speed column runs
/// into its neighbor. A later row with the same id replaces an earlier one.
pub fn parse_show_line(output: &str, offset: u32) -> BTreeMap<u32, ConsoleLine> {
    let mut lines = BTreeMap::new();

    for row in output.lines().filter(|row| row.contains("TTY")) {
        let row = row.trim_start().replace('*', "");
        let row = WHITESPACE.replace_all(row.trim(), " ");
        let columns: Vec<&str> = row.split(' ').collect();

        if columns.len() < ROTARY_FROM_END + 1 {
            debug!("skipping short show line row: {row}");
            continue;
        }

        let tty = columns[0];
        let rotary = match columns[columns.len() - ROTARY_FROM_END] {
            "-" => columns[1],
            other => other,
        };
        let index: u32 = match rotary.parse() {
            Ok(index) => index,
            Err(_) => {
                debug!("skipping show line row with index '{rotary}': {row}");
                continue;
            }
        };

        let interface = normalize_interface(tty);
        if !interface.contains('/') {
            continue;
        }

        let Some(id) = offset.checked_add(index) else {
            debug!("skipping show line row with index {index} beyond offset {offset}: {row}");
            continue;
        };
        if let Some(previous) = lines.insert(id, ConsoleLine { id, interface }) {
            debug!("line {id} listed again, replacing {}", previous.interface);
        }
    }

    lines
}

/// Runs `show line` on the session and parses the reply.
pub async fn enumerate_lines<S: DeviceSession>(
    session: &mut S,
    config: &RunConfig,
) -> Result<(String, BTreeMap<u32, ConsoleLine>), ConnectError> {
    let output = session.exec(SHOW_LINE).await?;
    let lines = parse_show_line(&output, config.line_offset);
    debug!("{} console lines found", lines.len());
    Ok((output, lines))
}
