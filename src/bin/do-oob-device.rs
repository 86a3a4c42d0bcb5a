//! Takes over every console line of one console server.
//!
//! ```bash
//! DO_DEVICE=/etc/oob do-oob-device oob1 -d 1
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::warn;

use oobline::config::RunConfig;
use oobline::console::{Transcript, create_log, ensure_log_free, resolve_device, run_device};
use oobline::error::RunError;
use oobline::session::{ConnectionSecurityOptions, SecurityLevel, SessionRecordLevel, SessionRecorder};

#[derive(Parser, Debug)]
#[command(name = "do-oob-device", version, about = "Reverse-connect every console line of a console server")]
struct Args {
    /// Device id of the console server in the credential store
    device: String,

    /// Log file, created fresh; defaults to <device>-oob.log
    logfile: Option<PathBuf>,

    /// Debug level: 0 quiet, 1 debug, 2 and above trace
    #[arg(short = 'd', long = "debug", default_value_t = 0)]
    debug: u8,

    /// SSH algorithm policy: secure, balanced or legacy
    #[arg(long, default_value = "legacy")]
    security: SecurityLevel,

    /// Write a JSONL event recording of the run to this file
    #[arg(long)]
    record: Option<PathBuf>,
}

fn banner() {
    eprintln!("do-oob-device {}", env!("CARGO_PKG_VERSION"));
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = RunConfig::from_env().map_err(|err| RunError::InputMissing(err.to_string()))?;
    config.debug = args.debug;
    config.security = ConnectionSecurityOptions::for_level(args.security);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level().as_str()),
    )
    .init();

    let log_path = args
        .logfile
        .unwrap_or_else(|| PathBuf::from(format!("{}-oob.log", args.device)));
    // The log is only created once the device is known to resolve.
    ensure_log_free(&log_path)?;
    let credential = resolve_device(&args.device, &config)?;
    let log = create_log(&log_path)?;
    let mut transcript = Transcript::new(log, std::io::stdout());

    let recorder = SessionRecorder::new(if args.record.is_some() {
        SessionRecordLevel::Full
    } else {
        SessionRecordLevel::Off
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("unable to start runtime")?;
    let result = runtime.block_on(run_device(&credential, &config, &mut transcript, &recorder));

    if let Some(path) = args.record {
        match recorder.to_jsonl() {
            Ok(jsonl) => {
                if let Err(err) = std::fs::write(&path, jsonl) {
                    warn!("unable to write recording {}: {err}", path.display());
                }
            }
            Err(err) => warn!("unable to encode recording: {err}"),
        }
    }

    let summary = result?;
    eprintln!("{summary}");
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            banner();
            let _ = err.print();
            return ExitCode::from(RunError::Syntax(String::new()).exit_code() as u8);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::from(RunError::SUCCESS as u8),
        Err(err) => {
            banner();
            eprintln!("!!! {err}");
            let code = err
                .downcast_ref::<RunError>()
                .map(RunError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
