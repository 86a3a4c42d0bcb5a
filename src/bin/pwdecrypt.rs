//! Decodes a single token, or shows the resolved credential of a device.
//!
//! ```bash
//! pwdecrypt gAAAAAB...
//! DO_DEVICE=/etc/oob pwdecrypt --device r1
//! DO_DEVICE=/etc/oob pwdecrypt --device sw1 --service
//! ```

use std::process::ExitCode;

use clap::Parser;

use oobline::cipher;
use oobline::config::RunConfig;
use oobline::credentials::CredentialStore;
use oobline::error::{CredentialError, RunError};

#[derive(Parser, Debug)]
#[command(name = "pwdecrypt", version, about = "Decrypt a token or resolve a device credential")]
struct Args {
    /// Token to decrypt
    #[arg(required_unless_present = "device", conflicts_with = "device")]
    token: Option<String>,

    /// Resolve this device from the credential store instead
    #[arg(long)]
    device: Option<String>,

    /// Use the service (SNMP) tables
    #[arg(long, requires = "device")]
    service: bool,
}

fn resolve(device: &str, service: bool) -> Result<String, RunError> {
    let config = RunConfig::from_env().map_err(|err| RunError::InputMissing(err.to_string()))?;
    let credentials = |source: CredentialError| RunError::Credentials {
        device: device.to_string(),
        source,
    };
    let store = CredentialStore::from_config(&config).map_err(|err| credentials(err.into()))?;

    if service {
        let credential = store.resolve_service(device).map_err(credentials)?;
        Ok(format!(
            "{};{};{}",
            credential.address, credential.community, credential.port
        ))
    } else {
        let credential = store.resolve(device).map_err(credentials)?;
        Ok(format!(
            "{};{};{};{};{};{}",
            credential.address,
            credential.device_type,
            credential.username,
            credential.password,
            credential.secret,
            credential.port
        ))
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match (&args.device, &args.token) {
        (Some(device), _) => resolve(device, args.service),
        (None, Some(token)) => cipher::decrypt(token).map_err(|err| RunError::Syntax(err.to_string())),
        (None, None) => Err(RunError::Syntax("token or --device required".to_string())),
    };

    match result {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("!!! {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
