//! Reads a password twice from standard input and prints its token.
//!
//! Exit status: 0 ok, 1 syntax error, 2 the two entries differ, 3 empty password.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use clap::Parser;

use oobline::cipher;

#[derive(Parser, Debug)]
#[command(name = "pwencrypt", version, about = "Encrypt a password for the credential store")]
struct Args {}

fn read_entry(input: &mut impl BufRead, prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn unreadable(err: io::Error) -> ExitCode {
    eprintln!("!!! unable to read password: {err}");
    ExitCode::from(1)
}

fn main() -> ExitCode {
    if let Err(err) = Args::try_parse() {
        let _ = err.print();
        return if err.use_stderr() {
            ExitCode::from(1)
        } else {
            ExitCode::SUCCESS
        };
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let first = match read_entry(&mut input, "Password: ") {
        Ok(first) => first,
        Err(err) => return unreadable(err),
    };
    if first.is_empty() {
        eprintln!("!!! empty password");
        return ExitCode::from(3);
    }

    let second = match read_entry(&mut input, "Repeat password: ") {
        Ok(second) => second,
        Err(err) => return unreadable(err),
    };
    if first != second {
        eprintln!("!!! passwords do not match");
        return ExitCode::from(2);
    }

    println!("{}", cipher::encrypt(&first));
    ExitCode::SUCCESS
}
