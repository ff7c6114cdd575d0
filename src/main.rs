use clap::Parser;
use sesam::dispatch::{self, Cli};
use sesam::SesamError;
use std::io;
use std::process::ExitCode;

// The main entry point for the command-line controller.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Stdout carries device output only; everything else goes to stderr.
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match dispatch::run(&cli, &mut out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "sesam=debug" } else { "sesam=info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

// Prints an error and, for setup failures, what the operator can do about it.
fn report(error: &SesamError) {
    match error {
        SesamError::Usage(msg) => eprintln!("[ERROR] {}", msg),
        SesamError::HandshakeTimeout { .. } => {
            eprintln!("[ERROR] {}", error);
            eprintln!("[ERROR] Is the SESAM monitor running? Try a larger --timeout-ms.");
        }
        _ => eprintln!("[ERROR] {}", error),
    }
    if let Some(hint) = error.remediation() {
        eprintln!("{}", hint);
    }
    tracing::debug!(?error, "controller exited with an error");
}
