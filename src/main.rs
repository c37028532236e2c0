//! cfops - tile backup and restore orchestrator

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = cfops::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
