//! takeout-dedupe - incremental deduplication of exported zip archive sets

use clap::Parser;
use takeout_dedupe::{
    cli::Cli,
    error::{FailureKind, StructuredError},
};

fn main() {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;

    let err = match takeout_dedupe::run_app(cli) {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => err,
    };

    // Cache, scan and archive failures all exit 1; only their reporting
    // differs. An interrupted run exits 130 however deep the cause sits.
    let kind = FailureKind::classify(&err);
    let exit_code = kind.exit_code();

    let json = json_errors
        .then(|| serde_json::to_string_pretty(&StructuredError::new(&err, kind)).ok())
        .flatten();
    match json {
        Some(json) => eprintln!("{json}"),
        None => {
            eprintln!("[{}] Error: {:#}", exit_code.code_prefix(), err);
            if let Some(hint) = kind.hint() {
                eprintln!("hint: {hint}");
            }
        }
    }

    std::process::exit(exit_code.as_i32());
}
