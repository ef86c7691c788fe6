//! `gt-review`: apply reviewed ground-truth edits and regenerate metrics.
//!
//! Usage:
//!   gt-review [--config gt-review.toml] apply --request edits.json
//!   gt-review regenerate
//!   gt-review get img001 artwork.title
//!   gt-review paths img001
//!
//! Exit status: 0 ok, 1 batch or lookup error, 2 regeneration error,
//! 3 config or usage error.

use std::io;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use gt_review::review_cli::{init_logging, render_error, run, Cli};

const USAGE_ERROR: u8 = 3;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(USAGE_ERROR),
            };
        }
    };
    init_logging(cli.log_json);

    let stdin = io::stdin();
    let stdout = io::stdout();
    match run(&cli, &mut stdin.lock(), &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}
