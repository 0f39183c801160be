//! cpm - plugin-extensible project manager.
//!
//! The command line is not known until plugins and `cpm.yml` have been
//! loaded, so parsing happens inside [`App::run`] rather than through a
//! derived parser.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cpm::command::unknown_command_message;
use cpm::core::paths::LOG_ENV;
use cpm::{App, AppOptions, Outcome};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    init_logging(args.iter().skip(1).any(|arg| arg == "-v" || arg == "--verbose"));

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<String>) -> anyhow::Result<ExitCode> {
    let app = App::bootstrap(AppOptions::default()).await?;

    let code = match app.run(args).await? {
        Outcome::Completed { .. } => ExitCode::SUCCESS,
        Outcome::Exited(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Outcome::UnknownCommand(args) => {
            eprintln!("{}", unknown_command_message(&args));
            ExitCode::FAILURE
        }
    };
    Ok(code)
}

fn init_logging(verbose: bool) {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ if verbose => EnvFilter::new("debug"),
        _ => EnvFilter::new("warn"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
