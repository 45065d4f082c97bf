use std::process::ExitCode;

use backup_runner::cli::Cli;
use backup_runner::logging::{self, TracingSink};
use clap::Parser;

fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let _guard = match logging::init_subscriber(
        cli.log_level.map(|l| l.directive()),
        cli.log_file.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    match backup_runner::run(&cli, &TracingSink) {
        Ok(summary) if summary.all_succeeded() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}
