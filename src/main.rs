use std::process::ExitCode;
use std::sync::Arc;

use defertest::build_info;
use defertest::config::{parse_args, usage, Command, Settings};
use defertest::startup;
use defertest::utils::logger::init_logging;
use tracing::info;

const PROGRAM: &str = env!("CARGO_PKG_NAME");

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let overrides = match parse_args(std::env::args_os().skip(1)) {
        Ok(Command::Run(overrides)) => overrides,
        Ok(Command::Version) => {
            println!("{}", build_info::version_line());
            return Ok(ExitCode::SUCCESS);
        }
        Ok(Command::Help) => {
            println!("{}", usage(PROGRAM));
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", usage(PROGRAM));
            return Ok(ExitCode::from(2));
        }
    };

    let config = Settings::load(&overrides)?;
    init_logging(&config.logging)?;

    info!(
        prom_listen = %config.prom_listen,
        prom_path = %config.prom_path,
        debug_level = config.debug_level,
        max_requests_in_flight = config.max_requests_in_flight,
        enable_open_metrics = config.enable_open_metrics,
        worker_pairs = config.worker_pairs,
        sleep_secs = config.sleep_seconds,
        commit = build_info::COMMIT,
        build_date = build_info::BUILD_DATE,
        "Starting {}",
        PROGRAM
    );

    startup::run(Arc::new(config)).await?;
    Ok(ExitCode::SUCCESS)
}
