mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use screen_freeze::ShutdownReason;
use std::{ffi::OsString, process::ExitCode};

fn main() -> ExitCode {
    let (args, command) = cli::split_command(std::env::args_os().collect());

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logger(cli.log_level());

    match run(cli, command) {
        Ok(reason) => ExitCode::from(reason.exit_code()),
        Err(e) => {
            log::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, command: Option<Vec<OsString>>) -> Result<ShutdownReason> {
    let config = cli.into_config(command)?;
    log::debug!("{config:?}");

    let reason = screen_freeze::run(&config).context("failed to freeze the screen")?;
    log::info!("exiting: {reason}");

    Ok(reason)
}

fn init_logger(level: log::LevelFilter) {
    use std::io::Write;

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            let ts = chrono::Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "[{} {style}{}{style:#} {} {}] {}",
                ts,
                record.level(),
                record
                    .file()
                    .unwrap_or("None")
                    .split('/')
                    .next_back()
                    .unwrap_or("None"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}
