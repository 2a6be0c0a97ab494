use anyhow::Result;
use clap::{ArgAction, Parser};
use nix::sys::signal::Signal;
use screen_freeze::{Config, Error};
use std::{ffi::OsString, num::NonZeroU32, str::FromStr};

const AFTER_HELP: &str = "\
Child command:
  -c CMD [ARGS...]  Run CMD while the screen is frozen and exit when it does.
                    Every argument after -c is passed to CMD verbatim.";

/// Freeze the screen, optionally while a command (such as a screen locker) runs
#[derive(Parser, Debug)]
#[command(name = "wayfreeze", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Only freeze this output (eg eDP-1)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Kill the child (with -c) and exit after TIMEOUT seconds
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,

    /// Include the cursor in the overlay
    #[arg(short = 'C', long)]
    pub cursor: bool,

    /// Signal sent to the child's process group on exit
    #[arg(short, long, default_value = "SIGTERM", value_parser = parse_signal)]
    pub kill_signal: Signal,

    /// Increase verbosity, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// `command` is what followed `-c`, if it was given at all
    pub fn into_config(self, command: Option<Vec<OsString>>) -> Result<Config> {
        let mut config = Config::default()
            .with_kill_signal(self.kill_signal)
            .with_include_cursor(self.cursor);

        config.output = self.output;
        config.timeout = self.timeout.and_then(NonZeroU32::new);

        if let Some(command) = command {
            if command.is_empty() {
                return Err(Error::EmptyCommand.into());
            }
            config.command = command;
        }

        Ok(config)
    }
}

/// Split `args` at the first `-c`: our own arguments, then the child command
pub fn split_command(mut args: Vec<OsString>) -> (Vec<OsString>, Option<Vec<OsString>>) {
    match args.iter().skip(1).position(|arg| arg == "-c") {
        Some(index) => {
            let command = args.split_off(index + 1);
            (args, Some(command[1..].to_vec()))
        }
        None => (args, None),
    }
}

/// Signal by name (`SIGKILL`, `kill`) or number (`9`)
pub fn parse_signal(value: &str) -> std::result::Result<Signal, String> {
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number).map_err(|e| format!("{number}: {e}"));
    }

    let name = value.to_ascii_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{name}")
    };

    Signal::from_str(&name).map_err(|_| format!("unknown signal `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_split_command() {
        let (own, command) = split_command(args(&["wayfreeze", "-t", "5", "-c", "swaylock", "-c", "x"]));
        assert_eq!(own, args(&["wayfreeze", "-t", "5"]));
        assert_eq!(command, Some(args(&["swaylock", "-c", "x"])));
    }

    #[test]
    fn test_split_without_command() {
        let (own, command) = split_command(args(&["wayfreeze", "-o", "DP-1"]));
        assert_eq!(own, args(&["wayfreeze", "-o", "DP-1"]));
        assert_eq!(command, None);
    }

    #[test]
    fn test_split_empty_command() {
        let (own, command) = split_command(args(&["wayfreeze", "-c"]));
        assert_eq!(own, args(&["wayfreeze"]));
        assert_eq!(command, Some(vec![]));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let cli = Cli::try_parse_from(["wayfreeze"]).unwrap();
        let err = cli.into_config(Some(vec![])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::EmptyCommand)
        ));
    }

    #[test]
    fn test_into_config() {
        let cli = Cli::try_parse_from(["wayfreeze", "-o", "eDP-1", "-t", "10", "-C", "-k", "KILL"])
            .unwrap();
        let config = cli.into_config(Some(args(&["swaylock", "-f"]))).unwrap();

        assert_eq!(config.output.as_deref(), Some("eDP-1"));
        assert_eq!(config.timeout.map(NonZeroU32::get), Some(10));
        assert!(config.include_cursor);
        assert_eq!(config.kill_signal, Signal::SIGKILL);
        assert_eq!(config.command, args(&["swaylock", "-f"]));
    }

    #[test]
    fn test_defaults() {
        let config = Cli::try_parse_from(["wayfreeze"])
            .unwrap()
            .into_config(None)
            .unwrap();

        assert_eq!(config.output, None);
        assert_eq!(config.timeout, None);
        assert_eq!(config.kill_signal, Signal::SIGTERM);
        assert!(!config.has_child());
    }

    #[test]
    fn test_timeout_must_be_positive() {
        assert!(Cli::try_parse_from(["wayfreeze", "-t", "0"]).is_err());
        assert!(Cli::try_parse_from(["wayfreeze", "-t", "-3"]).is_err());
        assert!(Cli::try_parse_from(["wayfreeze", "-t", "soon"]).is_err());
    }

    #[test]
    fn test_verbosity() {
        let level = |argv: &[&str]| Cli::try_parse_from(argv).unwrap().log_level();

        assert_eq!(level(&["wayfreeze"]), log::LevelFilter::Warn);
        assert_eq!(level(&["wayfreeze", "-v"]), log::LevelFilter::Info);
        assert_eq!(level(&["wayfreeze", "-vv"]), log::LevelFilter::Debug);
        assert_eq!(level(&["wayfreeze", "-vvvv"]), log::LevelFilter::Trace);
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGKILL"), Ok(Signal::SIGKILL));
        assert_eq!(parse_signal("hup"), Ok(Signal::SIGHUP));
        assert_eq!(parse_signal("15"), Ok(Signal::SIGTERM));
        assert!(parse_signal("SIGNOPE").is_err());
        assert!(parse_signal("0").is_err());
    }
}
