use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Utc;
use owo_colors::OwoColorize;

/// Global minimum level below which log lines are suppressed. Set once from
/// `--loglevel` at startup; read on every call to `log`.
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            other => Err(format!("unknown loglevel: {other}")),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

pub fn set_min_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

fn min_level() -> Level {
    match MIN_LEVEL.load(Ordering::Relaxed) {
        0 => Level::Trace,
        1 => Level::Debug,
        2 => Level::Info,
        3 => Level::Warn,
        _ => Level::Error,
    }
}

/// Formats a single log line the way the controller's worker threads do:
/// `<timestamp> <LEVEL> <worker> <message>`. Kept separate from the
/// colorized `log` entrypoint so tests can assert on the message body
/// without depending on wall-clock output.
pub fn format_line(level: Level, worker: &str, message: &str) -> String {
    format!(
        "{} {} {} {}",
        Utc::now().to_rfc3339(),
        level,
        worker,
        message
    )
}

/// Emits a worker-tagged, leveled log line to stdout (Trace/Debug/Info) or
/// stderr (Warn/Error), honoring the level configured via `set_min_level`.
pub fn log(level: Level, worker: &str, message: impl AsRef<str>) {
    if level < min_level() {
        return;
    }
    let line = format_line(level, worker, message.as_ref());
    match level {
        Level::Error => eprintln!("{}", line.red()),
        Level::Warn => eprintln!("{}", line.yellow()),
        Level::Debug | Level::Trace => println!("{}", line.dimmed()),
        Level::Info => println!("{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels_case_insensitively() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("Warning".parse::<Level>().unwrap(), Level::Warn);
    }

    #[test]
    fn rejects_unknown_level() {
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn format_line_preserves_message_verbatim() {
        let line = format_line(Level::Info, "PeriodicCheck", "created svc/t1 in ns/n1");
        assert!(line.ends_with("created svc/t1 in ns/n1"));
        assert!(line.contains("PeriodicCheck"));
        assert!(line.contains("INFO"));
    }
}
