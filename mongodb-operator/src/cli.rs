use clap::Parser;
use mongodb_operator_common::logging::Level;

/// MongoDB replica-set cluster controller.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Interval between full reconciliation sweeps, in seconds.
    #[arg(long, env = "PERIODIC_CHECK_INTERVAL", default_value_t = 25)]
    pub periodic_check_interval: u64,

    /// Server-side timeout for the custom-resource watch stream, in seconds.
    #[arg(long, env = "EVENT_LISTENER_TIMEOUT", default_value_t = 25)]
    pub event_listener_timeout: u32,

    /// Minimum level of log line to emit.
    #[arg(long, env = "LOGLEVEL", default_value = "INFO")]
    pub loglevel: String,
}

impl Cli {
    pub fn parsed_loglevel(&self) -> Result<Level, String> {
        self.loglevel.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let cli = Cli::parse_from(["mongodb-operator"]);
        assert_eq!(cli.periodic_check_interval, 25);
        assert_eq!(cli.event_listener_timeout, 25);
        assert_eq!(cli.loglevel, "INFO");
        assert_eq!(cli.parsed_loglevel().unwrap(), Level::Info);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "mongodb-operator",
            "--periodic-check-interval",
            "5",
            "--loglevel",
            "debug",
        ]);
        assert_eq!(cli.periodic_check_interval, 5);
        assert_eq!(cli.parsed_loglevel().unwrap(), Level::Debug);
    }
}
