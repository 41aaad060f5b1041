use clap::Parser;

/// Shoal: connect to a pool of audio nodes and report their health.
#[derive(Parser, Debug)]
#[command(name = "shoal", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long)]
    pub config: Option<String>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Client user id, overriding `[client] id` from the config.
    #[arg(long)]
    pub client_id: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Seconds between node load reports.
    #[arg(long, default_value_t = 30)]
    pub report_interval: u64,
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["shoal"]);
        assert!(args.config.is_none());
        assert!(!args.json_logs);
        assert_eq!(args.report_interval, 30);
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from([
            "shoal",
            "--config",
            "/tmp/shoal.toml",
            "--log-level",
            "debug",
            "--client-id",
            "42",
            "--json-logs",
        ]);
        assert_eq!(args.config.as_deref(), Some("/tmp/shoal.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.client_id.as_deref(), Some("42"));
        assert!(args.json_logs);
    }
}
