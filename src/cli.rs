use clap::Parser;

/// Command line interface for the application
#[derive(Parser, Debug)]
#[command(name = "taskpilot", about = "Task execution coordinator for autonomous agents")]
pub struct Cli {
    /// Path to the YAML configuration file (server, storage, coordinator, agents, tools)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Sets the logging verbosity level for the application
    /// Possible values: "error", "warn", "info", "debug", "trace"
    /// Default: "info"
    #[arg(long, default_value_t = String::from("info"))]
    pub logging_level: String,

    /// Overrides the HTTP port from the configuration
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Overrides the SQLite database path (also read from DATABASE_PATH)
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Also write logs to a daily rolling file under logs/
    #[arg(long, default_value_t = false)]
    pub log_to_file: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_parse() {
        let cli = Cli::try_parse_from([
            "taskpilot",
            "--config",
            "taskpilot.yaml",
            "--api-port",
            "8080",
            "--log-to-file",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("taskpilot.yaml"));
        assert_eq!(cli.api_port, Some(8080));
        assert_eq!(cli.logging_level, "info");
        assert!(cli.log_to_file);
    }
}
