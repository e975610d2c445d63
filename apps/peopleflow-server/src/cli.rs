//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "peopleflow-server",
    about = "PeopleFlow multi-tenant lifecycle server",
    version,
    long_about = "Hosts the tenant isolation and lifecycle engine: context \
                  resolution, provisioning, usage metering, the billing \
                  webhook boundary, and the background reconciliation loop."
)]
pub struct Args {
    /// HTTP server port; overrides PEOPLEFLOW__SERVER__PORT
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}
