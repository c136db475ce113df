use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "lancompute-worker", about = "Worker node for a LAN compute cluster")]
pub struct Cli {
    /// Coordinator URL, e.g. http://192.168.1.100:8080
    #[arg(long)]
    pub master_url: String,

    /// Unique node id (auto-generated from hostname + random suffix if omitted)
    #[arg(long)]
    pub node_id: Option<String>,

    /// Address this node is reachable at (best-effort local IP detection if omitted)
    #[arg(long)]
    pub address: Option<String>,

    /// Port this node listens on, if it runs one (0 = none)
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Maximum concurrent tasks this node will accept
    #[arg(long, default_value_t = 2)]
    pub max_tasks: usize,

    /// Heartbeat interval in seconds
    #[arg(long, default_value_t = 10.0)]
    pub heartbeat_interval: f64,

    /// Size of the execution pool (defaults to the logical CPU count)
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Logging verbosity, falls back to RUST_LOG if unset
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}
