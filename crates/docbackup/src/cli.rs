//! Command line interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use docbackup_core::FeedConfig;
use std::path::PathBuf;

/// Environment variable holding the connection string
pub const CONNECTION_STRING_ENV: &str = "DOCBACKUP_CONNECTION_STRING";

#[derive(Parser)]
#[command(name = "docbackup")]
#[command(version, about = "Back up, restore and tail the change feed of a document store")]
pub struct Cli {
    /// Logging level (RUST_LOG overrides it)
    #[arg(short, long, value_enum, ignore_case = true, default_value_t = Verbosity::Info)]
    pub verbosity: Verbosity,

    /// Folder used for the backup files (default: current directory)
    #[arg(short, long)]
    pub folder: Option<PathBuf>,

    /// Account connection string (AccountEndpoint=...;AccountKey=...;)
    #[arg(short = 'c', long, env = CONNECTION_STRING_ENV, hide_env_values = true)]
    pub connection_string: String,

    /// Database to back up, restore or tail
    #[arg(short = 'd', long = "database")]
    pub database: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Export every collection of the database to `<collection>.jsonbak` files
    Backup,
    /// Import `.jsonbak` files into the database
    Restore(RestoreArgs),
    /// Stream the change feed of every collection until interrupted
    Feed(FeedArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreArgs {
    /// Partition key property of restored collections
    #[arg(short = 'p', long)]
    pub partition_key: Option<String>,

    /// Partition key value for documents that lack the property
    #[arg(short = 'k', long)]
    pub default_key: Option<String>,

    /// Throughput (RUs) of the database when it is created
    #[arg(short = 't', long)]
    pub database_throughput: Option<u32>,

    /// Per-collection throughput, e.g. "orders:400;users:800"
    #[arg(short = 'r', long)]
    pub reserved_throughput: Option<String>,

    /// Throughput (RUs) of collections without a reserved entry
    #[arg(short = 'x', long)]
    pub collection_throughput: Option<u32>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FeedArgs {
    /// Read ranges from the start of the feed instead of from now
    #[arg(short, long)]
    pub beginning: bool,

    /// Milliseconds to wait between feed checks
    #[arg(short, long, default_value_t = 1000)]
    pub wait: u64,

    /// Rediscover partition ranges every N waits (0 = never)
    #[arg(short = 'r', long, default_value_t = 0)]
    pub range_scan: u32,
}

impl FeedArgs {
    pub fn config(&self) -> FeedConfig {
        FeedConfig::default()
            .with_wait_ms(self.wait)
            .with_range_rescan_cycles(self.range_scan)
            .with_start_from_beginning(self.beginning)
    }
}

/// Logging level
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    #[value(alias = "verbose")]
    Trace,
    Debug,
    #[value(alias = "information")]
    Info,
    #[value(alias = "warning")]
    Warn,
    #[value(alias = "fatal")]
    Error,
}

impl Verbosity {
    /// Filter directive for `tracing_subscriber::EnvFilter`
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl Cli {
    /// Folder for backup files
    pub fn folder(&self) -> PathBuf {
        self.folder.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const CONN: &str = "AccountEndpoint=https://a/;AccountKey=a2V5;";

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_feed_defaults() {
        let cli = Cli::try_parse_from(["docbackup", "-c", CONN, "-d", "orders", "feed"]).unwrap();
        assert_eq!(cli.database, "orders");
        assert_eq!(cli.verbosity, Verbosity::Info);
        assert_eq!(cli.folder(), PathBuf::from("."));

        let Command::Feed(args) = cli.command else {
            panic!("expected feed command");
        };
        let config = args.config();
        assert_eq!(config.wait_ms, 1000);
        assert_eq!(config.range_rescan_cycles, 0);
        assert!(!config.start_from_beginning);
    }

    #[test]
    fn test_parse_feed_options() {
        let cli = Cli::try_parse_from([
            "docbackup", "-v", "Verbose", "-f", "/tmp/out", "-c", CONN, "-d", "db", "feed", "-b",
            "-w", "250", "-r", "4",
        ])
        .unwrap();
        assert_eq!(cli.verbosity, Verbosity::Trace);
        assert_eq!(cli.folder(), PathBuf::from("/tmp/out"));
        assert_eq!(
            cli.command,
            Command::Feed(FeedArgs {
                beginning: true,
                wait: 250,
                range_scan: 4,
            })
        );
    }

    #[test]
    fn test_parse_restore_options() {
        let cli = Cli::try_parse_from([
            "docbackup",
            "-c",
            CONN,
            "-d",
            "db",
            "restore",
            "--partition-key",
            "tenant",
            "--default-key",
            "none",
            "--database-throughput",
            "1000",
            "--reserved-throughput",
            "orders:400",
            "-x",
            "500",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Restore(RestoreArgs {
                partition_key: Some("tenant".to_string()),
                default_key: Some("none".to_string()),
                database_throughput: Some(1000),
                reserved_throughput: Some("orders:400".to_string()),
                collection_throughput: Some(500),
            })
        );
    }

    #[test]
    fn test_missing_database_is_rejected() {
        assert!(Cli::try_parse_from(["docbackup", "-c", CONN, "backup"]).is_err());
    }

    #[test]
    fn test_verbosity_aliases() {
        for (raw, expected) in [
            ("information", Verbosity::Info),
            ("WARNING", Verbosity::Warn),
            ("fatal", Verbosity::Error),
            ("debug", Verbosity::Debug),
        ] {
            let cli =
                Cli::try_parse_from(["docbackup", "-v", raw, "-c", CONN, "-d", "db", "backup"])
                    .unwrap();
            assert_eq!(cli.verbosity, expected);
        }
    }
}
