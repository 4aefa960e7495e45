//! Command-line parsing and `serve` argument validation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tails_core::broker::{BrokerConfig, CapacityPolicy, DeliveryPolicy};
use tails_core::config::{ConfigError, Settings};
use tails_core::source::{FollowConfig, RestartPolicy, SourceKind, TailConfig};

use crate::session::StreamConfig;

pub const HELP_TEXT: &str = "\
Tails help
before running the serve command make sure that the html folder is next to where tails runs (or pass --assets-dir)
by default any number of browsers can watch the same file; use --max-subscribers 1 --preempt for a single viewer
the serve command is: tails serve ./path/to/file/to/tail port, both parameters are mandatory
run `tails serve --help` to see every option";

pub const COMMANDS_TEXT: &str = "\
Tails commands
help: runs the help command.
commands: shows all commands.
about: tell more about tails.
serve ./path/to/file/to/tail port: serves a file in to the web";

pub const ABOUT_TEXT: &str = "\
Tails about
Tails is an application that serves a tailed log to the web in no time
the connection is based on SSE (Server-Sent-Events), tails does not use websockets to make the connection.";

pub const NO_ARGUMENTS: &str = "No arguments provided, use the 'help' command";
pub const UNKNOWN_COMMAND: &str = "Command not found try to use the help command";

#[derive(Debug, Parser)]
#[command(name = "tails", version, about = "Serve a tailed file to the web over Server-Sent Events")]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show how to run the server.
    Help,
    /// List all commands.
    Commands,
    /// Tell more about tails.
    About,
    /// Serve a file to the web.
    Serve(ServeArgs),
    #[command(external_subcommand)]
    Unknown(Vec<String>),
}

#[derive(Debug, Default, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct ServeArgs {
    /// File to tail
    pub path: Option<String>,

    /// Port to listen on
    pub port: Option<String>,

    /// Address to bind [default: 0.0.0.0]
    #[arg(long, env = "TAILS_BIND")]
    pub bind: Option<IpAddr>,

    /// Directory with index.html, styles.css and app.js [default: html]
    #[arg(long, env = "TAILS_ASSETS_DIR")]
    pub assets_dir: Option<PathBuf>,

    /// Line source: `tail` (external tail -F) or `follow` (native) [default: tail]
    #[arg(long, env = "TAILS_SOURCE")]
    pub source: Option<SourceKind>,

    /// Path to the tail binary
    #[arg(long, env = "TAILS_TAIL_BIN")]
    pub tail_bin: Option<PathBuf>,

    /// Lines of history sent on the first start [default: 10]
    #[arg(long, env = "TAILS_INITIAL_LINES")]
    pub initial_lines: Option<usize>,

    /// Run the source once instead of restarting it
    #[arg(long, env = "TAILS_NO_RESTART")]
    pub no_restart: bool,

    /// Consecutive restarts before giving up [default: unlimited]
    #[arg(long, env = "TAILS_MAX_RESTARTS")]
    pub max_restarts: Option<u32>,

    /// Maximum concurrent viewers [default: unlimited]
    #[arg(long, env = "TAILS_MAX_SUBSCRIBERS")]
    pub max_subscribers: Option<usize>,

    /// When full, disconnect the oldest viewer instead of refusing the new one
    #[arg(long, env = "TAILS_PREEMPT")]
    pub preempt: bool,

    /// Events buffered per viewer [default: 256]
    #[arg(long, env = "TAILS_SUBSCRIBER_BUFFER")]
    pub subscriber_buffer: Option<usize>,

    /// Disconnect viewers that cannot take an event within this time
    #[arg(long, env = "TAILS_SLOW_SUBSCRIBER_TIMEOUT_MS")]
    pub slow_subscriber_timeout_ms: Option<u64>,

    /// Seconds between keep-alive comments, 0 disables them [default: 15]
    #[arg(long, env = "TAILS_KEEP_ALIVE_SECS")]
    pub keep_alive_secs: Option<u64>,

    /// Omit the `event: message` line from frames
    #[arg(long, env = "TAILS_NO_EVENT_NAME")]
    pub no_event_name: bool,

    /// TOML settings file
    #[arg(long, env = "TAILS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level for tails itself; RUST_LOG overrides [default: info]
    #[arg(long, env = "TAILS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "TAILS_LOG_JSON")]
    pub log_json: bool,
}

/// Reasons the `serve` command refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ServeArgsError {
    #[error("Invalid arguments for the serve command. use the help command")]
    InvalidArguments,

    #[error("Please provide a path to the file")]
    MissingPath,

    #[error("\"{0}\" path not found")]
    PathNotFound(String),

    #[error("Please provide a port to serve the app")]
    MissingPort,

    #[error("Please provide a valid port")]
    InvalidPort,

    #[error("Preempting viewers needs a limit, set --max-subscribers as well")]
    PreemptWithoutLimit,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything `serve` needs, after merging flags, environment and settings.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub path: PathBuf,
    pub addr: SocketAddr,
    pub assets_dir: PathBuf,
    pub source: SourceKind,
    pub tail: TailConfig,
    pub follow: FollowConfig,
    pub restart: RestartPolicy,
    pub broker: BrokerConfig,
    pub stream: StreamConfig,
    pub log_level: String,
    pub log_json: bool,
}

impl ServeArgs {
    /// Check the positional arguments.
    pub fn validate(&self) -> Result<(PathBuf, u16), ServeArgsError> {
        let (Some(path), Some(port)) = (self.path.as_deref(), self.port.as_deref()) else {
            return Err(ServeArgsError::InvalidArguments);
        };
        if path.is_empty() {
            return Err(ServeArgsError::MissingPath);
        }
        if !Path::new(path).exists() {
            return Err(ServeArgsError::PathNotFound(path.to_string()));
        }
        if port.is_empty() {
            return Err(ServeArgsError::MissingPort);
        }
        if !port.chars().any(|c| c.is_ascii_digit()) {
            return Err(ServeArgsError::InvalidPort);
        }
        let port = port.parse().map_err(|_| ServeArgsError::InvalidPort)?;
        Ok((PathBuf::from(path), port))
    }

    /// Validate, load the settings file if one was given, and resolve.
    pub fn load_options(&self) -> Result<ServeOptions, ServeArgsError> {
        self.validate()?;
        let settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        self.resolve(&settings)
    }

    /// Merge flags over `settings` over built-in defaults.
    pub fn resolve(&self, settings: &Settings) -> Result<ServeOptions, ServeArgsError> {
        let (path, port) = self.validate()?;
        let server = &settings.server;
        let source = &settings.source;

        let bind = self
            .bind
            .or(server.bind)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let assets_dir = self
            .assets_dir
            .clone()
            .or_else(|| server.assets_dir.clone())
            .unwrap_or_else(|| PathBuf::from("html"));

        let mut tail = source.tail_config();
        if let Some(program) = &self.tail_bin {
            tail.program.clone_from(program);
        }
        if let Some(lines) = self.initial_lines {
            tail.initial_lines = lines;
        }

        let mut restart = source.restart_policy();
        if self.no_restart {
            restart.enabled = false;
        }
        if self.max_restarts.is_some() {
            restart.max_restarts = self.max_restarts;
        }

        let mut broker = settings.broker.broker_config();
        if let Some(buffer) = self.subscriber_buffer {
            broker = broker.with_subscriber_buffer(buffer);
        }
        let capacity_policy = if self.preempt {
            CapacityPolicy::Preempt
        } else {
            settings.broker.capacity_policy.unwrap_or_default()
        };
        match self.max_subscribers.or(broker.max_subscribers) {
            Some(max) => broker = broker.with_max_subscribers(max, capacity_policy),
            None if capacity_policy == CapacityPolicy::Preempt => {
                return Err(ServeArgsError::PreemptWithoutLimit);
            }
            None => {}
        }
        if let Some(ms) = self.slow_subscriber_timeout_ms {
            broker = broker.with_delivery(DeliveryPolicy::Evict {
                timeout: Duration::from_millis(ms),
            });
        }

        let keep_alive_secs = self.keep_alive_secs.or(server.keep_alive_secs).unwrap_or(15);
        let stream = StreamConfig {
            keep_alive: (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs)),
            event_name: !self.no_event_name && server.event_name.unwrap_or(true),
        };

        Ok(ServeOptions {
            path,
            addr: SocketAddr::new(bind, port),
            assets_dir,
            source: self.source.or(source.kind).unwrap_or_default(),
            tail,
            follow: source.follow_config(),
            restart,
            broker,
            stream,
            log_level: self
                .log_level
                .clone()
                .or_else(|| server.log_level.clone())
                .unwrap_or_else(|| "info".to_string()),
            log_json: self.log_json || server.log_json.unwrap_or(false),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn serve(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(std::iter::once("tails").chain(args.iter().copied()))
            .expect("arguments should parse");
        match cli.command {
            Some(Command::Serve(args)) => args,
            other => panic!("expected serve, got {other:?}"),
        }
    }

    fn existing_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[test]
    fn no_subcommand_parses() {
        let cli = Cli::try_parse_from(["tails"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn help_is_a_plain_subcommand() {
        let cli = Cli::try_parse_from(["tails", "help"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Help)));
    }

    #[test]
    fn unknown_command_is_captured() {
        let cli = Cli::try_parse_from(["tails", "launch", "now"]).unwrap();
        match cli.command {
            Some(Command::Unknown(args)) => assert_eq!(args, ["launch", "now"]),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn missing_positionals_are_invalid_arguments() {
        let err = serve(&["serve"]).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid arguments for the serve command. use the help command"
        );
        let err = serve(&["serve", "app.log"]).validate().unwrap_err();
        assert!(matches!(err, ServeArgsError::InvalidArguments));
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = serve(&["serve", "", "8080"]).validate().unwrap_err();
        assert_eq!(err.to_string(), "Please provide a path to the file");
    }

    #[test]
    fn nonexistent_path_is_rejected() {
        let err = serve(&["serve", "/no/such/file.log", "8080"])
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "\"/no/such/file.log\" path not found");
    }

    #[test]
    fn port_validation() {
        let file = existing_file();
        let path = file.path().to_str().unwrap();

        let err = serve(&["serve", path, ""]).validate().unwrap_err();
        assert_eq!(err.to_string(), "Please provide a port to serve the app");

        for bad in ["http", "80a", "70000"] {
            let err = serve(&["serve", path, bad]).validate().unwrap_err();
            assert_eq!(err.to_string(), "Please provide a valid port", "port {bad}");
        }

        let (_, port) = serve(&["serve", path, "8080"]).validate().unwrap();
        assert_eq!(port, 8080);
    }

    #[test]
    fn defaults_resolve() {
        let file = existing_file();
        let path = file.path().to_str().unwrap();
        let options = serve(&["serve", path, "3000"])
            .resolve(&Settings::default())
            .unwrap();

        assert_eq!(options.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(options.assets_dir, PathBuf::from("html"));
        assert_eq!(options.source, SourceKind::Tail);
        assert_eq!(options.tail.initial_lines, 10);
        assert!(options.restart.enabled);
        assert_eq!(options.broker.max_subscribers, None);
        assert_eq!(options.broker.delivery, DeliveryPolicy::Drop);
        assert_eq!(options.stream, StreamConfig::default());
        assert_eq!(options.log_level, "info");
        assert!(!options.log_json);
    }

    #[test]
    fn flags_override_settings() {
        let file = existing_file();
        let path = file.path().to_str().unwrap();
        let settings = Settings::from_toml_str(
            r#"
[server]
bind = "127.0.0.1"
keep_alive_secs = 30

[source]
kind = "follow"
max_restarts = 9

[broker]
max_subscribers = 4
"#,
        )
        .unwrap();

        let options = serve(&[
            "serve",
            path,
            "3000",
            "--max-subscribers",
            "1",
            "--preempt",
            "--keep-alive-secs",
            "0",
            "--no-restart",
            "--no-event-name",
            "--slow-subscriber-timeout-ms",
            "250",
        ])
        .resolve(&settings)
        .unwrap();

        assert_eq!(options.addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(options.source, SourceKind::Follow);
        assert_eq!(options.broker.max_subscribers, Some(1));
        assert_eq!(options.broker.capacity_policy, CapacityPolicy::Preempt);
        assert_eq!(
            options.broker.delivery,
            DeliveryPolicy::Evict {
                timeout: Duration::from_millis(250)
            }
        );
        assert!(!options.restart.enabled);
        assert_eq!(options.restart.max_restarts, Some(9));
        assert_eq!(options.stream.keep_alive, None);
        assert!(!options.stream.event_name);
    }

    #[test]
    fn bad_settings_file_is_reported() {
        let file = existing_file();
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tails.toml");
        std::fs::write(&config, "[server]\nport = 1\n").unwrap();

        let args = serve(&[
            "serve",
            file.path().to_str().unwrap(),
            "3000",
            "--config",
            config.to_str().unwrap(),
        ]);
        let err = args.load_options().unwrap_err();
        assert!(matches!(err, ServeArgsError::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn preempt_needs_a_subscriber_limit() {
        let file = existing_file();
        let path = file.path().to_str().unwrap();

        let err = serve(&["serve", path, "3000", "--preempt"])
            .resolve(&Settings::default())
            .unwrap_err();
        assert!(matches!(err, ServeArgsError::PreemptWithoutLimit));

        let settings = Settings::from_toml_str("[broker]\ncapacity_policy = \"preempt\"\n").unwrap();
        let err = serve(&["serve", path, "3000"]).resolve(&settings).unwrap_err();
        assert!(matches!(err, ServeArgsError::PreemptWithoutLimit));

        let options = serve(&["serve", path, "3000", "--preempt", "--max-subscribers", "2"])
            .resolve(&Settings::default())
            .unwrap();
        assert_eq!(options.broker.max_subscribers, Some(2));
    }
}
