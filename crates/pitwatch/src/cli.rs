//! Clap derive structures for the `pitwatch` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// pitwatch -- telemetry and commands for cloud-connected pellet grills
#[derive(Debug, Parser)]
#[command(
    name = "pitwatch",
    version,
    about = "Watch and control cloud-connected pellet grills",
    long_about = "Bridges the grill vendor's cloud to your terminal and to a small HTTP API.\n\n\
        Live state arrives over the cloud's MQTT update stream; commands and device\n\
        enumeration go through its REST surface. Temperature history is sampled\n\
        while `pitwatch serve` runs.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "PITWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "PITWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// How long to wait for a grill to answer a state request (e.g. 10s)
    #[arg(long, short = 't', value_parser = humantime::parse_duration, global = true)]
    pub timeout: Option<Duration>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the current state of a grill
    #[command(alias = "st")]
    Status(DeviceArgs),

    /// Ask a grill to publish fresh state and wait for it
    Refresh(DeviceArgs),

    /// List grills registered to the account
    #[command(alias = "dev", alias = "d")]
    Devices,

    /// Send a raw command code to a grill
    #[command(alias = "cmd")]
    Command(CommandArgs),

    /// Stream state updates as they arrive
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Show recorded temperature history
    History(HistoryArgs),

    /// Run the HTTP bridge (status + history endpoints) and the history sampler
    Serve(ServeArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Grill friendly name or thing id
    pub device: String,
}

#[derive(Debug, Args)]
pub struct CommandArgs {
    /// Grill friendly name or thing id
    pub device: String,

    /// Command code, passed through verbatim (90 requests a status refresh)
    pub code: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show these grills (friendly names or thing ids); all when empty
    pub devices: Vec<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Grill friendly name or thing id
    pub device: String,

    /// How far back to look (e.g. 90m, 6h)
    #[arg(long, short = 's', default_value = "1h", value_parser = humantime::parse_duration)]
    pub since: Duration,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides server.listen)
    #[arg(long, short = 'l', env = "PITWATCH_LISTEN")]
    pub listen: Option<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the effective configuration (secrets redacted)
    Show,

    /// Set the account username
    SetUsername {
        /// Account e-mail address
        username: String,
    },

    /// Store the account password in the system keyring
    SetPassword,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
