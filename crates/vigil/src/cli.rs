//! Clap derive structures for the `vigil` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// vigil -- live camera state from the command line
#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Watch and toggle live NVR camera state",
    long_about = "Reads and changes per-camera feature state (detect, recordings,\n\
        snapshots, audio, ...) over the NVR's WebSocket event bus.\n\n\
        Sent values are shown optimistically and reconciled against the\n\
        value the backend reports back.",
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
    /// Bus profile to use
    #[arg(long, short = 'p', env = "VIGIL_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Event bus URL (overrides profile)
    #[arg(long, short = 'u', env = "VIGIL_URL", global = true)]
    pub url: Option<String>,

    /// Bearer token (overrides profile, env var, and keyring)
    #[arg(long, env = "VIGIL_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "VIGIL_OUTPUT",
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

    /// Seconds to wait for the bus connection and for values
    #[arg(long, env = "VIGIL_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON (one object per line when streaming)
    JsonCompact,
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
    /// Show dashboard toggles for one or more cameras
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Stream reconciled feature changes until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Print the current value of one camera feature
    Get(GetArgs),

    /// Send a value to one camera feature and wait for confirmation
    Set(SetArgs),

    /// Flip an ON/OFF feature and wait for confirmation
    #[command(alias = "t")]
    Toggle(ToggleArgs),

    /// Print raw bus messages for one or more topics
    Tail(TailArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STATE COMMANDS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Camera names (defaults to the profile's camera list)
    pub cameras: Vec<String>,

    /// Milliseconds to wait for retained values after connecting
    #[arg(long, default_value = "1500")]
    pub settle_ms: u64,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Camera names (defaults to the profile's camera list)
    pub cameras: Vec<String>,

    /// Features to watch (defaults to the dashboard toggles)
    #[arg(long, short = 'f', value_delimiter = ',')]
    pub features: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Target as camera/feature (e.g. front_door/detect)
    pub target: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Target as camera/feature (e.g. front_door/detect)
    pub target: String,

    /// Value to send: ON/OFF for toggles, a number for thresholds, JSON otherwise
    pub value: String,

    /// Return as soon as the value is published
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Args)]
pub struct ToggleArgs {
    /// Target as camera/feature (e.g. front_door/audio)
    pub target: String,

    /// Return as soon as the value is published
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Args)]
pub struct TailArgs {
    /// Full bus topics (e.g. front_door/detect/state)
    #[arg(required = true)]
    pub topics: Vec<String>,

    /// Exit after this many messages
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile and make it the default
    Init {
        /// Event bus URL
        #[arg(long)]
        url: String,

        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Cameras shown by status and watch
        #[arg(long, value_delimiter = ',')]
        cameras: Vec<String>,

        /// Environment variable holding the bearer token
        #[arg(long)]
        token_env: Option<String>,
    },

    /// Display current configuration (tokens redacted)
    Show,

    /// Set a key on the active profile
    Set {
        /// Profile key (url, token_env, cameras, confirm_timeout_ms, ...)
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a bearer token in the system keyring (read from stdin)
    SetToken {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
